use object::Value;

use crate::{ExecCx, ExecResult, Expr, Instruction};

/// A command clause, sent to the current ADDRESS environment.
#[derive(Debug)]
pub struct Command {
    command: Expr,
}

impl Command {
    pub fn new(command: Expr) -> Self {
        Self { command }
    }
}

impl Instruction for Command {
    fn execute(&self, cx: &mut ExecCx<'_>) -> ExecResult {
        let command = self.command.evaluate(cx)?.to_rexx_string();
        cx.command(&command)
    }

    fn keyword(&self) -> &'static str {
        "COMMAND"
    }
}

/// SETLOCAL: snapshots the process environment until ENDLOCAL or until the
/// activation ends.
#[derive(Debug, Default)]
pub struct SetLocal;

impl Instruction for SetLocal {
    fn execute(&self, cx: &mut ExecCx<'_>) -> ExecResult {
        if cx.activation().environment.is_none() {
            let snapshot = cx.host().environment();
            cx.activation_mut().environment = Some(snapshot);
            cx.set_result(Some(Value::boolean(true)));
        } else {
            cx.set_result(Some(Value::boolean(false)));
        }
        Ok(())
    }

    fn keyword(&self) -> &'static str {
        "SETLOCAL"
    }
}

#[derive(Debug, Default)]
pub struct EndLocal;

impl Instruction for EndLocal {
    fn execute(&self, cx: &mut ExecCx<'_>) -> ExecResult {
        let snapshot = cx.activation_mut().environment.take();
        let restored = snapshot.is_some();
        if let Some(snapshot) = snapshot {
            cx.host().restore_environment(snapshot);
        }
        cx.set_result(Some(Value::boolean(restored)));
        Ok(())
    }

    fn keyword(&self) -> &'static str {
        "ENDLOCAL"
    }
}

/// Opens a named stream owned by the activation; it is closed when the
/// activation ends.
#[derive(Debug)]
pub struct OpenStream {
    name: Expr,
}

impl OpenStream {
    pub fn new(name: Expr) -> Self {
        Self { name }
    }
}

impl Instruction for OpenStream {
    fn execute(&self, cx: &mut ExecCx<'_>) -> ExecResult {
        let name = self.name.evaluate(cx)?.to_rexx_string().to_string();
        let opened = cx.host().open_stream(&name);
        if opened {
            cx.activation_mut().streams.push(name);
        }
        cx.set_result(Some(Value::from(if opened { "READY:" } else { "ERROR:" })));
        Ok(())
    }

    fn keyword(&self) -> &'static str {
        "STREAM"
    }
}
