use object::Value;

use crate::{CallType, ExecCx, ExecResult, Expr, Instruction, instructions::upper};

fn optional(expr: &Option<Expr>, cx: &mut ExecCx<'_>) -> ExecResult<Option<Value>> {
    match expr {
        Some(expr) => expr.evaluate(cx).map(Some),
        None => Ok(None),
    }
}

/// CALL name [args]: internal label, built-in, then external routine.
#[derive(Debug)]
pub struct Call {
    name: String,
    args: Vec<Expr>,
}

impl Call {
    pub fn new(name: &str, args: Vec<Expr>) -> Self {
        Self { name: name.to_ascii_uppercase(), args }
    }
}

impl Instruction for Call {
    fn execute(&self, cx: &mut ExecCx<'_>) -> ExecResult {
        let args = Expr::evaluate_all(&self.args, cx)?;
        let result = cx.call(&self.name, args, CallType::Subroutine)?;
        cx.set_result(result);
        Ok(())
    }

    fn keyword(&self) -> &'static str {
        "CALL"
    }
}

#[derive(Debug)]
pub struct Return {
    value: Option<Expr>,
}

impl Return {
    pub fn new(value: Option<Expr>) -> Self {
        Self { value }
    }
}

impl Instruction for Return {
    fn execute(&self, cx: &mut ExecCx<'_>) -> ExecResult {
        let value = optional(&self.value, cx)?;
        cx.return_from(value)
    }

    fn keyword(&self) -> &'static str {
        "RETURN"
    }
}

#[derive(Debug)]
pub struct Exit {
    value: Option<Expr>,
}

impl Exit {
    pub fn new(value: Option<Expr>) -> Self {
        Self { value }
    }
}

impl Instruction for Exit {
    fn execute(&self, cx: &mut ExecCx<'_>) -> ExecResult {
        let value = optional(&self.value, cx)?;
        cx.exit(value)
    }

    fn keyword(&self) -> &'static str {
        "EXIT"
    }
}

#[derive(Debug)]
pub struct Reply {
    value: Option<Expr>,
}

impl Reply {
    pub fn new(value: Option<Expr>) -> Self {
        Self { value }
    }
}

impl Instruction for Reply {
    fn execute(&self, cx: &mut ExecCx<'_>) -> ExecResult {
        let value = optional(&self.value, cx)?;
        cx.reply(value)
    }

    fn keyword(&self) -> &'static str {
        "REPLY"
    }
}

/// PROCEDURE [EXPOSE names]
#[derive(Debug, Default)]
pub struct Procedure {
    expose: Vec<String>,
}

impl Procedure {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn expose(names: &[&str]) -> Self {
        Self { expose: upper(names) }
    }
}

impl Instruction for Procedure {
    fn execute(&self, cx: &mut ExecCx<'_>) -> ExecResult {
        cx.procedure(&self.expose)
    }

    fn keyword(&self) -> &'static str {
        "PROCEDURE"
    }
}

/// EXPOSE names: binds object variables of the receiver.
#[derive(Debug)]
pub struct Expose {
    names: Vec<String>,
}

impl Expose {
    pub fn new(names: &[&str]) -> Self {
        Self { names: upper(names) }
    }
}

impl Instruction for Expose {
    fn execute(&self, cx: &mut ExecCx<'_>) -> ExecResult {
        cx.expose(&self.names)
    }

    fn keyword(&self) -> &'static str {
        "EXPOSE"
    }
}

/// GUARD ON|OFF [WHEN condition]
#[derive(Debug)]
pub struct Guard {
    on: bool,
    when: Option<Expr>,
}

impl Guard {
    pub fn on() -> Self {
        Self { on: true, when: None }
    }

    pub fn off() -> Self {
        Self { on: false, when: None }
    }

    pub fn when(mut self, condition: Expr) -> Self {
        self.when = Some(condition);
        self
    }
}

impl Instruction for Guard {
    fn execute(&self, cx: &mut ExecCx<'_>) -> ExecResult {
        cx.guard(self.on, self.when.as_ref())
    }

    fn keyword(&self) -> &'static str {
        "GUARD"
    }
}

#[derive(Debug)]
pub struct Interpret {
    source: Expr,
}

impl Interpret {
    pub fn new(source: Expr) -> Self {
        Self { source }
    }
}

impl Instruction for Interpret {
    fn execute(&self, cx: &mut ExecCx<'_>) -> ExecResult {
        let source = self.source.evaluate(cx)?.to_rexx_string();
        cx.interpret(&source)
    }

    fn keyword(&self) -> &'static str {
        "INTERPRET"
    }
}

/// FORWARD [CONTINUE] [TO target] [MESSAGE name] [ARGUMENTS ...]
///
/// Anything not given defaults to the running method's receiver, message
/// name or arguments.
#[derive(Debug, Default)]
pub struct Forward {
    to: Option<Expr>,
    message: Option<String>,
    args: Option<Vec<Expr>>,
    continuing: bool,
}

impl Forward {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn to(mut self, target: Expr) -> Self {
        self.to = Some(target);
        self
    }

    pub fn message(mut self, name: &str) -> Self {
        self.message = Some(name.to_ascii_uppercase());
        self
    }

    pub fn arguments(mut self, args: Vec<Expr>) -> Self {
        self.args = Some(args);
        self
    }

    pub fn continuing(mut self) -> Self {
        self.continuing = true;
        self
    }
}

impl Instruction for Forward {
    fn execute(&self, cx: &mut ExecCx<'_>) -> ExecResult {
        let target = match &self.to {
            Some(to) => Some(to.evaluate(cx)?),
            None => None,
        };
        let args = match &self.args {
            Some(args) => Some(Expr::evaluate_all(args, cx)?),
            None => None,
        };
        cx.forward(target, self.message.as_deref(), args, self.continuing)
    }

    fn keyword(&self) -> &'static str {
        "FORWARD"
    }
}
