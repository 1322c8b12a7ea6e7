use object::{Condition, TrapInstruction};

use crate::{ErrorCode, ExecCx, ExecResult, Expr, Instruction};

/// SIGNAL label
#[derive(Debug)]
pub struct Signal {
    label: String,
}

impl Signal {
    pub fn new(label: &str) -> Self {
        Self { label: label.to_ascii_uppercase() }
    }
}

impl Instruction for Signal {
    fn execute(&self, cx: &mut ExecCx<'_>) -> ExecResult {
        cx.signal_to(&self.label)
    }

    fn keyword(&self) -> &'static str {
        "SIGNAL"
    }
}

/// SIGNAL ON / CALL ON condition [NAME label]
#[derive(Debug)]
pub struct TrapOn {
    condition: String,
    kind: TrapInstruction,
    label: String,
}

impl TrapOn {
    pub fn signal(condition: &str) -> Self {
        Self::new(condition, TrapInstruction::Signal)
    }

    pub fn call(condition: &str) -> Self {
        Self::new(condition, TrapInstruction::Call)
    }

    fn new(condition: &str, kind: TrapInstruction) -> Self {
        let condition = condition.to_ascii_uppercase();
        Self { label: condition.clone(), condition, kind }
    }

    pub fn name(mut self, label: &str) -> Self {
        self.label = label.to_ascii_uppercase();
        self
    }
}

impl Instruction for TrapOn {
    fn execute(&self, cx: &mut ExecCx<'_>) -> ExecResult {
        cx.trap_on(&self.condition, self.kind, &self.label)
    }

    fn keyword(&self) -> &'static str {
        self.kind.keyword()
    }
}

/// SIGNAL OFF / CALL OFF condition
#[derive(Debug)]
pub struct TrapOff {
    condition: String,
    kind: TrapInstruction,
}

impl TrapOff {
    pub fn signal(condition: &str) -> Self {
        Self { condition: condition.to_ascii_uppercase(), kind: TrapInstruction::Signal }
    }

    pub fn call(condition: &str) -> Self {
        Self { condition: condition.to_ascii_uppercase(), kind: TrapInstruction::Call }
    }
}

impl Instruction for TrapOff {
    fn execute(&self, cx: &mut ExecCx<'_>) -> ExecResult {
        cx.trap_off(&self.condition);
        Ok(())
    }

    fn keyword(&self) -> &'static str {
        self.kind.keyword()
    }
}

/// What an unhandled RAISE does to the raising activation.
#[derive(Debug)]
pub enum RaiseExit {
    Return(Option<Expr>),
    Exit(Option<Expr>),
}

#[derive(Debug)]
enum RaiseKind {
    Condition(String),
    Syntax(u32),
    Propagate,
}

#[derive(Debug)]
pub struct Raise {
    kind: RaiseKind,
    rc: Option<Expr>,
    description: Option<Expr>,
    additional: Vec<Expr>,
    exit: Option<RaiseExit>,
}

impl Raise {
    fn new(kind: RaiseKind) -> Self {
        Self {
            kind,
            rc: None,
            description: None,
            additional: Vec::new(),
            exit: None,
        }
    }

    /// RAISE name: ERROR, FAILURE, HALT, NOVALUE, USER xxx and friends.
    pub fn condition(name: &str) -> Self {
        Self::new(RaiseKind::Condition(name.to_ascii_uppercase()))
    }

    /// RAISE SYNTAX n
    pub fn syntax(number: u32) -> Self {
        Self::new(RaiseKind::Syntax(number))
    }

    /// RAISE PROPAGATE: re-raise the condition being handled in the caller.
    pub fn propagate() -> Self {
        Self::new(RaiseKind::Propagate)
    }

    pub fn rc(mut self, rc: Expr) -> Self {
        self.rc = Some(rc);
        self
    }

    pub fn description(mut self, description: Expr) -> Self {
        self.description = Some(description);
        self
    }

    pub fn additional(mut self, additional: Vec<Expr>) -> Self {
        self.additional = additional;
        self
    }

    pub fn returning(mut self, value: Option<Expr>) -> Self {
        self.exit = Some(RaiseExit::Return(value));
        self
    }

    pub fn exiting(mut self, value: Option<Expr>) -> Self {
        self.exit = Some(RaiseExit::Exit(value));
        self
    }
}

impl Instruction for Raise {
    fn execute(&self, cx: &mut ExecCx<'_>) -> ExecResult {
        let description = match &self.description {
            Some(expr) => expr.evaluate(cx)?.to_rexx_string().to_string(),
            None => String::new(),
        };
        let name = match &self.kind {
            RaiseKind::Propagate => return cx.propagate(),
            RaiseKind::Syntax(number) => {
                return Err(cx.raise_error(ErrorCode::from_number(*number), description));
            }
            RaiseKind::Condition(name) => name,
        };
        let mut condition = Condition::new(name).with_description(description);
        if let Some(rc) = &self.rc {
            condition.rc = Some(rc.evaluate(cx)?);
        }
        condition.additional = Expr::evaluate_all(&self.additional, cx)?;
        let result = match &self.exit {
            Some(RaiseExit::Return(Some(expr)) | RaiseExit::Exit(Some(expr))) => {
                Some(expr.evaluate(cx)?)
            }
            _ => None,
        };
        condition.result = result.clone();

        if cx.signal_condition(condition)? {
            return Ok(());
        }
        match &self.exit {
            Some(RaiseExit::Return(_)) => cx.return_from(result),
            Some(RaiseExit::Exit(_)) => cx.exit(result),
            None => Ok(()),
        }
    }

    fn keyword(&self) -> &'static str {
        "RAISE"
    }
}
