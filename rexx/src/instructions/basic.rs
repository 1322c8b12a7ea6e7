use crate::{
    ErrorCode, ExecCx, ExecResult, Expr, Instruction, NumericForm,
    instructions::upper,
};

#[derive(Debug, Clone, Copy, Default)]
pub struct Nop;

impl Instruction for Nop {
    fn execute(&self, _cx: &mut ExecCx<'_>) -> ExecResult {
        Ok(())
    }

    fn keyword(&self) -> &'static str {
        "NOP"
    }
}

#[derive(Debug)]
pub struct Label {
    name: String,
}

impl Label {
    pub fn new(name: &str) -> Self {
        Self { name: name.to_ascii_uppercase() }
    }
}

impl Instruction for Label {
    fn execute(&self, _cx: &mut ExecCx<'_>) -> ExecResult {
        Ok(())
    }

    fn keyword(&self) -> &'static str {
        "LABEL"
    }

    fn label(&self) -> Option<&str> {
        Some(&self.name)
    }
}

#[derive(Debug)]
pub struct Say {
    expr: Expr,
}

impl Say {
    pub fn new(expr: Expr) -> Self {
        Self { expr }
    }
}

impl Instruction for Say {
    fn execute(&self, cx: &mut ExecCx<'_>) -> ExecResult {
        let value = self.expr.evaluate(cx)?;
        cx.trace_result(&value);
        cx.say(&value.to_rexx_string());
        Ok(())
    }

    fn keyword(&self) -> &'static str {
        "SAY"
    }
}

#[derive(Debug)]
pub struct Assign {
    name: String,
    expr: Expr,
}

impl Assign {
    pub fn new(name: &str, expr: Expr) -> Self {
        Self { name: name.to_ascii_uppercase(), expr }
    }
}

impl Instruction for Assign {
    fn execute(&self, cx: &mut ExecCx<'_>) -> ExecResult {
        let value = self.expr.evaluate(cx)?;
        cx.trace_result(&value);
        cx.set_variable(&self.name, value);
        Ok(())
    }

    fn keyword(&self) -> &'static str {
        "ASSIGNMENT"
    }
}

#[derive(Debug)]
pub struct DropVariables {
    names: Vec<String>,
}

impl DropVariables {
    pub fn new(names: &[&str]) -> Self {
        Self { names: upper(names) }
    }
}

impl Instruction for DropVariables {
    fn execute(&self, cx: &mut ExecCx<'_>) -> ExecResult {
        for name in &self.names {
            cx.drop_variable(name);
        }
        Ok(())
    }

    fn keyword(&self) -> &'static str {
        "DROP"
    }
}

/// An expression clause. Message sends are allowed to return nothing;
/// whatever comes back lands in RESULT.
#[derive(Debug)]
pub struct Evaluate {
    expr: Expr,
}

impl Evaluate {
    pub fn new(expr: Expr) -> Self {
        Self { expr }
    }
}

impl Instruction for Evaluate {
    fn execute(&self, cx: &mut ExecCx<'_>) -> ExecResult {
        let result = match &self.expr {
            Expr::Send { receiver, message, args } => {
                let target = receiver.evaluate(cx)?;
                let args = Expr::evaluate_all(args, cx)?;
                cx.send(target, message, args)?
            }
            expr => Some(expr.evaluate(cx)?),
        };
        if let Some(value) = &result {
            cx.trace_result(value);
        }
        cx.set_result(result);
        Ok(())
    }

    fn keyword(&self) -> &'static str {
        "MESSAGE"
    }
}

#[derive(Debug)]
pub struct Trace {
    setting: Expr,
}

impl Trace {
    pub fn new(setting: Expr) -> Self {
        Self { setting }
    }
}

impl Instruction for Trace {
    fn execute(&self, cx: &mut ExecCx<'_>) -> ExecResult {
        let request = self.setting.evaluate(cx)?.to_rexx_string();
        match cx.settings().trace.apply(&request) {
            Some(setting) => {
                cx.settings_mut().trace = setting;
                Ok(())
            }
            None => Err(cx.raise_error(
                ErrorCode::Other(24),
                format!("invalid TRACE request \"{request}\""),
            )),
        }
    }

    fn keyword(&self) -> &'static str {
        "TRACE"
    }
}

#[derive(Debug)]
enum NumericOption {
    Digits(Expr),
    Fuzz(Expr),
    Form(NumericForm),
}

#[derive(Debug)]
pub struct Numeric {
    option: NumericOption,
}

impl Numeric {
    pub fn digits(expr: Expr) -> Self {
        Self { option: NumericOption::Digits(expr) }
    }

    pub fn fuzz(expr: Expr) -> Self {
        Self { option: NumericOption::Fuzz(expr) }
    }

    pub fn form(form: NumericForm) -> Self {
        Self { option: NumericOption::Form(form) }
    }
}

impl Instruction for Numeric {
    fn execute(&self, cx: &mut ExecCx<'_>) -> ExecResult {
        let mut numeric = cx.settings().numeric;
        match &self.option {
            NumericOption::Form(form) => numeric.form = *form,
            NumericOption::Digits(expr) | NumericOption::Fuzz(expr) => {
                let value = expr.evaluate(cx)?;
                let Some(n) = value.as_whole().filter(|n| *n >= 0) else {
                    return Err(cx.raise_error(
                        ErrorCode::InvalidResult,
                        format!("\"{value}\" is not a valid NUMERIC value"),
                    ));
                };
                match self.option {
                    NumericOption::Digits(_) => numeric.digits = n as usize,
                    _ => numeric.fuzz = n as usize,
                }
            }
        }
        if numeric.digits == 0 || numeric.fuzz >= numeric.digits {
            return Err(cx.raise_error(
                ErrorCode::InvalidResult,
                format!("NUMERIC FUZZ {} must be less than DIGITS {}", numeric.fuzz, numeric.digits),
            ));
        }
        cx.settings_mut().numeric = numeric;
        Ok(())
    }

    fn keyword(&self) -> &'static str {
        "NUMERIC"
    }
}

/// ADDRESS with an environment switches to it; bare ADDRESS swaps back.
#[derive(Debug)]
pub struct Address {
    environment: Option<String>,
}

impl Address {
    pub fn new(environment: Option<&str>) -> Self {
        Self { environment: environment.map(str::to_ascii_uppercase) }
    }
}

impl Instruction for Address {
    fn execute(&self, cx: &mut ExecCx<'_>) -> ExecResult {
        cx.settings_mut().set_address(self.environment.clone());
        Ok(())
    }

    fn keyword(&self) -> &'static str {
        "ADDRESS"
    }
}
