use std::sync::Arc;

use object::{Number, Value};

use crate::{
    Anchor, ErrorCode, ExecCx, ExecResult, Expr, Instruction,
    activation::ActiveBlock,
};

#[derive(Debug)]
pub struct Jump {
    target: Anchor,
}

impl Jump {
    pub fn new(target: Anchor) -> Self {
        Self { target }
    }
}

impl Instruction for Jump {
    fn execute(&self, cx: &mut ExecCx<'_>) -> ExecResult {
        let target = cx.activation().code().resolve(self.target);
        cx.jump(target);
        Ok(())
    }

    fn keyword(&self) -> &'static str {
        "ELSE"
    }
}

/// The test of an IF: falls through when true, jumps otherwise.
#[derive(Debug)]
pub struct JumpUnless {
    condition: Expr,
    target: Anchor,
}

impl JumpUnless {
    pub fn new(condition: Expr, target: Anchor) -> Self {
        Self { condition, target }
    }
}

impl Instruction for JumpUnless {
    fn execute(&self, cx: &mut ExecCx<'_>) -> ExecResult {
        if !self.condition.evaluate_logical(cx)? {
            let target = cx.activation().code().resolve(self.target);
            cx.jump(target);
        }
        Ok(())
    }

    fn keyword(&self) -> &'static str {
        "IF"
    }
}

/// The repetition part of a DO instruction.
///
/// With no repetitor and no conditions this is a plain DO/END group.
#[derive(Debug, Default)]
pub struct LoopSpec {
    control: Option<String>,
    from: Option<Expr>,
    to: Option<Expr>,
    by: Option<Expr>,
    repeat: Option<Expr>,
    forever: bool,
    while_: Option<Expr>,
    until: Option<Expr>,
}

impl LoopSpec {
    pub fn group() -> Self {
        Self::default()
    }

    pub fn forever() -> Self {
        Self { forever: true, ..Self::default() }
    }

    pub fn repeat(count: Expr) -> Self {
        Self { repeat: Some(count), ..Self::default() }
    }

    /// `DO control = from TO to`
    pub fn counted(control: &str, from: Expr, to: Expr) -> Self {
        Self {
            control: Some(control.to_ascii_uppercase()),
            from: Some(from),
            to: Some(to),
            ..Self::default()
        }
    }

    /// `DO control = from` with no upper bound.
    pub fn stepping(control: &str, from: Expr) -> Self {
        Self {
            control: Some(control.to_ascii_uppercase()),
            from: Some(from),
            ..Self::default()
        }
    }

    pub fn by(mut self, step: Expr) -> Self {
        self.by = Some(step);
        self
    }

    pub fn while_(mut self, condition: Expr) -> Self {
        self.while_ = Some(condition);
        self
    }

    pub fn until(mut self, condition: Expr) -> Self {
        self.until = Some(condition);
        self
    }

    pub fn is_loop(&self) -> bool {
        self.forever
            || self.control.is_some()
            || self.repeat.is_some()
            || self.while_.is_some()
            || self.until.is_some()
    }

    /// The control variable, which LEAVE and ITERATE may name.
    pub fn name(&self) -> Option<&str> {
        self.control.as_deref()
    }
}

#[derive(Debug)]
pub struct Do {
    spec: Arc<LoopSpec>,
    end: Anchor,
}

impl Do {
    pub fn new(spec: LoopSpec, end: Anchor) -> Self {
        Self { spec: Arc::new(spec), end }
    }
}

fn number(cx: &mut ExecCx<'_>, what: &str, expr: &Expr) -> ExecResult<Number> {
    let value = expr.evaluate(cx)?;
    match value.as_number() {
        Some(n) => Ok(n),
        None => Err(cx.raise_error(
            ErrorCode::BadArithmetic,
            format!("DO {what} value \"{value}\" is not a number"),
        )),
    }
}

fn add(a: Number, b: Number) -> Number {
    match (a, b) {
        (Number::Whole(a), Number::Whole(b)) => match a.checked_add(b) {
            Some(sum) => Number::Whole(sum),
            None => Number::Real(a as f64 + b as f64),
        },
        _ => Number::Real(a.as_real() + b.as_real()),
    }
}

fn control_value(cx: &mut ExecCx<'_>, control: &str) -> ExecResult<Number> {
    let current = cx.get_variable(control)?;
    match current.as_number() {
        Some(n) => Ok(n),
        None => Err(cx.raise_error(
            ErrorCode::BadArithmetic,
            format!("control variable {control} is \"{current}\""),
        )),
    }
}

/// Whether another pass of `block` should run. `first` is the check made by
/// DO itself, before the first pass.
fn next_pass(cx: &mut ExecCx<'_>, block: &mut ActiveBlock, first: bool) -> ExecResult<bool> {
    let spec = block.spec.clone();
    if !first {
        if let Some(until) = &spec.until {
            if until.evaluate_logical(cx)? {
                return Ok(false);
            }
        }
        if let Some(control) = &spec.control {
            let current = control_value(cx, control)?;
            cx.set_variable(control, Value::number(add(current, block.step)));
        }
    }
    if let Some(remaining) = block.remaining.as_mut() {
        if !first {
            *remaining -= 1;
        }
        if *remaining <= 0 {
            return Ok(false);
        }
    }
    if let (Some(control), Some(limit)) = (&spec.control, block.limit) {
        let current = control_value(cx, control)?.as_real();
        let past = if block.step.as_real() < 0.0 {
            current < limit.as_real()
        } else {
            current > limit.as_real()
        };
        if past {
            return Ok(false);
        }
    }
    if let Some(condition) = &spec.while_ {
        if !condition.evaluate_logical(cx)? {
            return Ok(false);
        }
    }
    Ok(true)
}

impl Instruction for Do {
    fn execute(&self, cx: &mut ExecCx<'_>) -> ExecResult {
        if !self.spec.is_loop() {
            return Ok(());
        }
        let (start, end) = {
            let act = cx.activation();
            (act.current.unwrap_or(0), act.code().resolve(self.end))
        };
        let spec = &self.spec;
        if let Some(control) = &spec.control {
            if let Some(from) = &spec.from {
                let initial = number(cx, "FROM", from)?;
                cx.set_variable(control, Value::number(initial));
            }
        }
        let limit = match &spec.to {
            Some(to) => Some(number(cx, "TO", to)?),
            None => None,
        };
        let step = match &spec.by {
            Some(by) => number(cx, "BY", by)?,
            None => Number::Whole(1),
        };
        let remaining = match &spec.repeat {
            Some(count) => {
                let value = count.evaluate(cx)?;
                match value.as_whole().filter(|n| *n >= 0) {
                    Some(n) => Some(n),
                    None => {
                        return Err(cx.raise_error(
                            ErrorCode::Other(26),
                            format!("DO count \"{value}\" is not a non-negative whole number"),
                        ));
                    }
                }
            }
            None => None,
        };
        let mut block = ActiveBlock {
            start,
            end,
            spec: spec.clone(),
            remaining,
            limit,
            step,
        };
        if next_pass(cx, &mut block, true)? {
            cx.activation_mut().blocks.push(block);
        } else {
            cx.jump(end + 1);
        }
        Ok(())
    }

    fn keyword(&self) -> &'static str {
        "DO"
    }
}

#[derive(Debug)]
pub struct End {
    start: Anchor,
}

impl End {
    pub fn new(start: Anchor) -> Self {
        Self { start }
    }
}

impl Instruction for End {
    fn execute(&self, cx: &mut ExecCx<'_>) -> ExecResult {
        let start = cx.activation().code().resolve(self.start);
        let top = cx.activation().blocks.last().filter(|b| b.start == start).cloned();
        let Some(mut block) = top else {
            // end of a plain group
            return Ok(());
        };
        if next_pass(cx, &mut block, false)? {
            if let Some(slot) = cx.activation_mut().blocks.last_mut() {
                *slot = block;
            }
            cx.jump(start + 1);
        } else {
            cx.activation_mut().blocks.pop();
        }
        Ok(())
    }

    fn keyword(&self) -> &'static str {
        "END"
    }
}

/// Index of the innermost active loop matching `name`.
fn find_loop(cx: &mut ExecCx<'_>, keyword: &str, name: Option<&str>) -> ExecResult<usize> {
    let found = cx.activation().blocks.iter().rposition(|b| b.matches(name));
    match found {
        Some(index) => Ok(index),
        None => Err(cx.raise_error(
            ErrorCode::InvalidLeave,
            match name {
                Some(name) => format!("{keyword} {name} is not within a loop named {name}"),
                None => format!("{keyword} is not within a repetitive DO loop"),
            },
        )),
    }
}

#[derive(Debug, Default)]
pub struct Leave {
    name: Option<String>,
}

impl Leave {
    pub fn new(name: Option<&str>) -> Self {
        Self { name: name.map(str::to_ascii_uppercase) }
    }
}

impl Instruction for Leave {
    fn execute(&self, cx: &mut ExecCx<'_>) -> ExecResult {
        let index = find_loop(cx, "LEAVE", self.name.as_deref())?;
        let act = cx.activation_mut();
        let end = act.blocks[index].end;
        act.blocks.truncate(index);
        cx.jump(end + 1);
        Ok(())
    }

    fn keyword(&self) -> &'static str {
        "LEAVE"
    }
}

#[derive(Debug, Default)]
pub struct Iterate {
    name: Option<String>,
}

impl Iterate {
    pub fn new(name: Option<&str>) -> Self {
        Self { name: name.map(str::to_ascii_uppercase) }
    }
}

impl Instruction for Iterate {
    fn execute(&self, cx: &mut ExecCx<'_>) -> ExecResult {
        let index = find_loop(cx, "ITERATE", self.name.as_deref())?;
        let act = cx.activation_mut();
        let end = act.blocks[index].end;
        act.blocks.truncate(index + 1);
        // the END clause performs the step and the loop tests
        cx.jump(end);
        Ok(())
    }

    fn keyword(&self) -> &'static str {
        "ITERATE"
    }
}
