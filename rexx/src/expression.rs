use std::cmp::Ordering;

use object::{Number, Value};

use crate::{ErrorCode, ExecCx, ExecResult, RexxError, Unwind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    IntDiv,
    Rem,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    StrictEq,
    And,
    Or,
}

impl BinaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::IntDiv => "%",
            BinaryOp::Rem => "//",
            BinaryOp::Eq => "=",
            BinaryOp::Ne => "\\=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::StrictEq => "==",
            BinaryOp::And => "&",
            BinaryOp::Or => "|",
        }
    }
}

/// An expression tree.
///
/// Sub-expression results travel over the activation's evaluation stack,
/// so anything computed but not yet consumed stays reachable for the
/// collector until the clause ends.
#[derive(Debug, Clone)]
pub enum Expr {
    Literal(Value),
    Var(String),
    Concat {
        left: Box<Expr>,
        right: Box<Expr>,
        blank: bool,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Not(Box<Expr>),
    Negate(Box<Expr>),
    Call {
        name: String,
        args: Vec<Expr>,
    },
    Send {
        receiver: Box<Expr>,
        message: String,
        args: Vec<Expr>,
    },
    New {
        class: String,
        args: Vec<Expr>,
    },
}

impl Expr {
    // ── Construction ───────────────────────────────────────────────

    pub fn lit(value: impl Into<Value>) -> Self {
        Expr::Literal(value.into())
    }

    pub fn num(n: i64) -> Self {
        Expr::Literal(Value::whole(n))
    }

    pub fn var(name: &str) -> Self {
        Expr::Var(name.to_ascii_uppercase())
    }

    /// `left right`
    pub fn concat(left: Expr, right: Expr) -> Self {
        Expr::Concat { left: Box::new(left), right: Box::new(right), blank: true }
    }

    /// `left || right`
    pub fn abut(left: Expr, right: Expr) -> Self {
        Expr::Concat { left: Box::new(left), right: Box::new(right), blank: false }
    }

    pub fn binary(op: BinaryOp, left: Expr, right: Expr) -> Self {
        Expr::Binary { op, left: Box::new(left), right: Box::new(right) }
    }

    pub fn not(operand: Expr) -> Self {
        Expr::Not(Box::new(operand))
    }

    pub fn negate(operand: Expr) -> Self {
        Expr::Negate(Box::new(operand))
    }

    pub fn call(name: &str, args: Vec<Expr>) -> Self {
        Expr::Call { name: name.to_ascii_uppercase(), args }
    }

    pub fn send(receiver: Expr, message: &str, args: Vec<Expr>) -> Self {
        Expr::Send {
            receiver: Box::new(receiver),
            message: message.to_ascii_uppercase(),
            args,
        }
    }

    pub fn new_object(class: &str, args: Vec<Expr>) -> Self {
        Expr::New { class: class.to_ascii_uppercase(), args }
    }

    // ── Evaluation ─────────────────────────────────────────────────

    /// Evaluates to a single value.
    pub fn evaluate(&self, cx: &mut ExecCx<'_>) -> ExecResult<Value> {
        self.push(cx)?;
        pop(cx)
    }

    /// Evaluates to a logical value, raising error 34 for anything but 0 or 1.
    pub fn evaluate_logical(&self, cx: &mut ExecCx<'_>) -> ExecResult<bool> {
        let value = self.evaluate(cx)?;
        logical(cx, &value)
    }

    /// Evaluates a list of arguments, in order. When one fails, the values
    /// already pushed for the earlier ones are discarded.
    pub fn evaluate_all(args: &[Expr], cx: &mut ExecCx<'_>) -> ExecResult<Vec<Value>> {
        cx.stack().mark();
        for arg in args {
            if let Err(unwind) = arg.push(cx) {
                cx.stack().reset_to_mark();
                return Err(unwind);
            }
        }
        cx.stack().release_mark();
        Ok(cx.stack().pop_n(args.len()))
    }

    /// Evaluates onto the evaluation stack.
    fn push(&self, cx: &mut ExecCx<'_>) -> ExecResult {
        let value = match self {
            Expr::Literal(value) => value.clone(),
            Expr::Var(name) => cx.get_variable(name)?,
            Expr::Concat { left, right, blank } => {
                left.push(cx)?;
                right.push(cx)?;
                let r = pop(cx)?;
                let l = pop(cx)?;
                let sep = if *blank { " " } else { "" };
                Value::from(format!("{l}{sep}{r}"))
            }
            Expr::Binary { op, left, right } => {
                left.push(cx)?;
                right.push(cx)?;
                let r = pop(cx)?;
                let l = pop(cx)?;
                binary(cx, *op, &l, &r)?
            }
            Expr::Not(operand) => {
                let v = operand.evaluate(cx)?;
                Value::boolean(!logical(cx, &v)?)
            }
            Expr::Negate(operand) => {
                let v = operand.evaluate(cx)?;
                arithmetic(cx, BinaryOp::Sub, &Value::whole(0), &v)?
            }
            Expr::Call { name, args } => {
                let args = Expr::evaluate_all(args, cx)?;
                cx.call_function(name, args)?
            }
            Expr::Send { receiver, message, args } => {
                let target = receiver.evaluate(cx)?;
                let args = Expr::evaluate_all(args, cx)?;
                match cx.send(target, message, args)? {
                    Some(value) => value,
                    None => {
                        return Err(cx.raise_error(
                            ErrorCode::NoReturnData,
                            format!("message {message} did not return a result"),
                        ));
                    }
                }
            }
            Expr::New { class, args } => {
                let args = Expr::evaluate_all(args, cx)?;
                cx.new_object(class, args)?
            }
        };
        cx.stack().push(value);
        Ok(())
    }
}

fn pop(cx: &mut ExecCx<'_>) -> ExecResult<Value> {
    cx.stack().pop().ok_or_else(|| {
        Unwind::error(RexxError::new(ErrorCode::SystemFailure, "evaluation stack underflow"))
    })
}

fn logical(cx: &mut ExecCx<'_>, value: &Value) -> ExecResult<bool> {
    match value.as_logical() {
        Some(b) => Ok(b),
        None => Err(cx.raise_error(ErrorCode::LogicalValue, format!("\"{value}\""))),
    }
}

fn binary(cx: &mut ExecCx<'_>, op: BinaryOp, l: &Value, r: &Value) -> ExecResult<Value> {
    match op {
        BinaryOp::Add
        | BinaryOp::Sub
        | BinaryOp::Mul
        | BinaryOp::Div
        | BinaryOp::IntDiv
        | BinaryOp::Rem => arithmetic(cx, op, l, r),
        BinaryOp::And => Ok(Value::boolean(logical(cx, l)? & logical(cx, r)?)),
        BinaryOp::Or => Ok(Value::boolean(logical(cx, l)? | logical(cx, r)?)),
        BinaryOp::StrictEq => Ok(Value::boolean(l.to_rexx_string() == r.to_rexx_string())),
        BinaryOp::Eq => Ok(Value::boolean(compare(l, r) == Ordering::Equal)),
        BinaryOp::Ne => Ok(Value::boolean(compare(l, r) != Ordering::Equal)),
        BinaryOp::Lt => Ok(Value::boolean(compare(l, r) == Ordering::Less)),
        BinaryOp::Le => Ok(Value::boolean(compare(l, r) != Ordering::Greater)),
        BinaryOp::Gt => Ok(Value::boolean(compare(l, r) == Ordering::Greater)),
        BinaryOp::Ge => Ok(Value::boolean(compare(l, r) != Ordering::Less)),
    }
}

/// Numeric comparison when both sides are numbers, otherwise blank-stripped
/// string comparison.
pub(crate) fn compare(l: &Value, r: &Value) -> Ordering {
    if let (Some(a), Some(b)) = (l.as_number(), r.as_number()) {
        return match (a, b) {
            (Number::Whole(a), Number::Whole(b)) => a.cmp(&b),
            _ => a.as_real().partial_cmp(&b.as_real()).unwrap_or(Ordering::Equal),
        };
    }
    let (a, b) = (l.to_rexx_string(), r.to_rexx_string());
    a.trim().cmp(b.trim())
}

fn arithmetic(cx: &mut ExecCx<'_>, op: BinaryOp, l: &Value, r: &Value) -> ExecResult<Value> {
    let a = numeric(cx, l)?;
    let b = numeric(cx, r)?;
    let zero = match b {
        Number::Whole(w) => w == 0,
        Number::Real(f) => f == 0.0,
    };
    if zero && matches!(op, BinaryOp::Div | BinaryOp::IntDiv | BinaryOp::Rem) {
        return Err(cx.raise_error(ErrorCode::ArithmeticOverflow, "division by zero"));
    }
    let whole = match (op, a, b) {
        (BinaryOp::Add, Number::Whole(a), Number::Whole(b)) => a.checked_add(b),
        (BinaryOp::Sub, Number::Whole(a), Number::Whole(b)) => a.checked_sub(b),
        (BinaryOp::Mul, Number::Whole(a), Number::Whole(b)) => a.checked_mul(b),
        (BinaryOp::Div, Number::Whole(a), Number::Whole(b)) if a % b == 0 => a.checked_div(b),
        (BinaryOp::IntDiv, Number::Whole(a), Number::Whole(b)) => a.checked_div(b),
        (BinaryOp::Rem, Number::Whole(a), Number::Whole(b)) => a.checked_rem(b),
        _ => None,
    };
    if let Some(w) = whole {
        return Ok(Value::whole(w));
    }
    let (x, y) = (a.as_real(), b.as_real());
    let real = match op {
        BinaryOp::Add => x + y,
        BinaryOp::Sub => x - y,
        BinaryOp::Mul => x * y,
        BinaryOp::Div => x / y,
        BinaryOp::IntDiv => (x / y).trunc(),
        _ => x % y,
    };
    if !real.is_finite() {
        return Err(cx.raise_error(ErrorCode::ArithmeticOverflow, format!("{x} {} {y}", op.symbol())));
    }
    Ok(Value::number(Number::Real(real)))
}

fn numeric(cx: &mut ExecCx<'_>, value: &Value) -> ExecResult<Number> {
    match value.as_number() {
        Some(n) => Ok(n),
        None => Err(cx.raise_error(
            ErrorCode::BadArithmetic,
            format!("\"{value}\" is not a number"),
        )),
    }
}
