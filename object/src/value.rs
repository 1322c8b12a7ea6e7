use std::{fmt, sync::Arc};

use crate::RexxObject;

/// Shared reference to a heap object.
pub type ObjectRef = Arc<RexxObject>;

/// A language value.
///
/// Everything the engine moves around is one of three things:
/// - **Nil**:    the `.nil` singleton, also used as "omitted" in argument lists.
/// - **Str**:    a character string; numbers are strings that parse as numbers.
/// - **Object**: a reference to a [`RexxObject`] carrying its own scope variables.
#[derive(Clone, Default)]
pub enum Value {
    #[default]
    Nil,
    Str(Arc<str>),
    Object(ObjectRef),
}

/// Numeric view of a string value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Number {
    Whole(i64),
    Real(f64),
}

impl Value {
    // ── Construction ───────────────────────────────────────────────

    #[inline]
    pub fn string(s: impl Into<Arc<str>>) -> Self {
        Value::Str(s.into())
    }

    #[inline]
    pub fn whole(n: i64) -> Self {
        Value::Str(Arc::from(n.to_string()))
    }

    #[inline]
    pub fn boolean(b: bool) -> Self {
        Value::Str(Arc::from(if b { "1" } else { "0" }))
    }

    pub fn number(n: Number) -> Self {
        match n {
            Number::Whole(w) => Value::whole(w),
            Number::Real(r) => Value::Str(Arc::from(format_real(r))),
        }
    }

    #[inline]
    pub fn object(obj: ObjectRef) -> Self {
        Value::Object(obj)
    }

    // ── Inspection ─────────────────────────────────────────────────

    #[inline]
    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    #[inline]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    #[inline]
    pub fn as_object(&self) -> Option<&ObjectRef> {
        match self {
            Value::Object(o) => Some(o),
            _ => None,
        }
    }

    /// The string form used whenever a value is needed as text.
    pub fn to_rexx_string(&self) -> Arc<str> {
        match self {
            Value::Nil => Arc::from("The NIL object"),
            Value::Str(s) => s.clone(),
            Value::Object(o) => Arc::from(o.default_name()),
        }
    }

    /// Parses the value as a number. Leading and trailing blanks are ignored.
    pub fn as_number(&self) -> Option<Number> {
        let text = self.as_str()?.trim();
        if text.is_empty() {
            return None;
        }
        if let Ok(w) = text.parse::<i64>() {
            return Some(Number::Whole(w));
        }
        // reject the spellings f64 accepts but the language does not
        if text.chars().any(|c| c.is_ascii_alphabetic() && c != 'e' && c != 'E') {
            return None;
        }
        text.parse::<f64>().ok().filter(|r| r.is_finite()).map(Number::Real)
    }

    /// Whole-number view; reals with no fractional part qualify.
    pub fn as_whole(&self) -> Option<i64> {
        match self.as_number()? {
            Number::Whole(w) => Some(w),
            Number::Real(r) if r.fract() == 0.0 && r.abs() < 9.0e15 => Some(r as i64),
            Number::Real(_) => None,
        }
    }

    /// Logical view: exactly "0" or "1".
    pub fn as_logical(&self) -> Option<bool> {
        match self.as_str()?.trim() {
            "1" => Some(true),
            "0" => Some(false),
            _ => None,
        }
    }
}

impl Number {
    #[inline]
    pub fn as_real(self) -> f64 {
        match self {
            Number::Whole(w) => w as f64,
            Number::Real(r) => r,
        }
    }
}

/// Formats a real so integral results print without a fraction.
pub fn format_real(r: f64) -> String {
    if r.fract() == 0.0 && r.abs() < 9.0e15 {
        return (r as i64).to_string();
    }
    let text = format!("{r}");
    if text.contains('.') && !text.contains('e') {
        text.trim_end_matches('0').trim_end_matches('.').to_string()
    } else {
        text
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Nil, Value::Nil) => true,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => write!(f, ".nil"),
            Value::Str(s) => write!(f, "{s:?}"),
            Value::Object(o) => write!(f, "<{} #{}>", o.class_name(), o.id()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_rexx_string())
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::string(s)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::string(s)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::whole(n)
    }
}

impl From<ObjectRef> for Value {
    fn from(o: ObjectRef) -> Self {
        Value::Object(o)
    }
}
