use crate::Value;

/// How a trapped condition reached its handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrapInstruction {
    Signal,
    Call,
}

impl TrapInstruction {
    pub fn keyword(self) -> &'static str {
        match self {
            TrapInstruction::Signal => "SIGNAL",
            TrapInstruction::Call => "CALL",
        }
    }
}

/// The record describing a raised condition.
///
/// Produced when a condition is raised, handed to the trap handler that
/// catches it and queried through `CONDITION()`. `propagated` is set once
/// the record has crossed an invocation boundary.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    pub name: String,
    pub rc: Option<Value>,
    pub description: String,
    pub additional: Vec<Value>,
    pub result: Option<Value>,
    pub propagated: bool,
    pub instruction: Option<TrapInstruction>,
}

impl Condition {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_ascii_uppercase(),
            rc: None,
            description: String::new(),
            additional: Vec::new(),
            result: None,
            propagated: false,
            instruction: None,
        }
    }

    pub fn with_rc(mut self, rc: impl Into<Value>) -> Self {
        self.rc = Some(rc.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_additional(mut self, additional: Vec<Value>) -> Self {
        self.additional = additional;
        self
    }

    pub fn with_result(mut self, result: Option<Value>) -> Self {
        self.result = result;
        self
    }

    pub fn propagated(mut self) -> Self {
        self.propagated = true;
        self
    }

    #[inline]
    pub fn is(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name)
    }

    /// Visits every value the record keeps alive.
    pub fn for_each_value(&self, visitor: &mut dyn FnMut(&Value)) {
        if let Some(rc) = &self.rc {
            visitor(rc);
        }
        if let Some(result) = &self.result {
            visitor(result);
        }
        self.additional.iter().for_each(|v| visitor(v));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_are_uppercased() {
        let c = Condition::new("novalue").with_description("X");
        assert_eq!(c.name, "NOVALUE");
        assert!(c.is("NoValue"));
        assert!(!c.propagated);
    }

    #[test]
    fn visits_rc_result_and_additional() {
        let c = Condition::new("USER")
            .with_rc(3i64)
            .with_result(Some(Value::from("r")))
            .with_additional(vec![Value::from("a"), Value::from("b")]);
        let mut seen = Vec::new();
        c.for_each_value(&mut |v| seen.push(v.clone()));
        assert_eq!(seen.len(), 4);
    }
}
