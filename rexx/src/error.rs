use std::fmt;

use object::{Condition, Value};

use crate::ActivationId;

/// Numbered runtime errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    ProgramInterrupted,
    ControlStackFull,
    LabelNotFound,
    UnexpectedProcedure,
    InvalidTrap,
    InvalidLeave,
    InvalidResult,
    LogicalValue,
    BadArithmetic,
    ArithmeticOverflow,
    RoutineNotFound,
    NoReturnData,
    SystemFailure,
    IncorrectCall,
    NoMethod,
    Execution,
    Translation,
    Other(u32),
}

impl ErrorCode {
    pub fn number(self) -> u32 {
        match self {
            ErrorCode::ProgramInterrupted => 4,
            ErrorCode::ControlStackFull => 11,
            ErrorCode::LabelNotFound => 16,
            ErrorCode::UnexpectedProcedure => 17,
            ErrorCode::InvalidTrap => 25,
            ErrorCode::InvalidLeave => 28,
            ErrorCode::InvalidResult => 33,
            ErrorCode::LogicalValue => 34,
            ErrorCode::BadArithmetic => 41,
            ErrorCode::ArithmeticOverflow => 42,
            ErrorCode::RoutineNotFound => 43,
            ErrorCode::NoReturnData => 44,
            ErrorCode::SystemFailure => 48,
            ErrorCode::IncorrectCall => 93,
            ErrorCode::NoMethod => 97,
            ErrorCode::Execution => 98,
            ErrorCode::Translation => 99,
            ErrorCode::Other(n) => n,
        }
    }

    pub fn from_number(n: u32) -> Self {
        match n {
            4 => ErrorCode::ProgramInterrupted,
            11 => ErrorCode::ControlStackFull,
            16 => ErrorCode::LabelNotFound,
            17 => ErrorCode::UnexpectedProcedure,
            25 => ErrorCode::InvalidTrap,
            28 => ErrorCode::InvalidLeave,
            33 => ErrorCode::InvalidResult,
            34 => ErrorCode::LogicalValue,
            41 => ErrorCode::BadArithmetic,
            42 => ErrorCode::ArithmeticOverflow,
            43 => ErrorCode::RoutineNotFound,
            44 => ErrorCode::NoReturnData,
            48 => ErrorCode::SystemFailure,
            93 => ErrorCode::IncorrectCall,
            97 => ErrorCode::NoMethod,
            98 => ErrorCode::Execution,
            99 => ErrorCode::Translation,
            n => ErrorCode::Other(n),
        }
    }

    pub fn message(self) -> &'static str {
        match self {
            ErrorCode::ProgramInterrupted => "Program interrupted",
            ErrorCode::ControlStackFull => "Control stack full",
            ErrorCode::LabelNotFound => "Label not found",
            ErrorCode::UnexpectedProcedure => "Unexpected PROCEDURE",
            ErrorCode::InvalidTrap => "Invalid subkeyword found",
            ErrorCode::InvalidLeave => "Invalid LEAVE or ITERATE",
            ErrorCode::InvalidResult => "Invalid expression result",
            ErrorCode::LogicalValue => "Logical value not 0 or 1",
            ErrorCode::BadArithmetic => "Bad arithmetic conversion",
            ErrorCode::ArithmeticOverflow => "Arithmetic overflow/underflow",
            ErrorCode::RoutineNotFound => "Routine not found",
            ErrorCode::NoReturnData => "Function or message did not return data",
            ErrorCode::SystemFailure => "Failure in system service",
            ErrorCode::IncorrectCall => "Incorrect call to method",
            ErrorCode::NoMethod => "Object method not found",
            ErrorCode::Execution => "Execution error",
            ErrorCode::Translation => "Translation error",
            ErrorCode::Other(_) => "Error",
        }
    }
}

/// One line of an error traceback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceFrame {
    pub line: usize,
    pub description: String,
}

/// A runtime error, as reported to the caller of an entry point.
#[derive(Debug, Clone, PartialEq)]
pub struct RexxError {
    pub code: ErrorCode,
    pub detail: String,
    pub traceback: Vec<TraceFrame>,
    pub condition: Option<Condition>,
}

impl RexxError {
    pub fn new(code: ErrorCode, detail: impl Into<String>) -> Self {
        Self {
            code,
            detail: detail.into(),
            traceback: Vec::new(),
            condition: None,
        }
    }

    pub fn with_traceback(mut self, traceback: Vec<TraceFrame>) -> Self {
        self.traceback = traceback;
        self
    }

    /// Packages the error as a SYNTAX condition.
    pub fn to_condition(&self) -> Condition {
        if let Some(condition) = &self.condition {
            return condition.clone();
        }
        Condition::new("SYNTAX")
            .with_rc(Value::whole(self.code.number() as i64))
            .with_description(self.detail.clone())
    }

    /// Rebuilds an error from a SYNTAX condition that was propagated past
    /// its last handler.
    pub fn from_condition(condition: Condition) -> Self {
        let code = condition
            .rc
            .as_ref()
            .and_then(Value::as_whole)
            .map(|n| ErrorCode::from_number(n as u32))
            .unwrap_or(ErrorCode::Execution);
        let detail = condition.description.clone();
        Self {
            code,
            detail,
            traceback: Vec::new(),
            condition: Some(condition),
        }
    }
}

impl fmt::Display for RexxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Error {}: {}", self.code.number(), self.code.message())?;
        if !self.detail.is_empty() {
            write!(f, ": {}", self.detail)?;
        }
        for frame in &self.traceback {
            write!(f, "\n  {:>6} *-* {}", frame.line, frame.description)?;
        }
        Ok(())
    }
}

impl std::error::Error for RexxError {}

/// Invalid engine configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SettingsError(pub &'static str);

impl fmt::Display for SettingsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid engine settings: {}", self.0)
    }
}

impl std::error::Error for SettingsError {}

/// Non-local control transfer inside the engine.
///
/// Every frame between the raise point and the target sees the unwind as
/// an `Err`, terminates itself and passes it on unchanged.
#[derive(Debug)]
pub enum Unwind {
    /// Resume (or finish) the activation with this id.
    To(ActivationId),
    /// An untrapped runtime error travelling to the top of the call chain.
    Error(Box<RexxError>),
    /// A condition re-raised with `RAISE PROPAGATE`.
    Propagate(Box<Condition>),
}

impl Unwind {
    pub(crate) fn error(error: RexxError) -> Self {
        Unwind::Error(Box::new(error))
    }
}

pub type ExecResult<T = ()> = Result<T, Unwind>;
