//! Execution engine for a Rexx-style language.
//!
//! Code arrives as a graph of [`Instruction`] nodes built with
//! [`CodeBuilder`]. Each call runs in an [`Activation`] on the frame stack
//! of an [`Activity`]; activities run one at a time under the runtime's
//! execution lock and hand it over at clause boundaries.

mod activation;
mod activity;
mod builtins;
mod calls;
mod class;
mod code;
mod concurrency;
mod conditions;
mod error;
mod expression;
mod host;
mod interpreter;
mod lock;
mod parker;
mod runtime;
mod settings;
mod stack;
mod threads;
mod traps;
mod variables;

pub mod instructions;

pub use activation::{Activation, ActivationContext, ActivationId, ExecutionState, ScopeState};
pub use activity::{Activity, ActivityStats, Interrupts};
pub use class::{Class, Method, Routine};
pub use code::{Anchor, Clause, Code, CodeBuilder, Instruction};
pub use error::{ErrorCode, ExecResult, RexxError, SettingsError, TraceFrame, Unwind};
pub use expression::{BinaryOp, Expr};
pub use host::{BufferHost, Host, SecurityManager, StdHost, Translator};
pub use interpreter::ExecCx;
pub use lock::ExecutionLock;
pub use parker::NativeParker;
pub use runtime::{Runtime, RuntimeCreateInfo};
pub use settings::{
    ActivationSettings, CallType, EngineSettings, NumericForm, NumericSettings, TraceMode,
    TraceSetting,
};
pub use stack::{EvaluationStack, EvaluationStackInfo};
pub use threads::NativeThread;
pub use traps::{ConditionQueue, PendingTrap, TrapHandler, TrapState, TrapTable};
pub use variables::{FrameRef, VariableFrame};

pub use object::{Condition, ObjectRef, RexxObject, TrapInstruction, Value};
