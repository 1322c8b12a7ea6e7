//! Value model consumed by the execution engine.
//!
//! Strings, object references and the `.nil` singleton, the condition
//! record, variable cells, and the per-object scope dictionary together
//! with the guard lock that serializes guarded methods.

mod condition;
mod objects;
mod scope;
mod value;
mod variable;

pub use condition::{Condition, TrapInstruction};
pub use objects::RexxObject;
pub use scope::{ActivityId, GuardLock, GuardWaiter, ObjectScope};
pub use value::{Number, ObjectRef, Value, format_real};
pub use variable::{Variable, VariableRef};
