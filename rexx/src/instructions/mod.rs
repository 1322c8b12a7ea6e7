//! The instruction nodes clauses are built from.
//!
//! Every node implements [`Instruction`](crate::Instruction) and keeps no
//! state of its own; loops, traps and everything else that changes while
//! code runs lives on the activation.

mod basic;
mod calls;
mod conditions;
mod environment;
mod flow;

pub use basic::{Address, Assign, DropVariables, Evaluate, Label, Nop, Numeric, Say, Trace};
pub use calls::{Call, Exit, Expose, Forward, Guard, Interpret, Procedure, Reply, Return};
pub use conditions::{Raise, RaiseExit, Signal, TrapOff, TrapOn};
pub use environment::{Command, EndLocal, OpenStream, SetLocal};
pub use flow::{Do, End, Iterate, Jump, JumpUnless, Leave, LoopSpec};

fn upper(names: &[&str]) -> Vec<String> {
    names.iter().map(|n| n.to_ascii_uppercase()).collect()
}
