use std::{
    collections::{HashMap, VecDeque},
    sync::Arc,
};

use object::{Condition, TrapInstruction, Value};

use crate::ActivationId;

/// Conditions a CALL ON handler may not be installed for, and which an
/// `ANY` handler installed with CALL does not catch.
const SIGNAL_ONLY: [&str; 5] = ["SYNTAX", "NOVALUE", "LOSTDIGITS", "NOMETHOD", "NOSTRING"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrapState {
    On,
    Off,
    Delay,
}

impl TrapState {
    pub fn keyword(self) -> &'static str {
        match self {
            TrapState::On => "ON",
            TrapState::Off => "OFF",
            TrapState::Delay => "DELAY",
        }
    }
}

/// A handler installed with SIGNAL ON or CALL ON.
#[derive(Debug, Clone, PartialEq)]
pub struct TrapHandler {
    pub condition: String,
    pub kind: TrapInstruction,
    pub label: String,
    pub state: TrapState,
    /// Activation that installed the handler; SIGNAL handlers unwind to it.
    pub owner: ActivationId,
}

impl TrapHandler {
    pub fn new(condition: &str, kind: TrapInstruction, label: &str, owner: ActivationId) -> Self {
        Self {
            condition: condition.to_ascii_uppercase(),
            kind,
            label: label.to_ascii_uppercase(),
            state: TrapState::On,
            owner,
        }
    }

    /// Whether this handler may catch `condition`.
    pub fn can_handle(&self, condition: &str) -> bool {
        match self.kind {
            TrapInstruction::Signal => true,
            TrapInstruction::Call => !is_signal_only(condition),
        }
    }
}

pub fn is_signal_only(condition: &str) -> bool {
    SIGNAL_ONLY.iter().any(|c| c.eq_ignore_ascii_case(condition))
}

/// Per-activation trap table.
///
/// Cloning shares the underlying map; the first mutation after a clone
/// copies it, so an internal call inherits its caller's traps for free and
/// only pays for a copy when it installs or changes one.
#[derive(Debug, Clone, Default)]
pub struct TrapTable {
    handlers: Arc<HashMap<String, TrapHandler>>,
}

impl TrapTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, condition: &str) -> Option<&TrapHandler> {
        self.handlers.get(condition)
    }

    /// The handler for a raised condition: the specific one if present,
    /// otherwise `ANY` if it can handle the condition.
    pub fn lookup(&self, condition: &str) -> Option<&TrapHandler> {
        if let Some(handler) = self.handlers.get(condition) {
            return Some(handler);
        }
        self.handlers
            .get("ANY")
            .filter(|handler| handler.can_handle(condition))
    }

    pub fn insert(&mut self, handler: TrapHandler) {
        Arc::make_mut(&mut self.handlers).insert(handler.condition.clone(), handler);
    }

    pub fn remove(&mut self, condition: &str) -> Option<TrapHandler> {
        if !self.handlers.contains_key(condition) {
            return None;
        }
        Arc::make_mut(&mut self.handlers).remove(condition)
    }

    /// The state for `condition`; OFF when no handler is installed.
    pub fn state(&self, condition: &str) -> TrapState {
        self.handlers
            .get(condition)
            .map_or(TrapState::Off, |handler| handler.state)
    }

    pub fn set_state(&mut self, condition: &str, state: TrapState) {
        if self.state(condition) == state || !self.handlers.contains_key(condition) {
            return;
        }
        if let Some(handler) = Arc::make_mut(&mut self.handlers).get_mut(condition) {
            handler.state = state;
        }
    }

    /// Whether unassigned-variable reads should raise NOVALUE.
    pub fn wants_novalue(&self) -> bool {
        self.handlers.contains_key("NOVALUE") || self.handlers.contains_key("ANY")
    }

    /// True while this table still shares storage with another level.
    pub fn is_shared(&self) -> bool {
        Arc::strong_count(&self.handlers) > 1
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

/// A CALL ON handler triggered but not yet dispatched.
#[derive(Debug, Clone)]
pub struct PendingTrap {
    pub handler: TrapHandler,
    pub condition: Condition,
}

/// FIFO of triggered CALL ON handlers awaiting the next clause boundary.
#[derive(Debug, Clone, Default)]
pub struct ConditionQueue {
    pending: VecDeque<PendingTrap>,
}

impl ConditionQueue {
    pub fn push(&mut self, trap: PendingTrap) {
        self.pending.push_back(trap);
    }

    pub fn pop(&mut self) -> Option<PendingTrap> {
        self.pending.pop_front()
    }

    /// Moves every entry of `other` behind ours.
    pub fn append(&mut self, other: &mut ConditionQueue) {
        self.pending.append(&mut other.pending);
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn for_each_value(&self, visitor: &mut dyn FnMut(&Value)) {
        for trap in &self.pending {
            trap.condition.for_each_value(visitor);
        }
    }
}
