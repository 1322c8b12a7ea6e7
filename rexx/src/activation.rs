use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use heap::RootProvider;
use object::{Condition, Number, ObjectRef, Value};

use crate::{
    ActivationSettings, Code, ConditionQueue, EvaluationStack, FrameRef, TrapTable,
    instructions::LoopSpec,
};

static NEXT_ACTIVATION: AtomicU64 = AtomicU64::new(1);

/// Identity of an activation. Unwinds carry it as their target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ActivationId(u64);

impl ActivationId {
    pub(crate) fn next() -> Self {
        Self(NEXT_ACTIVATION.fetch_add(1, Ordering::Relaxed))
    }

    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    #[inline]
    pub fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ActivationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "activation-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionState {
    Active,
    Returned,
    Replied,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivationContext {
    Program,
    Method,
    Routine,
    InternalCall,
    Interpret,
    DebugPause,
}

impl ActivationContext {
    /// Program, method and routine levels: the ones EXIT and REPLY act on.
    #[inline]
    pub fn is_top_level(self) -> bool {
        matches!(
            self,
            ActivationContext::Program | ActivationContext::Method | ActivationContext::Routine
        )
    }

    /// Levels that hand SIGNAL, RETURN and REPLY to their parent.
    #[inline]
    pub fn forwards_control(self) -> bool {
        matches!(self, ActivationContext::Interpret | ActivationContext::DebugPause)
    }

    pub fn keyword(self) -> &'static str {
        match self {
            ActivationContext::Program => "program",
            ActivationContext::Method => "method",
            ActivationContext::Routine => "routine",
            ActivationContext::InternalCall => "internal call",
            ActivationContext::Interpret => "interpret",
            ActivationContext::DebugPause => "debug pause",
        }
    }
}

/// Whether the activation holds a reservation on its receiver's guard lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeState {
    Released,
    Reserved,
}

/// Work left for an activation by an unwind that targets it.
#[derive(Debug, Clone)]
pub(crate) enum PendingTransfer {
    Signal { target: usize, line: usize },
    Return(Option<Value>),
    Reply(Option<Value>),
}

/// A DO block that is currently executing.
#[derive(Debug, Clone)]
pub(crate) struct ActiveBlock {
    /// Clause index of the DO.
    pub start: usize,
    /// Clause index of the matching END.
    pub end: usize,
    pub spec: Arc<LoopSpec>,
    pub remaining: Option<i64>,
    pub limit: Option<Number>,
    pub step: Number,
}

impl ActiveBlock {
    pub fn matches(&self, name: Option<&str>) -> bool {
        match name {
            None => self.spec.is_loop(),
            Some(name) => self.spec.name() == Some(name),
        }
    }
}

/// One call's execution context.
///
/// Owned by the frame stack of exactly one activity at a time.
pub struct Activation {
    pub(crate) id: ActivationId,
    pub(crate) context: ActivationContext,
    pub(crate) state: ExecutionState,
    pub(crate) code: Arc<Code>,
    pub(crate) name: String,
    pub(crate) current: Option<usize>,
    pub(crate) next: Option<usize>,
    pub(crate) stack: EvaluationStack,
    pub(crate) variables: FrameRef,
    pub(crate) settings: ActivationSettings,
    pub(crate) traps: TrapTable,
    pub(crate) conditions: ConditionQueue,
    pub(crate) clause_boundary: bool,
    pub(crate) parent: Option<ActivationId>,
    pub(crate) receiver: Option<ObjectRef>,
    pub(crate) superclass: Option<String>,
    pub(crate) scope: ScopeState,
    pub(crate) guarded: bool,
    pub(crate) transfer_failed: bool,
    pub(crate) debug_pause: bool,
    pub(crate) instruction_count: u64,
    pub(crate) args: Vec<Value>,
    pub(crate) result: Option<Value>,
    pub(crate) replied: bool,
    pub(crate) procedure_allowed: bool,
    pub(crate) blocks: Vec<ActiveBlock>,
    pub(crate) condition_object: Option<Condition>,
    pub(crate) pending: Option<PendingTransfer>,
    pub(crate) streams: Vec<String>,
    pub(crate) environment: Option<Vec<(String, String)>>,
    pub(crate) forwarded: bool,
    pub(crate) terminated: bool,
}

impl fmt::Debug for Activation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Activation")
            .field("id", &self.id)
            .field("context", &self.context)
            .field("state", &self.state)
            .field("code", &self.code.name())
            .field("current", &self.current)
            .field("next", &self.next)
            .field("depth", &self.stack.len())
            .field("scope", &self.scope)
            .finish_non_exhaustive()
    }
}

impl Activation {
    pub(crate) fn new(
        context: ActivationContext,
        code: Arc<Code>,
        stack: EvaluationStack,
        variables: FrameRef,
        settings: ActivationSettings,
    ) -> Self {
        let name = code.name().to_string();
        Self {
            id: ActivationId::next(),
            context,
            state: ExecutionState::Active,
            next: if code.is_empty() { None } else { Some(0) },
            code,
            name,
            current: None,
            stack,
            variables,
            settings,
            traps: TrapTable::new(),
            conditions: ConditionQueue::default(),
            clause_boundary: false,
            parent: None,
            receiver: None,
            superclass: None,
            scope: ScopeState::Released,
            guarded: false,
            transfer_failed: false,
            debug_pause: false,
            instruction_count: 0,
            args: Vec::new(),
            result: None,
            replied: false,
            procedure_allowed: false,
            blocks: Vec::new(),
            condition_object: None,
            pending: None,
            streams: Vec::new(),
            environment: None,
            forwarded: false,
            terminated: false,
        }
    }

    #[inline]
    pub fn id(&self) -> ActivationId {
        self.id
    }

    #[inline]
    pub fn context(&self) -> ActivationContext {
        self.context
    }

    #[inline]
    pub fn state(&self) -> ExecutionState {
        self.state
    }

    #[inline]
    pub fn is_active(&self) -> bool {
        self.state == ExecutionState::Active
    }

    #[inline]
    pub fn code(&self) -> &Arc<Code> {
        &self.code
    }

    #[inline]
    pub fn scope(&self) -> ScopeState {
        self.scope
    }

    #[inline]
    pub fn settings(&self) -> &ActivationSettings {
        &self.settings
    }

    #[inline]
    pub fn traps(&self) -> &TrapTable {
        &self.traps
    }

    #[inline]
    pub fn variables(&self) -> &FrameRef {
        &self.variables
    }

    #[inline]
    pub fn stack(&self) -> &EvaluationStack {
        &self.stack
    }

    #[inline]
    pub fn args(&self) -> &[Value] {
        &self.args
    }

    #[inline]
    pub fn receiver(&self) -> Option<&ObjectRef> {
        self.receiver.as_ref()
    }

    #[inline]
    pub fn pending_conditions(&self) -> usize {
        self.conditions.len()
    }

    #[inline]
    pub fn transfer_failed(&self) -> bool {
        self.transfer_failed
    }

    /// Line of the clause being executed; 0 before the first clause.
    pub fn current_line(&self) -> usize {
        self.current.map_or(0, |index| self.code.line_of(index))
    }

    /// Moves out of ACTIVE. Only ACTIVE activations change state.
    pub(crate) fn finish(&mut self, state: ExecutionState, result: Option<Value>) {
        debug_assert!(self.is_active(), "{} finished twice", self.id);
        debug_assert_ne!(state, ExecutionState::Active);
        self.state = state;
        self.result = result;
    }

    /// The line shown in tracebacks.
    pub fn description(&self) -> String {
        match self.context {
            ActivationContext::Interpret | ActivationContext::DebugPause => {
                self.context.keyword().to_string()
            }
            _ => format!("{} {}", self.context.keyword(), self.name),
        }
    }
}

impl RootProvider for Activation {
    fn visit_roots(&self, visitor: &mut dyn FnMut(&Value)) {
        self.stack.for_each_value(visitor);
        self.variables.lock().for_each_value(visitor);
        self.args.iter().for_each(|v| visitor(v));
        if let Some(result) = &self.result {
            visitor(result);
        }
        if let Some(receiver) = &self.receiver {
            visitor(&Value::Object(receiver.clone()));
        }
        if let Some(condition) = &self.condition_object {
            condition.for_each_value(visitor);
        }
        self.conditions.for_each_value(visitor);
        match &self.pending {
            Some(PendingTransfer::Return(Some(v))) | Some(PendingTransfer::Reply(Some(v))) => {
                visitor(v)
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CallType, CodeBuilder, EngineSettings, VariableFrame, instructions::Nop};
    use heap::Marker;

    fn activation(context: ActivationContext) -> Activation {
        let mut b = CodeBuilder::new("sample");
        b.push(Nop).push(Nop);
        Activation::new(
            context,
            b.build_shared().unwrap(),
            EvaluationStack::default(),
            VariableFrame::default().into_ref(),
            ActivationSettings::new(&EngineSettings::default(), CallType::Command, 3),
        )
    }

    #[test]
    fn ids_are_unique() {
        let a = activation(ActivationContext::Program);
        let b = activation(ActivationContext::Program);
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn starts_active_at_first_clause() {
        let a = activation(ActivationContext::Routine);
        assert_eq!(a.state(), ExecutionState::Active);
        assert_eq!(a.next, Some(0));
        assert_eq!(a.current_line(), 0);
        assert_eq!(a.description(), "routine SAMPLE");
    }

    #[test]
    fn finish_records_result_once() {
        let mut a = activation(ActivationContext::Method);
        a.finish(ExecutionState::Returned, Some(Value::from("done")));
        assert_eq!(a.state(), ExecutionState::Returned);
        assert_eq!(a.result, Some(Value::from("done")));
    }

    #[test]
    fn roots_cover_stack_variables_and_receiver() {
        let receiver = object::RexxObject::new("Owner");
        let held = object::RexxObject::new("Held");
        let mut a = activation(ActivationContext::Method);
        a.receiver = Some(receiver.clone());
        a.stack.push(Value::from("operand"));
        a.variables.lock().set("X", Value::from(held.clone()));
        a.args.push(Value::from("arg"));

        let mut marker = Marker::new();
        marker.mark_roots(&a);
        assert!(marker.is_marked(receiver.id()));
        assert!(marker.is_marked(held.id()));
        assert_eq!(marker.stats().roots, 4);
    }

    #[test]
    fn interpret_levels_forward_control() {
        assert!(ActivationContext::Interpret.forwards_control());
        assert!(ActivationContext::DebugPause.forwards_control());
        assert!(!ActivationContext::InternalCall.forwards_control());
        assert!(ActivationContext::Method.is_top_level());
        assert!(!ActivationContext::InternalCall.is_top_level());
    }
}
