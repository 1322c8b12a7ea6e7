use std::sync::Arc;

use object::{ActivityId, Condition, ObjectRef, Value};

use crate::{
    Activation, ActivationContext, ActivationId, ActivationSettings, Activity, ActivityStats, Clause,
    ErrorCode, EvaluationStack, ExecResult, ExecutionState, Host, RexxError, Runtime,
    ScopeState, TraceFrame, TraceMode, TrapState, Unwind,
    activation::PendingTransfer,
};

/// How a frame is entered by [`Activity::run_frame`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Entry {
    /// A new call.
    Fresh,
    /// A replied activation continuing on its new activity.
    Resume,
}

/// The context instructions execute against: the activity plus the index
/// of the running frame in its frame stack.
pub struct ExecCx<'a> {
    pub(crate) activity: &'a mut Activity,
    pub(crate) index: usize,
}

impl<'a> ExecCx<'a> {
    pub(crate) fn new(activity: &'a mut Activity, index: usize) -> Self {
        Self { activity, index }
    }

    // ── Access ─────────────────────────────────────────────────────

    #[inline]
    pub fn activation(&self) -> &Activation {
        &self.activity.frames[self.index]
    }

    #[inline]
    pub fn activation_mut(&mut self) -> &mut Activation {
        &mut self.activity.frames[self.index]
    }

    #[inline]
    pub fn runtime(&self) -> &Runtime {
        self.activity.runtime()
    }

    pub fn host(&self) -> Arc<dyn Host> {
        self.runtime().host().clone()
    }

    #[inline]
    pub fn activity_id(&self) -> ActivityId {
        self.activity.id()
    }

    #[inline]
    pub fn activity_stats(&self) -> ActivityStats {
        self.activity.stats()
    }

    /// Number of activations on this activity's frame stack.
    #[inline]
    pub fn depth(&self) -> usize {
        self.activity.frames.len()
    }

    #[inline]
    pub fn state(&self) -> ExecutionState {
        self.activation().state
    }

    #[inline]
    pub fn context(&self) -> ActivationContext {
        self.activation().context
    }

    #[inline]
    pub fn current_line(&self) -> usize {
        self.activation().current_line()
    }

    #[inline]
    pub fn stack(&mut self) -> &mut EvaluationStack {
        &mut self.activation_mut().stack
    }

    #[inline]
    pub fn settings(&self) -> &ActivationSettings {
        &self.activation().settings
    }

    #[inline]
    pub fn settings_mut(&mut self) -> &mut ActivationSettings {
        &mut self.activation_mut().settings
    }

    #[inline]
    pub fn args(&self) -> &[Value] {
        &self.activation().args
    }

    pub fn receiver(&self) -> Option<ObjectRef> {
        self.activation().receiver.clone()
    }

    #[inline]
    pub fn scope_state(&self) -> ScopeState {
        self.activation().scope
    }

    #[inline]
    pub fn trap_state(&self, condition: &str) -> TrapState {
        self.activation().traps.state(&condition.to_ascii_uppercase())
    }

    /// The condition being handled at this level, if any.
    pub fn condition_object(&self) -> Option<&Condition> {
        self.activation().condition_object.as_ref()
    }

    // ── Variables ──────────────────────────────────────────────────

    pub fn lookup_variable(&self, name: &str) -> Option<Value> {
        self.activation().variables.lock().get(name)
    }

    /// Reads a variable. An unassigned variable evaluates to its own name,
    /// after raising NOVALUE when this activation's traps watch for it.
    pub fn get_variable(&mut self, name: &str) -> ExecResult<Value> {
        if let Some(value) = self.lookup_variable(name) {
            return Ok(value);
        }
        if self.activation().traps.wants_novalue() {
            self.signal_condition(Condition::new("NOVALUE").with_description(name))?;
        }
        Ok(Value::from(name))
    }

    pub fn set_variable(&mut self, name: &str, value: Value) {
        self.activation().variables.lock().set(name, value);
    }

    pub fn drop_variable(&mut self, name: &str) {
        self.activation().variables.lock().drop_variable(name);
    }

    /// Stores `value` in RESULT, or drops RESULT when there is none.
    pub fn set_result(&mut self, value: Option<Value>) {
        match value {
            Some(value) => self.set_variable("RESULT", value),
            None => self.drop_variable("RESULT"),
        }
    }

    // ── Output ─────────────────────────────────────────────────────

    pub fn say(&self, line: &str) {
        self.runtime().host().say(line);
    }

    fn trace_clause(&self, clause: &Clause) {
        let line = format!("{:>6} *-* {}", clause.line(), clause.instruction().keyword());
        self.runtime().host().trace_output(&line);
    }

    /// Traces an expression result when the trace setting asks for it.
    pub fn trace_result(&self, value: &Value) {
        if self.settings().trace.mode.traces_results() {
            let line = format!("       >>> \"{value}\"");
            self.runtime().host().trace_output(&line);
        }
    }

    // ── Dispatch ───────────────────────────────────────────────────

    /// Runs clauses until the activation leaves ACTIVE or the code ends.
    pub(crate) fn dispatch(&mut self) -> ExecResult {
        let code = Arc::clone(&self.activation().code);
        let threshold = self.runtime().settings().yield_threshold.max(1) as u64;
        loop {
            if !self.activation().is_active() {
                return Ok(());
            }
            let Some(index) = self.activation().next.filter(|&i| i < code.len()) else {
                return self.end_of_code();
            };
            let Some(clause) = code.clause(index) else {
                return self.end_of_code();
            };
            {
                let act = self.activation_mut();
                act.current = Some(index);
                act.next = Some(index + 1);
            }
            let mode = self.settings().trace.mode;
            if mode.traces_clauses() || (mode == TraceMode::Labels && clause.is_label()) {
                self.trace_clause(clause);
            }

            clause.instruction().execute(self)?;

            let act = self.activation_mut();
            act.stack.clear();
            act.settings.clear_timestamp();
            if !clause.is_label() {
                act.procedure_allowed = false;
            }
            act.instruction_count += 1;
            let count = act.instruction_count;
            let boundary = act.clause_boundary;
            let pause = act.settings.trace.interactive && !act.debug_pause;
            self.activity.stats.clauses += 1;

            if boundary || self.activity.interrupts.pending() {
                self.clause_boundary()?;
            }
            if pause && self.activation().is_active() {
                self.debug_pause()?;
            }
            if count % threshold == 0 {
                self.activity.relinquish();
            }
        }
    }

    /// Work done strictly between two clauses.
    pub(crate) fn clause_boundary(&mut self) -> ExecResult {
        self.activation_mut().clause_boundary = false;
        let interrupts = self.activity.interrupts.clone();
        interrupts.acknowledge();
        if let Some(description) = interrupts.take_halt() {
            log::debug!("halt delivered to {} at line {}", self.activation().id, self.current_line());
            self.signal_condition(Condition::new("HALT").with_description(description))?;
        }
        if let Some(on) = interrupts.take_trace() {
            let trace = &mut self.activation_mut().settings.trace;
            trace.mode = if on { TraceMode::Results } else { TraceMode::Off };
            trace.interactive = false;
        }
        if !self.activation().conditions.is_empty() {
            self.process_traps()?;
        }
        Ok(())
    }

    /// Falling off the end: nested INTERPRET and debug code simply returns,
    /// everything else behaves like EXIT.
    fn end_of_code(&mut self) -> ExecResult {
        if self.context().forwards_control() {
            self.activation_mut().finish(ExecutionState::Returned, None);
            return Ok(());
        }
        self.exit(None)
    }

    /// Continues after an unwind that targeted this activation.
    fn resume_after_unwind(&mut self) -> ExecResult {
        self.activation_mut().stack.clear();
        self.take_pending()?;
        if self.activation().is_active() && !self.activation().conditions.is_empty() {
            self.process_traps()?;
        }
        self.dispatch()
    }

    fn enter(&mut self, entry: Entry) -> ExecResult {
        match entry {
            Entry::Fresh => {
                if self.activation().guarded {
                    self.reserve_scope();
                }
            }
            Entry::Resume => {
                self.activation_mut().state = ExecutionState::Active;
                if self.activation().transfer_failed {
                    log::debug!("{} re-reserving guard after failed transfer", self.activation().id);
                    self.reserve_scope();
                }
            }
        }
        Ok(())
    }

    // ── Control transfer ───────────────────────────────────────────

    /// Redirects the next clause.
    #[inline]
    pub fn jump(&mut self, target: usize) {
        self.activation_mut().next = Some(target);
    }

    /// The frame that performs SIGNAL, RETURN and REPLY on behalf of this
    /// one: the nearest level that is not INTERPRET or a debug pause.
    pub(crate) fn control_owner(&self) -> usize {
        self.control_owner_of(self.index)
    }

    pub(crate) fn control_owner_of(&self, mut index: usize) -> usize {
        while index > 0 && self.activity.frames[index].context.forwards_control() {
            index -= 1;
        }
        index
    }

    pub(crate) fn find_frame(&self, id: ActivationId) -> Option<usize> {
        self.activity.frames[..=self.index].iter().rposition(|f| f.id == id)
    }

    fn forward_to_owner(&mut self, transfer: PendingTransfer) -> ExecResult {
        let owner = self.control_owner();
        let frame = &mut self.activity.frames[owner];
        frame.pending = Some(transfer);
        Err(Unwind::To(frame.id))
    }

    /// SIGNAL label: a jump that abandons every active DO block. SIGL is the
    /// line of the owning level, so a SIGNAL in interpreted code reports the
    /// INTERPRET clause.
    pub fn signal_to(&mut self, label: &str) -> ExecResult {
        let owner = self.control_owner();
        let line = self.activity.frames[owner].current_line();
        let Some(target) = self.activity.frames[owner].code.label(label) else {
            return Err(self.raise_error(ErrorCode::LabelNotFound, label.to_ascii_uppercase()));
        };
        if owner == self.index {
            self.transfer_to(target, line);
            return Ok(());
        }
        self.forward_to_owner(PendingTransfer::Signal { target, line })
    }

    fn transfer_to(&mut self, target: usize, line: usize) {
        self.set_variable("SIGL", Value::whole(line as i64));
        let act = self.activation_mut();
        act.blocks.clear();
        act.next = Some(target);
    }

    pub fn return_from(&mut self, value: Option<Value>) -> ExecResult {
        if self.context().forwards_control() {
            return self.forward_to_owner(PendingTransfer::Return(value));
        }
        if self.activation().replied {
            if value.is_some() {
                return Err(self.raise_error(
                    ErrorCode::Execution,
                    "RETURN with a value is not allowed after REPLY",
                ));
            }
            self.activation_mut().finish(ExecutionState::Returned, None);
            return Ok(());
        }
        self.activation_mut().finish(ExecutionState::Returned, value);
        Ok(())
    }

    /// Ends the whole call: every internal level up to the enclosing
    /// program, method or routine.
    pub fn exit(&mut self, value: Option<Value>) -> ExecResult {
        let mut top = self.index;
        while top > 0 && !self.activity.frames[top].context.is_top_level() {
            top -= 1;
        }
        if self.activity.frames[top].replied && value.is_some() {
            return Err(self.raise_error(
                ErrorCode::Execution,
                "EXIT with a value is not allowed after REPLY",
            ));
        }
        let frame = &mut self.activity.frames[top];
        let result = if frame.replied { None } else { value };
        frame.finish(ExecutionState::Returned, result);
        if top == self.index {
            Ok(())
        } else {
            Err(Unwind::To(frame.id))
        }
    }

    /// Returns `value` to the caller while this activation keeps running.
    pub fn reply(&mut self, value: Option<Value>) -> ExecResult {
        match self.context() {
            context if context.forwards_control() => {
                return self.forward_to_owner(PendingTransfer::Reply(value));
            }
            ActivationContext::InternalCall => {
                return Err(self.raise_error(
                    ErrorCode::Execution,
                    "REPLY is not valid in an internal routine",
                ));
            }
            _ => {}
        }
        if self.activation().replied {
            return Err(self.raise_error(ErrorCode::Execution, "REPLY has already been issued"));
        }
        let act = self.activation_mut();
        act.replied = true;
        act.finish(ExecutionState::Replied, value);
        Ok(())
    }

    fn take_pending(&mut self) -> ExecResult {
        match self.activation_mut().pending.take() {
            None => Ok(()),
            Some(PendingTransfer::Signal { target, line }) => {
                self.transfer_to(target, line);
                Ok(())
            }
            Some(PendingTransfer::Return(value)) => self.return_from(value),
            Some(PendingTransfer::Reply(value)) => self.reply(value),
        }
    }

    // ── Errors ─────────────────────────────────────────────────────

    /// Builds a runtime error at the current clause and offers it as a
    /// SYNTAX condition. The returned unwind either targets the trapping
    /// activation or carries the error itself.
    pub fn raise_error(&mut self, code: ErrorCode, detail: impl Into<String>) -> Unwind {
        let error = RexxError::new(code, detail).with_traceback(self.traceback());
        log::debug!("error {} raised at line {}: {}", code.number(), self.current_line(), error.detail);
        match self.offer_condition(error.to_condition()) {
            Err(unwind) => unwind,
            Ok(_) => Unwind::error(error),
        }
    }

    /// Line and description of every frame from this one down.
    pub fn traceback(&self) -> Vec<TraceFrame> {
        self.activity.frames[..=self.index]
            .iter()
            .rev()
            .map(|frame| TraceFrame {
                line: frame.current_line(),
                description: frame.description(),
            })
            .collect()
    }
}

// ── Frame lifecycle ───────────────────────────────────────────────────

impl Activity {
    /// Pushes `activation`, runs it to completion and pops it again.
    ///
    /// Every frame is terminated exactly once, here, whether it finishes
    /// normally or an unwind passes through it. A replied frame is not
    /// terminated; it moves to a new activity instead.
    pub(crate) fn run_frame(
        &mut self,
        activation: Activation,
        entry: Entry,
    ) -> ExecResult<Option<Value>> {
        self.frames.push(activation);
        let index = self.frames.len() - 1;
        let outcome = self.drive(index, entry);
        debug_assert_eq!(self.frames.len(), index + 1);
        let Some(mut activation) = self.frames.pop() else {
            return Err(Unwind::error(RexxError::new(
                ErrorCode::Execution,
                "activation stack underflow",
            )));
        };
        match outcome {
            Ok(()) if activation.state == ExecutionState::Replied => {
                let result = activation.result.clone();
                self.spawn_reply(activation);
                Ok(result)
            }
            Ok(()) => {
                self.terminate(&mut activation);
                Ok(activation.result.take())
            }
            Err(unwind) => {
                self.terminate(&mut activation);
                Err(unwind)
            }
        }
    }

    fn drive(&mut self, index: usize, entry: Entry) -> ExecResult {
        let id = self.frames[index].id;
        let mut outcome = {
            let mut cx = ExecCx::new(self, index);
            match cx.enter(entry) {
                Ok(()) => cx.dispatch(),
                Err(unwind) => Err(unwind),
            }
        };
        loop {
            match outcome {
                Err(Unwind::To(target)) if target == id => {
                    self.acquire_lock();
                    outcome = ExecCx::new(self, index).resume_after_unwind();
                }
                other => return other,
            }
        }
    }

    /// Per-frame cleanup, run once as the frame is popped.
    pub(crate) fn terminate(&mut self, act: &mut Activation) {
        debug_assert!(!act.terminated, "{} terminated twice", act.id);
        act.terminated = true;

        if act.scope == ScopeState::Reserved {
            if let Some(receiver) = &act.receiver {
                receiver.scope().guard().release(self.id());
            }
            act.scope = ScopeState::Released;
        }
        let host = self.runtime().host().clone();
        for stream in act.streams.drain(..) {
            host.close_stream(&stream);
        }
        if let Some(snapshot) = act.environment.take() {
            host.restore_environment(snapshot);
        }

        if !act.context.is_top_level() {
            let parent = self
                .frames
                .last_mut()
                .filter(|parent| Some(parent.id) == act.parent);
            if let Some(parent) = parent {
                if act.context.forwards_control() {
                    parent.settings.merge_from(&act.settings);
                }
                if act.context == ActivationContext::Interpret {
                    parent.traps = act.traps.clone();
                }
                if !act.conditions.is_empty() {
                    parent.conditions.append(&mut act.conditions);
                    parent.clause_boundary = true;
                }
            }
        }

        act.blocks.clear();
        self.release_storage(act);
        self.stats.terminations += 1;
        log::trace!("{} terminated: {}", act.id, act.description());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        BufferHost, CodeBuilder, Expr, RuntimeCreateInfo,
        instructions::{Exit, Return, Say},
    };

    fn runtime(host: Arc<BufferHost>) -> Runtime {
        Runtime::new(RuntimeCreateInfo::new(host)).unwrap()
    }

    #[test]
    fn end_of_code_is_an_implicit_exit() {
        let host = Arc::new(BufferHost::new());
        let mut b = CodeBuilder::new("main");
        b.say(Expr::lit("one")).say(Expr::lit("two"));
        let result = runtime(host.clone()).run_program(b.build_shared().unwrap(), vec![]);
        assert_eq!(result, Ok(None));
        assert_eq!(host.output(), ["one", "two"]);
    }

    #[test]
    fn nothing_runs_after_return() {
        let host = Arc::new(BufferHost::new());
        let mut b = CodeBuilder::new("main");
        b.push(Return::new(Some(Expr::lit("r"))))
            .push(Say::new(Expr::lit("unreachable")));
        let result = runtime(host.clone()).run_program(b.build_shared().unwrap(), vec![]);
        assert_eq!(result, Ok(Some(Value::from("r"))));
        assert!(host.output().is_empty());
    }

    #[test]
    fn exit_from_internal_call_ends_program() {
        let host = Arc::new(BufferHost::new());
        let mut b = CodeBuilder::new("main");
        b.push(crate::instructions::Call::new("SUB", vec![]))
            .say(Expr::lit("after call"))
            .push(Exit::new(None))
            .label("SUB")
            .say(Expr::lit("in sub"))
            .push(Exit::new(Some(Expr::lit("7"))));
        let rt = runtime(host.clone());
        let result = rt.run_program(b.build_shared().unwrap(), vec![]);
        assert_eq!(result, Ok(Some(Value::from("7"))));
        assert_eq!(host.output(), ["in sub"]);
        assert_eq!(rt.stats().terminations, 2);
    }

    #[test]
    fn clause_trace_echoes_keywords() {
        let host = Arc::new(BufferHost::new());
        let mut b = CodeBuilder::new("main");
        b.push(crate::instructions::Trace::new(Expr::lit("A")))
            .say(Expr::lit("x"));
        runtime(host.clone()).run_program(b.build_shared().unwrap(), vec![]).unwrap();
        assert_eq!(host.trace(), ["     2 *-* SAY"]);
    }
}
