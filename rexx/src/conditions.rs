use object::{Condition, TrapInstruction, Value};

use crate::{
    ActivationContext, CallType, ErrorCode, ExecCx, ExecResult, PendingTrap, TrapHandler,
    TrapState, Unwind, activation::PendingTransfer, traps::is_signal_only,
};

impl ExecCx<'_> {
    // ── Trap table ─────────────────────────────────────────────────

    /// SIGNAL ON / CALL ON. The handler belongs to the level that owns
    /// control transfers for this one.
    pub fn trap_on(&mut self, condition: &str, kind: TrapInstruction, label: &str) -> ExecResult {
        let condition = condition.to_ascii_uppercase();
        if kind == TrapInstruction::Call && is_signal_only(&condition) {
            return Err(self.raise_error(
                ErrorCode::InvalidTrap,
                format!("CALL ON {condition} is not allowed"),
            ));
        }
        let owner = self.activity.frames[self.control_owner()].id;
        let act = self.activation_mut();
        act.traps.insert(TrapHandler::new(&condition, kind, label, owner));
        Ok(())
    }

    pub fn trap_off(&mut self, condition: &str) {
        self.activation_mut().traps.remove(&condition.to_ascii_uppercase());
    }

    /// Puts a CALL ON handler that finished running back to ON.
    pub fn trap_undelay(&mut self, condition: &str) {
        let traps = &mut self.activation_mut().traps;
        if traps.state(condition) == TrapState::Delay {
            traps.set_state(condition, TrapState::On);
        }
    }

    // ── Raising ────────────────────────────────────────────────────

    /// Raises a (non-SYNTAX) condition. Returns whether a handler took it;
    /// an untrapped HALT or NOMETHOD becomes a runtime error.
    pub fn signal_condition(&mut self, condition: Condition) -> ExecResult<bool> {
        if self.offer_condition(condition.clone())? {
            return Ok(true);
        }
        match condition.name.as_str() {
            "HALT" => Err(self.raise_error(ErrorCode::ProgramInterrupted, condition.description)),
            "NOMETHOD" => {
                let detail = if condition.description.is_empty() {
                    "method not found".to_string()
                } else {
                    condition.description
                };
                Err(self.raise_error(ErrorCode::NoMethod, detail))
            }
            _ => Ok(false),
        }
    }

    /// Offers `condition` to the raising activation and, while the frames
    /// below are forwarded, to them as well.
    pub(crate) fn offer_condition(&mut self, condition: Condition) -> ExecResult<bool> {
        let mut index = self.index;
        loop {
            if self.trap_at(index, &condition)? {
                return Ok(true);
            }
            if index == 0 || !self.activity.frames[index - 1].forwarded {
                return Ok(false);
            }
            index -= 1;
        }
    }

    fn trap_at(&mut self, index: usize, condition: &Condition) -> ExecResult<bool> {
        let frame = &self.activity.frames[index];
        if frame.context == ActivationContext::DebugPause {
            return Ok(false);
        }
        let Some(handler) = frame.traps.lookup(&condition.name).cloned() else {
            return Ok(false);
        };
        match handler.kind {
            TrapInstruction::Signal => self.trap_signal(index, handler, condition),
            TrapInstruction::Call => {
                let owner = self.control_owner_of(index);
                let mut condition = condition.clone();
                condition.instruction = Some(TrapInstruction::Call);
                log::trace!("CALL ON {} queued for {}", handler.condition, handler.label);
                let frame = &mut self.activity.frames[owner];
                frame.conditions.push(PendingTrap { handler, condition });
                frame.clause_boundary = true;
                Ok(true)
            }
        }
    }

    /// A SIGNAL ON handler fires: it turns itself off and unwinds to the
    /// activation that installed it.
    fn trap_signal(
        &mut self,
        index: usize,
        handler: TrapHandler,
        condition: &Condition,
    ) -> ExecResult<bool> {
        let owner = self
            .find_frame(handler.owner)
            .filter(|&owner| owner <= index)
            .unwrap_or_else(|| self.control_owner_of(index));
        for frame in &mut self.activity.frames[owner..=index] {
            let installed = frame.traps.get(&handler.condition).map(|h| h.owner);
            if installed == Some(handler.owner) {
                frame.traps.remove(&handler.condition);
            }
        }
        let line = self.activity.frames[self.control_owner_of(index)].current_line();
        let Some(target) = self.activity.frames[owner].code.label(&handler.label) else {
            return Err(self.raise_error(ErrorCode::LabelNotFound, handler.label.clone()));
        };
        let mut condition = condition.clone();
        condition.instruction = Some(TrapInstruction::Signal);
        log::trace!("SIGNAL ON {} fired at line {line}", condition.name);

        let frame = &mut self.activity.frames[owner];
        if let Some(rc) = &condition.rc {
            frame.variables.lock().set("RC", rc.clone());
        }
        frame.condition_object = Some(condition);
        frame.pending = Some(PendingTransfer::Signal { target, line });
        Err(Unwind::To(frame.id))
    }

    // ── Clause-boundary dispatch ───────────────────────────────────

    /// Runs the queued CALL ON handlers in order. Entries whose trap is in
    /// DELAY go back to the end of the queue.
    pub(crate) fn process_traps(&mut self) -> ExecResult {
        let queued = self.activation().conditions.len();
        for _ in 0..queued {
            let Some(trap) = self.activation_mut().conditions.pop() else {
                break;
            };
            let name = trap.handler.condition.clone();
            if self.activation().traps.state(&name) == TrapState::Delay {
                self.activation_mut().conditions.push(trap);
                continue;
            }
            let Some(target) = self.activation().code.label(&trap.handler.label) else {
                return Err(self.raise_error(ErrorCode::LabelNotFound, trap.handler.label));
            };
            self.activation_mut().traps.set_state(&name, TrapState::Delay);
            if let Some(rc) = &trap.condition.rc {
                self.set_variable("RC", rc.clone());
            }
            log::trace!("dispatching CALL ON {name} to {}", trap.handler.label);
            let outcome =
                self.call_internal(target, Vec::new(), CallType::Subroutine, Some(trap.condition));
            self.trap_undelay(&name);
            outcome?;
        }
        Ok(())
    }

    // ── Invocation boundaries ──────────────────────────────────────

    /// RAISE PROPAGATE: sends the condition being handled on to the caller
    /// of the enclosing method, routine or program.
    pub(crate) fn propagate(&mut self) -> ExecResult {
        let handled = self.activity.frames[..=self.index]
            .iter()
            .rev()
            .find_map(|f| f.condition_object.clone());
        match handled {
            Some(condition) => Err(Unwind::Propagate(Box::new(condition.propagated()))),
            None => Err(self.raise_error(
                ErrorCode::Execution,
                "RAISE PROPAGATE used outside a condition handler",
            )),
        }
    }

    /// Applied by the caller when a method or routine call comes back. An
    /// untrapped error in the callee is offered to the caller as SYNTAX; a
    /// propagated condition is offered as itself.
    pub(crate) fn at_boundary(
        &mut self,
        outcome: ExecResult<Option<Value>>,
    ) -> ExecResult<Option<Value>> {
        match outcome {
            Err(Unwind::Error(error)) => {
                self.offer_condition(error.to_condition().propagated())?;
                Err(Unwind::Error(error))
            }
            Err(Unwind::Propagate(condition)) => {
                if self.offer_condition((*condition).clone())? {
                    Ok(None)
                } else {
                    Err(Unwind::Propagate(condition))
                }
            }
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::{
        BufferHost, CodeBuilder, ErrorCode, Expr, Runtime, RuntimeCreateInfo,
        instructions::{Call, Exit, Raise, Return, Signal, TrapOff, TrapOn},
    };

    type Outcome = Result<Option<object::Value>, crate::RexxError>;

    fn run(build: impl FnOnce(&mut CodeBuilder)) -> (Arc<BufferHost>, Outcome) {
        let host = Arc::new(BufferHost::new());
        let runtime = Runtime::new(RuntimeCreateInfo::new(host.clone())).unwrap();
        let mut b = CodeBuilder::new("traps");
        build(&mut b);
        let result = runtime.run_program(b.build_shared().unwrap(), vec![]);
        (host, result)
    }

    #[test]
    fn signal_on_novalue_jumps_and_turns_off() {
        let (host, result) = run(|b| {
            b.push(TrapOn::signal("NOVALUE"))
                .say(Expr::var("missing"))
                .say(Expr::lit("skipped"))
                .label("NOVALUE")
                .say(Expr::call("CONDITION", vec![Expr::lit("D")]))
                .say(Expr::var("another"))
                .push(Exit::new(None));
        });
        assert_eq!(result, Ok(None));
        assert_eq!(host.output(), ["MISSING", "ANOTHER"]);
    }

    #[test]
    fn call_on_runs_at_clause_boundary() {
        let (host, result) = run(|b| {
            b.push(TrapOn::call("USER"))
                .push(Raise::condition("USER"))
                .say(Expr::lit("after raise"))
                .push(Exit::new(None))
                .label("USER")
                .say(Expr::call("CONDITION", vec![Expr::lit("I")]))
                .push(Return::new(None));
        });
        assert_eq!(result, Ok(None));
        assert_eq!(host.output(), ["CALL", "after raise"]);
    }

    #[test]
    fn call_on_syntax_is_rejected() {
        let (_, result) = run(|b| {
            b.push(TrapOn::call("SYNTAX"));
        });
        assert_eq!(result.unwrap_err().code, ErrorCode::InvalidTrap);
    }

    #[test]
    fn untrapped_halt_is_an_error() {
        let (_, result) = run(|b| {
            b.push(Raise::condition("HALT"));
        });
        assert_eq!(result.unwrap_err().code, ErrorCode::ProgramInterrupted);
    }

    #[test]
    fn untrapped_user_condition_is_ignored() {
        let (host, result) = run(|b| {
            b.push(Raise::condition("USER")).say(Expr::lit("still here"));
        });
        assert_eq!(result, Ok(None));
        assert_eq!(host.output(), ["still here"]);
    }

    #[test]
    fn raise_exit_applies_only_when_unhandled() {
        let (host, result) = run(|b| {
            b.push(Raise::condition("USER").exiting(Some(Expr::lit("bye"))))
                .say(Expr::lit("unreachable"));
        });
        assert_eq!(result, Ok(Some(object::Value::from("bye"))));
        assert!(host.output().is_empty());
    }

    #[test]
    fn syntax_trap_catches_runtime_errors() {
        let (host, result) = run(|b| {
            b.push(TrapOn::signal("SYNTAX"))
                .push(Signal::new("nowhere"))
                .label("SYNTAX")
                .say(Expr::var("RC"))
                .say(Expr::call("CONDITION", vec![Expr::lit("C")]));
        });
        assert_eq!(result, Ok(None));
        assert_eq!(host.output(), ["16", "SYNTAX"]);
    }

    #[test]
    fn trap_off_removes_handler() {
        let (host, result) = run(|b| {
            b.push(TrapOn::signal("NOVALUE"))
                .push(TrapOff::signal("NOVALUE"))
                .say(Expr::var("plain"));
        });
        assert_eq!(result, Ok(None));
        assert_eq!(host.output(), ["PLAIN"]);
    }

    #[test]
    fn callee_signal_off_novalue_leaves_caller_trap_on() {
        let (host, result) = run(|b| {
            b.push(TrapOn::signal("NOVALUE"))
                .push(Call::new("SUB", vec![]))
                .say(Expr::var("missing"))
                .push(Exit::new(None))
                .label("NOVALUE")
                .say(Expr::lit("trapped"))
                .push(Exit::new(None))
                .label("SUB")
                .push(TrapOff::signal("NOVALUE"))
                .say(Expr::var("quiet"))
                .push(Return::new(None));
        });
        assert_eq!(result, Ok(None));
        assert_eq!(host.output(), ["QUIET", "trapped"]);
    }

    #[test]
    fn callee_signal_on_novalue_does_not_reach_caller() {
        let (host, result) = run(|b| {
            b.push(Call::new("SUB", vec![]))
                .say(Expr::var("missing"))
                .push(Exit::new(None))
                .label("SUB")
                .push(TrapOn::signal("NOVALUE"))
                .push(Return::new(None))
                .label("NOVALUE")
                .say(Expr::lit("trapped"));
        });
        assert_eq!(result, Ok(None));
        assert_eq!(host.output(), ["MISSING"]);
    }

    #[test]
    fn signal_handler_inherited_by_internal_call_unwinds_to_installer() {
        let (host, result) = run(|b| {
            b.push(TrapOn::signal("USER"))
                .push(Call::new("SUB", vec![]))
                .say(Expr::lit("not reached"))
                .label("USER")
                .say(Expr::var("SIGL"))
                .push(Exit::new(None))
                .label("SUB")
                .push(Raise::condition("USER"))
                .say(Expr::lit("not reached either"));
        });
        assert_eq!(result, Ok(None));
        assert_eq!(host.output(), ["8"]);
    }
}
