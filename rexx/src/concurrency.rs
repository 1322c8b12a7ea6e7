use std::sync::Arc;

use object::{Condition, GuardLock, GuardWaiter};

use crate::{
    Activation, ActivationContext, Activity, ErrorCode, ExecCx, ExecResult, Expr, ScopeState,
    interpreter::Entry, runtime::escalate,
};

impl Activity {
    /// Reserves `guard` for this activity. While blocked on another
    /// activity's reservation the execution lock is given up, so the owner
    /// can run and release it.
    pub(crate) fn reserve_guard(&mut self, guard: &GuardLock) {
        if guard.try_reserve(self.id()) {
            return;
        }
        log::trace!("{} waiting for guard held by {:?}", self.id(), guard.owner());
        self.release_lock();
        guard.reserve(self.id());
        self.acquire_lock();
    }

    /// Moves a replied activation to a new activity and starts it there.
    ///
    /// The evaluation stack and the local variables are copied into storage
    /// owned by the new activity. The guard reservation follows when it can
    /// be handed over; otherwise it is released here and taken again by the
    /// new activity when it starts.
    pub(crate) fn spawn_reply(&mut self, mut act: Activation) {
        let runtime = self.runtime().clone();
        let mut successor = runtime.create_activity();

        let mut stack = successor.allocate_stack();
        act.stack.migrate_into(&mut stack);
        let old_stack = std::mem::replace(&mut act.stack, stack);
        self.release_stack(old_stack);

        let mut frame = successor.allocate_frame();
        act.variables.lock().migrate_into(&mut frame);
        let old_frame = std::mem::replace(&mut act.variables, frame.into_ref());
        self.release_frame(old_frame);

        act.parent = None;
        if act.scope == ScopeState::Reserved {
            if let Some(receiver) = &act.receiver {
                let guard = receiver.scope().guard();
                if !guard.transfer(self.id(), successor.id()) {
                    log::debug!(
                        "{} could not hand its guard to {}; releasing nest level",
                        self.id(),
                        successor.id()
                    );
                    guard.release(self.id());
                    act.scope = ScopeState::Released;
                    act.transfer_failed = true;
                }
            }
        }
        self.stats.replies += 1;
        log::debug!("{} replied; continuing on {}", act.id, successor.id());
        runtime.spawn_reply_thread(successor, act);
    }

    /// Body of a reply thread: finishes the migrated activation.
    pub(crate) fn resume(mut self, act: Activation) {
        self.acquire_lock();
        let outcome = escalate(self.run_frame(act, Entry::Resume));
        self.release_lock();
        let runtime = self.runtime().clone();
        if let Err(error) = outcome {
            log::error!("{} ended with an error after REPLY: {error}", self.id());
            runtime.record_reply_error(error);
        }
        runtime.retire(&self);
    }
}

impl ExecCx<'_> {
    /// Takes the receiver's guard for this activation.
    pub(crate) fn reserve_scope(&mut self) {
        self.reserve_scope_at(self.index);
    }

    fn reserve_scope_at(&mut self, index: usize) {
        let frame = &self.activity.frames[index];
        if frame.scope == ScopeState::Reserved {
            return;
        }
        let Some(receiver) = frame.receiver.clone() else {
            return;
        };
        self.activity.reserve_guard(receiver.scope().guard());
        self.activity.frames[index].scope = ScopeState::Reserved;
    }

    fn release_scope_at(&mut self, index: usize) {
        let id = self.activity.id();
        let frame = &mut self.activity.frames[index];
        if frame.scope == ScopeState::Released {
            return;
        }
        if let Some(receiver) = &frame.receiver {
            receiver.scope().guard().release(id);
        }
        frame.scope = ScopeState::Released;
    }

    /// GUARD ON|OFF [WHEN expr]
    ///
    /// With WHEN, the expression is re-evaluated every time an object
    /// variable of the receiver changes, until it is true. The guard is not
    /// held while waiting.
    pub fn guard(&mut self, on: bool, when: Option<&Expr>) -> ExecResult {
        let owner = self.control_owner();
        let frame = &self.activity.frames[owner];
        let receiver = frame
            .receiver
            .clone()
            .filter(|_| frame.context == ActivationContext::Method);
        let Some(receiver) = receiver else {
            return Err(self.raise_error(
                ErrorCode::IncorrectCall,
                "GUARD can only be issued in a method",
            ));
        };
        let guard = Arc::clone(receiver.scope().guard());
        loop {
            if on {
                self.reserve_scope_at(owner);
            } else {
                self.release_scope_at(owner);
            }
            let Some(when) = when else {
                return Ok(());
            };
            let seen = guard.version();
            if when.evaluate_logical(self)? {
                return Ok(());
            }
            self.activation_mut().stack.clear();
            self.guard_wait(&guard, owner, seen)?;
        }
    }

    /// Blocks until an object variable guarded by `guard` changes after
    /// `seen`, or a halt request arrives.
    fn guard_wait(&mut self, guard: &Arc<GuardLock>, owner: usize, seen: u64) -> ExecResult {
        let waiter: Arc<dyn GuardWaiter> = self.activity.parker.clone();
        guard.add_waiter(Arc::clone(&waiter));
        let interrupts = Arc::clone(&self.activity.interrupts);
        if guard.version() == seen && !interrupts.halt_pending() {
            let reserved = self.activity.frames[owner].scope == ScopeState::Reserved;
            let id = self.activity.id();
            if reserved {
                guard.release(id);
            }
            self.activity.release_lock();
            log::trace!("{id} waiting on guard expression at line {}", self.current_line());
            self.activity.parker.park();
            guard.remove_waiter(&waiter);
            if reserved {
                guard.reserve(id);
            }
            self.activity.acquire_lock();
        } else {
            guard.remove_waiter(&waiter);
        }

        if let Some(description) = interrupts.take_halt() {
            self.signal_condition(Condition::new("HALT").with_description(description))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use object::Value;

    use crate::{
        BufferHost, Class, CodeBuilder, ErrorCode, Expr, Method, Runtime, RuntimeCreateInfo,
        instructions::{Expose, Guard, Reply, Return},
    };

    fn runtime(host: Arc<BufferHost>) -> Runtime {
        Runtime::new(RuntimeCreateInfo::new(host)).unwrap()
    }

    #[test]
    fn guard_outside_method_is_rejected() {
        let host = Arc::new(BufferHost::new());
        let mut b = CodeBuilder::new("main");
        b.push(Guard::on());
        let err = runtime(host).run_program(b.build_shared().unwrap(), vec![]).unwrap_err();
        assert_eq!(err.code, ErrorCode::IncorrectCall);
    }

    #[test]
    fn reply_returns_early_and_finishes_on_new_activity() {
        let host = Arc::new(BufferHost::new());
        let rt = runtime(host.clone());
        let mut m = CodeBuilder::new("work");
        m.push(Expose::new(&["state"]))
            .push(Reply::new(Some(Expr::lit("early"))))
            .assign("state", Expr::lit("finished"))
            .say(Expr::lit("after reply"))
            .push(Return::new(None));
        rt.define_class(Class::new("Worker").with_method(Method::new("WORK", m.build_shared().unwrap())));

        let worker = rt.new_object("Worker", vec![]).unwrap();
        let result = rt.send(&worker, "work", vec![]).unwrap();
        assert_eq!(result, Some(Value::from("early")));
        assert!(rt.wait_for_replies(Duration::from_secs(5)));
        assert_eq!(worker.scope().get("STATE"), Some(Value::from("finished")));
        assert_eq!(host.output(), ["after reply"]);
        assert_eq!(rt.stats().replies, 1);
        assert!(rt.reply_errors().is_empty());
        assert_eq!(worker.scope().guard().owner(), None);
    }

    #[test]
    fn guard_off_lets_other_activities_in() {
        let host = Arc::new(BufferHost::new());
        let rt = runtime(host.clone());
        let mut m = CodeBuilder::new("wait");
        m.push(Expose::new(&["ready"]))
            .push(Reply::new(None))
            .push(Guard::off().when(Expr::binary(
                crate::BinaryOp::Eq,
                Expr::var("ready"),
                Expr::lit("1"),
            )))
            .say(Expr::lit("released"));
        let mut set = CodeBuilder::new("set");
        set.push(Expose::new(&["ready"])).assign("ready", Expr::lit("1"));
        rt.define_class(
            Class::new("Latch")
                .with_method(Method::new("WAIT", m.build_shared().unwrap()))
                .with_method(Method::new("SET", set.build_shared().unwrap())),
        );

        let latch = rt.new_object("Latch", vec![]).unwrap();
        latch.scope().set("READY", Value::from("0"));
        assert_eq!(rt.send(&latch, "wait", vec![]).unwrap(), None);
        rt.send(&latch, "set", vec![]).unwrap();
        assert!(rt.wait_for_replies(Duration::from_secs(5)));
        assert_eq!(host.output(), ["released"]);
    }
}
