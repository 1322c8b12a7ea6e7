use std::sync::Arc;

use object::{Condition, ObjectRef, RexxObject, Value};

use crate::{
    Activation, ActivationContext, ActivationId, ActivationSettings, Activity, CallType, Code,
    ErrorCode, ExecCx, ExecResult, Method, Routine, TraceMode, Unwind, builtins,
    interpreter::Entry,
};

/// Everything needed to start a program, routine or method activation.
pub(crate) struct Invocation {
    pub context: ActivationContext,
    pub code: Arc<Code>,
    pub name: String,
    pub args: Vec<Value>,
    pub receiver: Option<ObjectRef>,
    pub method: Option<Arc<Method>>,
    pub call_type: CallType,
    pub parent: Option<ActivationId>,
}

impl Invocation {
    pub fn program(code: Arc<Code>, args: Vec<Value>) -> Self {
        Self {
            context: ActivationContext::Program,
            name: code.name().to_string(),
            code,
            args,
            receiver: None,
            method: None,
            call_type: CallType::Command,
            parent: None,
        }
    }

    pub fn routine(routine: &Routine, args: Vec<Value>, call_type: CallType) -> Self {
        Self {
            context: ActivationContext::Routine,
            code: routine.code().clone(),
            name: routine.name().to_string(),
            args,
            receiver: None,
            method: None,
            call_type,
            parent: None,
        }
    }

    pub fn method(receiver: ObjectRef, method: Arc<Method>, args: Vec<Value>) -> Self {
        Self {
            context: ActivationContext::Method,
            code: method.code().clone(),
            name: method.name().to_string(),
            args,
            receiver: Some(receiver),
            method: Some(method),
            call_type: CallType::Method,
            parent: None,
        }
    }

    fn called_from(mut self, parent: ActivationId) -> Self {
        self.parent = Some(parent);
        self
    }
}

impl Activity {
    /// Builds a top-level activation with fresh settings and storage and
    /// runs it on this activity.
    pub(crate) fn invoke(&mut self, invocation: Invocation) -> ExecResult<Option<Value>> {
        let runtime = self.runtime().clone();
        let mut settings =
            ActivationSettings::new(runtime.settings(), invocation.call_type, runtime.next_seed());
        settings.security = runtime.security().cloned();
        let stack = self.allocate_stack();
        let variables = self.allocate_frame().into_ref();

        let mut act = Activation::new(invocation.context, invocation.code, stack, variables, settings);
        act.name = invocation.name;
        act.args = invocation.args;
        act.parent = invocation.parent;
        if let (Some(method), Some(receiver)) = (&invocation.method, &invocation.receiver) {
            act.superclass = runtime
                .class(receiver.class_name())
                .and_then(|class| class.superclass().map(|s| s.name().to_string()));
            {
                let mut frame = act.variables.lock();
                frame.set("SELF", Value::Object(receiver.clone()));
                if let Some(superclass) = &act.superclass {
                    frame.set("SUPER", Value::from(superclass.as_str()));
                }
                if method.is_auto_expose() {
                    frame.set_auto_expose(Some(receiver.clone()));
                }
            }
            act.guarded = method.is_guarded();
            act.procedure_allowed = true;
        }
        act.receiver = invocation.receiver;
        log::trace!("{} invoking {}", self.id(), act.description());
        self.run_frame(act, Entry::Fresh)
    }
}

impl ExecCx<'_> {
    fn check_depth(&mut self) -> ExecResult {
        let limit = self.runtime().settings().max_call_depth;
        if self.depth() >= limit {
            return Err(self.raise_error(
                ErrorCode::ControlStackFull,
                format!("more than {limit} nested activations"),
            ));
        }
        Ok(())
    }

    // ── CALL and function invocation ───────────────────────────────

    /// Resolves `name` as an internal label, a built-in function or an
    /// external routine, in that order, and calls it.
    pub fn call(
        &mut self,
        name: &str,
        args: Vec<Value>,
        call_type: CallType,
    ) -> ExecResult<Option<Value>> {
        let owner = self.control_owner();
        if let Some(target) = self.activity.frames[owner].code.label(name) {
            return self.call_internal(target, args, call_type, None);
        }
        if let Some(result) = builtins::call(self, name, &args) {
            return result.map(Some);
        }
        let Some(routine) = self.runtime().routine(name) else {
            return Err(self.raise_error(ErrorCode::RoutineNotFound, name.to_string()));
        };
        let denied = self
            .settings()
            .security
            .as_ref()
            .is_some_and(|security| !security.check_call(routine.name()));
        if denied {
            return Err(self.raise_error(
                ErrorCode::Execution,
                format!("call to routine {} was denied", routine.name()),
            ));
        }
        self.call_routine(&routine, args, call_type)
    }

    /// A call in an expression: the callee must return a value.
    pub fn call_function(&mut self, name: &str, args: Vec<Value>) -> ExecResult<Value> {
        match self.call(name, args, CallType::Function)? {
            Some(value) => Ok(value),
            None => Err(self.raise_error(ErrorCode::NoReturnData, name.to_string())),
        }
    }

    /// Runs the code at clause `target` as an internal routine sharing this
    /// level's variables, until PROCEDURE says otherwise.
    pub(crate) fn call_internal(
        &mut self,
        target: usize,
        args: Vec<Value>,
        call_type: CallType,
        condition: Option<Condition>,
    ) -> ExecResult<Option<Value>> {
        self.check_depth()?;
        let owner = self.control_owner();
        let line = self.activity.frames[owner].current_line();
        self.set_variable("SIGL", Value::whole(line as i64));

        let code = Arc::clone(&self.activity.frames[owner].code);
        let name = code
            .clause(target)
            .and_then(|clause| clause.instruction().label())
            .unwrap_or_default()
            .to_string();
        let stack = self.activity.allocate_stack();
        let caller = self.activation_mut();
        let settings = caller.settings.inherit(call_type);
        let mut child = Activation::new(
            ActivationContext::InternalCall,
            code,
            stack,
            Arc::clone(&caller.variables),
            settings,
        );
        child.name = name;
        child.next = Some(target);
        child.args = args;
        child.traps = caller.traps.clone();
        child.receiver = caller.receiver.clone();
        child.superclass = caller.superclass.clone();
        child.condition_object = condition.or_else(|| caller.condition_object.clone());
        child.parent = Some(caller.id);
        child.procedure_allowed = true;
        self.activity.run_frame(child, Entry::Fresh)
    }

    pub(crate) fn call_routine(
        &mut self,
        routine: &Routine,
        args: Vec<Value>,
        call_type: CallType,
    ) -> ExecResult<Option<Value>> {
        self.check_depth()?;
        let invocation =
            Invocation::routine(routine, args, call_type).called_from(self.activation().id);
        let outcome = self.activity.invoke(invocation);
        self.at_boundary(outcome)
    }

    // ── Messages ───────────────────────────────────────────────────

    /// Sends `message` to `target`. An unknown method raises NOMETHOD; when
    /// that is trapped the send yields no result.
    pub fn send(
        &mut self,
        target: Value,
        message: &str,
        args: Vec<Value>,
    ) -> ExecResult<Option<Value>> {
        let message = message.to_ascii_uppercase();
        let resolved = match &target {
            Value::Object(object) => self
                .runtime()
                .class(object.class_name())
                .and_then(|class| class.find_method(&message))
                .map(|method| (object.clone(), method)),
            _ => None,
        };
        let Some((receiver, method)) = resolved else {
            let description = format!("{target}~{message}");
            self.signal_condition(Condition::new("NOMETHOD").with_description(description))?;
            return Ok(None);
        };
        self.check_depth()?;
        let invocation =
            Invocation::method(receiver, method, args).called_from(self.activation().id);
        let outcome = self.activity.invoke(invocation);
        self.at_boundary(outcome)
    }

    /// `.class~new`: creates the object and runs its INIT method, if any.
    pub fn new_object(&mut self, class: &str, args: Vec<Value>) -> ExecResult<Value> {
        let Some(class) = self.runtime().class(class) else {
            return Err(self.raise_error(
                ErrorCode::Execution,
                format!("class {} is not defined", class.to_ascii_uppercase()),
            ));
        };
        let object = Value::Object(RexxObject::new(class.name()));
        if class.find_method("INIT").is_some() {
            self.send(object.clone(), "INIT", args)?;
        }
        Ok(object)
    }

    // ── Nested code ────────────────────────────────────────────────

    pub fn interpret(&mut self, source: &str) -> ExecResult {
        let translated = match self.runtime().translator() {
            Some(translator) => translator.translate(source),
            None => Err("no translator is installed".to_string()),
        };
        match translated {
            Ok(code) => self.run_nested(ActivationContext::Interpret, Arc::new(code)).map(drop),
            Err(message) => Err(self.raise_error(ErrorCode::Translation, message)),
        }
    }

    /// Runs `code` as a nested INTERPRET or debug-pause level on this
    /// level's variables and settings.
    fn run_nested(
        &mut self,
        context: ActivationContext,
        code: Arc<Code>,
    ) -> ExecResult<Option<Value>> {
        self.check_depth()?;
        let stack = self.activity.allocate_stack();
        let parent = self.activation();
        let mut child = Activation::new(
            context,
            code,
            stack,
            Arc::clone(&parent.variables),
            parent.settings.clone(),
        );
        child.name = parent.name.clone();
        child.traps = parent.traps.clone();
        child.args = parent.args.clone();
        child.receiver = parent.receiver.clone();
        child.superclass = parent.superclass.clone();
        child.condition_object = parent.condition_object.clone();
        child.parent = Some(parent.id);
        child.debug_pause = context == ActivationContext::DebugPause;
        self.activity.run_frame(child, Entry::Fresh)
    }

    /// Interactive trace: reads and runs debug input after a clause until
    /// an empty line, end of input, or a TRACE that leaves interactive mode.
    pub(crate) fn debug_pause(&mut self) -> ExecResult {
        let host = self.host();
        while self.settings().trace.interactive {
            self.activity.release_lock();
            let line = host.trace_input();
            self.activity.acquire_lock();
            let Some(line) = line.filter(|line| !line.trim().is_empty()) else {
                return Ok(());
            };
            let translated = match self.runtime().translator() {
                Some(translator) => translator.translate(&line),
                None => Err("no translator is installed".to_string()),
            };
            let code = match translated {
                Ok(code) => Arc::new(code),
                Err(message) => {
                    host.trace_output(&format!("+++ {message}"));
                    continue;
                }
            };
            match self.run_nested(ActivationContext::DebugPause, code) {
                Ok(_) => {}
                Err(Unwind::Error(error)) => host.trace_output(&format!("+++ {error}")),
                Err(unwind) => return Err(unwind),
            }
        }
        Ok(())
    }

    // ── FORWARD ────────────────────────────────────────────────────

    pub fn forward(
        &mut self,
        target: Option<Value>,
        message: Option<&str>,
        args: Option<Vec<Value>>,
        continuing: bool,
    ) -> ExecResult {
        let receiver = self.activation().receiver.clone().map(Value::Object);
        let Some(target) = target.or(receiver) else {
            return Err(self.raise_error(ErrorCode::Execution, "FORWARD has no target object"));
        };
        let message = message.map_or_else(|| self.activation().name.clone(), str::to_string);
        let args = args.unwrap_or_else(|| self.activation().args.clone());

        if continuing {
            let result = self.send(target, &message, args)?;
            self.set_result(result);
            return Ok(());
        }
        self.activation_mut().forwarded = true;
        let outcome = self.send(target, &message, args);
        self.activation_mut().forwarded = false;
        let result = outcome?;
        self.return_from(result)
    }

    // ── Variable scoping ───────────────────────────────────────────

    /// PROCEDURE [EXPOSE]: gives an internal routine its own variables,
    /// sharing only the named ones with the caller.
    pub fn procedure(&mut self, expose: &[String]) -> ExecResult {
        let act = self.activation();
        if act.context != ActivationContext::InternalCall || !act.procedure_allowed {
            return Err(self.raise_error(
                ErrorCode::UnexpectedProcedure,
                "PROCEDURE must be the first instruction of an internal routine",
            ));
        }
        let mut frame = self.activity.allocate_frame();
        frame.expose_from(&mut self.activation().variables.lock(), expose);
        let act = self.activation_mut();
        act.variables = frame.into_ref();
        act.procedure_allowed = false;
        Ok(())
    }

    /// EXPOSE: binds locals of a method to object variables of its receiver.
    pub fn expose(&mut self, names: &[String]) -> ExecResult {
        let act = self.activation();
        let receiver = act
            .receiver
            .clone()
            .filter(|_| act.context == ActivationContext::Method && act.procedure_allowed);
        let Some(receiver) = receiver else {
            return Err(self.raise_error(
                ErrorCode::UnexpectedProcedure,
                "EXPOSE must be the first instruction of a method",
            ));
        };
        self.activation().variables.lock().expose_object(receiver.scope(), names);
        Ok(())
    }

    // ── Host commands ──────────────────────────────────────────────

    /// Sends `command` to the current ADDRESS environment. A positive
    /// return code raises ERROR; a negative one or a host failure raises
    /// FAILURE, falling back to ERROR when FAILURE is not trapped.
    pub fn command(&mut self, command: &str) -> ExecResult {
        let environment = self.settings().address.clone();
        let denied = self
            .settings()
            .security
            .as_ref()
            .is_some_and(|security| !security.check_command(&environment, command));
        if denied {
            return Err(self.raise_error(
                ErrorCode::Execution,
                format!("command refused in environment {environment}"),
            ));
        }
        let host = self.host();
        let mode = self.settings().trace.mode;
        if mode == TraceMode::Commands {
            host.trace_output(&format!("{:>6} *-* {command}", self.current_line()));
        }

        self.activity.release_lock();
        let outcome = host.command(&environment, command);
        self.activity.acquire_lock();

        let rc = match &outcome {
            Ok(rc) => *rc,
            Err(message) => {
                log::debug!("command failed in {environment}: {message}");
                -1
            }
        };
        self.set_variable("RC", Value::whole(rc));
        if rc == 0 {
            return Ok(());
        }
        if matches!(mode, TraceMode::Errors | TraceMode::Failure | TraceMode::Normal)
            && (rc < 0 || mode == TraceMode::Errors)
        {
            host.trace_output(&format!("{:>6} *-* {command}", self.current_line()));
            host.trace_output(&format!("       +++ RC({rc}) +++"));
        }
        let name = if rc > 0 || self.activation().traps.lookup("FAILURE").is_none() {
            "ERROR"
        } else {
            "FAILURE"
        };
        let condition = Condition::new(name)
            .with_description(command)
            .with_rc(Value::whole(rc));
        self.signal_condition(condition)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        BufferHost, Class, CodeBuilder, ErrorCode, Expr, Runtime, RuntimeCreateInfo,
        instructions::{Call, Command, Exit, Procedure, Return, TrapOn},
    };

    fn runtime(host: Arc<BufferHost>) -> Runtime {
        Runtime::new(RuntimeCreateInfo::new(host)).unwrap()
    }

    #[test]
    fn internal_call_shares_variables_until_procedure() {
        let host = Arc::new(BufferHost::new());
        let mut b = CodeBuilder::new("main");
        b.assign("x", Expr::lit("outer"))
            .assign("y", Expr::lit("kept"))
            .push(Call::new("SHARED", vec![]))
            .say(Expr::var("x"))
            .push(Call::new("PRIVATE", vec![]))
            .say(Expr::var("x"))
            .say(Expr::var("y"))
            .push(Exit::new(None))
            .label("SHARED")
            .assign("x", Expr::lit("shared"))
            .push(Return::new(None))
            .label("PRIVATE")
            .push(Procedure::expose(&["y"]))
            .assign("x", Expr::lit("private"))
            .assign("y", Expr::lit("exposed"))
            .push(Return::new(None));
        let result = runtime(host.clone()).run_program(b.build_shared().unwrap(), vec![]);
        assert_eq!(result, Ok(None));
        assert_eq!(host.output(), ["shared", "shared", "exposed"]);
    }

    #[test]
    fn procedure_must_come_first() {
        let host = Arc::new(BufferHost::new());
        let mut b = CodeBuilder::new("main");
        b.push(Call::new("SUB", vec![]))
            .push(Exit::new(None))
            .label("SUB")
            .say(Expr::lit("first"))
            .push(Procedure::new());
        let err = runtime(host).run_program(b.build_shared().unwrap(), vec![]).unwrap_err();
        assert_eq!(err.code, ErrorCode::UnexpectedProcedure);
        assert_eq!(err.traceback.len(), 2);
    }

    #[test]
    fn function_without_result_is_error_44() {
        let host = Arc::new(BufferHost::new());
        let mut b = CodeBuilder::new("main");
        b.say(Expr::call("F", vec![]))
            .push(Exit::new(None))
            .label("F")
            .push(Return::new(None));
        let err = runtime(host).run_program(b.build_shared().unwrap(), vec![]).unwrap_err();
        assert_eq!(err.code, ErrorCode::NoReturnData);
    }

    #[test]
    fn unknown_routine_is_error_43() {
        let host = Arc::new(BufferHost::new());
        let mut b = CodeBuilder::new("main");
        b.push(Call::new("NOWHERE", vec![]));
        let err = runtime(host).run_program(b.build_shared().unwrap(), vec![]).unwrap_err();
        assert_eq!(err.code, ErrorCode::RoutineNotFound);
        assert_eq!(err.detail, "NOWHERE");
    }

    #[test]
    fn external_routine_gets_fresh_variables() {
        let host = Arc::new(BufferHost::new());
        let rt = runtime(host.clone());
        let mut r = CodeBuilder::new("ext");
        r.say(Expr::var("x"))
            .push(Return::new(Some(Expr::call("ARG", vec![Expr::num(1)]))));
        rt.define_routine("EXT", r.build_shared().unwrap());

        let mut b = CodeBuilder::new("main");
        b.assign("x", Expr::lit("main value"))
            .say(Expr::call("EXT", vec![Expr::lit("passed")]));
        rt.run_program(b.build_shared().unwrap(), vec![]).unwrap();
        assert_eq!(host.output(), ["X", "passed"]);
    }

    #[test]
    fn call_depth_is_bounded() {
        let host = Arc::new(BufferHost::new());
        let settings = crate::EngineSettings { max_call_depth: 8, ..Default::default() };
        let rt = Runtime::new(RuntimeCreateInfo::new(host).with_settings(settings)).unwrap();
        let mut b = CodeBuilder::new("main");
        b.label("RECURSE").push(Call::new("RECURSE", vec![]));
        let err = rt.run_program(b.build_shared().unwrap(), vec![]).unwrap_err();
        assert_eq!(err.code, ErrorCode::ControlStackFull);
    }

    #[test]
    fn failing_command_raises_error_condition() {
        let host = Arc::new(BufferHost::with_commands(|_, cmd| match cmd {
            "bad" => Ok(5),
            "broken" => Err("no such program".into()),
            _ => Ok(0),
        }));
        let mut b = CodeBuilder::new("main");
        b.push(TrapOn::call("ERROR"))
            .push(Command::new(Expr::lit("bad")))
            .push(Command::new(Expr::lit("broken")))
            .push(Command::new(Expr::lit("fine")))
            .say(Expr::var("RC"))
            .push(Exit::new(None))
            .label("ERROR")
            .say(Expr::abut(Expr::call("CONDITION", vec![Expr::lit("D")]), Expr::var("RC")))
            .push(Return::new(None));
        let result = runtime(host.clone()).run_program(b.build_shared().unwrap(), vec![]);
        assert_eq!(result, Ok(None));
        assert_eq!(host.output(), ["bad5", "broken-1", "0"]);
    }

    #[test]
    fn new_object_runs_init() {
        let host = Arc::new(BufferHost::new());
        let rt = runtime(host.clone());
        let mut init = CodeBuilder::new("init");
        init.push(crate::instructions::Expose::new(&["name"]))
            .assign("name", Expr::call("ARG", vec![Expr::num(1)]));
        let mut get = CodeBuilder::new("name");
        get.push(crate::instructions::Expose::new(&["name"]))
            .push(Return::new(Some(Expr::var("name"))));
        rt.define_class(
            Class::new("Person")
                .with_method(Method::new("INIT", init.build_shared().unwrap()))
                .with_method(Method::new("NAME", get.build_shared().unwrap())),
        );

        let mut b = CodeBuilder::new("main");
        b.assign("p", Expr::new_object("Person", vec![Expr::lit("Ada")]))
            .say(Expr::send(Expr::var("p"), "name", vec![]));
        rt.run_program(b.build_shared().unwrap(), vec![]).unwrap();
        assert_eq!(host.output(), ["Ada"]);
    }
}
