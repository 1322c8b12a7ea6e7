use std::{sync::Arc, thread, time::Duration};

use heap::MarkStats;
use parking_lot::Mutex;
use rexx::{
    BinaryOp, BufferHost, Class, CodeBuilder, EngineSettings, ErrorCode, ExecCx, ExecResult, Expr,
    Instruction, Method, Runtime, RuntimeCreateInfo, Value,
    instructions::{Call, Expose, LoopSpec, Raise, Reply, Return, TrapOn},
};

fn runtime(host: Arc<BufferHost>) -> Runtime {
    Runtime::new(RuntimeCreateInfo::new(host)).unwrap()
}

fn method_class(rt: &Runtime, class: &str, method: &str, b: CodeBuilder) {
    rt.define_class(Class::new(class).with_method(Method::new(method, b.build_shared().unwrap())));
}

#[test]
fn second_reply_fails_on_the_replied_activity() {
    let rt = runtime(Arc::new(BufferHost::new()));
    let mut b = CodeBuilder::new("twice");
    b.push(Reply::new(Some(Expr::lit("first"))))
        .push(Reply::new(Some(Expr::lit("second"))));
    method_class(&rt, "Twice", "GO", b);

    let obj = rt.new_object("Twice", vec![]).unwrap();
    assert_eq!(rt.send(&obj, "go", vec![]).unwrap(), Some(Value::from("first")));
    assert!(rt.wait_for_replies(Duration::from_secs(5)));
    let errors = rt.reply_errors();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].code, ErrorCode::Execution);
    assert_eq!(obj.scope().guard().owner(), None);
}

#[test]
fn return_with_value_after_reply_fails() {
    let rt = runtime(Arc::new(BufferHost::new()));
    let mut b = CodeBuilder::new("late");
    b.push(Reply::new(None)).push(Return::new(Some(Expr::lit("late"))));
    method_class(&rt, "Late", "GO", b);

    let obj = rt.new_object("Late", vec![]).unwrap();
    assert_eq!(rt.send(&obj, "go", vec![]).unwrap(), None);
    assert!(rt.wait_for_replies(Duration::from_secs(5)));
    let errors = rt.reply_errors();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].code.number(), 98);
}

#[test]
fn specific_trap_wins_over_any() {
    let host = Arc::new(BufferHost::new());
    let mut b = CodeBuilder::new("main");
    b.push(TrapOn::call("USER FOO").name("FOO"))
        .push(TrapOn::call("ANY"))
        .push(Raise::condition("USER FOO"))
        .push(Raise::condition("USER BAR"))
        .push(Return::new(None))
        .label("FOO")
        .say(Expr::concat(Expr::lit("foo"), Expr::call("CONDITION", vec![Expr::lit("C")])))
        .push(Return::new(None))
        .label("ANY")
        .say(Expr::concat(Expr::lit("any"), Expr::call("CONDITION", vec![Expr::lit("C")])))
        .push(Return::new(None));
    runtime(host.clone()).run_program(b.build_shared().unwrap(), vec![]).unwrap();
    assert_eq!(host.output(), ["foo USER FOO", "any USER BAR"]);
}

#[test]
fn call_on_handler_waits_for_the_clause_to_finish() {
    let host = Arc::new(BufferHost::new());
    let mut b = CodeBuilder::new("main");
    b.push(TrapOn::call("USER PING").name("PING"))
        .push(Call::new("RAISER", vec![]))
        .push(Return::new(None))
        .label("RAISER")
        .push(Raise::condition("USER PING"))
        .say(Expr::lit("raiser done"))
        .push(Return::new(None))
        .label("PING")
        .say(Expr::lit("handler"))
        .push(Return::new(None));
    runtime(host.clone()).run_program(b.build_shared().unwrap(), vec![]).unwrap();
    // The handler is queued where the condition arose and runs after RAISE
    // completes, before the next clause of the raising routine.
    assert_eq!(host.output(), ["handler", "raiser done"]);
}

#[test]
fn unwinding_terminates_every_intermediate_frame() {
    let host = Arc::new(BufferHost::new());
    let mut b = CodeBuilder::new("main");
    b.push(TrapOn::signal("SYNTAX"))
        .push(Call::new("A", vec![]))
        .say(Expr::lit("main after call"))
        .push(Return::new(None))
        .label("SYNTAX")
        .say(Expr::call("CONDITION", vec![Expr::lit("C")]))
        .say(Expr::var("RC"))
        .push(Return::new(None))
        .label("A")
        .push(Call::new("B", vec![]))
        .say(Expr::lit("A after call"))
        .push(Return::new(None))
        .label("B")
        .say(Expr::binary(BinaryOp::Div, Expr::num(1), Expr::num(0)))
        .say(Expr::lit("B after error"));
    let rt = runtime(host.clone());
    rt.run_program(b.build_shared().unwrap(), vec![]).unwrap();
    assert_eq!(host.output(), ["SYNTAX", "42"]);
    assert_eq!(rt.stats().terminations, 3);
}

#[test]
fn guarded_methods_never_overlap() {
    let host = Arc::new(BufferHost::new());
    let settings = EngineSettings { yield_threshold: 1, ..Default::default() };
    let rt = Runtime::new(RuntimeCreateInfo::new(host).with_settings(settings)).unwrap();
    let busy = || Expr::var("busy");
    let mut b = CodeBuilder::new("critical");
    b.push(Expose::new(&["busy", "overlaps", "entries"]))
        .if_then(Expr::binary(BinaryOp::Eq, busy(), Expr::num(1)), |b| {
            b.assign("overlaps", Expr::binary(BinaryOp::Add, Expr::var("overlaps"), Expr::num(1)));
        })
        .assign("busy", Expr::num(1))
        .assign("entries", Expr::binary(BinaryOp::Add, Expr::var("entries"), Expr::num(1)))
        .do_block(LoopSpec::repeat(Expr::num(10)), |b| {
            b.assign("busy", Expr::num(1));
        })
        .assign("busy", Expr::num(0))
        .push(Return::new(None));
    method_class(&rt, "Shared", "CRITICAL", b);

    let obj = rt.new_object("Shared", vec![]).unwrap();
    for (name, value) in [("BUSY", 0), ("OVERLAPS", 0), ("ENTRIES", 0)] {
        obj.scope().set(name, Value::whole(value));
    }
    let workers: Vec<_> = (0..4)
        .map(|_| {
            let rt = rt.clone();
            let obj = obj.clone();
            thread::spawn(move || {
                for _ in 0..25 {
                    rt.send(&obj, "critical", vec![]).unwrap();
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }
    assert_eq!(obj.scope().get("OVERLAPS"), Some(Value::whole(0)));
    assert_eq!(obj.scope().get("ENTRIES"), Some(Value::whole(100)));
}

#[test]
fn replied_activation_keeps_arguments_and_locals() {
    let rt = runtime(Arc::new(BufferHost::new()));
    let mut b = CodeBuilder::new("keep");
    b.push(Expose::new(&["seen"]))
        .assign("local", Expr::lit("kept"))
        .push(Reply::new(Some(Expr::lit("ok"))))
        .assign(
            "seen",
            Expr::concat(Expr::var("local"), Expr::call("ARG", vec![Expr::num(1)])),
        );
    method_class(&rt, "Keeper", "KEEP", b);

    let obj = rt.new_object("Keeper", vec![]).unwrap();
    let answer = rt.send(&obj, "keep", vec![Value::from("arg")]).unwrap();
    assert_eq!(answer, Some(Value::from("ok")));
    assert!(rt.wait_for_replies(Duration::from_secs(5)));
    assert!(rt.reply_errors().is_empty());
    assert_eq!(obj.scope().get("SEEN"), Some(Value::from("kept arg")));
}

/// Records what a marking pass over the running activity reaches.
#[derive(Debug)]
struct MarkProbe(Arc<Mutex<Option<MarkStats>>>);

impl Instruction for MarkProbe {
    fn execute(&self, cx: &mut ExecCx<'_>) -> ExecResult {
        *self.0.lock() = Some(cx.mark_roots());
        Ok(())
    }

    fn keyword(&self) -> &'static str {
        "PROBE"
    }
}

#[test]
fn marking_reaches_frame_values_and_objects() {
    let rt = runtime(Arc::new(BufferHost::new()));
    rt.define_class(Class::new("Box"));
    let seen = Arc::new(Mutex::new(None));
    let mut b = CodeBuilder::new("main");
    b.assign("text", Expr::lit("hello"))
        .assign("box", Expr::new_object("Box", vec![]))
        .push(Call::new("INNER", vec![Expr::var("box")]))
        .push(Return::new(None))
        .label("INNER")
        .push(MarkProbe(seen.clone()))
        .push(Return::new(None));
    rt.run_program(b.build_shared().unwrap(), vec![]).unwrap();

    let stats = seen.lock().take().unwrap();
    // the box is reachable from both frames but traced once
    assert_eq!(stats.objects, 1);
    assert!(stats.strings >= 1);
    assert!(stats.roots >= 3);
}
