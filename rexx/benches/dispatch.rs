//! Run with:
//!   cargo bench --bench dispatch

use std::sync::Arc;

use criterion::{Criterion, black_box, criterion_group, criterion_main};
use rexx::{
    BinaryOp, BufferHost, Class, Code, CodeBuilder, Expr, Method, Runtime, RuntimeCreateInfo,
    Value,
    instructions::{Evaluate, Expose, LoopSpec, Procedure, Raise, Return, TrapOn},
};

fn create_runtime() -> Runtime {
    Runtime::new(RuntimeCreateInfo::new(Arc::new(BufferHost::new())))
        .expect("default settings are valid")
}

fn add(left: Expr, right: Expr) -> Expr {
    Expr::binary(BinaryOp::Add, left, right)
}

fn run(runtime: &Runtime, code: &Arc<Code>) -> Option<Value> {
    runtime
        .run_program(Arc::clone(code), vec![])
        .expect("Benchmark failed")
}

/// Benchmark 1: plain clause dispatch.
/// A counted loop doing one assignment per iteration.
fn bench_counted_loop(c: &mut Criterion) {
    let runtime = create_runtime();
    let mut b = CodeBuilder::new("loop");
    b.assign("sum", Expr::num(0))
        .do_block(LoopSpec::counted("i", Expr::num(1), Expr::num(1000)), |b| {
            b.assign("sum", add(Expr::var("sum"), Expr::var("i")));
        })
        .push(Return::new(Some(Expr::var("sum"))));
    let code = b.build_shared().expect("valid code");

    assert_eq!(run(&runtime, &code), Some(Value::whole(500_500)));

    c.bench_function("counted_loop_1000", |b| {
        b.iter(|| black_box(run(&runtime, black_box(&code))));
    });
}

/// Benchmark 2: recursive internal function calls.
/// Every call pushes an activation with its own PROCEDURE frame.
fn bench_fibonacci(c: &mut Criterion) {
    let runtime = create_runtime();
    let n = || Expr::var("n");
    let mut b = CodeBuilder::new("fib");
    b.push(Return::new(Some(Expr::call("FIB", vec![Expr::num(12)]))))
        .label("FIB")
        .push(Procedure::new())
        .assign("n", Expr::call("ARG", vec![Expr::num(1)]))
        .if_then(Expr::binary(BinaryOp::Lt, n(), Expr::num(2)), |b| {
            b.push(Return::new(Some(n())));
        })
        .push(Return::new(Some(add(
            Expr::call("FIB", vec![Expr::binary(BinaryOp::Sub, n(), Expr::num(1))]),
            Expr::call("FIB", vec![Expr::binary(BinaryOp::Sub, n(), Expr::num(2))]),
        ))));
    let code = b.build_shared().expect("valid code");

    assert_eq!(run(&runtime, &code), Some(Value::whole(144)));

    c.bench_function("fibonacci_12", |b| {
        b.iter(|| black_box(run(&runtime, black_box(&code))));
    });
}

/// Benchmark 3: CALL ON traps.
/// Each raise is queued and dispatched at the next clause boundary.
fn bench_trapped_conditions(c: &mut Criterion) {
    let runtime = create_runtime();
    let mut b = CodeBuilder::new("traps");
    b.assign("hits", Expr::num(0))
        .push(TrapOn::call("USER TICK").name("TICK"))
        .do_block(LoopSpec::repeat(Expr::num(100)), |b| {
            b.push(Raise::condition("USER TICK"));
        })
        .push(Return::new(Some(Expr::var("hits"))))
        .label("TICK")
        .assign("hits", add(Expr::var("hits"), Expr::num(1)))
        .push(Return::new(None));
    let code = b.build_shared().expect("valid code");

    assert_eq!(run(&runtime, &code), Some(Value::whole(100)));

    c.bench_function("call_on_100", |b| {
        b.iter(|| black_box(run(&runtime, black_box(&code))));
    });
}

/// Benchmark 4: guarded method sends.
/// Every send reserves and releases the receiver's guard.
fn bench_guarded_sends(c: &mut Criterion) {
    let runtime = create_runtime();
    let mut bump = CodeBuilder::new("bump");
    bump.push(Expose::new(&["count"]))
        .assign("count", add(Expr::var("count"), Expr::num(1)))
        .push(Return::new(None));
    let bump = bump.build_shared().expect("valid code");
    runtime.define_class(Class::new("Counter").with_method(Method::new("BUMP", bump)));
    let counter = runtime.new_object("Counter", vec![]).expect("class is defined");

    let mut b = CodeBuilder::new("sends");
    b.assign("counter", Expr::call("ARG", vec![Expr::num(1)]))
        .do_block(LoopSpec::repeat(Expr::num(100)), |b| {
            b.push(Evaluate::new(Expr::send(Expr::var("counter"), "BUMP", vec![])));
        })
        .push(Return::new(None));
    let code = b.build_shared().expect("valid code");

    c.bench_function("guarded_send_100", |b| {
        b.iter(|| {
            counter.scope().set("COUNT", Value::whole(0));
            black_box(
                runtime
                    .run_program(Arc::clone(&code), vec![Value::Object(counter.clone())])
                    .expect("Benchmark failed"),
            )
        });
    });
}

criterion_group! {
    name = benches;
    config = Criterion::default().sample_size(20);
    targets = bench_counted_loop, bench_fibonacci, bench_trapped_conditions, bench_guarded_sends
}

criterion_main!(benches);
