use clap::{Parser as ClapParser, ValueEnum};
use std::{process, sync::Arc, thread, time::Duration};

use rexx::{
    BinaryOp, Class, Code, CodeBuilder, EngineSettings, Expr, Method, Runtime, RuntimeCreateInfo,
    RexxError, StdHost, TraceSetting, Value,
    instructions::{
        Call, Command, Exit, Expose, Guard, LoopSpec, Procedure, Raise, Reply, Return, Signal,
        TrapOn,
    },
};

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum Demo {
    /// Internal calls, PROCEDURE EXPOSE and an external routine
    Calls,
    /// SIGNAL ON SYNTAX and CALL ON ERROR around a failing command
    Traps,
    /// A loop stopped by a HALT request from another thread
    Halt,
    /// A guarded method that replies early and finishes on a new activity
    Reply,
}

#[derive(ClapParser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Demos to run, in order (all when none are given)
    #[arg(value_enum)]
    demos: Vec<Demo>,

    /// List the available demos and exit
    #[arg(long)]
    list: bool,

    /// Clauses executed between cooperative yields
    #[arg(long, default_value_t = 100)]
    yield_threshold: usize,

    /// Initial TRACE setting, e.g. R, A or ?R
    #[arg(long)]
    trace: Option<String>,

    /// Fixed seed for RANDOM
    #[arg(long)]
    seed: Option<u64>,
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    if cli.list {
        for demo in Demo::value_variants() {
            if let Some(value) = demo.to_possible_value() {
                let help = value.get_help().map(|h| h.to_string()).unwrap_or_default();
                println!("{:<8} {help}", value.get_name());
            }
        }
        return;
    }

    let mut settings = EngineSettings {
        yield_threshold: cli.yield_threshold,
        random_seed: cli.seed,
        ..Default::default()
    };
    if let Some(trace) = &cli.trace {
        match TraceSetting::default().apply(trace) {
            Some(setting) => settings.trace = setting,
            None => {
                eprintln!("Unknown trace setting '{trace}'");
                process::exit(2);
            }
        }
    }
    let runtime = match Runtime::new(RuntimeCreateInfo::new(Arc::new(StdHost::new())).with_settings(settings)) {
        Ok(runtime) => runtime,
        Err(err) => {
            eprintln!("{err}");
            process::exit(2);
        }
    };

    let demos = if cli.demos.is_empty() {
        Demo::value_variants().to_vec()
    } else {
        cli.demos.clone()
    };
    let mut failed = false;
    for demo in demos {
        println!("== {demo:?} ==");
        let outcome = match demo {
            Demo::Calls => run(&runtime, calls_demo(&runtime)),
            Demo::Traps => run(&runtime, traps_demo()),
            Demo::Halt => halt_demo(&runtime),
            Demo::Reply => reply_demo(&runtime),
        };
        if let Err(err) = outcome {
            eprintln!("{err}");
            failed = true;
        }
    }
    if !runtime.wait_for_replies(Duration::from_secs(5)) {
        eprintln!("replied activities did not finish");
        failed = true;
    }
    for err in runtime.reply_errors() {
        eprintln!("after REPLY: {err}");
        failed = true;
    }
    log::info!("{:?}", runtime.stats());
    if failed {
        process::exit(1);
    }
}

fn run(runtime: &Runtime, code: Result<Arc<Code>, RexxError>) -> Result<(), String> {
    let code = code.map_err(|e| e.to_string())?;
    match runtime.run_program(code, vec![]) {
        Ok(Some(value)) => {
            println!("=> {value}");
            Ok(())
        }
        Ok(None) => Ok(()),
        Err(err) => Err(err.to_string()),
    }
}

fn calls_demo(runtime: &Runtime) -> Result<Arc<Code>, RexxError> {
    let mut square = CodeBuilder::new("square");
    square.push(Return::new(Some(Expr::binary(
        BinaryOp::Mul,
        Expr::call("ARG", vec![Expr::num(1)]),
        Expr::call("ARG", vec![Expr::num(1)]),
    ))));
    runtime.define_routine("SQUARE", square.build_shared()?);

    let mut b = CodeBuilder::new("calls");
    b.assign("total", Expr::num(0))
        .do_block(LoopSpec::counted("i", Expr::num(1), Expr::num(4)), |b| {
            b.push(Call::new("ACCUMULATE", vec![Expr::var("i")]));
        })
        .say(Expr::concat(Expr::lit("sum of squares:"), Expr::var("total")))
        .push(Exit::new(Some(Expr::var("total"))))
        .label("ACCUMULATE")
        .push(Procedure::expose(&["total"]))
        .assign(
            "total",
            Expr::binary(
                BinaryOp::Add,
                Expr::var("total"),
                Expr::call("SQUARE", vec![Expr::call("ARG", vec![Expr::num(1)])]),
            ),
        )
        .push(Return::new(None));
    b.build_shared()
}

fn traps_demo() -> Result<Arc<Code>, RexxError> {
    let mut b = CodeBuilder::new("traps");
    b.push(TrapOn::call("ERROR"))
        .push(TrapOn::call("FAILURE"))
        .push(TrapOn::signal("SYNTAX"))
        .push(Command::new(Expr::lit("exit 3")))
        .say(Expr::concat(Expr::lit("command rc:"), Expr::var("RC")))
        .say(Expr::binary(BinaryOp::Div, Expr::num(1), Expr::num(0)))
        .say(Expr::lit("not reached"))
        .label("ERROR")
        .label("FAILURE")
        .say(Expr::concat(
            Expr::call("CONDITION", vec![Expr::lit("C")]),
            Expr::call("CONDITION", vec![Expr::lit("D")]),
        ))
        .push(Return::new(None))
        .label("SYNTAX")
        .say(Expr::concat(Expr::lit("caught error"), Expr::var("RC")))
        .push(Exit::new(None));
    b.build_shared()
}

fn halt_demo(runtime: &Runtime) -> Result<(), String> {
    let mut b = CodeBuilder::new("halt");
    b.assign("n", Expr::num(0))
        .push(TrapOn::signal("HALT"))
        .do_block(LoopSpec::forever(), |b| {
            b.assign("n", Expr::binary(BinaryOp::Add, Expr::var("n"), Expr::num(1)));
        })
        .label("HALT")
        .say(Expr::concat(
            Expr::lit("halted:"),
            Expr::call("CONDITION", vec![Expr::lit("D")]),
        ))
        .push(Return::new(Some(Expr::binary(BinaryOp::Gt, Expr::var("n"), Expr::num(0)))));
    let code = b.build_shared().map_err(|e| e.to_string())?;

    let stopper = {
        let runtime = runtime.clone();
        thread::spawn(move || {
            while runtime.halt_all(Some("stopped by demo")) == 0 {
                thread::sleep(Duration::from_millis(5));
            }
        })
    };
    let outcome = run(runtime, Ok(code));
    if stopper.join().is_err() {
        return Err("halt thread panicked".to_string());
    }
    outcome
}

fn reply_demo(runtime: &Runtime) -> Result<(), String> {
    let mut work = CodeBuilder::new("work");
    work.push(Expose::new(&["log"]))
        .push(Reply::new(Some(Expr::lit("accepted"))))
        .assign("log", Expr::lit("work done after reply"))
        .push(Return::new(None));
    let mut report = CodeBuilder::new("report");
    report
        .push(Expose::new(&["log"]))
        .push(Guard::on().when(Expr::binary(BinaryOp::Ne, Expr::var("log"), Expr::lit(""))))
        .push(Return::new(Some(Expr::var("log"))));
    let mut missing = CodeBuilder::new("missing");
    missing.push(Signal::new("NOWHERE"));
    let build = |b: CodeBuilder| b.build_shared().map_err(|e| e.to_string());
    runtime.define_class(
        Class::new("Job")
            .with_method(Method::new("WORK", build(work)?))
            .with_method(Method::new("REPORT", build(report)?))
            .with_method(Method::new("BROKEN", build(missing)?).unguarded()),
    );

    let job = runtime.new_object("Job", vec![]).map_err(|e| e.to_string())?;
    job.scope().set("LOG", Value::from(""));
    let answer = runtime.send(&job, "work", vec![]).map_err(|e| e.to_string())?;
    println!("work answered: {}", answer.map(|v| v.to_string()).unwrap_or_default());
    let report = runtime.send(&job, "report", vec![]).map_err(|e| e.to_string())?;
    println!("report: {}", report.map(|v| v.to_string()).unwrap_or_default());
    if let Err(err) = runtime.send(&job, "broken", vec![]) {
        println!("broken: {err}");
    }
    let mut unhandled = CodeBuilder::new("raise");
    unhandled
        .push(Raise::condition("USER DEMO"))
        .say(Expr::lit("unhandled USER is ignored"));
    run(runtime, unhandled.build_shared())
}
