use std::{
    collections::{HashMap, VecDeque},
    io::{self, BufRead, Write},
    process::Command,
};

use parking_lot::Mutex;

use crate::Code;

/// Line-oriented services the engine needs from its embedder.
pub trait Host: Send + Sync {
    fn say(&self, line: &str);

    fn trace_output(&self, line: &str);

    /// Next line of interactive debug input; `None` ends the pause.
    fn trace_input(&self) -> Option<String>;

    /// Runs `command` in `environment`, returning its return code.
    fn command(&self, environment: &str, command: &str) -> Result<i64, String>;

    fn open_stream(&self, _name: &str) -> bool {
        true
    }

    fn close_stream(&self, _name: &str) {}

    /// Snapshot of the process environment taken by SETLOCAL.
    fn environment(&self) -> Vec<(String, String)> {
        Vec::new()
    }

    fn restore_environment(&self, _snapshot: Vec<(String, String)>) {}
}

/// Turns source text into code for INTERPRET and interactive debug input.
pub trait Translator: Send + Sync {
    fn translate(&self, source: &str) -> Result<Code, String>;
}

impl<F> Translator for F
where
    F: Fn(&str) -> Result<Code, String> + Send + Sync,
{
    fn translate(&self, source: &str) -> Result<Code, String> {
        self(source)
    }
}

/// Veto hook for external calls and host commands.
pub trait SecurityManager: Send + Sync {
    fn check_call(&self, _routine: &str) -> bool {
        true
    }

    fn check_command(&self, _environment: &str, _command: &str) -> bool {
        true
    }
}

// ── Standard process host ─────────────────────────────────────────────

/// Host bound to the process: stdout, stderr, stdin and `sh -c`.
///
/// Commands see a private copy of the process environment, taken when the
/// host is created. `SET NAME=VALUE` edits that copy; the process
/// environment itself is never written.
#[derive(Debug)]
pub struct StdHost {
    env: Mutex<HashMap<String, String>>,
}

impl Default for StdHost {
    fn default() -> Self {
        Self {
            env: Mutex::new(std::env::vars().collect()),
        }
    }
}

impl StdHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn env_var(&self, name: &str) -> Option<String> {
        self.env.lock().get(name).cloned()
    }
}

impl Host for StdHost {
    fn say(&self, line: &str) {
        let mut out = io::stdout().lock();
        let _ = writeln!(out, "{line}");
    }

    fn trace_output(&self, line: &str) {
        eprintln!("{line}");
    }

    fn trace_input(&self) -> Option<String> {
        let mut line = String::new();
        match io::stdin().lock().read_line(&mut line) {
            Ok(0) | Err(_) => None,
            Ok(_) => Some(line.trim_end_matches(['\r', '\n']).to_string()),
        }
    }

    fn command(&self, _environment: &str, command: &str) -> Result<i64, String> {
        if let Some(assignment) = command.strip_prefix("SET ") {
            let Some((name, value)) = assignment.split_once('=') else {
                return Ok(1);
            };
            self.env.lock().insert(name.trim().to_string(), value.to_string());
            return Ok(0);
        }
        let env = self.env.lock().clone();
        let status = Command::new("sh")
            .arg("-c")
            .arg(command)
            .env_clear()
            .envs(&env)
            .status()
            .map_err(|err| err.to_string())?;
        Ok(status.code().map_or(-1, i64::from))
    }

    fn environment(&self) -> Vec<(String, String)> {
        let mut vars: Vec<(String, String)> = self
            .env
            .lock()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        vars.sort();
        vars
    }

    fn restore_environment(&self, snapshot: Vec<(String, String)>) {
        *self.env.lock() = snapshot.into_iter().collect();
    }
}

// ── Capturing host ────────────────────────────────────────────────────

type CommandHandler = Box<dyn Fn(&str, &str) -> Result<i64, String> + Send + Sync>;

/// Host that records everything, for tests and embedding.
///
/// Commands of the form `SET NAME=VALUE` update an in-memory environment;
/// every other command goes to the handler (return code 0 by default).
pub struct BufferHost {
    output: Mutex<Vec<String>>,
    trace: Mutex<Vec<String>>,
    input: Mutex<VecDeque<String>>,
    commands: Mutex<Vec<String>>,
    handler: CommandHandler,
    env: Mutex<Vec<(String, String)>>,
    opened: Mutex<Vec<String>>,
    closed: Mutex<Vec<String>>,
}

impl Default for BufferHost {
    fn default() -> Self {
        Self::with_commands(|_, _| Ok(0))
    }
}

impl BufferHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_commands<F>(handler: F) -> Self
    where
        F: Fn(&str, &str) -> Result<i64, String> + Send + Sync + 'static,
    {
        Self {
            output: Mutex::new(Vec::new()),
            trace: Mutex::new(Vec::new()),
            input: Mutex::new(VecDeque::new()),
            commands: Mutex::new(Vec::new()),
            handler: Box::new(handler),
            env: Mutex::new(Vec::new()),
            opened: Mutex::new(Vec::new()),
            closed: Mutex::new(Vec::new()),
        }
    }

    /// Queues lines for interactive debug input.
    pub fn queue_input<I, S>(&self, lines: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.input.lock().extend(lines.into_iter().map(Into::into));
    }

    pub fn output(&self) -> Vec<String> {
        self.output.lock().clone()
    }

    pub fn trace(&self) -> Vec<String> {
        self.trace.lock().clone()
    }

    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().clone()
    }

    pub fn env_var(&self, name: &str) -> Option<String> {
        self.env
            .lock()
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.clone())
    }

    pub fn opened_streams(&self) -> Vec<String> {
        self.opened.lock().clone()
    }

    pub fn closed_streams(&self) -> Vec<String> {
        self.closed.lock().clone()
    }

    pub fn clear(&self) {
        self.output.lock().clear();
        self.trace.lock().clear();
    }
}

impl Host for BufferHost {
    fn say(&self, line: &str) {
        self.output.lock().push(line.to_string());
    }

    fn trace_output(&self, line: &str) {
        self.trace.lock().push(line.to_string());
    }

    fn trace_input(&self) -> Option<String> {
        self.input.lock().pop_front()
    }

    fn command(&self, environment: &str, command: &str) -> Result<i64, String> {
        self.commands.lock().push(command.to_string());
        if let Some(assignment) = command.strip_prefix("SET ") {
            let Some((name, value)) = assignment.split_once('=') else {
                return Ok(1);
            };
            let mut env = self.env.lock();
            env.retain(|(k, _)| k != name.trim());
            env.push((name.trim().to_string(), value.to_string()));
            return Ok(0);
        }
        (self.handler)(environment, command)
    }

    fn open_stream(&self, name: &str) -> bool {
        self.opened.lock().push(name.to_string());
        true
    }

    fn close_stream(&self, name: &str) {
        self.closed.lock().push(name.to_string());
    }

    fn environment(&self) -> Vec<(String, String)> {
        self.env.lock().clone()
    }

    fn restore_environment(&self, snapshot: Vec<(String, String)>) {
        *self.env.lock() = snapshot;
    }
}
