use std::{fmt, sync::Arc};

use chrono::{DateTime, Local};
use rand::{RngCore, SeedableRng, rngs::StdRng};

use crate::{SecurityManager, SettingsError};

// ── Trace ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TraceMode {
    Off,
    #[default]
    Normal,
    Failure,
    Errors,
    Commands,
    Labels,
    Results,
    Intermediates,
    All,
}

impl TraceMode {
    pub fn letter(self) -> char {
        match self {
            TraceMode::Off => 'O',
            TraceMode::Normal => 'N',
            TraceMode::Failure => 'F',
            TraceMode::Errors => 'E',
            TraceMode::Commands => 'C',
            TraceMode::Labels => 'L',
            TraceMode::Results => 'R',
            TraceMode::Intermediates => 'I',
            TraceMode::All => 'A',
        }
    }

    fn from_letter(c: char) -> Option<Self> {
        Some(match c.to_ascii_uppercase() {
            'O' => TraceMode::Off,
            'N' => TraceMode::Normal,
            'F' => TraceMode::Failure,
            'E' => TraceMode::Errors,
            'C' => TraceMode::Commands,
            'L' => TraceMode::Labels,
            'R' => TraceMode::Results,
            'I' => TraceMode::Intermediates,
            'A' => TraceMode::All,
            _ => return None,
        })
    }

    /// Whether every clause is echoed before it runs.
    pub fn traces_clauses(self) -> bool {
        matches!(self, TraceMode::All | TraceMode::Results | TraceMode::Intermediates)
    }

    pub fn traces_results(self) -> bool {
        matches!(self, TraceMode::Results | TraceMode::Intermediates)
    }
}

/// A trace mode plus the interactive (`?`) toggle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TraceSetting {
    pub mode: TraceMode,
    pub interactive: bool,
}

impl TraceSetting {
    pub const OFF: TraceSetting = TraceSetting { mode: TraceMode::Off, interactive: false };

    /// Applies a TRACE setting string such as `R`, `?A` or `?` to `self`.
    /// Returns `None` for an unknown setting.
    pub fn apply(self, setting: &str) -> Option<TraceSetting> {
        let mut next = self;
        let mut letters = setting.trim().chars().peekable();
        while letters.peek() == Some(&'?') {
            letters.next();
            next.interactive = !next.interactive;
        }
        if let Some(letter) = letters.next() {
            next.mode = TraceMode::from_letter(letter)?;
            if next.mode == TraceMode::Off {
                next.interactive = false;
            }
        }
        Some(next)
    }
}

impl fmt::Display for TraceSetting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.interactive {
            write!(f, "?")?;
        }
        write!(f, "{}", self.mode.letter())
    }
}

// ── Numeric ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NumericForm {
    #[default]
    Scientific,
    Engineering,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NumericSettings {
    pub digits: usize,
    pub fuzz: usize,
    pub form: NumericForm,
}

impl Default for NumericSettings {
    fn default() -> Self {
        Self {
            digits: 9,
            fuzz: 0,
            form: NumericForm::Scientific,
        }
    }
}

/// How the running code was invoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallType {
    Command,
    Subroutine,
    Function,
    Method,
}

impl CallType {
    pub fn keyword(self) -> &'static str {
        match self {
            CallType::Command => "COMMAND",
            CallType::Subroutine => "SUBROUTINE",
            CallType::Function => "FUNCTION",
            CallType::Method => "METHOD",
        }
    }
}

// ── Per-activation settings ───────────────────────────────────────────

/// The settings block every activation carries.
///
/// Internal calls and INTERPRET start from a copy of their caller's block;
/// methods, routines and programs start from the engine defaults.
#[derive(Clone)]
pub struct ActivationSettings {
    pub trace: TraceSetting,
    pub numeric: NumericSettings,
    pub address: String,
    pub alternate_address: String,
    pub call_type: CallType,
    pub security: Option<Arc<dyn SecurityManager>>,
    pub random_seed: u64,
    random: StdRng,
    timestamp: Option<DateTime<Local>>,
    elapsed: Option<DateTime<Local>>,
}

impl fmt::Debug for ActivationSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActivationSettings")
            .field("trace", &self.trace)
            .field("numeric", &self.numeric)
            .field("address", &self.address)
            .field("alternate_address", &self.alternate_address)
            .field("call_type", &self.call_type)
            .field("security", &self.security.is_some())
            .field("random_seed", &self.random_seed)
            .finish()
    }
}

impl ActivationSettings {
    pub fn new(engine: &EngineSettings, call_type: CallType, seed: u64) -> Self {
        Self {
            trace: engine.trace,
            numeric: engine.numeric,
            address: engine.address.clone(),
            alternate_address: engine.address.clone(),
            call_type,
            security: None,
            random_seed: seed,
            random: StdRng::seed_from_u64(seed),
            timestamp: None,
            elapsed: None,
        }
    }

    /// Copy for a nested level. The copy draws its own random stream from
    /// the caller's so the two levels do not repeat each other.
    pub fn inherit(&mut self, call_type: CallType) -> Self {
        let mut child = self.clone();
        child.call_type = call_type;
        child.random_seed = self.random.next_u64();
        child.random = StdRng::seed_from_u64(child.random_seed);
        child
    }

    /// Takes back the settings a nested level shares with its caller.
    pub fn merge_from(&mut self, nested: &ActivationSettings) {
        self.trace = nested.trace;
        self.numeric = nested.numeric;
        self.address = nested.address.clone();
        self.alternate_address = nested.alternate_address.clone();
    }

    pub fn reseed(&mut self, seed: u64) {
        self.random_seed = seed;
        self.random = StdRng::seed_from_u64(seed);
    }

    #[inline]
    pub fn random(&mut self) -> &mut StdRng {
        &mut self.random
    }

    /// The time of the current clause. Every query within one clause sees
    /// the same instant.
    pub fn clause_time(&mut self) -> DateTime<Local> {
        *self.timestamp.get_or_insert_with(Local::now)
    }

    #[inline]
    pub fn clear_timestamp(&mut self) {
        self.timestamp = None;
    }

    /// Seconds since the elapsed clock was started, starting it on first use.
    pub fn elapsed(&mut self, reset: bool) -> f64 {
        let now = self.clause_time();
        let start = *self.elapsed.get_or_insert(now);
        if reset {
            self.elapsed = Some(now);
        }
        let micros = (now - start).num_microseconds().unwrap_or(0);
        micros as f64 / 1_000_000.0
    }

    pub fn set_address(&mut self, environment: Option<String>) {
        match environment {
            Some(env) => {
                self.alternate_address = std::mem::replace(&mut self.address, env);
            }
            None => std::mem::swap(&mut self.address, &mut self.alternate_address),
        }
    }
}

// ── Engine settings ───────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Clauses executed between cooperative yield checks.
    pub yield_threshold: usize,
    /// Deepest allowed activation stack per activity.
    pub max_call_depth: usize,
    /// Initial capacity of an evaluation stack.
    pub stack_capacity: usize,
    /// Initial capacity of a local variable frame.
    pub frame_capacity: usize,
    pub trace: TraceSetting,
    pub numeric: NumericSettings,
    pub address: String,
    /// Fixed seed for RANDOM; `None` seeds from entropy.
    pub random_seed: Option<u64>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            yield_threshold: 100,
            max_call_depth: 250,
            stack_capacity: 16,
            frame_capacity: 16,
            trace: TraceSetting::default(),
            numeric: NumericSettings::default(),
            address: "CMD".to_string(),
            random_seed: None,
        }
    }
}

impl EngineSettings {
    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.yield_threshold == 0 {
            return Err(SettingsError("yield_threshold must be > 0"));
        }
        if self.max_call_depth < 2 {
            return Err(SettingsError("max_call_depth must allow at least one call"));
        }
        if self.numeric.digits == 0 || self.numeric.fuzz >= self.numeric.digits {
            return Err(SettingsError("numeric fuzz must be smaller than digits"));
        }
        if self.address.is_empty() {
            return Err(SettingsError("address environment must be named"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    #[test]
    fn trace_settings_parse() {
        let base = TraceSetting::default();
        let r = base.apply("R").unwrap();
        assert_eq!(r, TraceSetting { mode: TraceMode::Results, interactive: false });
        let interactive = r.apply("?").unwrap();
        assert!(interactive.interactive);
        assert_eq!(interactive.to_string(), "?R");
        assert_eq!(interactive.apply("O").unwrap(), TraceSetting::OFF);
        assert!(base.apply("X").is_none());
    }

    #[test]
    fn default_settings_validate() {
        assert!(EngineSettings::default().validate().is_ok());
        let bad = EngineSettings { yield_threshold: 0, ..Default::default() };
        assert!(bad.validate().is_err());
        let mut fuzzy = EngineSettings::default();
        fuzzy.numeric.fuzz = 9;
        assert!(fuzzy.validate().is_err());
    }

    #[test]
    fn timestamp_is_stable_within_a_clause() {
        let mut settings = ActivationSettings::new(&EngineSettings::default(), CallType::Command, 1);
        let first = settings.clause_time();
        std::thread::sleep(std::time::Duration::from_millis(2));
        assert_eq!(settings.clause_time(), first);
        settings.clear_timestamp();
        assert!(settings.clause_time() > first);
    }

    #[test]
    fn inherited_random_streams_differ() {
        let mut parent = ActivationSettings::new(&EngineSettings::default(), CallType::Command, 7);
        let mut child = parent.inherit(CallType::Subroutine);
        assert_ne!(child.random_seed, parent.random_seed);

        let mut replay = ActivationSettings::new(&EngineSettings::default(), CallType::Command, child.random_seed);
        let a: u32 = child.random().gen_range(0..1_000_000);
        let b: u32 = replay.random().gen_range(0..1_000_000);
        assert_eq!(a, b);
    }

    #[test]
    fn address_swaps_with_alternate() {
        let mut settings = ActivationSettings::new(&EngineSettings::default(), CallType::Command, 1);
        settings.set_address(Some("EDIT".into()));
        assert_eq!((settings.address.as_str(), settings.alternate_address.as_str()), ("EDIT", "CMD"));
        settings.set_address(None);
        assert_eq!((settings.address.as_str(), settings.alternate_address.as_str()), ("CMD", "EDIT"));
    }
}
