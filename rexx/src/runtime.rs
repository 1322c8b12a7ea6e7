use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::{Duration, Instant},
};

use heap::WeakCache;
use object::{ActivityId, ObjectRef, RexxObject, Value};
use parking_lot::{Mutex, RwLock};
use rand::{RngCore, SeedableRng, rngs::StdRng};

use crate::{
    Activation, Activity, ActivityStats, CallType, Class, Code, EngineSettings, ErrorCode,
    ExecResult, ExecutionLock, Host, Interrupts, NativeParker, NativeThread, RexxError, Routine,
    SecurityManager, SettingsError, Translator, Unwind, calls::Invocation,
};

/// Everything needed to create a [`Runtime`].
pub struct RuntimeCreateInfo {
    pub settings: EngineSettings,
    pub host: Arc<dyn Host>,
    pub translator: Option<Arc<dyn Translator>>,
    pub security: Option<Arc<dyn SecurityManager>>,
}

impl RuntimeCreateInfo {
    pub fn new(host: Arc<dyn Host>) -> Self {
        Self {
            settings: EngineSettings::default(),
            host,
            translator: None,
            security: None,
        }
    }

    pub fn with_settings(mut self, settings: EngineSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_translator(mut self, translator: impl Translator + 'static) -> Self {
        self.translator = Some(Arc::new(translator));
        self
    }

    pub fn with_security(mut self, security: Arc<dyn SecurityManager>) -> Self {
        self.security = Some(security);
        self
    }
}

/// What the runtime keeps about a live activity so other threads can
/// interrupt it.
struct ActivityHandle {
    interrupts: Arc<Interrupts>,
    parker: Arc<NativeParker>,
}

struct RuntimeShared {
    settings: EngineSettings,
    host: Arc<dyn Host>,
    translator: Option<Arc<dyn Translator>>,
    security: Option<Arc<dyn SecurityManager>>,
    classes: RwLock<HashMap<String, Arc<Class>>>,
    routines: RwLock<HashMap<String, Arc<Routine>>>,
    resolved: WeakCache<String, Routine>,
    lock: ExecutionLock,
    activities: Mutex<HashMap<ActivityId, ActivityHandle>>,
    next_activity: AtomicU64,
    seeds: Mutex<StdRng>,
    replies: Mutex<Vec<Arc<NativeThread>>>,
    reply_errors: Mutex<Vec<RexxError>>,
    totals: Mutex<ActivityStats>,
}

/// The engine instance: class and routine registries, the execution lock
/// and the set of live activities.
///
/// Cheap to clone; every clone refers to the same engine.
#[derive(Clone)]
pub struct Runtime {
    shared: Arc<RuntimeShared>,
}

impl Runtime {
    pub fn new(info: RuntimeCreateInfo) -> Result<Self, SettingsError> {
        info.settings.validate()?;
        let seeds = match info.settings.random_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        log::debug!(
            "runtime created: yield every {} clauses, depth limit {}",
            info.settings.yield_threshold,
            info.settings.max_call_depth
        );
        Ok(Self {
            shared: Arc::new(RuntimeShared {
                settings: info.settings,
                host: info.host,
                translator: info.translator,
                security: info.security,
                classes: RwLock::new(HashMap::new()),
                routines: RwLock::new(HashMap::new()),
                resolved: WeakCache::new(),
                lock: ExecutionLock::new(),
                activities: Mutex::new(HashMap::new()),
                next_activity: AtomicU64::new(1),
                seeds: Mutex::new(seeds),
                replies: Mutex::new(Vec::new()),
                reply_errors: Mutex::new(Vec::new()),
                totals: Mutex::new(ActivityStats::default()),
            }),
        })
    }

    #[inline]
    pub fn settings(&self) -> &EngineSettings {
        &self.shared.settings
    }

    #[inline]
    pub fn host(&self) -> &Arc<dyn Host> {
        &self.shared.host
    }

    #[inline]
    pub fn translator(&self) -> Option<&Arc<dyn Translator>> {
        self.shared.translator.as_ref()
    }

    #[inline]
    pub fn security(&self) -> Option<&Arc<dyn SecurityManager>> {
        self.shared.security.as_ref()
    }

    // ── Registries ─────────────────────────────────────────────────

    pub fn define_class(&self, class: Class) -> Arc<Class> {
        let class = Arc::new(class);
        self.shared
            .classes
            .write()
            .insert(class.name().to_string(), Arc::clone(&class));
        class
    }

    pub fn class(&self, name: &str) -> Option<Arc<Class>> {
        self.shared.classes.read().get(&name.to_ascii_uppercase()).cloned()
    }

    pub fn define_routine(&self, name: &str, code: Arc<Code>) {
        let routine = Arc::new(Routine::new(name, code));
        let mut routines = self.shared.routines.write();
        self.shared.resolved.remove(routine.name());
        routines.insert(routine.name().to_string(), routine);
    }

    pub fn remove_routine(&self, name: &str) -> bool {
        let key = name.to_ascii_uppercase();
        let mut routines = self.shared.routines.write();
        self.shared.resolved.remove(&key);
        routines.remove(&key).is_some()
    }

    /// Resolves an external routine. Cache entries are dropped whenever the
    /// name is redefined or removed.
    pub fn routine(&self, name: &str) -> Option<Arc<Routine>> {
        let key = name.to_ascii_uppercase();
        if let Some(routine) = self.shared.resolved.get(&key) {
            return Some(routine);
        }
        // registry stays locked until the entry is cached
        let routines = self.shared.routines.read();
        let routine = routines.get(&key).cloned()?;
        self.shared.resolved.insert(key, &routine);
        Some(routine)
    }

    // ── Entry points ───────────────────────────────────────────────

    /// Runs `code` as a program on a new activity of the calling thread.
    pub fn run_program(&self, code: Arc<Code>, args: Vec<Value>) -> Result<Option<Value>, RexxError> {
        self.enter(|activity| activity.invoke(Invocation::program(code, args)))
    }

    pub fn call_routine(&self, name: &str, args: Vec<Value>) -> Result<Option<Value>, RexxError> {
        let Some(routine) = self.routine(name) else {
            return Err(RexxError::new(ErrorCode::RoutineNotFound, name.to_ascii_uppercase()));
        };
        if let Some(security) = self.security() {
            if !security.check_call(routine.name()) {
                return Err(RexxError::new(
                    ErrorCode::Execution,
                    format!("call to routine {} was denied", routine.name()),
                ));
            }
        }
        self.enter(|activity| {
            activity.invoke(Invocation::routine(&routine, args, CallType::Function))
        })
    }

    pub fn send(
        &self,
        receiver: &ObjectRef,
        message: &str,
        args: Vec<Value>,
    ) -> Result<Option<Value>, RexxError> {
        let message = message.to_ascii_uppercase();
        let method = self
            .class(receiver.class_name())
            .and_then(|class| class.find_method(&message));
        let Some(method) = method else {
            return Err(RexxError::new(
                ErrorCode::NoMethod,
                format!("{}~{message}", receiver.default_name()),
            ));
        };
        let receiver = Arc::clone(receiver);
        self.enter(|activity| activity.invoke(Invocation::method(receiver, method, args)))
    }

    /// Creates an instance of `class`, running INIT when the class has one.
    pub fn new_object(&self, class: &str, args: Vec<Value>) -> Result<ObjectRef, RexxError> {
        let Some(class) = self.class(class) else {
            return Err(RexxError::new(
                ErrorCode::Execution,
                format!("class {} is not defined", class.to_ascii_uppercase()),
            ));
        };
        let object = RexxObject::new(class.name());
        if class.find_method("INIT").is_some() {
            self.send(&object, "INIT", args)?;
        }
        Ok(object)
    }

    fn enter<F>(&self, f: F) -> Result<Option<Value>, RexxError>
    where
        F: FnOnce(&mut Activity) -> ExecResult<Option<Value>>,
    {
        let mut activity = self.create_activity();
        activity.acquire_lock();
        let outcome = f(&mut activity);
        activity.release_lock();
        self.retire(&activity);
        escalate(outcome)
    }

    // ── Cross-thread control ───────────────────────────────────────

    /// Asks every live activity to raise HALT at its next clause boundary.
    /// Returns how many activities were signalled.
    pub fn halt_all(&self, description: Option<&str>) -> usize {
        let activities = self.shared.activities.lock();
        for handle in activities.values() {
            handle.interrupts.request_halt(description);
            handle.parker.unpark();
        }
        log::debug!("halt requested for {} activities", activities.len());
        activities.len()
    }

    /// Switches result tracing on or off in every live activity.
    pub fn set_trace_all(&self, on: bool) {
        for handle in self.shared.activities.lock().values() {
            handle.interrupts.request_trace(on);
        }
    }

    /// Waits for activities started by REPLY. Returns false if some are
    /// still running when `timeout` expires.
    pub fn wait_for_replies(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            let threads: Vec<Arc<NativeThread>> = self.shared.replies.lock().clone();
            if threads.is_empty() {
                return true;
            }
            for thread in &threads {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if !thread.join_timeout(remaining) {
                    return false;
                }
            }
            // replies may have replied again while we waited
            self.shared.replies.lock().retain(|t| !t.is_finished());
        }
    }

    /// Errors that ended replied activations, oldest first.
    pub fn reply_errors(&self) -> Vec<RexxError> {
        self.shared.reply_errors.lock().clone()
    }

    /// Counters of every retired activity.
    pub fn stats(&self) -> ActivityStats {
        *self.shared.totals.lock()
    }

    pub fn active_activities(&self) -> usize {
        self.shared.activities.lock().len()
    }

    // ── Crate internals ────────────────────────────────────────────

    #[inline]
    pub(crate) fn lock(&self) -> &ExecutionLock {
        &self.shared.lock
    }

    /// Seed for a new top-level activation's RANDOM stream.
    pub(crate) fn next_seed(&self) -> u64 {
        self.shared.seeds.lock().next_u64()
    }

    pub(crate) fn create_activity(&self) -> Activity {
        let id = ActivityId(self.shared.next_activity.fetch_add(1, Ordering::Relaxed));
        let activity = Activity::new(id, self.clone());
        self.shared.activities.lock().insert(
            id,
            ActivityHandle {
                interrupts: Arc::clone(&activity.interrupts),
                parker: Arc::clone(&activity.parker),
            },
        );
        log::trace!("{id} created");
        activity
    }

    pub(crate) fn retire(&self, activity: &Activity) {
        self.shared.activities.lock().remove(&activity.id());
        self.shared.totals.lock().absorb(&activity.stats());
        log::trace!("{} retired", activity.id());
    }

    pub(crate) fn record_reply_error(&self, error: RexxError) {
        self.shared.reply_errors.lock().push(error);
    }

    pub(crate) fn spawn_reply_thread(&self, successor: Activity, act: Activation) {
        let name = format!("reply-{}", successor.id().0);
        let thread = NativeThread::spawn(name, move || successor.resume(act));
        let mut replies = self.shared.replies.lock();
        replies.retain(|t| !t.is_finished());
        replies.push(thread);
    }
}

/// Turns the outcome of an entry-point activation into the caller's result.
/// A propagated SYNTAX, HALT or NOMETHOD becomes an error; other propagated
/// conditions are dropped.
pub(crate) fn escalate(outcome: ExecResult<Option<Value>>) -> Result<Option<Value>, RexxError> {
    match outcome {
        Ok(value) => Ok(value),
        Err(Unwind::Error(error)) => Err(*error),
        Err(Unwind::Propagate(condition)) => match condition.name.as_str() {
            "SYNTAX" => Err(RexxError::from_condition(*condition)),
            "HALT" => Err(RexxError::new(ErrorCode::ProgramInterrupted, condition.description)),
            "NOMETHOD" => Err(RexxError::new(ErrorCode::NoMethod, condition.description)),
            _ => Ok(None),
        },
        Err(Unwind::To(target)) => Err(RexxError::new(
            ErrorCode::Execution,
            format!("control transfer to {target} left its activity"),
        )),
    }
}
