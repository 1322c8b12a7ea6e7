use std::{
    collections::HashMap,
    fmt,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use parking_lot::{Condvar, Mutex};

use crate::{Value, Variable, VariableRef};

/// Identity of an activity (the thread-like carrier that holds guard
/// reservations).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ActivityId(pub u64);

impl fmt::Display for ActivityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "activity-{}", self.0)
    }
}

/// Something that can be woken when a watched object variable changes.
pub trait GuardWaiter: Send + Sync {
    fn wake(&self);
}

#[derive(Debug, Default)]
struct Reservation {
    owner: Option<ActivityId>,
    nest: usize,
}

/// Reservation lock on an object's scope-level variables.
///
/// Re-entrant per activity: the same activity may reserve it any number of
/// times and must release it as often. Other activities block in
/// [`GuardLock::reserve`] until the nesting count drops to zero.
pub struct GuardLock {
    reservation: Mutex<Reservation>,
    released: Condvar,
    waiters: Mutex<Vec<Arc<dyn GuardWaiter>>>,
    version: AtomicU64,
}

impl fmt::Debug for GuardLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let r = self.reservation.lock();
        f.debug_struct("GuardLock")
            .field("owner", &r.owner)
            .field("nest", &r.nest)
            .field("version", &self.version.load(Ordering::Relaxed))
            .finish()
    }
}

impl Default for GuardLock {
    fn default() -> Self {
        Self::new()
    }
}

impl GuardLock {
    pub fn new() -> Self {
        Self {
            reservation: Mutex::new(Reservation::default()),
            released: Condvar::new(),
            waiters: Mutex::new(Vec::new()),
            version: AtomicU64::new(0),
        }
    }

    /// Reserves without blocking. Returns false if another activity holds it.
    pub fn try_reserve(&self, owner: ActivityId) -> bool {
        let mut r = self.reservation.lock();
        match r.owner {
            None => {
                r.owner = Some(owner);
                r.nest = 1;
                true
            }
            Some(current) if current == owner => {
                r.nest += 1;
                true
            }
            Some(_) => false,
        }
    }

    /// Reserves, blocking while another activity holds the lock.
    pub fn reserve(&self, owner: ActivityId) {
        let mut r = self.reservation.lock();
        loop {
            match r.owner {
                None => {
                    r.owner = Some(owner);
                    r.nest = 1;
                    return;
                }
                Some(current) if current == owner => {
                    r.nest += 1;
                    return;
                }
                Some(_) => self.released.wait(&mut r),
            }
        }
    }

    /// Drops one level of `owner`'s reservation. Returns false if `owner`
    /// does not hold the lock.
    pub fn release(&self, owner: ActivityId) -> bool {
        let mut r = self.reservation.lock();
        if r.owner != Some(owner) {
            return false;
        }
        r.nest -= 1;
        if r.nest == 0 {
            r.owner = None;
            self.released.notify_all();
        }
        true
    }

    /// Hands a single-level reservation from `from` to `to`.
    ///
    /// Fails, leaving the reservation untouched, when `from` does not own
    /// the lock or holds it at a nesting depth greater than one.
    pub fn transfer(&self, from: ActivityId, to: ActivityId) -> bool {
        let mut r = self.reservation.lock();
        if r.owner != Some(from) || r.nest != 1 {
            return false;
        }
        r.owner = Some(to);
        true
    }

    pub fn owner(&self) -> Option<ActivityId> {
        self.reservation.lock().owner
    }

    pub fn nesting(&self) -> usize {
        self.reservation.lock().nest
    }

    #[inline]
    pub fn is_held_by(&self, owner: ActivityId) -> bool {
        self.owner() == Some(owner)
    }

    /// Monotonic counter bumped by every store to a watched variable.
    #[inline]
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    pub fn add_waiter(&self, waiter: Arc<dyn GuardWaiter>) {
        self.waiters.lock().push(waiter);
    }

    pub fn remove_waiter(&self, waiter: &Arc<dyn GuardWaiter>) {
        self.waiters.lock().retain(|w| !Arc::ptr_eq(w, waiter));
    }

    pub fn waiter_count(&self) -> usize {
        self.waiters.lock().len()
    }

    /// Records a change and wakes every registered waiter.
    pub fn notify_change(&self) {
        self.version.fetch_add(1, Ordering::AcqRel);
        let waiters = self.waiters.lock().clone();
        for waiter in waiters {
            waiter.wake();
        }
    }
}

/// The scope-level variable dictionary of one object.
#[derive(Debug, Default)]
pub struct ObjectScope {
    variables: Mutex<HashMap<String, VariableRef>>,
    guard: Arc<GuardLock>,
}

impl ObjectScope {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn guard(&self) -> &Arc<GuardLock> {
        &self.guard
    }

    /// Returns the variable cell for `name`, creating an unassigned one.
    pub fn variable(&self, name: &str) -> VariableRef {
        let mut vars = self.variables.lock();
        vars.entry(name.to_string())
            .or_insert_with(|| Variable::watched(name, self.guard.clone()))
            .clone()
    }

    pub fn get(&self, name: &str) -> Option<Value> {
        let var = self.variables.lock().get(name).cloned()?;
        var.get()
    }

    pub fn set(&self, name: &str, value: Value) {
        self.variable(name).set(value);
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.variables.lock().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn for_each_value(&self, visitor: &mut dyn FnMut(&Value)) {
        let vars: Vec<VariableRef> = self.variables.lock().values().cloned().collect();
        for var in vars {
            if let Some(value) = var.get() {
                visitor(&value);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{
        sync::atomic::AtomicBool,
        thread,
        time::Duration,
    };

    const A: ActivityId = ActivityId(1);
    const B: ActivityId = ActivityId(2);

    #[test]
    fn reservation_is_reentrant_per_activity() {
        let g = GuardLock::new();
        assert!(g.try_reserve(A));
        assert!(g.try_reserve(A));
        assert!(!g.try_reserve(B));
        assert_eq!(g.nesting(), 2);
        assert!(g.release(A));
        assert!(g.is_held_by(A));
        assert!(g.release(A));
        assert_eq!(g.owner(), None);
        assert!(!g.release(A));
    }

    #[test]
    fn transfer_requires_single_level() {
        let g = GuardLock::new();
        g.reserve(A);
        g.reserve(A);
        assert!(!g.transfer(A, B));
        assert!(g.release(A));
        assert!(g.transfer(A, B));
        assert!(g.is_held_by(B));
        assert!(!g.transfer(A, B));
    }

    #[test]
    fn reserve_blocks_until_release() {
        let g = Arc::new(GuardLock::new());
        g.reserve(A);
        let acquired = Arc::new(AtomicBool::new(false));
        let t = {
            let g = g.clone();
            let acquired = acquired.clone();
            thread::spawn(move || {
                g.reserve(B);
                acquired.store(true, Ordering::SeqCst);
                g.release(B);
            })
        };
        thread::sleep(Duration::from_millis(30));
        assert!(!acquired.load(Ordering::SeqCst));
        g.release(A);
        t.join().unwrap();
        assert!(acquired.load(Ordering::SeqCst));
    }

    struct Flag(AtomicBool);

    impl GuardWaiter for Flag {
        fn wake(&self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    #[test]
    fn scope_writes_wake_waiters() {
        let scope = ObjectScope::new();
        let flag = Arc::new(Flag(AtomicBool::new(false)));
        let waiter: Arc<dyn GuardWaiter> = flag.clone();
        scope.guard().add_waiter(waiter.clone());
        scope.set("COUNT", Value::whole(3));
        assert!(flag.0.load(Ordering::SeqCst));
        scope.guard().remove_waiter(&waiter);
        assert_eq!(scope.guard().waiter_count(), 0);
        assert_eq!(scope.get("COUNT"), Some(Value::whole(3)));
    }

    #[test]
    fn exposed_cells_are_shared() {
        let scope = ObjectScope::new();
        let a = scope.variable("X");
        let b = scope.variable("X");
        a.set(Value::from("shared"));
        assert_eq!(b.get(), Some(Value::from("shared")));
        assert_eq!(scope.names(), vec!["X".to_string()]);
    }
}
