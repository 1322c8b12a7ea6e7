use object::ActivityId;
use parking_lot::{Condvar, Mutex};

#[derive(Debug, Default)]
struct LockState {
    owner: Option<ActivityId>,
    waiting: usize,
    handoffs: u64,
}

/// The interpreter-wide execution lock.
///
/// Exactly one activity runs clauses at a time. An activity gives the lock
/// up only at a cooperative yield, around blocking waits, or when it
/// finishes.
#[derive(Debug, Default)]
pub struct ExecutionLock {
    state: Mutex<LockState>,
    changed: Condvar,
}

impl ExecutionLock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn acquire(&self, activity: ActivityId) {
        let mut state = self.state.lock();
        state.waiting += 1;
        while state.owner.is_some() {
            self.changed.wait(&mut state);
        }
        state.waiting -= 1;
        state.owner = Some(activity);
        state.handoffs += 1;
    }

    pub fn release(&self, activity: ActivityId) {
        let mut state = self.state.lock();
        debug_assert_eq!(state.owner, Some(activity));
        if state.owner == Some(activity) {
            state.owner = None;
            self.changed.notify_all();
        }
    }

    /// Hands the lock to a waiting activity and takes it back afterwards.
    /// Returns false without releasing when nobody is waiting.
    pub fn yield_to_waiters(&self, activity: ActivityId) -> bool {
        let mut state = self.state.lock();
        if state.waiting == 0 || state.owner != Some(activity) {
            return false;
        }
        let seen = state.handoffs;
        state.owner = None;
        self.changed.notify_all();
        state.waiting += 1;
        while state.owner.is_some() || state.handoffs == seen {
            self.changed.wait(&mut state);
        }
        state.waiting -= 1;
        state.owner = Some(activity);
        state.handoffs += 1;
        true
    }

    pub fn owner(&self) -> Option<ActivityId> {
        self.state.lock().owner
    }

    pub fn waiting(&self) -> usize {
        self.state.lock().waiting
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{
        sync::{
            Arc,
            atomic::{AtomicBool, Ordering},
        },
        thread,
        time::Duration,
    };

    const A: ActivityId = ActivityId(1);
    const B: ActivityId = ActivityId(2);

    #[test]
    fn yield_without_waiters_keeps_lock() {
        let lock = ExecutionLock::new();
        lock.acquire(A);
        assert!(!lock.yield_to_waiters(A));
        assert_eq!(lock.owner(), Some(A));
        lock.release(A);
        assert_eq!(lock.owner(), None);
    }

    #[test]
    fn yield_hands_lock_to_waiter() {
        let lock = Arc::new(ExecutionLock::new());
        lock.acquire(A);
        let ran = Arc::new(AtomicBool::new(false));
        let t = {
            let lock = lock.clone();
            let ran = ran.clone();
            thread::spawn(move || {
                lock.acquire(B);
                ran.store(true, Ordering::SeqCst);
                lock.release(B);
            })
        };
        while lock.waiting() == 0 {
            thread::sleep(Duration::from_millis(1));
        }
        assert!(lock.yield_to_waiters(A));
        // B ran while A was yielding
        assert!(ran.load(Ordering::SeqCst));
        assert_eq!(lock.owner(), Some(A));
        lock.release(A);
        t.join().unwrap();
    }
}
