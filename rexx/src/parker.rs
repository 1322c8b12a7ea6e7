use std::sync::atomic::{
    AtomicU8,
    Ordering::{AcqRel, Acquire, Relaxed, Release},
};

use object::GuardWaiter;
use parking_lot::{Condvar, Mutex};

const PARKED: u8 = 0b01;
const TOKEN: u8 = 0b10;

/// One-token park/unpark primitive an activity blocks on during a guard
/// wait. An unpark that arrives before the park is remembered.
#[derive(Debug, Default)]
pub struct NativeParker {
    state: AtomicU8,
    lock: Mutex<()>,
    cv: Condvar,
}

impl NativeParker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn park(&self) {
        // Fast path: unpark before park => just ignore
        if self.try_consume_token() {
            return;
        }

        self.state.fetch_or(PARKED, Release);

        if self.try_consume_token() {
            self.state.fetch_and(!PARKED, AcqRel);
            return;
        }

        let mut guard = self.lock.lock();
        loop {
            if self.try_consume_token() {
                break;
            }
            self.cv.wait(&mut guard);
        }
        drop(guard);

        self.state.fetch_and(!PARKED, AcqRel);
    }

    #[inline]
    fn try_consume_token(&self) -> bool {
        let mut s = self.state.load(Acquire);
        while s & TOKEN != 0 {
            match self.state.compare_exchange_weak(s, s & !TOKEN, AcqRel, Relaxed) {
                Ok(_) => return true,
                Err(cur) => s = cur,
            }
        }
        false
    }

    pub fn unpark(&self) {
        let prev = self.state.fetch_or(TOKEN, Release);

        if prev & PARKED != 0 {
            let _g = self.lock.lock();
            self.cv.notify_one();
        }
    }
}

impl GuardWaiter for NativeParker {
    fn wake(&self) {
        self.unpark();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::NativeThread;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering::SeqCst};
    use std::time::{Duration, Instant};

    fn make_parker() -> Arc<NativeParker> {
        Arc::new(NativeParker::new())
    }

    fn wait_for(flag: &AtomicBool) -> bool {
        let start = Instant::now();
        while !flag.load(SeqCst) && start.elapsed() < Duration::from_secs(1) {
            std::thread::sleep(Duration::from_millis(5));
        }
        flag.load(SeqCst)
    }

    #[test]
    fn early_unpark_leaves_one_token() {
        let p = make_parker();
        p.unpark();
        p.unpark();
        assert_eq!(p.state.load(Acquire), TOKEN);
        assert!(p.try_consume_token());
        assert!(!p.try_consume_token());
    }

    #[test]
    fn racing_consumers_take_the_token_once() {
        let p = make_parker();
        p.unpark();
        let taken = Arc::new(AtomicU8::new(0));
        let racers: Vec<_> = (0..8)
            .map(|i| {
                let p = p.clone();
                let taken = taken.clone();
                NativeThread::spawn(format!("racer-{i}"), move || {
                    if p.try_consume_token() {
                        taken.fetch_add(1, AcqRel);
                    }
                })
            })
            .collect();
        racers.iter().for_each(|r| r.join());
        assert_eq!(taken.load(Acquire), 1);
    }

    #[test]
    fn park_blocks_until_unpark() {
        let parker = make_parker();
        let returned = Arc::new(AtomicBool::new(false));

        let nt = NativeThread::spawn("parked", {
            let parker = parker.clone();
            let returned = returned.clone();
            move || {
                parker.park();
                returned.store(true, SeqCst);
            }
        });

        std::thread::sleep(Duration::from_millis(50));
        assert!(!returned.load(SeqCst), "park() returned too early without unpark");

        parker.unpark();
        assert!(wait_for(&returned), "park() did not return after unpark()");
        nt.join();
        assert_eq!(parker.state.load(Acquire) & (PARKED | TOKEN), 0);
    }

    #[test]
    fn pre_delivered_token_means_no_block() {
        let parker = make_parker();
        parker.unpark();
        let start = Instant::now();
        parker.park();
        assert!(start.elapsed() < Duration::from_millis(50));
    }

    #[test]
    fn guard_notification_wakes_parked_waiter() {
        let guard = Arc::new(object::GuardLock::new());
        let parker = make_parker();
        let waiter: Arc<dyn GuardWaiter> = parker.clone();
        guard.add_waiter(waiter.clone());

        let woke = Arc::new(AtomicBool::new(false));
        let nt = NativeThread::spawn("guard-waiter", {
            let parker = parker.clone();
            let woke = woke.clone();
            move || {
                parker.park();
                woke.store(true, SeqCst);
            }
        });

        std::thread::sleep(Duration::from_millis(30));
        guard.notify_change();
        assert!(wait_for(&woke));
        nt.join();
        guard.remove_waiter(&waiter);
    }
}
