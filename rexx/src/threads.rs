use std::{
    sync::Arc,
    thread::{self, JoinHandle},
    time::Duration,
};

use parking_lot::{Condvar, Mutex};

/// An OS thread that can be joined from any thread, with or without a
/// timeout. Replied activities run on these.
#[derive(Debug)]
pub struct NativeThread {
    name: String,
    handle: Mutex<Option<JoinHandle<()>>>,
    done: (Mutex<bool>, Condvar),
}

/// Marks the thread finished when the body returns or unwinds.
struct Done(Arc<NativeThread>);

impl Drop for Done {
    fn drop(&mut self) {
        self.0.mark_done();
    }
}

impl NativeThread {
    pub fn spawn<F>(name: impl Into<String>, f: F) -> Arc<Self>
    where
        F: FnOnce() + Send + 'static,
    {
        let jt = Arc::new(Self {
            name: name.into(),
            handle: Mutex::new(None),
            done: (Mutex::new(false), Condvar::new()),
        });

        let jt2 = Arc::clone(&jt);
        let builder = thread::Builder::new().name(jt.name.clone());
        let spawned = builder.spawn(move || {
            let _done = Done(jt2);
            f();
        });
        match spawned {
            Ok(h) => *jt.handle.lock() = Some(h),
            Err(err) => {
                log::error!("failed to spawn thread {}: {err}", jt.name);
                jt.mark_done();
            }
        }
        jt
    }

    fn mark_done(&self) {
        let (ref mx, ref cv) = self.done;
        *mx.lock() = true;
        cv.notify_all();
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_finished(&self) -> bool {
        *self.done.0.lock()
    }

    /// Waits at most `dur`. Returns whether the thread has finished.
    pub fn join_timeout(&self, dur: Duration) -> bool {
        let (ref mx, ref cv) = self.done;
        let mut done = mx.lock();
        if *done {
            return true;
        }
        let res = cv.wait_for(&mut done, dur);
        *done || !res.timed_out()
    }

    pub fn join(&self) {
        let handle = self.handle.lock().take();
        if let Some(h) = handle {
            if h.join().is_err() {
                log::error!("thread {} panicked", self.name);
            }
            self.mark_done();
            return;
        }

        let (ref mx, ref cv) = self.done;
        let mut done = mx.lock();
        while !*done {
            cv.wait(&mut done);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn join_waits_for_completion() {
        let counter = Arc::new(AtomicUsize::new(0));
        let t = NativeThread::spawn("worker", {
            let counter = counter.clone();
            move || {
                thread::sleep(Duration::from_millis(20));
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });
        t.join();
        assert!(t.is_finished());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        // joining twice is fine
        t.join();
    }

    #[test]
    fn join_timeout_reports_running_thread() {
        let gate = Arc::new((Mutex::new(false), Condvar::new()));
        let t = NativeThread::spawn("gated", {
            let gate = gate.clone();
            move || {
                let (ref mx, ref cv) = *gate;
                let mut open = mx.lock();
                while !*open {
                    cv.wait(&mut open);
                }
            }
        });
        assert!(!t.join_timeout(Duration::from_millis(20)));
        {
            let (ref mx, ref cv) = *gate;
            *mx.lock() = true;
            cv.notify_all();
        }
        assert!(t.join_timeout(Duration::from_secs(2)));
        assert_eq!(t.name(), "gated");
    }

    #[test]
    fn panicking_body_still_finishes() {
        let t = NativeThread::spawn("doomed", || panic!("body failed"));
        assert!(t.join_timeout(Duration::from_secs(2)));
        assert!(t.is_finished());
        t.join();
    }
}
