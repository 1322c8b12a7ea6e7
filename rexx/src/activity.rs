use std::sync::{
    Arc,
    atomic::{AtomicBool, AtomicU8, Ordering},
};

use heap::{MarkStats, Marker, RootProvider};
use object::{ActivityId, Value};
use parking_lot::Mutex;

use crate::{
    Activation, EvaluationStack, EvaluationStackInfo, ExecCx, FrameRef, NativeParker, Runtime,
    VariableFrame,
};

/// Storage kept per activity for reuse by later activations.
const POOL_LIMIT: usize = 32;

const TRACE_NONE: u8 = 0;
const TRACE_ON: u8 = 1;
const TRACE_OFF: u8 = 2;

/// Requests posted to an activity from other threads. They are acted on
/// at the next clause boundary.
#[derive(Debug, Default)]
pub struct Interrupts {
    halt: Mutex<Option<String>>,
    trace: AtomicU8,
    pending: AtomicBool,
}

impl Interrupts {
    pub fn request_halt(&self, description: Option<&str>) {
        *self.halt.lock() = Some(description.unwrap_or_default().to_string());
        self.pending.store(true, Ordering::Release);
    }

    pub fn request_trace(&self, on: bool) {
        self.trace.store(if on { TRACE_ON } else { TRACE_OFF }, Ordering::Release);
        self.pending.store(true, Ordering::Release);
    }

    #[inline]
    pub fn pending(&self) -> bool {
        self.pending.load(Ordering::Acquire)
    }

    pub fn halt_pending(&self) -> bool {
        self.halt.lock().is_some()
    }

    /// Clears the pending flag, returning whether it was set.
    pub fn acknowledge(&self) -> bool {
        self.pending.swap(false, Ordering::AcqRel)
    }

    pub fn take_halt(&self) -> Option<String> {
        self.halt.lock().take()
    }

    pub fn take_trace(&self) -> Option<bool> {
        match self.trace.swap(TRACE_NONE, Ordering::AcqRel) {
            TRACE_ON => Some(true),
            TRACE_OFF => Some(false),
            _ => None,
        }
    }
}

/// Counters an activity keeps while it runs; folded into the runtime
/// totals when it retires.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ActivityStats {
    pub clauses: u64,
    pub yields: u64,
    pub terminations: u64,
    pub replies: u64,
}

impl ActivityStats {
    pub fn absorb(&mut self, other: &ActivityStats) {
        self.clauses += other.clauses;
        self.yields += other.yields;
        self.terminations += other.terminations;
        self.replies += other.replies;
    }
}

#[derive(Debug, Default)]
struct FramePool {
    stacks: Vec<EvaluationStack>,
    frames: Vec<VariableFrame>,
}

/// A thread of execution: the stack of activations running on it, its
/// storage pool and its interrupt mailbox.
///
/// An activity runs clauses only while it holds the runtime's execution
/// lock.
pub struct Activity {
    id: ActivityId,
    runtime: Runtime,
    pub(crate) frames: Vec<Activation>,
    pub(crate) interrupts: Arc<Interrupts>,
    pub(crate) parker: Arc<NativeParker>,
    pub(crate) stats: ActivityStats,
    pool: FramePool,
    holds_lock: bool,
}

impl Activity {
    pub(crate) fn new(id: ActivityId, runtime: Runtime) -> Self {
        Self {
            id,
            runtime,
            frames: Vec::new(),
            interrupts: Arc::new(Interrupts::default()),
            parker: Arc::new(NativeParker::new()),
            stats: ActivityStats::default(),
            pool: FramePool::default(),
            holds_lock: false,
        }
    }

    #[inline]
    pub fn id(&self) -> ActivityId {
        self.id
    }

    #[inline]
    pub fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    #[inline]
    pub fn stats(&self) -> ActivityStats {
        self.stats
    }

    #[inline]
    pub fn interrupts(&self) -> &Arc<Interrupts> {
        &self.interrupts
    }

    // ── Execution lock ─────────────────────────────────────────────

    pub(crate) fn acquire_lock(&mut self) {
        if !self.holds_lock {
            self.runtime.lock().acquire(self.id);
            self.holds_lock = true;
        }
    }

    pub(crate) fn release_lock(&mut self) {
        if self.holds_lock {
            self.runtime.lock().release(self.id);
            self.holds_lock = false;
        }
    }

    /// Cooperative yield: lets a waiting activity run one turn.
    pub(crate) fn relinquish(&mut self) {
        if self.holds_lock && self.runtime.lock().yield_to_waiters(self.id) {
            self.stats.yields += 1;
            log::trace!("{} yielded the execution lock", self.id);
        }
    }

    // ── Storage ────────────────────────────────────────────────────

    pub(crate) fn allocate_stack(&mut self) -> EvaluationStack {
        match self.pool.stacks.pop() {
            Some(mut stack) => {
                stack.set_owner(self.id);
                stack
            }
            None => EvaluationStack::new(&EvaluationStackInfo {
                capacity: self.runtime.settings().stack_capacity,
                owner: Some(self.id),
            }),
        }
    }

    pub(crate) fn allocate_frame(&mut self) -> VariableFrame {
        self.pool
            .frames
            .pop()
            .unwrap_or_else(|| VariableFrame::with_capacity(self.runtime.settings().frame_capacity))
    }

    pub(crate) fn release_stack(&mut self, mut stack: EvaluationStack) {
        stack.clear();
        if self.pool.stacks.len() < POOL_LIMIT {
            self.pool.stacks.push(stack);
        }
    }

    /// Returns a variable frame to the pool once no other level shares it.
    pub(crate) fn release_frame(&mut self, frame: FrameRef) {
        let Ok(frame) = Arc::try_unwrap(frame) else {
            return;
        };
        let mut frame = frame.into_inner();
        frame.clear();
        if self.pool.frames.len() < POOL_LIMIT {
            self.pool.frames.push(frame);
        }
    }

    pub(crate) fn release_storage(&mut self, act: &mut Activation) {
        let stack = std::mem::take(&mut act.stack);
        self.release_stack(stack);
        let frame = std::mem::replace(&mut act.variables, VariableFrame::default().into_ref());
        self.release_frame(frame);
    }

    pub fn pooled(&self) -> (usize, usize) {
        (self.pool.stacks.len(), self.pool.frames.len())
    }
}

impl Drop for Activity {
    fn drop(&mut self) {
        self.release_lock();
    }
}

impl RootProvider for Activity {
    fn visit_roots(&self, visitor: &mut dyn FnMut(&Value)) {
        for frame in &self.frames {
            frame.visit_roots(visitor);
        }
    }
}

impl ExecCx<'_> {
    /// Reports everything the running activity keeps alive.
    pub fn mark_roots(&self) -> MarkStats {
        let mut marker = Marker::new();
        marker.mark_roots(&*self.activity);
        marker.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BufferHost, RuntimeCreateInfo};

    fn activity() -> Activity {
        let runtime = Runtime::new(RuntimeCreateInfo::new(Arc::new(BufferHost::new()))).unwrap();
        runtime.create_activity()
    }

    #[test]
    fn interrupts_are_taken_once() {
        let interrupts = Interrupts::default();
        assert!(!interrupts.pending());
        interrupts.request_halt(Some("stop"));
        interrupts.request_trace(false);
        assert!(interrupts.pending());
        assert!(interrupts.halt_pending());
        assert!(interrupts.acknowledge());
        assert!(!interrupts.acknowledge());
        assert_eq!(interrupts.take_halt().as_deref(), Some("stop"));
        assert_eq!(interrupts.take_halt(), None);
        assert_eq!(interrupts.take_trace(), Some(false));
        assert_eq!(interrupts.take_trace(), None);
    }

    #[test]
    fn stats_absorb() {
        let mut total = ActivityStats { clauses: 3, ..Default::default() };
        total.absorb(&ActivityStats { clauses: 2, yields: 1, terminations: 4, replies: 1 });
        assert_eq!(total, ActivityStats { clauses: 5, yields: 1, terminations: 4, replies: 1 });
    }

    #[test]
    fn storage_is_pooled_and_reowned() {
        let mut a = activity();
        let mut stack = a.allocate_stack();
        assert_eq!(stack.owner(), Some(a.id()));
        stack.push(Value::from("left over"));
        a.release_stack(stack);

        let mut frame = a.allocate_frame();
        frame.set("X", Value::whole(1));
        a.release_frame(frame.into_ref());
        assert_eq!(a.pooled(), (1, 1));

        assert!(a.allocate_stack().is_empty());
        assert!(a.allocate_frame().is_empty());
        assert_eq!(a.pooled(), (0, 0));
    }

    #[test]
    fn shared_frames_are_not_pooled() {
        let mut a = activity();
        let frame = a.allocate_frame().into_ref();
        let shared = Arc::clone(&frame);
        a.release_frame(frame);
        assert_eq!(a.pooled(), (0, 0));
        drop(shared);
    }

    #[test]
    fn lock_is_released_on_drop() {
        let mut a = activity();
        let runtime = a.runtime().clone();
        a.acquire_lock();
        assert_eq!(runtime.lock().owner(), Some(a.id()));
        drop(a);
        assert_eq!(runtime.lock().owner(), None);
    }
}
