use object::{ActivityId, Value};

/// Operand stack used while evaluating the sub-expressions of one clause.
///
/// Cleared at every clause boundary; anything still on it is a collector
/// root until then.
#[derive(Debug, Clone, Default)]
pub struct EvaluationStack {
    values: Vec<Value>,
    marks: Vec<usize>,
    owner: Option<ActivityId>,
}

#[derive(Debug, Clone, Default)]
pub struct EvaluationStackInfo {
    pub capacity: usize,
    pub owner: Option<ActivityId>,
}

impl EvaluationStack {
    #[must_use]
    pub fn new(info: &EvaluationStackInfo) -> Self {
        Self {
            values: Vec::with_capacity(info.capacity),
            marks: Vec::new(),
            owner: info.owner,
        }
    }

    /// The activity whose storage this stack lives in.
    #[inline]
    pub fn owner(&self) -> Option<ActivityId> {
        self.owner
    }

    pub(crate) fn set_owner(&mut self, owner: ActivityId) {
        self.owner = Some(owner);
    }

    #[inline]
    pub fn push(&mut self, value: Value) {
        self.values.push(value);
    }

    #[inline]
    pub fn pop(&mut self) -> Option<Value> {
        self.values.pop()
    }

    /// Pops the top `n` values, returned in push order.
    pub fn pop_n(&mut self, n: usize) -> Vec<Value> {
        let at = self.values.len().saturating_sub(n);
        self.values.split_off(at)
    }

    /// Remembers the current depth so a failed sub-evaluation can be
    /// discarded with [`EvaluationStack::reset_to_mark`].
    pub fn mark(&mut self) -> usize {
        let depth = self.values.len();
        self.marks.push(depth);
        depth
    }

    /// Drops everything pushed since the most recent mark and forgets the mark.
    pub fn reset_to_mark(&mut self) {
        if let Some(depth) = self.marks.pop() {
            self.values.truncate(depth);
        }
    }

    /// Forgets the most recent mark, keeping the values.
    pub fn release_mark(&mut self) {
        self.marks.pop();
    }

    /// Empties the stack. The references it held are released immediately.
    pub fn clear(&mut self) {
        self.values.clear();
        self.marks.clear();
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.values.capacity()
    }

    pub fn as_slice(&self) -> &[Value] {
        &self.values
    }

    /// Copies contents and marks into `into`, which must be empty.
    pub fn migrate_into(&self, into: &mut EvaluationStack) {
        debug_assert!(into.is_empty());
        into.values.extend(self.values.iter().cloned());
        into.marks.extend_from_slice(&self.marks);
    }

    pub fn for_each_value(&self, visitor: &mut dyn FnMut(&Value)) {
        self.values.iter().for_each(|v| visitor(v));
    }
}
