use std::sync::Arc;

use parking_lot::Mutex;

use crate::{GuardLock, Value};

/// Shared handle to a variable cell. Exposing a variable shares the cell.
pub type VariableRef = Arc<Variable>;

/// A single named variable.
///
/// Cells that live in an object scope carry the scope's guard lock as a
/// watcher: every store wakes activities blocked in a guard wait.
#[derive(Debug)]
pub struct Variable {
    name: Arc<str>,
    value: Mutex<Option<Value>>,
    watcher: Option<Arc<GuardLock>>,
}

impl Variable {
    pub fn new(name: &str) -> VariableRef {
        Arc::new(Self {
            name: Arc::from(name),
            value: Mutex::new(None),
            watcher: None,
        })
    }

    pub fn watched(name: &str, watcher: Arc<GuardLock>) -> VariableRef {
        Arc::new(Self {
            name: Arc::from(name),
            value: Mutex::new(None),
            watcher: Some(watcher),
        })
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn get(&self) -> Option<Value> {
        self.value.lock().clone()
    }

    #[inline]
    pub fn is_assigned(&self) -> bool {
        self.value.lock().is_some()
    }

    pub fn set(&self, value: Value) {
        *self.value.lock() = Some(value);
        self.changed();
    }

    pub fn drop_value(&self) {
        *self.value.lock() = None;
        self.changed();
    }

    #[inline]
    pub fn is_watched(&self) -> bool {
        self.watcher.is_some()
    }

    fn changed(&self) {
        if let Some(watcher) = &self.watcher {
            watcher.notify_change();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_get_drop() {
        let v = Variable::new("X");
        assert!(!v.is_assigned());
        v.set(Value::from("1"));
        assert_eq!(v.get(), Some(Value::from("1")));
        v.drop_value();
        assert_eq!(v.get(), None);
    }

    #[test]
    fn watched_store_bumps_guard_version() {
        let guard = Arc::new(GuardLock::new());
        let v = Variable::watched("COUNT", guard.clone());
        let before = guard.version();
        v.set(Value::whole(1));
        assert!(guard.version() > before);
    }
}
