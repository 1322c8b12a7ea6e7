use std::{collections::HashMap, sync::Arc};

use object::{ObjectRef, ObjectScope, Value, Variable, VariableRef};
use parking_lot::Mutex;

/// Shared handle to a local variable frame.
///
/// Internal calls without PROCEDURE and INTERPRET run on their caller's
/// frame, so frames are shared between activations of one activity.
pub type FrameRef = Arc<Mutex<VariableFrame>>;

/// Local variable storage of one activation.
///
/// Names are stored as given; instructions upper-case them when built.
#[derive(Debug, Default)]
pub struct VariableFrame {
    locals: HashMap<String, VariableRef>,
    auto_expose: Option<ObjectRef>,
}

impl VariableFrame {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            locals: HashMap::with_capacity(capacity),
            auto_expose: None,
        }
    }

    pub fn into_ref(self) -> FrameRef {
        Arc::new(Mutex::new(self))
    }

    /// The cell for `name`, if one was ever created in this frame.
    pub fn lookup(&self, name: &str) -> Option<VariableRef> {
        self.locals.get(name).cloned()
    }

    /// The cell for `name`, creating it when missing. In auto-expose mode
    /// new cells come from the exposed object's scope.
    pub fn variable(&mut self, name: &str) -> VariableRef {
        if let Some(var) = self.locals.get(name) {
            return var.clone();
        }
        let var = match &self.auto_expose {
            Some(obj) => obj.scope().variable(name),
            None => Variable::new(name),
        };
        self.locals.insert(name.to_string(), var.clone());
        var
    }

    pub fn get(&self, name: &str) -> Option<Value> {
        self.locals.get(name).and_then(|v| v.get())
    }

    pub fn set(&mut self, name: &str, value: Value) {
        self.variable(name).set(value);
    }

    /// Drops the value but keeps the cell, so exposures stay connected.
    pub fn drop_variable(&mut self, name: &str) {
        if let Some(var) = self.locals.get(name) {
            var.drop_value();
        }
    }

    /// Shares the named cells of `parent` with this frame, creating them in
    /// `parent` when they do not exist yet.
    pub fn expose_from(&mut self, parent: &mut VariableFrame, names: &[String]) {
        for name in names {
            let var = parent.variable(name);
            self.locals.insert(name.clone(), var);
        }
    }

    /// Binds the named locals to variables of an object scope.
    pub fn expose_object(&mut self, scope: &ObjectScope, names: &[String]) {
        for name in names {
            self.locals.insert(name.clone(), scope.variable(name));
        }
    }

    pub fn set_auto_expose(&mut self, receiver: Option<ObjectRef>) {
        self.auto_expose = receiver;
    }

    #[inline]
    pub fn auto_expose(&self) -> Option<&ObjectRef> {
        self.auto_expose.as_ref()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.locals.keys().cloned().collect();
        names.sort();
        names
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.locals.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.locals.is_empty()
    }

    /// Resets the frame for reuse.
    pub fn clear(&mut self) {
        self.locals.clear();
        self.auto_expose = None;
    }

    /// Copies every binding into `into`. The cells themselves are shared,
    /// so exposed variables stay exposed.
    pub fn migrate_into(&self, into: &mut VariableFrame) {
        debug_assert!(into.is_empty());
        into.locals.extend(self.locals.iter().map(|(k, v)| (k.clone(), v.clone())));
        into.auto_expose = self.auto_expose.clone();
    }

    pub fn for_each_value(&self, visitor: &mut dyn FnMut(&Value)) {
        for var in self.locals.values() {
            if let Some(value) = var.get() {
                visitor(&value);
            }
        }
        if let Some(obj) = &self.auto_expose {
            visitor(&Value::Object(obj.clone()));
        }
    }
}
