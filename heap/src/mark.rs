use std::collections::HashSet;

use object::Value;

/// Consumers implement this to provide GC roots.
///
/// Called during a collection pass to discover live roots from engine
/// state (evaluation stacks, variable frames, trap tables, pending
/// conditions). Objects are reference counted and never move, so the
/// visitor only needs shared access.
pub trait RootProvider {
    fn visit_roots(&self, visitor: &mut dyn FnMut(&Value));
}

/// Counters gathered by one marking pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MarkStats {
    /// Root values handed to the marker (duplicates included).
    pub roots: usize,
    /// Distinct objects reached.
    pub objects: usize,
    /// String values reached.
    pub strings: usize,
}

/// Reachability pass over the object graph.
///
/// Starting from the roots, follows every object reference into the
/// object's scope variables. Each object is traced once.
#[derive(Debug, Default)]
pub struct Marker {
    marked: HashSet<u64>,
    stats: MarkStats,
}

impl Marker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_roots(&mut self, provider: &dyn RootProvider) {
        let mut roots = Vec::new();
        provider.visit_roots(&mut |v| roots.push(v.clone()));
        self.stats.roots += roots.len();
        for root in roots {
            self.mark_value(&root);
        }
    }

    /// Marks `value` and everything reachable from it.
    pub fn mark_value(&mut self, value: &Value) {
        let mut worklist = vec![value.clone()];
        while let Some(value) = worklist.pop() {
            match value {
                Value::Nil => {}
                Value::Str(_) => self.stats.strings += 1,
                Value::Object(obj) => {
                    if !self.marked.insert(obj.id()) {
                        continue;
                    }
                    self.stats.objects += 1;
                    obj.scope().for_each_value(&mut |v| worklist.push(v.clone()));
                }
            }
        }
    }

    #[inline]
    pub fn is_marked(&self, object_id: u64) -> bool {
        self.marked.contains(&object_id)
    }

    #[inline]
    pub fn stats(&self) -> MarkStats {
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use object::RexxObject;

    struct Roots(Vec<Value>);

    impl RootProvider for Roots {
        fn visit_roots(&self, visitor: &mut dyn FnMut(&Value)) {
            self.0.iter().for_each(|v| visitor(v));
        }
    }

    #[test]
    fn follows_object_variables() {
        let outer = RexxObject::new("Outer");
        let inner = RexxObject::new("Inner");
        let stray = RexxObject::new("Stray");
        outer.scope().set("CHILD", Value::from(inner.clone()));
        outer.scope().set("NAME", Value::from("x"));

        let mut marker = Marker::new();
        marker.mark_roots(&Roots(vec![Value::from(outer.clone()), Value::Nil]));

        assert!(marker.is_marked(outer.id()));
        assert!(marker.is_marked(inner.id()));
        assert!(!marker.is_marked(stray.id()));
        assert_eq!(marker.stats().roots, 2);
        assert_eq!(marker.stats().objects, 2);
        assert_eq!(marker.stats().strings, 1);
    }

    #[test]
    fn cycles_are_traced_once() {
        let a = RexxObject::new("Node");
        let b = RexxObject::new("Node");
        a.scope().set("NEXT", Value::from(b.clone()));
        b.scope().set("NEXT", Value::from(a.clone()));

        let mut marker = Marker::new();
        marker.mark_value(&Value::from(a.clone()));
        assert_eq!(marker.stats().objects, 2);

        // break the cycle so the test does not leak
        a.scope().set("NEXT", Value::Nil);
    }
}
