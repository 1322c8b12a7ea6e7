use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use crate::{ObjectRef, ObjectScope};

static NEXT_OBJECT_ID: AtomicU64 = AtomicU64::new(1);

/// An instance of a user class.
///
/// The object itself only carries identity, its class name and the scope
/// dictionary with the object variables; methods are resolved by the
/// runtime through the class name.
#[derive(Debug)]
pub struct RexxObject {
    id: u64,
    class_name: String,
    scope: ObjectScope,
}

impl RexxObject {
    pub fn new(class_name: &str) -> ObjectRef {
        Arc::new(Self {
            id: NEXT_OBJECT_ID.fetch_add(1, Ordering::Relaxed),
            class_name: class_name.to_ascii_uppercase(),
            scope: ObjectScope::new(),
        })
    }

    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[inline]
    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    #[inline]
    pub fn scope(&self) -> &ObjectScope {
        &self.scope
    }

    /// "a POINT", "an ACCOUNT"
    pub fn default_name(&self) -> String {
        let article = match self.class_name.chars().next() {
            Some('A' | 'E' | 'I' | 'O' | 'U') => "an",
            _ => "a",
        };
        format!("{article} {}", self.class_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique() {
        let a = RexxObject::new("point");
        let b = RexxObject::new("point");
        assert_ne!(a.id(), b.id());
        assert_eq!(a.class_name(), "POINT");
    }

    #[test]
    fn default_name_uses_article() {
        assert_eq!(RexxObject::new("Account").default_name(), "an ACCOUNT");
        assert_eq!(RexxObject::new("Point").default_name(), "a POINT");
    }
}
