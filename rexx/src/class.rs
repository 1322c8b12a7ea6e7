use std::{collections::HashMap, sync::Arc};

use crate::Code;

/// A method body plus its concurrency attributes.
#[derive(Debug)]
pub struct Method {
    name: String,
    code: Arc<Code>,
    guarded: bool,
    auto_expose: bool,
}

impl Method {
    /// A guarded method; use [`Method::unguarded`] to opt out.
    pub fn new(name: &str, code: Arc<Code>) -> Self {
        Self {
            name: name.to_ascii_uppercase(),
            code,
            guarded: true,
            auto_expose: false,
        }
    }

    pub fn unguarded(mut self) -> Self {
        self.guarded = false;
        self
    }

    /// New locals become object variables of the receiver.
    pub fn auto_expose(mut self) -> Self {
        self.auto_expose = true;
        self
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn code(&self) -> &Arc<Code> {
        &self.code
    }

    #[inline]
    pub fn is_guarded(&self) -> bool {
        self.guarded
    }

    #[inline]
    pub fn is_auto_expose(&self) -> bool {
        self.auto_expose
    }
}

/// A class: a method dictionary with single inheritance.
#[derive(Debug)]
pub struct Class {
    name: String,
    superclass: Option<Arc<Class>>,
    methods: HashMap<String, Arc<Method>>,
}

impl Class {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_ascii_uppercase(),
            superclass: None,
            methods: HashMap::new(),
        }
    }

    pub fn subclass_of(mut self, superclass: Arc<Class>) -> Self {
        self.superclass = Some(superclass);
        self
    }

    pub fn with_method(mut self, method: Method) -> Self {
        self.methods.insert(method.name().to_string(), Arc::new(method));
        self
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn superclass(&self) -> Option<&Arc<Class>> {
        self.superclass.as_ref()
    }

    /// Finds `name` here or in the nearest superclass defining it.
    pub fn find_method(&self, name: &str) -> Option<Arc<Method>> {
        let name = name.to_ascii_uppercase();
        let mut class = Some(self);
        while let Some(c) = class {
            if let Some(method) = c.methods.get(&name) {
                return Some(method.clone());
            }
            class = c.superclass.as_deref();
        }
        None
    }
}

/// A named external routine.
#[derive(Debug)]
pub struct Routine {
    name: String,
    code: Arc<Code>,
}

impl Routine {
    pub fn new(name: &str, code: Arc<Code>) -> Self {
        Self {
            name: name.to_ascii_uppercase(),
            code,
        }
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn code(&self) -> &Arc<Code> {
        &self.code
    }
}
