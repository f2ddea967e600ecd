use std::rc::Rc;

use indexmap::IndexMap;
use tracing::debug;

use crate::ast::FunctionDef;

/// Session-wide table of user-defined functions. A later definition of a
/// name replaces the earlier one.
#[derive(Debug, Default)]
pub struct FunctionRegistry {
    functions: IndexMap<String, Rc<FunctionDef>>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `def`, returning the definition it replaced.
    pub fn register(&mut self, def: Rc<FunctionDef>) -> Option<Rc<FunctionDef>> {
        debug!(name = %def.name, arity = def.arity(), "registering function");
        self.functions.insert(def.name.clone(), def)
    }

    pub fn lookup(&self, name: &str) -> Option<Rc<FunctionDef>> {
        self.functions.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    /// Names in first-registration order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.functions.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    pub fn clear(&mut self) {
        self.functions.clear();
    }
}
