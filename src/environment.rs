use std::{cell::RefCell, rc::Rc};

use indexmap::IndexMap;

use crate::{
    diagnostics::{Diagnostic, DiagnosticKind},
    value::Value,
};

/// Maximum number of distinct names one frame can hold.
pub const MAX_BINDINGS: usize = 256;

pub type EnvironmentRef = Rc<RefCell<Environment>>;

/// One binding frame. Lookups walk the parent chain; writes only ever
/// touch the frame they are made in.
#[derive(Debug, Default)]
pub struct Environment {
    parent: Option<EnvironmentRef>,
    bindings: IndexMap<String, Value>,
}

impl Environment {
    pub fn new() -> EnvironmentRef {
        Rc::new(RefCell::new(Self::default()))
    }

    pub fn with_parent(parent: EnvironmentRef) -> EnvironmentRef {
        Rc::new(RefCell::new(Self {
            parent: Some(parent),
            bindings: IndexMap::new(),
        }))
    }

    /// Binds or rebinds `name` in this frame. A new name that would exceed
    /// [`MAX_BINDINGS`] is rejected and nothing is stored.
    pub fn define(&mut self, name: &str, value: Value) -> Result<(), Diagnostic> {
        if let Some(slot) = self.bindings.get_mut(name) {
            *slot = value;
            return Ok(());
        }
        if self.bindings.len() >= MAX_BINDINGS {
            return Err(Diagnostic::new(
                DiagnosticKind::Runtime,
                format!("frame holds {MAX_BINDINGS} names already, `{name}` was not bound"),
            ));
        }
        self.bindings.insert(name.to_owned(), value);
        Ok(())
    }

    pub fn get(env: &EnvironmentRef, name: &str) -> Option<Value> {
        let mut frame = Rc::clone(env);
        loop {
            let parent = {
                let scope = frame.borrow();
                if let Some(value) = scope.bindings.get(name) {
                    return Some(value.clone());
                }
                scope.parent.clone()
            };
            frame = parent?;
        }
    }

    pub fn get_local(&self, name: &str) -> Option<&Value> {
        self.bindings.get(name)
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    pub fn clear(&mut self) {
        self.bindings.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookups_walk_the_parent_chain() {
        let globals = Environment::new();
        globals.borrow_mut().define("x", Value::Int(1)).unwrap();
        let frame = Environment::with_parent(Rc::clone(&globals));
        frame.borrow_mut().define("x", Value::Int(2)).unwrap();

        assert_eq!(Environment::get(&frame, "x"), Some(Value::Int(2)));
        assert_eq!(Environment::get(&globals, "x"), Some(Value::Int(1)));
        assert_eq!(Environment::get(&frame, "missing"), None);
    }

    #[test]
    fn frames_are_bounded() {
        let env = Environment::new();
        let mut scope = env.borrow_mut();
        for idx in 0..MAX_BINDINGS {
            scope.define(&format!("v{idx}"), Value::Int(idx as i64)).unwrap();
        }
        assert!(scope.define("overflow", Value::None).is_err());
        assert!(scope.define("v0", Value::Int(-1)).is_ok());
        assert_eq!(scope.len(), MAX_BINDINGS);
        assert_eq!(scope.get_local("v0"), Some(&Value::Int(-1)));

        scope.clear();
        assert!(scope.is_empty());
    }
}
