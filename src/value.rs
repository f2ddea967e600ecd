use std::{cell::RefCell, fmt, rc::Rc};

/// Shared handle to a list's backing array. Cloning the handle aliases
/// the array; mutation through one handle is visible through all.
pub type ListRef = Rc<RefCell<Vec<Value>>>;

/// Immutable byte string. Clones share one allocation, which is released
/// when the last holder drops it.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PyStr(Rc<[u8]>);

impl PyStr {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn to_string_lossy(&self) -> String {
        String::from_utf8_lossy(&self.0).into_owned()
    }
}

impl From<Rc<[u8]>> for PyStr {
    fn from(bytes: Rc<[u8]>) -> Self {
        Self(bytes)
    }
}

impl From<Vec<u8>> for PyStr {
    fn from(bytes: Vec<u8>) -> Self {
        Self(Rc::from(bytes))
    }
}

impl From<&[u8]> for PyStr {
    fn from(bytes: &[u8]) -> Self {
        Self(Rc::from(bytes))
    }
}

impl From<&str> for PyStr {
    fn from(text: &str) -> Self {
        Self::from(text.as_bytes())
    }
}

impl From<String> for PyStr {
    fn from(text: String) -> Self {
        Self::from(text.into_bytes())
    }
}

impl fmt::Debug for PyStr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", String::from_utf8_lossy(&self.0))
    }
}

impl fmt::Display for PyStr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from_utf8_lossy(&self.0))
    }
}

/// A runtime value. Equality is structural, so two distinct lists with
/// equal contents compare equal; use [`Value::same_list`] for identity.
#[derive(Clone, Default, PartialEq)]
pub enum Value {
    #[default]
    None,
    Int(i64),
    Str(PyStr),
    List(ListRef),
}

impl Value {
    pub fn str(text: impl Into<PyStr>) -> Self {
        Value::Str(text.into())
    }

    pub fn list(items: Vec<Value>) -> Self {
        Value::List(Rc::new(RefCell::new(items)))
    }

    pub fn bool(flag: bool) -> Self {
        Value::Int(i64::from(flag))
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Value::None)
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            Value::None => false,
            Value::Int(n) => *n != 0,
            Value::Str(s) => !s.is_empty(),
            Value::List(items) => !items.borrow().is_empty(),
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::None => "none",
            Value::Int(_) => "int",
            Value::Str(_) => "str",
            Value::List(_) => "list",
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&PyStr> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&ListRef> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    /// True when both values are lists sharing one backing array.
    pub fn same_list(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::List(a), Value::List(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// Copy of a list's current elements.
    pub fn list_snapshot(&self) -> Option<Vec<Value>> {
        self.as_list().map(|items| items.borrow().clone())
    }

    /// Bytes `print` writes for this value. Lists show their elements one
    /// level deep; a nested list renders as `[...]`.
    pub fn render(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.render_into(&mut out, false);
        out
    }

    pub(crate) fn render_into(&self, out: &mut Vec<u8>, nested: bool) {
        match self {
            Value::None => out.extend_from_slice(b"None"),
            Value::Int(n) => out.extend_from_slice(n.to_string().as_bytes()),
            Value::Str(s) => out.extend_from_slice(s.as_bytes()),
            Value::List(_) if nested => out.extend_from_slice(b"[...]"),
            Value::List(items) => {
                out.push(b'[');
                for (idx, item) in items.borrow().iter().enumerate() {
                    if idx > 0 {
                        out.extend_from_slice(b", ");
                    }
                    item.render_into(out, true);
                }
                out.push(b']');
            }
        }
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<&str> for Value {
    fn from(text: &str) -> Self {
        Value::str(text)
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::None => write!(f, "None"),
            Value::Int(n) => write!(f, "{n}"),
            Value::Str(s) => write!(f, "{s:?}"),
            Value::List(items) => f.debug_list().entries(items.borrow().iter()).finish(),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from_utf8_lossy(&self.render()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truthiness() {
        assert!(!Value::None.is_truthy());
        assert!(!Value::Int(0).is_truthy());
        assert!(Value::Int(-3).is_truthy());
        assert!(!Value::str("").is_truthy());
        assert!(Value::str("x").is_truthy());
        assert!(!Value::list(vec![]).is_truthy());
        assert!(Value::list(vec![Value::None]).is_truthy());
    }

    #[test]
    fn renders_lists_one_level_deep() {
        let inner = Value::list(vec![Value::Int(1)]);
        let outer = Value::list(vec![Value::Int(1), Value::str("a b"), inner, Value::None]);
        assert_eq!(outer.to_string(), "[1, a b, [...], None]");
    }

    #[test]
    fn cloned_list_handles_alias() {
        let a = Value::list(vec![Value::Int(1)]);
        let b = a.clone();
        b.as_list().expect("list").borrow_mut().push(Value::Int(2));
        assert!(a.same_list(&b));
        assert_eq!(a.list_snapshot().map(|items| items.len()), Some(2));
        let c = Value::list(vec![Value::Int(1), Value::Int(2)]);
        assert_eq!(a, c);
        assert!(!a.same_list(&c));
    }
}
