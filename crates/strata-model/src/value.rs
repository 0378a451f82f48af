use indexmap::IndexMap;

use crate::record::Record;

/// A dynamically typed value in a record graph.
///
/// Values form an owned tree: lists and maps recurse, and nested records
/// appear as [`Value::Record`]. Because the tree is owned, cyclic graphs are
/// unrepresentable by construction.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    /// 64-bit integer. Enums enter the model as their underlying integer.
    Int(i64),
    Float(f64),
    Text(String),
    List(Vec<Value>),
    /// String-keyed map; key order is preserved.
    Map(IndexMap<String, Value>),
    Record(Box<Record>),
}

/// Coarse classification of a [`Value`], used by the registry to describe
/// the expected shape of typed properties.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ValueKind {
    Bool,
    Int,
    Float,
    Text,
    List,
    Map,
    Record,
}

impl Value {
    /// The kind of this value, or `None` for nulls.
    pub fn kind(&self) -> Option<ValueKind> {
        match self {
            Value::Null => None,
            Value::Bool(_) => Some(ValueKind::Bool),
            Value::Int(_) => Some(ValueKind::Int),
            Value::Float(_) => Some(ValueKind::Float),
            Value::Text(_) => Some(ValueKind::Text),
            Value::List(_) => Some(ValueKind::List),
            Value::Map(_) => Some(ValueKind::Map),
            Value::Record(_) => Some(ValueKind::Record),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_record(&self) -> Option<&Record> {
        match self {
            Value::Record(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Checks whether this value can populate a typed property of `kind`.
    ///
    /// Integers are accepted where floats are expected (lossy widening is
    /// the caller's concern); everything else must match exactly.
    pub fn matches_kind(&self, kind: ValueKind) -> bool {
        match (self.kind(), kind) {
            (None, _) => true,
            (Some(ValueKind::Int), ValueKind::Float) => true,
            (Some(k), expected) => k == expected,
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(i64::from(v))
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_owned())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<Record> for Value {
    fn from(v: Record) -> Self {
        Value::Record(Box::new(v))
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Value::List(v.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(inner) => inner.into(),
            None => Value::Null,
        }
    }
}

impl From<IndexMap<String, Value>> for Value {
    fn from(v: IndexMap<String, Value>) -> Self {
        Value::Map(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_classification() {
        assert_eq!(Value::Null.kind(), None);
        assert_eq!(Value::Int(1).kind(), Some(ValueKind::Int));
        assert_eq!(Value::Text("x".into()).kind(), Some(ValueKind::Text));
        assert_eq!(Value::List(vec![]).kind(), Some(ValueKind::List));
    }

    #[test]
    fn int_satisfies_float_expectation() {
        assert!(Value::Int(3).matches_kind(ValueKind::Float));
        assert!(!Value::Float(3.0).matches_kind(ValueKind::Int));
    }

    #[test]
    fn null_matches_any_kind() {
        assert!(Value::Null.matches_kind(ValueKind::Record));
        assert!(Value::Null.matches_kind(ValueKind::Bool));
    }

    #[test]
    fn from_conversions() {
        assert_eq!(Value::from(true), Value::Bool(true));
        assert_eq!(Value::from(7i64), Value::Int(7));
        assert_eq!(Value::from("hi"), Value::Text("hi".into()));
        assert_eq!(
            Value::from(vec![1i64, 2, 3]),
            Value::List(vec![Value::Int(1), Value::Int(2), Value::Int(3)])
        );
        assert_eq!(Value::from(None::<i64>), Value::Null);
    }
}
