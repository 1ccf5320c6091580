//! Resolved parameter values.

use serde::{Deserialize, Serialize};

use super::{Key, Literal};

/// Outcome of resolving one argument slot.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Value {
    /// A literal with no identity.
    Raw { value: Literal },
    /// The value of a known data node.
    Ready { key: Key, value: Literal },
    /// The future return value of another task.
    Generated { producer: Key },
}

impl Value {
    pub fn raw(value: impl Into<Literal>) -> Self {
        Value::Raw { value: value.into() }
    }

    pub fn ready(key: impl Into<Key>, value: impl Into<Literal>) -> Self {
        Value::Ready { key: key.into(), value: value.into() }
    }

    pub fn generated(producer: impl Into<Key>) -> Self {
        Value::Generated { producer: producer.into() }
    }

    pub fn producer(&self) -> Option<&Key> {
        match self {
            Value::Generated { producer } => Some(producer),
            _ => None,
        }
    }
}

/// `Raw` compares by value, `Ready` by key and value, `Generated` by producer.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Raw { value: a }, Value::Raw { value: b }) => a == b,
            (Value::Ready { key: ka, value: va }, Value::Ready { key: kb, value: vb }) => {
                ka == kb && va == vb
            }
            (Value::Generated { producer: a }, Value::Generated { producer: b }) => a == b,
            _ => false,
        }
    }
}

// ============================================================================
// ValueSet
// ============================================================================

/// Set of values that keeps first-insertion order, so exported documents are
/// stable across runs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValueSet(Vec<Value>);

impl ValueSet {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Returns `false` when an equal value is already present.
    pub fn insert(&mut self, value: Value) -> bool {
        if self.0.contains(&value) {
            return false;
        }
        self.0.push(value);
        true
    }

    pub fn contains(&self, value: &Value) -> bool { self.0.contains(value) }
    pub fn len(&self) -> usize { self.0.len() }
    pub fn is_empty(&self) -> bool { self.0.is_empty() }
    pub fn iter(&self) -> std::slice::Iter<'_, Value> { self.0.iter() }
}

impl FromIterator<Value> for ValueSet {
    fn from_iter<I: IntoIterator<Item = Value>>(iter: I) -> Self {
        let mut set = ValueSet::new();
        set.extend(iter);
        set
    }
}

impl Extend<Value> for ValueSet {
    fn extend<I: IntoIterator<Item = Value>>(&mut self, iter: I) {
        for v in iter {
            self.insert(v);
        }
    }
}

impl IntoIterator for ValueSet {
    type Item = Value;
    type IntoIter = std::vec::IntoIter<Value>;
    fn into_iter(self) -> Self::IntoIter { self.0.into_iter() }
}

impl<'a> IntoIterator for &'a ValueSet {
    type Item = &'a Value;
    type IntoIter = std::slice::Iter<'a, Value>;
    fn into_iter(self) -> Self::IntoIter { self.0.iter() }
}

// ============================================================================
// Parameters
// ============================================================================

/// What one parameter received: a single value, or a set when several
/// producers fan into it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    One(Value),
    Many(ValueSet),
}

impl ParamValue {
    pub fn values(&self) -> impl Iterator<Item = &Value> {
        let (one, many) = match self {
            ParamValue::One(v) => (Some(v), None),
            ParamValue::Many(set) => (None, Some(set.iter())),
        };
        one.into_iter().chain(many.into_iter().flatten())
    }

    pub fn as_set(&self) -> Option<&ValueSet> {
        match self {
            ParamValue::Many(set) => Some(set),
            ParamValue::One(_) => None,
        }
    }

    pub fn into_set(self) -> ValueSet {
        match self {
            ParamValue::One(v) => std::iter::once(v).collect(),
            ParamValue::Many(set) => set,
        }
    }
}

impl From<Value> for ParamValue { fn from(v: Value) -> Self { ParamValue::One(v) } }
impl From<ValueSet> for ParamValue { fn from(v: ValueSet) -> Self { ParamValue::Many(v) } }

/// Parameter name to value, in declaration order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Params(Vec<(String, ParamValue)>);

impl Params {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Inserts or replaces, keeping the original position on replace.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<ParamValue>) {
        let name = name.into();
        let value = value.into();
        match self.0.iter_mut().find(|(n, _)| *n == name) {
            Some((_, slot)) => *slot = value,
            None => self.0.push((name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.0.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn remove(&mut self, name: &str) -> Option<ParamValue> {
        let pos = self.0.iter().position(|(n, _)| n == name)?;
        Some(self.0.remove(pos).1)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|(n, _)| n.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ParamValue)> {
        self.0.iter().map(|(n, v)| (n.as_str(), v))
    }

    pub fn len(&self) -> usize { self.0.len() }
    pub fn is_empty(&self) -> bool { self.0.is_empty() }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_equality_rules() {
        assert_eq!(Value::raw(1), Value::raw(1));
        assert_ne!(Value::raw(1), Value::ready("x", 1));
        assert_ne!(Value::ready("x", 1), Value::ready("y", 1));
        assert_eq!(Value::generated("t"), Value::generated("t"));
    }

    #[test]
    fn test_value_set_dedups_in_order() {
        let set: ValueSet = [Value::raw(2), Value::raw(3), Value::raw(2)].into_iter().collect();
        assert_eq!(set.len(), 2);
        assert_eq!(set.iter().next(), Some(&Value::raw(2)));
    }

    #[test]
    fn test_params_replace_keeps_position() {
        let mut params = Params::new();
        params.insert("a", Value::raw(1));
        params.insert("b", Value::raw(2));
        params.insert("a", Value::raw(9));
        let names: Vec<_> = params.names().collect();
        assert_eq!(names, ["a", "b"]);
        assert_eq!(params.get("a"), Some(&ParamValue::One(Value::raw(9))));
    }
}
