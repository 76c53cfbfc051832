//! Core value types shared across the engine

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// A dynamically typed value flowing through fact contexts, rule results,
/// and enrichment records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// Absence of a value.
    Null,
    /// Boolean value.
    Bool(bool),
    /// Integer value.
    Integer(i64),
    /// Floating point value.
    Float(f64),
    /// String value.
    String(Arc<str>),
    /// Ordered list of values.
    Array(Arc<[Value]>),
    /// String-keyed map of values.
    Object(Arc<BTreeMap<String, Value>>),
}

impl Value {
    /// Build a string value.
    pub fn string(s: impl Into<String>) -> Self {
        Value::String(Arc::from(s.into().into_boxed_str()))
    }

    /// Build an array value.
    pub fn array(values: Vec<Value>) -> Self {
        Value::Array(Arc::from(values.into_boxed_slice()))
    }

    /// Build an object value.
    pub fn object(map: BTreeMap<String, Value>) -> Self {
        Value::Object(Arc::new(map))
    }

    /// Truthiness used by boolean coercion in the expression evaluator.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Integer(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            Value::String(s) => !s.is_empty(),
            Value::Array(a) => !a.is_empty(),
            Value::Object(o) => !o.is_empty(),
        }
    }

    /// Interpret the value as `f64`, coercing integers and booleans.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Integer(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            _ => None,
        }
    }

    /// Interpret the value as a string slice, if it is one.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Interpret the value as a boolean, if it is one.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Field access on an object value; `None` for anything else or a
    /// missing key (safe-navigation semantics).
    pub fn get_field(&self, field: &str) -> Option<Value> {
        match self {
            Value::Object(o) => o.get(field).cloned(),
            _ => None,
        }
    }

    /// Index into an array value; `None` for anything else or an
    /// out-of-range index.
    pub fn get_index(&self, index: i64) -> Option<Value> {
        match self {
            Value::Array(a) => {
                if index < 0 {
                    return None;
                }
                a.get(index as usize).cloned()
            }
            _ => None,
        }
    }

    /// `true` when the value is [`Value::Null`].
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Convert to a `serde_json::Value` for wire transport.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }

    /// Convert from a `serde_json::Value`.
    pub fn from_json(v: serde_json::Value) -> Self {
        serde_json::from_value(v).unwrap_or(Value::Null)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Integer(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::string(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::string(s)
    }
}

/// The fact set an evaluation runs against: a string-keyed map of values.
///
/// Created fresh per top-level evaluation; stages append their outputs under
/// a stage-prefixed key as execution proceeds (§4.10).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FactContext {
    facts: BTreeMap<String, Value>,
}

impl FactContext {
    /// An empty fact context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a fact context from an existing map.
    pub fn from_map(facts: BTreeMap<String, Value>) -> Self {
        FactContext { facts }
    }

    /// Insert or replace a fact, builder style.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.facts.insert(key.into(), value.into());
        self
    }

    /// Insert or replace a fact in place.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.facts.insert(key.into(), value.into());
    }

    /// Look up a fact by name.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.facts.get(key)
    }

    /// `true` iff a fact with this name is present (even if its value is
    /// `Null`).
    pub fn contains(&self, key: &str) -> bool {
        self.facts.contains_key(key)
    }

    /// Number of facts currently bound.
    pub fn len(&self) -> usize {
        self.facts.len()
    }

    /// `true` iff no facts are bound.
    pub fn is_empty(&self) -> bool {
        self.facts.is_empty()
    }

    /// Iterate over the bound facts.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.facts.iter()
    }

    /// Merge another context's facts into this one, the other taking
    /// precedence on key collisions.
    pub fn merge(&mut self, other: &FactContext) {
        for (k, v) in &other.facts {
            self.facts.insert(k.clone(), v.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truthiness() {
        assert!(!Value::Null.is_truthy());
        assert!(!Value::Integer(0).is_truthy());
        assert!(Value::Integer(1).is_truthy());
        assert!(!Value::string("").is_truthy());
        assert!(Value::string("x").is_truthy());
    }

    #[test]
    fn fact_context_set_get() {
        let mut ctx = FactContext::new();
        ctx.set("amount", Value::Integer(100));
        assert_eq!(ctx.get("amount"), Some(&Value::Integer(100)));
        assert!(!ctx.contains("missing"));
    }

    #[test]
    fn field_and_index_access() {
        let mut map = BTreeMap::new();
        map.insert("name".to_string(), Value::string("alice"));
        let obj = Value::object(map);
        assert_eq!(obj.get_field("name"), Some(Value::string("alice")));
        assert_eq!(obj.get_field("missing"), None);

        let arr = Value::array(vec![Value::Integer(1), Value::Integer(2)]);
        assert_eq!(arr.get_index(1), Some(Value::Integer(2)));
        assert_eq!(arr.get_index(5), None);
    }
}
