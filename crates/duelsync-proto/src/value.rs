//! Opaque game payload values.
//!
//! The engine never interprets a payload; it only replaces it wholesale or
//! applies a shallow merge. Maps are ordered so the encoded bytes (and thus
//! the state hash) depend on content only. There is no float variant: the
//! hash has to be bit-stable across peers.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Top-level game payload: a string-keyed ordered map.
pub type Payload = BTreeMap<String, Value>;

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Text(String),
    Bytes(Vec<u8>),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

impl Value {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(v) => Some(*v),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
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

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Value::List(v)
    }
}

/// Shallow merge: every top-level key of `delta` replaces the same key in
/// `base`. Nested maps are replaced, not merged.
pub fn merge_shallow(base: &Payload, delta: &Payload) -> Payload {
    let mut next = base.clone();
    for (key, value) in delta {
        next.insert(key.clone(), value.clone());
    }
    next
}
