//! JSON-like values that may carry a live side-stream
//!
//! Node inputs and outputs are JSON trees, except that one value anywhere in
//! the tree may be a live stream of chunks delivered over the same physical
//! channel as the message that references it. [`NodeValue`] models that as an
//! explicit sum type; the envelope codec is responsible for swapping the
//! stream for a wire token and back.

use std::collections::BTreeMap;
use std::fmt;
use std::pin::Pin;

use futures::Stream;
use serde_json::Value;

use crate::error::{Error, Result};

/// A live stream of JSON chunks embedded in a value tree.
///
/// `Sync` is part of the contract: values travel inside server streams whose
/// futures are held across await points on spawned tasks.
pub type ValueStream = Pin<Box<dyn Stream<Item = Value> + Send + Sync>>;

/// A JSON value extended with a stream capability.
pub enum NodeValue {
    /// JSON null
    Null,
    /// JSON boolean
    Bool(bool),
    /// JSON number
    Number(serde_json::Number),
    /// JSON string
    String(String),
    /// JSON array
    Array(Vec<NodeValue>),
    /// JSON object
    Object(BTreeMap<String, NodeValue>),
    /// A live side-stream of chunks
    Stream(ValueStream),
}

/// Named inputs to one node invocation.
pub type InputValues = BTreeMap<String, NodeValue>;

/// Named outputs of one node invocation.
pub type OutputValues = BTreeMap<String, NodeValue>;

impl NodeValue {
    /// Build a value tree from plain JSON.
    #[must_use]
    pub fn from_json(value: Value) -> Self {
        match value {
            Value::Null => NodeValue::Null,
            Value::Bool(b) => NodeValue::Bool(b),
            Value::Number(n) => NodeValue::Number(n),
            Value::String(s) => NodeValue::String(s),
            Value::Array(items) => {
                NodeValue::Array(items.into_iter().map(NodeValue::from_json).collect())
            }
            Value::Object(map) => NodeValue::Object(
                map.into_iter()
                    .map(|(k, v)| (k, NodeValue::from_json(v)))
                    .collect(),
            ),
        }
    }

    /// Convert back into plain JSON.
    ///
    /// Fails with a protocol error if a live stream is still embedded in the
    /// tree; streams must go through the envelope codec instead.
    pub fn into_json(self) -> Result<Value> {
        match self {
            NodeValue::Null => Ok(Value::Null),
            NodeValue::Bool(b) => Ok(Value::Bool(b)),
            NodeValue::Number(n) => Ok(Value::Number(n)),
            NodeValue::String(s) => Ok(Value::String(s)),
            NodeValue::Array(items) => Ok(Value::Array(
                items
                    .into_iter()
                    .map(NodeValue::into_json)
                    .collect::<Result<_>>()?,
            )),
            NodeValue::Object(map) => {
                let mut out = serde_json::Map::with_capacity(map.len());
                for (k, v) in map {
                    out.insert(k, v.into_json()?);
                }
                Ok(Value::Object(out))
            }
            NodeValue::Stream(_) => Err(Error::Protocol(
                "a live stream cannot be converted to plain JSON".to_string(),
            )),
        }
    }

    /// Whether any part of this tree is a live stream.
    #[must_use]
    pub fn has_stream(&self) -> bool {
        match self {
            NodeValue::Stream(_) => true,
            NodeValue::Array(items) => items.iter().any(NodeValue::has_stream),
            NodeValue::Object(map) => map.values().any(NodeValue::has_stream),
            _ => false,
        }
    }
}

impl fmt::Debug for NodeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeValue::Null => write!(f, "Null"),
            NodeValue::Bool(b) => write!(f, "Bool({b})"),
            NodeValue::Number(n) => write!(f, "Number({n})"),
            NodeValue::String(s) => write!(f, "String({s:?})"),
            NodeValue::Array(items) => f.debug_tuple("Array").field(items).finish(),
            NodeValue::Object(map) => f.debug_tuple("Object").field(map).finish(),
            NodeValue::Stream(_) => write!(f, "Stream(..)"),
        }
    }
}

impl PartialEq for NodeValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (NodeValue::Null, NodeValue::Null) => true,
            (NodeValue::Bool(a), NodeValue::Bool(b)) => a == b,
            (NodeValue::Number(a), NodeValue::Number(b)) => a == b,
            (NodeValue::String(a), NodeValue::String(b)) => a == b,
            (NodeValue::Array(a), NodeValue::Array(b)) => a == b,
            (NodeValue::Object(a), NodeValue::Object(b)) => a == b,
            // Stream identity is not observable; two handles never compare equal.
            _ => false,
        }
    }
}

/// Convert a map of plain JSON values into typed values.
#[must_use]
pub fn values_from_json(map: serde_json::Map<String, Value>) -> BTreeMap<String, NodeValue> {
    map.into_iter()
        .map(|(k, v)| (k, NodeValue::from_json(v)))
        .collect()
}

/// Convert a typed value map back to plain JSON. Fails if any entry still
/// carries a live stream.
pub fn values_into_json(map: BTreeMap<String, NodeValue>) -> Result<serde_json::Map<String, Value>> {
    let mut out = serde_json::Map::with_capacity(map.len());
    for (k, v) in map {
        out.insert(k, v.into_json()?);
    }
    Ok(out)
}
