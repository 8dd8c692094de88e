//! Wire messages for the proxy protocol
//!
//! Every logical message travels as a JSON tuple `[type, data]`; a trailing
//! third element (a continuation token used by other traffic sharing this
//! transport) is tolerated and ignored. The tuples are modeled as tagged
//! enums with exhaustive matching, so an unknown tag is an explicit error
//! instead of a silent fall-through.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::value::{InputValues, NodeValue, OutputValues};

/// Frame tag for one chunk of an embedded side-stream.
pub(crate) const STREAM_CHUNK_TAG: &str = "http-stream-chunk";
/// Frame tag terminating an embedded side-stream.
pub(crate) const STREAM_END_TAG: &str = "http-stream-end";

/// Identifies one step of the graph. Owned by the embedding graph engine;
/// this crate only reads it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeDescriptor {
    /// Unique id of the node within its graph.
    pub id: String,
    /// The node type, the key the allow-list and handler registry match on.
    #[serde(rename = "type")]
    pub node_type: String,
    /// Static configuration baked into the graph.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub configuration: Option<Map<String, Value>>,
}

impl NodeDescriptor {
    /// Create a descriptor with no static configuration.
    pub fn new(id: impl Into<String>, node_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            node_type: node_type.into(),
            configuration: None,
        }
    }
}

/// Current time in epoch milliseconds, the protocol's timestamp unit.
#[must_use]
pub fn timestamp() -> f64 {
    chrono::Utc::now().timestamp_millis() as f64
}

/// A message that can cross the wire: convertible to a value tree for
/// envelope encoding and back from a decoded tree.
pub trait WireMessage: Sized + Send + 'static {
    /// Convert into a value tree ready for envelope encoding.
    fn into_value(self) -> Result<NodeValue>;
    /// Rebuild from a decoded value tree (side-streams already substituted).
    fn from_value(value: NodeValue) -> Result<Self>;
}

/// Client-to-server messages.
#[derive(Debug)]
pub enum ProxyRequest {
    /// Delegate execution of one node.
    Proxy {
        /// The node being delegated.
        node: NodeDescriptor,
        /// Its input values.
        inputs: InputValues,
    },
    /// Terminate the whole exchange; the server stops reading and does not
    /// reply.
    End {
        /// Epoch milliseconds at the sender.
        timestamp: f64,
    },
    /// Any tag this protocol does not recognize. The server answers it with
    /// an error message and keeps its receive loop alive.
    Unrecognized {
        /// The unrecognized tag.
        tag: String,
    },
}

/// Server-to-client messages.
#[derive(Debug)]
pub enum ProxyResponse {
    /// Successful delegation; the node's outputs.
    Outputs {
        /// Output values, possibly carrying one side-stream.
        outputs: OutputValues,
    },
    /// Application-level failure. The exchange itself completed normally;
    /// the result is an error payload.
    Error {
        /// Human-readable failure description.
        error: String,
        /// Epoch milliseconds at the sender.
        timestamp: f64,
    },
}

impl WireMessage for ProxyRequest {
    fn into_value(self) -> Result<NodeValue> {
        Ok(match self {
            ProxyRequest::Proxy { node, inputs } => {
                let node = NodeValue::from_json(serde_json::to_value(&node)?);
                tuple(
                    "proxy",
                    BTreeMap::from([
                        ("node".to_string(), node),
                        ("inputs".to_string(), NodeValue::Object(inputs)),
                    ]),
                )
            }
            ProxyRequest::End { timestamp } => tuple(
                "end",
                BTreeMap::from([("timestamp".to_string(), number(timestamp))]),
            ),
            ProxyRequest::Unrecognized { tag } => tuple(&tag, BTreeMap::new()),
        })
    }

    fn from_value(value: NodeValue) -> Result<Self> {
        let (tag, mut data) = tuple_parts(value)?;
        match tag.as_str() {
            "proxy" => {
                let node = data
                    .remove("node")
                    .ok_or_else(|| Error::Protocol("proxy request without a node".to_string()))?
                    .into_json()?;
                let node: NodeDescriptor = serde_json::from_value(node)?;
                let inputs = match data.remove("inputs") {
                    Some(NodeValue::Object(map)) => map,
                    Some(_) => {
                        return Err(Error::Protocol(
                            "proxy request inputs must be an object".to_string(),
                        ))
                    }
                    None => BTreeMap::new(),
                };
                Ok(ProxyRequest::Proxy { node, inputs })
            }
            "end" => Ok(ProxyRequest::End {
                timestamp: take_timestamp(&mut data),
            }),
            _ => Ok(ProxyRequest::Unrecognized { tag }),
        }
    }
}

impl WireMessage for ProxyResponse {
    fn into_value(self) -> Result<NodeValue> {
        Ok(match self {
            ProxyResponse::Outputs { outputs } => tuple(
                "proxy",
                BTreeMap::from([("outputs".to_string(), NodeValue::Object(outputs))]),
            ),
            ProxyResponse::Error { error, timestamp } => tuple(
                "error",
                BTreeMap::from([
                    ("error".to_string(), NodeValue::String(error)),
                    ("timestamp".to_string(), number(timestamp)),
                ]),
            ),
        })
    }

    fn from_value(value: NodeValue) -> Result<Self> {
        let (tag, mut data) = tuple_parts(value)?;
        match tag.as_str() {
            "proxy" => {
                let outputs = match data.remove("outputs") {
                    Some(NodeValue::Object(map)) => map,
                    Some(_) => {
                        return Err(Error::Protocol(
                            "proxy response outputs must be an object".to_string(),
                        ))
                    }
                    None => BTreeMap::new(),
                };
                Ok(ProxyResponse::Outputs { outputs })
            }
            "error" => {
                let error = match data.remove("error") {
                    Some(NodeValue::String(message)) => message,
                    // Structured error payloads survive as their serialized form.
                    Some(other) => other.into_json()?.to_string(),
                    None => "unknown error".to_string(),
                };
                Ok(ProxyResponse::Error {
                    error,
                    timestamp: take_timestamp(&mut data),
                })
            }
            _ => Err(Error::UnknownResponseType(tag)),
        }
    }
}

fn tuple(tag: &str, data: BTreeMap<String, NodeValue>) -> NodeValue {
    NodeValue::Array(vec![
        NodeValue::String(tag.to_string()),
        NodeValue::Object(data),
    ])
}

fn number(value: f64) -> NodeValue {
    serde_json::Number::from_f64(value)
        .map(NodeValue::Number)
        .unwrap_or(NodeValue::Null)
}

fn take_timestamp(data: &mut BTreeMap<String, NodeValue>) -> f64 {
    match data.remove("timestamp") {
        Some(NodeValue::Number(n)) => n.as_f64().unwrap_or(0.0),
        _ => 0.0,
    }
}

/// Split a decoded message into its `[type, data]` parts. Tuples of length
/// two or three are accepted; anything else is a protocol error.
fn tuple_parts(value: NodeValue) -> Result<(String, BTreeMap<String, NodeValue>)> {
    let NodeValue::Array(items) = value else {
        return Err(Error::Protocol(
            "a protocol message must be a [type, data] tuple".to_string(),
        ));
    };
    if items.len() < 2 || items.len() > 3 {
        return Err(Error::Protocol(format!(
            "a protocol message must have 2 or 3 elements, got {}",
            items.len()
        )));
    }
    let mut items = items.into_iter();
    let tag = match items.next() {
        Some(NodeValue::String(tag)) => tag,
        _ => {
            return Err(Error::Protocol(
                "a protocol message must start with a string tag".to_string(),
            ))
        }
    };
    let data = match items.next() {
        Some(NodeValue::Object(map)) => map,
        _ => {
            return Err(Error::Protocol(format!(
                "message \"{tag}\" carries no data object"
            )))
        }
    };
    Ok((tag, data))
}
