//! Envelope codec: primary frame plus at most one side-stream
//!
//! Encoding walks a [`NodeValue`] tree and replaces a live stream with the
//! wire token `{"$type":"Stream","id":0}`, handing the stream itself back
//! alongside the primary JSON. Decoding inverts the substitution through a
//! caller-supplied resolver. The protocol deliberately supports a single
//! embedded stream per envelope; a second stream is rejected, never dropped.

use serde_json::{json, Value};

use crate::error::{Error, Result};
use crate::value::{NodeValue, ValueStream};

/// Wire marker for a substituted stream.
const STREAM_TOKEN_TYPE: &str = "Stream";

/// The result of encoding one message: the serializable primary frame and the
/// side-streams that were lifted out of it (zero or one).
pub struct Envelope {
    /// The stream-free JSON payload.
    pub primary: Value,
    /// Side-streams referenced by tokens inside `primary`.
    pub side_streams: Vec<ValueStream>,
}

/// Encode a value tree into an envelope.
///
/// Fails with [`Error::MultipleStreams`] if the tree contains more than one
/// live stream.
pub fn encode(value: NodeValue) -> Result<Envelope> {
    let mut side_streams = Vec::new();
    let primary = encode_value(value, &mut side_streams)?;
    Ok(Envelope {
        primary,
        side_streams,
    })
}

fn encode_value(value: NodeValue, side_streams: &mut Vec<ValueStream>) -> Result<Value> {
    Ok(match value {
        NodeValue::Null => Value::Null,
        NodeValue::Bool(b) => Value::Bool(b),
        NodeValue::Number(n) => Value::Number(n),
        NodeValue::String(s) => Value::String(s),
        NodeValue::Array(items) => Value::Array(
            items
                .into_iter()
                .map(|item| encode_value(item, side_streams))
                .collect::<Result<_>>()?,
        ),
        NodeValue::Object(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (k, v) in map {
                out.insert(k, encode_value(v, side_streams)?);
            }
            Value::Object(out)
        }
        NodeValue::Stream(stream) => {
            if !side_streams.is_empty() {
                return Err(Error::MultipleStreams);
            }
            side_streams.push(stream);
            json!({ "$type": STREAM_TOKEN_TYPE, "id": 0 })
        }
    })
}

/// Decode a primary frame back into a value tree, substituting stream tokens
/// through `resolver`.
///
/// Only token id 0 is valid; a larger id or a second token fails with
/// [`Error::MultipleStreams`].
pub fn decode<F>(primary: Value, resolver: &mut F) -> Result<NodeValue>
where
    F: FnMut(u64) -> Result<ValueStream>,
{
    let mut resolved = false;
    decode_value(primary, resolver, &mut resolved)
}

fn decode_value<F>(value: Value, resolver: &mut F, resolved: &mut bool) -> Result<NodeValue>
where
    F: FnMut(u64) -> Result<ValueStream>,
{
    Ok(match value {
        Value::Object(map) => {
            if let Some(id) = stream_token_id(&map) {
                if id != 0 || *resolved {
                    return Err(Error::MultipleStreams);
                }
                *resolved = true;
                NodeValue::Stream(resolver(id)?)
            } else {
                let mut out = std::collections::BTreeMap::new();
                for (k, v) in map {
                    out.insert(k, decode_value(v, resolver, resolved)?);
                }
                NodeValue::Object(out)
            }
        }
        Value::Array(items) => NodeValue::Array(
            items
                .into_iter()
                .map(|item| decode_value(item, resolver, resolved))
                .collect::<Result<_>>()?,
        ),
        other => NodeValue::from_json(other),
    })
}

fn stream_token_id(map: &serde_json::Map<String, Value>) -> Option<u64> {
    if map.get("$type")?.as_str()? != STREAM_TOKEN_TYPE {
        return None;
    }
    map.get("id")?.as_u64()
}

#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#[cfg(test)]
mod tests {
    use super::*;
    use futures::{stream, StreamExt};
    use std::collections::BTreeMap;

    fn no_streams(_id: u64) -> Result<ValueStream> {
        panic!("resolver must not be called for stream-free values");
    }

    #[test]
    fn test_plain_value_round_trip() {
        let value = json!({"status": 200, "tags": ["a", "b"], "nested": {"x": null}});
        let envelope = encode(NodeValue::from_json(value.clone())).unwrap();
        assert_eq!(envelope.primary, value);
        assert!(envelope.side_streams.is_empty());

        let decoded = decode(envelope.primary, &mut no_streams).unwrap();
        assert_eq!(decoded.into_json().unwrap(), value);
    }

    #[tokio::test]
    async fn test_single_stream_round_trip() {
        let tree = NodeValue::Object(BTreeMap::from([
            ("kind".to_string(), NodeValue::String("reply".to_string())),
            (
                "data".to_string(),
                NodeValue::Stream(Box::pin(stream::iter(vec![json!("foo"), json!("bar")]))),
            ),
        ]));

        let mut envelope = encode(tree).unwrap();
        assert_eq!(
            envelope.primary,
            json!({"data": {"$type": "Stream", "id": 0}, "kind": "reply"})
        );
        assert_eq!(envelope.side_streams.len(), 1);

        let stream = envelope.side_streams.pop().unwrap();
        let chunks: Vec<_> = stream.collect().await;
        assert_eq!(chunks, vec![json!("foo"), json!("bar")]);
    }

    #[tokio::test]
    async fn test_decode_substitutes_stream() {
        let primary = json!({"data": {"$type": "Stream", "id": 0}});
        let mut resolver = |_id: u64| -> Result<ValueStream> {
            Ok(Box::pin(stream::iter(vec![json!(1), json!(2)])))
        };
        let decoded = decode(primary, &mut resolver).unwrap();
        let NodeValue::Object(mut map) = decoded else {
            panic!("expected an object");
        };
        let Some(NodeValue::Stream(stream)) = map.remove("data") else {
            panic!("expected a stream capability");
        };
        let chunks: Vec<_> = stream.collect().await;
        assert_eq!(chunks, vec![json!(1), json!(2)]);
    }

    #[test]
    fn test_encode_rejects_two_streams() {
        let tree = NodeValue::Object(BTreeMap::from([
            (
                "first".to_string(),
                NodeValue::Stream(Box::pin(stream::empty())),
            ),
            (
                "second".to_string(),
                NodeValue::Stream(Box::pin(stream::empty())),
            ),
        ]));
        assert!(matches!(encode(tree), Err(Error::MultipleStreams)));
    }

    #[test]
    fn test_decode_rejects_nonzero_stream_id() {
        let primary = json!({"data": {"$type": "Stream", "id": 1}});
        let mut resolver = |_id: u64| -> Result<ValueStream> { Ok(Box::pin(stream::empty())) };
        assert!(matches!(
            decode(primary, &mut resolver),
            Err(Error::MultipleStreams)
        ));
    }

    #[test]
    fn test_decode_rejects_second_token() {
        let primary = json!({
            "a": {"$type": "Stream", "id": 0},
            "b": {"$type": "Stream", "id": 0},
        });
        let mut resolver = |_id: u64| -> Result<ValueStream> { Ok(Box::pin(stream::empty())) };
        assert!(matches!(
            decode(primary, &mut resolver),
            Err(Error::MultipleStreams)
        ));
    }

    #[test]
    fn test_lookalike_objects_pass_through() {
        // Objects that merely resemble the token keep their shape.
        let value = json!({"$type": "Stream"});
        let decoded = decode(value.clone(), &mut no_streams).unwrap();
        assert_eq!(decoded.into_json().unwrap(), value);

        let value = json!({"$type": "Blob", "id": 0});
        let decoded = decode(value.clone(), &mut no_streams).unwrap();
        assert_eq!(decoded.into_json().unwrap(), value);
    }
}
