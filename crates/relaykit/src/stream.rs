//! Bidirectional stream abstraction
//!
//! One logical exchange is a single-use pair of endpoints: the client writes
//! exactly one request and then reads response messages; the server reads the
//! inbound request(s) and writes responses, framing each one immediately.
//! The same abstraction fronts every physical transport — HTTP or the
//! in-process loopback — so the proxy layers never see wire details.

use std::marker::PhantomData;

use futures::future::BoxFuture;
use futures::stream::BoxStream;
use futures::StreamExt;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{trace, warn};

use crate::envelope::{self, Envelope};
use crate::error::{Error, Result};
use crate::message::{WireMessage, STREAM_CHUNK_TAG, STREAM_END_TAG};
use crate::value::{NodeValue, ValueStream};

/// Raw primary-channel frames produced by a physical transport after chunk
/// repair.
pub type FrameStream = BoxStream<'static, Result<Value>>;

/// The action a client transport takes on the first (and only) write:
/// deliver the serialized request and hand back the response frame stream.
pub type Connector =
    Box<dyn FnOnce(Value) -> BoxFuture<'static, Result<FrameStream>> + Send + 'static>;

/// Client half of one logical exchange.
///
/// Single use by construction: the connector that performs the physical call
/// is consumed by the first write, so a second write has nothing left to
/// consume and fails with [`Error::SingleWriteViolation`].
pub struct ClientBidirectionalStream<Req, Res> {
    connector: Option<Connector>,
    responses: Option<mpsc::Receiver<Result<NodeValue>>>,
    _marker: PhantomData<fn(Req) -> Res>,
}

impl<Req: WireMessage, Res: WireMessage> ClientBidirectionalStream<Req, Res> {
    /// Wrap a transport connector into a fresh single-use stream.
    #[must_use]
    pub fn new(connector: Connector) -> Self {
        Self {
            connector: Some(connector),
            responses: None,
            _marker: PhantomData,
        }
    }

    /// Send the one request this stream instance is allowed to carry. The
    /// physical call happens here; once it returns, responses are readable.
    pub async fn write(&mut self, message: Req) -> Result<()> {
        let connector = self.connector.take().ok_or(Error::SingleWriteViolation)?;
        let Envelope {
            primary,
            side_streams,
        } = envelope::encode(message.into_value()?)?;
        // The request body is one JSON document; there is no channel a
        // request side-stream could travel on.
        if !side_streams.is_empty() {
            return Err(Error::Protocol(
                "request messages cannot carry side-streams".to_string(),
            ));
        }
        let frames = connector(primary).await?;
        self.responses = Some(demux(frames));
        Ok(())
    }

    /// Read the next response message, or `None` once the server closes the
    /// exchange.
    pub async fn read(&mut self) -> Result<Option<Res>> {
        let responses = self
            .responses
            .as_mut()
            .ok_or_else(|| Error::Protocol("read before the first write".to_string()))?;
        match responses.recv().await {
            None => Ok(None),
            Some(Ok(value)) => Res::from_value(value).map(Some),
            Some(Err(e)) => Err(e),
        }
    }
}

/// Route raw frames into the primary message channel and, when a message
/// references an embedded stream, siphon subsequent chunk frames into the
/// substituted stream handle.
///
/// Runs as a spawned pump so the primary channel and the side channel can be
/// consumed concurrently; the only backpressure is the channels themselves
/// not being drained.
fn demux(mut frames: FrameStream) -> mpsc::Receiver<Result<NodeValue>> {
    let (tx, rx) = mpsc::channel::<Result<NodeValue>>(16);
    tokio::spawn(async move {
        let mut siphon: Option<mpsc::Sender<Value>> = None;
        while let Some(frame) = frames.next().await {
            let frame = match frame {
                Ok(frame) => frame,
                Err(e) => {
                    let _ = tx.send(Err(e)).await;
                    return;
                }
            };
            trace!(%frame, "received frame");
            match frame_tag(&frame) {
                Some(STREAM_CHUNK_TAG) => {
                    let chunk = frame
                        .get(1)
                        .and_then(|data| data.get("chunk"))
                        .cloned()
                        .unwrap_or(Value::Null);
                    match &siphon {
                        Some(sender) => {
                            if sender.send(chunk).await.is_err() {
                                trace!("side-stream receiver dropped; discarding chunk");
                            }
                        }
                        None => {
                            let _ = tx
                                .send(Err(Error::Protocol(
                                    "stream chunk arrived with no open side-stream".to_string(),
                                )))
                                .await;
                            return;
                        }
                    }
                }
                Some(STREAM_END_TAG) => {
                    if siphon.take().is_none() {
                        let _ = tx
                            .send(Err(Error::Protocol(
                                "stream end arrived with no open side-stream".to_string(),
                            )))
                            .await;
                        return;
                    }
                }
                _ => {
                    let decoded = envelope::decode(frame, &mut |_id| {
                        if siphon.is_some() {
                            return Err(Error::MultipleStreams);
                        }
                        let (chunk_tx, chunk_rx) = mpsc::channel::<Value>(16);
                        siphon = Some(chunk_tx);
                        Ok(Box::pin(ReceiverStream::new(chunk_rx)) as ValueStream)
                    });
                    let fatal = decoded.is_err();
                    if tx.send(decoded).await.is_err() {
                        // Primary consumer is gone; keep pumping so an open
                        // side-stream still receives its chunks.
                        if siphon.is_none() {
                            return;
                        }
                    }
                    if fatal {
                        return;
                    }
                }
            }
        }
        if siphon.is_some() {
            warn!("transport closed while a side-stream was still open");
        }
    });
    rx
}

fn frame_tag(frame: &Value) -> Option<&str> {
    frame.as_array()?.first()?.as_str()
}

/// Server half of one logical exchange: a one-shot inbound request list and
/// a response writer framing each message as one wire record.
pub struct ServerBidirectionalStream<Req, Res> {
    inbound: std::vec::IntoIter<NodeValue>,
    records: mpsc::Sender<String>,
    _marker: PhantomData<fn(Res) -> Req>,
}

impl<Req: WireMessage, Res: WireMessage> ServerBidirectionalStream<Req, Res> {
    pub(crate) fn new(inbound: Vec<NodeValue>, records: mpsc::Sender<String>) -> Self {
        Self {
            inbound: inbound.into_iter(),
            records,
            _marker: PhantomData,
        }
    }

    /// Read the next inbound request, or `None` once the request body is
    /// exhausted.
    pub async fn read(&mut self) -> Result<Option<Req>> {
        match self.inbound.next() {
            None => Ok(None),
            Some(value) => Req::from_value(value).map(Some),
        }
    }

    /// Write one response. The primary frame goes out immediately; if the
    /// message carries a side-stream, its chunks are pumped inline on the
    /// same channel before this call returns.
    pub async fn write(&mut self, message: Res) -> Result<()> {
        let Envelope {
            primary,
            mut side_streams,
        } = envelope::encode(message.into_value()?)?;
        self.send_record(&primary).await?;
        // At most one by the encode invariant.
        if let Some(mut stream) = side_streams.pop() {
            while let Some(chunk) = stream.next().await {
                self.send_record(&json!([STREAM_CHUNK_TAG, { "chunk": chunk }]))
                    .await?;
            }
            self.send_record(&json!([STREAM_END_TAG, {}])).await?;
        }
        Ok(())
    }

    async fn send_record(&self, frame: &Value) -> Result<()> {
        let record = format!("data: {}\n\n", serde_json::to_string(frame)?);
        self.records
            .send(record)
            .await
            .map_err(|_| Error::Transport("response channel closed".to_string()))
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{ProxyRequest, ProxyResponse};
    use crate::value::values_into_json;
    use futures::stream;
    use serde_json::json;

    fn canned_connector(frames: Vec<Result<Value>>) -> Connector {
        Box::new(move |_body| {
            Box::pin(async move { Ok(Box::pin(stream::iter(frames)) as FrameStream) })
        })
    }

    fn proxy_request() -> ProxyRequest {
        ProxyRequest::Proxy {
            node: crate::message::NodeDescriptor::new("n1", "fetch"),
            inputs: Default::default(),
        }
    }

    #[test]
    fn test_stream_halves_are_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        // The server half is held across await points by a spawned serve
        // task, so it must be shareable between threads.
        assert_send_sync::<ServerBidirectionalStream<ProxyRequest, ProxyResponse>>();
        assert_send_sync::<NodeValue>();
    }

    #[tokio::test]
    async fn test_second_write_fails() {
        let mut stream: ClientBidirectionalStream<ProxyRequest, ProxyResponse> =
            ClientBidirectionalStream::new(canned_connector(vec![]));
        stream.write(proxy_request()).await.unwrap();
        let err = stream.write(proxy_request()).await.unwrap_err();
        assert!(matches!(err, Error::SingleWriteViolation));
    }

    #[tokio::test]
    async fn test_read_before_write_is_a_protocol_error() {
        let mut stream: ClientBidirectionalStream<ProxyRequest, ProxyResponse> =
            ClientBidirectionalStream::new(canned_connector(vec![]));
        let err = stream.read().await.unwrap_err();
        assert!(err.is_protocol_violation());
    }

    #[tokio::test]
    async fn test_read_plain_response() {
        let mut stream: ClientBidirectionalStream<ProxyRequest, ProxyResponse> =
            ClientBidirectionalStream::new(canned_connector(vec![Ok(json!([
                "proxy",
                {"outputs": {"status": 200}}
            ]))]));
        stream.write(proxy_request()).await.unwrap();
        let ProxyResponse::Outputs { outputs } = stream.read().await.unwrap().unwrap() else {
            panic!("expected outputs");
        };
        assert_eq!(
            values_into_json(outputs).unwrap(),
            json!({"status": 200}).as_object().unwrap().clone()
        );
        assert!(stream.read().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_demux_siphons_side_stream() {
        let frames = vec![
            Ok(json!(["proxy", {"outputs": {"data": {"$type": "Stream", "id": 0}}}])),
            Ok(json!(["http-stream-chunk", {"chunk": "foo"}])),
            Ok(json!(["http-stream-chunk", {"chunk": "bar"}])),
            Ok(json!(["http-stream-end", {}])),
        ];
        let mut stream: ClientBidirectionalStream<ProxyRequest, ProxyResponse> =
            ClientBidirectionalStream::new(canned_connector(frames));
        stream.write(proxy_request()).await.unwrap();
        let ProxyResponse::Outputs { mut outputs } = stream.read().await.unwrap().unwrap() else {
            panic!("expected outputs");
        };
        let Some(NodeValue::Stream(data)) = outputs.remove("data") else {
            panic!("expected a substituted stream");
        };
        let chunks: Vec<_> = data.collect().await;
        assert_eq!(chunks, vec![json!("foo"), json!("bar")]);
        assert!(stream.read().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_orphan_stream_chunk_is_fatal() {
        let frames = vec![Ok(json!(["http-stream-chunk", {"chunk": "foo"}]))];
        let mut stream: ClientBidirectionalStream<ProxyRequest, ProxyResponse> =
            ClientBidirectionalStream::new(canned_connector(frames));
        stream.write(proxy_request()).await.unwrap();
        let err = stream.read().await.unwrap_err();
        assert!(err.is_protocol_violation());
    }

    #[tokio::test]
    async fn test_server_stream_frames_writes() {
        let (tx, mut rx) = mpsc::channel(16);
        let mut stream: ServerBidirectionalStream<ProxyRequest, ProxyResponse> =
            ServerBidirectionalStream::new(
                vec![NodeValue::from_json(json!(["end", {"timestamp": 1.0}]))],
                tx,
            );
        assert!(matches!(
            stream.read().await.unwrap(),
            Some(ProxyRequest::End { .. })
        ));
        assert!(stream.read().await.unwrap().is_none());

        stream
            .write(ProxyResponse::Error {
                error: "boom".to_string(),
                timestamp: 2.0,
            })
            .await
            .unwrap();
        drop(stream);
        assert_eq!(
            rx.recv().await.unwrap(),
            "data: [\"error\",{\"error\":\"boom\",\"timestamp\":2.0}]\n\n"
        );
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_server_stream_pumps_side_stream_inline() {
        let (tx, mut rx) = mpsc::channel(16);
        let mut server: ServerBidirectionalStream<ProxyRequest, ProxyResponse> =
            ServerBidirectionalStream::new(vec![], tx);
        let outputs = std::collections::BTreeMap::from([(
            "data".to_string(),
            NodeValue::Stream(Box::pin(stream::iter(vec![json!("foo"), json!("bar")]))),
        )]);
        server.write(ProxyResponse::Outputs { outputs }).await.unwrap();
        drop(server);

        let mut records = Vec::new();
        while let Some(record) = rx.recv().await {
            records.push(record);
        }
        assert_eq!(
            records,
            vec![
                "data: [\"proxy\",{\"outputs\":{\"data\":{\"$type\":\"Stream\",\"id\":0}}}]\n\n"
                    .to_string(),
                "data: [\"http-stream-chunk\",{\"chunk\":\"foo\"}]\n\n".to_string(),
                "data: [\"http-stream-chunk\",{\"chunk\":\"bar\"}]\n\n".to_string(),
                "data: [\"http-stream-end\",{}]\n\n".to_string(),
            ]
        );
    }
}
