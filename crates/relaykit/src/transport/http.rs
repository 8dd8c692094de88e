//! HTTP binding: streaming POST paired with a server-sent-events response

use reqwest::header::CONTENT_TYPE;
use serde_json::Value;
use tokio::sync::mpsc;
use url::Url;

use crate::error::{Error, Result};
use crate::message::WireMessage;
use crate::repair;
use crate::stream::{ClientBidirectionalStream, FrameStream, ServerBidirectionalStream};
use crate::transport::{ClientTransport, ServerTransport};
use crate::value::NodeValue;

/// Client transport over HTTP.
///
/// The single permitted write POSTs the serialized request to the endpoint;
/// the response body is consumed as a `text/event-stream` of protocol
/// records, repaired and demuxed as they arrive. Dropping the stream aborts
/// the request, which is the protocol's only cancellation mechanism.
#[derive(Debug, Clone)]
pub struct HttpClientTransport {
    endpoint: Url,
    client: reqwest::Client,
}

impl HttpClientTransport {
    /// Create a transport for the given endpoint URL.
    pub fn new(endpoint: &str) -> Result<Self> {
        Self::with_client(endpoint, reqwest::Client::new())
    }

    /// Create a transport with a caller-configured HTTP client (timeouts,
    /// cookies, proxies are the embedder's concern).
    pub fn with_client(endpoint: &str, client: reqwest::Client) -> Result<Self> {
        let endpoint =
            Url::parse(endpoint).map_err(|e| Error::InvalidUrl(format!("{endpoint}: {e}")))?;
        Ok(Self { endpoint, client })
    }
}

impl<Req: WireMessage, Res: WireMessage> ClientTransport<Req, Res> for HttpClientTransport {
    fn create_client_stream(&self) -> ClientBidirectionalStream<Req, Res> {
        let client = self.client.clone();
        let endpoint = self.endpoint.clone();
        ClientBidirectionalStream::new(Box::new(move |body: Value| {
            Box::pin(async move {
                let response = client
                    .post(endpoint)
                    .header(CONTENT_TYPE, "application/json")
                    .header("credentials", "include")
                    .body(serde_json::to_string(&body)?)
                    .send()
                    .await?;

                let status = response.status();
                if !status.is_success() {
                    let text = response
                        .text()
                        .await
                        .unwrap_or_else(|_| "Unknown error".to_string());
                    return Err(Error::Transport(format!(
                        "server returned {status}: {text}"
                    )));
                }

                Ok(Box::pin(repair::repair_records(response.bytes_stream())) as FrameStream)
            })
        }))
    }
}

/// Server transport over HTTP: one already-parsed POST body paired with a
/// sink of outbound SSE records.
///
/// The embedding HTTP server owns header handling and connection lifetime;
/// this type only translates between the parsed exchange and the stream
/// abstraction.
pub struct HttpServerTransport {
    body: Value,
    records: mpsc::Sender<String>,
}

impl HttpServerTransport {
    /// Wrap one inbound exchange.
    #[must_use]
    pub fn new(body: Value, records: mpsc::Sender<String>) -> Self {
        Self { body, records }
    }
}

impl<Req: WireMessage, Res: WireMessage> ServerTransport<Req, Res> for HttpServerTransport {
    fn create_server_stream(self) -> Result<ServerBidirectionalStream<Req, Res>> {
        if !self.body.is_array() {
            return Err(Error::Protocol(
                "unexpected un-iterable request body".to_string(),
            ));
        }
        Ok(ServerBidirectionalStream::new(
            vec![NodeValue::from_json(self.body)],
            self.records,
        ))
    }
}
