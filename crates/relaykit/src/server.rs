//! Proxy server
//!
//! Serves delegated node execution over a [`ServerTransport`]: reads proxy
//! requests, dispatches them to kit handlers, and writes outputs or error
//! replies back. Also provides the axum HTTP binding that bridges a POST
//! request body to a server-sent-events response.

use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use bytes::Bytes;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tracing::{debug, error, instrument, warn};

use crate::config::ProxyServerConfig;
use crate::error::Result;
use crate::handler::{handlers_from_kits, inflate_values, BoxedHandler, NodeHandlerContext};
use crate::message::{timestamp, NodeDescriptor, ProxyRequest, ProxyResponse};
use crate::transport::{HttpServerTransport, ServerTransport};
use crate::value::{InputValues, NodeValue, OutputValues};

/// Serves proxy requests arriving over one transport connection.
pub struct ProxyServer<T> {
    transport: T,
}

impl<T> ProxyServer<T>
where
    T: ServerTransport<ProxyRequest, ProxyResponse>,
{
    pub fn new(transport: T) -> Self {
        Self { transport }
    }

    /// Run the request loop until the peer sends `End` or the connection
    /// drains. Malformed traffic is reported back to the peer before the
    /// loop stops.
    pub async fn serve(self, config: &ProxyServerConfig) -> Result<()> {
        let mut stream = self.transport.create_server_stream()?;
        let handlers = handlers_from_kits(&config.kits);
        let handlers = match &config.decorator {
            Some(decorate) => decorate(handlers),
            None => handlers,
        };

        loop {
            let request = match stream.read().await {
                Ok(Some(request)) => request,
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, "malformed proxy request");
                    stream
                        .write(ProxyResponse::Error {
                            error: e.to_string(),
                            timestamp: timestamp(),
                        })
                        .await?;
                    break;
                }
            };

            match request {
                ProxyRequest::End { .. } => break,
                ProxyRequest::Unrecognized { tag } => {
                    debug!(tag = %tag, "non-proxy message");
                    stream
                        .write(ProxyResponse::Error {
                            error: "Expected proxy request.".to_string(),
                            timestamp: timestamp(),
                        })
                        .await?;
                }
                ProxyRequest::Proxy { node, inputs } => {
                    let response = match dispatch(config, &handlers, node, inputs).await {
                        Ok(outputs) => ProxyResponse::Outputs { outputs },
                        Err(message) => ProxyResponse::Error {
                            error: message,
                            timestamp: timestamp(),
                        },
                    };
                    stream.write(response).await?;
                }
            }
        }
        Ok(())
    }
}

/// Run one proxy request through the allow list, the `allowed` gate, and the
/// handler. The `Err` string is the reply the peer sees.
async fn dispatch(
    config: &ProxyServerConfig,
    handlers: &HashMap<String, BoxedHandler>,
    node: NodeDescriptor,
    inputs: InputValues,
) -> std::result::Result<OutputValues, String> {
    // Deny by default: a type must be on the allow list before any handler
    // lookup happens.
    let type_allowed = config
        .proxy
        .iter()
        .any(|entry| entry.node_type() == node.node_type);
    let handler = if type_allowed {
        handlers.get(&node.node_type)
    } else {
        None
    };
    let Some(handler) = handler else {
        return Err("Can't proxy a node of this node type.".to_string());
    };

    if let Some(allowed) = &config.allowed {
        if !allowed(&node, &inputs) {
            return Err("This proxy request is not allowed".to_string());
        }
    }

    debug!(node_type = %node.node_type, node_id = %node.id, "proxying node");
    let context = NodeHandlerContext {
        descriptor: Some(node),
        store: config.store.clone(),
    };
    let outputs = handler
        .invoke(inputs, &context)
        .await
        .map_err(|e| e.to_string())?
        .ok_or_else(|| "Handler returned nothing.".to_string())?;
    let outputs = normalize_error_output(outputs);
    match &config.store {
        Some(store) => inflate_values(store.as_ref(), outputs)
            .await
            .map_err(|e| e.to_string()),
        None => Ok(outputs),
    }
}

/// Handlers report their own failures as an `$error` output. When that value
/// is a structured error object, flatten it to its message so the reply
/// serializes cleanly.
fn normalize_error_output(mut outputs: OutputValues) -> OutputValues {
    if let Some(NodeValue::Object(fields)) = outputs.get_mut("$error") {
        let message = match fields.get("error") {
            Some(NodeValue::Object(inner)) => match inner.get("message") {
                Some(NodeValue::String(message)) => Some(message.clone()),
                _ => None,
            },
            _ => None,
        };
        if let Some(message) = message {
            fields.insert("error".to_string(), NodeValue::String(message));
        }
    }
    outputs
}

/// Shared state for the HTTP binding.
#[derive(Clone)]
pub struct AppState {
    config: Arc<ProxyServerConfig>,
}

/// Build a router serving the proxy protocol at `POST /`.
pub fn router(config: Arc<ProxyServerConfig>) -> Router {
    Router::new()
        .route("/", post(proxy_handler))
        .with_state(AppState { config })
}

/// Bridge one HTTP request to a proxy server run: the JSON body becomes the
/// inbound message list and the response streams SSE records as the server
/// produces them.
#[instrument(skip(state, body))]
async fn proxy_handler(State(state): State<AppState>, Json(body): Json<Value>) -> Response {
    let (records_tx, records_rx) = mpsc::channel::<String>(32);
    let transport = HttpServerTransport::new(body, records_tx);
    let config = state.config;
    tokio::spawn(async move {
        if let Err(e) = ProxyServer::new(transport).serve(&config).await {
            error!(error = %e, "proxy server failed");
        }
    });

    let body = Body::from_stream(
        ReceiverStream::new(records_rx).map(|record| Ok::<_, Infallible>(Bytes::from(record))),
    );
    match Response::builder()
        .header(header::CONTENT_TYPE, "text/event-stream")
        .body(body)
    {
        Ok(response) => response,
        Err(e) => {
            error!(error = %e, "failed to build response");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
