//! Proxy client
//!
//! Sends node executions to a remote proxy server and exposes the results
//! through the same handler seam local kits use, so a graph runner cannot
//! tell a proxied node from a local one.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::config::NodeProxyConfig;
use crate::error::{Error, Result};
use crate::handler::{inflate_values, Kit, NodeHandler, NodeHandlerContext};
use crate::message::{timestamp, NodeDescriptor, ProxyRequest, ProxyResponse};
use crate::transport::ClientTransport;
use crate::value::{InputValues, OutputValues};

/// Client for one proxy server endpoint. Cheap to clone; each call opens its
/// own single-use stream.
pub struct ProxyClient<T> {
    transport: Arc<T>,
}

impl<T> Clone for ProxyClient<T> {
    fn clone(&self) -> Self {
        Self {
            transport: Arc::clone(&self.transport),
        }
    }
}

impl<T> ProxyClient<T>
where
    T: ClientTransport<ProxyRequest, ProxyResponse> + 'static,
{
    pub fn new(transport: T) -> Self {
        Self {
            transport: Arc::new(transport),
        }
    }

    /// Execute `node` remotely. Inputs are inflated through the context's
    /// store first, so stored-data references never leave the process as
    /// bare handles.
    pub async fn proxy(
        &self,
        node: NodeDescriptor,
        inputs: InputValues,
        context: &NodeHandlerContext,
    ) -> Result<OutputValues> {
        let inputs = match &context.store {
            Some(store) => inflate_values(store.as_ref(), inputs).await?,
            None => inputs,
        };
        debug!(node_type = %node.node_type, node_id = %node.id, "proxying node remotely");
        let mut stream = self.transport.create_client_stream();
        stream.write(ProxyRequest::Proxy { node, inputs }).await?;
        match stream.read().await? {
            None => Err(Error::EmptyResponse),
            Some(ProxyResponse::Outputs { outputs }) => Ok(outputs),
            Some(ProxyResponse::Error { error, .. }) => Err(Error::RemoteExecution(error)),
        }
    }

    /// Ask the server to stop serving this connection. Best effort; a
    /// transport failure here is logged and swallowed.
    pub async fn shutdown_server(&self) {
        let mut stream = self.transport.create_client_stream();
        if let Err(e) = stream
            .write(ProxyRequest::End {
                timestamp: timestamp(),
            })
            .await
        {
            warn!(error = %e, "failed to deliver shutdown");
        }
    }

    /// Build a kit whose handlers forward to this proxy server: one proxied
    /// handler per allow-list entry, plus any `fallback` kit handlers for
    /// node types the allow list does not cover.
    #[must_use]
    pub fn create_proxy_kit(&self, config: &NodeProxyConfig, fallback: Vec<Kit>) -> Kit {
        let mut kit = Kit::new("proxy");
        for entry in config {
            let node_type = entry.node_type().to_string();
            kit = kit.add_handler(
                node_type.clone(),
                ProxiedHandler {
                    client: self.clone(),
                    node_type,
                },
            );
        }
        for fallback_kit in fallback {
            for (node_type, handler) in fallback_kit.handlers {
                kit.handlers.entry(node_type).or_insert(handler);
            }
        }
        kit
    }
}

/// A handler that executes its node type on the remote proxy server.
struct ProxiedHandler<T> {
    client: ProxyClient<T>,
    node_type: String,
}

#[async_trait]
impl<T> NodeHandler for ProxiedHandler<T>
where
    T: ClientTransport<ProxyRequest, ProxyResponse> + 'static,
{
    async fn invoke(
        &self,
        inputs: InputValues,
        context: &NodeHandlerContext,
    ) -> Result<Option<OutputValues>> {
        let node = match &context.descriptor {
            Some(descriptor) => descriptor.clone(),
            None => NodeDescriptor::new(format!("proxied-{}", self.node_type), &self.node_type),
        };
        let outputs = self.client.proxy(node, inputs, context).await?;
        Ok(Some(outputs))
    }
}
