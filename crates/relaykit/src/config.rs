//! Proxy server configuration
//!
//! Which node types may be proxied, how they are handled, and the optional
//! gates (allow predicate, data store) applied around execution.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::handler::{BoxedHandler, DataStore, Kit};
use crate::message::NodeDescriptor;
use crate::value::InputValues;

/// A proxied node type with tunables attached.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeProxySpec {
    /// The node type this entry covers.
    pub node: String,
    /// Handler-specific configuration, opaque to the proxy layer.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config: Option<Value>,
}

/// One entry of the proxied-node allow list: either a bare node type or a
/// spec with per-type configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum NodeProxyEntry {
    Type(String),
    Spec(NodeProxySpec),
}

impl NodeProxyEntry {
    /// The node type this entry allows.
    #[must_use]
    pub fn node_type(&self) -> &str {
        match self {
            Self::Type(node_type) => node_type,
            Self::Spec(spec) => &spec.node,
        }
    }
}

/// The full allow list of proxied node types.
pub type NodeProxyConfig = Vec<NodeProxyEntry>;

/// Look up the per-type configuration for `node_type`, if the allow list
/// carries one.
#[must_use]
pub fn handler_config<'a>(config: &'a NodeProxyConfig, node_type: &str) -> Option<&'a Value> {
    config.iter().find_map(|entry| match entry {
        NodeProxyEntry::Spec(spec) if spec.node == node_type => spec.config.as_ref(),
        _ => None,
    })
}

/// Per-request gate evaluated before a handler runs.
pub type AllowedPredicate = Arc<dyn Fn(&NodeDescriptor, &InputValues) -> bool + Send + Sync>;

/// Transforms the flattened handler table before the server starts serving.
/// The hook sees every handler the kits contributed and can wrap, replace,
/// or drop entries wholesale.
pub type HandlerDecorator =
    Arc<dyn Fn(HashMap<String, BoxedHandler>) -> HashMap<String, BoxedHandler> + Send + Sync>;

/// Everything a proxy server needs to serve requests.
pub struct ProxyServerConfig {
    /// Handler sources, earlier kits taking precedence.
    pub kits: Vec<Kit>,
    /// Allow list of proxied node types. Empty by default: a node type must
    /// be listed here before the server will execute it, regardless of what
    /// the kits can handle.
    pub proxy: NodeProxyConfig,
    /// Decorates the flattened handler table before serving starts.
    pub decorator: Option<HandlerDecorator>,
    /// Data store used to inflate outputs before they hit the wire.
    pub store: Option<Arc<dyn DataStore>>,
    /// Extra per-request gate.
    pub allowed: Option<AllowedPredicate>,
}

impl ProxyServerConfig {
    /// Configuration with kits only. The allow list starts empty, so every
    /// proxy request is denied until `with_proxy` opens specific types.
    #[must_use]
    pub fn new(kits: Vec<Kit>) -> Self {
        Self {
            kits,
            proxy: Vec::new(),
            decorator: None,
            store: None,
            allowed: None,
        }
    }

    /// Open serving for the listed node types.
    #[must_use]
    pub fn with_proxy(mut self, proxy: NodeProxyConfig) -> Self {
        self.proxy = proxy;
        self
    }

    /// Wrap the handler table before serving, e.g. to interpose value
    /// scrubbing or auditing around every handler.
    #[must_use]
    pub fn with_handler_decorator(
        mut self,
        decorator: impl Fn(HashMap<String, BoxedHandler>) -> HashMap<String, BoxedHandler>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        self.decorator = Some(Arc::new(decorator));
        self
    }

    /// Attach a data store.
    #[must_use]
    pub fn with_store(mut self, store: Arc<dyn DataStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Attach a per-request gate.
    #[must_use]
    pub fn with_allowed(
        mut self,
        allowed: impl Fn(&NodeDescriptor, &InputValues) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.allowed = Some(Arc::new(allowed));
        self
    }
}
