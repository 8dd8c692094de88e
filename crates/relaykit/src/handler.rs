//! Node handler seam
//!
//! The node-execution engine is an external collaborator; this crate only
//! consumes its contract: a handler takes named inputs plus a context and
//! produces named outputs. Handlers are grouped into kits, the unit the
//! graph engine plugs in.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;
use crate::message::NodeDescriptor;
use crate::value::{InputValues, NodeValue, OutputValues};

/// Execution context handed to a node handler.
#[derive(Default, Clone)]
pub struct NodeHandlerContext {
    /// The node being executed, when known.
    pub descriptor: Option<NodeDescriptor>,
    /// Optional content-addressed data store.
    pub store: Option<Arc<dyn DataStore>>,
}

/// Runs one node type.
#[async_trait]
pub trait NodeHandler: Send + Sync {
    /// Execute a node. `Ok(None)` means the handler produced nothing, which
    /// the proxy server reports to the caller as an error.
    async fn invoke(
        &self,
        inputs: InputValues,
        context: &NodeHandlerContext,
    ) -> Result<Option<OutputValues>>;
}

/// A shared handler reference.
pub type BoxedHandler = Arc<dyn NodeHandler>;

/// A named table of node handlers.
pub struct Kit {
    /// Identifies where the kit's handlers come from.
    pub url: String,
    /// Handlers by node type.
    pub handlers: HashMap<String, BoxedHandler>,
}

impl Kit {
    /// Create an empty kit.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            handlers: HashMap::new(),
        }
    }

    /// Register a handler for a node type.
    #[must_use]
    pub fn add_handler(
        mut self,
        node_type: impl Into<String>,
        handler: impl NodeHandler + 'static,
    ) -> Self {
        self.handlers.insert(node_type.into(), Arc::new(handler));
        self
    }
}

/// Flatten kits into one handler table. When two kits register the same node
/// type, the earlier kit wins.
#[must_use]
pub fn handlers_from_kits(kits: &[Kit]) -> HashMap<String, BoxedHandler> {
    let mut handlers: HashMap<String, BoxedHandler> = HashMap::new();
    for kit in kits {
        for (node_type, handler) in &kit.handlers {
            handlers
                .entry(node_type.clone())
                .or_insert_with(|| Arc::clone(handler));
        }
    }
    handlers
}

/// Content-addressed data store, an external collaborator. Values may carry
/// stored-data references; inflating replaces them with literal payloads so
/// they survive the wire.
#[async_trait]
pub trait DataStore: Send + Sync {
    /// Expand stored-data references inside `value` into literal payloads.
    async fn inflate(&self, value: Value) -> Result<Value>;
}

/// Inflate every plain-JSON entry of a value map through the store. Entries
/// carrying a live stream pass through untouched; a stream is not stored
/// data.
pub(crate) async fn inflate_values(
    store: &dyn DataStore,
    values: BTreeMap<String, NodeValue>,
) -> Result<BTreeMap<String, NodeValue>> {
    let mut out = BTreeMap::new();
    for (key, value) in values {
        let value = if value.has_stream() {
            value
        } else {
            NodeValue::from_json(store.inflate(value.into_json()?).await?)
        };
        out.insert(key, value);
    }
    Ok(out)
}
