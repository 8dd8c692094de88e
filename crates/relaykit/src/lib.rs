//! # RelayKit
//!
//! Bidirectional streaming transport and delegated node execution for graph
//! runners. A client ships a node's inputs to a remote proxy server, the
//! server runs the node through its own handler kits, and the outputs come
//! back over the same exchange — including values that are still streaming
//! when the reply is written.
//!
//! ## Layers
//!
//! - **Values**: [`NodeValue`] is a JSON tree that may embed one live value
//!   stream; the envelope codec replaces the stream with a wire token and
//!   the demultiplexer substitutes it back on the far side.
//! - **Streams**: [`ClientBidirectionalStream`] / `ServerBidirectionalStream`
//!   model one single-use exchange (one request write, many response reads)
//!   independent of the physical channel.
//! - **Transports**: HTTP (`POST` + server-sent events) and an in-process
//!   loopback with byte-level chunking for tests.
//! - **Proxy**: [`ProxyClient`] and [`ProxyServer`] speak the request and
//!   response messages on top, gated by an allow-list configuration.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use relaykit::{HttpClientTransport, NodeDescriptor, NodeHandlerContext, ProxyClient};
//!
//! let transport = HttpClientTransport::new("http://localhost:3000/proxy")?;
//! let client = ProxyClient::new(transport);
//! let outputs = client
//!     .proxy(
//!         NodeDescriptor::new("fetch-1", "fetch"),
//!         inputs,
//!         &NodeHandlerContext::default(),
//!     )
//!     .await?;
//! ```

pub mod client;
pub mod config;
pub mod envelope;
pub mod error;
pub mod handler;
pub mod message;
pub mod repair;
pub mod server;
pub mod stream;
pub mod transport;
pub mod value;

pub use client::ProxyClient;
pub use config::{
    AllowedPredicate, HandlerDecorator, NodeProxyConfig, NodeProxyEntry, NodeProxySpec,
    ProxyServerConfig,
};
pub use error::{Error, Result};
pub use handler::{BoxedHandler, DataStore, Kit, NodeHandler, NodeHandlerContext};
pub use message::{NodeDescriptor, ProxyRequest, ProxyResponse, WireMessage};
pub use server::{router, ProxyServer};
pub use stream::{ClientBidirectionalStream, ServerBidirectionalStream};
pub use transport::{
    ClientTransport, HttpClientTransport, HttpServerTransport, MemoryConnection, MemoryListener,
    ServerTransport,
};
pub use value::{InputValues, NodeValue, OutputValues, ValueStream};
