//! Physical transports
//!
//! A transport adapts one physical channel to the bidirectional stream
//! abstraction. The HTTP binding pairs a client POST with a server-sent
//! events response; the memory binding connects both halves in-process over
//! channels for tests and same-process embedding.

pub mod http;
pub mod memory;

pub use http::{HttpClientTransport, HttpServerTransport};
pub use memory::{MemoryConnection, MemoryListener};

use crate::error::Result;
use crate::message::WireMessage;
use crate::stream::{ClientBidirectionalStream, ServerBidirectionalStream};

/// Caller-side half of a physical transport.
///
/// Every created stream is independent and single use: one write, then a
/// read-only sequence of responses.
pub trait ClientTransport<Req: WireMessage, Res: WireMessage>: Send + Sync {
    /// Open a fresh single-use stream for one logical exchange.
    fn create_client_stream(&self) -> ClientBidirectionalStream<Req, Res>;
}

/// Server-side half of a physical transport, wrapping exactly one inbound
/// exchange.
pub trait ServerTransport<Req: WireMessage, Res: WireMessage> {
    /// Consume the transport into the stream for its exchange.
    fn create_server_stream(self) -> Result<ServerBidirectionalStream<Req, Res>>;
}
