//! In-process loopback transport
//!
//! Connects the client and server halves over channels, delivering the same
//! body-plus-record-sink shape as the HTTP binding. Outgoing records can be
//! re-chunked at a configurable byte size so the repair stage sees the same
//! broken boundaries a real network produces.

use std::convert::Infallible;

use bytes::Bytes;
use futures::StreamExt;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::error::Error;
use crate::message::WireMessage;
use crate::repair;
use crate::stream::{ClientBidirectionalStream, FrameStream};
use crate::transport::http::HttpServerTransport;
use crate::transport::ClientTransport;

/// One inbound exchange delivered to the server side of a loopback
/// connection: the parsed request body and the sink its response records go
/// to.
pub struct MemoryExchange {
    /// The request body, as the HTTP binding would have parsed it.
    pub body: Value,
    /// Outbound record sink; dropping it ends the response stream.
    pub records: mpsc::Sender<String>,
}

/// Client side of a loopback connection. Cloneable; every created stream is
/// an independent exchange.
#[derive(Clone)]
pub struct MemoryConnection {
    exchanges: mpsc::Sender<MemoryExchange>,
    chunk_size: Option<usize>,
}

/// Server side of a loopback connection.
pub struct MemoryListener {
    exchanges: mpsc::Receiver<MemoryExchange>,
}

impl MemoryConnection {
    /// Create a connected client/listener pair.
    #[must_use]
    pub fn create() -> (Self, MemoryListener) {
        let (tx, rx) = mpsc::channel(16);
        (
            Self {
                exchanges: tx,
                chunk_size: None,
            },
            MemoryListener { exchanges: rx },
        )
    }

    /// Deliver response records to the client split into `size`-byte pieces,
    /// so logical records cross the repair stage in fragments.
    #[must_use]
    pub fn with_chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = Some(size.max(1));
        self
    }
}

impl MemoryListener {
    /// Accept the next inbound exchange, or `None` once every client handle
    /// is gone.
    pub async fn accept(&mut self) -> Option<HttpServerTransport> {
        let MemoryExchange { body, records } = self.exchanges.recv().await?;
        Some(HttpServerTransport::new(body, records))
    }
}

impl<Req: WireMessage, Res: WireMessage> ClientTransport<Req, Res> for MemoryConnection {
    fn create_client_stream(&self) -> ClientBidirectionalStream<Req, Res> {
        let exchanges = self.exchanges.clone();
        let chunk_size = self.chunk_size;
        ClientBidirectionalStream::new(Box::new(move |body: Value| {
            Box::pin(async move {
                let (records_tx, records_rx) = mpsc::channel::<String>(16);
                exchanges
                    .send(MemoryExchange {
                        body,
                        records: records_tx,
                    })
                    .await
                    .map_err(|_| Error::Transport("loopback server is gone".to_string()))?;

                let bytes = ReceiverStream::new(records_rx).flat_map(move |record: String| {
                    futures::stream::iter(split_record(record.as_bytes(), chunk_size))
                });
                Ok(Box::pin(repair::repair_records(bytes)) as FrameStream)
            })
        }))
    }
}

fn split_record(record: &[u8], chunk_size: Option<usize>) -> Vec<Result2<Bytes>> {
    match chunk_size {
        None => vec![Ok(Bytes::copy_from_slice(record))],
        Some(size) => record
            .chunks(size)
            .map(|piece| Ok(Bytes::copy_from_slice(piece)))
            .collect(),
    }
}

type Result2<T> = std::result::Result<T, Infallible>;
