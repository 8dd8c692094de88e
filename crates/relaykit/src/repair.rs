//! Chunk repair: reassembly of records split by the byte transport
//!
//! The wire carries one record per protocol frame, each shaped
//! `data: <json>\n\n`. TCP, HTTP proxies and streaming response bodies are
//! free to deliver those records split at arbitrary byte offsets or coalesced
//! into one read. This stage buffers incoming bytes, cuts on the record
//! delimiter, holds back any trailing partial record, and only hands whole,
//! parseable JSON records downstream.

use bytes::Bytes;
use futures::{Stream, StreamExt};
use serde_json::Value;

use crate::error::{Error, Result};

const RECORD_DELIMITER: &[u8] = b"\n\n";
const DATA_PREFIX: &str = "data: ";

/// Byte-accumulating record reassembler.
///
/// Buffers raw bytes and emits every record completed so far. Splitting
/// happens before UTF-8 decoding, so a chunk boundary in the middle of a
/// multi-byte character is harmless.
#[derive(Debug, Default)]
pub struct ChunkRepair {
    buffer: Vec<u8>,
}

impl ChunkRepair {
    /// Create an empty reassembler.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw bytes; returns the payload of every record this chunk
    /// completed, in arrival order.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<Value>> {
        self.buffer.extend_from_slice(chunk);
        let mut records = Vec::new();
        while let Some(at) = find_delimiter(&self.buffer) {
            let record: Vec<u8> = self.buffer.drain(..at + RECORD_DELIMITER.len()).collect();
            let body = &record[..at];
            // An empty record is a keep-alive, not a frame.
            if body.is_empty() {
                continue;
            }
            records.push(parse_record(body)?);
        }
        Ok(records)
    }

    /// Bytes buffered but not yet forming a complete record.
    #[must_use]
    pub fn remainder(&self) -> &[u8] {
        &self.buffer
    }
}

fn find_delimiter(buffer: &[u8]) -> Option<usize> {
    buffer
        .windows(RECORD_DELIMITER.len())
        .position(|window| window == RECORD_DELIMITER)
}

fn parse_record(record: &[u8]) -> Result<Value> {
    let text = std::str::from_utf8(record)
        .map_err(|e| Error::MalformedFrame(format!("record is not valid UTF-8: {e}")))?;
    let payload = text.strip_prefix(DATA_PREFIX).ok_or_else(|| {
        Error::MalformedFrame(format!("record is missing the \"data: \" prefix: {text:?}"))
    })?;
    serde_json::from_str(payload)
        .map_err(|e| Error::MalformedFrame(format!("unparseable record {payload:?}: {e}")))
}

/// Adapt a raw byte stream into a stream of repaired records.
///
/// A parse failure after repair, or a stream that ends mid-record, is fatal:
/// the error is yielded and the record stream terminates.
pub fn repair_records<S, E>(source: S) -> impl Stream<Item = Result<Value>> + Send + 'static
where
    S: Stream<Item = std::result::Result<Bytes, E>> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    async_stream::try_stream! {
        let mut repair = ChunkRepair::new();
        let mut source = Box::pin(source);
        while let Some(chunk) = source.next().await {
            let chunk =
                chunk.map_err(|e| Error::Transport(format!("reading response body: {e}")))?;
            for record in repair.push(&chunk)? {
                yield record;
            }
        }
        if !repair.remainder().is_empty() {
            Err(Error::MalformedFrame(
                "stream ended in the middle of a record".to_string(),
            ))?;
        }
    }
}
