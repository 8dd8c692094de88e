//! Error types for the proxy protocol

use thiserror::Error;

/// Result type for protocol operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while running the proxy protocol
///
/// The taxonomy matters to callers: transport errors and protocol violations
/// are thrown at the call site, while application failures reported by the
/// remote peer travel as `error` messages and surface as
/// [`Error::RemoteExecution`] when the client unwraps a proxy reply.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// HTTP request failed
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Physical channel failed or closed mid-exchange
    #[error("transport error: {0}")]
    Transport(String),

    /// A repaired record could not be parsed as a protocol frame
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    /// JSON serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Protocol misuse by the caller or the peer
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// Second write on a single-use client stream
    #[error("only one write per stream instance is supported")]
    SingleWriteViolation,

    /// More than one embedded side-stream per envelope
    #[error("multiple streams are not supported")]
    MultipleStreams,

    /// Endpoint could not be parsed
    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    /// The remote peer reported an application-level failure
    #[error("remote execution failed: {0}")]
    RemoteExecution(String),

    /// The response stream closed before any message arrived
    #[error("empty response from proxy server")]
    EmptyResponse,

    /// The response carried a tag this protocol does not know
    #[error("unknown response type \"{0}\"")]
    UnknownResponseType(String),

    /// A node handler failed; the message is forwarded verbatim to the caller
    #[error("{0}")]
    Handler(String),
}

impl Error {
    /// Check whether this error is a programmer-facing protocol violation,
    /// as opposed to a transport failure or a remote application error.
    #[must_use]
    pub fn is_protocol_violation(&self) -> bool {
        matches!(
            self,
            Error::Protocol(_)
                | Error::SingleWriteViolation
                | Error::MultipleStreams
                | Error::UnknownResponseType(_)
        )
    }
}
