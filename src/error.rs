//! Error types for the send path (RFC 9000 Section 20).
//!
//! Two kinds of failure flow through the crate. Contract violations are
//! sender-side bugs (raising a reliable size, changing a reset error code,
//! acknowledging a range that was never recorded); they surface as
//! [`Error::Internal`] and are fatal to the connection. Protocol errors are
//! peer-induced and close the connection with the matching transport error
//! code and a diagnostic reason string.

use thiserror::Error;

use crate::types::{StreamDirection, StreamId};

/// Transport-level errors surfaced by the send path.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    /// Internal error (0x01). Sender-side contract violation; fatal.
    #[error("internal error: {0}")]
    Internal(String),

    /// Flow control error (0x03). The peer exceeded an advertised limit.
    #[error("flow control error: {0}")]
    FlowControl(String),

    /// Stream limit error (0x04). A stream ID beyond the negotiated cap.
    #[error("stream limit error: {0}")]
    StreamLimit(String),

    /// Stream state error (0x05). An event arrived in a state that cannot
    /// accept it.
    #[error("stream state error: {0}")]
    StreamState(String),

    /// Final size error (0x06). Peer disagreement on the final offset.
    #[error("final size error: {0}")]
    FinalSize(String),

    /// Protocol violation (0x0A). Catch-all for malformed peer behavior.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// Structured refusal when the application asks for a stream past the
    /// negotiated `initial_max_streams` limit. Maps to the stream limit
    /// error code on the wire.
    #[error("stream limit exceeded: {direction:?} limit is {limit}")]
    StreamLimitExceeded {
        direction: StreamDirection,
        limit: u64,
    },

    /// The stream ID does not name a known stream.
    #[error("unknown stream {0}")]
    UnknownStream(StreamId),
}

impl Error {
    /// Wire error code for CONNECTION_CLOSE (RFC 9000 Section 20.1).
    pub fn to_wire(&self) -> u64 {
        match self {
            Error::Internal(_) => 0x01,
            Error::FlowControl(_) => 0x03,
            Error::StreamLimit(_) | Error::StreamLimitExceeded { .. } => 0x04,
            Error::StreamState(_) | Error::UnknownStream(_) => 0x05,
            Error::FinalSize(_) => 0x06,
            Error::ProtocolViolation(_) => 0x0A,
        }
    }

    /// Contract violations indicate sender-side logic errors. They abort
    /// the connection; there is no local recovery.
    pub fn is_contract_violation(&self) -> bool {
        matches!(self, Error::Internal(_))
    }

    pub(crate) fn internal(reason: impl Into<String>) -> Self {
        Error::Internal(reason.into())
    }

    pub(crate) fn stream_state(reason: impl Into<String>) -> Self {
        Error::StreamState(reason.into())
    }
}

/// Result type alias for send-path operations.
pub type Result<T> = core::result::Result<T, Error>;
