//! Transport parameters consumed by the send path (RFC 9000 Section 18.2).
//!
//! Wire encoding lives with the handshake; the send path only needs the
//! resulting limits.

use crate::types::{Side, StreamId, VARINT_MAX};

/// Default initial maximum data (15 MB).
pub const DEFAULT_INITIAL_MAX_DATA: u64 = 15 * 1024 * 1024;

/// Default initial maximum stream data (6 MB).
pub const DEFAULT_INITIAL_MAX_STREAM_DATA: u64 = 6 * 1024 * 1024;

/// Default maximum number of concurrently open streams per type.
pub const DEFAULT_MAX_STREAMS: u64 = 100;

/// The subset of transport parameters the send path consumes.
///
/// Each endpoint advertises one of these; the *peer's* copy governs what we
/// may send (connection data, per-stream data, stream counts), our own copy
/// governs what the peer may open toward us.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportParameters {
    /// Connection-level flow control window.
    pub initial_max_data: u64,

    /// Stream window for bidi streams opened by the advertising endpoint.
    pub initial_max_stream_data_bidi_local: u64,

    /// Stream window for bidi streams opened by the advertising endpoint's
    /// peer.
    pub initial_max_stream_data_bidi_remote: u64,

    /// Stream window for unidirectional streams.
    pub initial_max_stream_data_uni: u64,

    /// Concurrent bidirectional streams the peer may open.
    pub initial_max_streams_bidi: u64,

    /// Concurrent unidirectional streams the peer may open.
    pub initial_max_streams_uni: u64,

    /// RESET_STREAM_AT support (draft-ietf-quic-reliable-stream-reset).
    pub reliable_stream_reset: bool,
}

impl Default for TransportParameters {
    fn default() -> Self {
        Self {
            initial_max_data: DEFAULT_INITIAL_MAX_DATA,
            initial_max_stream_data_bidi_local: DEFAULT_INITIAL_MAX_STREAM_DATA,
            initial_max_stream_data_bidi_remote: DEFAULT_INITIAL_MAX_STREAM_DATA,
            initial_max_stream_data_uni: DEFAULT_INITIAL_MAX_STREAM_DATA,
            initial_max_streams_bidi: DEFAULT_MAX_STREAMS,
            initial_max_streams_uni: DEFAULT_MAX_STREAMS,
            reliable_stream_reset: false,
        }
    }
}

impl TransportParameters {
    /// All values must fit in a varint.
    pub fn validate(&self) -> bool {
        [
            self.initial_max_data,
            self.initial_max_stream_data_bidi_local,
            self.initial_max_stream_data_bidi_remote,
            self.initial_max_stream_data_uni,
            self.initial_max_streams_bidi,
            self.initial_max_streams_uni,
        ]
        .iter()
        .all(|&v| v <= VARINT_MAX)
    }

    /// The initial send window these (peer-advertised) parameters grant
    /// `local_side` on `id`.
    ///
    /// A bidi stream we opened is "remote" from the peer's perspective; a
    /// bidi stream the peer opened is its "local".
    pub fn initial_send_window(&self, id: StreamId, local_side: Side) -> u64 {
        if id.is_unidirectional() {
            return self.initial_max_stream_data_uni;
        }
        let locally_initiated = match local_side {
            Side::Client => id.is_client_initiated(),
            Side::Server => id.is_server_initiated(),
        };
        if locally_initiated {
            self.initial_max_stream_data_bidi_remote
        } else {
            self.initial_max_stream_data_bidi_local
        }
    }
}
