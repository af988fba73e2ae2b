//! # Core Stream Types (RFC 9000 Section 2.1)
//!
//! Fundamental identifiers and primitives shared across the send path.
//! Stream identifiers are 62-bit integers whose two low bits encode the
//! initiator and directionality of the stream.

/// Byte offset within a stream.
pub type StreamOffset = u64;

/// Application-level error code carried in RESET_STREAM / STOP_SENDING.
pub type AppErrorCode = u64;

/// Maximum value encodable as a QUIC variable-length integer (2^62 - 1).
pub const VARINT_MAX: u64 = (1u64 << 62) - 1;

/// Maximum stream ID value.
pub const MAX_STREAM_ID: u64 = VARINT_MAX;

/// Stream ID - Identifies a bidirectional or unidirectional stream
///
/// The two least significant bits encode stream type and initiator:
/// - Bit 0: Initiator (0=client, 1=server)
/// - Bit 1: Direction (0=bidirectional, 1=unidirectional)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamId(pub u64);

impl StreamId {
    /// Create a new StreamId from its raw wire value.
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Build a stream ID from its components.
    ///
    /// `ordinal` is the per-type sequence number (0 for the first stream of
    /// a given type, 1 for the second, and so on).
    pub const fn from_parts(
        initiator: StreamInitiator,
        direction: StreamDirection,
        ordinal: u64,
    ) -> Self {
        let mut bits = ordinal << 2;
        if matches!(initiator, StreamInitiator::Server) {
            bits |= 0x01;
        }
        if matches!(direction, StreamDirection::Unidirectional) {
            bits |= 0x02;
        }
        Self(bits)
    }

    /// Get the raw value.
    pub const fn value(self) -> u64 {
        self.0
    }

    /// The per-type sequence number of this stream.
    pub const fn ordinal(self) -> u64 {
        self.0 >> 2
    }

    /// Check if this stream is bidirectional.
    pub const fn is_bidirectional(self) -> bool {
        (self.0 & 0x02) == 0
    }

    /// Check if this stream is unidirectional.
    pub const fn is_unidirectional(self) -> bool {
        (self.0 & 0x02) != 0
    }

    pub const fn is_client_initiated(self) -> bool {
        (self.0 & 0x01) == 0
    }

    pub const fn is_server_initiated(self) -> bool {
        (self.0 & 0x01) != 0
    }

    /// The endpoint that opened this stream.
    pub const fn initiator(self) -> StreamInitiator {
        if self.is_client_initiated() {
            StreamInitiator::Client
        } else {
            StreamInitiator::Server
        }
    }

    /// The directionality of this stream.
    pub const fn direction(self) -> StreamDirection {
        if self.is_bidirectional() {
            StreamDirection::Bidirectional
        } else {
            StreamDirection::Unidirectional
        }
    }

    /// Whether `side` possesses a sending half on this stream.
    ///
    /// Bidirectional streams are sendable by both endpoints; unidirectional
    /// streams only by their initiator. The absent half is tagged Invalid in
    /// the send state machine.
    pub const fn is_sendable_by(self, side: Side) -> bool {
        if self.is_bidirectional() {
            return true;
        }
        match (self.initiator(), side) {
            (StreamInitiator::Client, Side::Client)
            | (StreamInitiator::Server, Side::Server) => true,
            _ => false,
        }
    }
}

impl core::fmt::Display for StreamId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for StreamId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

/// Connection endpoint side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    /// Client endpoint
    Client,
    /// Server endpoint
    Server,
}

impl Side {
    pub const fn is_client(self) -> bool {
        matches!(self, Side::Client)
    }

    pub const fn is_server(self) -> bool {
        matches!(self, Side::Server)
    }

    /// Get the opposite side.
    pub const fn opposite(self) -> Side {
        match self {
            Side::Client => Side::Server,
            Side::Server => Side::Client,
        }
    }
}

/// Stream directionality.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamDirection {
    Bidirectional,
    Unidirectional,
}

/// Stream initiator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamInitiator {
    Client,
    Server,
}

impl From<Side> for StreamInitiator {
    fn from(side: Side) -> Self {
        match side {
            Side::Client => StreamInitiator::Client,
            Side::Server => StreamInitiator::Server,
        }
    }
}

/// Number of urgency levels recognized by the scheduler (RFC 9218 shape).
pub const URGENCY_LEVELS: usize = 8;

/// Stream Priority (RFC 9218 - Extensible Priorities)
///
/// Urgency selects the scheduler level; `incremental` is carried for the
/// application's benefit and does not change scheduling within a level
/// (every level is round-robin).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamPriority {
    /// Urgency level (0-7, lower = higher priority)
    pub urgency: u8,

    /// Incremental flag
    pub incremental: bool,
}

impl StreamPriority {
    pub const fn new(urgency: u8, incremental: bool) -> Self {
        Self {
            urgency,
            incremental,
        }
    }

    /// Scheduler level for this priority, clamped to the supported range.
    pub fn level(self) -> usize {
        usize::from(self.urgency).min(URGENCY_LEVELS - 1)
    }
}

impl Default for StreamPriority {
    fn default() -> Self {
        Self {
            urgency: 3, // Default urgency per RFC 9218
            incremental: false,
        }
    }
}
