//! Frame descriptor types.

use bytes::Bytes;

use crate::types::{AppErrorCode, StreamId, StreamOffset};

/// STREAM frame descriptor produced from pending writes (RFC 9000 §19.8).
///
/// `data` is empty for ranges tracked by metadata only (bytes supplied
/// lazily by the application); `len` is authoritative in that case.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamFrame {
    pub stream_id: StreamId,
    pub offset: StreamOffset,
    pub len: u64,
    pub fin: bool,
    /// Range tracked in the metadata-only retransmission map.
    pub from_buf_meta: bool,
    pub data: Bytes,
}

impl StreamFrame {
    /// The descriptor an outstanding-packets registry keeps for ACK/loss
    /// accounting: everything but the payload bytes.
    pub fn meta(&self) -> StreamFrameMeta {
        StreamFrameMeta {
            stream_id: self.stream_id,
            offset: self.offset,
            len: self.len,
            fin: self.fin,
            from_buf_meta: self.from_buf_meta,
        }
    }
}

/// Data-less descriptor of a transmitted STREAM range, as replayed by the
/// outstanding-packets registry on acknowledgement or loss.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamFrameMeta {
    pub stream_id: StreamId,
    pub offset: StreamOffset,
    pub len: u64,
    pub fin: bool,
    pub from_buf_meta: bool,
}

/// RESET_STREAM / RESET_STREAM_AT descriptor (RFC 9000 §19.4).
///
/// `reliable_size: Some(_)` selects the RESET_STREAM_AT variant: the sender
/// commits to deliver every byte with offset below it before abandoning the
/// remainder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResetStreamFrame {
    pub stream_id: StreamId,
    pub error_code: AppErrorCode,
    pub final_size: u64,
    pub reliable_size: Option<u64>,
}

impl ResetStreamFrame {
    pub const fn is_reliable(&self) -> bool {
        self.reliable_size.is_some()
    }
}

/// STOP_SENDING frame consumed from the peer (RFC 9000 §19.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StopSendingFrame {
    pub stream_id: StreamId,
    pub error_code: AppErrorCode,
}

/// MAX_DATA frame (RFC 9000 §19.9).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaxDataFrame {
    pub maximum_data: u64,
}

/// MAX_STREAM_DATA frame (RFC 9000 §19.10).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaxStreamDataFrame {
    pub stream_id: StreamId,
    pub maximum_data: u64,
}

/// MAX_STREAMS frame (RFC 9000 §19.11).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaxStreamsFrame {
    pub maximum_streams: u64,
    pub bidirectional: bool,
}

/// DATA_BLOCKED frame (RFC 9000 §19.12).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataBlockedFrame {
    pub limit: u64,
}

/// STREAM_DATA_BLOCKED frame (RFC 9000 §19.13).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamDataBlockedFrame {
    pub stream_id: StreamId,
    pub limit: u64,
}

/// Frames the send path produces or consumes, by kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Stream(StreamFrame),
    ResetStream(ResetStreamFrame),
    StopSending(StopSendingFrame),
    MaxData(MaxDataFrame),
    MaxStreamData(MaxStreamDataFrame),
    MaxStreams(MaxStreamsFrame),
    DataBlocked(DataBlockedFrame),
    StreamDataBlocked(StreamDataBlockedFrame),
}
