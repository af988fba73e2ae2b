//! # Frame Descriptors (RFC 9000 Section 19)
//!
//! The send path distinguishes frame *kinds* only. Wire encoding and
//! decoding happen elsewhere; this module defines the descriptors the core
//! produces (STREAM, RESET_STREAM, RESET_STREAM_AT, DATA_BLOCKED,
//! STREAM_DATA_BLOCKED) and consumes (STOP_SENDING, MAX_DATA,
//! MAX_STREAM_DATA, MAX_STREAMS).

mod types;

pub use types::{
    DataBlockedFrame, Frame, MaxDataFrame, MaxStreamDataFrame, MaxStreamsFrame, ResetStreamFrame,
    StopSendingFrame, StreamDataBlockedFrame, StreamFrame, StreamFrameMeta,
};

/// Frame Type Constants (RFC 9000 Section 19)
pub const FRAME_TYPE_RESET_STREAM: u64 = 0x04;
pub const FRAME_TYPE_STOP_SENDING: u64 = 0x05;
pub const FRAME_TYPE_STREAM_BASE: u64 = 0x08; // 0x08-0x0f
pub const FRAME_TYPE_MAX_DATA: u64 = 0x10;
pub const FRAME_TYPE_MAX_STREAM_DATA: u64 = 0x11;
pub const FRAME_TYPE_MAX_STREAMS_BIDI: u64 = 0x12;
pub const FRAME_TYPE_MAX_STREAMS_UNI: u64 = 0x13;
pub const FRAME_TYPE_DATA_BLOCKED: u64 = 0x14;
pub const FRAME_TYPE_STREAM_DATA_BLOCKED: u64 = 0x15;

/// RESET_STREAM_AT (draft-ietf-quic-reliable-stream-reset).
pub const FRAME_TYPE_RESET_STREAM_AT: u64 = 0x24;
