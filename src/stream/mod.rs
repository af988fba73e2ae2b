//! # Stream Send Path (RFC 9000 Sections 2, 3)
//!
//! Per-stream send-side state and the manager that owns the stream set:
//!
//! - [`buffer`]: pending writes and the retransmission buffer
//! - [`ranges`]: acked-interval bookkeeping
//! - [`send`]: the {Open, ResetSent, Closed, Invalid} state machine
//! - [`manager`]: stream table, auxiliary queues, limits, and the write loop

pub mod buffer;
pub mod manager;
pub mod ranges;
pub mod send;

pub use buffer::{BufMetaRange, PendingChunk, RetransmissionBuffer, SentRange};
pub use manager::StreamManager;
pub use ranges::AckedRanges;
pub use send::{AckDisposition, SendState, SendStream, SendStreamStats};
