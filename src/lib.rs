//! # quic-egress: QUIC Send-Side Stream Core
//!
//! The per-stream send state machine and stream scheduler of a QUIC
//! transport (RFC 9000), including reliable stream resets
//! (draft-ietf-quic-reliable-stream-reset). This crate governs when
//! application bytes become wire bytes, how acknowledgements retire
//! outstanding data, how resets are issued and confirmed, and in what
//! order concurrent streams share a connection's writable bandwidth.
//!
//! ## Architecture Overview
//!
//! ```text
//! quic-egress/
//! ├── error          - Transport error codes and diagnostics
//! ├── types          - Stream IDs, priorities, offsets
//! ├── frames         - Frame descriptors (kinds only, no codec)
//! ├── flow_control   - Connection- and stream-level send credit
//! ├── scheduler      - Round-robin within priority levels
//! ├── stream         - Buffers, send state machine, stream manager
//! ├── delivery       - Delivery / tx callback dispatch
//! └── transport      - Negotiated transport parameters
//! ```
//!
//! ## Design Principles
//!
//! 1. **Pure state machine**: no I/O, sockets, or event loops. The crate
//!    consumes input events (application writes, peer frames, ACK and loss
//!    notifications) and produces output events (frame descriptors,
//!    delivery notifications).
//!
//! 2. **Single-writer**: all state belongs to one connection's worker and
//!    is mutated through `&mut` only. No locks, no interior mutability.
//!
//! 3. **Zero-copy payloads**: queued and retransmitted stream data is held
//!    as [`bytes::Bytes`], sliced without copying for partial emission.
//!
//! 4. **Exact-match acknowledgement**: ACKed ranges must match the
//!    transmitted descriptor byte-for-byte; anything else is a sender-side
//!    contract violation and aborts the connection.
//!
//! ## Usage Example
//!
//! ```rust
//! use bytes::Bytes;
//! use quic_egress::{Frame, Side, StreamManager, TransportParameters};
//!
//! let params = TransportParameters::default();
//! let mut streams = StreamManager::new(Side::Client, params, params);
//!
//! let id = streams.open_bidi()?;
//! streams.write(id, Bytes::from_static(b"hello"), true)?;
//!
//! for frame in streams.poll_transmit(1200)? {
//!     match frame {
//!         Frame::Stream(f) => {
//!             // Hand `f` to the packetizer; keep `f.meta()` in the
//!             // outstanding-packets registry for ACK/loss accounting.
//!         }
//!         _ => { /* resets, blocked signals */ }
//!     }
//! }
//! # Ok::<(), quic_egress::Error>(())
//! ```

#![forbid(unsafe_code)]

/// Error types for send-path operations (RFC 9000 Section 20).
pub mod error;

/// Core identifiers and primitives (RFC 9000 Section 2.1).
pub mod types;

/// Frame descriptors by kind (RFC 9000 Section 19).
pub mod frames;

/// Send-side flow control (RFC 9000 Section 4).
pub mod flow_control;

/// Round-robin-within-priority stream scheduler.
pub mod scheduler;

/// Stream buffers, send state machine, and the stream manager.
pub mod stream;

/// Delivery and tx callback dispatch.
pub mod delivery;

/// Negotiated transport parameters (RFC 9000 Section 18.2).
pub mod transport;

pub use delivery::{DeliveryCallback, DeliveryNotice, DeliveryOutcome, TxCallback, TxNotice};
pub use error::{Error, Result};
pub use flow_control::SendFlowControl;
pub use frames::{Frame, ResetStreamFrame, StopSendingFrame, StreamFrame, StreamFrameMeta};
pub use scheduler::{PriorityScheduler, RoundRobin};
pub use stream::{SendState, SendStream, SendStreamStats, StreamManager};
pub use transport::TransportParameters;
pub use types::{AppErrorCode, Side, StreamDirection, StreamId, StreamOffset, StreamPriority};
