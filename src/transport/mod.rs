//! # Transport-Level Inputs (RFC 9000 Sections 4, 7.4)
//!
//! Negotiated limits the send path consumes. Parameters are agreed before
//! streams open and are immutable afterwards; only MAX_DATA,
//! MAX_STREAM_DATA and MAX_STREAMS frames raise the operative limits.

pub mod parameters;

pub use parameters::TransportParameters;
