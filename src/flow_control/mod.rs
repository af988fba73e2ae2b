//! # Send-Side Flow Control (RFC 9000 Section 4)
//!
//! Credit-based accounting at two levels:
//! - **Connection-level**: total fresh bytes across all streams, bounded by
//!   the peer's MAX_DATA.
//! - **Stream-level**: the highest stream offset, bounded by the peer's
//!   MAX_STREAM_DATA.
//!
//! When credit runs out the stream leaves the scheduler and a blocked
//! signal latches so the transport emits DATA_BLOCKED or
//! STREAM_DATA_BLOCKED exactly once per limit. A peer limit raise re-arms
//! the latch and re-admits the stream. Retransmitted ranges never consume
//! fresh credit.

mod controller;

pub use controller::SendFlowControl;
