//! Credit accounting shared by the connection and per-stream levels.

use tracing::trace;

use crate::error::{Error, Result};

/// Send-direction credit against a peer-advertised maximum.
///
/// `consumed` counts fresh bytes only: the highest stream offset for the
/// per-stream instance, cumulative fresh payload bytes for the
/// connection-level instance. Writable credit is the advertised maximum
/// minus `consumed`, clamped at zero.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendFlowControl {
    consumed: u64,
    peer_max_offset: u64,
    /// Limit at which a blocked frame has been emitted; coalesces repeats.
    blocked_at: Option<u64>,
}

impl SendFlowControl {
    pub fn new(initial_max: u64) -> Self {
        Self {
            consumed: 0,
            peer_max_offset: initial_max,
            blocked_at: None,
        }
    }

    /// Remaining writable credit.
    pub fn available(&self) -> u64 {
        self.peer_max_offset.saturating_sub(self.consumed)
    }

    /// Consume credit for fresh bytes.
    ///
    /// Overrunning the peer's advertised limit is a sender-side bug.
    pub fn consume(&mut self, bytes: u64) -> Result<()> {
        if bytes > self.available() {
            return Err(Error::internal(format!(
                "flow control overrun: consume {bytes} with {} available",
                self.available()
            )));
        }
        self.consumed += bytes;
        Ok(())
    }

    /// Raise the peer-advertised maximum. Returns true if credit reopened.
    pub fn update(&mut self, new_max: u64) -> bool {
        if new_max <= self.peer_max_offset {
            return false;
        }
        trace!(
            old = self.peer_max_offset,
            new = new_max,
            "flow control limit raised"
        );
        let was_starved = self.available() == 0;
        self.peer_max_offset = new_max;
        self.blocked_at = None;
        was_starved
    }

    /// If credit is exhausted and no blocked frame is outstanding for this
    /// limit, latch and return the limit to advertise.
    pub fn blocked_signal(&mut self) -> Option<u64> {
        if self.available() > 0 {
            return None;
        }
        if self.blocked_at == Some(self.peer_max_offset) {
            return None;
        }
        self.blocked_at = Some(self.peer_max_offset);
        Some(self.peer_max_offset)
    }

    /// A blocked frame carrying `limit` was declared lost; re-arm the latch
    /// if the limit still applies.
    pub fn blocked_frame_lost(&mut self, limit: u64) {
        if self.blocked_at == Some(limit) && self.peer_max_offset == limit {
            self.blocked_at = None;
        }
    }

    /// Fresh bytes consumed so far.
    pub fn consumed(&self) -> u64 {
        self.consumed
    }

    /// Current peer-advertised maximum.
    pub fn limit(&self) -> u64 {
        self.peer_max_offset
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credit_accounting() {
        let mut fc = SendFlowControl::new(100);
        assert_eq!(fc.available(), 100);
        fc.consume(60).unwrap();
        assert_eq!(fc.available(), 40);
        assert_eq!(fc.consumed(), 60);
    }

    #[test]
    fn test_overrun_is_contract_violation() {
        let mut fc = SendFlowControl::new(10);
        let err = fc.consume(11).unwrap_err();
        assert!(err.is_contract_violation());
    }

    #[test]
    fn test_blocked_latches_once_per_limit() {
        let mut fc = SendFlowControl::new(5);
        fc.consume(5).unwrap();
        assert_eq!(fc.blocked_signal(), Some(5));
        // Coalesced until the limit changes.
        assert_eq!(fc.blocked_signal(), None);

        assert!(fc.update(10));
        assert_eq!(fc.blocked_signal(), None, "credit reopened");
        fc.consume(5).unwrap();
        assert_eq!(fc.blocked_signal(), Some(10));
    }

    #[test]
    fn test_blocked_frame_loss_rearms() {
        let mut fc = SendFlowControl::new(5);
        fc.consume(5).unwrap();
        assert_eq!(fc.blocked_signal(), Some(5));
        fc.blocked_frame_lost(5);
        assert_eq!(fc.blocked_signal(), Some(5));
    }

    #[test]
    fn test_blocked_frame_loss_stale_limit_ignored() {
        let mut fc = SendFlowControl::new(5);
        fc.consume(5).unwrap();
        assert_eq!(fc.blocked_signal(), Some(5));
        fc.update(10);
        // Loss of the old blocked frame does not re-arm at the new limit.
        fc.blocked_frame_lost(5);
        assert_eq!(fc.blocked_signal(), None);
    }

    #[test]
    fn test_update_never_lowers() {
        let mut fc = SendFlowControl::new(100);
        assert!(!fc.update(50));
        assert_eq!(fc.limit(), 100);
        assert!(!fc.update(100));
    }

    #[test]
    fn test_update_reports_reopened_credit() {
        let mut fc = SendFlowControl::new(4);
        fc.consume(4).unwrap();
        assert!(fc.update(8), "stream was starved, now writable");
        fc.consume(2).unwrap();
        assert!(!fc.update(12), "stream was not starved");
    }
}
