//! # Delivery Callback Dispatch
//!
//! Applications register interest in byte offsets: a *delivery* callback
//! fires once the offset is acknowledged (or the stream is reset at or
//! below it), a *tx* callback fires when the offset is first handed to the
//! wire. Dispatch is edge-triggered: each registration fires at most once,
//! and firing is deferred to a drain step after ACK processing so
//! callbacks stay out of the critical path. For a single stream, callbacks
//! fire in strictly increasing offset order.

use std::collections::BTreeMap;

use crate::types::{AppErrorCode, StreamId, StreamOffset};

/// Why a delivery registration fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// The registered offset was acknowledged by the peer.
    Delivered,
    /// The stream was reset before the offset was (reliably) delivered.
    Reset(AppErrorCode),
}

/// Notification handed to a delivery callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryNotice {
    pub stream_id: StreamId,
    pub offset: StreamOffset,
    pub outcome: DeliveryOutcome,
}

/// Notification handed to a tx callback when the offset first leaves the
/// endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxNotice {
    pub stream_id: StreamId,
    pub offset: StreamOffset,
}

/// Callback fired when a registered offset is delivered or abandoned.
pub type DeliveryCallback = Box<dyn FnOnce(DeliveryNotice)>;

/// Callback fired when a registered offset is first transmitted.
pub type TxCallback = Box<dyn FnOnce(TxNotice)>;

/// Per-stream registry of offset-keyed byte-event registrations.
#[derive(Default)]
pub struct ByteEventRegistry {
    delivery: BTreeMap<StreamOffset, Vec<DeliveryCallback>>,
    tx: BTreeMap<StreamOffset, Vec<TxCallback>>,
}

impl ByteEventRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_delivery(&mut self, offset: StreamOffset, cb: DeliveryCallback) {
        self.delivery.entry(offset).or_default().push(cb);
    }

    pub fn register_tx(&mut self, offset: StreamOffset, cb: TxCallback) {
        self.tx.entry(offset).or_default().push(cb);
    }

    /// Whether any registration is still outstanding.
    pub fn is_empty(&self) -> bool {
        self.delivery.is_empty() && self.tx.is_empty()
    }

    /// Fire delivery callbacks whose offset `matured` reports as
    /// acknowledged, in increasing offset order.
    pub fn drain_delivered(
        &mut self,
        stream_id: StreamId,
        mut matured: impl FnMut(StreamOffset) -> bool,
    ) {
        let ready: Vec<StreamOffset> = self
            .delivery
            .keys()
            .copied()
            .filter(|&off| matured(off))
            .collect();
        for offset in ready {
            for cb in self.delivery.remove(&offset).unwrap_or_default() {
                cb(DeliveryNotice {
                    stream_id,
                    offset,
                    outcome: DeliveryOutcome::Delivered,
                });
            }
        }
    }

    /// On reset, registrations at or above `reliable_floor` cannot be
    /// delivered anymore; fire them with a reset notification. Offsets
    /// below the floor keep waiting for their acknowledgement.
    pub fn drain_reset(
        &mut self,
        stream_id: StreamId,
        reliable_floor: StreamOffset,
        error_code: AppErrorCode,
    ) {
        let abandoned: Vec<StreamOffset> = self
            .delivery
            .range(reliable_floor..)
            .map(|(&off, _)| off)
            .collect();
        for offset in abandoned {
            for cb in self.delivery.remove(&offset).unwrap_or_default() {
                cb(DeliveryNotice {
                    stream_id,
                    offset,
                    outcome: DeliveryOutcome::Reset(error_code),
                });
            }
        }
        // Tx registrations above the floor will never be sent either.
        let stale: Vec<StreamOffset> = self
            .tx
            .range(reliable_floor..)
            .map(|(&off, _)| off)
            .collect();
        for offset in stale {
            self.tx.remove(&offset);
        }
    }

    /// Fire tx callbacks for offsets strictly below `sent_high_water`.
    pub fn drain_transmitted(&mut self, stream_id: StreamId, sent_high_water: StreamOffset) {
        let ready: Vec<StreamOffset> = self
            .tx
            .range(..sent_high_water)
            .map(|(&off, _)| off)
            .collect();
        for offset in ready {
            for cb in self.tx.remove(&offset).unwrap_or_default() {
                cb(TxNotice { stream_id, offset });
            }
        }
    }
}

impl core::fmt::Debug for ByteEventRegistry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ByteEventRegistry")
            .field("delivery_offsets", &self.delivery.keys().collect::<Vec<_>>())
            .field("tx_offsets", &self.tx.keys().collect::<Vec<_>>())
            .finish()
    }
}
