//! # Send State Machine (RFC 9000 Section 3.1)
//!
//! Per-stream sending state, driven by application, peer, and ACK events.
//! The "Invalid" state marks the absent half of a receive-only
//! unidirectional stream.
//!
//! ```text
//! Send State Machine
//! ==================
//!
//! [ Initial State ]
//!      |
//!      | Send Stream
//!      |
//!      v
//! Open ------------------------------------+
//!      |                                   |
//!      | Ack all bytes                     |
//!      | till FIN                          | Send RESET_STREAM(_AT)
//!      |                                   |
//!      v                                   v
//! Closed <---------------------------- ResetSent
//!          Reset ACKed and all bytes
//!          below the smallest ACKed
//!          reliable size ACKed.
//! ```

use bytes::Bytes;
use tracing::{debug, trace};

use crate::delivery::ByteEventRegistry;
use crate::error::{Error, Result};
use crate::flow_control::SendFlowControl;
use crate::frames::{ResetStreamFrame, StreamFrame};
use crate::stream::buffer::{
    AckOutcome, BufMetaRange, PendingChunk, PendingWrites, RetransmissionBuffer, SentRange,
};
use crate::stream::ranges::AckedRanges;
use crate::types::{AppErrorCode, StreamId, StreamPriority};

/// Stream Send State (RFC 9000 Section 3.1, simplified).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendState {
    /// Ready to accept and emit data (initial for any sendable stream).
    Open,

    /// RESET_STREAM or RESET_STREAM_AT queued or sent.
    ResetSent,

    /// Everything owed to the peer has been acknowledged.
    Closed,

    /// This endpoint has no sending half on the stream.
    Invalid,
}

impl SendState {
    pub const fn name(self) -> &'static str {
        match self {
            SendState::Open => "Open",
            SendState::ResetSent => "ResetSent",
            SendState::Closed => "Closed",
            SendState::Invalid => "Invalid",
        }
    }

    /// Terminal states for the send half.
    pub const fn is_terminal(self) -> bool {
        matches!(self, SendState::Closed | SendState::Invalid)
    }
}

/// Progress counters for one send stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendStreamStats {
    /// Bytes the application has queued. Only increases.
    pub bytes_written: u64,
    /// Bytes handed to the wire at least once. Only increases and is at
    /// most `bytes_written`.
    pub bytes_sent: u64,
    /// Bytes acknowledged contiguously from offset zero.
    pub bytes_acked: u64,
}

/// Effect of an acknowledged STREAM range on the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AckDisposition {
    /// The ACK completed the close condition.
    pub newly_closed: bool,
}

/// What an application reset request resulted in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ResetDisposition {
    /// A (new or shrunk) reset frame must be queued for the peer.
    Queued,
    /// Duplicate or state-inappropriate request; nothing to do.
    Ignored,
}

/// Result of asking a stream for its next STREAM frame.
#[derive(Debug)]
pub(crate) enum EmitOutcome {
    Frame {
        frame: StreamFrame,
        /// Fresh payload bytes that consumed connection-level credit
        /// (zero for retransmissions).
        fresh_bytes: u64,
    },
    /// Stream-level credit exhausted; latch STREAM_DATA_BLOCKED.
    BlockedOnStream,
    /// Connection-level credit exhausted; latch DATA_BLOCKED.
    BlockedOnConn,
    /// Nothing to emit.
    Nothing,
}

/// Per-stream send-side state record.
#[derive(Debug)]
pub struct SendStream {
    id: StreamId,
    state: SendState,

    /// Next byte offset the application queues at.
    write_offset: u64,
    /// Final size, set when the write side closes (FIN queued).
    final_write_offset: Option<u64>,

    pending: PendingWrites,
    /// Metadata-only ranges awaiting (re)emission; always past all real
    /// data in offset space.
    pending_metas: std::collections::VecDeque<BufMetaRange>,
    retransmission: RetransmissionBuffer,
    acked_intervals: AckedRanges,

    /// Set once a reset is queued; may never change afterwards.
    app_error_code_to_peer: Option<AppErrorCode>,
    /// Smallest reliable-delivery commitment made across resets; never
    /// increases.
    reliable_size_to_peer: Option<u64>,
    /// Final size carried in the queued reset frame.
    final_size_to_peer: Option<u64>,
    /// Minimum of all ACKed reliable sizes; zero for plain resets.
    min_reliable_size_acked: Option<u64>,
    /// A reset frame is queued and not yet emitted (or was lost).
    reset_pending: bool,

    flow_control: SendFlowControl,
    priority: StreamPriority,

    /// High-water mark of transmitted offsets.
    bytes_sent: u64,
    fin_acked: bool,
    /// Metadata writes started; real writes are no longer accepted.
    meta_writes_started: bool,

    pub(crate) events: ByteEventRegistry,
    /// The receive half has reached its terminal state (or never existed).
    pub(crate) recv_terminal: bool,
}

impl SendStream {
    pub(crate) fn new(
        id: StreamId,
        max_stream_data: u64,
        sendable: bool,
        recv_terminal: bool,
    ) -> Self {
        Self {
            id,
            state: if sendable {
                SendState::Open
            } else {
                SendState::Invalid
            },
            write_offset: 0,
            final_write_offset: None,
            pending: PendingWrites::new(),
            pending_metas: std::collections::VecDeque::new(),
            retransmission: RetransmissionBuffer::new(),
            acked_intervals: AckedRanges::new(),
            app_error_code_to_peer: None,
            reliable_size_to_peer: None,
            final_size_to_peer: None,
            min_reliable_size_acked: None,
            reset_pending: false,
            flow_control: SendFlowControl::new(max_stream_data),
            priority: StreamPriority::default(),
            bytes_sent: 0,
            fin_acked: false,
            meta_writes_started: false,
            events: ByteEventRegistry::new(),
            recv_terminal,
        }
    }

    pub fn id(&self) -> StreamId {
        self.id
    }

    pub fn state(&self) -> SendState {
        self.state
    }

    pub fn priority(&self) -> StreamPriority {
        self.priority
    }

    pub(crate) fn set_priority(&mut self, priority: StreamPriority) {
        self.priority = priority;
    }

    pub fn stats(&self) -> SendStreamStats {
        SendStreamStats {
            bytes_written: self.write_offset,
            bytes_sent: self.bytes_sent,
            bytes_acked: self.acked_intervals.acked_prefix_len(),
        }
    }

    pub fn acked_intervals(&self) -> &AckedRanges {
        &self.acked_intervals
    }

    pub fn retransmission_len(&self) -> usize {
        self.retransmission.len()
    }

    pub fn final_write_offset(&self) -> Option<u64> {
        self.final_write_offset
    }

    pub fn min_reliable_size_acked(&self) -> Option<u64> {
        self.min_reliable_size_acked
    }

    pub fn reliable_size_to_peer(&self) -> Option<u64> {
        self.reliable_size_to_peer
    }

    pub(crate) fn bytes_sent_high_water(&self) -> u64 {
        self.bytes_sent
    }

    pub(crate) fn reset_context(&self) -> Option<(AppErrorCode, u64)> {
        self.app_error_code_to_peer
            .map(|err| (err, self.reliable_size_to_peer.unwrap_or(0)))
    }

    pub(crate) fn flow_control(&self) -> &SendFlowControl {
        &self.flow_control
    }

    pub(crate) fn flow_control_mut(&mut self) -> &mut SendFlowControl {
        &mut self.flow_control
    }

    fn transition(&mut self, new_state: SendState) {
        trace!(
            stream = %self.id,
            "send state {} -> {}",
            self.state.name(),
            new_state.name()
        );
        self.state = new_state;
    }

    // ========================================================================
    // Application operations
    // ========================================================================

    /// Queue bytes (and optionally the FIN marker) for emission.
    pub(crate) fn write(&mut self, data: Bytes, fin: bool) -> Result<()> {
        match self.state {
            SendState::Invalid => {
                return Err(Error::stream_state(format!(
                    "cannot write on receive-only stream {}",
                    self.id
                )));
            }
            SendState::ResetSent | SendState::Closed => {
                return Err(Error::stream_state(format!(
                    "write on stream {} in state {}",
                    self.id,
                    self.state.name()
                )));
            }
            SendState::Open => {}
        }
        if self.final_write_offset.is_some() {
            return Err(Error::FinalSize(format!(
                "write on stream {} after FIN",
                self.id
            )));
        }
        if self.meta_writes_started {
            return Err(Error::internal(format!(
                "stream {} already carries metadata ranges; byte writes are closed",
                self.id
            )));
        }
        if data.is_empty() && !fin {
            return Ok(());
        }

        let offset = self.write_offset;
        self.write_offset += data.len() as u64;
        if fin {
            self.final_write_offset = Some(self.write_offset);
        }
        self.pending.push_back(PendingChunk { offset, data, fin });
        Ok(())
    }

    /// Queue a metadata-only range; the application supplies the bytes at
    /// transmission time.
    pub(crate) fn write_meta(&mut self, len: u64, fin: bool) -> Result<()> {
        match self.state {
            SendState::Invalid => {
                return Err(Error::stream_state(format!(
                    "cannot write on receive-only stream {}",
                    self.id
                )));
            }
            SendState::ResetSent | SendState::Closed => {
                return Err(Error::stream_state(format!(
                    "write on stream {} in state {}",
                    self.id,
                    self.state.name()
                )));
            }
            SendState::Open => {}
        }
        if self.final_write_offset.is_some() {
            return Err(Error::FinalSize(format!(
                "write on stream {} after FIN",
                self.id
            )));
        }
        if len == 0 && !fin {
            return Ok(());
        }

        let offset = self.write_offset;
        self.write_offset += len;
        if fin {
            self.final_write_offset = Some(self.write_offset);
        }
        self.meta_writes_started = true;
        self.pending_metas.push_back(BufMetaRange { offset, len, fin });
        Ok(())
    }

    /// Apply an application reset request.
    ///
    /// Contract: the error code may never change across resets, and the
    /// reliable size may only shrink. Violations are fatal.
    pub(crate) fn reset(
        &mut self,
        error_code: AppErrorCode,
        reliable_size: Option<u64>,
    ) -> Result<ResetDisposition> {
        match self.state {
            SendState::Closed | SendState::Invalid => {
                trace!(stream = %self.id, "ignoring reset in state {}", self.state.name());
                return Ok(ResetDisposition::Ignored);
            }
            SendState::Open | SendState::ResetSent => {}
        }

        if let Some(existing) = self.app_error_code_to_peer {
            if existing != error_code {
                return Err(Error::internal(format!(
                    "cannot change application error code in a reset (stream {}: {} -> {})",
                    self.id, existing, error_code
                )));
            }
        }
        match (reliable_size, self.reliable_size_to_peer) {
            (Some(rs), Some(current)) if rs > current => {
                return Err(Error::internal(format!(
                    "it is illegal to increase the reliable size (stream {}: {} -> {})",
                    self.id, current, rs
                )));
            }
            (Some(rs), None) if self.state == SendState::ResetSent && rs > 0 => {
                // A plain RESET_STREAM was queued; its implicit reliable
                // size is zero and cannot be raised.
                return Err(Error::internal(format!(
                    "RESET_STREAM already sent on stream {}; cannot raise reliable size to {rs}",
                    self.id
                )));
            }
            _ => {}
        }

        if self.state == SendState::ResetSent {
            let shrinks = match (reliable_size, self.reliable_size_to_peer) {
                (Some(rs), Some(current)) => rs < current,
                // Plain re-reset after a reliable one abandons the
                // remaining commitment.
                (None, Some(_)) | (Some(0), Some(_)) => true,
                _ => false,
            };
            if !shrinks {
                trace!(stream = %self.id, "duplicate reset ignored");
                return Ok(ResetDisposition::Ignored);
            }
        }

        self.app_error_code_to_peer = Some(error_code);
        self.apply_reset(error_code, reliable_size);
        if self.state == SendState::Open {
            self.transition(SendState::ResetSent);
        }
        self.reset_pending = true;
        Ok(ResetDisposition::Queued)
    }

    fn apply_reset(&mut self, error_code: AppErrorCode, reliable_size: Option<u64>) {
        if self.final_size_to_peer.is_none() {
            self.final_size_to_peer = Some(self.write_offset);
        }
        match reliable_size {
            Some(rs) if rs > 0 => {
                debug!(
                    stream = %self.id,
                    error_code,
                    reliable_size = rs,
                    "reliable reset: dropping data at and past offset"
                );
                self.reliable_size_to_peer = Some(rs);
                self.retransmission.truncate_from(rs);
                self.pending.truncate_from(rs);
                self.pending_metas.retain(|m| m.offset < rs);
            }
            _ => {
                debug!(stream = %self.id, error_code, "reset: dropping all unacknowledged data");
                self.reliable_size_to_peer = None;
                self.retransmission.clear();
                self.pending.clear();
                self.pending_metas.clear();
            }
        }
    }

    /// The reset frame to (re)send while in ResetSent.
    pub(crate) fn build_reset_frame(&self) -> Option<ResetStreamFrame> {
        let error_code = self.app_error_code_to_peer?;
        Some(ResetStreamFrame {
            stream_id: self.id,
            error_code,
            final_size: self.final_size_to_peer.unwrap_or(self.write_offset),
            reliable_size: self.reliable_size_to_peer,
        })
    }

    pub(crate) fn reset_is_pending(&self) -> bool {
        self.reset_pending
    }

    pub(crate) fn mark_reset_emitted(&mut self) {
        self.reset_pending = false;
    }

    // ========================================================================
    // Peer and ACK events
    // ========================================================================

    /// Peer STOP_SENDING. Returns true when the pair should be surfaced to
    /// the application.
    pub(crate) fn on_stop_sending(&mut self) -> Result<bool> {
        match self.state {
            SendState::Open => Ok(true),
            SendState::ResetSent | SendState::Closed => Ok(false),
            SendState::Invalid => Err(Error::stream_state(format!(
                "STOP_SENDING on receive-only stream {}",
                self.id
            ))),
        }
    }

    /// ACK of a transmitted STREAM range.
    pub(crate) fn on_data_acked(
        &mut self,
        offset: u64,
        len: u64,
        fin: bool,
        from_buf_meta: bool,
    ) -> Result<AckDisposition> {
        match self.state {
            SendState::Invalid => Err(Error::stream_state(format!(
                "acked stream data on receive-only stream {}",
                self.id
            ))),
            SendState::Closed => {
                debug_assert!(self.retransmission.is_empty());
                debug_assert!(self.pending.is_empty());
                Ok(AckDisposition { newly_closed: false })
            }
            SendState::Open | SendState::ResetSent => {
                let outcome = self.retransmission.ack(offset, len, fin, from_buf_meta)?;
                match outcome {
                    AckOutcome::Retired(_) | AckOutcome::RetiredMeta(_) => {
                        trace!(
                            stream = %self.id,
                            offset,
                            len,
                            fin,
                            "acked stream data"
                        );
                        if len > 0 {
                            self.acked_intervals.insert(offset, offset + len - 1);
                        }
                        if fin {
                            self.fin_acked = true;
                        }
                    }
                    AckOutcome::Duplicate => {
                        trace!(stream = %self.id, offset, len, "duplicate ack ignored");
                    }
                }
                Ok(AckDisposition {
                    newly_closed: self.check_send_closed(),
                })
            }
        }
    }

    /// ACK of a RESET_STREAM / RESET_STREAM_AT frame. Returns true when the
    /// ACK completed the close condition.
    pub(crate) fn on_reset_acked(&mut self, reliable_size: Option<u64>) -> Result<bool> {
        match self.state {
            SendState::ResetSent => {
                // A plain reset acknowledges a reliable size of zero.
                let acked = reliable_size.unwrap_or(0);
                self.min_reliable_size_acked = Some(match self.min_reliable_size_acked {
                    Some(current) => current.min(acked),
                    None => acked,
                });
                trace!(
                    stream = %self.id,
                    min_reliable_size_acked = self.min_reliable_size_acked,
                    "reset acked"
                );
                Ok(self.check_send_closed())
            }
            SendState::Closed => Ok(false),
            SendState::Open | SendState::Invalid => Err(Error::stream_state(format!(
                "reset acked on stream {} in state {}",
                self.id,
                self.state.name()
            ))),
        }
    }

    /// Loss of a transmitted STREAM range: re-queue it at the head of the
    /// pending writes with original offsets preserved.
    pub(crate) fn on_data_lost(&mut self, offset: u64, len: u64, fin: bool, from_buf_meta: bool) {
        if !matches!(self.state, SendState::Open | SendState::ResetSent) {
            return;
        }
        if from_buf_meta {
            if let Some(meta) = self.retransmission.take_meta(offset) {
                debug_assert_eq!((meta.len, meta.fin), (len, fin));
                self.pending_metas.push_front(meta);
                trace!(stream = %self.id, offset, len, "lost buf-meta range re-queued");
            }
            return;
        }
        if let Some(range) = self.retransmission.take(offset) {
            debug_assert_eq!((range.len(), range.fin), (len, fin));
            trace!(stream = %self.id, offset, len, fin, "lost stream range re-queued");
            self.pending.push_front(PendingChunk {
                offset: range.offset,
                data: range.data,
                fin: range.fin,
            });
        }
    }

    /// The queued reset frame was declared lost; queue it again.
    pub(crate) fn on_reset_lost(&mut self) -> bool {
        if self.state != SendState::ResetSent {
            return false;
        }
        self.reset_pending = true;
        true
    }

    fn check_send_closed(&mut self) -> bool {
        if !matches!(self.state, SendState::Open | SendState::ResetSent) {
            return false;
        }
        let fin_done = match self.final_write_offset {
            Some(0) => self.fin_acked,
            Some(final_size) => {
                self.fin_acked && self.acked_intervals.covers_prefix(final_size - 1)
            }
            None => false,
        };
        let reliable_done = match self.min_reliable_size_acked {
            Some(0) => true,
            Some(min) => self.acked_intervals.covers_prefix(min - 1),
            None => false,
        };
        if !(fin_done || reliable_done) {
            return false;
        }

        // Closed implies empty buffers. Data-path close drains them by
        // construction; the reliable-reset path may leave truncation
        // leftovers behind.
        self.pending.clear();
        self.pending_metas.clear();
        self.retransmission.clear();
        self.transition(SendState::Closed);
        true
    }

    /// Fire delivery callbacks matured by ACKs, plus reset notifications
    /// for registrations a reset abandoned.
    pub(crate) fn drain_byte_events(&mut self) {
        let id = self.id;
        if let Some((error_code, floor)) = self.reset_context() {
            self.events.drain_reset(id, floor, error_code);
        }
        let Self {
            events,
            acked_intervals,
            ..
        } = self;
        events.drain_delivered(id, |offset| acked_intervals.contains(offset));
    }

    /// Force the send half terminal on connection teardown.
    pub(crate) fn abandon(&mut self) {
        if self.state.is_terminal() {
            return;
        }
        self.pending.clear();
        self.pending_metas.clear();
        self.retransmission.clear();
        self.reset_pending = false;
        self.transition(SendState::Closed);
    }

    // ========================================================================
    // Emission
    // ========================================================================

    /// Whether any queued data (fresh or re-queued) awaits emission.
    pub(crate) fn has_sendable_data(&self) -> bool {
        matches!(self.state, SendState::Open | SendState::ResetSent)
            && (!self.pending.is_empty() || !self.pending_metas.is_empty())
    }

    /// Whether the stream could emit right now given connection credit.
    /// Retransmissions bypass credit; fresh data needs both levels open.
    pub(crate) fn can_emit(&self, conn_available: u64) -> bool {
        if !self.has_sendable_data() {
            return false;
        }
        if let Some(offset) = self.pending.next_offset() {
            if offset < self.flow_control.consumed() {
                return true; // retransmission, credit-free
            }
            if self.pending.byte_len() == 0 {
                return true; // data-less FIN needs no credit
            }
        } else if let Some(meta) = self.pending_metas.front() {
            if meta.offset < self.flow_control.consumed() || meta.len == 0 {
                return true;
            }
        }
        self.flow_control.available() > 0 && conn_available > 0
    }

    /// Produce the next STREAM frame, bounded by `budget` bytes and the
    /// connection-level credit.
    pub(crate) fn emit(&mut self, budget: usize, conn_available: u64) -> Result<EmitOutcome> {
        if !matches!(self.state, SendState::Open | SendState::ResetSent) {
            return Ok(EmitOutcome::Nothing);
        }

        if let Some(front_offset) = self.pending.next_offset() {
            let fresh = front_offset >= self.flow_control.consumed();
            let allowed = if fresh {
                let credit = self.flow_control.available().min(conn_available);
                budget.min(usize::try_from(credit).unwrap_or(usize::MAX))
            } else {
                budget
            };
            let Some(chunk) = self.pending.pop_chunk(allowed) else {
                if fresh && self.flow_control.available() == 0 {
                    return Ok(EmitOutcome::BlockedOnStream);
                }
                if fresh && conn_available == 0 {
                    return Ok(EmitOutcome::BlockedOnConn);
                }
                return Ok(EmitOutcome::Nothing);
            };

            let len = chunk.data.len() as u64;
            if fresh && len > 0 {
                self.flow_control.consume(len)?;
            }
            self.retransmission.record(SentRange {
                offset: chunk.offset,
                data: chunk.data.clone(),
                fin: chunk.fin,
            })?;
            self.bytes_sent = self.bytes_sent.max(chunk.offset + len);
            trace!(
                stream = %self.id,
                offset = chunk.offset,
                len,
                fin = chunk.fin,
                fresh,
                "emitting STREAM frame"
            );
            return Ok(EmitOutcome::Frame {
                frame: StreamFrame {
                    stream_id: self.id,
                    offset: chunk.offset,
                    len,
                    fin: chunk.fin,
                    from_buf_meta: false,
                    data: chunk.data,
                },
                fresh_bytes: if fresh { len } else { 0 },
            });
        }

        if let Some(&front) = self.pending_metas.front() {
            let fresh = front.offset >= self.flow_control.consumed();
            let allowed = if fresh {
                let credit = self.flow_control.available().min(conn_available);
                (budget as u64).min(credit)
            } else {
                budget as u64
            };
            if allowed == 0 && front.len > 0 {
                if fresh && self.flow_control.available() == 0 {
                    return Ok(EmitOutcome::BlockedOnStream);
                }
                if fresh && conn_available == 0 {
                    return Ok(EmitOutcome::BlockedOnConn);
                }
                return Ok(EmitOutcome::Nothing);
            }

            let meta = if front.len <= allowed {
                self.pending_metas.pop_front().expect("front exists")
            } else {
                let head = BufMetaRange {
                    offset: front.offset,
                    len: allowed,
                    fin: false,
                };
                let tail = self.pending_metas.front_mut().expect("front exists");
                tail.offset += allowed;
                tail.len -= allowed;
                head
            };

            if fresh && meta.len > 0 {
                self.flow_control.consume(meta.len)?;
            }
            self.retransmission.record_meta(meta)?;
            self.bytes_sent = self.bytes_sent.max(meta.offset + meta.len);
            trace!(
                stream = %self.id,
                offset = meta.offset,
                len = meta.len,
                fin = meta.fin,
                "emitting buf-meta STREAM frame"
            );
            return Ok(EmitOutcome::Frame {
                frame: StreamFrame {
                    stream_id: self.id,
                    offset: meta.offset,
                    len: meta.len,
                    fin: meta.fin,
                    from_buf_meta: true,
                    data: Bytes::new(),
                },
                fresh_bytes: if fresh { meta.len } else { 0 },
            });
        }

        Ok(EmitOutcome::Nothing)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_stream() -> SendStream {
        SendStream::new(StreamId::new(0), 1 << 20, true, true)
    }

    fn emit_frame(stream: &mut SendStream, budget: usize) -> StreamFrame {
        match stream.emit(budget, u64::MAX).unwrap() {
            EmitOutcome::Frame { frame, .. } => frame,
            other => panic!("expected frame, got {other:?}"),
        }
    }

    // ==========================================================================
    // Open state
    // ==========================================================================

    #[test]
    fn test_write_then_emit_then_ack_closes_on_fin() {
        let mut stream = open_stream();
        stream.write(Bytes::from_static(b"hello"), true).unwrap();
        assert_eq!(stream.final_write_offset(), Some(5));

        let frame = emit_frame(&mut stream, 1200);
        assert_eq!((frame.offset, frame.len, frame.fin), (0, 5, true));

        let disp = stream.on_data_acked(0, 5, true, false).unwrap();
        assert!(disp.newly_closed);
        assert_eq!(stream.state(), SendState::Closed);
        assert_eq!(stream.acked_intervals().iter().collect::<Vec<_>>(), vec![(0, 4)]);
        assert_eq!(stream.retransmission_len(), 0);
    }

    #[test]
    fn test_partial_acks_do_not_close() {
        let mut stream = open_stream();
        stream.write(Bytes::from_static(&[b'a'; 10]), true).unwrap();
        let f1 = emit_frame(&mut stream, 4);
        let f2 = emit_frame(&mut stream, 100);
        assert_eq!((f1.offset, f1.len, f1.fin), (0, 4, false));
        assert_eq!((f2.offset, f2.len, f2.fin), (4, 6, true));

        assert!(!stream.on_data_acked(4, 6, true, false).unwrap().newly_closed);
        assert_eq!(stream.state(), SendState::Open);
        assert!(stream.on_data_acked(0, 4, false, false).unwrap().newly_closed);
        assert_eq!(stream.state(), SendState::Closed);
    }

    #[test]
    fn test_zero_length_write_with_fin() {
        let mut stream = open_stream();
        stream.write(Bytes::new(), true).unwrap();
        assert_eq!(stream.final_write_offset(), Some(0));

        let frame = emit_frame(&mut stream, 1200);
        assert_eq!((frame.offset, frame.len, frame.fin), (0, 0, true));

        assert!(stream.on_data_acked(0, 0, true, false).unwrap().newly_closed);
        assert_eq!(stream.state(), SendState::Closed);
    }

    #[test]
    fn test_write_after_fin_rejected() {
        let mut stream = open_stream();
        stream.write(Bytes::from_static(b"x"), true).unwrap();
        let err = stream.write(Bytes::from_static(b"y"), false).unwrap_err();
        assert!(matches!(err, Error::FinalSize(_)));
    }

    #[test]
    fn test_write_on_invalid_half_rejected() {
        let mut stream = SendStream::new(StreamId::new(3), 1024, false, false);
        let err = stream.write(Bytes::from_static(b"x"), false).unwrap_err();
        assert!(matches!(err, Error::StreamState(_)));
    }

    #[test]
    fn test_stream_credit_limits_fresh_emission() {
        let mut stream = SendStream::new(StreamId::new(0), 4, true, true);
        stream.write(Bytes::from_static(b"abcdef"), false).unwrap();

        let frame = emit_frame(&mut stream, 1200);
        assert_eq!(frame.len, 4);
        match stream.emit(1200, u64::MAX).unwrap() {
            EmitOutcome::BlockedOnStream => {}
            other => panic!("expected stream-blocked, got {other:?}"),
        }

        // A limit raise reopens emission.
        assert!(stream.flow_control_mut().update(6));
        let frame = emit_frame(&mut stream, 1200);
        assert_eq!((frame.offset, frame.len), (4, 2));
    }

    #[test]
    fn test_conn_credit_blocks_fresh_emission() {
        let mut stream = open_stream();
        stream.write(Bytes::from_static(b"abcdef"), false).unwrap();
        match stream.emit(1200, 0).unwrap() {
            EmitOutcome::BlockedOnConn => {}
            other => panic!("expected conn-blocked, got {other:?}"),
        }
    }

    #[test]
    fn test_retransmission_bypasses_credit() {
        let mut stream = SendStream::new(StreamId::new(0), 6, true, true);
        stream.write(Bytes::from_static(b"abcdef"), false).unwrap();
        let frame = emit_frame(&mut stream, 1200);
        assert_eq!(frame.len, 6);

        stream.on_data_lost(0, 6, false, false);
        // No credit left at either level, yet the lost range re-emits.
        let frame = match stream.emit(1200, 0).unwrap() {
            EmitOutcome::Frame { frame, fresh_bytes } => {
                assert_eq!(fresh_bytes, 0);
                frame
            }
            other => panic!("expected frame, got {other:?}"),
        };
        assert_eq!((frame.offset, frame.len), (0, 6));
    }

    #[test]
    fn test_loss_requeues_before_fresh_data() {
        let mut stream = open_stream();
        stream.write(Bytes::from_static(&[b'x'; 100]), false).unwrap();
        let first = emit_frame(&mut stream, 50);
        assert_eq!(first.offset, 0);

        stream.on_data_lost(0, 50, false, false);
        let retx = emit_frame(&mut stream, 1200);
        assert_eq!((retx.offset, retx.len), (0, 50), "lost range re-emits first");
        let fresh = emit_frame(&mut stream, 1200);
        assert_eq!((fresh.offset, fresh.len), (50, 50));
    }

    #[test]
    fn test_lost_fin_frame_reemitted() {
        let mut stream = open_stream();
        stream.write(Bytes::from_static(b"hi"), true).unwrap();
        let frame = emit_frame(&mut stream, 1200);
        assert!(frame.fin);

        stream.on_data_lost(0, 2, true, false);
        let retx = emit_frame(&mut stream, 1200);
        assert_eq!((retx.offset, retx.len, retx.fin), (0, 2, true));
        assert!(stream.on_data_acked(0, 2, true, false).unwrap().newly_closed);
    }

    #[test]
    fn test_spurious_loss_after_ack_ignored() {
        let mut stream = open_stream();
        stream.write(Bytes::from_static(b"hi"), false).unwrap();
        emit_frame(&mut stream, 1200);
        stream.on_data_acked(0, 2, false, false).unwrap();
        stream.on_data_lost(0, 2, false, false);
        assert!(!stream.has_sendable_data());
    }

    // ==========================================================================
    // Reset and reliable reset
    // ==========================================================================

    #[test]
    fn test_plain_reset_clears_buffers() {
        let mut stream = open_stream();
        stream.write(Bytes::from_static(&[b'a'; 100]), false).unwrap();
        emit_frame(&mut stream, 40);

        assert_eq!(stream.reset(7, None).unwrap(), ResetDisposition::Queued);
        assert_eq!(stream.state(), SendState::ResetSent);
        assert!(!stream.has_sendable_data());
        assert_eq!(stream.retransmission_len(), 0);

        let frame = stream.build_reset_frame().unwrap();
        assert_eq!(frame.error_code, 7);
        assert_eq!(frame.final_size, 100);
        assert_eq!(frame.reliable_size, None);
    }

    #[test]
    fn test_reset_is_idempotent() {
        let mut stream = open_stream();
        stream.write(Bytes::from_static(b"data"), false).unwrap();
        assert_eq!(stream.reset(7, None).unwrap(), ResetDisposition::Queued);
        assert_eq!(stream.reset(7, None).unwrap(), ResetDisposition::Ignored);
        assert_eq!(stream.reset(7, Some(0)).unwrap(), ResetDisposition::Ignored);
    }

    #[test]
    fn test_reset_error_code_change_is_fatal() {
        let mut stream = open_stream();
        stream.write(Bytes::from_static(b"data"), false).unwrap();
        stream.reset(3, None).unwrap();
        let err = stream.reset(4, None).unwrap_err();
        assert!(err.is_contract_violation());
    }

    #[test]
    fn test_reliable_size_increase_is_fatal() {
        let mut stream = open_stream();
        stream.write(Bytes::from_static(&[b'a'; 100]), false).unwrap();
        stream.reset(3, Some(50)).unwrap();
        let err = stream.reset(3, Some(80)).unwrap_err();
        assert!(err.is_contract_violation());
    }

    #[test]
    fn test_reliable_size_after_plain_reset_is_fatal() {
        let mut stream = open_stream();
        stream.write(Bytes::from_static(&[b'a'; 100]), false).unwrap();
        stream.reset(3, None).unwrap();
        let err = stream.reset(3, Some(10)).unwrap_err();
        assert!(err.is_contract_violation());
    }

    #[test]
    fn test_reliable_size_shrink_requeues() {
        let mut stream = open_stream();
        stream.write(Bytes::from_static(&[b'a'; 100]), false).unwrap();
        stream.reset(3, Some(50)).unwrap();
        assert_eq!(stream.reset(3, Some(20)).unwrap(), ResetDisposition::Queued);
        assert_eq!(stream.reliable_size_to_peer(), Some(20));
        let frame = stream.build_reset_frame().unwrap();
        assert_eq!(frame.reliable_size, Some(20));
    }

    #[test]
    fn test_reliable_reset_keeps_committed_data() {
        let mut stream = open_stream();
        stream.write(Bytes::from_static(&[b'a'; 500]), false).unwrap();
        stream.reset(7, Some(300)).unwrap();

        assert!(stream.has_sendable_data(), "bytes below 300 still owed");
        let frame = emit_frame(&mut stream, 1200);
        assert_eq!((frame.offset, frame.len), (0, 300));
        match stream.emit(1200, u64::MAX).unwrap() {
            EmitOutcome::Nothing => {}
            other => panic!("nothing past the reliable size, got {other:?}"),
        }
    }

    #[test]
    fn test_reliable_reset_completion() {
        let mut stream = open_stream();
        stream.write(Bytes::from_static(&[b'a'; 500]), false).unwrap();
        let frame = emit_frame(&mut stream, 300);
        assert_eq!(frame.len, 300);
        stream.reset(7, Some(300)).unwrap();

        assert!(!stream.on_data_acked(0, 300, false, false).unwrap().newly_closed);
        assert!(stream.on_reset_acked(Some(300)).unwrap());
        assert_eq!(stream.min_reliable_size_acked(), Some(300));
        assert_eq!(stream.state(), SendState::Closed);
    }

    #[test]
    fn test_reset_ack_before_data_waits() {
        let mut stream = open_stream();
        stream.write(Bytes::from_static(&[b'a'; 100]), false).unwrap();
        emit_frame(&mut stream, 100);
        stream.reset(7, Some(100)).unwrap();

        assert!(!stream.on_reset_acked(Some(100)).unwrap());
        assert_eq!(stream.state(), SendState::ResetSent);
        assert!(stream.on_data_acked(0, 100, false, false).unwrap().newly_closed);
    }

    #[test]
    fn test_plain_reset_ack_closes_alone() {
        let mut stream = open_stream();
        stream.write(Bytes::from_static(&[b'a'; 100]), false).unwrap();
        emit_frame(&mut stream, 100);
        stream.reset(7, None).unwrap();

        assert!(stream.on_reset_acked(None).unwrap());
        assert_eq!(stream.min_reliable_size_acked(), Some(0));
        assert_eq!(stream.state(), SendState::Closed);
    }

    #[test]
    fn test_min_reliable_size_takes_minimum() {
        let mut stream = open_stream();
        stream.write(Bytes::from_static(&[b'a'; 500]), false).unwrap();
        emit_frame(&mut stream, 500);
        stream.reset(7, Some(300)).unwrap();

        assert!(!stream.on_reset_acked(Some(300)).unwrap());
        assert_eq!(stream.min_reliable_size_acked(), Some(300));
        stream.reset(7, Some(100)).unwrap();
        assert!(!stream.on_reset_acked(Some(100)).unwrap());
        assert_eq!(stream.min_reliable_size_acked(), Some(100));

        assert!(stream.on_data_acked(0, 500, false, false).unwrap().newly_closed);
    }

    #[test]
    fn test_reset_ack_in_open_is_protocol_error() {
        let mut stream = open_stream();
        let err = stream.on_reset_acked(None).unwrap_err();
        assert!(matches!(err, Error::StreamState(_)));
    }

    #[test]
    fn test_write_after_reset_rejected() {
        let mut stream = open_stream();
        stream.write(Bytes::from_static(b"data"), false).unwrap();
        stream.reset(1, None).unwrap();
        let err = stream.write(Bytes::from_static(b"more"), false).unwrap_err();
        assert!(matches!(err, Error::StreamState(_)));
    }

    // ==========================================================================
    // STOP_SENDING
    // ==========================================================================

    #[test]
    fn test_stop_sending_by_state() {
        let mut stream = open_stream();
        assert!(stream.on_stop_sending().unwrap());

        stream.write(Bytes::from_static(b"x"), false).unwrap();
        stream.reset(1, None).unwrap();
        assert!(!stream.on_stop_sending().unwrap());

        let mut invalid = SendStream::new(StreamId::new(3), 1024, false, false);
        assert!(matches!(
            invalid.on_stop_sending().unwrap_err(),
            Error::StreamState(_)
        ));
    }

    // ==========================================================================
    // Buf-meta ranges
    // ==========================================================================

    #[test]
    fn test_meta_write_emit_ack() {
        let mut stream = open_stream();
        stream.write(Bytes::from_static(&[b'd'; 10]), false).unwrap();
        stream.write_meta(90, true).unwrap();
        assert_eq!(stream.final_write_offset(), Some(100));

        let data = emit_frame(&mut stream, 1200);
        assert!(!data.from_buf_meta);
        let meta = emit_frame(&mut stream, 1200);
        assert!(meta.from_buf_meta);
        assert_eq!((meta.offset, meta.len, meta.fin), (10, 90, true));
        assert!(meta.data.is_empty());

        stream.on_data_acked(0, 10, false, false).unwrap();
        assert!(stream.on_data_acked(10, 90, true, true).unwrap().newly_closed);
    }

    #[test]
    fn test_meta_split_on_budget() {
        let mut stream = open_stream();
        stream.write_meta(100, false).unwrap();
        let first = emit_frame(&mut stream, 60);
        assert_eq!((first.offset, first.len, first.fin), (0, 60, false));
        let second = emit_frame(&mut stream, 60);
        assert_eq!((second.offset, second.len), (60, 40));
    }

    #[test]
    fn test_byte_write_after_meta_rejected() {
        let mut stream = open_stream();
        stream.write_meta(10, false).unwrap();
        let err = stream.write(Bytes::from_static(b"x"), false).unwrap_err();
        assert!(err.is_contract_violation());
    }

    // ==========================================================================
    // Stats
    // ==========================================================================

    #[test]
    fn test_stats_progression() {
        let mut stream = open_stream();
        stream.write(Bytes::from_static(&[b'a'; 20]), false).unwrap();
        let s = stream.stats();
        assert_eq!((s.bytes_written, s.bytes_sent, s.bytes_acked), (20, 0, 0));

        emit_frame(&mut stream, 10);
        let s = stream.stats();
        assert_eq!((s.bytes_written, s.bytes_sent, s.bytes_acked), (20, 10, 0));

        stream.on_data_acked(0, 10, false, false).unwrap();
        let s = stream.stats();
        assert_eq!((s.bytes_written, s.bytes_sent, s.bytes_acked), (20, 10, 10));
    }
}
