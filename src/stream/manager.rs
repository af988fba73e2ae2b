//! # Stream Manager (RFC 9000 Sections 2, 3, 4)
//!
//! Owns the set of live send streams and everything the outer write loop
//! needs: the priority scheduler, connection-level flow control, the
//! pending-reset queue, and the auxiliary queues surfaced to the
//! application (`writable`, `deliverable`, `closed`, `stop_sending`).
//!
//! All mutation happens through `&mut self` on the owning connection's
//! worker: single-writer discipline, no locks.
//!
//! ## Write loop
//!
//! [`StreamManager::poll_transmit`] produces frame descriptors in priority
//! order: queued resets first, then scheduler-selected STREAM frames gated
//! by connection and stream credit, latching DATA_BLOCKED /
//! STREAM_DATA_BLOCKED signals as credit runs out. ACK and loss events
//! flow back through the `on_*` handlers; delivery and tx callbacks fire
//! in a separate [`drain_events`](StreamManager::drain_events) step.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use bytes::Bytes;
use indexmap::IndexMap;
use tracing::{debug, trace, warn};

use crate::delivery::{DeliveryCallback, TxCallback};
use crate::error::{Error, Result};
use crate::flow_control::SendFlowControl;
use crate::frames::{
    DataBlockedFrame, Frame, MaxDataFrame, MaxStreamDataFrame, MaxStreamsFrame, StopSendingFrame,
    StreamDataBlockedFrame, StreamFrameMeta,
};
use crate::scheduler::PriorityScheduler;
use crate::stream::send::{EmitOutcome, ResetDisposition, SendStream};
use crate::transport::TransportParameters;
use crate::types::{AppErrorCode, Side, StreamDirection, StreamId, StreamPriority};

/// Owner of the send-side stream set for one connection.
pub struct StreamManager {
    side: Side,
    /// What we advertised: governs peer-opened stream counts.
    local_params: TransportParameters,
    /// What the peer advertised: governs our send credit and reliable-reset
    /// capability.
    peer_params: TransportParameters,

    streams: IndexMap<StreamId, SendStream>,
    conn_fc: SendFlowControl,
    scheduler: PriorityScheduler,

    writable: BTreeSet<StreamId>,
    deliverable: BTreeSet<StreamId>,
    closed: BTreeSet<StreamId>,
    stop_sending: BTreeMap<StreamId, AppErrorCode>,
    pending_resets: VecDeque<StreamId>,
    pending_stop_sending: Vec<StopSendingFrame>,
    tx_dirty: BTreeSet<StreamId>,

    next_bidi_ordinal: u64,
    next_uni_ordinal: u64,
    /// How many streams of each type we may open; raised by MAX_STREAMS.
    max_local_bidi: u64,
    max_local_uni: u64,
    /// Peer-opened ordinals created so far (next expected ordinal).
    peer_bidi_opened: u64,
    peer_uni_opened: u64,
}

impl StreamManager {
    pub fn new(
        side: Side,
        local_params: TransportParameters,
        peer_params: TransportParameters,
    ) -> Self {
        Self {
            side,
            local_params,
            peer_params,
            streams: IndexMap::new(),
            conn_fc: SendFlowControl::new(peer_params.initial_max_data),
            scheduler: PriorityScheduler::new(),
            writable: BTreeSet::new(),
            deliverable: BTreeSet::new(),
            closed: BTreeSet::new(),
            stop_sending: BTreeMap::new(),
            pending_resets: VecDeque::new(),
            pending_stop_sending: Vec::new(),
            tx_dirty: BTreeSet::new(),
            next_bidi_ordinal: 0,
            next_uni_ordinal: 0,
            max_local_bidi: peer_params.initial_max_streams_bidi,
            max_local_uni: peer_params.initial_max_streams_uni,
            peer_bidi_opened: 0,
            peer_uni_opened: 0,
        }
    }

    // ========================================================================
    // Stream lifecycle
    // ========================================================================

    /// Open a locally-initiated bidirectional stream.
    pub fn open_bidi(&mut self) -> Result<StreamId> {
        if self.next_bidi_ordinal >= self.max_local_bidi {
            return Err(Error::StreamLimitExceeded {
                direction: StreamDirection::Bidirectional,
                limit: self.max_local_bidi,
            });
        }
        let id = StreamId::from_parts(
            self.side.into(),
            StreamDirection::Bidirectional,
            self.next_bidi_ordinal,
        );
        self.next_bidi_ordinal += 1;
        self.insert_stream(id, true, false);
        Ok(id)
    }

    /// Open a locally-initiated unidirectional stream.
    pub fn open_uni(&mut self) -> Result<StreamId> {
        if self.next_uni_ordinal >= self.max_local_uni {
            return Err(Error::StreamLimitExceeded {
                direction: StreamDirection::Unidirectional,
                limit: self.max_local_uni,
            });
        }
        let id = StreamId::from_parts(
            self.side.into(),
            StreamDirection::Unidirectional,
            self.next_uni_ordinal,
        );
        self.next_uni_ordinal += 1;
        // The receive half of an egress uni stream never exists.
        self.insert_stream(id, true, true);
        Ok(id)
    }

    fn insert_stream(&mut self, id: StreamId, sendable: bool, recv_terminal: bool) {
        let window = self.peer_params.initial_send_window(id, self.side);
        debug!(stream = %id, window, sendable, "stream created");
        self.streams
            .insert(id, SendStream::new(id, window, sendable, recv_terminal));
    }

    /// Resolve a peer frame's stream reference, creating peer-initiated
    /// streams within the negotiated limits.
    ///
    /// Returns `None` for streams that already completed their lifecycle.
    fn ensure_peer_referenced(&mut self, id: StreamId) -> Result<Option<()>> {
        if self.streams.contains_key(&id) {
            return Ok(Some(()));
        }
        let locally_initiated = match self.side {
            Side::Client => id.is_client_initiated(),
            Side::Server => id.is_server_initiated(),
        };
        if locally_initiated {
            let next = if id.is_bidirectional() {
                self.next_bidi_ordinal
            } else {
                self.next_uni_ordinal
            };
            if id.ordinal() >= next {
                return Err(Error::stream_state(format!(
                    "peer referenced unopened local stream {id}"
                )));
            }
            // Opened once, since destroyed.
            return Ok(None);
        }

        let (opened, limit) = if id.is_bidirectional() {
            (self.peer_bidi_opened, self.local_params.initial_max_streams_bidi)
        } else {
            (self.peer_uni_opened, self.local_params.initial_max_streams_uni)
        };
        if id.ordinal() < opened {
            return Ok(None); // previously opened and destroyed
        }
        if id.ordinal() >= limit {
            return Err(Error::StreamLimit(format!(
                "peer exceeded stream limit: stream {id} past limit {limit}"
            )));
        }
        // A frame for ordinal n implicitly opens every lower one.
        let sendable = id.is_bidirectional();
        for ordinal in opened..=id.ordinal() {
            let new_id = StreamId::from_parts(
                self.side.opposite().into(),
                id.direction(),
                ordinal,
            );
            self.insert_stream(new_id, sendable, false);
        }
        if id.is_bidirectional() {
            self.peer_bidi_opened = id.ordinal() + 1;
        } else {
            self.peer_uni_opened = id.ordinal() + 1;
        }
        Ok(Some(()))
    }

    pub fn stream(&self, id: StreamId) -> Option<&SendStream> {
        self.streams.get(&id)
    }

    fn stream_mut(&mut self, id: StreamId) -> Result<&mut SendStream> {
        self.streams.get_mut(&id).ok_or(Error::UnknownStream(id))
    }

    pub fn stream_count(&self) -> usize {
        self.streams.len()
    }

    // ========================================================================
    // Application operations
    // ========================================================================

    /// Queue bytes (and optionally FIN) on a stream.
    pub fn write(&mut self, id: StreamId, data: Bytes, fin: bool) -> Result<()> {
        self.stream_mut(id)?.write(data, fin)?;
        self.update_writable(id);
        Ok(())
    }

    /// Queue a metadata-only range; bytes are supplied at transmission.
    pub fn write_meta(&mut self, id: StreamId, len: u64, fin: bool) -> Result<()> {
        self.stream_mut(id)?.write_meta(len, fin)?;
        self.update_writable(id);
        Ok(())
    }

    /// Reset the sending half of a stream.
    ///
    /// `reliable_size: Some(_)` requests a RESET_STREAM_AT and requires the
    /// peer to have negotiated `reliable_stream_reset`.
    pub fn reset_stream(
        &mut self,
        id: StreamId,
        error_code: AppErrorCode,
        reliable_size: Option<u64>,
    ) -> Result<()> {
        if reliable_size.is_some() && !self.peer_params.reliable_stream_reset {
            return Err(Error::internal(format!(
                "reliable reset on stream {id} without peer support"
            )));
        }
        let stream = self.stream_mut(id)?;
        match stream.reset(error_code, reliable_size)? {
            ResetDisposition::Queued => {
                if !self.pending_resets.contains(&id) {
                    self.pending_resets.push_back(id);
                }
                // Abandoned registrations get their reset notification at
                // the next drain.
                self.deliverable.insert(id);
                self.update_writable(id);
            }
            ResetDisposition::Ignored => {}
        }
        Ok(())
    }

    /// Ask the peer to stop transmitting on `id`: queues a STOP_SENDING
    /// frame. Valid only for streams with a receive half at this endpoint.
    pub fn stop_sending(&mut self, id: StreamId, error_code: AppErrorCode) -> Result<()> {
        let receivable = id.is_bidirectional()
            || !id.is_sendable_by(self.side);
        if !receivable {
            return Err(Error::stream_state(format!(
                "STOP_SENDING on send-only stream {id}"
            )));
        }
        if !self.streams.contains_key(&id) {
            return Err(Error::UnknownStream(id));
        }
        if !self
            .pending_stop_sending
            .iter()
            .any(|f| f.stream_id == id)
        {
            self.pending_stop_sending.push(StopSendingFrame {
                stream_id: id,
                error_code,
            });
        }
        Ok(())
    }

    /// Register a delivery callback for `(id, offset)`. Fires at most once,
    /// at the drain step, once the offset is acknowledged or abandoned by a
    /// reset.
    pub fn register_delivery_cb(
        &mut self,
        id: StreamId,
        offset: u64,
        cb: DeliveryCallback,
    ) -> Result<()> {
        self.stream_mut(id)?.events.register_delivery(offset, cb);
        self.deliverable.insert(id);
        Ok(())
    }

    /// Register a tx callback for `(id, offset)`, fired when the offset is
    /// first transmitted.
    pub fn register_tx_cb(&mut self, id: StreamId, offset: u64, cb: TxCallback) -> Result<()> {
        self.stream_mut(id)?.events.register_tx(offset, cb);
        self.tx_dirty.insert(id);
        Ok(())
    }

    pub fn set_priority(&mut self, id: StreamId, priority: StreamPriority) -> Result<()> {
        let stream = self.stream_mut(id)?;
        stream.set_priority(priority);
        if self.scheduler.contains(id) {
            self.scheduler.insert(id, priority);
        }
        Ok(())
    }

    /// Configure the scheduler to move to the next stream after `n` served
    /// frames at each level.
    pub fn advance_after_nexts(&mut self, n: u64) {
        self.scheduler.advance_after_nexts(n);
    }

    /// Configure the scheduler to move to the next stream after `bytes`
    /// served bytes at each level.
    pub fn advance_after_bytes(&mut self, bytes: u64) {
        self.scheduler.advance_after_bytes(bytes);
    }

    // ========================================================================
    // Peer frames
    // ========================================================================

    /// Peer STOP_SENDING: record the pair for the application, which
    /// typically answers with a matching reset.
    pub fn on_stop_sending(&mut self, frame: StopSendingFrame) -> Result<()> {
        let id = frame.stream_id;
        if self.ensure_peer_referenced(id)?.is_none() {
            return Ok(()); // stream already done; stale frame
        }
        let stream = self.stream_mut(id)?;
        if stream.on_stop_sending()? {
            trace!(stream = %id, error_code = frame.error_code, "stop_sending recorded");
            self.stop_sending.entry(id).or_insert(frame.error_code);
        }
        Ok(())
    }

    /// Peer MAX_DATA: raise connection credit and re-admit starved streams.
    pub fn on_max_data(&mut self, frame: MaxDataFrame) {
        if self.conn_fc.update(frame.maximum_data) {
            let ids: Vec<StreamId> = self.streams.keys().copied().collect();
            for id in ids {
                self.update_writable(id);
            }
        }
    }

    /// Peer MAX_STREAM_DATA: raise stream credit and re-admit the stream.
    pub fn on_max_stream_data(&mut self, frame: MaxStreamDataFrame) -> Result<()> {
        let id = frame.stream_id;
        if self.ensure_peer_referenced(id)?.is_none() {
            return Ok(());
        }
        let stream = self.stream_mut(id)?;
        stream.flow_control_mut().update(frame.maximum_data);
        self.update_writable(id);
        Ok(())
    }

    /// Peer MAX_STREAMS: raise the local open caps.
    pub fn on_max_streams(&mut self, frame: MaxStreamsFrame) {
        if frame.bidirectional {
            self.max_local_bidi = self.max_local_bidi.max(frame.maximum_streams);
        } else {
            self.max_local_uni = self.max_local_uni.max(frame.maximum_streams);
        }
    }

    // ========================================================================
    // ACK and loss events (from the outstanding-packets registry)
    // ========================================================================

    /// A packet carrying this STREAM range was acknowledged.
    pub fn on_stream_frame_acked(&mut self, meta: StreamFrameMeta) -> Result<()> {
        let Some(stream) = self.streams.get_mut(&meta.stream_id) else {
            trace!(stream = %meta.stream_id, "ack for destroyed stream ignored");
            return Ok(());
        };
        let disposition =
            stream.on_data_acked(meta.offset, meta.len, meta.fin, meta.from_buf_meta)?;
        self.deliverable.insert(meta.stream_id);
        if disposition.newly_closed {
            self.on_send_half_closed(meta.stream_id);
        }
        self.update_writable(meta.stream_id);
        Ok(())
    }

    /// A packet carrying this stream's RESET_STREAM(_AT) was acknowledged.
    pub fn on_reset_acked(&mut self, id: StreamId, reliable_size: Option<u64>) -> Result<()> {
        let Some(stream) = self.streams.get_mut(&id) else {
            trace!(stream = %id, "reset ack for destroyed stream ignored");
            return Ok(());
        };
        if stream.on_reset_acked(reliable_size)? {
            self.on_send_half_closed(id);
        }
        self.update_writable(id);
        Ok(())
    }

    /// A packet carrying this STREAM range was declared lost.
    pub fn on_stream_frame_lost(&mut self, meta: StreamFrameMeta) {
        if let Some(stream) = self.streams.get_mut(&meta.stream_id) {
            stream.on_data_lost(meta.offset, meta.len, meta.fin, meta.from_buf_meta);
            self.update_writable(meta.stream_id);
        }
    }

    /// A packet carrying this stream's reset frame was declared lost; the
    /// reset is retransmitted and the stream stays in ResetSent.
    pub fn on_reset_frame_lost(&mut self, id: StreamId) {
        if let Some(stream) = self.streams.get_mut(&id) {
            if stream.on_reset_lost() && !self.pending_resets.contains(&id) {
                debug!(stream = %id, "reset frame lost, re-queued");
                self.pending_resets.push_back(id);
                self.update_writable(id);
            }
        }
    }

    /// A DATA_BLOCKED frame at `limit` was declared lost.
    pub fn on_data_blocked_lost(&mut self, limit: u64) {
        self.conn_fc.blocked_frame_lost(limit);
    }

    /// A STREAM_DATA_BLOCKED frame at `limit` was declared lost.
    pub fn on_stream_data_blocked_lost(&mut self, id: StreamId, limit: u64) {
        if let Some(stream) = self.streams.get_mut(&id) {
            stream.flow_control_mut().blocked_frame_lost(limit);
        }
    }

    /// The receive half of `id` reached its terminal state.
    pub fn on_receive_half_terminal(&mut self, id: StreamId) {
        if let Some(stream) = self.streams.get_mut(&id) {
            stream.recv_terminal = true;
            if stream.state().is_terminal() {
                self.closed.insert(id);
            }
        }
    }

    fn on_send_half_closed(&mut self, id: StreamId) {
        if let Some(stream) = self.streams.get(&id) {
            if stream.recv_terminal {
                self.closed.insert(id);
            }
        }
    }

    // ========================================================================
    // Write loop
    // ========================================================================

    /// Produce the next burst of frames, at most `max_bytes` of stream
    /// payload: pending resets first, then scheduler-ordered STREAM frames.
    /// Blocked signals are emitted inline as credit runs out.
    pub fn poll_transmit(&mut self, max_bytes: usize) -> Result<Vec<Frame>> {
        let mut frames: Vec<Frame> = Vec::new();

        for stop in self.pending_stop_sending.drain(..) {
            frames.push(Frame::StopSending(stop));
        }

        // Queued resets go ahead of stream data; a reset supersedes the
        // data of the stream it resets.
        while let Some(id) = self.pending_resets.pop_front() {
            let Some(stream) = self.streams.get_mut(&id) else {
                continue;
            };
            if !stream.reset_is_pending() {
                continue;
            }
            if let Some(reset) = stream.build_reset_frame() {
                stream.mark_reset_emitted();
                trace!(
                    stream = %id,
                    error_code = reset.error_code,
                    reliable_size = ?reset.reliable_size,
                    "emitting reset frame"
                );
                frames.push(Frame::ResetStream(reset));
            }
            self.update_writable(id);
        }

        let mut budget = max_bytes;
        while budget > 0 {
            let Some(id) = self.scheduler.peek() else {
                break;
            };
            let conn_available = self.conn_fc.available();
            let stream = self
                .streams
                .get_mut(&id)
                .expect("scheduled stream must exist");
            match stream.emit(budget, conn_available)? {
                EmitOutcome::Frame { frame, fresh_bytes } => {
                    if fresh_bytes > 0 {
                        self.conn_fc.consume(fresh_bytes)?;
                    }
                    let len = frame.len;
                    budget -= len as usize;
                    self.tx_dirty.insert(id);
                    self.scheduler.consume(Some(len));
                    frames.push(Frame::Stream(frame));
                    self.after_emit(id, &mut frames);
                }
                EmitOutcome::BlockedOnStream => {
                    let stream = self.streams.get_mut(&id).expect("stream exists");
                    if let Some(limit) = stream.flow_control_mut().blocked_signal() {
                        debug!(stream = %id, limit, "stream flow control blocked");
                        frames.push(Frame::StreamDataBlocked(StreamDataBlockedFrame {
                            stream_id: id,
                            limit,
                        }));
                    }
                    self.deschedule(id);
                }
                EmitOutcome::BlockedOnConn => {
                    if let Some(limit) = self.conn_fc.blocked_signal() {
                        debug!(limit, "connection flow control blocked");
                        frames.push(Frame::DataBlocked(DataBlockedFrame { limit }));
                    }
                    self.deschedule(id);
                }
                EmitOutcome::Nothing => {
                    self.deschedule(id);
                }
            }
        }
        Ok(frames)
    }

    fn deschedule(&mut self, id: StreamId) {
        self.scheduler.erase(id);
        self.writable.remove(&id);
    }

    /// After serving a stream, decide whether it stays scheduled. Credit
    /// starvation discovered here latches the matching blocked signal, so
    /// a stream drained mid-chunk still advertises why it stopped.
    fn after_emit(&mut self, id: StreamId, frames: &mut Vec<Frame>) {
        let conn_available = self.conn_fc.available();
        let Some(stream) = self.streams.get_mut(&id) else {
            self.deschedule(id);
            return;
        };
        if stream.reset_is_pending() || stream.can_emit(conn_available) {
            return;
        }
        if !stream.has_sendable_data() {
            self.deschedule(id);
            return;
        }
        if stream.flow_control().available() == 0 {
            if let Some(limit) = stream.flow_control_mut().blocked_signal() {
                debug!(stream = %id, limit, "stream flow control blocked");
                frames.push(Frame::StreamDataBlocked(StreamDataBlockedFrame {
                    stream_id: id,
                    limit,
                }));
            }
        } else if conn_available == 0 {
            if let Some(limit) = self.conn_fc.blocked_signal() {
                debug!(limit, "connection flow control blocked");
                frames.push(Frame::DataBlocked(DataBlockedFrame { limit }));
            }
        }
        self.deschedule(id);
    }

    /// Recompute scheduler and writable membership for one stream.
    ///
    /// A stream is scheduled iff it could emit given current credit or has
    /// a queued reset, and its send half is not terminal.
    fn update_writable(&mut self, id: StreamId) {
        let conn_available = self.conn_fc.available();
        let Some(stream) = self.streams.get(&id) else {
            self.deschedule(id);
            return;
        };
        let schedulable = !stream.state().is_terminal()
            && (stream.can_emit(conn_available) || stream.reset_is_pending());
        if schedulable {
            let priority = stream.priority();
            if !self.scheduler.contains(id) {
                self.scheduler.insert(id, priority);
            }
            self.writable.insert(id);
        } else {
            self.deschedule(id);
        }
    }

    // ========================================================================
    // Event drain and queue surfaces
    // ========================================================================

    /// Fire matured delivery and tx callbacks. Deferred out of the ACK
    /// processing path; per stream, callbacks fire in increasing offset
    /// order.
    pub fn drain_events(&mut self) {
        for id in std::mem::take(&mut self.tx_dirty) {
            if let Some(stream) = self.streams.get_mut(&id) {
                let high_water = stream.bytes_sent_high_water();
                stream.events.drain_transmitted(id, high_water);
            }
        }
        for id in std::mem::take(&mut self.deliverable) {
            if let Some(stream) = self.streams.get_mut(&id) {
                stream.drain_byte_events();
            }
        }
    }

    /// Streams currently able to take emission work.
    pub fn writable_streams(&self) -> impl Iterator<Item = StreamId> + '_ {
        self.writable.iter().copied()
    }

    pub fn has_writable_streams(&self) -> bool {
        !self.writable.is_empty()
    }

    /// Drain the `(stream, error_code)` pairs owed to the application from
    /// peer STOP_SENDING frames.
    pub fn take_stop_sending(&mut self) -> Vec<(StreamId, AppErrorCode)> {
        let drained: Vec<_> = self
            .stop_sending
            .iter()
            .map(|(&id, &err)| (id, err))
            .collect();
        self.stop_sending.clear();
        drained
    }

    /// Drain and destroy fully-terminal streams whose deferred callbacks
    /// have all fired. A stream still owing callbacks stays queued and is
    /// reported by a later call, once a drain has emptied its registry.
    pub fn take_closed(&mut self) -> Vec<StreamId> {
        let mut drained = Vec::new();
        let candidates: Vec<StreamId> = self.closed.iter().copied().collect();
        for id in candidates {
            let destroy = match self.streams.get(&id) {
                Some(s) => s.state().is_terminal() && s.recv_terminal && s.events.is_empty(),
                None => true,
            };
            if !destroy {
                continue;
            }
            self.closed.remove(&id);
            if self.streams.shift_remove(&id).is_some() {
                trace!(stream = %id, "stream destroyed");
                self.deschedule(id);
            }
            drained.push(id);
        }
        drained
    }

    /// Propagate a terminal connection error: every non-terminal send half
    /// is abandoned, outstanding registrations are notified, and all
    /// scheduling state is dropped.
    pub fn on_connection_close(&mut self, error_code: AppErrorCode) {
        warn!(error_code, "connection close propagated to send streams");
        let ids: Vec<StreamId> = self.streams.keys().copied().collect();
        for id in ids {
            if let Some(stream) = self.streams.get_mut(&id) {
                stream.events.drain_reset(id, 0, error_code);
                stream.abandon();
                stream.recv_terminal = true;
                self.closed.insert(id);
            }
        }
        self.scheduler.clear();
        self.writable.clear();
        self.pending_resets.clear();
        self.deliverable.clear();
        self.tx_dirty.clear();
    }

    /// Connection-level credit remaining (diagnostics and tests).
    pub fn connection_credit(&self) -> u64 {
        self.conn_fc.available()
    }
}
