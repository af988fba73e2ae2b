//! # Send-Side Stream Buffers
//!
//! Two stores back every send stream:
//!
//! - [`PendingWrites`]: ordered byte ranges the application has queued but
//!   the transport has not yet emitted. Fresh writes append at the tail;
//!   lost ranges re-enter at the head with their original offsets so
//!   retransmissions precede new data.
//! - [`RetransmissionBuffer`]: offset-keyed ranges in flight and not yet
//!   acknowledged. Keys are unique and ranges never overlap.
//!
//! Acknowledgements follow an exact-match policy: the ACKed descriptor must
//! match the stored range byte-for-byte. A partial overlap is a sender-side
//! contract violation; an ACK touching nothing is a duplicate replay from
//! the packet registry and is ignored.

use std::collections::{BTreeMap, VecDeque};

use bytes::Bytes;

use crate::error::{Error, Result};
use crate::types::StreamOffset;

/// A contiguous queued byte range awaiting emission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingChunk {
    pub offset: StreamOffset,
    pub data: Bytes,
    /// This chunk carries the final byte of the stream.
    pub fin: bool,
}

impl PendingChunk {
    pub fn end(&self) -> u64 {
        self.offset + self.data.len() as u64
    }
}

/// Ordered byte ranges not yet emitted.
#[derive(Debug, Default)]
pub struct PendingWrites {
    chunks: VecDeque<PendingChunk>,
    bytes: u64,
}

impl PendingWrites {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue fresh application data at the tail.
    pub fn push_back(&mut self, chunk: PendingChunk) {
        self.bytes += chunk.data.len() as u64;
        self.chunks.push_back(chunk);
    }

    /// Re-queue a lost range at the head, original offset preserved.
    ///
    /// Callers re-queue losses in the order the loss detector reports them;
    /// each goes to the front, so report order must be front-most-first
    /// within a single event batch.
    pub fn push_front(&mut self, chunk: PendingChunk) {
        self.bytes += chunk.data.len() as u64;
        self.chunks.push_front(chunk);
    }

    /// Offset of the next byte that would be emitted.
    pub fn next_offset(&self) -> Option<StreamOffset> {
        self.chunks.front().map(|c| c.offset)
    }

    /// Take up to `max_len` bytes from the head, splitting the front chunk
    /// if needed. The FIN marker travels with the last byte.
    pub fn pop_chunk(&mut self, max_len: usize) -> Option<PendingChunk> {
        let front = self.chunks.front_mut()?;
        if max_len == 0 && !front.data.is_empty() {
            return None;
        }
        if front.data.len() <= max_len {
            let chunk = self.chunks.pop_front().expect("front exists");
            self.bytes -= chunk.data.len() as u64;
            return Some(chunk);
        }

        let taken = front.data.split_to(max_len);
        let chunk = PendingChunk {
            offset: front.offset,
            data: taken,
            fin: false,
        };
        front.offset += max_len as u64;
        self.bytes -= max_len as u64;
        Some(chunk)
    }

    /// Drop every queued byte at offsets `>= offset`, splitting a
    /// straddling chunk. FIN markers on dropped ranges are discarded; a
    /// reliably reset stream never finishes.
    ///
    /// Returns the number of bytes dropped.
    pub fn truncate_from(&mut self, offset: StreamOffset) -> u64 {
        let mut dropped = 0u64;
        while let Some(back) = self.chunks.back_mut() {
            if back.offset >= offset {
                dropped += back.data.len() as u64;
                self.chunks.pop_back();
                continue;
            }
            if back.end() > offset {
                let keep = (offset - back.offset) as usize;
                dropped += (back.data.len() - keep) as u64;
                back.data.truncate(keep);
                back.fin = false;
            }
            break;
        }
        self.bytes -= dropped;
        dropped
    }

    pub fn clear(&mut self) -> u64 {
        let dropped = self.bytes;
        self.chunks.clear();
        self.bytes = 0;
        dropped
    }

    pub fn byte_len(&self) -> u64 {
        self.bytes
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}

/// A transmitted, unacknowledged range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentRange {
    pub offset: StreamOffset,
    pub data: Bytes,
    pub fin: bool,
}

impl SentRange {
    pub fn len(&self) -> u64 {
        self.data.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// A transmitted range tracked by metadata only; the application supplies
/// the bytes lazily at (re)transmission time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufMetaRange {
    pub offset: StreamOffset,
    pub len: u64,
    pub fin: bool,
}

/// Result of matching an ACK descriptor against the buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AckOutcome {
    /// Exact match; the range was removed and is returned.
    Retired(SentRange),
    /// Metadata-only exact match; the range was removed.
    RetiredMeta(BufMetaRange),
    /// No stored range was touched; duplicate or reordered replay.
    Duplicate,
}

/// Offset-keyed store of in-flight byte ranges for one stream.
#[derive(Debug, Default)]
pub struct RetransmissionBuffer {
    ranges: BTreeMap<StreamOffset, SentRange>,
    metas: BTreeMap<StreamOffset, BufMetaRange>,
}

impl RetransmissionBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a transmitted range. Fails if it would overlap a stored key.
    pub fn record(&mut self, range: SentRange) -> Result<()> {
        self.check_vacant(range.offset, range.len())?;
        self.ranges.insert(range.offset, range);
        Ok(())
    }

    /// Insert a transmitted metadata-only range.
    pub fn record_meta(&mut self, meta: BufMetaRange) -> Result<()> {
        self.check_vacant(meta.offset, meta.len)?;
        self.metas.insert(meta.offset, meta);
        Ok(())
    }

    fn check_vacant(&self, offset: u64, len: u64) -> Result<()> {
        let end = offset + len;
        let data_overlap = self
            .ranges
            .range(..end.max(offset + 1))
            .next_back()
            .is_some_and(|(&s, r)| s == offset || (s < end && s + r.len().max(1) > offset));
        let meta_overlap = self
            .metas
            .range(..end.max(offset + 1))
            .next_back()
            .is_some_and(|(&s, m)| s == offset || (s < end && s + m.len.max(1) > offset));
        if data_overlap || meta_overlap {
            return Err(Error::internal(format!(
                "retransmission record overlaps existing range at offset {offset}"
            )));
        }
        Ok(())
    }

    /// Match an ACK descriptor against the stored range at `offset`.
    ///
    /// The stored length and FIN flag must match the descriptor exactly; a
    /// mismatch or a partial overlap with any stored range is a contract
    /// violation. On a match the range is removed.
    pub fn ack(&mut self, offset: u64, len: u64, fin: bool, from_buf_meta: bool) -> Result<AckOutcome> {
        if from_buf_meta {
            if let Some(meta) = self.metas.get(&offset).copied() {
                if meta.len != len || meta.fin != fin {
                    return Err(Error::internal(format!(
                        "acked buf-meta mismatch at offset {offset}: stored len={} fin={}, acked len={len} fin={fin}",
                        meta.len, meta.fin
                    )));
                }
                self.metas.remove(&offset);
                return Ok(AckOutcome::RetiredMeta(meta));
            }
            self.check_no_partial_overlap(offset, len)?;
            return Ok(AckOutcome::Duplicate);
        }

        if let Some(stored) = self.ranges.get(&offset) {
            if stored.len() != len || stored.fin != fin {
                return Err(Error::internal(format!(
                    "acked range mismatch at offset {offset}: stored len={} fin={}, acked len={len} fin={fin}",
                    stored.len(),
                    stored.fin
                )));
            }
            let range = self.ranges.remove(&offset).expect("checked above");
            return Ok(AckOutcome::Retired(range));
        }
        self.check_no_partial_overlap(offset, len)?;
        Ok(AckOutcome::Duplicate)
    }

    /// Exact-match policy: an ACK that lands inside a stored range without
    /// matching its key is a contract violation, not a duplicate.
    fn check_no_partial_overlap(&self, offset: u64, len: u64) -> Result<()> {
        let end = offset + len.max(1);
        let hit = self
            .ranges
            .range(..end)
            .next_back()
            .is_some_and(|(&s, r)| s + r.len().max(1) > offset)
            || self
                .metas
                .range(..end)
                .next_back()
                .is_some_and(|(&s, m)| s + m.len.max(1) > offset);
        if hit {
            return Err(Error::internal(format!(
                "ack partially overlaps a recorded range: offset={offset} len={len}"
            )));
        }
        Ok(())
    }

    /// Remove and return the range at `offset` for re-queueing after loss.
    pub fn take(&mut self, offset: u64) -> Option<SentRange> {
        self.ranges.remove(&offset)
    }

    /// Remove and return the metadata-only range at `offset`.
    pub fn take_meta(&mut self, offset: u64) -> Option<BufMetaRange> {
        self.metas.remove(&offset)
    }

    /// Drop ranges whose start offset is at or past `offset`.
    ///
    /// Straddling ranges stay whole: they were transmitted as a unit and a
    /// later ACK must still find the exact descriptor.
    pub fn truncate_from(&mut self, offset: u64) {
        self.ranges.retain(|&s, _| s < offset);
        self.metas.retain(|&s, _| s < offset);
    }

    pub fn clear(&mut self) {
        self.ranges.clear();
        self.metas.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty() && self.metas.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ranges.len() + self.metas.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&StreamOffset, &SentRange)> {
        self.ranges.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(offset: u64, data: &'static [u8], fin: bool) -> PendingChunk {
        PendingChunk {
            offset,
            data: Bytes::from_static(data),
            fin,
        }
    }

    // ==========================================================================
    // PendingWrites
    // ==========================================================================

    #[test]
    fn test_pending_pop_whole_chunk() {
        let mut pw = PendingWrites::new();
        pw.push_back(chunk(0, b"hello", false));
        let c = pw.pop_chunk(100).unwrap();
        assert_eq!(c.offset, 0);
        assert_eq!(&c.data[..], b"hello");
        assert!(pw.is_empty());
        assert_eq!(pw.byte_len(), 0);
    }

    #[test]
    fn test_pending_pop_split() {
        let mut pw = PendingWrites::new();
        pw.push_back(chunk(0, b"hello world", true));

        let c = pw.pop_chunk(5).unwrap();
        assert_eq!(c.offset, 0);
        assert_eq!(&c.data[..], b"hello");
        assert!(!c.fin, "fin stays with the remainder");

        let c = pw.pop_chunk(100).unwrap();
        assert_eq!(c.offset, 5);
        assert_eq!(&c.data[..], b" world");
        assert!(c.fin);
    }

    #[test]
    fn test_pending_pop_zero_budget() {
        let mut pw = PendingWrites::new();
        pw.push_back(chunk(0, b"data", false));
        assert!(pw.pop_chunk(0).is_none());

        // A data-less FIN chunk still pops with zero budget.
        let mut pw = PendingWrites::new();
        pw.push_back(chunk(4, b"", true));
        let c = pw.pop_chunk(0).unwrap();
        assert!(c.fin);
        assert!(c.data.is_empty());
    }

    #[test]
    fn test_pending_loss_requeue_order() {
        let mut pw = PendingWrites::new();
        pw.push_back(chunk(10, b"fresh", false));
        pw.push_front(chunk(0, b"lost", false));
        assert_eq!(pw.next_offset(), Some(0));
        assert_eq!(pw.pop_chunk(100).unwrap().offset, 0);
        assert_eq!(pw.pop_chunk(100).unwrap().offset, 10);
    }

    #[test]
    fn test_pending_truncate_from() {
        let mut pw = PendingWrites::new();
        pw.push_back(chunk(0, b"aaaa", false));
        pw.push_back(chunk(4, b"bbbb", false));
        pw.push_back(chunk(8, b"cccc", true));

        // Split the middle chunk, drop everything after.
        let dropped = pw.truncate_from(6);
        assert_eq!(dropped, 6);
        assert_eq!(pw.byte_len(), 6);

        let c = pw.pop_chunk(100).unwrap();
        assert_eq!((c.offset, c.data.len()), (0, 4));
        let c = pw.pop_chunk(100).unwrap();
        assert_eq!((c.offset, c.data.len()), (4, 2));
        assert!(!c.fin, "fin discarded with the truncated tail");
        assert!(pw.is_empty());
    }

    #[test]
    fn test_pending_truncate_noop_past_end() {
        let mut pw = PendingWrites::new();
        pw.push_back(chunk(0, b"abcd", true));
        assert_eq!(pw.truncate_from(4), 0);
        assert!(pw.pop_chunk(100).unwrap().fin);
    }

    // ==========================================================================
    // RetransmissionBuffer
    // ==========================================================================

    fn sent(offset: u64, data: &'static [u8], fin: bool) -> SentRange {
        SentRange {
            offset,
            data: Bytes::from_static(data),
            fin,
        }
    }

    #[test]
    fn test_record_and_exact_ack() {
        let mut buf = RetransmissionBuffer::new();
        buf.record(sent(0, b"hello", true)).unwrap();
        assert_eq!(buf.len(), 1);

        let outcome = buf.ack(0, 5, true, false).unwrap();
        match outcome {
            AckOutcome::Retired(r) => {
                assert_eq!(r.offset, 0);
                assert!(r.fin);
            }
            other => panic!("expected Retired, got {other:?}"),
        }
        assert!(buf.is_empty());
    }

    #[test]
    fn test_record_overlap_rejected() {
        let mut buf = RetransmissionBuffer::new();
        buf.record(sent(0, b"hello", false)).unwrap();
        let err = buf.record(sent(3, b"xy", false)).unwrap_err();
        assert!(err.is_contract_violation());
        // Same key also rejected.
        let err = buf.record(sent(0, b"hello", false)).unwrap_err();
        assert!(err.is_contract_violation());
        // Past the end is fine.
        buf.record(sent(5, b"world", false)).unwrap();
    }

    #[test]
    fn test_ack_length_mismatch_is_fatal() {
        let mut buf = RetransmissionBuffer::new();
        buf.record(sent(0, b"hello", false)).unwrap();
        let err = buf.ack(0, 3, false, false).unwrap_err();
        assert!(err.is_contract_violation());
    }

    #[test]
    fn test_ack_fin_mismatch_is_fatal() {
        let mut buf = RetransmissionBuffer::new();
        buf.record(sent(0, b"hello", false)).unwrap();
        let err = buf.ack(0, 5, true, false).unwrap_err();
        assert!(err.is_contract_violation());
    }

    #[test]
    fn test_ack_partial_overlap_is_fatal() {
        let mut buf = RetransmissionBuffer::new();
        buf.record(sent(10, b"0123456789", false)).unwrap();
        let err = buf.ack(15, 5, false, false).unwrap_err();
        assert!(err.is_contract_violation());
    }

    #[test]
    fn test_ack_untouched_range_is_duplicate() {
        let mut buf = RetransmissionBuffer::new();
        buf.record(sent(0, b"hello", false)).unwrap();
        buf.ack(0, 5, false, false).unwrap();

        // Replay of the same descriptor after retirement.
        assert_eq!(buf.ack(0, 5, false, false).unwrap(), AckOutcome::Duplicate);
    }

    #[test]
    fn test_zero_length_fin_record_and_ack() {
        let mut buf = RetransmissionBuffer::new();
        buf.record(sent(0, b"hello", false)).unwrap();
        buf.record(sent(5, b"", true)).unwrap();
        buf.ack(5, 0, true, false).unwrap();
        buf.ack(0, 5, false, false).unwrap();
        assert!(buf.is_empty());
    }

    #[test]
    fn test_buf_meta_exact_match() {
        let mut buf = RetransmissionBuffer::new();
        buf.record_meta(BufMetaRange {
            offset: 100,
            len: 50,
            fin: false,
        })
        .unwrap();
        let err = buf.ack(100, 49, false, true).unwrap_err();
        assert!(err.is_contract_violation());
        // Correct descriptor retires it.
        let mut buf = RetransmissionBuffer::new();
        buf.record_meta(BufMetaRange {
            offset: 100,
            len: 50,
            fin: false,
        })
        .unwrap();
        assert!(matches!(
            buf.ack(100, 50, false, true).unwrap(),
            AckOutcome::RetiredMeta(_)
        ));
    }

    #[test]
    fn test_truncate_keeps_straddlers_whole() {
        let mut buf = RetransmissionBuffer::new();
        buf.record(sent(250, b"0123456789", false)).unwrap(); // [250, 260)
        buf.record(sent(300, b"abcdef", false)).unwrap();
        buf.truncate_from(255);
        // The straddler survives intact so a later ACK still matches.
        buf.ack(250, 10, false, false).unwrap();
        assert_eq!(buf.ack(300, 6, false, false).unwrap(), AckOutcome::Duplicate);
    }

    #[test]
    fn test_take_for_loss() {
        let mut buf = RetransmissionBuffer::new();
        buf.record(sent(0, b"hello", false)).unwrap();
        let r = buf.take(0).unwrap();
        assert_eq!(&r.data[..], b"hello");
        assert!(buf.take(0).is_none());
    }
}
