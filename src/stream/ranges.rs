//! Acked-interval tracking for transmitted stream data.
//!
//! Keeps the set of byte offsets the peer has acknowledged as disjoint,
//! merged, closed intervals. The retransmission buffer and this set are
//! complementary: an offset present here never has a live retransmission
//! entry.

use std::collections::BTreeMap;
use std::ops::Bound;

use smallvec::SmallVec;

/// Ordered set of non-overlapping closed intervals of acknowledged offsets.
///
/// Adjacent intervals are merged on insert, so `[0,4]` followed by `[5,9]`
/// collapses to `[0,9]`.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct AckedRanges {
    /// start -> end, both inclusive.
    intervals: BTreeMap<u64, u64>,
}

impl AckedRanges {
    pub fn new() -> Self {
        Self::default()
    }

    /// Union the closed interval `[start, end]` into the set.
    pub fn insert(&mut self, start: u64, end: u64) {
        debug_assert!(start <= end);
        let mut new_start = start;
        let mut new_end = end;
        let mut stale: SmallVec<[u64; 4]> = SmallVec::new();

        // A preceding interval may overlap or abut the new one.
        if let Some((&s, &e)) = self.intervals.range(..start).next_back() {
            if e.saturating_add(1) >= start {
                new_start = s;
                new_end = new_end.max(e);
                stale.push(s);
            }
        }

        // Absorb every interval starting inside [start, end + 1].
        let upper = end.saturating_add(1);
        for (&s, &e) in self
            .intervals
            .range((Bound::Included(start), Bound::Included(upper)))
        {
            new_end = new_end.max(e);
            stale.push(s);
        }

        for s in stale {
            self.intervals.remove(&s);
        }
        self.intervals.insert(new_start, new_end);
    }

    /// Whether `offset` has been acknowledged.
    pub fn contains(&self, offset: u64) -> bool {
        self.intervals
            .range(..=offset)
            .next_back()
            .is_some_and(|(_, &e)| e >= offset)
    }

    /// Whether the entire closed range `[start, end]` is acknowledged.
    ///
    /// Intervals are merged, so a covered range lies within a single one.
    pub fn covers(&self, start: u64, end: u64) -> bool {
        self.intervals
            .range(..=start)
            .next_back()
            .is_some_and(|(_, &e)| e >= end)
    }

    /// Whether every offset in `[0, end]` is acknowledged.
    pub fn covers_prefix(&self, end: u64) -> bool {
        self.covers(0, end)
    }

    /// Number of bytes acknowledged contiguously from offset zero.
    pub fn acked_prefix_len(&self) -> u64 {
        match self.intervals.get(&0) {
            Some(&end) => end + 1,
            None => 0,
        }
    }

    /// Whether any offset in the closed range `[start, end]` is acknowledged.
    pub fn overlaps(&self, start: u64, end: u64) -> bool {
        if let Some((_, &e)) = self.intervals.range(..=start).next_back() {
            if e >= start {
                return true;
            }
        }
        self.intervals.range(start..=end).next().is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u64, u64)> + '_ {
        self.intervals.iter().map(|(&s, &e)| (s, e))
    }

    /// Number of disjoint intervals.
    pub fn interval_count(&self) -> usize {
        self.intervals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.intervals.is_empty()
    }
}
