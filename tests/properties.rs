//! Property-based tests for the scheduler and acked-interval bookkeeping.
//!
//! These use proptest to generate random operation sequences and verify
//! the structural laws the rest of the send path depends on.

use proptest::prelude::*;
use quic_egress::stream::AckedRanges;
use quic_egress::{RoundRobin, StreamId};

// Property test strategies

fn interval_strategy() -> impl Strategy<Value = (u64, u64)> {
    (0u64..512).prop_flat_map(|start| (Just(start), start..start + 64))
}

fn stream_ids_strategy() -> impl Strategy<Value = Vec<u64>> {
    proptest::collection::btree_set(0u64..200, 1..40)
        .prop_map(|set| set.into_iter().collect())
}

proptest! {
    /// The interval set is insertion-order insensitive: any permutation of
    /// inserts yields the same set of acknowledged offsets as a naive
    /// per-offset model.
    #[test]
    fn acked_ranges_match_naive_model(intervals in proptest::collection::vec(interval_strategy(), 1..24)) {
        let mut ranges = AckedRanges::new();
        let mut model = std::collections::BTreeSet::new();
        for &(start, end) in &intervals {
            ranges.insert(start, end);
            model.extend(start..=end);
        }

        // Membership agrees with the model across the touched space.
        for offset in 0..600u64 {
            prop_assert_eq!(ranges.contains(offset), model.contains(&offset));
        }

        // Intervals are disjoint, sorted, and merged (never adjacent).
        let collected: Vec<(u64, u64)> = ranges.iter().collect();
        for window in collected.windows(2) {
            let (_, prev_end) = window[0];
            let (next_start, _) = window[1];
            prop_assert!(prev_end + 1 < next_start);
        }

        // The contiguous prefix length matches the model.
        let naive_prefix = (0u64..).take_while(|o| model.contains(o)).count() as u64;
        prop_assert_eq!(ranges.acked_prefix_len(), naive_prefix);
    }

    /// Reversed insertion order produces an identical set.
    #[test]
    fn acked_ranges_insertion_order_irrelevant(intervals in proptest::collection::vec(interval_strategy(), 1..16)) {
        let mut forward = AckedRanges::new();
        let mut backward = AckedRanges::new();
        for &(start, end) in &intervals {
            forward.insert(start, end);
        }
        for &(start, end) in intervals.iter().rev() {
            backward.insert(start, end);
        }
        prop_assert_eq!(
            forward.iter().collect::<Vec<_>>(),
            backward.iter().collect::<Vec<_>>()
        );
    }

    /// One full round visits every member exactly once, in round order.
    #[test]
    fn round_robin_cycle_visits_all(ids in stream_ids_strategy()) {
        let mut rr = RoundRobin::new();
        for &id in &ids {
            rr.insert(StreamId::new(id));
        }
        rr.advance_after_nexts(1);

        let mut seen = Vec::new();
        for _ in 0..ids.len() {
            seen.push(rr.get_next(None).unwrap());
        }
        let mut sorted: Vec<u64> = seen.iter().map(|id| id.value()).collect();
        sorted.sort_unstable();
        prop_assert_eq!(&sorted, &ids, "each member served exactly once per round");

        // The next round starts where the first began.
        prop_assert_eq!(rr.peek(), Some(seen[0]));
    }

    /// insert(x); erase(x) restores the observable scheduler state, at any
    /// cursor position and list size (spanning the index thresholds).
    #[test]
    fn round_robin_insert_erase_round_trip(
        ids in stream_ids_strategy(),
        spins in 0usize..64,
    ) {
        let mut rr = RoundRobin::new();
        for &id in &ids {
            rr.insert(StreamId::new(id));
        }
        rr.advance_after_nexts(1);
        for _ in 0..spins {
            rr.get_next(None);
        }

        let before = (rr.peek(), rr.round_order(), rr.len());
        let probe = StreamId::new(1_000_000);
        rr.insert(probe);
        prop_assert!(rr.erase(probe));
        prop_assert_eq!(before, (rr.peek(), rr.round_order(), rr.len()));
    }

    /// Erasing members never corrupts the cycle for the survivors.
    #[test]
    fn round_robin_erase_preserves_survivors(
        ids in stream_ids_strategy(),
        victim_index in 0usize..40,
    ) {
        prop_assume!(ids.len() > 1);
        let mut rr = RoundRobin::new();
        for &id in &ids {
            rr.insert(StreamId::new(id));
        }
        let victim = StreamId::new(ids[victim_index % ids.len()]);
        prop_assert!(rr.erase(victim));
        prop_assert!(!rr.contains(victim));
        prop_assert_eq!(rr.len(), ids.len() - 1);

        let mut survivors: Vec<u64> = rr.round_order().iter().map(|id| id.value()).collect();
        survivors.sort_unstable();
        let expected: Vec<u64> = ids
            .iter()
            .copied()
            .filter(|&id| id != victim.value())
            .collect();
        prop_assert_eq!(survivors, expected);
    }
}
