//! Round-robin list with a movable cursor and configurable advance policy.

use std::collections::HashMap;

use slab::Slab;

use crate::types::StreamId;

/// List sizes at which the side index is built and torn down. Heuristic
/// tunables, not invariants.
pub(crate) const BUILD_INDEX_THRESHOLD: usize = 30;
pub(crate) const DESTROY_INDEX_THRESHOLD: usize = 10;

/// What accumulates toward the advance threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AdvanceMode {
    /// Advance the cursor after `advance_after` calls to `consume`.
    Nexts,
    /// Advance the cursor after `advance_after` bytes have been consumed.
    Bytes,
}

#[derive(Debug)]
struct Node {
    id: StreamId,
    prev: Option<usize>,
    next: Option<usize>,
}

/// Round-robin ordering among streams of equal priority.
///
/// The list preserves insertion order: new entries append at the tail,
/// immediately before the cursor, so they never skip the current holder.
/// The cursor advances one step (wrapping at the end) every time the
/// per-turn counter reaches the configured threshold, counted either in
/// turns or in bytes.
///
/// Linked nodes live in a slab so positions stay stable across unrelated
/// inserts and erases. Once the list grows past
/// [`BUILD_INDEX_THRESHOLD`] entries a side index maps stream ID to node
/// key, turning the linear erase scan into a hash lookup; the index is torn
/// down when the list shrinks below [`DESTROY_INDEX_THRESHOLD`].
#[derive(Debug)]
pub struct RoundRobin {
    nodes: Slab<Node>,
    head: Option<usize>,
    tail: Option<usize>,
    /// The entry `peek`/`get_next` will return.
    cursor: Option<usize>,
    index: HashMap<StreamId, usize>,
    use_index: bool,
    mode: AdvanceMode,
    advance_after: u64,
    current: u64,
}

impl Default for RoundRobin {
    fn default() -> Self {
        Self {
            nodes: Slab::new(),
            head: None,
            tail: None,
            cursor: None,
            index: HashMap::new(),
            use_index: false,
            mode: AdvanceMode::Nexts,
            advance_after: 1,
            current: 0,
        }
    }
}

impl RoundRobin {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advance the cursor after `n` turns. Switching modes resets the
    /// counter.
    pub fn advance_after_nexts(&mut self, n: u64) {
        if self.mode == AdvanceMode::Bytes {
            self.current = 0;
        }
        self.mode = AdvanceMode::Nexts;
        self.advance_after = n;
    }

    /// Advance the cursor after `bytes` consumed bytes. Switching modes
    /// resets the counter.
    pub fn advance_after_bytes(&mut self, bytes: u64) {
        if self.mode == AdvanceMode::Nexts {
            self.current = 0;
        }
        self.mode = AdvanceMode::Bytes;
        self.advance_after = bytes;
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn contains(&self, id: StreamId) -> bool {
        if self.use_index {
            return self.index.contains_key(&id);
        }
        self.find(id).is_some()
    }

    /// Append `id` at the tail of the round, immediately before the cursor.
    ///
    /// The caller must never insert a duplicate.
    pub fn insert(&mut self, id: StreamId) {
        debug_assert!(!self.contains(id), "duplicate stream {id}");
        if !self.use_index && self.nodes.len() >= BUILD_INDEX_THRESHOLD {
            self.use_index = true;
            self.build_index();
        }

        let key = match self.cursor {
            None => {
                // First entry becomes head, tail and cursor.
                let key = self.nodes.insert(Node {
                    id,
                    prev: None,
                    next: None,
                });
                self.head = Some(key);
                self.tail = Some(key);
                self.cursor = Some(key);
                key
            }
            Some(cur) => {
                let prev = self.nodes[cur].prev;
                let key = self.nodes.insert(Node {
                    id,
                    prev,
                    next: Some(cur),
                });
                match prev {
                    Some(p) => self.nodes[p].next = Some(key),
                    None => self.head = Some(key),
                }
                self.nodes[cur].prev = Some(key);
                key
            }
        };

        if self.use_index {
            self.index.insert(id, key);
        }
    }

    /// Remove `id` from the round. Returns false if it was not present.
    ///
    /// Erasing the cursor entry advances the cursor (wrapping to the head)
    /// and resets the per-turn counter.
    pub fn erase(&mut self, id: StreamId) -> bool {
        if self.nodes.is_empty() {
            return false;
        }
        let key = if self.use_index {
            match self.index.get(&id) {
                Some(&k) => k,
                None => return false,
            }
        } else {
            match self.find(id) {
                Some(k) => k,
                None => return false,
            }
        };
        self.unlink(key);
        true
    }

    /// The entry the next `get_next` would return.
    pub fn peek(&self) -> Option<StreamId> {
        self.cursor.map(|k| self.nodes[k].id)
    }

    /// Return the cursor entry and feed `bytes` to the advance counter.
    pub fn get_next(&mut self, bytes: Option<u64>) -> Option<StreamId> {
        let id = self.peek()?;
        self.consume(bytes);
        Some(id)
    }

    /// Accumulate into the per-turn counter: one turn in nexts mode,
    /// `bytes` in bytes mode. Crossing the threshold moves the cursor one
    /// step and resets the counter.
    pub fn consume(&mut self, bytes: Option<u64>) {
        match self.mode {
            AdvanceMode::Bytes => self.current += bytes.unwrap_or(0),
            AdvanceMode::Nexts => self.current += 1,
        }
        self.maybe_advance();
    }

    pub fn clear(&mut self) {
        self.nodes.clear();
        self.index.clear();
        self.use_index = false;
        self.head = None;
        self.tail = None;
        self.cursor = None;
        self.current = 0;
    }

    /// Entries in round order starting at the cursor. Test and diagnostic
    /// aid; does not move the cursor.
    pub fn round_order(&self) -> Vec<StreamId> {
        let mut out = Vec::with_capacity(self.nodes.len());
        let Some(start) = self.cursor else {
            return out;
        };
        let mut k = start;
        loop {
            out.push(self.nodes[k].id);
            k = self.nodes[k].next.or(self.head).expect("non-empty list");
            if k == start {
                break;
            }
        }
        out
    }

    fn find(&self, id: StreamId) -> Option<usize> {
        let mut k = self.head;
        while let Some(key) = k {
            if self.nodes[key].id == id {
                return Some(key);
            }
            k = self.nodes[key].next;
        }
        None
    }

    fn unlink(&mut self, key: usize) {
        let node = self.nodes.remove(key);
        match node.prev {
            Some(p) => self.nodes[p].next = node.next,
            None => self.head = node.next,
        }
        match node.next {
            Some(n) => self.nodes[n].prev = node.prev,
            None => self.tail = node.prev,
        }

        if self.cursor == Some(key) {
            self.cursor = node.next.or(self.head);
            self.current = 0;
        }

        if self.use_index {
            self.index.remove(&node.id);
            if self.nodes.len() < DESTROY_INDEX_THRESHOLD {
                self.use_index = false;
                self.index.clear();
            }
        }
    }

    fn maybe_advance(&mut self) {
        if self.current < self.advance_after {
            return;
        }
        self.current = 0;
        if let Some(cur) = self.cursor {
            self.cursor = self.nodes[cur].next.or(self.head);
        }
    }

    fn build_index(&mut self) {
        self.index.clear();
        let mut k = self.head;
        while let Some(key) = k {
            self.index.insert(self.nodes[key].id, key);
            k = self.nodes[key].next;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(n: u64) -> StreamId {
        StreamId::new(n)
    }

    fn three() -> RoundRobin {
        let mut rr = RoundRobin::new();
        rr.insert(id(1));
        rr.insert(id(2));
        rr.insert(id(3));
        rr
    }

    #[test]
    fn test_advance_after_next() {
        let mut rr = three();
        rr.advance_after_bytes(3);
        rr.advance_after_nexts(3);
        for expected in [1, 1, 1, 2, 2, 2, 3, 3, 3] {
            assert_eq!(rr.get_next(None), Some(id(expected)));
        }
        // Wraps back to the first entry.
        assert_eq!(rr.peek(), Some(id(1)));
    }

    #[test]
    fn test_advance_after_bytes() {
        let mut rr = three();
        rr.advance_after_bytes(10);
        assert_eq!(rr.get_next(None), Some(id(1)));
        assert_eq!(rr.get_next(Some(5)), Some(id(1)));
        assert_eq!(rr.get_next(Some(5)), Some(id(1)));
        assert_eq!(rr.get_next(Some(10)), Some(id(2)));
        assert_eq!(rr.get_next(None), Some(id(3)));
    }

    #[test]
    fn test_mode_change_resets_counter() {
        let mut rr = three();
        rr.advance_after_bytes(10);
        rr.consume(Some(9));
        rr.advance_after_nexts(2);
        // The 9 accumulated bytes must not count toward the 2 turns.
        assert_eq!(rr.get_next(None), Some(id(1)));
        assert_eq!(rr.get_next(None), Some(id(1)));
        assert_eq!(rr.peek(), Some(id(2)));
    }

    #[test]
    fn test_empty() {
        let mut rr = RoundRobin::new();
        assert!(rr.is_empty());
        assert!(!rr.erase(id(9)));
        assert_eq!(rr.peek(), None);
        assert_eq!(rr.get_next(None), None);
    }

    #[test]
    fn test_erase() {
        let mut rr = three();
        rr.advance_after_nexts(2);
        assert!(!rr.erase(id(9)));

        assert_eq!(rr.get_next(None), Some(id(1)));
        assert!(rr.erase(id(1)));
        // Erasing the cursor entry resets the counter: 2 gets two turns.
        assert_eq!(rr.get_next(None), Some(id(2)));
        assert_eq!(rr.get_next(None), Some(id(2)));
        assert!(rr.erase(id(2)));
        rr.insert(id(1));

        assert!(rr.erase(id(1)));
        assert_eq!(rr.get_next(None), Some(id(3)));
        assert!(rr.erase(id(3)));
        assert!(rr.is_empty());
    }

    #[test]
    fn test_erase_before_cursor() {
        let mut rr = three();
        rr.get_next(None);
        rr.get_next(None);
        assert!(rr.erase(id(2)));
        assert_eq!(rr.get_next(None), Some(id(3)));
        assert_eq!(rr.get_next(None), Some(id(1)));
    }

    #[test]
    fn test_insert_before_cursor_is_fair() {
        let mut rr = three();
        rr.get_next(None); // cursor now at 2
        rr.insert(id(4));
        // 4 sits at the tail of the round: 2, 3, 1, 4.
        assert_eq!(
            rr.round_order(),
            vec![id(2), id(3), id(1), id(4)],
            "new entry must not skip the current holder"
        );
    }

    #[test]
    fn test_insert_erase_round_trip_restores_state() {
        let mut rr = three();
        rr.advance_after_nexts(3);
        rr.consume(None);
        let before = (rr.peek(), rr.round_order(), rr.len());

        rr.insert(id(7));
        assert!(rr.erase(id(7)));

        assert_eq!(before, (rr.peek(), rr.round_order(), rr.len()));
        // Counter is observable through remaining turns until advance.
        assert_eq!(rr.get_next(None), Some(id(1)));
        assert_eq!(rr.get_next(None), Some(id(1)));
        assert_eq!(rr.peek(), Some(id(2)));
    }

    #[test]
    fn test_peek_does_not_consume() {
        let rr_peek = three().peek();
        let mut rr = three();
        assert_eq!(rr.peek(), rr_peek);
        assert_eq!(rr.peek(), Some(id(1)));
        assert_eq!(rr.get_next(None), Some(id(1)));
    }

    #[test]
    fn test_index_build_and_teardown() {
        let mut rr = three();
        for i in 4..=40 {
            rr.insert(id(i));
        }
        assert!(rr.use_index, "index built past the threshold");
        for _ in 0..20 {
            rr.get_next(None);
        }
        for i in 1..20 {
            assert!(rr.erase(id(i)));
            assert!(rr.erase(id(40 - i)));
        }
        assert!(!rr.use_index, "index torn down below the threshold");
        assert_eq!(rr.len(), 2);
        assert!(rr.contains(id(20)));
    }

    #[test]
    fn test_clear() {
        let mut rr = three();
        for i in 4..=40 {
            rr.insert(id(i));
        }
        rr.clear();
        assert!(rr.is_empty());
        assert_eq!(rr.peek(), None);
        rr.insert(id(5));
        assert_eq!(rr.peek(), Some(id(5)));
    }
}
