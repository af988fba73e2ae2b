//! # Priority Scheduler — Round-Robin Within Priority
//!
//! Selects the next stream identifier for writing. Each urgency level
//! (0 = highest) holds an independent round-robin list; a non-empty higher
//! level always preempts lower ones. Within a level, fairness is
//! round-robin with a configurable advance policy: move to the next stream
//! after a number of turns or after a number of bytes.
//!
//! A stream appears here iff it has writable bytes or a queued reset and
//! is neither Closed nor Invalid; the stream manager maintains membership.

mod round_robin;

pub use round_robin::RoundRobin;

use std::collections::HashMap;

use crate::types::{StreamId, StreamPriority, URGENCY_LEVELS};

/// Multi-level scheduler: one round-robin list per urgency level.
#[derive(Debug)]
pub struct PriorityScheduler {
    levels: [RoundRobin; URGENCY_LEVELS],
    /// Level each scheduled stream currently occupies.
    membership: HashMap<StreamId, usize>,
}

impl Default for PriorityScheduler {
    fn default() -> Self {
        Self {
            levels: core::array::from_fn(|_| RoundRobin::new()),
            membership: HashMap::new(),
        }
    }
}

impl PriorityScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Configure every level to advance after `n` turns.
    pub fn advance_after_nexts(&mut self, n: u64) {
        for level in &mut self.levels {
            level.advance_after_nexts(n);
        }
    }

    /// Configure every level to advance after `bytes` consumed bytes.
    pub fn advance_after_bytes(&mut self, bytes: u64) {
        for level in &mut self.levels {
            level.advance_after_bytes(bytes);
        }
    }

    /// Schedule `id` at its priority level. No-op if already scheduled at
    /// that level; a different level moves the stream.
    pub fn insert(&mut self, id: StreamId, priority: StreamPriority) {
        let level = priority.level();
        if let Some(&current) = self.membership.get(&id) {
            if current == level {
                return;
            }
            self.levels[current].erase(id);
        }
        self.levels[level].insert(id);
        self.membership.insert(id, level);
    }

    /// Remove `id` from the scheduler. Returns false if absent.
    pub fn erase(&mut self, id: StreamId) -> bool {
        match self.membership.remove(&id) {
            Some(level) => self.levels[level].erase(id),
            None => false,
        }
    }

    pub fn contains(&self, id: StreamId) -> bool {
        self.membership.contains_key(&id)
    }

    /// The stream the next write should serve: cursor of the highest
    /// non-empty level.
    pub fn peek(&self) -> Option<StreamId> {
        self.levels.iter().find_map(|level| level.peek())
    }

    /// Like [`peek`](Self::peek), but also consumes.
    pub fn get_next(&mut self, bytes: Option<u64>) -> Option<StreamId> {
        let level = self.levels.iter_mut().find(|level| !level.is_empty())?;
        level.get_next(bytes)
    }

    /// Feed `bytes` to the advance counter of the level currently being
    /// served (the highest non-empty level).
    pub fn consume(&mut self, bytes: Option<u64>) {
        if let Some(level) = self.levels.iter_mut().find(|level| !level.is_empty()) {
            level.consume(bytes);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.membership.is_empty()
    }

    pub fn len(&self) -> usize {
        self.membership.len()
    }

    pub fn clear(&mut self) {
        for level in &mut self.levels {
            level.clear();
        }
        self.membership.clear();
    }
}
