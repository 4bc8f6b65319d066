//! Bounded per-topic replay cache.
//!
//! Each topic keeps a FIFO of recently published broadcast messages, oldest
//! at the front, capped at a configured capacity. Entries are kept in
//! strictly increasing index order, and only `delivery == "all"` messages
//! are ever appended, so a replayed `"one"` message can never reach a
//! subscriber the random draw did not pick.
//!
//! The cache is mutated in exactly two places: [`ReplayCache::append`] on
//! publish, and [`ReplayCache::catch_up`] when a subscriber requests replay.

use crate::protocol::{CachedMessage, Delivery};
use std::collections::VecDeque;
use std::sync::Arc;

/// The replay history of one topic.
#[derive(Debug)]
pub struct ReplayCache {
    entries: VecDeque<Arc<CachedMessage>>,
    capacity: usize,
}

impl ReplayCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            capacity,
        }
    }

    /// Append a newly published message to the tail, evicting from the
    /// front while the cache exceeds its capacity.
    pub fn append(&mut self, message: Arc<CachedMessage>) {
        self.entries.push_back(message);
        self.enforce_capacity();
    }

    /// Catch-up-and-prune for a new subscriber.
    ///
    /// Returns, in insertion order, every cached message beyond `last_seen`
    /// for the caller to replay. The cache is then rebuilt keeping entries
    /// the subscriber had already seen (`index <= last_seen`) or that carry
    /// broadcast delivery, and the size cap is re-applied from the front.
    /// Replay order is strictly increasing in index, and each qualifying
    /// message is returned at most once per call.
    pub fn catch_up(&mut self, last_seen: i64) -> Vec<Arc<CachedMessage>> {
        let replay: Vec<_> = self
            .entries
            .iter()
            .filter(|message| message.follows(last_seen))
            .cloned()
            .collect();

        self.entries
            .retain(|message| !message.follows(last_seen) || message.delivery == Delivery::All);
        self.enforce_capacity();

        replay
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The cached messages in insertion (index) order.
    pub fn messages(&self) -> impl Iterator<Item = &Arc<CachedMessage>> {
        self.entries.iter()
    }

    fn enforce_capacity(&mut self) {
        while self.entries.len() > self.capacity {
            self.entries.pop_front();
        }
    }
}
