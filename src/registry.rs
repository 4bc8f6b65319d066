//! Topic registry: the two-way mapping between topics and subscribed
//! sessions.
//!
//! The registry keeps both directions of the subscription relation:
//!
//! - *forward*: topic -> set of sessions, used for fan-out,
//! - *reverse*: session -> set of topics, used for O(subscriptions) cleanup
//!   when a session disconnects.
//!
//! Invariant: a session S is in the forward set of topic T iff T is in the
//! reverse set of S. The registry holds session ids only; session I/O is
//! owned elsewhere, and [`TopicRegistry::purge`] is the single mechanism
//! that removes a dead session's forward-map entries.

use crate::protocol::TopicName;
use std::collections::{HashMap, HashSet};

/// Identifies one live client connection. Ids are allocated from a counter
/// at accept time and never reused, so two connections from the same remote
/// address are distinct.
pub type SessionId = u64;

/// Tracks which sessions subscribe to which topics.
#[derive(Debug, Default)]
pub struct TopicRegistry {
    forward: HashMap<TopicName, HashSet<SessionId>>,
    reverse: HashMap<SessionId, HashSet<TopicName>>,
}

impl TopicRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscription. Idempotent: re-subscribing to a topic the
    /// session already holds is a no-op.
    pub fn subscribe(&mut self, session: SessionId, topic: &str) {
        self.forward
            .entry(topic.to_owned())
            .or_default()
            .insert(session);
        self.reverse
            .entry(session)
            .or_default()
            .insert(topic.to_owned());
    }

    /// Drop a subscription. Idempotent: unsubscribing from a topic the
    /// session does not hold succeeds without effect.
    pub fn unsubscribe(&mut self, session: SessionId, topic: &str) {
        if let Some(sessions) = self.forward.get_mut(topic) {
            sessions.remove(&session);
            if sessions.is_empty() {
                self.forward.remove(topic);
            }
        }
        if let Some(topics) = self.reverse.get_mut(&session) {
            topics.remove(topic);
            if topics.is_empty() {
                self.reverse.remove(&session);
            }
        }
    }

    /// The sessions currently subscribed to a topic, in no particular order.
    pub fn subscribers(&self, topic: &str) -> Vec<SessionId> {
        self.forward
            .get(topic)
            .map(|sessions| sessions.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.forward.get(topic).map(HashSet::len).unwrap_or(0)
    }

    pub fn is_subscribed(&self, session: SessionId, topic: &str) -> bool {
        self.forward
            .get(topic)
            .is_some_and(|sessions| sessions.contains(&session))
    }

    /// The topics a session currently subscribes to.
    pub fn subscriptions(&self, session: SessionId) -> Vec<TopicName> {
        self.reverse
            .get(&session)
            .map(|topics| topics.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Remove a session from the forward set of every topic in its reverse
    /// set, then drop the reverse entry. Called exactly once per session at
    /// disconnect.
    pub fn purge(&mut self, session: SessionId) {
        let Some(topics) = self.reverse.remove(&session) else {
            return;
        };
        for topic in topics {
            if let Some(sessions) = self.forward.get_mut(&topic) {
                sessions.remove(&session);
                if sessions.is_empty() {
                    self.forward.remove(&topic);
                }
            }
        }
    }
}
