//! Shared broker state and command dispatch.
//!
//! One [`MessageHandler`] serves every session. All mutable state (the
//! session table, the topic registry, the replay caches, and the per-topic
//! index counters) lives behind a single broker-wide lock, so each command
//! executes as an atomic unit against that state. Outbound frames are
//! pushed onto per-session unbounded channels while the lock is held, which
//! serializes deliveries with replies; the lock is never held across an
//! await point because every push is non-blocking.

use crate::cache::ReplayCache;
use crate::protocol::{
    to_frame, CachedMessage, Command, Delivery, MessageIndex, Reply, SendRequest,
    SubscribeRequest, TopicName, UnsubscribeRequest,
};
use crate::registry::{SessionId, TopicRegistry};
use bytes::Bytes;
use parking_lot::Mutex;
use rand::Rng;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// The sending half of a session's outbound frame channel. The broker holds
/// these as non-owning handles; a send to a closed channel is ignored, and
/// the entry is removed when the session is purged.
pub type OutboundSender = tokio::sync::mpsc::UnboundedSender<Bytes>;

/// Processes validated commands against the broker's shared state.
pub struct MessageHandler {
    cache_capacity: usize,
    next_session_id: AtomicU64,
    state: Mutex<BrokerState>,
}

#[derive(Default)]
struct BrokerState {
    sessions: HashMap<SessionId, OutboundSender>,
    registry: TopicRegistry,
    caches: HashMap<TopicName, ReplayCache>,
    next_index: HashMap<TopicName, MessageIndex>,
}

impl BrokerState {
    fn emit(&self, session: SessionId, frame: Bytes) {
        if let Some(outbound) = self.sessions.get(&session) {
            // The receiver may already be gone; delivery failures to one
            // session never affect the command being processed.
            let _ = outbound.send(frame);
        }
    }

    /// Assign the next index for a topic. The counter advances on every
    /// publish, cached or not, delivered or not, and is never rewound.
    fn assign_index(&mut self, topic: &str) -> MessageIndex {
        let slot = self.next_index.entry(topic.to_owned()).or_insert(0);
        let index = *slot;
        *slot += 1;
        index
    }
}

impl MessageHandler {
    pub fn new(cache_capacity: usize) -> Self {
        Self {
            cache_capacity,
            next_session_id: AtomicU64::new(0),
            state: Mutex::new(BrokerState::default()),
        }
    }

    /// Register a newly accepted session and allocate its id.
    pub fn register_session(&self, outbound: OutboundSender) -> SessionId {
        let session = self.next_session_id.fetch_add(1, Ordering::Relaxed);
        self.state.lock().sessions.insert(session, outbound);
        session
    }

    /// Remove a session from the registry and the session table. Called
    /// exactly once per session when its connection terminates.
    pub fn purge_session(&self, session: SessionId) {
        let mut state = self.state.lock();
        state.registry.purge(session);
        state.sessions.remove(&session);
        debug!(session, "session purged");
    }

    /// Execute one validated command on behalf of a session.
    pub fn handle_command(&self, session: SessionId, command: Command) {
        match command {
            Command::Subscribe(request) => self.handle_subscribe(session, request),
            Command::Unsubscribe(request) => self.handle_unsubscribe(session, request),
            Command::Send(request) => self.handle_send(session, request),
        }
    }

    fn handle_subscribe(&self, session: SessionId, request: SubscribeRequest) {
        let mut state = self.state.lock();
        state.registry.subscribe(session, &request.topic);
        debug!(session, topic = %request.topic, "subscribe");

        let replay = if request.cache.unwrap_or(true) {
            let last_seen = request.last_seen.unwrap_or(-1);
            match state.caches.get_mut(&request.topic) {
                Some(cache) => cache.catch_up(last_seen),
                None => Vec::new(),
            }
        } else {
            Vec::new()
        };

        // Replayed messages follow the acknowledgement.
        state.emit(session, to_frame(&Reply::success()));
        for message in &replay {
            state.emit(session, to_frame(message.as_ref()));
        }
    }

    fn handle_unsubscribe(&self, session: SessionId, request: UnsubscribeRequest) {
        let mut state = self.state.lock();
        state.registry.unsubscribe(session, &request.topic);
        debug!(session, topic = %request.topic, "unsubscribe");
        state.emit(session, to_frame(&Reply::success()));
    }

    fn handle_send(&self, session: SessionId, request: SendRequest) {
        let mut state = self.state.lock();
        let index = state.assign_index(&request.topic);
        let mut cache_enabled = request.cache.unwrap_or(true);
        let message = Arc::new(request.into_message(index));

        let recipients = match message.delivery {
            Delivery::All => state.registry.subscribers(&message.topic),
            Delivery::One => {
                // A randomly routed message is never cached: replaying it
                // later would deliver it to a subscriber the draw did not
                // pick.
                cache_enabled = false;
                let subscribers = state.registry.subscribers(&message.topic);
                if subscribers.is_empty() {
                    Vec::new()
                } else {
                    let chosen = rand::rng().random_range(0..subscribers.len());
                    vec![subscribers[chosen]]
                }
            }
        };

        if cache_enabled {
            let capacity = self.cache_capacity;
            state
                .caches
                .entry(message.topic.clone())
                .or_insert_with(|| ReplayCache::new(capacity))
                .append(Arc::clone(&message));
        }

        debug!(
            session,
            topic = %message.topic,
            index = message.index,
            recipients = recipients.len(),
            "send"
        );

        let frame = to_frame(message.as_ref());
        for recipient in recipients {
            state.emit(recipient, frame.clone());
        }
        state.emit(session, to_frame(&Reply::success()));
    }

    /// Number of sessions currently subscribed to a topic.
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.state.lock().registry.subscriber_count(topic)
    }

    /// The next index the topic will assign; equals the number of `send`
    /// commands to the topic processed so far.
    pub fn next_index(&self, topic: &str) -> MessageIndex {
        self.state
            .lock()
            .next_index
            .get(topic)
            .copied()
            .unwrap_or(0)
    }

    /// Snapshot of the topic's replay cache, oldest first.
    pub fn cached_messages(&self, topic: &str) -> Vec<Arc<CachedMessage>> {
        self.state
            .lock()
            .caches
            .get(topic)
            .map(|cache| cache.messages().cloned().collect())
            .unwrap_or_default()
    }
}
