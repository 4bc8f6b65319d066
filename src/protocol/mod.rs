//! Wire types for the line-oriented JSON command protocol.
//!
//! Exactly three client commands exist: `subscribe`, `unsubscribe`, and
//! `send`. Each is a flat JSON object; unknown fields are rejected, and an
//! optional field that is present must carry its declared type. The broker
//! answers every command with a [`Reply`] and forwards published messages as
//! [`CachedMessage`] frames (the original `send` object plus the assigned
//! per-topic `index`).

pub mod codec;


use bytes::Bytes;
use serde::{Deserialize, Deserializer, Serialize};

pub type TopicName = String;
pub type MessageIndex = u64;

/// How a published message is routed to the topic's subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Delivery {
    /// Broadcast to every current subscriber.
    All,
    /// Deliver to a single subscriber chosen uniformly at random.
    One,
}

/// A validated client command.
#[derive(Debug, Clone)]
pub enum Command {
    Subscribe(SubscribeRequest),
    Unsubscribe(UnsubscribeRequest),
    Send(SendRequest),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SubscribeRequest {
    pub command: String,
    pub topic: TopicName,
    #[serde(default, deserialize_with = "present_field")]
    pub last_seen: Option<i64>,
    #[serde(default, deserialize_with = "present_field")]
    pub cache: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UnsubscribeRequest {
    pub command: String,
    pub topic: TopicName,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SendRequest {
    pub command: String,
    pub topic: TopicName,
    pub msg: String,
    pub delivery: Delivery,
    #[serde(default, deserialize_with = "present_field")]
    pub cache: Option<bool>,
}

impl SendRequest {
    /// Annotate the command with its broker-assigned per-topic index. All
    /// publisher-supplied fields are carried over verbatim.
    pub fn into_message(self, index: MessageIndex) -> CachedMessage {
        CachedMessage {
            command: self.command,
            topic: self.topic,
            msg: self.msg,
            delivery: self.delivery,
            cache: self.cache,
            index,
        }
    }
}

/// A published message as delivered to subscribers and retained in the
/// replay cache: the publisher's `send` object plus the assigned `index`.
#[derive(Debug, Clone, Serialize)]
pub struct CachedMessage {
    pub command: String,
    pub topic: TopicName,
    pub msg: String,
    pub delivery: Delivery,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache: Option<bool>,
    pub index: MessageIndex,
}

impl CachedMessage {
    /// Whether this message lies beyond a subscriber's `last_seen`
    /// high-water mark. A negative `last_seen` precedes every index.
    pub fn follows(&self, last_seen: i64) -> bool {
        last_seen < 0 || self.index > last_seen as u64
    }
}

/// Why a record was rejected before reaching a command handler. Each variant
/// maps to one of the protocol's fixed failure reason strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reject {
    InvalidUtf8,
    InvalidJson,
    MalformedCommand,
}

impl Reject {
    pub const fn reason(self) -> &'static str {
        match self {
            Reject::InvalidUtf8 => "Could not decode input as UTF-8",
            Reject::InvalidJson => "Could not parse json",
            Reject::MalformedCommand => "Malformed json message",
        }
    }
}

/// The broker's acknowledgement of a command.
#[derive(Debug, Clone, Serialize)]
pub struct Reply {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<&'static str>,
}

impl Reply {
    pub fn success() -> Self {
        Self {
            success: true,
            reason: None,
        }
    }

    pub fn failure(reject: Reject) -> Self {
        Self {
            success: false,
            reason: Some(reject.reason()),
        }
    }
}

/// Serialize a reply or message to its wire body (the line without the
/// terminator). Serialization of these types cannot fail; should it ever,
/// the empty frame degrades to a blank line that peers ignore.
pub fn to_frame<T: Serialize>(value: &T) -> Bytes {
    match serde_json::to_vec(value) {
        Ok(body) => Bytes::from(body),
        Err(_) => Bytes::new(),
    }
}

/// Deserializer for optional fields: a field that is present must carry its
/// declared type, so `null` is rejected rather than read as absent.
fn present_field<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    T::deserialize(deserializer).map(Some)
}
