//! Wire types for real-time delivery.
//!
//! An [`Envelope`] is addressed to exactly one user and carries one typed
//! [`Event`]. It serializes to `{"userId": n, "type": "...", "data": {...}}`,
//! which is what the SSE endpoint writes into each `data:` line.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// Stable numeric identity produced by the session layer.
pub type UserId = i64;

/// The closed set of event kinds a client may receive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Notification,
    Message,
    ConversationUpdate,
    GroupUpdate,
    Typing,
    Reaction,
    MessageDeleted,
    ConversationDeleted,
    GroupDeleted,
    /// Reserved for the first frame of a stream. Never fanned out by the broker
    /// and never dispatched to feature listeners.
    Connected,
}

impl EventType {
    pub const ALL: [EventType; 10] = [
        EventType::Notification,
        EventType::Message,
        EventType::ConversationUpdate,
        EventType::GroupUpdate,
        EventType::Typing,
        EventType::Reaction,
        EventType::MessageDeleted,
        EventType::ConversationDeleted,
        EventType::GroupDeleted,
        EventType::Connected,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Notification => "notification",
            EventType::Message => "message",
            EventType::ConversationUpdate => "conversation_update",
            EventType::GroupUpdate => "group_update",
            EventType::Typing => "typing",
            EventType::Reaction => "reaction",
            EventType::MessageDeleted => "message_deleted",
            EventType::ConversationDeleted => "conversation_deleted",
            EventType::GroupDeleted => "group_deleted",
            EventType::Connected => "connected",
        }
    }

    pub fn is_control(&self) -> bool {
        matches!(self, EventType::Connected)
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct EventTypeParseError(pub String);

impl fmt::Display for EventTypeParseError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "unknown event type: {}", self.0)
    }
}

impl std::error::Error for EventTypeParseError {}

impl FromStr for EventType {
    type Err = EventTypeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim().to_lowercase();
        EventType::ALL
            .into_iter()
            .find(|t| t.as_str() == name)
            .ok_or_else(|| EventTypeParseError(s.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReactionAction {
    Add,
    Remove,
}

/// Typed payload of an envelope, keyed by its `type`.
///
/// Entity bodies (messages, conversations, groups, notifications) are carried
/// as JSON values; their schema belongs to the store that produced them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum Event {
    Notification {
        notification: Value,
    },
    #[serde(rename_all = "camelCase")]
    Message {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        conversation_id: Option<i64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        group_id: Option<i64>,
        message: Value,
    },
    #[serde(rename_all = "camelCase")]
    ConversationUpdate {
        conversation_id: i64,
        conversation: Value,
    },
    #[serde(rename_all = "camelCase")]
    GroupUpdate { group_id: i64, group: Value },
    #[serde(rename_all = "camelCase")]
    Typing {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        conversation_id: Option<i64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        group_id: Option<i64>,
        user_id: UserId,
        is_typing: bool,
    },
    #[serde(rename_all = "camelCase")]
    Reaction {
        message_id: i64,
        emoji: String,
        action: ReactionAction,
        /// The user who reacted.
        user_id: UserId,
    },
    #[serde(rename_all = "camelCase")]
    MessageDeleted {
        message_id: i64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        conversation_id: Option<i64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        group_id: Option<i64>,
    },
    #[serde(rename_all = "camelCase")]
    ConversationDeleted { conversation_id: i64 },
    #[serde(rename_all = "camelCase")]
    GroupDeleted { group_id: i64 },
}

impl Event {
    pub fn event_type(&self) -> EventType {
        match self {
            Event::Notification { .. } => EventType::Notification,
            Event::Message { .. } => EventType::Message,
            Event::ConversationUpdate { .. } => EventType::ConversationUpdate,
            Event::GroupUpdate { .. } => EventType::GroupUpdate,
            Event::Typing { .. } => EventType::Typing,
            Event::Reaction { .. } => EventType::Reaction,
            Event::MessageDeleted { .. } => EventType::MessageDeleted,
            Event::ConversationDeleted { .. } => EventType::ConversationDeleted,
            Event::GroupDeleted { .. } => EventType::GroupDeleted,
        }
    }
}

/// The addressed unit of fan-out. Exists only for the duration of delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "userId")]
    pub user_id: UserId,
    #[serde(flatten)]
    pub event: Event,
}

impl Envelope {
    pub fn new(user_id: UserId, event: Event) -> Self {
        Self { user_id, event }
    }

    pub fn event_type(&self) -> EventType {
        self.event.event_type()
    }
}

/// First frame written on every stream: `{"type":"connected","userId":n,"timestamp":ms}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectedFrame {
    #[serde(rename = "type")]
    kind: EventType,
    #[serde(rename = "userId")]
    pub user_id: UserId,
    /// Server time in milliseconds since the Unix epoch.
    pub timestamp: i64,
}

impl ConnectedFrame {
    pub fn new(user_id: UserId, timestamp: i64) -> Self {
        Self {
            kind: EventType::Connected,
            user_id,
            timestamp,
        }
    }
}

/// Anything that can appear in the `data:` field of the stream.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Connected(ConnectedFrame),
    Envelope(Envelope),
}

impl Frame {
    pub fn to_json(&self) -> serde_json::Result<String> {
        match self {
            Frame::Connected(frame) => serde_json::to_string(frame),
            Frame::Envelope(envelope) => serde_json::to_string(envelope),
        }
    }

    /// Parses one `data:` payload. The control frame is recognised by its
    /// `type` field before the envelope shape is attempted.
    pub fn parse(data: &str) -> serde_json::Result<Frame> {
        let value: Value = serde_json::from_str(data)?;
        if value.get("type").and_then(Value::as_str) == Some(EventType::Connected.as_str()) {
            Ok(Frame::Connected(serde_json::from_value(value)?))
        } else {
            Ok(Frame::Envelope(serde_json::from_value(value)?))
        }
    }
}

impl From<Envelope> for Frame {
    fn from(envelope: Envelope) -> Self {
        Frame::Envelope(envelope)
    }
}
