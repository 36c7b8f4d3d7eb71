//! Event system infrastructure for the social realtime service.
//!
//! This crate holds both halves of the event vocabulary:
//!
//! - **Envelope types** (`envelope`): the typed unit that is fanned out to a
//!   user's live connections and written onto the SSE wire.
//! - **DomainEvent**: what a producer announces after committing a change,
//!   together with the user ids it computed as recipients.
//! - **EventHandler / EventPublisher**: the seam between producers and the
//!   infrastructure that delivers events (the SSE broker).
//!
//! This crate has no dependencies on other internal crates. Entity data is
//! carried as serialized JSON values.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

pub mod envelope;
pub mod recipients;

pub use envelope::{
    ConnectedFrame, Envelope, Event, EventType, Frame, ReactionAction, UserId,
};

/// Error type returned by fan-out listeners.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Where a message-scoped event happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChatTarget {
    Conversation(i64),
    Group(i64),
}

impl ChatTarget {
    /// Splits the target into the `(conversationId, groupId)` pair used on the wire.
    pub fn ids(&self) -> (Option<i64>, Option<i64>) {
        match self {
            ChatTarget::Conversation(id) => (Some(*id), None),
            ChatTarget::Group(id) => (None, Some(*id)),
        }
    }
}

/// Domain events that represent committed changes in the system.
/// These events are emitted only after the change has been durably stored.
///
/// Each event carries the user ids to notify. The producer computes them from
/// committed state; delivery never widens the set.
#[derive(Debug, Clone)]
pub enum DomainEvent {
    /// A notification row was created for its owner (friend request, like, ...).
    NotificationCreated {
        notification: Value,
        notify_user_ids: Vec<UserId>,
    },
    /// A message was posted to a conversation or group.
    MessageCreated {
        target: ChatTarget,
        message: Value,
        notify_user_ids: Vec<UserId>,
    },
    /// Conversation metadata changed (last message, unread counts, participants).
    ConversationUpdated {
        conversation_id: i64,
        conversation: Value,
        notify_user_ids: Vec<UserId>,
    },
    /// Group metadata or membership changed.
    GroupUpdated {
        group_id: i64,
        group: Value,
        notify_user_ids: Vec<UserId>,
    },
    /// A user started or stopped typing. Not backed by a store write.
    TypingChanged {
        target: ChatTarget,
        user_id: UserId,
        is_typing: bool,
        notify_user_ids: Vec<UserId>,
    },
    ReactionChanged {
        message_id: i64,
        emoji: String,
        action: ReactionAction,
        user_id: UserId,
        notify_user_ids: Vec<UserId>,
    },
    MessageDeleted {
        target: ChatTarget,
        message_id: i64,
        notify_user_ids: Vec<UserId>,
    },
    ConversationDeleted {
        conversation_id: i64,
        notify_user_ids: Vec<UserId>,
    },
    GroupDeleted {
        group_id: i64,
        notify_user_ids: Vec<UserId>,
    },
}

impl DomainEvent {
    pub fn notify_user_ids(&self) -> &[UserId] {
        match self {
            DomainEvent::NotificationCreated { notify_user_ids, .. }
            | DomainEvent::MessageCreated { notify_user_ids, .. }
            | DomainEvent::ConversationUpdated { notify_user_ids, .. }
            | DomainEvent::GroupUpdated { notify_user_ids, .. }
            | DomainEvent::TypingChanged { notify_user_ids, .. }
            | DomainEvent::ReactionChanged { notify_user_ids, .. }
            | DomainEvent::MessageDeleted { notify_user_ids, .. }
            | DomainEvent::ConversationDeleted { notify_user_ids, .. }
            | DomainEvent::GroupDeleted { notify_user_ids, .. } => notify_user_ids,
        }
    }

    /// The envelope payload every recipient of this event receives.
    pub fn to_event(&self) -> Event {
        match self {
            DomainEvent::NotificationCreated { notification, .. } => Event::Notification {
                notification: notification.clone(),
            },
            DomainEvent::MessageCreated {
                target, message, ..
            } => {
                let (conversation_id, group_id) = target.ids();
                Event::Message {
                    conversation_id,
                    group_id,
                    message: message.clone(),
                }
            }
            DomainEvent::ConversationUpdated {
                conversation_id,
                conversation,
                ..
            } => Event::ConversationUpdate {
                conversation_id: *conversation_id,
                conversation: conversation.clone(),
            },
            DomainEvent::GroupUpdated {
                group_id, group, ..
            } => Event::GroupUpdate {
                group_id: *group_id,
                group: group.clone(),
            },
            DomainEvent::TypingChanged {
                target,
                user_id,
                is_typing,
                ..
            } => {
                let (conversation_id, group_id) = target.ids();
                Event::Typing {
                    conversation_id,
                    group_id,
                    user_id: *user_id,
                    is_typing: *is_typing,
                }
            }
            DomainEvent::ReactionChanged {
                message_id,
                emoji,
                action,
                user_id,
                ..
            } => Event::Reaction {
                message_id: *message_id,
                emoji: emoji.clone(),
                action: *action,
                user_id: *user_id,
            },
            DomainEvent::MessageDeleted {
                target, message_id, ..
            } => {
                let (conversation_id, group_id) = target.ids();
                Event::MessageDeleted {
                    message_id: *message_id,
                    conversation_id,
                    group_id,
                }
            }
            DomainEvent::ConversationDeleted {
                conversation_id, ..
            } => Event::ConversationDeleted {
                conversation_id: *conversation_id,
            },
            DomainEvent::GroupDeleted { group_id, .. } => Event::GroupDeleted {
                group_id: *group_id,
            },
        }
    }
}

/// Trait for handling domain events.
/// Implementations can perform side effects like sending notifications,
/// updating caches, logging, etc. Handlers must not fail the producer.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: &DomainEvent);
}

/// Publishes domain events to registered handlers.
/// Handlers are called sequentially in registration order.
#[derive(Clone)]
pub struct EventPublisher {
    handlers: Arc<Vec<Arc<dyn EventHandler>>>,
}

impl EventPublisher {
    pub fn new() -> Self {
        Self {
            handlers: Arc::new(Vec::new()),
        }
    }

    /// Register a new event handler.
    /// Note: This creates a new publisher instance with the additional handler.
    /// Store the returned publisher in your application state.
    pub fn with_handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
        let mut handlers = (*self.handlers).clone();
        handlers.push(handler);
        self.handlers = Arc::new(handlers);
        self
    }

    /// Publish an event to all registered handlers.
    /// Call only after the change behind `event` has been committed.
    pub async fn publish(&self, event: DomainEvent) {
        for handler in self.handlers.iter() {
            handler.handle(&event).await;
        }
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }
}

impl Default for EventPublisher {
    fn default() -> Self {
        Self::new()
    }
}
