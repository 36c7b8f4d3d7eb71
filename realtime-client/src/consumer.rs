//! Client-side chat state kept current from the event stream.
//!
//! Envelopes are applied incrementally and idempotently: a message that
//! arrives twice (for example once over the stream and once from a refetch)
//! is stored once and counted as unread once. Anything missed while offline is
//! recovered by `reset()` plus a refetch from the store.

use crate::client::{ConnectionState, ListenerHandle, RealtimeClient};
use events::{ChatTarget, Envelope, Event, EventType, ReactionAction, UserId};
use log::*;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Debug, Default)]
struct ChatData {
    messages: HashMap<ChatTarget, BTreeMap<i64, Value>>,
    unread: HashMap<ChatTarget, u32>,
    conversations: HashMap<i64, Value>,
    groups: HashMap<i64, Value>,
    typing: HashMap<ChatTarget, BTreeSet<UserId>>,
    // message id -> emoji -> users
    reactions: HashMap<i64, BTreeMap<String, BTreeSet<UserId>>>,
    notifications: BTreeMap<i64, Value>,
}

impl ChatData {
    fn forget_chat(&mut self, target: ChatTarget) {
        if let Some(messages) = self.messages.remove(&target) {
            for message_id in messages.keys() {
                self.reactions.remove(message_id);
            }
        }
        self.unread.remove(&target);
        self.typing.remove(&target);
    }
}

/// Chat state for the signed-in user `me`.
pub struct ChatState {
    me: UserId,
    data: Mutex<ChatData>,
    stale: AtomicBool,
}

impl ChatState {
    pub fn new(me: UserId) -> Arc<Self> {
        Arc::new(Self {
            me,
            data: Mutex::new(ChatData::default()),
            stale: AtomicBool::new(false),
        })
    }

    /// Registers this state with `client` for every deliverable event type.
    ///
    /// Also marks the state stale whenever the stream comes back after a loss,
    /// since envelopes published in between were dropped.
    pub fn attach(self: &Arc<Self>, client: &Arc<RealtimeClient>) -> Vec<ListenerHandle> {
        let mut handles: Vec<ListenerHandle> = EventType::ALL
            .into_iter()
            .filter(|event_type| !event_type.is_control())
            .map(|event_type| {
                let state = Arc::clone(self);
                client.on(event_type, move |envelope| state.apply(envelope))
            })
            .collect();

        let state = Arc::clone(self);
        let was_connected = AtomicBool::new(false);
        handles.push(client.on_connection_state_change(move |connection| {
            if connection == ConnectionState::Connected
                && was_connected.swap(true, Ordering::SeqCst)
            {
                info!("Realtime stream restored, chat state needs a refetch");
                state.stale.store(true, Ordering::SeqCst);
            }
        }));

        handles
    }

    /// Applies one envelope. Envelopes addressed to another user are ignored.
    pub fn apply(&self, envelope: &Envelope) {
        if envelope.user_id != self.me {
            warn!(
                "Ignoring {} envelope addressed to user {}",
                envelope.event_type(),
                envelope.user_id
            );
            return;
        }

        let mut guard = self.lock();
        let data = &mut *guard;
        match &envelope.event {
            Event::Notification { notification } => match entity_id(notification) {
                Some(id) => {
                    data.notifications.insert(id, notification.clone());
                }
                None => debug!("Notification without an id dropped"),
            },
            Event::Message {
                conversation_id,
                group_id,
                message,
            } => {
                let (Some(target), Some(id)) =
                    (target_of(*conversation_id, *group_id), entity_id(message))
                else {
                    debug!("Message without a chat or an id dropped");
                    return;
                };
                let sender = message.get("senderId").and_then(Value::as_i64);
                let messages = data.messages.entry(target).or_default();
                if messages.insert(id, message.clone()).is_none() && sender != Some(self.me) {
                    *data.unread.entry(target).or_default() += 1;
                }
            }
            Event::ConversationUpdate {
                conversation_id,
                conversation,
            } => {
                if let Some(count) = conversation.get("unreadCount").and_then(Value::as_u64) {
                    data.unread.insert(
                        ChatTarget::Conversation(*conversation_id),
                        u32::try_from(count).unwrap_or(u32::MAX),
                    );
                }
                data.conversations
                    .insert(*conversation_id, conversation.clone());
            }
            Event::GroupUpdate { group_id, group } => {
                data.groups.insert(*group_id, group.clone());
            }
            Event::Typing {
                conversation_id,
                group_id,
                user_id,
                is_typing,
            } => {
                let Some(target) = target_of(*conversation_id, *group_id) else {
                    return;
                };
                if *user_id == self.me {
                    return;
                }
                let typing = data.typing.entry(target).or_default();
                if *is_typing {
                    typing.insert(*user_id);
                } else {
                    typing.remove(user_id);
                    if typing.is_empty() {
                        data.typing.remove(&target);
                    }
                }
            }
            Event::Reaction {
                message_id,
                emoji,
                action,
                user_id,
            } => {
                let emojis = data.reactions.entry(*message_id).or_default();
                match action {
                    ReactionAction::Add => {
                        emojis.entry(emoji.clone()).or_default().insert(*user_id);
                    }
                    ReactionAction::Remove => {
                        if let Some(users) = emojis.get_mut(emoji) {
                            users.remove(user_id);
                            if users.is_empty() {
                                emojis.remove(emoji);
                            }
                        }
                    }
                }
                if emojis.is_empty() {
                    data.reactions.remove(message_id);
                }
            }
            Event::MessageDeleted {
                message_id,
                conversation_id,
                group_id,
            } => {
                match target_of(*conversation_id, *group_id) {
                    Some(target) => {
                        if let Some(messages) = data.messages.get_mut(&target) {
                            messages.remove(message_id);
                        }
                    }
                    None => {
                        for messages in data.messages.values_mut() {
                            messages.remove(message_id);
                        }
                    }
                }
                data.reactions.remove(message_id);
            }
            Event::ConversationDeleted { conversation_id } => {
                data.conversations.remove(conversation_id);
                data.forget_chat(ChatTarget::Conversation(*conversation_id));
            }
            Event::GroupDeleted { group_id } => {
                data.groups.remove(group_id);
                data.forget_chat(ChatTarget::Group(*group_id));
            }
        }
    }

    /// Drops everything so the application can refetch from the store.
    pub fn reset(&self) {
        *self.lock() = ChatData::default();
        self.stale.store(false, Ordering::SeqCst);
    }

    /// True once after the stream was restored following a loss.
    pub fn take_stale(&self) -> bool {
        self.stale.swap(false, Ordering::SeqCst)
    }

    pub fn messages(&self, target: ChatTarget) -> Vec<Value> {
        self.lock()
            .messages
            .get(&target)
            .map(|messages| messages.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn unread(&self, target: ChatTarget) -> u32 {
        self.lock().unread.get(&target).copied().unwrap_or(0)
    }

    pub fn mark_read(&self, target: ChatTarget) {
        self.lock().unread.remove(&target);
    }

    pub fn conversation(&self, conversation_id: i64) -> Option<Value> {
        self.lock().conversations.get(&conversation_id).cloned()
    }

    pub fn group(&self, group_id: i64) -> Option<Value> {
        self.lock().groups.get(&group_id).cloned()
    }

    pub fn typing_users(&self, target: ChatTarget) -> Vec<UserId> {
        self.lock()
            .typing
            .get(&target)
            .map(|users| users.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn reaction_users(&self, message_id: i64, emoji: &str) -> Vec<UserId> {
        self.lock()
            .reactions
            .get(&message_id)
            .and_then(|emojis| emojis.get(emoji))
            .map(|users| users.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn notifications(&self) -> Vec<Value> {
        self.lock().notifications.values().cloned().collect()
    }

    fn lock(&self) -> MutexGuard<'_, ChatData> {
        self.data.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn target_of(conversation_id: Option<i64>, group_id: Option<i64>) -> Option<ChatTarget> {
    conversation_id
        .map(ChatTarget::Conversation)
        .or(group_id.map(ChatTarget::Group))
}

fn entity_id(entity: &Value) -> Option<i64> {
    entity.get("id").and_then(Value::as_i64)
}
