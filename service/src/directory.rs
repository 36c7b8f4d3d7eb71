//! Membership lookups against the durable store.
//!
//! Producers use these to compute recipients from committed state. The
//! in-memory implementation backs development runs and tests.

use crate::config::ChatMembers;
use async_trait::async_trait;
use dashmap::DashMap;
use events::UserId;

#[async_trait]
pub trait MembershipDirectory: Send + Sync {
    /// Participants of a conversation, or `None` if it does not exist.
    async fn conversation_members(&self, conversation_id: i64) -> Option<Vec<UserId>>;

    /// Members of a group, or `None` if it does not exist.
    async fn group_members(&self, group_id: i64) -> Option<Vec<UserId>>;
}

#[derive(Default)]
pub struct InMemoryDirectory {
    conversations: DashMap<i64, Vec<UserId>>,
    groups: DashMap<i64, Vec<UserId>>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds the directory from `--conversation-members` and `--group-members`.
    pub fn from_members(conversations: &[ChatMembers], groups: &[ChatMembers]) -> Self {
        let directory = Self::new();
        for ChatMembers { id, members } in conversations {
            directory.set_conversation_members(*id, members.clone());
        }
        for ChatMembers { id, members } in groups {
            directory.set_group_members(*id, members.clone());
        }
        directory
    }

    pub fn set_conversation_members(&self, conversation_id: i64, members: Vec<UserId>) {
        self.conversations.insert(conversation_id, members);
    }

    pub fn set_group_members(&self, group_id: i64, members: Vec<UserId>) {
        self.groups.insert(group_id, members);
    }

    pub fn remove_group(&self, group_id: i64) {
        self.groups.remove(&group_id);
    }

    pub fn is_empty(&self) -> bool {
        self.conversations.is_empty() && self.groups.is_empty()
    }
}

#[async_trait]
impl MembershipDirectory for InMemoryDirectory {
    async fn conversation_members(&self, conversation_id: i64) -> Option<Vec<UserId>> {
        self.conversations
            .get(&conversation_id)
            .map(|members| members.clone())
    }

    async fn group_members(&self, group_id: i64) -> Option<Vec<UserId>> {
        self.groups.get(&group_id).map(|members| members.clone())
    }
}
