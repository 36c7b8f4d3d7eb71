//! Session resolution. The real session store lives outside this service;
//! the realtime layer only needs a token to resolve to a stable user id.

use crate::config::SessionToken;
use async_trait::async_trait;
use dashmap::DashMap;
use events::UserId;

#[async_trait]
pub trait SessionResolver: Send + Sync {
    /// Resolve a session token to the authenticated user, if any.
    async fn resolve(&self, token: &str) -> Option<UserId>;
}

/// In-memory token table, seeded from `--session-tokens` in development.
#[derive(Default)]
pub struct StaticSessions {
    tokens: DashMap<String, UserId>,
}

impl StaticSessions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_tokens(tokens: &[SessionToken]) -> Self {
        let sessions = Self::new();
        for SessionToken { token, user_id } in tokens {
            sessions.insert(token.clone(), *user_id);
        }
        sessions
    }

    pub fn insert(&self, token: impl Into<String>, user_id: UserId) {
        self.tokens.insert(token.into(), user_id);
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

#[async_trait]
impl SessionResolver for StaticSessions {
    async fn resolve(&self, token: &str) -> Option<UserId> {
        self.tokens.get(token).map(|entry| *entry.value())
    }
}
