use dashmap::DashMap;
use events::{BoxError, Envelope, UserId};
use log::*;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

/// A fan-out callback. Invoked synchronously on the publisher's task, so it
/// must only hand the envelope off (enqueue), never perform I/O itself.
pub type Listener = Arc<dyn Fn(&Envelope) -> Result<(), BoxError> + Send + Sync>;

/// Unique identifier for a subscription (server-generated)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionId(String);

impl SubscriptionId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SubscriptionId {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-user listener registry.
///
/// Each user's listener set lives in its own DashMap shard entry, so
/// registrations and deliveries for unrelated users never contend on a
/// global lock.
pub struct ListenerRegistry {
    user_index: DashMap<UserId, HashMap<SubscriptionId, Listener>>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self {
            user_index: DashMap::new(),
        }
    }

    /// Register a listener for `user_id` - O(1)
    pub fn register(&self, user_id: UserId, listener: Listener) -> SubscriptionId {
        let subscription_id = SubscriptionId::new();

        self.user_index
            .entry(user_id)
            .or_default()
            .insert(subscription_id.clone(), listener);

        subscription_id
    }

    /// Unregister a listener - O(1). Returns whether it was still registered.
    pub fn unregister(&self, user_id: UserId, subscription_id: &SubscriptionId) -> bool {
        let removed = match self.user_index.get_mut(&user_id) {
            Some(mut entry) => entry.remove(subscription_id).is_some(),
            None => false,
        };

        // Clean up empty user entries. `remove_if` re-checks under the shard
        // lock, so a concurrent register for the same user is never lost.
        if removed {
            self.user_index.remove_if(&user_id, |_, listeners| listeners.is_empty());
        }

        removed
    }

    /// Snapshot of the listeners currently registered for `user_id`.
    /// The shard lock is released before the caller invokes any of them.
    pub fn listeners_for(&self, user_id: UserId) -> Vec<(SubscriptionId, Listener)> {
        match self.user_index.get(&user_id) {
            Some(entry) => entry
                .iter()
                .map(|(id, listener)| (id.clone(), Arc::clone(listener)))
                .collect(),
            None => Vec::new(),
        }
    }

    pub fn subscriber_count(&self, user_id: UserId) -> usize {
        self.user_index
            .get(&user_id)
            .map(|entry| entry.len())
            .unwrap_or(0)
    }

    pub fn connected_users(&self) -> usize {
        self.user_index.len()
    }

    pub fn total_subscriptions(&self) -> usize {
        self.user_index.iter().map(|entry| entry.len()).sum()
    }
}

impl Default for ListenerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Capability to remove exactly one registered listener.
///
/// `unsubscribe` is idempotent, and dropping the handle unsubscribes too, so
/// a connection that goes away can never leave its listener behind.
#[must_use = "dropping a Subscription immediately unsubscribes its listener"]
pub struct Subscription {
    registry: Weak<ListenerRegistry>,
    user_id: UserId,
    id: SubscriptionId,
    active: AtomicBool,
}

impl Subscription {
    pub(crate) fn new(registry: &Arc<ListenerRegistry>, user_id: UserId, id: SubscriptionId) -> Self {
        Self {
            registry: Arc::downgrade(registry),
            user_id,
            id,
            active: AtomicBool::new(true),
        }
    }

    pub fn unsubscribe(&self) {
        if !self.active.swap(false, Ordering::SeqCst) {
            return;
        }

        if let Some(registry) = self.registry.upgrade() {
            if registry.unregister(self.user_id, &self.id) {
                trace!(
                    "Removed subscription {} for user {}",
                    self.id.as_str(),
                    self.user_id
                );
            }
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub fn id(&self) -> &SubscriptionId {
        &self.id
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("user_id", &self.user_id)
            .field("id", &self.id)
            .field("active", &self.is_active())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop() -> Listener {
        Arc::new(|_: &Envelope| Ok(()))
    }

    #[test]
    fn unregister_last_listener_frees_user_entry() {
        let registry = ListenerRegistry::new();
        let first = registry.register(1, noop());
        let second = registry.register(1, noop());
        assert_eq!(registry.subscriber_count(1), 2);

        assert!(registry.unregister(1, &first));
        assert_eq!(registry.connected_users(), 1);

        assert!(registry.unregister(1, &second));
        assert_eq!(registry.connected_users(), 0);
        assert_eq!(registry.total_subscriptions(), 0);
    }

    #[test]
    fn unregister_unknown_subscription_is_a_noop() {
        let registry = ListenerRegistry::new();
        registry.register(1, noop());

        assert!(!registry.unregister(1, &SubscriptionId::new()));
        assert!(!registry.unregister(2, &SubscriptionId::new()));
        assert_eq!(registry.subscriber_count(1), 1);
    }

    #[test]
    fn subscription_unsubscribe_is_idempotent() {
        let registry = Arc::new(ListenerRegistry::new());
        let keep = registry.register(4, noop());
        let id = registry.register(4, noop());
        let subscription = Subscription::new(&registry, 4, id);

        subscription.unsubscribe();
        subscription.unsubscribe();

        assert!(!subscription.is_active());
        assert_eq!(registry.subscriber_count(4), 1);
        assert_eq!(registry.listeners_for(4)[0].0, keep);
    }

    #[test]
    fn dropping_subscription_unsubscribes() {
        let registry = Arc::new(ListenerRegistry::new());
        let id = registry.register(4, noop());
        drop(Subscription::new(&registry, 4, id));

        assert_eq!(registry.subscriber_count(4), 0);
    }

    #[test]
    fn subscription_outliving_registry_does_not_panic() {
        let registry = Arc::new(ListenerRegistry::new());
        let id = registry.register(4, noop());
        let subscription = Subscription::new(&registry, 4, id);
        drop(registry);

        subscription.unsubscribe();
        assert!(!subscription.is_active());
    }
}
