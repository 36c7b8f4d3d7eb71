use crate::connection::{Listener, ListenerRegistry, Subscription};
use events::{BoxError, Envelope, Event, UserId};
use log::*;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

/// Process-wide publish/subscribe broker.
///
/// Constructed once at startup and shared through `AppState`. Delivery is
/// best-effort and at-most-once: an envelope published for a user with no
/// live subscriptions is dropped.
pub struct Broker {
    registry: Arc<ListenerRegistry>,
}

impl Broker {
    pub fn new() -> Self {
        Self {
            registry: Arc::new(ListenerRegistry::new()),
        }
    }

    /// Register `listener` for every future envelope addressed to `user_id`.
    pub fn subscribe<F>(&self, user_id: UserId, listener: F) -> Subscription
    where
        F: Fn(&Envelope) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        let listener: Listener = Arc::new(listener);
        let subscription_id = self.registry.register(user_id, listener);
        debug!(
            "Registered subscription {} for user {}",
            subscription_id.as_str(),
            user_id
        );
        Subscription::new(&self.registry, user_id, subscription_id)
    }

    /// Deliver `event` to every live listener of `user_id`.
    ///
    /// Listeners run synchronously in no particular order. A listener that
    /// errors or panics is logged and skipped. Returns how many listeners
    /// accepted the envelope.
    pub fn publish(&self, user_id: UserId, event: Event) -> usize {
        let envelope = Envelope::new(user_id, event);
        let listeners = self.registry.listeners_for(user_id);

        if listeners.is_empty() {
            trace!(
                "No live subscriptions for user {}, dropping {} event",
                user_id,
                envelope.event_type()
            );
            return 0;
        }

        let mut delivered = 0;
        for (subscription_id, listener) in listeners {
            match panic::catch_unwind(AssertUnwindSafe(|| listener(&envelope))) {
                Ok(Ok(())) => delivered += 1,
                Ok(Err(e)) => warn!(
                    "Listener {} for user {} failed on {} event: {}",
                    subscription_id.as_str(),
                    user_id,
                    envelope.event_type(),
                    e
                ),
                Err(_) => error!(
                    "Listener {} for user {} panicked on {} event",
                    subscription_id.as_str(),
                    user_id,
                    envelope.event_type()
                ),
            }
        }

        delivered
    }

    /// `publish` once per recipient. No atomicity across recipients.
    pub fn publish_to_many(&self, user_ids: &[UserId], event: Event) -> usize {
        user_ids
            .iter()
            .map(|user_id| self.publish(*user_id, event.clone()))
            .sum()
    }

    pub fn subscriber_count(&self, user_id: UserId) -> usize {
        self.registry.subscriber_count(user_id)
    }

    pub fn connected_users(&self) -> usize {
        self.registry.connected_users()
    }

    pub fn total_subscriptions(&self) -> usize {
        self.registry.total_subscriptions()
    }
}

impl Default for Broker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use events::EventType;
    use serde_json::json;
    use std::sync::Mutex;

    type Inbox = Arc<Mutex<Vec<Envelope>>>;

    fn recorder(broker: &Broker, user_id: UserId) -> (Subscription, Inbox) {
        let inbox: Inbox = Arc::new(Mutex::new(Vec::new()));
        let sink = inbox.clone();
        let subscription = broker.subscribe(user_id, move |envelope| {
            sink.lock().unwrap().push(envelope.clone());
            Ok(())
        });
        (subscription, inbox)
    }

    fn message_event() -> Event {
        Event::Message {
            conversation_id: Some(3),
            group_id: None,
            message: json!({"id": 100, "content": "hello"}),
        }
    }

    #[test]
    fn publish_reaches_each_listener_exactly_once() {
        let broker = Broker::new();
        let (_a, inbox_a) = recorder(&broker, 1);
        let (_b, inbox_b) = recorder(&broker, 1);
        let (_c, inbox_c) = recorder(&broker, 1);

        let delivered = broker.publish(1, message_event());

        assert_eq!(delivered, 3);
        for inbox in [inbox_a, inbox_b, inbox_c] {
            let received = inbox.lock().unwrap();
            assert_eq!(received.len(), 1);
            assert_eq!(received[0].user_id, 1);
            assert_eq!(received[0].event, message_event());
        }
    }

    #[test]
    fn publish_without_subscribers_is_a_noop() {
        let broker = Broker::new();
        assert_eq!(broker.publish(42, message_event()), 0);
        assert_eq!(broker.connected_users(), 0);
    }

    #[test]
    fn failing_listeners_do_not_block_the_rest() {
        let broker = Broker::new();
        let _erroring = broker.subscribe(1, |_| Err("socket buffer full".into()));
        let _panicking = broker.subscribe(1, |_| panic!("listener bug"));
        let (_ok, inbox) = recorder(&broker, 1);

        let delivered = broker.publish(1, message_event());

        assert_eq!(delivered, 1);
        assert_eq!(inbox.lock().unwrap().len(), 1);
    }

    #[test]
    fn unsubscribe_twice_removes_only_that_listener() {
        let broker = Broker::new();
        let (first, first_inbox) = recorder(&broker, 1);
        let (_second, second_inbox) = recorder(&broker, 1);

        first.unsubscribe();
        first.unsubscribe();
        assert_eq!(broker.subscriber_count(1), 1);

        broker.publish(1, message_event());
        assert!(first_inbox.lock().unwrap().is_empty());
        assert_eq!(second_inbox.lock().unwrap().len(), 1);
    }

    #[test]
    fn removing_last_listener_frees_the_user_entry() {
        let broker = Broker::new();
        let (subscription, _) = recorder(&broker, 8);
        assert_eq!(broker.connected_users(), 1);

        drop(subscription);
        assert_eq!(broker.connected_users(), 0);
        assert_eq!(broker.total_subscriptions(), 0);
    }

    #[test]
    fn publish_never_leaks_to_other_users() {
        let broker = Broker::new();
        let (_a, inbox_a) = recorder(&broker, 1);
        let (_b, inbox_b) = recorder(&broker, 2);

        broker.publish(1, Event::GroupDeleted { group_id: 5 });

        assert_eq!(inbox_a.lock().unwrap().len(), 1);
        assert!(inbox_b.lock().unwrap().is_empty());
    }

    #[test]
    fn publish_to_many_reaches_two_tabs_and_skips_offline_user() {
        let broker = Broker::new();
        let (_tab1, inbox1) = recorder(&broker, 7);
        let (_tab2, inbox2) = recorder(&broker, 7);

        let delivered = broker.publish_to_many(&[7, 9], message_event());

        assert_eq!(delivered, 2);
        for inbox in [inbox1, inbox2] {
            let received = inbox.lock().unwrap();
            assert_eq!(received.len(), 1);
            assert_eq!(received[0].user_id, 7);
            assert_eq!(received[0].event_type(), EventType::Message);
        }
        assert_eq!(broker.subscriber_count(9), 0);
    }

    #[test]
    fn listener_may_touch_the_broker_while_being_invoked() {
        let broker = Arc::new(Broker::new());
        let nested: Arc<Mutex<Vec<Subscription>>> = Arc::new(Mutex::new(Vec::new()));

        let inner_broker = broker.clone();
        let inner_nested = nested.clone();
        let _subscription = broker.subscribe(3, move |_| {
            // Registering under the same user must not deadlock on its shard.
            let subscription = inner_broker.subscribe(3, |_| Ok(()));
            inner_nested.lock().unwrap().push(subscription);
            Ok(())
        });

        assert_eq!(broker.publish(3, Event::ConversationDeleted { conversation_id: 1 }), 1);
        assert_eq!(broker.subscriber_count(3), 2);
    }

    #[test]
    fn concurrent_subscribe_publish_and_unsubscribe() {
        let broker = Arc::new(Broker::new());
        let (_steady, steady_inbox) = recorder(&broker, 0);

        std::thread::scope(|scope| {
            for user_id in 1..=8 {
                let broker = broker.clone();
                scope.spawn(move || {
                    for _ in 0..200 {
                        let subscription = broker.subscribe(user_id, |_| Ok(()));
                        broker.publish(user_id, Event::GroupDeleted { group_id: 1 });
                        broker.publish(0, Event::GroupDeleted { group_id: 1 });
                        subscription.unsubscribe();
                    }
                });
            }
        });

        assert_eq!(steady_inbox.lock().unwrap().len(), 8 * 200);
        assert_eq!(broker.connected_users(), 1);
        assert_eq!(broker.total_subscriptions(), 1);
    }
}
