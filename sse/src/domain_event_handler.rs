use crate::Broker;
use async_trait::async_trait;
use events::{DomainEvent, EventHandler};
use log::*;
use std::sync::Arc;

/// Handles domain events by fanning them out through the broker to the
/// users listed in the event.
///
/// The producer decides who is notified. This handler only routes, and only
/// ever runs after the producer's commit succeeded, so a delivery problem can
/// never affect the committed change.
pub struct SseDomainEventHandler {
    broker: Arc<Broker>,
}

impl SseDomainEventHandler {
    pub fn new(broker: Arc<Broker>) -> Self {
        Self { broker }
    }
}

#[async_trait]
impl EventHandler for SseDomainEventHandler {
    async fn handle(&self, event: &DomainEvent) {
        let user_ids = event.notify_user_ids();
        let sse_event = event.to_event();
        let event_type = sse_event.event_type();

        let delivered = self.broker.publish_to_many(user_ids, sse_event);

        debug!(
            "Sent {} event to {} user(s) {:?}, {} live connection(s)",
            event_type,
            user_ids.len(),
            user_ids,
            delivered
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use events::{ChatTarget, EventPublisher, Frame};
    use serde_json::json;

    #[tokio::test]
    async fn published_domain_event_reaches_recipients_streams() {
        let broker = Arc::new(Broker::new());
        let publisher =
            EventPublisher::new().with_handler(Arc::new(SseDomainEventHandler::new(broker.clone())));

        let mut recipient = crate::StreamTransport::open(&broker, 2);
        let mut author = crate::StreamTransport::open(&broker, 1);

        publisher
            .publish(DomainEvent::MessageCreated {
                target: ChatTarget::Conversation(3),
                message: json!({"id": 50, "senderId": 1}),
                notify_user_ids: vec![2],
            })
            .await;

        assert!(matches!(recipient.try_next_frame(), Some(Frame::Connected(_))));
        match recipient.try_next_frame() {
            Some(Frame::Envelope(envelope)) => {
                assert_eq!(envelope.user_id, 2);
                assert_eq!(
                    serde_json::to_value(&envelope).unwrap()["data"]["conversationId"],
                    json!(3)
                );
            }
            other => panic!("expected message envelope, got {other:?}"),
        }

        assert!(matches!(author.try_next_frame(), Some(Frame::Connected(_))));
        assert!(author.try_next_frame().is_none());
    }
}
