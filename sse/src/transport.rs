use crate::connection::Subscription;
use crate::message;
use crate::Broker;
use async_stream::stream;
use axum::response::sse::Event;
use events::{BoxError, ConnectedFrame, Envelope, Frame, UserId};
use futures::Stream;
use log::*;
use std::convert::Infallible;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

/// Server side of one streaming connection.
///
/// Created only after the caller has been authenticated. Owns the broker
/// subscription for its lifetime: when the transport is dropped (the client
/// aborted and the response stream was torn down) the subscription is removed
/// before the drop returns.
///
/// The broker's registry owns the listener that holds the channel sender, so
/// every open stream ends once the `Broker` itself is dropped. Keep the broker
/// (in practice the `AppState` behind the router) alive for as long as streams
/// should stay open.
pub struct StreamTransport {
    user_id: UserId,
    receiver: UnboundedReceiver<Frame>,
    subscription: Subscription,
}

impl StreamTransport {
    /// Open a transport for an authenticated user.
    ///
    /// The `connected` control frame is queued before the broker registration,
    /// so it is always the first frame the client sees.
    pub fn open(broker: &Broker, user_id: UserId) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();

        let connected = ConnectedFrame::new(user_id, chrono::Utc::now().timestamp_millis());
        if sender.send(Frame::Connected(connected)).is_err() {
            // Unreachable while we hold the receiver.
            warn!("Could not queue connected frame for user {user_id}");
        }

        let subscription = broker.subscribe(user_id, forward_to(user_id, sender));
        info!(
            "Opened SSE stream {} for user {}",
            subscription.id().as_str(),
            user_id
        );

        Self {
            user_id,
            receiver,
            subscription,
        }
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub fn subscription(&self) -> &Subscription {
        &self.subscription
    }

    /// Wait for the next queued frame.
    pub async fn next_frame(&mut self) -> Option<Frame> {
        self.receiver.recv().await
    }

    /// Take a queued frame without waiting.
    pub fn try_next_frame(&mut self) -> Option<Frame> {
        self.receiver.try_recv().ok()
    }

    /// Turn the transport into the body of an axum `Sse` response.
    ///
    /// The stream owns the transport, so dropping the response drops the
    /// broker subscription with it.
    pub fn into_sse_stream(mut self) -> impl Stream<Item = Result<Event, Infallible>> {
        stream! {
            while let Some(frame) = self.next_frame().await {
                if let Some(event) = message::to_sse_event(&frame) {
                    yield Ok(event);
                }
            }
        }
    }
}

impl Drop for StreamTransport {
    fn drop(&mut self) {
        self.subscription.unsubscribe();
        info!(
            "Closed SSE stream {} for user {}",
            self.subscription.id().as_str(),
            self.user_id
        );
    }
}

/// Adapter listener that enqueues envelopes for one connection. A closed
/// queue means the client is gone; that is routine and not reported upward.
fn forward_to(
    user_id: UserId,
    sender: UnboundedSender<Frame>,
) -> impl Fn(&Envelope) -> Result<(), BoxError> + Send + Sync + 'static {
    move |envelope: &Envelope| {
        if sender.send(Frame::Envelope(envelope.clone())).is_err() {
            debug!(
                "SSE connection for user {} is gone, dropping {} event",
                user_id,
                envelope.event_type()
            );
        }
        Ok(())
    }
}
