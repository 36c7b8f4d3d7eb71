use axum::response::sse::{Event, KeepAlive};
use events::Frame;
use log::*;
use std::time::Duration;

/// Text of the comment line sent between frames (`: heartbeat`).
pub const HEARTBEAT: &str = "heartbeat";

/// Default interval between keepalive comments.
pub const DEFAULT_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);

/// Serialize a frame into an unnamed SSE event, i.e. `data: <json>\n\n`.
///
/// No `event:` line is written so that browser `onmessage` handlers see every
/// frame; the envelope's own `type` field carries the kind.
pub fn to_sse_event(frame: &Frame) -> Option<Event> {
    match frame.to_json() {
        Ok(json) => Some(Event::default().data(json)),
        Err(e) => {
            error!("Failed to serialize SSE frame: {e}");
            None
        }
    }
}

/// Keepalive that writes a `: heartbeat` comment every `interval`.
///
/// The timer is polled as part of the response stream, so it stops as soon
/// as the stream is dropped after a failed write.
pub fn keep_alive(interval: Duration) -> KeepAlive {
    KeepAlive::new().interval(interval).text(HEARTBEAT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::response::sse::Sse;
    use axum::response::IntoResponse;
    use events::{ConnectedFrame, Envelope, Event as Payload};
    use futures::stream;
    use std::convert::Infallible;

    async fn render(frame: &Frame) -> String {
        let event = to_sse_event(frame).unwrap();
        let body = Sse::new(stream::iter(vec![Ok::<_, Infallible>(event)]))
            .into_response()
            .into_body();
        let bytes = axum::body::to_bytes(body, usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn frames_are_written_as_a_single_unnamed_data_line() {
        let connected = render(&Frame::Connected(ConnectedFrame::new(5, 1_700_000_000_000))).await;
        assert_eq!(
            connected,
            "data: {\"type\":\"connected\",\"userId\":5,\"timestamp\":1700000000000}\n\n"
        );

        let envelope = render(&Frame::Envelope(Envelope::new(
            5,
            Payload::GroupDeleted { group_id: 8 },
        )))
        .await;
        assert!(!envelope.contains("event:"));
        assert_eq!(
            envelope,
            "data: {\"userId\":5,\"type\":\"group_deleted\",\"data\":{\"groupId\":8}}\n\n"
        );
    }
}
