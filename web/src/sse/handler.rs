use crate::extractors::authenticated_user::AuthenticatedUser;
use axum::extract::State;
use axum::http::HeaderName;
use axum::response::sse::{Event, Sse};
use axum::response::IntoResponse;
use futures::Stream;
use log::*;
use service::AppState;
use ::sse::{message, StreamTransport};
use std::convert::Infallible;

/// Tells nginx-style proxies not to buffer the stream.
const X_ACCEL_BUFFERING: HeaderName = HeaderName::from_static("x-accel-buffering");

/// SSE handler that establishes a long-lived connection for real-time updates.
/// One connection per tab or device; each gets its own broker subscription.
///
/// Authentication happens in the extractor, so an unauthenticated caller gets
/// a 401 and no stream is ever opened.
pub(crate) async fn sse_handler(
    AuthenticatedUser(user_id): AuthenticatedUser,
    State(app_state): State<AppState>,
) -> impl IntoResponse {
    debug!("Establishing SSE connection for user {user_id}");

    let transport = StreamTransport::open(app_state.broker_ref(), user_id);

    (
        [(X_ACCEL_BUFFERING, "no")],
        sse_response(transport, &app_state),
    )
}

fn sse_response(
    transport: StreamTransport,
    app_state: &AppState,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    Sse::new(transport.into_sse_stream())
        .keep_alive(message::keep_alive(app_state.config.sse_keepalive_interval()))
}
