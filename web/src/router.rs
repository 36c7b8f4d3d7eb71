use crate::{
    controller::{health_check_controller, typing_controller},
    params, AppState,
};
use axum::{
    http::{
        header::{AUTHORIZATION, CONTENT_TYPE},
        HeaderValue, Method,
    },
    routing::{get, post},
    Json, Router,
};
use log::*;
use service::config::Config;
use tower_http::cors::CorsLayer;

use crate::sse::handler as sse_handler;

use utoipa::{
    openapi::security::{ApiKey, ApiKeyValue, SecurityScheme},
    Modify, OpenApi,
};

// This is the global definition of our OpenAPI spec. To be a part
// of the rendered spec, a path and schema must be listed here.
#[derive(OpenApi)]
#[openapi(
        info(
            title = "Social Realtime API"
        ),
        paths(
            health_check_controller::health_check,
            typing_controller::conversation_typing,
            typing_controller::group_typing,
        ),
        components(
            schemas(
                health_check_controller::HealthStatus,
                params::typing::TypingParams,
            )
        ),
        modifiers(&SecurityAddon),
        tags(
            (name = "social_realtime", description = "Realtime event delivery API")
        )
    )]
struct ApiDoc;

struct SecurityAddon;

// Defines our cookie session based authentication requirement for gaining access to our
// API endpoints for OpenAPI.
impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "cookie_auth",
                SecurityScheme::ApiKey(ApiKey::Cookie(ApiKeyValue::with_description(
                    "id",
                    "Session token resolved by the session service",
                ))),
            )
        }
    }
}

pub fn define_routes(app_state: AppState) -> Router {
    let cors = cors_layer(&app_state.config);

    Router::new()
        .merge(health_routes(app_state.clone()))
        .merge(sse_routes(app_state.clone()))
        .merge(typing_routes(app_state))
        .route("/api-docs/openapi.json", get(|| async { Json(ApiDoc::openapi()) }))
        .layer(cors)
}

fn health_routes(app_state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check_controller::health_check))
        .with_state(app_state)
}

/// The event stream. Authentication is enforced by the handler's extractor.
fn sse_routes(app_state: AppState) -> Router {
    Router::new()
        .route("/events", get(sse_handler::sse_handler))
        .with_state(app_state)
}

/// Producer endpoints for ephemeral typing indicators
fn typing_routes(app_state: AppState) -> Router {
    Router::new()
        .route(
            "/conversations/:id/typing",
            post(typing_controller::conversation_typing),
        )
        .route("/groups/:id/typing", post(typing_controller::group_typing))
        .with_state(app_state)
}

// Credentials are allowed so the session cookie reaches the event stream, which
// rules out a wildcard origin.
fn cors_layer(config: &Config) -> CorsLayer {
    let origins: Vec<HeaderValue> = config
        .allowed_origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(e) => {
                warn!("Ignoring invalid CORS origin {origin:?}: {e}");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_credentials(true)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([AUTHORIZATION, CONTENT_TYPE])
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use events::Event;
    use futures::StreamExt;
    use serde_json::{json, Value};
    use service::directory::InMemoryDirectory;
    use service::session::StaticSessions;
    use std::sync::Arc;
    use tower::ServiceExt;

    fn test_state() -> (AppState, Arc<InMemoryDirectory>) {
        let sessions = StaticSessions::new();
        sessions.insert("alice-token", 5);
        sessions.insert("bob-token", 6);
        sessions.insert("carol-token", 7);
        let directory = Arc::new(InMemoryDirectory::new());
        directory.set_conversation_members(3, vec![5, 6]);
        directory.set_group_members(8, vec![5, 6, 7]);

        let state = AppState::new(Config::default(), Arc::new(sessions), directory.clone());
        (state, directory)
    }

    fn events_request(cookie: &str) -> Request<Body> {
        Request::builder()
            .uri("/events")
            .header("cookie", cookie)
            .body(Body::empty())
            .unwrap()
    }

    /// Reads the body until one complete SSE frame is buffered and returns its JSON payload.
    async fn next_data_frame(body: &mut axum::body::BodyDataStream) -> Value {
        let mut buffer = String::new();
        loop {
            if let Some(end) = buffer.find("\n\n") {
                let frame = &buffer[..end];
                if let Some(data) = frame.strip_prefix("data: ") {
                    return serde_json::from_str(data).unwrap();
                }
                // Comment-only frame (keepalive), skip it.
                buffer.drain(..end + 2);
                continue;
            }
            let chunk = body.next().await.expect("stream ended").unwrap();
            buffer.push_str(std::str::from_utf8(&chunk).unwrap());
        }
    }

    #[tokio::test]
    async fn events_without_session_is_unauthorized() {
        let (state, _) = test_state();
        let app = define_routes(state.clone());

        let request = Request::builder().uri("/events").body(Body::empty()).unwrap();
        let response = app.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(state.broker.total_subscriptions(), 0);
    }

    #[tokio::test]
    async fn events_with_unknown_token_is_unauthorized() {
        let (state, _) = test_state();
        let response = define_routes(state)
            .oneshot(events_request("id=nope"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn stream_starts_with_connected_frame_then_delivers_envelopes() {
        let (state, _) = test_state();
        let response = define_routes(state.clone())
            .oneshot(events_request("id=alice-token"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()["content-type"],
            HeaderValue::from_static("text/event-stream")
        );
        assert_eq!(state.broker.subscriber_count(5), 1);

        let mut body = response.into_body().into_data_stream();
        let connected = next_data_frame(&mut body).await;
        assert_eq!(connected["type"], json!("connected"));
        assert_eq!(connected["userId"], json!(5));
        assert!(connected["timestamp"].is_i64());

        state
            .broker
            .publish(5, Event::ConversationDeleted { conversation_id: 3 });

        let envelope = next_data_frame(&mut body).await;
        assert_eq!(
            envelope,
            json!({"userId": 5, "type": "conversation_deleted", "data": {"conversationId": 3}})
        );

        // Client abort: the body is dropped and the subscription goes with it.
        drop(body);
        assert_eq!(state.broker.subscriber_count(5), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn idle_stream_sends_heartbeat_comments() {
        let sessions = StaticSessions::new();
        sessions.insert("alice-token", 5);
        let mut config = Config::default();
        config.sse_keepalive_secs = 1;
        // The router's state keeps the broker, and with it the stream, alive.
        let state = AppState::new(
            config,
            Arc::new(sessions),
            Arc::new(InMemoryDirectory::new()),
        );

        let response = define_routes(state.clone())
            .oneshot(events_request("id=alice-token"))
            .await
            .unwrap();
        let mut body = response.into_body().into_data_stream();

        let mut received = String::new();
        while !received.contains(": heartbeat\n\n") {
            let chunk = body.next().await.expect("stream ended").unwrap();
            received.push_str(std::str::from_utf8(&chunk).unwrap());
        }

        assert!(received.starts_with("data: {\"type\":\"connected\""));
        let connected_end = received.find("\n\n").unwrap();
        assert_eq!(&received[connected_end + 2..], ": heartbeat\n\n");
        assert_eq!(state.broker.subscriber_count(5), 1);
    }

    #[tokio::test]
    async fn typing_is_announced_to_other_participants_only() {
        let (state, _) = test_state();
        let app = define_routes(state.clone());

        let bob = app
            .clone()
            .oneshot(events_request("id=bob-token"))
            .await
            .unwrap();
        let alice = app
            .clone()
            .oneshot(events_request("id=alice-token"))
            .await
            .unwrap();
        let mut bob_body = bob.into_body().into_data_stream();
        let mut alice_body = alice.into_body().into_data_stream();
        next_data_frame(&mut bob_body).await;
        next_data_frame(&mut alice_body).await;

        let request = Request::builder()
            .method("POST")
            .uri("/conversations/3/typing")
            .header("authorization", "Bearer alice-token")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"isTyping":true}"#))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let typing = next_data_frame(&mut bob_body).await;
        assert_eq!(
            typing,
            json!({
                "userId": 6,
                "type": "typing",
                "data": {"conversationId": 3, "userId": 5, "isTyping": true}
            })
        );

        // The author's own stream got nothing beyond its connected frame.
        state
            .broker
            .publish(5, Event::GroupDeleted { group_id: 1 });
        let next_for_alice = next_data_frame(&mut alice_body).await;
        assert_eq!(next_for_alice["type"], json!("group_deleted"));
    }

    #[tokio::test]
    async fn typing_by_non_member_is_forbidden() {
        let (state, _) = test_state();
        let request = Request::builder()
            .method("POST")
            .uri("/conversations/3/typing")
            .header("cookie", "id=carol-token")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"isTyping":true}"#))
            .unwrap();

        let response = define_routes(state).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn typing_in_unknown_group_is_not_found() {
        let (state, directory) = test_state();
        directory.remove_group(8);
        let request = Request::builder()
            .method("POST")
            .uri("/groups/8/typing")
            .header("cookie", "id=carol-token")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"isTyping":false}"#))
            .unwrap();

        let response = define_routes(state).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn health_reports_broker_snapshot() {
        let (state, _) = test_state();
        let _tab = state.broker.subscribe(9, |_| Ok(()));

        let request = Request::builder().uri("/health").body(Body::empty()).unwrap();
        let response = define_routes(state).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["status_code"], json!(200));
        assert_eq!(value["data"]["connected_users"], json!(1));
        assert_eq!(value["data"]["subscriptions"], json!(1));
    }

    #[test]
    fn openapi_lists_realtime_paths() {
        let doc = ApiDoc::openapi();
        assert!(doc.paths.paths.contains_key("/health"));
        assert!(doc.paths.paths.contains_key("/conversations/{id}/typing"));
        assert!(doc.paths.paths.contains_key("/groups/{id}/typing"));
    }
}
