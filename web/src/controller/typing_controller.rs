use crate::extractors::authenticated_user::AuthenticatedUser;
use crate::params::typing::TypingParams;
use crate::{AppState, Error};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use events::{recipients, ChatTarget, DomainEvent, UserId};

use log::*;

/// POST announce that the caller started or stopped typing in a conversation
#[utoipa::path(
    post,
    path = "/conversations/{id}/typing",
    params(
        ("id" = i64, Path, description = "Conversation id the caller is typing in")
    ),
    request_body = TypingParams,
    responses(
        (status = 204, description = "Typing state announced to the other participants"),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Caller is not a participant"),
        (status = 404, description = "Conversation not found")
    ),
    security(
        ("cookie_auth" = [])
    )
)]
pub async fn conversation_typing(
    AuthenticatedUser(user_id): AuthenticatedUser,
    State(app_state): State<AppState>,
    Path(conversation_id): Path<i64>,
    Json(params): Json<TypingParams>,
) -> Result<impl IntoResponse, Error> {
    debug!("POST typing={} by user {user_id} in conversation {conversation_id}", params.is_typing);

    let members = app_state
        .directory
        .conversation_members(conversation_id)
        .await
        .ok_or_else(Error::not_found)?;

    announce(
        &app_state,
        ChatTarget::Conversation(conversation_id),
        user_id,
        members,
        params.is_typing,
    )
    .await
}

/// POST announce that the caller started or stopped typing in a group
#[utoipa::path(
    post,
    path = "/groups/{id}/typing",
    params(
        ("id" = i64, Path, description = "Group id the caller is typing in")
    ),
    request_body = TypingParams,
    responses(
        (status = 204, description = "Typing state announced to the other members"),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Caller is not a member"),
        (status = 404, description = "Group not found")
    ),
    security(
        ("cookie_auth" = [])
    )
)]
pub async fn group_typing(
    AuthenticatedUser(user_id): AuthenticatedUser,
    State(app_state): State<AppState>,
    Path(group_id): Path<i64>,
    Json(params): Json<TypingParams>,
) -> Result<impl IntoResponse, Error> {
    debug!("POST typing={} by user {user_id} in group {group_id}", params.is_typing);

    let members = app_state
        .directory
        .group_members(group_id)
        .await
        .ok_or_else(Error::not_found)?;

    announce(
        &app_state,
        ChatTarget::Group(group_id),
        user_id,
        members,
        params.is_typing,
    )
    .await
}

// Recipients are computed here from the directory, never taken from the request.
async fn announce(
    app_state: &AppState,
    target: ChatTarget,
    user_id: UserId,
    members: Vec<UserId>,
    is_typing: bool,
) -> Result<StatusCode, Error> {
    if !members.contains(&user_id) {
        warn!("User {user_id} is not a participant of {target:?}");
        return Err(Error::forbidden());
    }

    let notify_user_ids = recipients::others(members, user_id);

    app_state
        .event_publisher
        .publish(DomainEvent::TypingChanged {
            target,
            user_id,
            is_typing,
            notify_user_ids,
        })
        .await;

    Ok(StatusCode::NO_CONTENT)
}
