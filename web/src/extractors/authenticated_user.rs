use crate::{AppState, Error};
use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{
        header::{AUTHORIZATION, COOKIE},
        request::Parts,
    },
};
use events::UserId;
use log::*;

/// Name of the cookie carrying the session token.
pub(crate) const SESSION_COOKIE: &str = "id";

pub(crate) struct AuthenticatedUser(pub UserId);

#[async_trait]
impl FromRequestParts<AppState> for AuthenticatedUser {
    type Rejection = Error;

    // Resolves the caller through the session collaborator. The token comes from the
    // session cookie or, for non-browser clients, an `Authorization: Bearer` header.
    // Anything else is rejected with 401 before a handler (or a stream) is started.
    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let Some(token) = session_token(parts) else {
            trace!("Request without session token");
            return Err(Error::unauthorized());
        };

        match state.sessions.resolve(&token).await {
            Some(user_id) => Ok(AuthenticatedUser(user_id)),
            None => {
                debug!("Session token did not resolve to a user");
                Err(Error::unauthorized())
            }
        }
    }
}

fn session_token(parts: &Parts) -> Option<String> {
    let bearer = parts
        .headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty());

    if let Some(token) = bearer {
        return Some(token.to_string());
    }

    parts
        .headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|cookies| cookies.split(';'))
        .filter_map(|cookie| cookie.trim().split_once('='))
        .find(|(name, value)| *name == SESSION_COOKIE && !value.is_empty())
        .map(|(_, value)| value.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    fn parts(header: (&str, &str)) -> Parts {
        Request::builder()
            .uri("/events")
            .header(header.0, header.1)
            .body(())
            .unwrap()
            .into_parts()
            .0
    }

    #[test]
    fn token_is_read_from_session_cookie() {
        let parts = parts(("cookie", "theme=dark; id=abc123; other=1"));
        assert_eq!(session_token(&parts), Some("abc123".to_string()));
    }

    #[test]
    fn bearer_header_takes_precedence() {
        let parts = parts(("authorization", "Bearer xyz"));
        assert_eq!(session_token(&parts), Some("xyz".to_string()));
    }

    #[test]
    fn missing_or_empty_tokens_are_none() {
        assert_eq!(session_token(&parts(("cookie", "id="))), None);
        assert_eq!(session_token(&parts(("authorization", "Basic abc"))), None);
    }
}
