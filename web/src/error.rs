use std::error::Error as StdError;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

pub type Result<T> = core::result::Result<T, Error>;

/// Web layer error. Holds the kind used to pick the HTTP status and the
/// optional underlying error for logging.
#[derive(Debug)]
pub struct Error {
    pub source: Option<Box<dyn StdError + Send + Sync>>,
    pub error_kind: ErrorKind,
}

#[derive(Debug, PartialEq)]
pub enum ErrorKind {
    /// No session, or the session token did not resolve to a user.
    Unauthorized,
    /// Authenticated, but not a participant of the addressed chat.
    Forbidden,
    NotFound,
    Internal,
}

impl Error {
    pub fn new(error_kind: ErrorKind) -> Self {
        Self {
            source: None,
            error_kind,
        }
    }

    pub fn unauthorized() -> Self {
        Self::new(ErrorKind::Unauthorized)
    }

    pub fn forbidden() -> Self {
        Self::new(ErrorKind::Forbidden)
    }

    pub fn not_found() -> Self {
        Self::new(ErrorKind::NotFound)
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn StdError + 'static))
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> core::result::Result<(), std::fmt::Error> {
        write!(fmt, "Web Error: {:?}", self.error_kind)
    }
}

// List of possible StatusCode variants https://docs.rs/http/latest/http/status/struct.StatusCode.html
impl IntoResponse for Error {
    fn into_response(self) -> Response {
        match self.error_kind {
            ErrorKind::Unauthorized => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED").into_response(),
            ErrorKind::Forbidden => (StatusCode::FORBIDDEN, "FORBIDDEN").into_response(),
            ErrorKind::NotFound => (StatusCode::NOT_FOUND, "NOT FOUND").into_response(),
            ErrorKind::Internal => {
                log::error!("Internal error: {:?}", self.source);
                (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL SERVER ERROR").into_response()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_kinds_map_to_status_codes() {
        let cases = [
            (Error::unauthorized(), StatusCode::UNAUTHORIZED),
            (Error::forbidden(), StatusCode::FORBIDDEN),
            (Error::not_found(), StatusCode::NOT_FOUND),
            (Error::new(ErrorKind::Internal), StatusCode::INTERNAL_SERVER_ERROR),
        ];

        for (error, status) in cases {
            assert_eq!(error.into_response().status(), status);
        }
    }
}
