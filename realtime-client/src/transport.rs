use crate::error::{Error, ErrorKind, Result};
use eventsource_client::{self as es, Client};
use futures_util::stream::{self, BoxStream, StreamExt};
use std::fmt;

/// One item read from an open event stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The `data` payload of one frame.
    Message(String),
    /// A comment line, e.g. the server's `: heartbeat`.
    Comment(String),
}

/// The stream broke or could not be opened. Always recoverable by reopening.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportError {
    message: String,
}

impl TransportError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "transport error: {}", self.message)
    }
}

impl std::error::Error for TransportError {}

pub type TransportStream = BoxStream<'static, core::result::Result<TransportEvent, TransportError>>;

/// Opens event streams for `RealtimeClient`.
///
/// Each call to `open` is one physical connection. The stream ends (or yields
/// an error) when that connection is gone; reconnection is the caller's job.
pub trait Transport: Send + Sync {
    fn open(&self) -> TransportStream;
}

/// `Transport` over `eventsource-client`, pointed at the server's `/events`.
///
/// The library's own reconnect is turned off so the client's backoff policy is
/// the only one in play.
#[derive(Debug, Clone)]
pub struct EventSourceTransport {
    url: String,
    headers: Vec<(String, String)>,
}

impl EventSourceTransport {
    pub fn new(base_url: &str) -> Result<Self> {
        let transport = Self {
            url: format!("{}/events", base_url.trim_end_matches('/')),
            headers: Vec::new(),
        };
        transport.builder()?;
        Ok(transport)
    }

    /// Authenticate with the `id` session cookie.
    pub fn with_session_cookie(self, token: &str) -> Result<Self> {
        self.with_header("Cookie", format!("id={token}"))
    }

    /// Authenticate with an `Authorization: Bearer` header.
    pub fn with_bearer_token(self, token: &str) -> Result<Self> {
        self.with_header("Authorization", format!("Bearer {token}"))
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn with_header(mut self, name: &str, value: String) -> Result<Self> {
        self.headers.push((name.to_string(), value));
        self.builder()?;
        Ok(self)
    }

    fn builder(&self) -> Result<es::ClientBuilder> {
        let mut builder = es::ClientBuilder::for_url(&self.url)
            .map_err(|e| Error::new(ErrorKind::InvalidUrl, e))?;
        for (name, value) in &self.headers {
            builder = builder
                .header(name, value)
                .map_err(|e| Error::new(ErrorKind::InvalidHeader, e))?;
        }
        Ok(builder.reconnect(es::ReconnectOptions::reconnect(false).build()))
    }
}

impl Transport for EventSourceTransport {
    fn open(&self) -> TransportStream {
        let client = match self.builder() {
            Ok(builder) => builder.build(),
            Err(e) => {
                return stream::once(async move { Err(TransportError::new(e.to_string())) })
                    .boxed()
            }
        };

        client
            .stream()
            .map(|item| match item {
                Ok(es::SSE::Event(event)) => Ok(TransportEvent::Message(event.data)),
                Ok(es::SSE::Comment(comment)) => Ok(TransportEvent::Comment(comment)),
                Err(e) => Err(TransportError::new(e.to_string())),
            })
            .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_path_is_appended_to_base_url() {
        let transport = EventSourceTransport::new("http://localhost:4000/").unwrap();
        assert_eq!(transport.url(), "http://localhost:4000/events");
    }

    #[test]
    fn invalid_base_url_is_rejected_up_front() {
        let error = EventSourceTransport::new("not a url").unwrap_err();
        assert_eq!(error.error_kind, ErrorKind::InvalidUrl);
    }

    #[test]
    fn unencodable_credentials_are_rejected_up_front() {
        let error = EventSourceTransport::new("http://localhost:4000")
            .unwrap()
            .with_bearer_token("line\nbreak")
            .unwrap_err();
        assert_eq!(error.error_kind, ErrorKind::InvalidHeader);
    }

    #[test]
    fn credentials_become_request_headers() {
        let transport = EventSourceTransport::new("http://localhost:4000")
            .unwrap()
            .with_session_cookie("abc")
            .unwrap();
        assert_eq!(
            transport.headers,
            vec![("Cookie".to_string(), "id=abc".to_string())]
        );
    }
}
