use std::error::Error as StdError;

pub type Result<T> = core::result::Result<T, Error>;

/// Raised while building a transport, before any connection exists.
#[derive(Debug)]
pub struct Error {
    pub source: Option<Box<dyn StdError + Send + Sync>>,
    pub error_kind: ErrorKind,
}

#[derive(Debug, PartialEq)]
pub enum ErrorKind {
    /// The stream endpoint could not be parsed as a URL.
    InvalidUrl,
    /// A credential could not be encoded as a request header.
    InvalidHeader,
}

impl Error {
    pub fn new(error_kind: ErrorKind, source: impl ToString) -> Self {
        Self {
            source: Some(source.to_string().into()),
            error_kind,
        }
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
        match &self.source {
            Some(source) => write!(fmt, "Client Error: {:?}: {}", self.error_kind, source),
            None => write!(fmt, "Client Error: {:?}", self.error_kind),
        }
    }
}
