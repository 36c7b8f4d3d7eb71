//! HTTP surface of the realtime service: the event stream endpoint, producer
//! endpoints for ephemeral events, and a health check.

pub use service::AppState;

pub(crate) mod controller;
pub mod error;
pub(crate) mod extractors;
pub(crate) mod params;
mod router;
pub(crate) mod sse;

pub use error::{Error, Result};
pub use router::define_routes;
