//! SSE HTTP handler for the web layer.
//!
//! This module contains only the Axum handler for the event stream endpoint.
//! The broker and the per-connection transport live in the `sse` crate so
//! producers can depend on them without depending on the web layer.

pub mod handler;
