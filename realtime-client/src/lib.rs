//! Client side of the realtime event stream.
//!
//! One `RealtimeClient` per process keeps a single stream to the server's
//! `/events` endpoint open, reconnecting with exponential backoff, and hands
//! each envelope to the listeners registered for its type.
//!
//! ```rust,ignore
//! use events::EventType;
//! use realtime_client::{EventSourceTransport, RealtimeClient};
//!
//! let transport = EventSourceTransport::new("http://localhost:4000")?.with_session_cookie(token)?;
//! let client = RealtimeClient::new(transport);
//! let _handle = client.on(EventType::Message, |envelope| println!("{envelope:?}"));
//! client.connect();
//! ```

pub mod client;
pub mod consumer;
pub mod error;
pub mod policy;
pub mod transport;

pub use client::{ClientStats, ConnectionState, ListenerHandle, ListenerId, RealtimeClient};
pub use consumer::ChatState;
pub use error::{Error, ErrorKind};
pub use policy::ReconnectPolicy;
pub use transport::{EventSourceTransport, Transport, TransportError, TransportEvent};
