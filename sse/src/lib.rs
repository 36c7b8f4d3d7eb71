//! Server-Sent Events (SSE) infrastructure for real-time updates.
//!
//! This crate provides the in-memory broker that fans committed changes out
//! to every live connection of the affected users, and the per-connection
//! transport that turns broker deliveries into SSE frames.
//!
//! # Architecture
//!
//! - **Per-user registry**: each user id maps to the set of listeners of that
//!   user's open connections (one per tab/device). DashMap shards give
//!   per-user locking; publishes snapshot a user's listeners and release the
//!   lock before invoking them.
//! - **Ephemeral envelopes**: if a user has no live connection the envelope is
//!   dropped. Clients reconcile by re-fetching after reconnect.
//! - **Typed events**: payloads are the `events::Event` union, so producers
//!   and clients agree on shape at compile time.
//! - **Drop-based cleanup**: a connection's subscription is removed when its
//!   transport is dropped, so aborted clients never leave listeners behind.
//!
//! # Message Flow
//!
//! 1. Client opens `GET /events`; the web layer authenticates the session.
//! 2. `StreamTransport::open` queues the `connected` frame and subscribes.
//! 3. A producer commits a change and publishes a `DomainEvent`.
//! 4. `SseDomainEventHandler` calls `Broker::publish_to_many`.
//! 5. Each matching listener enqueues the envelope; the response stream writes
//!    it as `data: <json>\n\n`.
//!
//! # Example: Sending an event
//!
//! ```rust,ignore
//! use events::Event;
//!
//! app_state.broker.publish(recipient_id, Event::ConversationDeleted { conversation_id });
//! ```
//!
//! # Modules
//!
//! - `connection`: ListenerRegistry and the Subscription capability
//! - `manager`: Broker (subscribe / publish / publish_to_many)
//! - `message`: frame serialization and keepalive
//! - `transport`: StreamTransport, one per physical connection
//! - `domain_event_handler`: bridge from producers' DomainEvents to the broker

pub mod connection;
pub mod domain_event_handler;
pub mod manager;
pub mod message;
pub mod transport;

pub use connection::{Subscription, SubscriptionId};
pub use domain_event_handler::SseDomainEventHandler;
pub use manager::Broker;
pub use transport::StreamTransport;
