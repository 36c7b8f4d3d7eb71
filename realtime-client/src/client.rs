use crate::policy::ReconnectPolicy;
use crate::transport::{Transport, TransportEvent};
use dashmap::DashMap;
use events::{Envelope, EventType, Frame};
use futures_util::stream::StreamExt;
use log::*;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::task::JoinHandle;

/// Externally visible connection state.
///
/// A failed stream waiting out its backoff, an exhausted client and a manual
/// disconnect all report `Disconnected`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
        }
    }
}

pub type ListenerId = u64;

type EnvelopeListener = Arc<dyn Fn(&Envelope) + Send + Sync>;
type StateListener = Arc<dyn Fn(ConnectionState) + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClientStats {
    pub connected: bool,
    pub state: ConnectionState,
    pub listeners_by_type: BTreeMap<EventType, usize>,
    pub reconnect_attempts: u32,
}

#[derive(Debug, Clone, Copy)]
enum HandleTarget {
    Event(EventType),
    State,
}

/// Returned by the registration methods. `unsubscribe` may be called any number
/// of times; only the first call removes the listener.
///
/// Dropping the handle leaves the listener registered.
#[derive(Debug)]
pub struct ListenerHandle {
    client: Weak<RealtimeClient>,
    id: ListenerId,
    target: HandleTarget,
    active: AtomicBool,
}

impl ListenerHandle {
    pub fn id(&self) -> ListenerId {
        self.id
    }

    pub fn unsubscribe(&self) {
        if !self.active.swap(false, Ordering::SeqCst) {
            return;
        }
        let Some(client) = self.client.upgrade() else {
            return;
        };
        match self.target {
            HandleTarget::Event(event_type) => {
                client.off(event_type, self.id);
            }
            HandleTarget::State => {
                client.state_listeners.remove(&self.id);
            }
        }
    }
}

struct Control {
    state: ConnectionState,
    /// Bumped by every `connect` and `disconnect`. A connection task only acts
    /// while the generation it was started with is current.
    generation: u64,
    /// Bumped on every state change; a notification only goes out while its
    /// version is still current.
    version: u64,
    task: Option<JoinHandle<()>>,
}

impl Control {
    /// Returns the new version, or `None` when `next` is already the state.
    fn set_state(&mut self, next: ConnectionState) -> Option<u64> {
        if self.state == next {
            return None;
        }
        self.state = next;
        self.version += 1;
        Some(self.version)
    }
}

/// Owns the single event stream of this process and fans its envelopes out to
/// listeners registered per event type.
///
/// Create one with `RealtimeClient::new` at the application root and share the
/// returned `Arc`. Reconnection follows the `ReconnectPolicy`; nothing here
/// ever returns an error to the caller, exhaustion shows only in `state()`
/// and `stats()`.
pub struct RealtimeClient {
    transport: Arc<dyn Transport>,
    policy: ReconnectPolicy,
    control: Mutex<Control>,
    reconnect_attempts: AtomicU32,
    listeners: DashMap<EventType, BTreeMap<ListenerId, EnvelopeListener>>,
    state_listeners: DashMap<ListenerId, StateListener>,
    next_listener_id: AtomicU64,
}

impl RealtimeClient {
    pub fn new<T: Transport + 'static>(transport: T) -> Arc<Self> {
        Self::with_policy(transport, ReconnectPolicy::default())
    }

    pub fn with_policy<T: Transport + 'static>(transport: T, policy: ReconnectPolicy) -> Arc<Self> {
        Arc::new(Self {
            transport: Arc::new(transport),
            policy,
            control: Mutex::new(Control {
                state: ConnectionState::Disconnected,
                generation: 0,
                version: 0,
                task: None,
            }),
            reconnect_attempts: AtomicU32::new(0),
            listeners: DashMap::new(),
            state_listeners: DashMap::new(),
            next_listener_id: AtomicU64::new(1),
        })
    }

    /// Opens the stream unless one is already open or opening.
    ///
    /// Must be called from within a tokio runtime; the connection runs as a
    /// spawned task. A pending reconnect is cancelled and replaced.
    pub fn connect(self: &Arc<Self>) {
        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(e) => {
                error!("Cannot connect outside of a tokio runtime: {e}");
                return;
            }
        };

        let (generation, version) = {
            let mut control = self.lock_control();
            if control.state != ConnectionState::Disconnected {
                debug!("connect() ignored, stream is already {}", control.state);
                return;
            }
            if let Some(pending) = control.task.take() {
                pending.abort();
            }
            control.generation += 1;
            let version = control
                .set_state(ConnectionState::Connecting)
                .unwrap_or(control.version);
            (control.generation, version)
        };
        self.notify_state(ConnectionState::Connecting, version);

        let mut control = self.lock_control();
        // A disconnect() from a state listener wins over this connect.
        if control.generation == generation {
            control.task = Some(runtime.spawn(Arc::clone(self).run(generation)));
        }
    }

    /// Closes the stream and cancels any pending reconnect. Nothing reconnects
    /// until the next `connect`.
    pub fn disconnect(&self) {
        let changed = {
            let mut control = self.lock_control();
            control.generation += 1;
            if let Some(task) = control.task.take() {
                task.abort();
            }
            control.set_state(ConnectionState::Disconnected)
        };

        if let Some(version) = changed {
            info!("Realtime stream closed by the application");
            self.notify_state(ConnectionState::Disconnected, version);
        }
    }

    pub fn on<F>(self: &Arc<Self>, event_type: EventType, listener: F) -> ListenerHandle
    where
        F: Fn(&Envelope) + Send + Sync + 'static,
    {
        let id = self.next_id();
        self.listeners
            .entry(event_type)
            .or_default()
            .insert(id, Arc::new(listener));
        debug!("Registered {event_type} listener {id}");

        self.handle(id, HandleTarget::Event(event_type))
    }

    /// Removes one listener. Returns whether it was registered.
    pub fn off(&self, event_type: EventType, id: ListenerId) -> bool {
        let removed = match self.listeners.get_mut(&event_type) {
            Some(mut bucket) => bucket.remove(&id).is_some(),
            None => false,
        };
        self.listeners
            .remove_if(&event_type, |_, bucket| bucket.is_empty());
        removed
    }

    /// Registers a state listener and immediately calls it with the current state.
    pub fn on_connection_state_change<F>(self: &Arc<Self>, listener: F) -> ListenerHandle
    where
        F: Fn(ConnectionState) + Send + Sync + 'static,
    {
        let id = self.next_id();
        let listener: StateListener = Arc::new(listener);
        self.state_listeners.insert(id, Arc::clone(&listener));

        Self::call_state_listener(&listener, self.state());

        self.handle(id, HandleTarget::State)
    }

    pub fn state(&self) -> ConnectionState {
        self.lock_control().state
    }

    pub fn stats(&self) -> ClientStats {
        let state = self.state();
        ClientStats {
            connected: state == ConnectionState::Connected,
            state,
            listeners_by_type: self
                .listeners
                .iter()
                .map(|bucket| (*bucket.key(), bucket.value().len()))
                .collect(),
            reconnect_attempts: self.reconnect_attempts.load(Ordering::SeqCst),
        }
    }

    async fn run(self: Arc<Self>, generation: u64) {
        loop {
            let mut stream = self.transport.open();
            let mut opened = false;

            let reason = loop {
                match stream.next().await {
                    Some(Ok(event)) => {
                        if !opened {
                            opened = true;
                            self.reconnect_attempts.store(0, Ordering::SeqCst);
                            if !self.transition(generation, ConnectionState::Connected) {
                                return;
                            }
                            info!("Realtime stream open");
                        }
                        match event {
                            TransportEvent::Message(data) => self.handle_frame(&data),
                            TransportEvent::Comment(comment) => trace!("Stream comment: {comment}"),
                        }
                    }
                    Some(Err(e)) => break e.to_string(),
                    None => break "stream ended".to_string(),
                }
            };
            drop(stream);

            warn!("Realtime stream lost: {reason}");
            if !self.transition(generation, ConnectionState::Disconnected) {
                return;
            }

            let attempts = self.reconnect_attempts.load(Ordering::SeqCst);
            let Some(delay) = self.policy.next_delay(attempts) else {
                error!("Giving up on the realtime stream after {attempts} reconnect attempts");
                return;
            };
            self.reconnect_attempts.store(attempts + 1, Ordering::SeqCst);
            info!(
                "Reconnecting in {delay:?} (attempt {}/{})",
                attempts + 1,
                self.policy.max_attempts()
            );
            tokio::time::sleep(delay).await;

            if !self.transition(generation, ConnectionState::Connecting) {
                return;
            }
        }
    }

    fn handle_frame(&self, data: &str) {
        match Frame::parse(data) {
            Ok(Frame::Connected(frame)) => {
                debug!("Stream confirmed for user {}", frame.user_id);
            }
            Ok(Frame::Envelope(envelope)) => self.dispatch(&envelope),
            Err(e) => warn!("Dropping malformed frame: {e}"),
        }
    }

    fn dispatch(&self, envelope: &Envelope) {
        let event_type = envelope.event_type();
        // Snapshot so listeners may register or unsubscribe while being called.
        let listeners: Vec<EnvelopeListener> = match self.listeners.get(&event_type) {
            Some(bucket) => bucket.values().cloned().collect(),
            None => return,
        };

        for listener in listeners {
            if catch_unwind(AssertUnwindSafe(|| listener(envelope))).is_err() {
                error!("A {event_type} listener panicked");
            }
        }
    }

    /// Applies a state change made by the connection task of `generation`.
    /// Returns false when that task has been superseded and must stop.
    fn transition(&self, generation: u64, next: ConnectionState) -> bool {
        let changed = {
            let mut control = self.lock_control();
            if control.generation != generation {
                return false;
            }
            control.set_state(next)
        };
        if let Some(version) = changed {
            self.notify_state(next, version);
        }
        true
    }

    /// Announces the change that produced `version`. Stops as soon as a newer
    /// change lands, which announces itself, so listeners never end on a state
    /// that `state()` no longer reports.
    fn notify_state(&self, state: ConnectionState, version: u64) {
        let mut listeners: Vec<(ListenerId, StateListener)> = self
            .state_listeners
            .iter()
            .map(|entry| (*entry.key(), Arc::clone(entry.value())))
            .collect();
        listeners.sort_by_key(|(id, _)| *id);

        for (_, listener) in listeners {
            if self.lock_control().version != version {
                debug!("Skipping superseded {state} notification");
                return;
            }
            Self::call_state_listener(&listener, state);
        }
    }

    fn call_state_listener(listener: &StateListener, state: ConnectionState) {
        if catch_unwind(AssertUnwindSafe(|| listener(state))).is_err() {
            error!("A connection state listener panicked on {state}");
        }
    }

    fn handle(self: &Arc<Self>, id: ListenerId, target: HandleTarget) -> ListenerHandle {
        ListenerHandle {
            client: Arc::downgrade(self),
            id,
            target,
            active: AtomicBool::new(true),
        }
    }

    fn next_id(&self) -> ListenerId {
        self.next_listener_id.fetch_add(1, Ordering::Relaxed)
    }

    fn lock_control(&self) -> MutexGuard<'_, Control> {
        self.control.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
