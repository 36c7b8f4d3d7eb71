use config::Config;
use directory::MembershipDirectory;
use events::EventPublisher;
use session::SessionResolver;
use sse::{Broker, SseDomainEventHandler};
use std::sync::Arc;

pub mod config;
pub mod directory;
pub mod logging;
pub mod session;

// Service-level state shared by every request handler.
// Needs to implement Clone to be able to be passed into Router as State
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub broker: Arc<Broker>,
    pub event_publisher: EventPublisher,
    pub sessions: Arc<dyn SessionResolver>,
    pub directory: Arc<dyn MembershipDirectory>,
}

impl AppState {
    /// Wires a fresh broker to a publisher whose only handler is the SSE
    /// fan-out. Construct once per process.
    pub fn new(
        app_config: Config,
        sessions: Arc<dyn SessionResolver>,
        directory: Arc<dyn MembershipDirectory>,
    ) -> Self {
        let broker = Arc::new(Broker::new());
        let event_publisher =
            EventPublisher::new().with_handler(Arc::new(SseDomainEventHandler::new(broker.clone())));

        Self {
            config: app_config,
            broker,
            event_publisher,
            sessions,
            directory,
        }
    }

    pub fn broker_ref(&self) -> &Broker {
        self.broker.as_ref()
    }
}
