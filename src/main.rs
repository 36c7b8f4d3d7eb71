use log::*;
use service::{
    config::Config, directory::InMemoryDirectory, logging::Logger, session::StaticSessions,
    AppState,
};
use std::future::IntoFuture;
use std::sync::Arc;

#[tokio::main]
async fn main() {
    let config = Config::new();

    if let Err(e) = Logger::init_logger(&config) {
        eprintln!("Failed to start logger: {e}");
        std::process::exit(1);
    }

    info!("Starting up Social Realtime API server");
    info!("Runtime environment: {}", config.runtime_env());

    // The session store and membership directory are external collaborators.
    // Development runs use the in-memory implementations.
    let sessions = StaticSessions::from_tokens(&config.session_tokens);
    if sessions.is_empty() {
        warn!("No session tokens configured; every event stream will be rejected");
    }
    let directory =
        InMemoryDirectory::from_members(&config.conversation_members, &config.group_members);
    if directory.is_empty() {
        warn!("No chat memberships configured; every typing announcement will be rejected");
    }

    let app_state = AppState::new(config.clone(), Arc::new(sessions), Arc::new(directory));

    let router = web::define_routes(app_state);

    let address = format!("{}:{}", config.interface(), config.port);
    let listener = match tokio::net::TcpListener::bind(&address).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind {address}: {e}");
            std::process::exit(1);
        }
    };

    info!("Server listening on {address}");

    // Event streams never finish on their own, so a graceful drain would wait
    // forever. On shutdown the server future is dropped, closing every stream.
    tokio::select! {
        result = axum::serve(listener, router).into_future() => {
            if let Err(e) = result {
                error!("Server error: {e}");
            }
        }
        _ = shutdown_signal() => {}
    }

    info!("Server shut down");
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutdown signal received"),
        Err(e) => {
            error!("Failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    }
}
