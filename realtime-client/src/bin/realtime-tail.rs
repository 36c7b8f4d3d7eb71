use anyhow::Result;
use clap::Parser;
use colored::*;
use events::{Envelope, EventType};
use realtime_client::{ConnectionState, EventSourceTransport, RealtimeClient};

#[derive(Parser)]
#[command(name = "realtime-tail")]
#[command(about = "Print the realtime events delivered to one session")]
struct Cli {
    /// Base URL of the backend (e.g., http://localhost:4000)
    #[arg(long, env = "REALTIME_BASE_URL", default_value = "http://localhost:4000")]
    base_url: String,

    /// Session token, sent as the `id` cookie
    #[arg(long, env = "REALTIME_TOKEN")]
    token: String,

    /// Event types to print, comma separated (default: all)
    #[arg(long, value_delimiter = ',')]
    types: Vec<EventType>,

    /// Enable verbose output
    #[arg(long, short)]
    verbose: bool,
}

fn print_envelope(envelope: &Envelope) {
    println!(
        "\n[{}] {} event received",
        format!("user {}", envelope.user_id).bright_blue().bold(),
        envelope.event_type().as_str().yellow()
    );

    if let Ok(pretty) = serde_json::to_string_pretty(&envelope.event) {
        println!("   {}", pretty.dimmed());
    }
}

fn print_state(state: ConnectionState) {
    let label = match state {
        ConnectionState::Connected => state.to_string().green(),
        ConnectionState::Connecting => state.to_string().yellow(),
        ConnectionState::Disconnected => state.to_string().red(),
    };
    println!("{} stream {}", "→".blue(), label.bold());
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.verbose {
        env_logger::Builder::from_default_env()
            .filter_level(log::LevelFilter::Debug)
            .init();
    }

    let transport = EventSourceTransport::new(&cli.base_url)?.with_session_cookie(&cli.token)?;
    println!("{} Tailing {}", "→".blue(), transport.url());

    let types: Vec<EventType> = if cli.types.is_empty() {
        EventType::ALL
            .into_iter()
            .filter(|event_type| !event_type.is_control())
            .collect()
    } else {
        cli.types
    };

    let client = RealtimeClient::new(transport);
    let _state = client.on_connection_state_change(print_state);
    let _handles: Vec<_> = types
        .into_iter()
        .map(|event_type| client.on(event_type, print_envelope))
        .collect();

    client.connect();
    tokio::signal::ctrl_c().await?;
    client.disconnect();

    let stats = client.stats();
    println!("\n{}", "=== SESSION SUMMARY ===".bright_white().bold());
    println!("{}", serde_json::to_string_pretty(&stats)?);

    Ok(())
}
