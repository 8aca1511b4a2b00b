use std::path::PathBuf;

use clap::Parser;
use tokio::net::TcpListener;
use tracing::info;

use palaver::backend::socket::SocketBackend;
use palaver::gateway;

/// IRC gateway for a conversational messaging backend.
#[derive(Debug, Parser)]
#[command(name = "palaver", version, about)]
struct Args {
    /// Bind address for IRC clients.
    #[arg(long, default_value = "127.0.0.1")]
    address: String,

    /// Bind port for IRC clients.
    #[arg(long, default_value_t = 6667)]
    port: u16,

    /// Path to the backend bridge socket.
    #[arg(long, default_value = "/tmp/palaver-backend.sock")]
    backend_socket: PathBuf,

    /// Render emoji as ASCII smileys in delivered messages.
    #[arg(long)]
    ascii_smileys: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let args = Args::parse();
    let state = gateway::GatewayState::shared(args.ascii_smileys);

    // Bind before the backend handshake so clients can connect early; their
    // sessions are refused politely until the backend is up.
    let listener = TcpListener::bind((args.address.as_str(), args.port)).await?;
    tokio::spawn(gateway::serve(listener, state.clone()));

    info!("waiting for backend to connect...");
    let (backend, snapshot, events) = SocketBackend::connect(&args.backend_socket).await?;
    gateway::on_backend_ready(&state, backend, snapshot).await;

    gateway::dispatch_events(state, events).await;
    Ok(())
}
