//! PrefSync reference server.

use anyhow::{Context, Result};
use clap::Parser;
use std::net::SocketAddr;
use tracing::info;
use tracing_subscriber::EnvFilter;

use prefsync_server::{router, ServerState};

#[derive(Parser)]
#[command(name = "prefsync-server")]
#[command(about = "PrefSync - Remote preferences API")]
#[command(version)]
struct Args {
    /// Address to listen on.
    #[arg(short, long, env = "PREFSYNC_BIND", default_value = "127.0.0.1:8787")]
    bind: SocketAddr,

    /// Accepted bearer token; one account per token.
    #[arg(
        short,
        long = "token",
        env = "PREFSYNC_TOKENS",
        value_delimiter = ',',
        required = true
    )]
    tokens: Vec<String>,

    /// Stamp writes with the server clock when it is ahead of the client.
    #[arg(long)]
    reconcile_clock: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();

    let state = ServerState::new(args.tokens.iter().cloned(), args.reconcile_clock);
    let listener = tokio::net::TcpListener::bind(args.bind)
        .await
        .with_context(|| format!("Failed to bind {}", args.bind))?;

    info!(
        addr = %args.bind,
        accounts = args.tokens.len(),
        reconcile_clock = args.reconcile_clock,
        "Listening"
    );

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutting down");
        })
        .await
        .context("Server error")?;

    Ok(())
}
