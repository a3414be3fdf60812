use std::path::PathBuf;

use clap::Parser;
use relay::RelayConfig;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "relay", version)]
struct Cli {
    /// Path to a relay.toml config file
    #[arg(long)]
    config: Option<PathBuf>,
    /// Bind host override
    #[arg(long)]
    host: Option<String>,
    /// Bind port override
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| "info,relay=debug".into()),
        )
        .with_target(false)
        .with_line_number(true)
        .init();

    let cli = Cli::parse();
    let mut config = RelayConfig::load_from(cli.config.as_deref())?;
    if let Some(host) = cli.host {
        config.host = host;
    }
    if let Some(port) = cli.port {
        config.port = port;
    }
    tracing::info!(phase = "startup", event = "config_loaded", config = ?config);

    let state = relay::build_state(&config).await?;
    let app = relay::router(state, &config);

    let address = config.bind_address();
    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .map_err(|err| anyhow::anyhow!("Failed to bind to {}: {}", address, err))?;
    tracing::info!(phase = "startup", event = "listening", "relay running on http://{}", address);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!(phase = "shutdown", event = "signal_failed", error = %err);
        std::future::pending::<()>().await;
    }
    tracing::info!(phase = "shutdown", event = "requested");
}
