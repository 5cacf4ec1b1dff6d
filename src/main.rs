//! Murmur Server
//!
//! Run with: cargo run --bin murmur
//!
//! # Configuration
//!
//! Settings come from a TOML file (see `--print-config`), then environment
//! variables, then command-line flags. `RUST_LOG` overrides `logging.level`.

use anyhow::Context;
use clap::Parser;
use murmur::api::{serve, AppState};
use murmur::config::{generate_default_config, Config, LoggingConfig};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "murmur")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Real-time message fan-out over WebSocket")]
struct Cli {
    /// Config file (default: searched in the usual locations)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to bind to
    #[arg(long)]
    host: Option<String>,

    /// Port to listen on
    #[arg(short, long)]
    port: Option<u16>,

    /// Print a default config file and exit
    #[arg(long)]
    print_config: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.print_config {
        print!("{}", generate_default_config());
        return Ok(());
    }

    let mut config = match &cli.config {
        Some(path) => Config::load_with_env(path)?,
        None => Config::load_default(),
    };
    if let Some(host) = cli.host {
        config.server.host = host;
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }

    init_tracing(&config.logging);

    tracing::info!("Starting Murmur v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        backend = ?config.storage.backend,
        path = %config.storage.resolved_path().display(),
        policy = ?config.gateway.persist_failure_policy,
        "Opening message store"
    );

    let store = config
        .storage
        .open()
        .with_context(|| {
            format!(
                "failed to open message store at {}",
                config.storage.resolved_path().display()
            )
        })?;

    let state = AppState::new(store, &config);
    serve(state, &config.server).await?;

    tracing::info!("Murmur stopped");
    Ok(())
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("murmur={},tower_http=info", logging.level).into());

    let registry = tracing_subscriber::registry().with(filter);
    if logging.is_json() {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}
