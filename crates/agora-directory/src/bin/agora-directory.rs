//! Standalone directory and relay server.

use agora_directory::{load_config, serve, StoreBackend};
use clap::Parser;
use std::path::PathBuf;
use tracing::info;

#[derive(Debug, Parser)]
#[command(name = "agora-directory", about = "Agora agent directory and relay server")]
struct Args {
    /// Path to a TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Listen address override, e.g. 0.0.0.0:7420.
    #[arg(long)]
    listen: Option<String>,

    /// Storage backend override: sqlite or memory.
    #[arg(long)]
    store: Option<String>,

    /// SQLite database path override.
    #[arg(long)]
    db_path: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=warn".into()),
        )
        .init();

    let args = Args::parse();
    let mut config = load_config(args.config.as_deref());
    if let Some(listen) = args.listen {
        config.listen_addr = listen;
    }
    if let Some(store) = args.store {
        config.store = match store.as_str() {
            "memory" => StoreBackend::Memory,
            "sqlite" => StoreBackend::Sqlite,
            other => anyhow::bail!("unknown store backend {other:?} (expected sqlite or memory)"),
        };
    }
    if let Some(db_path) = args.db_path {
        config.db_path = db_path;
    }

    serve(config, async {
        let _ = tokio::signal::ctrl_c().await;
        info!("Shutdown signal received");
    })
    .await
}
