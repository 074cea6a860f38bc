use std::path::PathBuf;

use anyhow::Result;
use cairn_core::config::parse_log_level;
use cairn_server::config::{ServerConfig, DEFAULT_MAX_OBJECT_SIZE};
use cairn_server::server::{create_router, AppState};
use cairn_server::storage::ObjectStore;
use clap::Parser;
use tokio::signal;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "cairn-server")]
#[command(about = "Reference object server for the Cairn HTTP backend")]
struct Cli {
    /// Storage directory for objects
    #[arg(long, default_value = "./cache")]
    storage_dir: PathBuf,

    /// Maximum object size in bytes
    #[arg(long, default_value_t = DEFAULT_MAX_OBJECT_SIZE)]
    max_size: u64,

    /// Bind address
    #[arg(long, default_value = "127.0.0.1")]
    bind: String,

    /// Port number
    #[arg(long, default_value = "8080")]
    port: u16,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_max_level(parse_log_level(&cli.log_level)?)
        .init();

    let config = ServerConfig::new()
        .with_storage_dir(cli.storage_dir)
        .with_max_object_size(cli.max_size)
        .with_bind_address(cli.bind)
        .with_port(cli.port);

    info!(
        storage_dir = %config.storage_dir.display(),
        max_object_size = config.max_object_size,
        "starting cairn-server"
    );

    let store = ObjectStore::new(&config.storage_dir, config.max_object_size)?;
    let removed = store.cleanup_temp_files()?;
    if removed > 0 {
        info!(removed, "removed stale temp files");
    }

    let app = create_router(AppState::new(store));
    let listener = tokio::net::TcpListener::bind(&config.bind_addr()).await?;
    info!(addr = %config.bind_addr(), "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("shutdown signal received");
}
