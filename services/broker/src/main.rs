use std::path::PathBuf;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use broker::config;

#[derive(Parser, Debug)]
#[command(name = "binq-broker", version, about = "Persistent partitioned message broker")]
struct Args {
    /// Path to the TOML config file. Missing file means all defaults.
    #[arg(long, default_value = "./binq.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let cfg = match config::load(&args.config) {
        Ok(cfg) => cfg,
        Err(err) => {
            eprintln!("FATAL: failed to load config: {err}");
            std::process::exit(1);
        }
    };

    info!(
        port = cfg.port,
        max_partitions = cfg.max_partitions,
        passkey_configured = cfg.passkey.is_some(),
        "binq broker starting"
    );

    if let Err(err) = broker::run(cfg, shutdown_signal()).await {
        eprintln!("FATAL: {err}");
        std::process::exit(1);
    }

    info!("binq broker shut down gracefully");
}

/// Waits for SIGTERM or Ctrl-C (SIGINT) and returns to trigger graceful
/// shutdown of the accept loop.
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => { info!("received Ctrl+C, shutting down"); },
        _ = terminate => { info!("received SIGTERM, shutting down"); },
    }
}
