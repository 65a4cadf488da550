//! taskd - entry point.
//!
//! 起動順:
//! 1. 設定ファイルを読む（`--config`、無ければ `~/.taskd/config.toml`）
//! 2. tracing を初期化
//! 3. スナップショットから復元してデーモンを構築
//! 4. HTTP サーバを起動し、SIGINT / SIGTERM で停止

mod routes;

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use taskd_core::app::DaemonBuilder;
use taskd_core::config::Config;
use taskd_core::observability::init_tracing;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "taskd", version, about)]
struct Cli {
    /// Path to TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<CliCommand>,
}

#[derive(Subcommand)]
enum CliCommand {
    /// Run the daemon (default).
    Serve,

    /// Print the effective configuration as TOML.
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;

    match cli.command.unwrap_or(CliCommand::Serve) {
        CliCommand::Serve => serve(config).await,
        CliCommand::Config => {
            print!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

async fn serve(config: Config) -> anyhow::Result<()> {
    init_tracing(&config.log).context("failed to initialise tracing")?;
    info!(version = env!("CARGO_PKG_VERSION"), "taskd starting");

    let addr = config.listen_addr()?;
    let daemon = DaemonBuilder::new(config).build().await?;

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, "HTTP server listening");

    let app = routes::build(daemon.dispatcher());
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    // children and the final snapshot are handled even when the server failed
    daemon.shutdown_and_join().await;
    served?;

    info!("taskd stopped");
    Ok(())
}

/// Resolves when SIGINT (Ctrl-C) or SIGTERM is received.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to install CTRL+C signal handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut s) => {
                s.recv().await;
            }
            Err(e) => warn!(error = %e, "failed to install SIGTERM handler"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!("shutdown signal received");
}
