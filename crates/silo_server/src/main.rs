//! Gateway binary entry point: CLI, logging, signal handling.

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use silo_server::config::Config;
use silo_server::run_with_shutdown;

#[derive(Parser, Debug)]
#[command(name = "silo-server", version, about = "Relational data-access gateway")]
struct Args {
    /// Path to the TOML config file.
    #[arg(short = 'c', long, default_value = "configs/config.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = Config::load(&args.config)?;
    let _log_guard = init_tracing(&config.log)?;

    let shutdown = CancellationToken::new();
    tokio::spawn(wait_for_signal(shutdown.clone()));

    run_with_shutdown(config, shutdown, None).await?;
    tracing::info!("silo-server stopped");
    Ok(())
}

fn init_tracing(
    log: &silo_server::config::LogConfig,
) -> anyhow::Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log.level.clone()));

    let stdout_layer = log.stdout.then(|| {
        tracing_subscriber::fmt::layer()
            .compact()
            .with_target(true)
    });

    let (file_layer, guard) = if log.path.is_empty() {
        (None, None)
    } else {
        let appender = tracing_appender::rolling::daily(&log.path, "silo.log");
        let (writer, guard) = tracing_appender::non_blocking(appender);
        let layer = tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_target(true)
            .with_writer(writer);
        (Some(layer), Some(guard))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stdout_layer)
        .with(file_layer)
        .try_init()
        .context("failed to initialize logging")?;
    Ok(guard)
}

async fn wait_for_signal(shutdown: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut terminate = match signal(SignalKind::terminate()) {
            Ok(stream) => stream,
            Err(err) => {
                tracing::error!(error = %err, "failed to install SIGTERM handler");
                let _ = tokio::signal::ctrl_c().await;
                shutdown.cancel();
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = terminate.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
    tracing::info!("shutdown signal received");
    shutdown.cancel();
}
