//! Market Recorder Binary
//!
//! Records the ticker and order-book feed into a local SQLite database.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin market-recorder
//! ```
//!
//! # Environment Variables
//!
//! - `RECORDER_ENDPOINT`: Router WebSocket URL (default: wss://api.poloniex.com:443)
//! - `RECORDER_REALM`: Realm to join (default: realm1)
//! - `RECORDER_MARKETS`: Comma-separated market codes (default: BTC_ETH)
//! - `RECORDER_DB_PATH`: Database file (default: poloniex.db)
//! - `RECORDER_CHANNEL_CAPACITY`: Per-topic event buffer (default: 1024)
//! - `RECORDER_METRICS_PORT`: Prometheus port, 0 disables (default: 0)
//! - `OTEL_ENABLED`: Export spans over OTLP (default: false)
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP endpoint (default: <http://localhost:4317>)
//! - `OTEL_SERVICE_NAME`: Service name (default: market-recorder)
//! - `RUST_LOG`: Log filter (default: market_recorder=info)

use std::sync::Arc;

use anyhow::Context;
use market_recorder::infrastructure::telemetry;
use market_recorder::{RecorderConfig, SessionEnd, SqliteStore, init_metrics, recorder};
use tokio::signal;
use tokio_util::sync::CancellationToken;

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install rustls crypto provider"))?;

    load_dotenv();

    let _telemetry_guard = telemetry::init();

    tracing::info!("Starting Market Recorder");

    let config = RecorderConfig::from_env().context("invalid configuration")?;
    log_config(&config);

    if config.metrics_port != 0 {
        init_metrics(config.metrics_port)?;
    }

    let store = SqliteStore::open(&config.db_path)
        .with_context(|| format!("failed to open {}", config.db_path.display()))?;

    let shutdown_token = CancellationToken::new();
    tokio::spawn(await_shutdown(shutdown_token.clone()));

    let end = recorder::run(&config, Arc::new(store), shutdown_token).await?;

    match end {
        SessionEnd::Shutdown => tracing::info!("Market Recorder stopped"),
        SessionEnd::RouterGoodbye { reason } => {
            tracing::info!(reason = %reason, "Router closed the session");
        }
        SessionEnd::TransportClosed => tracing::info!("Router closed the connection"),
    }

    Ok(())
}

/// Load .env file from current or ancestor directories.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Log the parsed configuration.
fn log_config(config: &RecorderConfig) {
    tracing::info!(
        endpoint = %config.endpoint,
        realm = %config.realm,
        markets = ?config.markets,
        db_path = %config.db_path.display(),
        metrics_port = config.metrics_port,
        "Configuration loaded"
    );
    tracing::debug!(
        channel_capacity = config.channel_capacity,
        transport = ?config.transport,
        "Session settings"
    );
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
#[allow(clippy::expect_used)]
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("signal handler installation is critical for graceful shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation is critical for graceful shutdown")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, leaving session");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, leaving session");
        }
    }

    shutdown_token.cancel();
}
