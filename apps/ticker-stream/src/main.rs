//! Ticker Stream Binary
//!
//! Connects to the Finnhub trade stream, tracks the stored watch-list and
//! logs every price update.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin ticker-stream
//! ```
//!
//! # Environment Variables
//!
//! ## Required (unless a token was stored earlier)
//! - `FINNHUB_API_KEY`: access token
//!
//! ## Optional
//! - `FINNHUB_WS_URL`: stream URL prefix (default: `wss://ws.finnhub.io?token=`)
//! - `FINNHUB_REST_URL`: REST base (default: <https://finnhub.io/api/v1>)
//! - `TICKER_STREAM_DATA_DIR`: storage directory (default: .ticker-stream)
//! - `TICKER_STREAM_DEFAULT_SYMBOLS`: fallback watch-list (default: AAPL,MSFT,GOOGL)
//! - `TICKER_STREAM_HISTORY_LIMIT`: ticks kept per symbol (default: 1000)
//! - `TICKER_STREAM_CHANNEL_CAPACITY`: per-symbol update buffer (default: 256)
//! - `TICKER_STREAM_HEALTH_PORT`: health check HTTP port (default: 8083)
//! - `TICKER_STREAM_RECONNECT_DELAY_INITIAL_MS` (default: 2000)
//! - `TICKER_STREAM_RECONNECT_DELAY_MAX_SECS` (default: 30)
//! - `TICKER_STREAM_MAX_RECONNECT_ATTEMPTS` (default: 5)
//! - `TICKER_STREAM_RECONNECT_JITTER`: backoff jitter fraction (default: 0)
//! - `OTEL_ENABLED`, `OTEL_EXPORTER_OTLP_ENDPOINT`, `OTEL_SERVICE_NAME`
//! - `RUST_LOG`: log filter (default: `ticker_stream=info`)

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::signal;
use tokio_stream::StreamExt;
use tokio_stream::StreamMap;
use tokio_stream::wrappers::BroadcastStream;
use tokio_util::sync::CancellationToken;

use ticker_stream::application::ports::StreamEvent;
use ticker_stream::application::services::{AccessToken, CredentialStore, WatchSetController};
use ticker_stream::domain::streaming::{QuoteView, format_compact};
use ticker_stream::infrastructure::finnhub::{FinnhubSearch, StreamClient, StreamClientConfig};
use ticker_stream::infrastructure::health::{HealthServer, HealthServerState};
use ticker_stream::infrastructure::storage::FileStore;
use ticker_stream::infrastructure::telemetry;
use ticker_stream::{AppConfig, ConfigError, init_metrics};

/// Graceful shutdown timeout.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        anyhow::bail!("failed to install rustls crypto provider");
    }

    load_dotenv();

    let telemetry_guard = telemetry::init();

    tracing::info!(
        otel_export = telemetry_guard.is_exporting(),
        "Starting ticker stream"
    );

    let _metrics_handle = init_metrics().context("failed to install metrics recorder")?;

    let config = AppConfig::from_env()?;
    log_config(&config);

    let store = Arc::new(
        FileStore::open(&config.storage.data_dir).context("failed to open data directory")?,
    );
    let credentials = CredentialStore::new(store.clone());
    let token = credentials
        .resolve(config.token.as_ref().map(AccessToken::expose))?
        .ok_or(ConfigError::MissingCredential)?;
    if config.token.is_some() {
        credentials.save(token.expose())?;
    }

    let shutdown_token = CancellationToken::new();

    let client = Arc::new(StreamClient::new(StreamClientConfig::from_settings(
        token.stream_url(&config.endpoints.ws_url),
        &config.stream,
    )));
    let search = FinnhubSearch::new(config.endpoints.rest_url.clone(), token)?;
    let controller = Arc::new(
        WatchSetController::new(client.clone(), store, &config.storage.default_symbols)
            .with_search(Arc::new(search)),
    );

    let health_state = Arc::new(HealthServerState::new(
        env!("CARGO_PKG_VERSION").to_string(),
        Arc::clone(&client),
        Arc::clone(&controller),
    ));
    let health_server = HealthServer::new(
        config.server.health_port,
        health_state,
        shutdown_token.clone(),
    );
    tokio::spawn(async move {
        if let Err(e) = health_server.run().await {
            tracing::error!(error = %e, "Health server error");
        }
    });

    tokio::spawn(log_events(controller.events(), shutdown_token.clone()));

    // Transient failures are retried by the client; only log here.
    if let Err(e) = controller.connect().await {
        tracing::warn!(error = %e, "Initial connection failed, retrying in background");
    }

    tokio::spawn(render_updates(Arc::clone(&controller), shutdown_token.clone()));

    tracing::info!(symbols = ?controller.symbols(), "Ticker stream ready");

    await_shutdown(shutdown_token).await;

    if tokio::time::timeout(SHUTDOWN_TIMEOUT, controller.disconnect())
        .await
        .is_err()
    {
        tracing::warn!("Stream did not close within the shutdown timeout");
    }

    tracing::info!("Ticker stream stopped");
    Ok(())
}

/// Log every update for the watched symbols until shutdown.
async fn render_updates(controller: Arc<WatchSetController>, shutdown: CancellationToken) {
    let mut updates = StreamMap::new();
    for symbol in controller.symbols() {
        if let Some(rx) = controller.updates(&symbol) {
            updates.insert(symbol, BroadcastStream::new(rx));
        }
    }

    loop {
        tokio::select! {
            () = shutdown.cancelled() => return,
            next = updates.next() => match next {
                Some((_, Ok(update))) => {
                    let quote = QuoteView::from(&update);
                    tracing::info!(
                        symbol = %quote.symbol,
                        price = quote.current_price,
                        change = format!("{:+.2}", quote.change),
                        change_percent = format!("{:+.2}%", quote.change_percent),
                        volume = %format_compact(quote.volume),
                        at = %quote.last_update,
                        "Quote"
                    );
                }
                Some((symbol, Err(e))) => {
                    tracing::warn!(symbol = %symbol, error = %e, "Renderer lagging");
                }
                None => return,
            },
        }
    }
}

/// Log stream lifecycle events until shutdown.
async fn log_events(
    mut events: tokio::sync::broadcast::Receiver<StreamEvent>,
    shutdown: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            () = shutdown.cancelled() => return,
            event = events.recv() => event,
        };
        match event {
            Ok(StreamEvent::ReconnectExhausted { attempts }) => {
                tracing::error!(attempts, "Stream disconnected permanently; restart to retry");
            }
            Ok(event) => tracing::debug!(?event, "Stream event"),
            Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::debug!(skipped, "Event log lagging");
            }
            Err(tokio::sync::broadcast::error::RecvError::Closed) => return,
        }
    }
}

/// Log the parsed configuration.
fn log_config(config: &AppConfig) {
    tracing::info!(
        data_dir = %config.storage.data_dir.display(),
        health_port = config.server.health_port,
        history_limit = config.stream.history_limit,
        max_reconnect_attempts = config.stream.max_reconnect_attempts,
        token_from_env = config.token.is_some(),
        "Configuration loaded"
    );
}

/// Load .env file from current directory or any ancestor directory.
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
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }

    shutdown_token.cancel();

    tracing::info!(
        timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
        "Graceful shutdown started"
    );
}
