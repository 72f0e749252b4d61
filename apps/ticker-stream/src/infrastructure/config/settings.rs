//! Service Configuration Settings
//!
//! Configuration types loaded from environment variables. Loading goes
//! through a lookup function so tests can supply variables without touching
//! the process environment.

use std::path::PathBuf;
use std::time::Duration;

use crate::application::services::AccessToken;
use crate::domain::reconcile::DEFAULT_HISTORY_LIMIT;
use crate::domain::watchlist::WatchSet;

/// Provider endpoints.
#[derive(Debug, Clone)]
pub struct EndpointSettings {
    /// Stream URL prefix; the access token is appended.
    pub ws_url: String,
    /// REST API base for symbol search.
    pub rest_url: String,
}

impl Default for EndpointSettings {
    fn default() -> Self {
        Self {
            ws_url: "wss://ws.finnhub.io?token=".to_string(),
            rest_url: "https://finnhub.io/api/v1".to_string(),
        }
    }
}

/// Streaming connection settings.
#[derive(Debug, Clone)]
pub struct StreamSettings {
    /// Ticks retained per symbol.
    pub history_limit: usize,
    /// Undelivered updates buffered per symbol consumer.
    pub channel_capacity: usize,
    /// Delay before the first reconnection attempt.
    pub reconnect_delay_initial: Duration,
    /// Maximum reconnection delay.
    pub reconnect_delay_max: Duration,
    /// Reconnection attempts before giving up (0 = unlimited).
    pub max_reconnect_attempts: u32,
    /// Backoff jitter as a fraction of the delay, in `[0, 1]`.
    pub reconnect_jitter: f64,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            history_limit: DEFAULT_HISTORY_LIMIT,
            channel_capacity: 256,
            reconnect_delay_initial: Duration::from_millis(2000),
            reconnect_delay_max: Duration::from_secs(30),
            max_reconnect_attempts: 5,
            reconnect_jitter: 0.0,
        }
    }
}

/// Durable local storage settings.
#[derive(Debug, Clone)]
pub struct StorageSettings {
    /// Directory holding stored keys.
    pub data_dir: PathBuf,
    /// Watch-list used when nothing valid is stored.
    pub default_symbols: WatchSet,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(".ticker-stream"),
            default_symbols: WatchSet::defaults(),
        }
    }
}

/// Server port settings.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// Health check HTTP port.
    pub health_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self { health_port: 8083 }
    }
}

/// Complete service configuration.
#[derive(Debug, Clone, Default)]
pub struct AppConfig {
    /// Access token from the environment, if set.
    pub token: Option<AccessToken>,
    /// Provider endpoints.
    pub endpoints: EndpointSettings,
    /// Streaming settings.
    pub stream: StreamSettings,
    /// Storage settings.
    pub storage: StorageSettings,
    /// Server port settings.
    pub server: ServerSettings,
}

impl AppConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidCredential`] if `FINNHUB_API_KEY` is set
    /// to an unusable token.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary variable lookup.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidCredential`] if `FINNHUB_API_KEY` is set
    /// to an unusable token.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Lookup(lookup);

        let token = env
            .non_empty("FINNHUB_API_KEY")
            .map(|raw| {
                AccessToken::parse(&raw)
                    .map_err(|_| ConfigError::InvalidCredential("FINNHUB_API_KEY".to_string()))
            })
            .transpose()?;

        let endpoints = EndpointSettings {
            ws_url: env
                .non_empty("FINNHUB_WS_URL")
                .unwrap_or_else(|| EndpointSettings::default().ws_url),
            rest_url: env
                .non_empty("FINNHUB_REST_URL")
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or_else(|| EndpointSettings::default().rest_url),
        };

        let defaults = StreamSettings::default();
        let stream = StreamSettings {
            history_limit: env
                .parse("TICKER_STREAM_HISTORY_LIMIT", defaults.history_limit)
                .max(1),
            channel_capacity: env
                .parse("TICKER_STREAM_CHANNEL_CAPACITY", defaults.channel_capacity)
                .max(1),
            reconnect_delay_initial: env
                .positive("TICKER_STREAM_RECONNECT_DELAY_INITIAL_MS")
                .map_or(defaults.reconnect_delay_initial, Duration::from_millis),
            reconnect_delay_max: env
                .positive("TICKER_STREAM_RECONNECT_DELAY_MAX_SECS")
                .map_or(defaults.reconnect_delay_max, Duration::from_secs),
            max_reconnect_attempts: env.parse(
                "TICKER_STREAM_MAX_RECONNECT_ATTEMPTS",
                defaults.max_reconnect_attempts,
            ),
            reconnect_jitter: env
                .fraction("TICKER_STREAM_RECONNECT_JITTER")
                .unwrap_or(defaults.reconnect_jitter),
        };

        let storage = StorageSettings {
            data_dir: env
                .non_empty("TICKER_STREAM_DATA_DIR")
                .map_or_else(|| StorageSettings::default().data_dir, PathBuf::from),
            default_symbols: env
                .non_empty("TICKER_STREAM_DEFAULT_SYMBOLS")
                .map(|list| WatchSet::restore(Some(&list), &WatchSet::defaults()))
                .unwrap_or_else(WatchSet::defaults),
        };

        let server = ServerSettings {
            health_port: env.parse(
                "TICKER_STREAM_HEALTH_PORT",
                ServerSettings::default().health_port,
            ),
        };

        Ok(Self {
            token,
            endpoints,
            stream,
            storage,
            server,
        })
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Token is too short or the placeholder value.
    #[error("invalid access token in {0}")]
    InvalidCredential(String),

    /// No token in the environment or in storage.
    #[error("no access token configured; set FINNHUB_API_KEY")]
    MissingCredential,
}

struct Lookup<F>(F);

impl<F> Lookup<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn non_empty(&self, key: &str) -> Option<String> {
        (self.0)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn parse<T: std::str::FromStr>(&self, key: &str, default: T) -> T {
        self.non_empty(key)
            .and_then(|v| v.parse().ok())
            .unwrap_or(default)
    }

    fn positive(&self, key: &str) -> Option<u64> {
        self.non_empty(key)
            .and_then(|v| v.parse().ok())
            .filter(|v| *v > 0)
    }

    fn fraction(&self, key: &str) -> Option<f64> {
        self.non_empty(key)
            .and_then(|v| v.parse::<f64>().ok())
            .filter(|v| (0.0..=1.0).contains(v))
    }
}
