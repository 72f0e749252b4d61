#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::needless_collect,
        clippy::option_if_let_else,
        clippy::default_trait_access,
        clippy::items_after_statements,
        clippy::or_fun_call
    )
)]

//! Ticker Stream - Real-time Market Data Watcher
//!
//! Keeps one WebSocket connection to the Finnhub trade feed, multiplexes a
//! user-editable watch-set of symbols over it and fans each trade out to
//! per-symbol consumers together with the price change since the previous
//! trade.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Core streaming logic and data types
//!   - `streaming`: Symbols, ticks, deltas, quote views, connection state
//!   - `subscription`: Registry of wire subscriptions and local consumers
//!   - `reconcile`: Latest tick and bounded history per symbol
//!   - `watchlist`: The ordered, persisted set of watched symbols
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: Market stream, storage and symbol search interfaces
//!   - `services`: Watch-set controller, credential handling
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `finnhub`: WebSocket stream client, JSON codec, REST symbol search
//!   - `storage`: File-backed and in-memory key-value stores
//!   - `config`: Environment configuration
//!   - `health`: Health check HTTP endpoint
//!   - `metrics`, `telemetry`: Prometheus metrics, tracing setup
//!
//! # Data Flow
//!
//! ```text
//!                 ┌──────────────┐   ┌──────────────┐   ┌─────────────┐
//! Finnhub WS ────►│ StreamClient │──►│  Reconciler  │──►│  Registry   │──► AAPL consumers
//!     ▲           └──────────────┘   │ latest/delta │   │ per-symbol  │──► MSFT consumers
//!     │                              └──────────────┘   │  broadcast  │──► ...
//!     └──── subscribe / unsubscribe ────────────────────┴─────────────┘
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Core streaming types with no I/O.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::reconcile::{StreamReconciler, SymbolSnapshot};
pub use domain::streaming::{ConnectionState, PriceDelta, QuoteView, SymbolKey, Tick, TickUpdate};
pub use domain::subscription::{RegistryStats, SubscriptionRegistry};
pub use domain::watchlist::WatchSet;

// Application services
pub use application::ports::{MarketStream, StreamError, StreamEvent};
pub use application::services::{
    AccessToken, AddStatus, CredentialError, CredentialStore, WatchSetController, WatchSetError,
};

// Infrastructure config
pub use infrastructure::config::{
    AppConfig, ConfigError, EndpointSettings, ServerSettings, StorageSettings, StreamSettings,
};

// Stream client
pub use infrastructure::finnhub::{FinnhubSearch, StreamClient, StreamClientConfig};

// Health server
pub use infrastructure::health::{HealthServer, HealthServerError, HealthServerState};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
