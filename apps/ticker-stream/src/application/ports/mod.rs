//! Port Interfaces
//!
//! Contracts between the application services and the adapters in the
//! infrastructure layer.
//!
//! ## Driven Ports (Outbound)
//!
//! - `MarketStream`: the single streaming connection
//! - `WireSink`: outbound subscribe/unsubscribe commands
//! - `KeyValueStore`: durable local storage
//! - `SymbolSearch`: free-text symbol lookup

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, watch};

use crate::domain::streaming::ConnectionState;
use crate::domain::subscription::SubscriptionRegistry;

pub use crate::domain::subscription::{WireCommand, WireSink};

// =============================================================================
// Market Stream
// =============================================================================

/// Errors surfaced by the streaming connection.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    /// A connection attempt is already pending or open.
    #[error("connection already pending or open; disconnect first")]
    AlreadyConnected,

    /// WebSocket transport error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// The transport closed.
    #[error("connection closed")]
    ConnectionClosed,

    /// The connection was cancelled by `disconnect()`.
    #[error("connection cancelled")]
    Cancelled,
}

/// Lifecycle events published by the streaming connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// The transport reached OPEN.
    Connected,
    /// The transport closed.
    Disconnected,
    /// A reconnect is scheduled.
    Reconnecting {
        /// Attempt number, starting at 1.
        attempt: u32,
        /// Delay before the attempt.
        delay: Duration,
    },
    /// No further reconnects will be attempted until a manual connect.
    ReconnectExhausted {
        /// Attempts made.
        attempts: u32,
    },
    /// An inbound payload could not be decoded and was dropped.
    DecodeFailed {
        /// Decoder message.
        reason: String,
    },
}

/// The single shared streaming connection.
#[async_trait]
pub trait MarketStream: Send + Sync {
    /// Open the transport, flushing `initial_symbols` once it is OPEN.
    ///
    /// Resolves on the first OPEN or the first transport error.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::AlreadyConnected`] when a connection is
    /// pending or open, or the first transport error.
    async fn connect(&self, initial_symbols: Vec<String>) -> Result<(), StreamError>;

    /// Close the transport, suppress reconnects and drop all subscription
    /// and cached state. Idempotent.
    async fn disconnect(&self);

    /// Current connection state.
    fn state(&self) -> ConnectionState;

    /// Receiver for connection state changes.
    fn watch_state(&self) -> watch::Receiver<ConnectionState>;

    /// Receiver for lifecycle events.
    fn events(&self) -> broadcast::Receiver<StreamEvent>;

    /// Registry driven by this connection.
    fn registry(&self) -> &Arc<SubscriptionRegistry>;

    /// Outbound command sink for registry calls.
    fn wire(&self) -> &dyn WireSink;
}

// =============================================================================
// Key-Value Store
// =============================================================================

/// Errors from durable storage.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Filesystem error.
    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Key contains characters the backend cannot store.
    #[error("invalid storage key: {0}")]
    InvalidKey(String),
}

/// Durable string storage keyed by fixed names.
pub trait KeyValueStore: Send + Sync {
    /// Read a value. `Ok(None)` when the key was never written.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be read.
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// Write a value, replacing any previous one.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be written.
    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;

    /// Remove a value. Removing an absent key succeeds.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be written.
    fn remove(&self, key: &str) -> Result<(), StorageError>;
}

// =============================================================================
// Symbol Search
// =============================================================================

/// Errors from the symbol search collaborator.
#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    /// HTTP request failed.
    #[error("search request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-success status.
    #[error("search returned status {0}")]
    Status(u16),
}

/// One symbol search hit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResult {
    /// Symbol to subscribe with.
    pub symbol: String,
    /// Company or instrument name.
    pub description: String,
    /// Symbol as displayed.
    pub display_symbol: String,
    /// Instrument type, e.g. "Common Stock".
    #[serde(rename = "type")]
    pub kind: String,
}

/// Free-text symbol lookup.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SymbolSearch: Send + Sync {
    /// Search for symbols matching `query`.
    ///
    /// # Errors
    ///
    /// Returns an error if the lookup fails.
    async fn search(&self, query: &str) -> Result<Vec<SearchResult>, SearchError>;
}
