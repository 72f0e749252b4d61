//! Watch-Set Controller
//!
//! The façade the rest of the application talks to: add and remove
//! symbols, read the latest value and history per symbol, follow the
//! connection status, and keep the watch-list in durable storage.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{broadcast, watch};

use crate::application::ports::{
    KeyValueStore, MarketStream, SearchResult, StorageError, StreamError, StreamEvent,
    SymbolSearch,
};
use crate::domain::reconcile::SymbolSnapshot;
use crate::domain::streaming::{ConnectionState, QuoteView, SymbolKey, TickUpdate};
use crate::domain::watchlist::WatchSet;

/// Durable key holding the watch-list.
pub const WATCH_LIST_KEY: &str = "initial_symbols";

/// Maximum search results returned to callers.
pub const MAX_SEARCH_RESULTS: usize = 10;

// =============================================================================
// Errors
// =============================================================================

/// Recoverable conditions reported to callers. Controller state stays
/// consistent in every case.
#[derive(Debug, thiserror::Error)]
pub enum WatchSetError {
    /// Symbol already in the watch-set.
    #[error("symbol already watched: {0}")]
    DuplicateSymbol(String),

    /// Symbol not in the watch-set.
    #[error("symbol not watched: {0}")]
    UnknownSymbol(String),

    /// Removed locally, but the transport is not open.
    #[error("not connected; {0} removed locally only")]
    NotConnected(String),

    /// The change was applied in memory but could not be persisted.
    #[error("failed to persist watch-list: {0}")]
    Storage(#[from] StorageError),
}

/// Wire status of a newly added symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddStatus {
    /// Subscribed on the open transport.
    Subscribed,
    /// Registered locally; subscribed when the transport next opens.
    Pending,
}

// =============================================================================
// Controller
// =============================================================================

/// Stateful façade owning the watch-set and composing the stream.
pub struct WatchSetController {
    stream: Arc<dyn MarketStream>,
    store: Arc<dyn KeyValueStore>,
    search: Option<Arc<dyn SymbolSearch>>,
    watch_set: Mutex<WatchSet>,
}

impl WatchSetController {
    /// Create a controller, restoring the watch-list from `store`.
    ///
    /// A missing, unreadable or fully invalid stored list yields `defaults`.
    #[must_use]
    pub fn new(
        stream: Arc<dyn MarketStream>,
        store: Arc<dyn KeyValueStore>,
        defaults: &WatchSet,
    ) -> Self {
        let blob = store.get(WATCH_LIST_KEY).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Failed to read stored watch-list");
            None
        });
        let watch_set = WatchSet::restore(blob.as_deref(), defaults);
        tracing::info!(symbols = ?watch_set.as_slice(), "Watch-list loaded");

        Self {
            stream,
            store,
            search: None,
            watch_set: Mutex::new(watch_set),
        }
    }

    /// Attach a symbol search collaborator.
    #[must_use]
    pub fn with_search(mut self, search: Arc<dyn SymbolSearch>) -> Self {
        self.search = Some(search);
        self
    }

    /// Watched symbols in insertion order.
    #[must_use]
    pub fn symbols(&self) -> Vec<String> {
        self.watch_set.lock().as_slice().to_vec()
    }

    /// Register consumers for every watched symbol and open the stream,
    /// flushing the watch-set once the transport is OPEN.
    ///
    /// # Errors
    ///
    /// Propagates the stream's connect error.
    pub async fn connect(&self) -> Result<(), StreamError> {
        let symbols = self.symbols();
        let registry = self.stream.registry();
        for symbol in &symbols {
            if !registry.has_consumer(symbol) {
                let _ = registry.subscribe(symbol, self.stream.wire());
            }
        }
        self.stream.connect(symbols).await
    }

    /// Close the stream. All cached data is dropped.
    pub async fn disconnect(&self) {
        self.stream.disconnect().await;
    }

    /// Add a symbol to the watch-set and subscribe it.
    ///
    /// On a storage failure the symbol stays added and subscribed, and
    /// [`WatchSetError::Storage`] is returned.
    ///
    /// # Errors
    ///
    /// Returns [`WatchSetError::DuplicateSymbol`] if already watched.
    pub fn add_symbol(&self, symbol: &str) -> Result<AddStatus, WatchSetError> {
        let persisted = {
            let mut set = self.watch_set.lock();
            if !set.insert(symbol.to_string()) {
                return Err(WatchSetError::DuplicateSymbol(symbol.to_string()));
            }
            self.persist(&set)
        };

        let _ = self.stream.registry().subscribe(symbol, self.stream.wire());
        let status = if self.stream.registry().is_subscribed_on_wire(symbol) {
            AddStatus::Subscribed
        } else {
            AddStatus::Pending
        };
        tracing::info!(symbol, ?status, "Symbol added");

        persisted.map(|()| status)
    }

    /// Remove a symbol from the watch-set and drop its data.
    ///
    /// The symbol is removed locally even when the transport is not open.
    ///
    /// # Errors
    ///
    /// Returns [`WatchSetError::UnknownSymbol`] if not watched,
    /// [`WatchSetError::NotConnected`] if the transport was not open, or
    /// [`WatchSetError::Storage`] if the change could not be persisted.
    pub fn remove_symbol(&self, symbol: &str) -> Result<(), WatchSetError> {
        let persisted = {
            let mut set = self.watch_set.lock();
            if !set.remove(symbol) {
                return Err(WatchSetError::UnknownSymbol(symbol.to_string()));
            }
            self.persist(&set)
        };

        let connected = self.stream.state().is_open();
        self.stream.registry().unsubscribe(symbol, self.stream.wire());
        tracing::info!(symbol, connected, "Symbol removed");

        if !connected {
            return Err(WatchSetError::NotConnected(symbol.to_string()));
        }
        persisted
    }

    /// Latest tick and history for a symbol. Pure read.
    #[must_use]
    pub fn snapshot(&self, symbol: &str) -> SymbolSnapshot {
        self.stream
            .registry()
            .reconciler()
            .snapshot(&SymbolKey::canonicalize(symbol))
    }

    /// Renderer projection of the latest state, if any tick arrived.
    #[must_use]
    pub fn quote(&self, symbol: &str) -> Option<QuoteView> {
        let snapshot = self.snapshot(symbol);
        let tick = snapshot.latest?;
        Some(QuoteView::from(&TickUpdate {
            tick,
            delta: snapshot.delta.unwrap_or_default(),
        }))
    }

    /// Live updates for a watched symbol.
    #[must_use]
    pub fn updates(&self, symbol: &str) -> Option<broadcast::Receiver<TickUpdate>> {
        self.stream.registry().receiver(symbol)
    }

    /// Current connection state.
    #[must_use]
    pub fn connection_state(&self) -> ConnectionState {
        self.stream.state()
    }

    /// Connection state changes.
    #[must_use]
    pub fn state_receiver(&self) -> watch::Receiver<ConnectionState> {
        self.stream.watch_state()
    }

    /// Stream lifecycle events.
    #[must_use]
    pub fn events(&self) -> broadcast::Receiver<StreamEvent> {
        self.stream.events()
    }

    /// Look up symbols for the add-symbol flow.
    ///
    /// Returns at most ten results; failures yield an empty list.
    pub async fn search_symbols(&self, query: &str) -> Vec<SearchResult> {
        let Some(search) = &self.search else {
            return Vec::new();
        };
        match search.search(query).await {
            Ok(mut results) => {
                results.truncate(MAX_SEARCH_RESULTS);
                results
            }
            Err(e) => {
                tracing::warn!(query, error = %e, "Symbol search failed");
                Vec::new()
            }
        }
    }

    fn persist(&self, set: &WatchSet) -> Result<(), WatchSetError> {
        self.store.set(WATCH_LIST_KEY, &set.to_blob()).map_err(|e| {
            tracing::warn!(error = %e, "Failed to persist watch-list");
            WatchSetError::Storage(e)
        })
    }
}

// =============================================================================
// Tests
// =============================================================================
