//! Stream Reconciliation
//!
//! Routes each inbound tick to its symbol's consumer and keeps the per-symbol
//! read models current:
//! - latest-value cache (one tick per symbol, overwritten on every tick)
//! - history buffer (arrival order, capped, strict FIFO eviction)
//! - previous price, kept apart from the tick, for the derived delta
//!
//! A tick for a symbol without a registered consumer is discarded without
//! touching any of the above.

use std::collections::{HashMap, VecDeque};

use parking_lot::RwLock;

use super::streaming::{PriceDelta, SymbolKey, Tick, TickUpdate};
use super::subscription::SubscriptionRegistry;

/// Default maximum number of ticks retained per symbol.
pub const DEFAULT_HISTORY_LIMIT: usize = 1000;

// =============================================================================
// History Buffer
// =============================================================================

/// Arrival-ordered tick history with a hard length cap.
///
/// Appending past the cap evicts the oldest entries first, so
/// `len() <= limit()` holds after every append.
#[derive(Debug, Clone)]
pub struct HistoryBuffer {
    ticks: VecDeque<Tick>,
    limit: usize,
}

impl HistoryBuffer {
    /// Create an empty buffer. A zero limit is raised to one.
    #[must_use]
    pub fn new(limit: usize) -> Self {
        let limit = limit.max(1);
        Self {
            ticks: VecDeque::with_capacity(limit.min(64)),
            limit,
        }
    }

    /// Append a tick, evicting from the front to respect the cap.
    pub fn push(&mut self, tick: Tick) {
        while self.ticks.len() >= self.limit {
            self.ticks.pop_front();
        }
        self.ticks.push_back(tick);
    }

    /// Number of ticks retained.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ticks.len()
    }

    /// Check if the buffer holds no ticks.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ticks.is_empty()
    }

    /// Maximum number of ticks retained.
    #[must_use]
    pub const fn limit(&self) -> usize {
        self.limit
    }

    /// Iterate from oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = &Tick> {
        self.ticks.iter()
    }

    /// Copy the buffer out, oldest first.
    #[must_use]
    pub fn to_vec(&self) -> Vec<Tick> {
        self.ticks.iter().cloned().collect()
    }
}

// =============================================================================
// Snapshot
// =============================================================================

/// Point-in-time view of one symbol's cached state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SymbolSnapshot {
    /// Most recent tick, if any arrived since subscribing.
    pub latest: Option<Tick>,
    /// Retained history, oldest first.
    pub history: Vec<Tick>,
    /// Delta carried by the most recent tick.
    pub delta: Option<PriceDelta>,
}

// =============================================================================
// Reconciler
// =============================================================================

#[derive(Debug, Default)]
struct ReconcilerState {
    latest: HashMap<SymbolKey, Tick>,
    history: HashMap<SymbolKey, HistoryBuffer>,
    previous_price: HashMap<SymbolKey, f64>,
    last_delta: HashMap<SymbolKey, PriceDelta>,
}

/// Owner of the latest-value cache and the per-symbol history buffers.
#[derive(Debug)]
pub struct StreamReconciler {
    state: RwLock<ReconcilerState>,
    history_limit: usize,
}

impl Default for StreamReconciler {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_LIMIT)
    }
}

impl StreamReconciler {
    /// Create a reconciler retaining at most `history_limit` ticks per symbol.
    #[must_use]
    pub fn new(history_limit: usize) -> Self {
        Self {
            state: RwLock::new(ReconcilerState::default()),
            history_limit: history_limit.max(1),
        }
    }

    /// Handle one decoded tick.
    ///
    /// Returns the delivered update, or `None` when no consumer is registered
    /// for the tick's symbol and the tick was discarded.
    ///
    /// The registry lock is held for the whole call, so an unsubscribe
    /// racing with this tick either happens entirely before (tick dropped)
    /// or entirely after (data cleared).
    pub fn handle_tick(&self, tick: Tick, registry: &SubscriptionRegistry) -> Option<TickUpdate> {
        let symbol = tick.symbol.clone();
        registry.dispatch(&symbol, |consumer| {
            let update = self.record(tick);
            // A consumer with no live receivers is still registered; the
            // update is recorded regardless.
            let _ = consumer.send(update.clone());
            update
        })
    }

    /// Update cache, history and delta for a tick whose consumer exists.
    fn record(&self, tick: Tick) -> TickUpdate {
        let mut state = self.state.write();
        let symbol = tick.symbol.clone();

        let previous = state.previous_price.insert(symbol.clone(), tick.price);
        let delta = PriceDelta::between(previous, tick.price);

        state.latest.insert(symbol.clone(), tick.clone());
        state
            .history
            .entry(symbol.clone())
            .or_insert_with(|| HistoryBuffer::new(self.history_limit))
            .push(tick.clone());
        state.last_delta.insert(symbol, delta);

        TickUpdate { tick, delta }
    }

    /// Latest tick for a symbol.
    #[must_use]
    pub fn latest(&self, symbol: &SymbolKey) -> Option<Tick> {
        self.state.read().latest.get(symbol).cloned()
    }

    /// History for a symbol, oldest first. Empty when unknown.
    #[must_use]
    pub fn history(&self, symbol: &SymbolKey) -> Vec<Tick> {
        self.state
            .read()
            .history
            .get(symbol)
            .map(HistoryBuffer::to_vec)
            .unwrap_or_default()
    }

    /// Pure read of everything cached for a symbol.
    #[must_use]
    pub fn snapshot(&self, symbol: &SymbolKey) -> SymbolSnapshot {
        let state = self.state.read();
        SymbolSnapshot {
            latest: state.latest.get(symbol).cloned(),
            history: state
                .history
                .get(symbol)
                .map(HistoryBuffer::to_vec)
                .unwrap_or_default(),
            delta: state.last_delta.get(symbol).copied(),
        }
    }

    /// Drop every cached value for a symbol.
    pub fn clear_symbol(&self, symbol: &SymbolKey) {
        let mut state = self.state.write();
        state.latest.remove(symbol);
        state.history.remove(symbol);
        state.previous_price.remove(symbol);
        state.last_delta.remove(symbol);
    }

    /// Drop every cached value for every symbol.
    pub fn clear_all(&self) {
        let mut state = self.state.write();
        state.latest.clear();
        state.history.clear();
        state.previous_price.clear();
        state.last_delta.clear();
    }

    /// Number of symbols with cached data.
    #[must_use]
    pub fn tracked_symbols(&self) -> usize {
        self.state.read().latest.len()
    }

    /// Per-symbol history cap.
    #[must_use]
    pub const fn history_limit(&self) -> usize {
        self.history_limit
    }
}

// =============================================================================
// Tests
// =============================================================================
