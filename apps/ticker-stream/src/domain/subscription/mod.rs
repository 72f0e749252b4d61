//! Subscription Management Types
//!
//! Tracks which symbols are subscribed on the shared transport and which
//! local consumer receives each symbol's ticks.
//!
//! # Design
//!
//! The registry keeps one entry per canonical symbol:
//! - the symbol as it must be sent on the wire (`BINANCE:BTCUSDT`)
//! - whether a wire subscribe was sent during the current wire session
//! - the consumer channel, if a local consumer is registered
//!
//! The registry is the only component that emits subscribe/unsubscribe
//! commands. A wire subscribe for a symbol goes out at most once per wire
//! session: flags are reset when the transport closes, and every entry that
//! is not on the wire is flushed when it opens again. Symbols from the
//! one-shot initial list that never got a consumer are forgotten on close.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::broadcast;

use super::reconcile::StreamReconciler;
use super::streaming::{SymbolKey, TickUpdate};

// =============================================================================
// Wire Commands
// =============================================================================

/// Outbound subscription command for the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireCommand {
    /// Start streaming trades for a wire symbol.
    Subscribe(String),
    /// Stop streaming trades for a wire symbol.
    Unsubscribe(String),
}

impl WireCommand {
    /// The wire symbol the command targets.
    #[must_use]
    pub fn symbol(&self) -> &str {
        match self {
            Self::Subscribe(symbol) | Self::Unsubscribe(symbol) => symbol,
        }
    }

    /// Command name as used on the wire.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Subscribe(_) => "subscribe",
            Self::Unsubscribe(_) => "unsubscribe",
        }
    }
}

/// Outbound side of the transport, as seen by the registry.
///
/// Implemented by the connection manager's wire handle.
#[cfg_attr(test, mockall::automock)]
pub trait WireSink: Send + Sync {
    /// Whether the transport is currently open.
    fn is_open(&self) -> bool;

    /// Send a command. Returns `false` (after logging) when the transport
    /// is not open; never fails otherwise.
    fn send(&self, command: &WireCommand) -> bool;
}

// =============================================================================
// Subscription Entry
// =============================================================================

/// Consumer channel for one symbol.
pub type TickConsumer = broadcast::Sender<TickUpdate>;

/// Registry record for one canonical symbol.
#[derive(Debug)]
pub struct SubscriptionEntry {
    wire_symbol: String,
    on_wire: bool,
    consumer: Option<TickConsumer>,
}

impl SubscriptionEntry {
    fn new(wire_symbol: &str) -> Self {
        Self {
            wire_symbol: wire_symbol.to_string(),
            on_wire: false,
            consumer: None,
        }
    }

    /// Symbol as sent on the wire.
    #[must_use]
    pub fn wire_symbol(&self) -> &str {
        &self.wire_symbol
    }

    /// Whether a wire subscribe was sent during the current wire session.
    #[must_use]
    pub const fn is_subscribed_on_wire(&self) -> bool {
        self.on_wire
    }

    /// Whether a local consumer is registered.
    #[must_use]
    pub const fn has_consumer(&self) -> bool {
        self.consumer.is_some()
    }

    /// Send a wire subscribe unless one already went out this session.
    fn flush(&mut self, wire: &dyn WireSink) -> bool {
        if self.on_wire {
            return false;
        }
        if wire.send(&WireCommand::Subscribe(self.wire_symbol.clone())) {
            self.on_wire = true;
        }
        self.on_wire
    }
}

// =============================================================================
// Registry
// =============================================================================

#[derive(Debug, Default)]
struct RegistryState {
    entries: HashMap<SymbolKey, SubscriptionEntry>,
    /// One-shot list flushed on the next OPEN transition, then cleared.
    initial: Vec<String>,
}

/// Registry statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistryStats {
    /// Registered symbols.
    pub symbols: usize,
    /// Symbols subscribed on the wire this session.
    pub on_wire: usize,
    /// Symbols with a local consumer.
    pub consumers: usize,
}

/// Owner of subscription entries and sole emitter of wire commands.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use ticker_stream::domain::reconcile::StreamReconciler;
/// use ticker_stream::domain::subscription::{SubscriptionRegistry, WireCommand, WireSink};
///
/// struct Offline;
/// impl WireSink for Offline {
///     fn is_open(&self) -> bool { false }
///     fn send(&self, _: &WireCommand) -> bool { false }
/// }
///
/// let registry = SubscriptionRegistry::new(Arc::new(StreamReconciler::default()), 16);
/// let _rx = registry.subscribe("BINANCE:BTCUSDT", &Offline);
///
/// // Registered locally, waiting for the transport to open.
/// assert_eq!(registry.pending_symbols().len(), 1);
/// ```
#[derive(Debug)]
pub struct SubscriptionRegistry {
    state: Mutex<RegistryState>,
    reconciler: Arc<StreamReconciler>,
    channel_capacity: usize,
}

impl SubscriptionRegistry {
    /// Create a registry whose consumer channels hold `channel_capacity`
    /// undelivered updates.
    #[must_use]
    pub fn new(reconciler: Arc<StreamReconciler>, channel_capacity: usize) -> Self {
        Self {
            state: Mutex::new(RegistryState::default()),
            reconciler,
            channel_capacity: channel_capacity.max(1),
        }
    }

    /// Reconciler whose cache this registry clears on unsubscribe.
    #[must_use]
    pub fn reconciler(&self) -> &Arc<StreamReconciler> {
        &self.reconciler
    }

    /// Replace the one-shot initial flush list.
    pub fn set_initial_symbols(&self, symbols: Vec<String>) {
        self.state.lock().initial = symbols;
    }

    /// Register a fresh consumer for `symbol` and return its receiver.
    ///
    /// Any previous consumer is dropped first, which closes its receivers.
    /// When the transport is open and the symbol is not yet on the wire, a
    /// subscribe command is sent; otherwise the symbol stays pending until
    /// the next OPEN transition.
    pub fn subscribe(&self, symbol: &str, wire: &dyn WireSink) -> broadcast::Receiver<TickUpdate> {
        let key = SymbolKey::canonicalize(symbol);
        let (tx, rx) = broadcast::channel(self.channel_capacity);

        let mut state = self.state.lock();
        let entry = state
            .entries
            .entry(key.clone())
            .or_insert_with(|| SubscriptionEntry::new(symbol));

        if !entry.on_wire {
            entry.wire_symbol = symbol.to_string();
        }
        if entry.consumer.replace(tx).is_some() {
            tracing::debug!(symbol = %key, "Replaced existing consumer");
        }

        if wire.is_open() {
            if entry.flush(wire) {
                tracing::debug!(symbol = %key, "Subscribed on wire");
            }
        } else {
            tracing::debug!(symbol = %key, "Transport not open, subscription pending");
        }

        rx
    }

    /// Remove `symbol` and drop its cached data.
    ///
    /// Sends a wire unsubscribe if the symbol was on the wire. Returns
    /// whether the symbol was registered.
    pub fn unsubscribe(&self, symbol: &str, wire: &dyn WireSink) -> bool {
        let key = SymbolKey::canonicalize(symbol);

        let mut state = self.state.lock();
        let removed = state.entries.remove(&key);
        state.initial.retain(|s| SymbolKey::canonicalize(s) != key);

        if let Some(entry) = &removed
            && entry.on_wire
        {
            wire.send(&WireCommand::Unsubscribe(entry.wire_symbol.clone()));
        }

        // Cleared under the registry lock so an in-flight tick cannot
        // re-populate the cache after this point.
        self.reconciler.clear_symbol(&key);
        drop(state);

        removed.is_some()
    }

    /// On-open hook: flush the initial list once, then every pending entry.
    ///
    /// Returns the number of subscribe commands sent.
    pub fn on_open(&self, wire: &dyn WireSink) -> usize {
        let mut state = self.state.lock();
        let initial = std::mem::take(&mut state.initial);
        let mut sent = 0;

        for symbol in &initial {
            let entry = state
                .entries
                .entry(SymbolKey::canonicalize(symbol))
                .or_insert_with(|| SubscriptionEntry::new(symbol));
            if entry.flush(wire) {
                sent += 1;
            }
        }

        let mut pending: Vec<_> = state
            .entries
            .iter_mut()
            .filter(|(_, entry)| !entry.on_wire)
            .collect();
        pending.sort_by(|(a, _), (b, _)| a.cmp(b));
        for (_, entry) in pending {
            if entry.flush(wire) {
                sent += 1;
            }
        }

        tracing::debug!(initial = initial.len(), sent, "Flushed subscriptions on open");
        sent
    }

    /// On-close hook: the wire session ended, nothing is on the wire.
    ///
    /// Entries without a consumer came only from the one-shot initial list
    /// and are dropped, so the next OPEN does not subscribe them again.
    pub fn on_close(&self) {
        let mut state = self.state.lock();
        state.entries.retain(|key, entry| {
            if !entry.has_consumer() {
                tracing::debug!(symbol = %key, "Dropping initial-only entry");
                return false;
            }
            entry.on_wire = false;
            true
        });
    }

    /// Drop all entries, the initial list and all cached data.
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.entries.clear();
        state.initial.clear();
        self.reconciler.clear_all();
    }

    /// Run `f` with the consumer for `symbol` while holding the registry
    /// lock. Returns `None` when no consumer is registered.
    pub fn dispatch<R>(
        &self,
        symbol: &SymbolKey,
        f: impl FnOnce(&TickConsumer) -> R,
    ) -> Option<R> {
        let state = self.state.lock();
        state
            .entries
            .get(symbol)
            .and_then(|entry| entry.consumer.as_ref())
            .map(f)
    }

    /// Additional receiver for an existing consumer.
    #[must_use]
    pub fn receiver(&self, symbol: &str) -> Option<broadcast::Receiver<TickUpdate>> {
        self.state
            .lock()
            .entries
            .get(&SymbolKey::canonicalize(symbol))
            .and_then(|entry| entry.consumer.as_ref())
            .map(broadcast::Sender::subscribe)
    }

    /// Whether a symbol is marked subscribed on the wire.
    #[must_use]
    pub fn is_subscribed_on_wire(&self, symbol: &str) -> bool {
        self.state
            .lock()
            .entries
            .get(&SymbolKey::canonicalize(symbol))
            .is_some_and(SubscriptionEntry::is_subscribed_on_wire)
    }

    /// Whether a local consumer is registered for a symbol.
    #[must_use]
    pub fn has_consumer(&self, symbol: &str) -> bool {
        self.state
            .lock()
            .entries
            .get(&SymbolKey::canonicalize(symbol))
            .is_some_and(SubscriptionEntry::has_consumer)
    }

    /// Registered symbols not yet subscribed on the wire, sorted.
    #[must_use]
    pub fn pending_symbols(&self) -> Vec<SymbolKey> {
        let mut pending: Vec<_> = self
            .state
            .lock()
            .entries
            .iter()
            .filter(|(_, entry)| !entry.on_wire)
            .map(|(key, _)| key.clone())
            .collect();
        pending.sort();
        pending
    }

    /// Current statistics.
    #[must_use]
    pub fn stats(&self) -> RegistryStats {
        let state = self.state.lock();
        RegistryStats {
            symbols: state.entries.len(),
            on_wire: state.entries.values().filter(|e| e.on_wire).count(),
            consumers: state.entries.values().filter(|e| e.has_consumer()).count(),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use mockall::predicate::eq;

    use super::*;
    use crate::domain::streaming::Tick;

    fn registry() -> SubscriptionRegistry {
        SubscriptionRegistry::new(Arc::new(StreamReconciler::default()), 16)
    }

    fn open_wire() -> MockWireSink {
        let mut wire = MockWireSink::new();
        wire.expect_is_open().return_const(true);
        wire
    }

    fn closed_wire() -> MockWireSink {
        let mut wire = MockWireSink::new();
        wire.expect_is_open().return_const(false);
        wire
    }

    #[test]
    fn subscribe_while_open_sends_once_per_session() {
        let registry = registry();
        let mut wire = open_wire();
        wire.expect_send()
            .with(eq(WireCommand::Subscribe("AAPL".to_string())))
            .times(1)
            .return_const(true);

        let _rx1 = registry.subscribe("AAPL", &wire);
        let _rx2 = registry.subscribe("AAPL", &wire);
        let _rx3 = registry.subscribe("AAPL", &wire);

        assert!(registry.is_subscribed_on_wire("AAPL"));
        assert_eq!(registry.stats().consumers, 1);
    }

    #[test]
    fn subscribe_while_closed_registers_locally() {
        let registry = registry();
        let wire = closed_wire();

        let _rx = registry.subscribe("MSFT", &wire);

        assert!(registry.has_consumer("MSFT"));
        assert!(!registry.is_subscribed_on_wire("MSFT"));
        assert_eq!(registry.pending_symbols(), vec![SymbolKey::canonicalize("MSFT")]);
    }

    #[test]
    fn failed_send_leaves_symbol_pending() {
        let registry = registry();
        let mut wire = open_wire();
        wire.expect_send().times(1).return_const(false);

        let _rx = registry.subscribe("AAPL", &wire);

        assert!(!registry.is_subscribed_on_wire("AAPL"));
    }

    #[test]
    fn resubscribe_replaces_consumer_and_closes_old_receiver() {
        let registry = registry();
        let wire = closed_wire();

        let mut old_rx = registry.subscribe("AAPL", &wire);
        let _new_rx = registry.subscribe("AAPL", &wire);

        assert!(matches!(
            old_rx.try_recv(),
            Err(broadcast::error::TryRecvError::Closed)
        ));
    }

    #[test]
    fn unsubscribe_sends_wire_command_when_on_wire() {
        let registry = registry();
        let mut wire = open_wire();
        wire.expect_send()
            .with(eq(WireCommand::Subscribe("BINANCE:BTCUSDT".to_string())))
            .times(1)
            .return_const(true);
        wire.expect_send()
            .with(eq(WireCommand::Unsubscribe("BINANCE:BTCUSDT".to_string())))
            .times(1)
            .return_const(true);

        let _rx = registry.subscribe("BINANCE:BTCUSDT", &wire);
        assert!(registry.unsubscribe("BINANCE:BTCUSDT", &wire));

        assert!(!registry.has_consumer("BTCUSDT"));
        assert_eq!(registry.stats(), RegistryStats::default());
    }

    #[test]
    fn unsubscribe_pending_symbol_sends_nothing() {
        let registry = registry();
        let wire = closed_wire();

        let _rx = registry.subscribe("AAPL", &wire);

        assert!(registry.unsubscribe("AAPL", &wire));
        assert!(!registry.unsubscribe("AAPL", &wire));
    }

    #[test]
    fn unsubscribe_clears_cached_data() {
        let registry = registry();
        let wire = closed_wire();
        let _rx = registry.subscribe("AAPL", &wire);
        let key = SymbolKey::canonicalize("AAPL");

        registry
            .reconciler()
            .handle_tick(Tick::new(key.clone(), 1.0, 1, 1.0), &registry);
        assert_eq!(registry.reconciler().history(&key).len(), 1);

        registry.unsubscribe("AAPL", &wire);
        let _rx = registry.subscribe("AAPL", &wire);

        assert!(registry.reconciler().history(&key).is_empty());
        assert!(registry.reconciler().latest(&key).is_none());
    }

    #[test]
    fn on_open_flushes_initial_list_exactly_once() {
        let registry = registry();
        registry.set_initial_symbols(vec!["AAPL".to_string(), "MSFT".to_string()]);

        let mut wire = open_wire();
        wire.expect_send()
            .with(eq(WireCommand::Subscribe("AAPL".to_string())))
            .times(1)
            .return_const(true);
        wire.expect_send()
            .with(eq(WireCommand::Subscribe("MSFT".to_string())))
            .times(1)
            .return_const(true);

        assert_eq!(registry.on_open(&wire), 2);
        // Same session, nothing pending.
        assert_eq!(registry.on_open(&wire), 0);
        // Initial entries exist without consumers; ticks for them are dropped.
        assert!(!registry.has_consumer("AAPL"));
        assert!(registry.is_subscribed_on_wire("AAPL"));
    }

    #[test]
    fn on_open_flushes_pending_after_reconnect() {
        let registry = registry();
        let _rx = registry.subscribe("AAPL", &closed_wire());

        let mut wire = open_wire();
        wire.expect_send()
            .with(eq(WireCommand::Subscribe("AAPL".to_string())))
            .times(2)
            .return_const(true);

        assert_eq!(registry.on_open(&wire), 1);
        registry.on_close();
        assert!(!registry.is_subscribed_on_wire("AAPL"));
        assert_eq!(registry.on_open(&wire), 1);
    }

    #[test]
    fn initial_only_symbol_is_not_resent_after_reconnect() {
        let registry = registry();
        registry.set_initial_symbols(vec!["AAPL".to_string()]);
        let _rx = registry.subscribe("MSFT", &closed_wire());

        let mut wire = open_wire();
        wire.expect_send()
            .with(eq(WireCommand::Subscribe("AAPL".to_string())))
            .times(1)
            .return_const(true);
        wire.expect_send()
            .with(eq(WireCommand::Subscribe("MSFT".to_string())))
            .times(2)
            .return_const(true);

        assert_eq!(registry.on_open(&wire), 2);
        registry.on_close();
        assert_eq!(registry.stats().symbols, 1);
        assert_eq!(registry.on_open(&wire), 1);
        assert!(!registry.is_subscribed_on_wire("AAPL"));
    }

    #[test]
    fn initial_only_symbol_alone_sends_nothing_next_session() {
        let registry = registry();
        registry.set_initial_symbols(vec!["AAPL".to_string()]);
        let mut wire = open_wire();
        wire.expect_send().times(1).return_const(true);

        assert_eq!(registry.on_open(&wire), 1);
        registry.on_close();
        assert_eq!(registry.on_open(&wire), 0);
    }

    #[test]
    fn subscribe_after_initial_flush_does_not_resend() {
        let registry = registry();
        registry.set_initial_symbols(vec!["AAPL".to_string()]);
        let mut wire = open_wire();
        wire.expect_send().times(1).return_const(true);

        registry.on_open(&wire);
        let _rx = registry.subscribe("AAPL", &wire);

        assert!(registry.has_consumer("AAPL"));
    }

    #[test]
    fn clear_drops_everything() {
        let registry = registry();
        registry.set_initial_symbols(vec!["AAPL".to_string()]);
        let _rx = registry.subscribe("MSFT", &closed_wire());

        registry.clear();

        assert_eq!(registry.stats(), RegistryStats::default());
        let wire = open_wire();
        assert_eq!(registry.on_open(&wire), 0);
    }

    #[test]
    fn receiver_for_unknown_symbol_is_none() {
        let registry = registry();
        assert!(registry.receiver("AAPL").is_none());
        let _rx = registry.subscribe("AAPL", &closed_wire());
        assert!(registry.receiver("AAPL").is_some());
    }

    #[test]
    fn wire_command_accessors() {
        let cmd = WireCommand::Unsubscribe("AAPL".to_string());
        assert_eq!(cmd.symbol(), "AAPL");
        assert_eq!(cmd.kind(), "unsubscribe");
        assert_eq!(WireCommand::Subscribe("X".to_string()).kind(), "subscribe");
    }

    #[test]
    fn thread_safety_concurrent_subscriptions() {
        use std::thread;

        let registry = Arc::new(registry());
        let mut handles = vec![];

        for i in 0..10 {
            let r = Arc::clone(&registry);
            handles.push(thread::spawn(move || {
                let wire = closed_wire();
                let _rx = r.subscribe(&format!("SYM{i}"), &wire);
                let _shared = r.subscribe("SHARED", &wire);
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(registry.stats().symbols, 11);
    }
}
