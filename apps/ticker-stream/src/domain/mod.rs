//! Domain Layer - Core streaming types and state.
//!
//! Everything here is transport-agnostic: the Finnhub adapter produces
//! ticks and drives the registry, these modules own the resulting state.

/// Ticks, symbol keys, deltas and connection state.
pub mod streaming;

/// Subscription registry and wire commands.
pub mod subscription;

/// Latest-value cache and capped history.
pub mod reconcile;

/// Watch-list and symbol validation.
pub mod watchlist;
