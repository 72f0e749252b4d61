//! Market Data Streaming Types
//!
//! Core domain types for the trade stream: ticks, canonical symbol keys,
//! derived price deltas and the transport connection state. These types are
//! codec-agnostic; the Finnhub adapter maps wire records into them.

use std::fmt;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// Symbol Key
// =============================================================================

/// Canonical ticker identifier used for every local lookup.
///
/// Raw stream symbols may carry an exchange namespace (`BINANCE:BTCUSDT`);
/// the key is the bare ticker after that prefix is stripped.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SymbolKey(String);

impl SymbolKey {
    /// Canonicalize a raw stream symbol.
    ///
    /// `EXCHANGE:TICKER` becomes `TICKER`; a symbol without a prefix is kept
    /// as-is.
    #[must_use]
    pub fn canonicalize(raw: &str) -> Self {
        let bare = raw.split_once(':').map_or(raw, |(_, ticker)| ticker);
        Self(bare.to_string())
    }

    /// Get the key as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SymbolKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SymbolKey {
    fn from(raw: &str) -> Self {
        Self::canonicalize(raw)
    }
}

// =============================================================================
// Tick
// =============================================================================

/// One timestamped price/volume observation for a symbol.
///
/// Immutable once decoded; produced only by the stream codec.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tick {
    /// Canonical symbol.
    pub symbol: SymbolKey,
    /// Trade price.
    pub price: f64,
    /// Exchange timestamp in milliseconds since the Unix epoch.
    pub timestamp_ms: i64,
    /// Trade volume.
    pub volume: f64,
}

impl Tick {
    /// Create a tick for a canonical symbol.
    #[must_use]
    pub const fn new(symbol: SymbolKey, price: f64, timestamp_ms: i64, volume: f64) -> Self {
        Self {
            symbol,
            price,
            timestamp_ms,
            volume,
        }
    }

    /// Exchange timestamp as a UTC datetime.
    ///
    /// Out-of-range timestamps collapse to the Unix epoch.
    #[must_use]
    pub fn timestamp(&self) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(self.timestamp_ms)
            .single()
            .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
    }
}

// =============================================================================
// Derived Values
// =============================================================================

/// Change of a tick's price relative to the previous tick of the same symbol.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PriceDelta {
    /// Absolute price change.
    pub change: f64,
    /// Change as a percentage of the previous price.
    pub change_percent: f64,
}

impl PriceDelta {
    /// Compute the delta from an optional previous price.
    ///
    /// Both fields are zero when there is no previous price, or when the
    /// previous price is zero.
    #[must_use]
    pub fn between(previous: Option<f64>, current: f64) -> Self {
        match previous {
            Some(prev) if prev != 0.0 => {
                let change = current - prev;
                Self {
                    change,
                    change_percent: change / prev * 100.0,
                }
            }
            _ => Self::default(),
        }
    }
}

/// A tick together with its derived delta, as delivered to consumers.
#[derive(Debug, Clone, PartialEq)]
pub struct TickUpdate {
    /// The new tick.
    pub tick: Tick,
    /// Change relative to the previous tick for the symbol.
    pub delta: PriceDelta,
}

/// Renderer-facing projection of the latest state of one symbol.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QuoteView {
    /// Canonical symbol.
    pub symbol: SymbolKey,
    /// Latest trade price.
    pub current_price: f64,
    /// Absolute change from the previous trade.
    pub change: f64,
    /// Percent change from the previous trade.
    pub change_percent: f64,
    /// Latest trade volume.
    pub volume: f64,
    /// Time of the latest trade.
    pub last_update: DateTime<Utc>,
}

impl From<&TickUpdate> for QuoteView {
    fn from(update: &TickUpdate) -> Self {
        Self {
            symbol: update.tick.symbol.clone(),
            current_price: update.tick.price,
            change: update.delta.change,
            change_percent: update.delta.change_percent,
            volume: update.tick.volume,
            last_update: update.tick.timestamp(),
        }
    }
}

/// Format a number with a compact `K`/`M` suffix and two decimals.
#[must_use]
pub fn format_compact(value: f64) -> String {
    if value >= 1_000_000.0 {
        format!("{:.2}M", value / 1_000_000.0)
    } else if value >= 1_000.0 {
        format!("{:.2}K", value / 1_000.0)
    } else {
        format!("{value:.2}")
    }
}

// =============================================================================
// Connection State
// =============================================================================

/// State of the streaming transport.
///
/// Owned by the connection manager; every other component only reads it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionState {
    /// No transport exists.
    #[default]
    Closed,
    /// Transport handshake in progress.
    Connecting,
    /// Transport is open; wire commands may be sent.
    Open,
    /// Transport is shutting down.
    Closing,
}

impl ConnectionState {
    /// Check if the transport is open.
    #[must_use]
    pub const fn is_open(self) -> bool {
        matches!(self, Self::Open)
    }

    /// Get the state name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Closed => "CLOSED",
            Self::Connecting => "CONNECTING",
            Self::Open => "OPEN",
            Self::Closing => "CLOSING",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    #[test_case("BINANCE:BTCUSDT", "BTCUSDT" ; "exchange prefix stripped")]
    #[test_case("AAPL", "AAPL" ; "bare ticker kept")]
    #[test_case("OANDA:EUR_USD", "EUR_USD" ; "underscore ticker")]
    #[test_case(":MSFT", "MSFT" ; "empty prefix")]
    fn canonicalize(raw: &str, expected: &str) {
        assert_eq!(SymbolKey::canonicalize(raw).as_str(), expected);
    }

    #[test]
    fn delta_without_previous_is_zero() {
        let delta = PriceDelta::between(None, 100.0);
        assert_eq!(delta, PriceDelta::default());
    }

    #[test]
    fn delta_against_previous_price() {
        let delta = PriceDelta::between(Some(100.0), 105.0);
        assert!((delta.change - 5.0).abs() < f64::EPSILON);
        assert!((delta.change_percent - 5.0).abs() < 1e-9);
    }

    #[test]
    fn delta_against_zero_previous_is_zero() {
        assert_eq!(PriceDelta::between(Some(0.0), 10.0), PriceDelta::default());
    }

    #[test]
    fn tick_timestamp_conversion() {
        let tick = Tick::new(SymbolKey::canonicalize("AAPL"), 1.0, 1_700_000_000_000, 1.0);
        assert_eq!(tick.timestamp().timestamp_millis(), 1_700_000_000_000);
    }

    #[test_case(999.0, "999.00")]
    #[test_case(1_500.0, "1.50K")]
    #[test_case(2_345_678.0, "2.35M")]
    fn compact_formatting(value: f64, expected: &str) {
        assert_eq!(format_compact(value), expected);
    }

    #[test]
    fn connection_state_names() {
        assert_eq!(ConnectionState::default(), ConnectionState::Closed);
        assert!(ConnectionState::Open.is_open());
        assert!(!ConnectionState::Connecting.is_open());
        assert_eq!(ConnectionState::Closing.to_string(), "CLOSING");
    }

    #[test]
    fn quote_view_from_update() {
        let update = TickUpdate {
            tick: Tick::new(SymbolKey::canonicalize("AAPL"), 105.0, 2_000, 2.0),
            delta: PriceDelta::between(Some(100.0), 105.0),
        };
        let view = QuoteView::from(&update);
        assert_eq!(view.symbol.as_str(), "AAPL");
        assert!((view.change - 5.0).abs() < f64::EPSILON);
        assert_eq!(view.last_update.timestamp_millis(), 2_000);
    }
}
