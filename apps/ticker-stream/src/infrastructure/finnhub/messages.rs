//! Finnhub Wire Messages
//!
//! Inbound frames are JSON envelopes `{"type": ..., "data": ...}`; the only
//! type carrying market data is `trade`. Outbound frames are subscribe and
//! unsubscribe commands for a single symbol.

use serde::{Deserialize, Serialize};

use crate::domain::streaming::{SymbolKey, Tick};
use crate::domain::subscription::WireCommand;

// =============================================================================
// Outbound
// =============================================================================

/// Client-to-server command frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientMessage {
    /// `{"type":"subscribe","symbol":"AAPL"}`
    Subscribe {
        /// Wire symbol.
        symbol: String,
    },
    /// `{"type":"unsubscribe","symbol":"AAPL"}`
    Unsubscribe {
        /// Wire symbol.
        symbol: String,
    },
}

impl ClientMessage {
    /// Serialize to a JSON text frame.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

impl From<&WireCommand> for ClientMessage {
    fn from(command: &WireCommand) -> Self {
        match command {
            WireCommand::Subscribe(symbol) => Self::Subscribe {
                symbol: symbol.clone(),
            },
            WireCommand::Unsubscribe(symbol) => Self::Unsubscribe {
                symbol: symbol.clone(),
            },
        }
    }
}

// =============================================================================
// Inbound
// =============================================================================

/// One raw trade record inside a `trade` envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    /// Price.
    #[serde(rename = "p")]
    pub price: f64,
    /// Raw symbol, possibly exchange-prefixed.
    #[serde(rename = "s")]
    pub symbol: String,
    /// Timestamp in milliseconds since the Unix epoch.
    #[serde(rename = "t")]
    pub timestamp_ms: i64,
    /// Volume.
    #[serde(rename = "v")]
    pub volume: f64,
    /// Trade conditions, when present.
    #[serde(rename = "c", default, skip_serializing_if = "Option::is_none")]
    pub conditions: Option<Vec<String>>,
}

impl TradeRecord {
    /// Convert to a domain tick, canonicalizing the symbol.
    #[must_use]
    pub fn into_tick(self) -> Tick {
        Tick::new(
            SymbolKey::canonicalize(&self.symbol),
            self.price,
            self.timestamp_ms,
            self.volume,
        )
    }
}

/// Decoded server frame.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage {
    /// Trade records in delivery order.
    Trades(Vec<TradeRecord>),
    /// Server keep-alive.
    Ping,
    /// Server-reported error.
    Error(String),
    /// Any other envelope type; ignored.
    Other(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscribe_wire_shape() {
        let json = ClientMessage::from(&WireCommand::Subscribe("BINANCE:BTCUSDT".into()))
            .to_json()
            .unwrap();
        assert_eq!(json, r#"{"type":"subscribe","symbol":"BINANCE:BTCUSDT"}"#);
    }

    #[test]
    fn unsubscribe_wire_shape() {
        let json = ClientMessage::from(&WireCommand::Unsubscribe("AAPL".into()))
            .to_json()
            .unwrap();
        assert_eq!(json, r#"{"type":"unsubscribe","symbol":"AAPL"}"#);
    }

    #[test]
    fn trade_record_into_tick() {
        let record: TradeRecord =
            serde_json::from_str(r#"{"p":100,"s":"BINANCE:BTCUSDT","t":1000,"v":1}"#).unwrap();
        let tick = record.into_tick();
        assert_eq!(tick.symbol.as_str(), "BTCUSDT");
        assert!((tick.price - 100.0).abs() < f64::EPSILON);
        assert_eq!(tick.timestamp_ms, 1000);
    }
}
