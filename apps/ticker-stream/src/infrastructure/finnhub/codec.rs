//! Stream Codec
//!
//! Decodes Finnhub text frames into [`ServerMessage`]s. Every frame is a
//! single JSON object whose `type` field selects the payload shape.
//!
//! ```json
//! {"type":"trade","data":[{"p":100,"s":"BINANCE:BTCUSDT","t":1000,"v":1}]}
//! ```

use serde_json::Value;

use super::messages::{ServerMessage, TradeRecord};

/// Codec errors.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// JSON decoding failed.
    #[error("JSON codec error: {0}")]
    Json(#[from] serde_json::Error),

    /// Well-formed JSON with the wrong shape.
    #[error("invalid message format: {0}")]
    InvalidFormat(String),
}

/// JSON codec for the trade stream.
#[derive(Debug, Default, Clone)]
pub struct JsonCodec;

impl JsonCodec {
    /// Create a new JSON codec.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Decode a text frame.
    ///
    /// Unknown envelope types decode to [`ServerMessage::Other`].
    ///
    /// # Errors
    ///
    /// Returns an error if the frame is not JSON, is not an object with a
    /// string `type`, or a `trade` frame's `data` is present but not a list
    /// of records. A `trade` frame with missing or null `data` decodes to an
    /// empty batch.
    pub fn decode(&self, text: &str) -> Result<ServerMessage, CodecError> {
        let mut value: Value = serde_json::from_str(text.trim())?;

        let kind = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                CodecError::InvalidFormat(format!("missing type field: {}", preview(text)))
            })?
            .to_string();

        match kind.as_str() {
            "trade" => match value.get_mut("data").map(Value::take) {
                // Frames without a payload carry nothing to dispatch.
                None | Some(Value::Null) => Ok(ServerMessage::Trades(Vec::new())),
                Some(data) => {
                    let records: Vec<TradeRecord> = serde_json::from_value(data)?;
                    Ok(ServerMessage::Trades(records))
                }
            },
            "ping" => Ok(ServerMessage::Ping),
            "error" => {
                let msg = value
                    .get("msg")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                Ok(ServerMessage::Error(msg))
            }
            _ => Ok(ServerMessage::Other(kind)),
        }
    }
}

fn preview(text: &str) -> &str {
    let end = text
        .char_indices()
        .nth(50)
        .map_or(text.len(), |(idx, _)| idx);
    &text[..end]
}
