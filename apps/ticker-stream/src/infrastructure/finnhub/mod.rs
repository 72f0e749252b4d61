//! Finnhub Adapters
//!
//! - **Stream**: WebSocket trade stream client (JSON codec)
//! - **Search**: REST symbol lookup

pub mod client;
pub mod codec;
pub mod messages;
pub mod reconnect;
pub mod search;

pub use client::{StreamClient, StreamClientConfig, StreamStats, WireHandle};
pub use codec::{CodecError, JsonCodec};
pub use messages::{ClientMessage, ServerMessage, TradeRecord};
pub use reconnect::{ReconnectConfig, ReconnectPolicy};
pub use search::FinnhubSearch;
