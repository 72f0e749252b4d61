//! Stream Lifecycle Integration Tests
//!
//! Drives the watch-set controller and stream client against an in-process
//! WebSocket feed that records client frames and pushes trade payloads.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::float_cmp)]

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;

use ticker_stream::application::ports::KeyValueStore;
use ticker_stream::infrastructure::finnhub::ReconnectConfig;
use ticker_stream::infrastructure::storage::{FileStore, MemoryStore};
use ticker_stream::{
    AddStatus, ConnectionState, StreamClient, StreamClientConfig, StreamError, StreamEvent,
    TickUpdate, WatchSet, WatchSetController, WatchSetError,
};

const WAIT: Duration = Duration::from_secs(5);
const QUIET: Duration = Duration::from_millis(200);

// =============================================================================
// Mock Feed
// =============================================================================

struct MockFeed {
    url: String,
    connections: mpsc::UnboundedReceiver<FeedConnection>,
}

struct FeedConnection {
    frames: mpsc::UnboundedReceiver<String>,
    push: mpsc::UnboundedSender<Message>,
}

impl MockFeed {
    async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        let (conn_tx, connections) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                let Ok(ws) = tokio_tungstenite::accept_async(socket).await else {
                    continue;
                };
                let (frames_tx, frames) = mpsc::unbounded_channel();
                let (push, mut push_rx) = mpsc::unbounded_channel::<Message>();
                if conn_tx.send(FeedConnection { frames, push }).is_err() {
                    return;
                }

                tokio::spawn(async move {
                    let (mut write, mut read) = ws.split();
                    loop {
                        tokio::select! {
                            outgoing = push_rx.recv() => match outgoing {
                                Some(msg) => {
                                    if write.send(msg).await.is_err() {
                                        return;
                                    }
                                }
                                None => {
                                    let _ = write.send(Message::Close(None)).await;
                                    return;
                                }
                            },
                            incoming = read.next() => match incoming {
                                Some(Ok(Message::Text(text))) => {
                                    let _ = frames_tx.send(text.as_str().to_owned());
                                }
                                Some(Ok(Message::Close(_)) | Err(_)) | None => return,
                                Some(Ok(_)) => {}
                            },
                        }
                    }
                });
            }
        });

        Self { url, connections }
    }

    async fn next_connection(&mut self) -> FeedConnection {
        timeout(WAIT, self.connections.recv())
            .await
            .expect("client did not connect")
            .unwrap()
    }

    async fn assert_no_connection(&mut self) {
        assert!(
            timeout(QUIET, self.connections.recv()).await.is_err(),
            "unexpected connection attempt"
        );
    }
}

impl FeedConnection {
    async fn next_frame(&mut self) -> Value {
        let text = timeout(WAIT, self.frames.recv())
            .await
            .expect("no frame received")
            .expect("connection closed");
        serde_json::from_str(&text).unwrap()
    }

    async fn frames(&mut self, count: usize) -> Vec<Value> {
        let mut frames = Vec::with_capacity(count);
        for _ in 0..count {
            frames.push(self.next_frame().await);
        }
        frames
    }

    async fn assert_quiet(&mut self) {
        if let Ok(Some(frame)) = timeout(QUIET, self.frames.recv()).await {
            panic!("unexpected frame: {frame}");
        }
    }

    fn send_text(&self, text: &str) {
        self.push.send(Message::Text(text.to_owned().into())).unwrap();
    }

    fn send_trade(&self, symbol: &str, price: f64, timestamp_ms: i64, volume: f64) {
        let payload = json!({
            "type": "trade",
            "data": [{ "p": price, "s": symbol, "t": timestamp_ms, "v": volume }]
        });
        self.send_text(&payload.to_string());
    }

    /// Wait until the client side has closed the socket.
    async fn closed(mut self) {
        timeout(WAIT, async { while self.frames.recv().await.is_some() {} })
            .await
            .expect("connection still open");
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn subscribe(symbol: &str) -> Value {
    json!({ "type": "subscribe", "symbol": symbol })
}

fn unsubscribe(symbol: &str) -> Value {
    json!({ "type": "unsubscribe", "symbol": symbol })
}

fn fast_reconnect(max_attempts: u32) -> ReconnectConfig {
    ReconnectConfig {
        initial_delay: Duration::from_millis(20),
        max_delay: Duration::from_millis(50),
        multiplier: 2.0,
        jitter_factor: 0.0,
        max_attempts,
    }
}

fn controller_with_store(
    feed: &MockFeed,
    store: Arc<dyn KeyValueStore>,
    symbols: &[&str],
) -> WatchSetController {
    let config = StreamClientConfig::new(feed.url.clone()).with_reconnect(fast_reconnect(5));
    let client = Arc::new(StreamClient::new(config));
    WatchSetController::new(client, store, &WatchSet::from_symbols(symbols.iter().copied()))
}

fn controller(feed: &MockFeed, symbols: &[&str]) -> WatchSetController {
    controller_with_store(feed, Arc::new(MemoryStore::new()), symbols)
}

async fn next_update(rx: &mut broadcast::Receiver<TickUpdate>) -> TickUpdate {
    timeout(WAIT, rx.recv())
        .await
        .expect("no update received")
        .unwrap()
}

async fn wait_for_event(
    events: &mut broadcast::Receiver<StreamEvent>,
    matches: impl Fn(&StreamEvent) -> bool,
) -> StreamEvent {
    timeout(WAIT, async {
        loop {
            if let Ok(event) = events.recv().await
                && matches(&event)
            {
                return event;
            }
        }
    })
    .await
    .expect("event not observed")
}

// =============================================================================
// Tests
// =============================================================================

#[tokio::test]
async fn connect_subscribes_watch_set_once() {
    let mut feed = MockFeed::start().await;
    let controller = controller(&feed, &["AAPL", "MSFT"]);

    controller.connect().await.unwrap();
    let mut conn = feed.next_connection().await;

    assert_eq!(controller.connection_state(), ConnectionState::Open);
    assert_eq!(
        conn.frames(2).await,
        vec![subscribe("AAPL"), subscribe("MSFT")]
    );

    assert!(matches!(
        controller.add_symbol("AAPL"),
        Err(WatchSetError::DuplicateSymbol(_))
    ));
    conn.assert_quiet().await;

    controller.disconnect().await;
}

#[tokio::test]
async fn second_connect_while_open_is_rejected() {
    let mut feed = MockFeed::start().await;
    let controller = controller(&feed, &["AAPL"]);

    controller.connect().await.unwrap();
    let mut conn = feed.next_connection().await;
    assert_eq!(conn.next_frame().await, subscribe("AAPL"));

    assert!(matches!(
        controller.connect().await,
        Err(StreamError::AlreadyConnected)
    ));
    assert_eq!(controller.connection_state(), ConnectionState::Open);
    feed.assert_no_connection().await;
    conn.assert_quiet().await;

    controller.disconnect().await;
}

#[tokio::test]
async fn add_symbol_subscribes_on_open_transport() {
    let mut feed = MockFeed::start().await;
    let controller = controller(&feed, &["AAPL"]);

    controller.connect().await.unwrap();
    let mut conn = feed.next_connection().await;
    assert_eq!(conn.next_frame().await, subscribe("AAPL"));

    assert_eq!(controller.add_symbol("TSLA").unwrap(), AddStatus::Subscribed);
    assert_eq!(conn.next_frame().await, subscribe("TSLA"));
    assert_eq!(controller.symbols(), vec!["AAPL", "TSLA"]);

    controller.disconnect().await;
}

#[tokio::test]
async fn namespaced_symbol_routes_and_tracks_delta() {
    let mut feed = MockFeed::start().await;
    let controller = controller(&feed, &["BINANCE:BTCUSDT"]);

    controller.connect().await.unwrap();
    let mut conn = feed.next_connection().await;
    assert_eq!(conn.next_frame().await, subscribe("BINANCE:BTCUSDT"));

    let mut updates = controller.updates("BINANCE:BTCUSDT").unwrap();

    conn.send_trade("BINANCE:BTCUSDT", 100.0, 1_700_000_000_000, 0.5);
    let first = next_update(&mut updates).await;
    assert_eq!(first.tick.symbol.as_str(), "BTCUSDT");
    assert_eq!(first.delta.change, 0.0);
    assert_eq!(first.delta.change_percent, 0.0);

    conn.send_trade("BINANCE:BTCUSDT", 105.0, 1_700_000_001_000, 0.25);
    let second = next_update(&mut updates).await;
    assert_eq!(second.delta.change, 5.0);
    assert_eq!(second.delta.change_percent, 5.0);

    let snapshot = controller.snapshot("BTCUSDT");
    assert_eq!(snapshot.history.len(), 2);
    assert_eq!(snapshot.latest.unwrap().price, 105.0);

    let quote = controller.quote("BINANCE:BTCUSDT").unwrap();
    assert_eq!(quote.current_price, 105.0);
    assert_eq!(quote.change, 5.0);
    assert_eq!(quote.volume, 0.25);

    controller.disconnect().await;
}

#[tokio::test]
async fn bare_subscription_receives_namespaced_trades() {
    let mut feed = MockFeed::start().await;
    let controller = controller(&feed, &["BTCUSDT"]);

    controller.connect().await.unwrap();
    let mut conn = feed.next_connection().await;
    assert_eq!(conn.next_frame().await, subscribe("BTCUSDT"));
    let mut updates = controller.updates("BTCUSDT").unwrap();

    conn.send_trade("BINANCE:BTCUSDT", 100.0, 1000, 1.0);
    assert_eq!(next_update(&mut updates).await.delta.change, 0.0);
    conn.send_trade("BINANCE:BTCUSDT", 105.0, 2000, 2.0);
    let update = next_update(&mut updates).await;
    assert_eq!(update.delta.change, 5.0);
    assert_eq!(update.delta.change_percent, 5.0);
    assert_eq!(controller.snapshot("BTCUSDT").history.len(), 2);

    controller.disconnect().await;
}

#[tokio::test]
async fn remove_symbol_unsubscribes_and_drops_data() {
    let mut feed = MockFeed::start().await;
    let controller = controller(&feed, &["AAPL", "MSFT"]);

    controller.connect().await.unwrap();
    let mut conn = feed.next_connection().await;
    conn.frames(2).await;

    let mut aapl = controller.updates("AAPL").unwrap();
    let mut msft = controller.updates("MSFT").unwrap();
    conn.send_trade("AAPL", 190.0, 1, 10.0);
    next_update(&mut aapl).await;

    controller.remove_symbol("AAPL").unwrap();
    assert_eq!(conn.next_frame().await, unsubscribe("AAPL"));
    assert!(controller.snapshot("AAPL").latest.is_none());
    assert!(controller.snapshot("AAPL").history.is_empty());

    // Late ticks for the removed symbol are discarded.
    conn.send_trade("AAPL", 191.0, 2, 10.0);
    conn.send_trade("MSFT", 420.0, 3, 5.0);
    next_update(&mut msft).await;
    assert!(controller.snapshot("AAPL").latest.is_none());
    assert_eq!(controller.symbols(), vec!["MSFT"]);

    controller.disconnect().await;
}

#[tokio::test]
async fn malformed_payload_keeps_connection_open() {
    let mut feed = MockFeed::start().await;
    let controller = controller(&feed, &["AAPL"]);
    let mut events = controller.events();

    controller.connect().await.unwrap();
    let mut conn = feed.next_connection().await;
    conn.next_frame().await;
    let mut updates = controller.updates("AAPL").unwrap();

    conn.send_text("{not json");
    wait_for_event(&mut events, |e| matches!(e, StreamEvent::DecodeFailed { .. })).await;

    conn.send_trade("AAPL", 190.5, 1, 1.0);
    assert_eq!(next_update(&mut updates).await.tick.price, 190.5);
    assert_eq!(controller.connection_state(), ConnectionState::Open);

    controller.disconnect().await;
}

#[tokio::test]
async fn trade_frame_without_data_is_ignored_quietly() {
    let mut feed = MockFeed::start().await;
    let controller = controller(&feed, &["AAPL"]);
    let mut events = controller.events();

    controller.connect().await.unwrap();
    let mut conn = feed.next_connection().await;
    conn.next_frame().await;
    let mut updates = controller.updates("AAPL").unwrap();

    conn.send_text(r#"{"type":"trade","data":null}"#);
    conn.send_text(r#"{"type":"trade"}"#);
    conn.send_trade("AAPL", 190.5, 1, 1.0);
    assert_eq!(next_update(&mut updates).await.tick.price, 190.5);

    while let Ok(event) = events.try_recv() {
        assert!(
            !matches!(event, StreamEvent::DecodeFailed { .. }),
            "unexpected {event:?}"
        );
    }
    assert_eq!(controller.snapshot("AAPL").history.len(), 1);

    controller.disconnect().await;
}

#[tokio::test]
async fn server_close_triggers_reconnect_and_resubscribe() {
    let mut feed = MockFeed::start().await;
    let controller = controller(&feed, &["AAPL", "MSFT"]);
    let mut events = controller.events();

    controller.connect().await.unwrap();
    let mut first = feed.next_connection().await;
    first.frames(2).await;
    let mut updates = controller.updates("MSFT").unwrap();

    drop(first.push);
    wait_for_event(&mut events, |e| *e == StreamEvent::Disconnected).await;
    wait_for_event(&mut events, |e| {
        matches!(e, StreamEvent::Reconnecting { attempt: 1, .. })
    })
    .await;

    let mut second = feed.next_connection().await;
    wait_for_event(&mut events, |e| *e == StreamEvent::Connected).await;
    assert_eq!(
        second.frames(2).await,
        vec![subscribe("AAPL"), subscribe("MSFT")]
    );

    // The consumer registered before the drop keeps receiving.
    second.send_trade("MSFT", 421.0, 10, 1.0);
    assert_eq!(next_update(&mut updates).await.tick.price, 421.0);

    controller.disconnect().await;
}

#[tokio::test]
async fn disconnect_suppresses_reconnect() {
    let mut feed = MockFeed::start().await;
    let controller = controller(&feed, &["AAPL"]);

    controller.connect().await.unwrap();
    let mut conn = feed.next_connection().await;
    conn.next_frame().await;

    controller.disconnect().await;
    assert_eq!(controller.connection_state(), ConnectionState::Closed);
    assert!(controller.updates("AAPL").is_none());
    conn.closed().await;

    feed.assert_no_connection().await;
}

#[tokio::test]
async fn remove_while_closed_reports_not_connected() {
    let feed = MockFeed::start().await;
    let controller = controller(&feed, &["AAPL", "MSFT"]);

    assert!(matches!(
        controller.remove_symbol("MSFT"),
        Err(WatchSetError::NotConnected(_))
    ));
    assert_eq!(controller.symbols(), vec!["AAPL"]);
    assert!(matches!(
        controller.remove_symbol("MSFT"),
        Err(WatchSetError::UnknownSymbol(_))
    ));
}

#[tokio::test]
async fn watch_list_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let mut feed = MockFeed::start().await;

    {
        let store = Arc::new(FileStore::open(dir.path()).unwrap());
        let controller = controller_with_store(&feed, store, &["AAPL"]);
        controller.connect().await.unwrap();
        let mut conn = feed.next_connection().await;
        conn.next_frame().await;

        assert_eq!(controller.add_symbol("NVDA").unwrap(), AddStatus::Subscribed);
        controller.disconnect().await;
    }

    let store = Arc::new(FileStore::open(dir.path()).unwrap());
    let restored = controller_with_store(&feed, store, &["AAPL"]);
    assert_eq!(restored.symbols(), vec!["AAPL", "NVDA"]);

    restored.connect().await.unwrap();
    let mut conn = feed.next_connection().await;
    assert_eq!(
        conn.frames(2).await,
        vec![subscribe("AAPL"), subscribe("NVDA")]
    );
    restored.disconnect().await;
}
