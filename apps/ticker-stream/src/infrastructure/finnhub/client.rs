//! Stream Client
//!
//! Owns the single WebSocket connection to the trade stream. One task per
//! `connect()` call runs the connection loop:
//!
//! ```text
//! CLOSED ─connect()─► CONNECTING ─open─► OPEN ─close/error─► CLOSED
//!                          ▲                                   │
//!                          └──────── backoff (≤ max attempts) ─┘
//! ```
//!
//! The task is the only code touching the socket. Registry calls reach it
//! through [`WireHandle`], which queues commands only while the state is
//! OPEN. `disconnect()` cancels the task, which also cancels any pending
//! backoff sleep.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Instant;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use super::codec::JsonCodec;
use super::messages::{ClientMessage, ServerMessage};
use super::reconnect::{ReconnectConfig, ReconnectPolicy};
use crate::application::ports::{MarketStream, StreamError, StreamEvent};
use crate::domain::reconcile::StreamReconciler;
use crate::domain::streaming::ConnectionState;
use crate::domain::subscription::{SubscriptionRegistry, WireCommand, WireSink};
use crate::infrastructure::metrics::{self, TickOutcome};

const EVENT_CHANNEL_CAPACITY: usize = 64;

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the stream client.
#[derive(Debug, Clone)]
pub struct StreamClientConfig {
    /// Full WebSocket URL, token included.
    pub url: String,
    /// Reconnection configuration.
    pub reconnect: ReconnectConfig,
    /// Ticks retained per symbol.
    pub history_limit: usize,
    /// Undelivered updates buffered per symbol consumer.
    pub channel_capacity: usize,
}

impl StreamClientConfig {
    /// Create a configuration with default reconnect and buffer settings.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        let settings = crate::StreamSettings::default();
        Self {
            url: url.into(),
            reconnect: ReconnectConfig::from_stream_settings(&settings),
            history_limit: settings.history_limit,
            channel_capacity: settings.channel_capacity,
        }
    }

    /// Create a configuration from stream settings.
    #[must_use]
    pub fn from_settings(url: impl Into<String>, settings: &crate::StreamSettings) -> Self {
        Self {
            url: url.into(),
            reconnect: ReconnectConfig::from_stream_settings(settings),
            history_limit: settings.history_limit,
            channel_capacity: settings.channel_capacity,
        }
    }

    /// Override the reconnect configuration.
    #[must_use]
    pub fn with_reconnect(mut self, reconnect: ReconnectConfig) -> Self {
        self.reconnect = reconnect;
        self
    }
}

// =============================================================================
// Wire Handle
// =============================================================================

/// Outbound side of the connection as seen by the registry.
#[derive(Debug)]
pub struct WireHandle {
    state: watch::Sender<ConnectionState>,
    outbound: Mutex<Option<mpsc::UnboundedSender<WireCommand>>>,
}

impl WireHandle {
    fn new() -> Self {
        Self {
            state: watch::channel(ConnectionState::Closed).0,
            outbound: Mutex::new(None),
        }
    }

    fn set_state(&self, next: ConnectionState) {
        let changed = self.state.send_if_modified(|state| {
            if *state == next {
                return false;
            }
            *state = next;
            true
        });
        if changed {
            tracing::debug!(state = %next, "Connection state changed");
            metrics::set_connection_open(next.is_open());
        }
    }

    fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }
}

impl WireSink for WireHandle {
    fn is_open(&self) -> bool {
        self.state().is_open()
    }

    fn send(&self, command: &WireCommand) -> bool {
        if !self.is_open() {
            tracing::warn!(
                command = command.kind(),
                symbol = command.symbol(),
                state = %self.state(),
                "Dropping wire command, transport not open"
            );
            return false;
        }

        let queued = self
            .outbound
            .lock()
            .as_ref()
            .is_some_and(|tx| tx.send(command.clone()).is_ok());
        if !queued {
            tracing::warn!(symbol = command.symbol(), "Dropping wire command, no active session");
        }
        queued
    }
}

// =============================================================================
// Statistics
// =============================================================================

/// Counters exposed on the health endpoint.
#[derive(Debug, Default)]
struct StreamCounters {
    messages_received: AtomicU64,
    reconnect_attempts: AtomicU32,
}

/// Point-in-time client statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamStats {
    /// Connection state.
    pub state: ConnectionState,
    /// Ticks decoded since the client was created.
    pub messages_received: u64,
    /// Reconnect attempts since the last OPEN.
    pub reconnect_attempts: u32,
}

// =============================================================================
// Stream Client
// =============================================================================

struct Inner {
    config: StreamClientConfig,
    codec: JsonCodec,
    registry: Arc<SubscriptionRegistry>,
    wire: WireHandle,
    events: broadcast::Sender<StreamEvent>,
    counters: StreamCounters,
}

struct Session {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Connection manager for the trade stream.
pub struct StreamClient {
    inner: Arc<Inner>,
    session: Mutex<Option<Session>>,
}

impl StreamClient {
    /// Create a client with its own registry and reconciler.
    #[must_use]
    pub fn new(config: StreamClientConfig) -> Self {
        let reconciler = Arc::new(StreamReconciler::new(config.history_limit));
        let registry = Arc::new(SubscriptionRegistry::new(reconciler, config.channel_capacity));
        Self::with_registry(config, registry)
    }

    /// Create a client driving an existing registry.
    #[must_use]
    pub fn with_registry(config: StreamClientConfig, registry: Arc<SubscriptionRegistry>) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                codec: JsonCodec::new(),
                registry,
                wire: WireHandle::new(),
                events: broadcast::channel(EVENT_CHANNEL_CAPACITY).0,
                counters: StreamCounters::default(),
            }),
            session: Mutex::new(None),
        }
    }

    /// Current statistics.
    #[must_use]
    pub fn stats(&self) -> StreamStats {
        StreamStats {
            state: self.inner.wire.state(),
            messages_received: self.inner.counters.messages_received.load(Ordering::Relaxed),
            reconnect_attempts: self.inner.counters.reconnect_attempts.load(Ordering::Relaxed),
        }
    }
}

#[async_trait]
impl MarketStream for StreamClient {
    async fn connect(&self, initial_symbols: Vec<String>) -> Result<(), StreamError> {
        let (ready_tx, ready_rx) = oneshot::channel();
        {
            let mut session = self.session.lock();
            let task_active = session.as_ref().is_some_and(|s| !s.handle.is_finished());
            if task_active || self.inner.wire.state() != ConnectionState::Closed {
                return Err(StreamError::AlreadyConnected);
            }

            self.inner.registry.set_initial_symbols(initial_symbols);
            let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
            *self.inner.wire.outbound.lock() = Some(outbound_tx);
            self.inner.counters.reconnect_attempts.store(0, Ordering::Relaxed);
            self.inner.wire.set_state(ConnectionState::Connecting);

            let cancel = CancellationToken::new();
            let handle = tokio::spawn(Arc::clone(&self.inner).run(
                outbound_rx,
                cancel.clone(),
                ready_tx,
            ));
            *session = Some(Session { cancel, handle });
        }

        // A dropped sender means the task ended before OPEN or an error,
        // which only happens on cancellation.
        ready_rx.await.unwrap_or(Err(StreamError::Cancelled))
    }

    async fn disconnect(&self) {
        let session = self.session.lock().take();
        if let Some(session) = session {
            if self.inner.wire.state() != ConnectionState::Closed {
                self.inner.wire.set_state(ConnectionState::Closing);
            }
            session.cancel.cancel();
            if let Err(e) = session.handle.await {
                tracing::warn!(error = %e, "Stream task ended abnormally");
            }
        }

        *self.inner.wire.outbound.lock() = None;
        self.inner.wire.set_state(ConnectionState::Closed);
        self.inner.registry.clear();
        metrics::set_subscribed_symbols(0);
        tracing::info!("Stream disconnected");
    }

    fn state(&self) -> ConnectionState {
        self.inner.wire.state()
    }

    fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.wire.state.subscribe()
    }

    fn events(&self) -> broadcast::Receiver<StreamEvent> {
        self.inner.events.subscribe()
    }

    fn registry(&self) -> &Arc<SubscriptionRegistry> {
        &self.inner.registry
    }

    fn wire(&self) -> &dyn WireSink {
        &self.inner.wire
    }
}

impl Drop for StreamClient {
    fn drop(&mut self) {
        if let Some(session) = self.session.get_mut().take() {
            session.cancel.cancel();
        }
    }
}

// =============================================================================
// Connection Task
// =============================================================================

type ReadySender = oneshot::Sender<Result<(), StreamError>>;

impl Inner {
    async fn run(
        self: Arc<Self>,
        mut outbound: mpsc::UnboundedReceiver<WireCommand>,
        cancel: CancellationToken,
        ready: ReadySender,
    ) {
        let mut policy = ReconnectPolicy::new(self.config.reconnect.clone());
        let mut ready = Some(ready);

        loop {
            self.wire.set_state(ConnectionState::Connecting);
            let result = self
                .connect_and_run(&mut outbound, &cancel, &mut policy, &mut ready)
                .await;

            self.wire.set_state(ConnectionState::Closed);
            self.registry.on_close();
            metrics::set_subscribed_symbols(0);

            match result {
                Ok(()) => {
                    tracing::info!("Stream task cancelled");
                    return;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Stream connection lost");
                    let _ = self.events.send(StreamEvent::Disconnected);
                    if let Some(tx) = ready.take() {
                        let _ = tx.send(Err(e));
                    }
                }
            }

            let Some(delay) = policy.next_delay() else {
                let attempts = policy.attempt_count();
                tracing::error!(attempts, "Reconnection attempts exhausted");
                let _ = self.events.send(StreamEvent::ReconnectExhausted { attempts });
                return;
            };

            let attempt = policy.attempt_count();
            self.counters.reconnect_attempts.store(attempt, Ordering::Relaxed);
            metrics::record_reconnect();
            tracing::info!(
                attempt,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                "Scheduling reconnect"
            );
            let _ = self.events.send(StreamEvent::Reconnecting { attempt, delay });

            tokio::select! {
                () = cancel.cancelled() => {
                    tracing::info!("Reconnect cancelled");
                    return;
                }
                () = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// Run one wire session. `Ok` only when cancelled.
    async fn connect_and_run(
        &self,
        outbound: &mut mpsc::UnboundedReceiver<WireCommand>,
        cancel: &CancellationToken,
        policy: &mut ReconnectPolicy,
        ready: &mut Option<ReadySender>,
    ) -> Result<(), StreamError> {
        tracing::debug!("Connecting to trade stream");

        let (ws_stream, _response) = tokio::select! {
            () = cancel.cancelled() => return Ok(()),
            result = tokio_tungstenite::connect_async(self.config.url.as_str()) => result?,
        };
        let (mut write, mut read) = ws_stream.split();

        // Commands queued for a previous session are stale.
        while outbound.try_recv().is_ok() {}

        policy.reset();
        self.counters.reconnect_attempts.store(0, Ordering::Relaxed);
        self.wire.set_state(ConnectionState::Open);
        tracing::info!("Trade stream connected");
        let _ = self.events.send(StreamEvent::Connected);
        if let Some(tx) = ready.take() {
            let _ = tx.send(Ok(()));
        }

        let flushed = self.registry.on_open(&self.wire);
        tracing::debug!(flushed, "Subscriptions flushed");

        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    let _ = write.send(Message::Close(None)).await;
                    return Ok(());
                }
                Some(command) = outbound.recv() => {
                    match ClientMessage::from(&command).to_json() {
                        Ok(json) => {
                            write.send(Message::Text(json.into())).await?;
                            metrics::record_wire_command(command.kind());
                            metrics::set_subscribed_symbols(self.registry.stats().on_wire);
                            tracing::debug!(
                                command = command.kind(),
                                symbol = command.symbol(),
                                "Sent wire command"
                            );
                        }
                        Err(e) => tracing::warn!(error = %e, "Failed to encode wire command"),
                    }
                }
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => self.handle_text(&text),
                        Some(Ok(Message::Ping(data))) => {
                            write.send(Message::Pong(data)).await?;
                        }
                        Some(Ok(Message::Close(frame))) => {
                            tracing::info!(?frame, "Server sent close frame");
                            return Err(StreamError::ConnectionClosed);
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => return Err(e.into()),
                        None => return Err(StreamError::ConnectionClosed),
                    }
                }
            }
        }
    }

    /// Decode one text frame and dispatch its ticks. Never fails.
    fn handle_text(&self, text: &str) {
        let started = Instant::now();

        match self.codec.decode(text) {
            Ok(ServerMessage::Trades(records)) => {
                for record in records {
                    let tick = record.into_tick();
                    self.counters.messages_received.fetch_add(1, Ordering::Relaxed);
                    tracing::trace!(symbol = %tick.symbol, price = tick.price, "Tick received");

                    let outcome = if self
                        .registry
                        .reconciler()
                        .handle_tick(tick, &self.registry)
                        .is_some()
                    {
                        TickOutcome::Delivered
                    } else {
                        TickOutcome::Dropped
                    };
                    metrics::record_tick(outcome);
                }
            }
            Ok(ServerMessage::Ping) => tracing::trace!("Server ping"),
            Ok(ServerMessage::Error(msg)) => tracing::warn!(msg = %msg, "Server reported error"),
            Ok(ServerMessage::Other(kind)) => tracing::trace!(kind = %kind, "Ignoring message"),
            Err(e) => {
                tracing::warn!(error = %e, "Dropping malformed payload");
                metrics::record_decode_failure();
                let _ = self.events.send(StreamEvent::DecodeFailed {
                    reason: e.to_string(),
                });
            }
        }

        metrics::record_processing_duration(started.elapsed());
    }
}
