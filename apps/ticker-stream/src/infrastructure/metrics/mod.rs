//! Prometheus Metrics Module
//!
//! # Metrics
//!
//! - **Ticks**: received, delivered and dropped (no consumer)
//! - **Stream**: decode failures, reconnect attempts, wire commands sent
//! - **State**: connection open, subscribed symbols, processing latency
//!
//! Metrics are exposed at `/metrics` on the health server port.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the Prometheus recorder. Later calls return the same handle.
///
/// # Errors
///
/// Returns an error if another global recorder is already installed.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    register_metrics();
    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle).clone())
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    describe_counter!(
        "ticker_stream_ticks_received_total",
        "Total trade ticks decoded from the stream"
    );
    describe_counter!(
        "ticker_stream_ticks_dropped_total",
        "Total ticks discarded because no consumer was registered"
    );
    describe_counter!(
        "ticker_stream_decode_failures_total",
        "Total inbound frames dropped as malformed"
    );
    describe_counter!(
        "ticker_stream_reconnects_total",
        "Total reconnection attempts"
    );
    describe_counter!(
        "ticker_stream_wire_commands_total",
        "Total subscribe/unsubscribe commands sent"
    );

    describe_gauge!(
        "ticker_stream_connection_open",
        "1 while the stream transport is open"
    );
    describe_gauge!(
        "ticker_stream_subscribed_symbols",
        "Symbols subscribed on the wire"
    );

    describe_histogram!(
        "ticker_stream_frame_processing_seconds",
        "Time to decode and dispatch one inbound frame"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Outcome label for a decoded tick.
#[derive(Debug, Clone, Copy)]
pub enum TickOutcome {
    /// Delivered to a consumer.
    Delivered,
    /// Discarded, no consumer.
    Dropped,
}

impl TickOutcome {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Delivered => "delivered",
            Self::Dropped => "dropped",
        }
    }
}

/// Record one decoded tick.
pub fn record_tick(outcome: TickOutcome) {
    counter!(
        "ticker_stream_ticks_received_total",
        "outcome" => outcome.as_str()
    )
    .increment(1);
    if matches!(outcome, TickOutcome::Dropped) {
        counter!("ticker_stream_ticks_dropped_total").increment(1);
    }
}

/// Record a malformed inbound frame.
pub fn record_decode_failure() {
    counter!("ticker_stream_decode_failures_total").increment(1);
}

/// Record a reconnection attempt.
pub fn record_reconnect() {
    counter!("ticker_stream_reconnects_total").increment(1);
}

/// Record an outbound wire command.
pub fn record_wire_command(kind: &'static str) {
    counter!("ticker_stream_wire_commands_total", "command" => kind).increment(1);
}

/// Update the connection-open gauge.
pub fn set_connection_open(open: bool) {
    gauge!("ticker_stream_connection_open").set(if open { 1.0 } else { 0.0 });
}

/// Update the subscribed-symbols gauge.
pub fn set_subscribed_symbols(count: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("ticker_stream_subscribed_symbols").set(count as f64);
}

/// Record frame processing duration.
pub fn record_processing_duration(duration: Duration) {
    histogram!("ticker_stream_frame_processing_seconds").record(duration.as_secs_f64());
}

// =============================================================================
// Tests
// =============================================================================
