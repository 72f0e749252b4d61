//! Infrastructure Layer - Adapters and external integrations.
//!
//! Concrete implementations of the application ports plus the service's
//! ambient plumbing.

/// Finnhub stream client and symbol search.
pub mod finnhub;

/// File-backed and in-memory key-value storage.
pub mod storage;

/// Environment configuration.
pub mod config;

/// Health check HTTP endpoint.
pub mod health;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// Tracing subscriber and OpenTelemetry export.
pub mod telemetry;
