//! Application Layer - Use cases and port definitions.
//!
//! Services here depend only on the domain and on the port traits; the
//! infrastructure layer supplies the adapters.

/// Port interfaces for the stream, storage and search.
pub mod ports;

/// Watch-set controller and credential storage.
pub mod services;
