//! Configuration Module
//!
//! Environment-driven configuration for the ticker stream service.

mod settings;

pub use settings::{
    AppConfig, ConfigError, EndpointSettings, ServerSettings, StorageSettings, StreamSettings,
};
