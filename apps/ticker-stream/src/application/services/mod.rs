//! Application Services
//!
//! Use cases composed from the domain types and the ports.

mod credentials;
mod watch_set;

pub use credentials::{AccessToken, CREDENTIAL_KEY, CredentialError, CredentialStore};
pub use watch_set::{
    AddStatus, MAX_SEARCH_RESULTS, WATCH_LIST_KEY, WatchSetController, WatchSetError,
};
