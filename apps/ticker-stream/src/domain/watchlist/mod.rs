//! Watch-List Types
//!
//! The ordered set of symbols the application intends to track, with the
//! symbol-pattern validation applied whenever a persisted list is restored.

use serde::{Deserialize, Serialize};

/// Symbols used when a restored watch-list is empty.
pub const DEFAULT_SYMBOLS: [&str; 3] = ["AAPL", "MSFT", "GOOGL"];

// =============================================================================
// Validation
// =============================================================================

/// Check a symbol against `^([A-Z]{2,5}:)?[A-Z]{2,5}$`.
#[must_use]
pub fn is_valid_symbol(symbol: &str) -> bool {
    fn is_segment(s: &str) -> bool {
        (2..=5).contains(&s.len()) && s.bytes().all(|b| b.is_ascii_uppercase())
    }

    match symbol.split_once(':') {
        Some((exchange, ticker)) => is_segment(exchange) && is_segment(ticker),
        None => is_segment(symbol),
    }
}

// =============================================================================
// Watch Set
// =============================================================================

/// Ordered symbol set: insertion order preserved, no duplicates.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WatchSet {
    symbols: Vec<String>,
}

impl WatchSet {
    /// Create an empty watch-set.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            symbols: Vec::new(),
        }
    }

    /// Build from an iterator, dropping duplicates after the first.
    pub fn from_symbols<I, S>(symbols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut set = Self::new();
        for symbol in symbols {
            set.insert(symbol.into());
        }
        set
    }

    /// The built-in default set.
    #[must_use]
    pub fn defaults() -> Self {
        Self::from_symbols(DEFAULT_SYMBOLS)
    }

    /// Append a symbol. Returns `false` if it was already present.
    pub fn insert(&mut self, symbol: String) -> bool {
        if self.contains(&symbol) {
            return false;
        }
        self.symbols.push(symbol);
        true
    }

    /// Remove a symbol. Returns `false` if it was not present.
    pub fn remove(&mut self, symbol: &str) -> bool {
        let before = self.symbols.len();
        self.symbols.retain(|s| s != symbol);
        self.symbols.len() != before
    }

    /// Check membership.
    #[must_use]
    pub fn contains(&self, symbol: &str) -> bool {
        self.symbols.iter().any(|s| s == symbol)
    }

    /// Symbols in insertion order.
    #[must_use]
    pub fn as_slice(&self) -> &[String] {
        &self.symbols
    }

    /// Number of symbols.
    #[must_use]
    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    /// Check if the set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    /// Serialize for durable storage as a JSON array of strings.
    #[must_use]
    pub fn to_blob(&self) -> String {
        // A Vec<String> always serializes.
        serde_json::to_string(&self.symbols).unwrap_or_else(|_| String::from("[]"))
    }

    /// Restore from a stored blob.
    ///
    /// Accepts a JSON array or a legacy comma-delimited list. Invalid and
    /// duplicate entries are dropped; an empty result yields `fallback`.
    #[must_use]
    pub fn restore(blob: Option<&str>, fallback: &Self) -> Self {
        let entries = blob.map(parse_entries).unwrap_or_default();

        let mut set = Self::new();
        for entry in entries {
            if is_valid_symbol(&entry) {
                set.insert(entry);
            } else {
                tracing::warn!(symbol = %entry, "Dropping invalid stored symbol");
            }
        }

        if set.is_empty() {
            tracing::debug!("No valid stored symbols, using defaults");
            return fallback.clone();
        }
        set
    }
}

impl<'a> IntoIterator for &'a WatchSet {
    type Item = &'a String;
    type IntoIter = std::slice::Iter<'a, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.symbols.iter()
    }
}

fn parse_entries(blob: &str) -> Vec<String> {
    let trimmed = blob.trim();
    if trimmed.starts_with('[')
        && let Ok(list) = serde_json::from_str::<Vec<String>>(trimmed)
    {
        return list;
    }

    trimmed
        .split(',')
        .map(|s| s.trim().trim_matches(|c| c == '"' || c == '[' || c == ']'))
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

// =============================================================================
// Tests
// =============================================================================
