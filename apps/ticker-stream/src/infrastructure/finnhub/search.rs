//! Symbol Search Client
//!
//! `GET {base}/search?q=<query>&exchange=US&token=<token>` returning
//! `{"count": n, "result": [{"symbol", "description", "displaySymbol", "type"}]}`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use crate::application::ports::{SearchError, SearchResult, SymbolSearch};
use crate::application::services::AccessToken;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    result: Vec<SearchResult>,
}

/// HTTP symbol search against the provider's REST API.
pub struct FinnhubSearch {
    http: Client,
    base_url: String,
    token: AccessToken,
}

impl FinnhubSearch {
    /// Create a search client for `base_url` (e.g. `https://finnhub.io/api/v1`).
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(base_url: impl Into<String>, token: AccessToken) -> Result<Self, SearchError> {
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(concat!("ticker-stream/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            http,
            base_url: base_url.into(),
            token,
        })
    }
}

#[async_trait]
impl SymbolSearch for FinnhubSearch {
    async fn search(&self, query: &str) -> Result<Vec<SearchResult>, SearchError> {
        let url = format!("{}/search", self.base_url);
        tracing::debug!(query, "Searching symbols");

        let response = self
            .http
            .get(&url)
            .query(&[
                ("q", query),
                ("exchange", "US"),
                ("token", self.token.expose()),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(SearchError::Status(response.status().as_u16()));
        }

        let body: SearchResponse = response.json().await?;
        tracing::debug!(query, results = body.result.len(), "Symbol search complete");
        Ok(body.result)
    }
}
