//! Symbol fetchers handing provider snapshots to the sync cycle.
//!
//! Both fetchers expect the provider payload already normalized to a JSON
//! array of source records. Elements that do not decode are logged and
//! dropped; only a payload that is not an array fails the fetch.

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use securitymaster_core::errors::{Error, Result};
use securitymaster_core::symbols::{SourceRecord, SymbolFetcher};
use serde_json::Value;
use tracing::{debug, error};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// API tokens handed out round-robin, one per request.
#[derive(Debug, Default)]
pub struct TokenRing {
    tokens: Vec<String>,
    next: AtomicUsize,
}

impl TokenRing {
    pub fn new(tokens: Vec<String>) -> Self {
        Self {
            tokens,
            next: AtomicUsize::new(0),
        }
    }

    pub fn next_token(&self) -> Option<&str> {
        if self.tokens.is_empty() {
            return None;
        }
        let i = self.next.fetch_add(1, Ordering::Relaxed) % self.tokens.len();
        Some(self.tokens[i].as_str())
    }
}

fn fetch_error(provider: &str, message: impl ToString) -> Error {
    Error::Fetch {
        provider: provider.to_string(),
        message: message.to_string(),
    }
}

/// Decodes each element on its own so one malformed record cannot reject
/// the whole snapshot.
fn decode_records(provider: &str, items: Vec<Value>) -> Vec<SourceRecord> {
    let total = items.len();
    let records: Vec<SourceRecord> = items
        .into_iter()
        .enumerate()
        .filter_map(|(index, item)| match serde_json::from_value(item) {
            Ok(record) => Some(record),
            Err(e) => {
                error!("{}: dropping record #{}: {}", provider, index, e);
                None
            }
        })
        .collect();
    if records.len() < total {
        debug!("{}: decoded {} of {} records", provider, records.len(), total);
    }
    records
}

/// Reads `{dir}/{provider}.json`.
pub struct FileSymbolFetcher {
    provider: String,
    dir: PathBuf,
}

impl FileSymbolFetcher {
    pub fn new(provider: &str, dir: impl Into<PathBuf>) -> Self {
        Self {
            provider: provider.to_string(),
            dir: dir.into(),
        }
    }

    fn path(&self) -> PathBuf {
        self.dir.join(format!("{}.json", self.provider))
    }
}

#[async_trait]
impl SymbolFetcher for FileSymbolFetcher {
    fn provider(&self) -> &str {
        &self.provider
    }

    async fn fetch_provider_symbols(&self) -> Result<Vec<SourceRecord>> {
        let path = self.path();
        debug!("{}: reading snapshot {}", self.provider, path.display());
        let text = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| fetch_error(&self.provider, format!("{}: {}", path.display(), e)))?;
        let items: Vec<Value> =
            serde_json::from_str(&text).map_err(|e| fetch_error(&self.provider, e))?;
        Ok(decode_records(&self.provider, items))
    }
}

/// GETs `{base_url}/{provider}` with a bearer token from the shared ring.
pub struct HttpSymbolFetcher {
    provider: String,
    base_url: String,
    client: Client,
    tokens: Arc<TokenRing>,
}

impl HttpSymbolFetcher {
    pub fn new(provider: &str, base_url: &str, tokens: Arc<TokenRing>) -> Self {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            provider: provider.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
            tokens,
        }
    }

    pub fn url(&self) -> String {
        format!("{}/{}", self.base_url, self.provider)
    }
}

#[async_trait]
impl SymbolFetcher for HttpSymbolFetcher {
    fn provider(&self) -> &str {
        &self.provider
    }

    async fn fetch_provider_symbols(&self) -> Result<Vec<SourceRecord>> {
        let mut request = self.client.get(self.url());
        if let Some(token) = self.tokens.next_token() {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| fetch_error(&self.provider, e))?;
        if !response.status().is_success() {
            return Err(fetch_error(
                &self.provider,
                format!("HTTP error: {}", response.status()),
            ));
        }

        let items = response
            .json::<Vec<Value>>()
            .await
            .map_err(|e| fetch_error(&self.provider, e))?;
        Ok(decode_records(&self.provider, items))
    }
}
