//! Domain models for source records and merged symbols.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;

use crate::constants::SCHEMA_VERSION;
use crate::errors::{Result, ValidationError};

/// One provider's view of one security.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceRecord {
    /// Stable document key inside the provider collection. Equal to the
    /// provider's local id at first sight and never changed afterwards.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    /// Provider-assigned opaque identifier.
    pub local_id: String,
    pub ticker: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    /// Absent means enabled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    /// Globally unique, sparse identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub figi: Option<String>,
    /// Security identifier code (ISIN/CUSIP style).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security_code: Option<String>,
    /// Legal-entity identifier of the issuer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lei: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exchange: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
}

impl SourceRecord {
    pub fn new(local_id: impl Into<String>, ticker: impl Into<String>) -> Self {
        Self {
            local_id: local_id.into(),
            ticker: ticker.into(),
            ..Default::default()
        }
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = Some(enabled);
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.unwrap_or(true)
    }

    /// Rejects records missing a required field.
    pub fn validate(&self) -> Result<()> {
        if self.local_id.trim().is_empty() {
            return Err(ValidationError::MissingField("localId".to_string()).into());
        }
        if self.ticker.trim().is_empty() {
            return Err(ValidationError::MissingField("ticker".to_string()).into());
        }
        Ok(())
    }
}

/// The canonical, cross-provider security entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergedSymbol {
    /// Assigned once at creation. Never changes.
    pub id: String,
    /// One slot per known provider; `None` is an absent slot.
    pub slots: BTreeMap<String, Option<SourceRecord>>,
    /// Provider currently supplying `main_record`.
    pub main_source: String,
    /// Copy of the authoritative record with its id replaced by `id`.
    pub main_record: SourceRecord,
    pub last_update_at: DateTime<Utc>,
    /// Set only when `main_source` changes.
    pub last_refetch_at: Option<DateTime<Utc>>,
    /// Optimistic-concurrency token, incremented on every write.
    pub version: i64,
    pub schema_version: i32,
    pub created_at: DateTime<Utc>,
}

impl MergedSymbol {
    /// Creates a symbol owned by a single provider.
    ///
    /// `known_providers` get empty slots so every configured provider is
    /// represented.
    pub fn new<'a>(
        id: impl Into<String>,
        provider: &str,
        record: SourceRecord,
        known_providers: impl IntoIterator<Item = &'a str>,
        now: DateTime<Utc>,
    ) -> Self {
        let id = id.into();
        let mut slots: BTreeMap<String, Option<SourceRecord>> = known_providers
            .into_iter()
            .map(|p| (p.to_string(), None))
            .collect();
        let main_record = SourceRecord {
            id: id.clone(),
            ..record.clone()
        };
        slots.insert(provider.to_string(), Some(record));

        Self {
            id,
            slots,
            main_source: provider.to_string(),
            main_record,
            last_update_at: now,
            last_refetch_at: None,
            version: 1,
            schema_version: SCHEMA_VERSION,
            created_at: now,
        }
    }

    pub fn slot(&self, provider: &str) -> Option<&SourceRecord> {
        self.slots.get(provider).and_then(Option::as_ref)
    }

    /// Populated slots.
    pub fn populated(&self) -> impl Iterator<Item = (&str, &SourceRecord)> {
        self.slots
            .iter()
            .filter_map(|(p, r)| r.as_ref().map(|r| (p.as_str(), r)))
    }

    pub fn populated_count(&self) -> usize {
        self.populated().count()
    }
}

/// Fixed total order over providers, highest priority first.
///
/// Providers not listed rank after every listed one, in lexical order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProviderPriority {
    order: Vec<String>,
}

impl ProviderPriority {
    pub fn new<I, S>(providers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut order: Vec<String> = Vec::new();
        for provider in providers {
            let provider = provider.into();
            if !order.contains(&provider) {
                order.push(provider);
            }
        }
        Self { order }
    }

    pub fn providers(&self) -> &[String] {
        &self.order
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    fn rank(&self, provider: &str) -> usize {
        self.order
            .iter()
            .position(|p| p == provider)
            .unwrap_or(self.order.len())
    }

    pub fn compare(&self, a: &str, b: &str) -> Ordering {
        self.rank(a).cmp(&self.rank(b)).then_with(|| a.cmp(b))
    }

    /// Returns `providers` sorted highest priority first.
    pub fn sorted<'a, I>(&self, providers: I) -> Vec<&'a str>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut out: Vec<&'a str> = providers.into_iter().collect();
        out.sort_by(|a, b| self.compare(a, b));
        out.dedup();
        out
    }
}

impl std::str::FromStr for ProviderPriority {
    type Err = crate::errors::Error;

    /// Parses a comma-separated list, highest priority first.
    fn from_str(s: &str) -> Result<Self> {
        Ok(Self::new(
            s.split(',')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(str::to_string),
        ))
    }
}
