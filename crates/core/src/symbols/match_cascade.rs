//! Rename-tolerant matching between a fresh snapshot and the stored one.
//!
//! Keys are tried in priority order, from globally unique but sparse
//! identifiers down to the human ticker. Each pass only sees records left
//! unmatched by the passes before it.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use super::symbols_model::SourceRecord;
use crate::errors::{Error, Result};

/// An identity key of the matching cascade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchKey {
    Figi,
    LocalId,
    SecurityCode,
    Lei,
    Ticker,
}

impl MatchKey {
    pub const ALL: [MatchKey; 5] = [
        MatchKey::Figi,
        MatchKey::LocalId,
        MatchKey::SecurityCode,
        MatchKey::Lei,
        MatchKey::Ticker,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MatchKey::Figi => "figi",
            MatchKey::LocalId => "local_id",
            MatchKey::SecurityCode => "security_code",
            MatchKey::Lei => "lei",
            MatchKey::Ticker => "ticker",
        }
    }

    /// The record's value for this key. Empty strings count as absent.
    pub fn value<'a>(&self, record: &'a SourceRecord) -> Option<&'a str> {
        let value = match self {
            MatchKey::Figi => record.figi.as_deref(),
            MatchKey::LocalId => Some(record.local_id.as_str()),
            MatchKey::SecurityCode => record.security_code.as_deref(),
            MatchKey::Lei => record.lei.as_deref(),
            MatchKey::Ticker => Some(record.ticker.as_str()),
        };
        value.filter(|v| !v.is_empty())
    }
}

impl fmt::Display for MatchKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MatchKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        MatchKey::ALL
            .into_iter()
            .find(|k| k.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| Error::Config(format!("unknown match key '{}'", s)))
    }
}

/// Ordered list of match keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchCascade(Vec<MatchKey>);

impl Default for MatchCascade {
    fn default() -> Self {
        Self(MatchKey::ALL.to_vec())
    }
}

impl MatchCascade {
    pub fn new(keys: Vec<MatchKey>) -> Result<Self> {
        if keys.is_empty() {
            return Err(Error::Config("match cascade cannot be empty".to_string()));
        }
        let mut unique = Vec::with_capacity(keys.len());
        for key in keys {
            if !unique.contains(&key) {
                unique.push(key);
            }
        }
        Ok(Self(unique))
    }

    pub fn keys(&self) -> &[MatchKey] {
        &self.0
    }
}

impl FromStr for MatchCascade {
    type Err = Error;

    /// Parses a comma-separated key list, highest priority first.
    fn from_str(s: &str) -> Result<Self> {
        let keys = s
            .split(',')
            .filter(|k| !k.trim().is_empty())
            .map(MatchKey::from_str)
            .collect::<Result<Vec<_>>>()?;
        Self::new(keys)
    }
}

/// A confident pairing of a fresh record with its stored predecessor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CascadeMatch {
    pub fresh: usize,
    pub previous: usize,
    pub key: MatchKey,
}

/// Pairs `fresh` records with `previous` records.
///
/// For each key, a bucket holding exactly one unmatched fresh and one
/// unmatched previous record is a match. Larger buckets are narrowed by exact
/// ticker: a fresh record matches when exactly one record on each side of the
/// bucket carries its ticker. Results are ordered by fresh index.
pub fn match_records(
    cascade: &MatchCascade,
    fresh: &[SourceRecord],
    previous: &[SourceRecord],
) -> Vec<CascadeMatch> {
    let mut fresh_taken = vec![false; fresh.len()];
    let mut previous_taken = vec![false; previous.len()];
    let mut matches = Vec::new();

    for &key in cascade.keys() {
        let mut buckets: BTreeMap<&str, (Vec<usize>, Vec<usize>)> = BTreeMap::new();
        for (i, record) in fresh.iter().enumerate() {
            if fresh_taken[i] {
                continue;
            }
            if let Some(value) = key.value(record) {
                buckets.entry(value).or_default().0.push(i);
            }
        }
        for (j, record) in previous.iter().enumerate() {
            if previous_taken[j] {
                continue;
            }
            if let Some(value) = key.value(record) {
                if let Some(bucket) = buckets.get_mut(value) {
                    bucket.1.push(j);
                }
            }
        }

        for (fresh_ids, previous_ids) in buckets.into_values() {
            if previous_ids.is_empty() {
                continue;
            }
            if fresh_ids.len() == 1 && previous_ids.len() == 1 {
                matches.push(CascadeMatch {
                    fresh: fresh_ids[0],
                    previous: previous_ids[0],
                    key,
                });
                fresh_taken[fresh_ids[0]] = true;
                previous_taken[previous_ids[0]] = true;
                continue;
            }

            for &i in &fresh_ids {
                let ticker = fresh[i].ticker.as_str();
                let same_fresh = fresh_ids
                    .iter()
                    .filter(|&&f| fresh[f].ticker == ticker)
                    .count();
                let same_previous: Vec<usize> = previous_ids
                    .iter()
                    .copied()
                    .filter(|&p| previous[p].ticker == ticker)
                    .collect();
                if same_fresh == 1 && same_previous.len() == 1 {
                    let j = same_previous[0];
                    matches.push(CascadeMatch {
                        fresh: i,
                        previous: j,
                        key,
                    });
                    fresh_taken[i] = true;
                    previous_taken[j] = true;
                }
            }
        }
    }

    matches.sort_by_key(|m| m.fresh);
    matches
}
