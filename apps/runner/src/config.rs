use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use chrono::{DateTime, Utc};
use securitymaster_core::constants::{DEFAULT_RUN_BUDGET_SECS, SELF_FETCH_SCAN_THRESHOLD};
use securitymaster_core::symbols::{MatchCascade, ProviderPriority};
use securitymaster_core::SyncConfig;

pub struct Config {
    pub db_path: String,
    /// Highest priority first. Every provider gets a fetcher.
    pub providers: ProviderPriority,
    pub match_cascade: MatchCascade,
    pub snapshot_dir: Option<PathBuf>,
    pub fetch_url: Option<String>,
    pub fetch_tokens: Vec<String>,
    pub run_budget: Duration,
    /// `None` runs a single cycle and exits.
    pub interval: Option<Duration>,
    pub skip_enabled_only_writes: bool,
    pub since: Option<DateTime<Utc>>,
    pub provider_filter: Option<String>,
    pub log_format: String,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let db_path = var("SM_DB_PATH").unwrap_or_else(|| "./db/securitymaster.db".into());
        let providers: ProviderPriority = var("SM_PROVIDERS")
            .unwrap_or_default()
            .parse()
            .context("Invalid SM_PROVIDERS")?;
        if providers.is_empty() {
            anyhow::bail!("SM_PROVIDERS must name at least one provider");
        }
        let match_cascade = match var("SM_MATCH_CASCADE") {
            Some(list) => list.parse().context("Invalid SM_MATCH_CASCADE")?,
            None => MatchCascade::default(),
        };
        let fetch_tokens = var("SM_FETCH_TOKENS")
            .unwrap_or_default()
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        let budget_secs: u64 = match var("SM_RUN_BUDGET_SECS") {
            Some(v) => v.parse().context("Invalid SM_RUN_BUDGET_SECS")?,
            None => DEFAULT_RUN_BUDGET_SECS,
        };
        let interval_secs: u64 = match var("SM_INTERVAL_SECS") {
            Some(v) => v.parse().context("Invalid SM_INTERVAL_SECS")?,
            None => 0,
        };
        let skip_enabled_only_writes = var("SM_SKIP_ENABLED_ONLY_WRITES")
            .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(false);
        let since = match var("SM_SINCE") {
            Some(v) => Some(
                DateTime::parse_from_rfc3339(v.trim())
                    .context("Invalid SM_SINCE")?
                    .with_timezone(&Utc),
            ),
            None => None,
        };

        Ok(Self {
            db_path,
            providers,
            match_cascade,
            snapshot_dir: var("SM_SNAPSHOT_DIR").map(PathBuf::from),
            fetch_url: var("SM_FETCH_URL").map(|u| u.trim_end_matches('/').to_string()),
            fetch_tokens,
            run_budget: Duration::from_secs(budget_secs),
            interval: (interval_secs > 0).then(|| Duration::from_secs(interval_secs)),
            skip_enabled_only_writes,
            since,
            provider_filter: var("SM_PROVIDER_FILTER"),
            log_format: var("SM_LOG_FORMAT").unwrap_or_else(|| "text".into()),
        })
    }

    pub fn sync_config(&self) -> SyncConfig {
        SyncConfig {
            provider_priority: self.providers.clone(),
            match_cascade: self.match_cascade.clone(),
            scan_threshold: SELF_FETCH_SCAN_THRESHOLD,
            skip_enabled_only_writes: self.skip_enabled_only_writes,
            run_budget: self.run_budget,
        }
    }
}
