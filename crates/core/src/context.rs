//! Run context: configuration, clock and wall-clock budget.
//!
//! Built once per run and passed explicitly to every service. Nothing in the
//! core holds process-wide mutable state.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::constants::{DEFAULT_RUN_BUDGET_SECS, SELF_FETCH_SCAN_THRESHOLD};
use crate::symbols::{MatchCascade, ProviderPriority};

/// Source of the current time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Sync configuration. Fixed for the duration of a run.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Total order over providers, highest priority first.
    pub provider_priority: ProviderPriority,
    /// Identity keys the source tracker tries, in order.
    pub match_cascade: MatchCascade,
    /// Batch size above which the sync engine scans instead of looking up keys.
    pub scan_threshold: usize,
    /// Skip source writes that would only flip the enabled flag.
    pub skip_enabled_only_writes: bool,
    pub run_budget: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            provider_priority: ProviderPriority::default(),
            match_cascade: MatchCascade::default(),
            scan_threshold: SELF_FETCH_SCAN_THRESHOLD,
            skip_enabled_only_writes: false,
            run_budget: Duration::from_secs(DEFAULT_RUN_BUDGET_SECS),
        }
    }
}

impl SyncConfig {
    pub fn with_priority<I, S>(mut self, providers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.provider_priority = ProviderPriority::new(providers);
        self
    }
}

/// Cooperative wall-clock budget for one run.
#[derive(Debug, Clone, Copy)]
pub struct RunBudget {
    started: Instant,
    budget: Duration,
}

impl RunBudget {
    pub fn start(budget: Duration) -> Self {
        Self {
            started: Instant::now(),
            budget,
        }
    }

    /// A budget that never runs out in practice.
    pub fn unlimited() -> Self {
        Self::start(Duration::from_secs(u64::MAX / 4))
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn remaining(&self) -> Duration {
        self.budget.saturating_sub(self.elapsed())
    }

    /// True once the elapsed time reaches the budget. A zero budget is
    /// exhausted immediately.
    pub fn is_exhausted(&self) -> bool {
        self.elapsed() >= self.budget
    }
}

/// Everything a sync service needs that is not a store.
#[derive(Clone)]
pub struct SyncContext {
    pub config: Arc<SyncConfig>,
    pub clock: Arc<dyn Clock>,
}

impl SyncContext {
    pub fn new(config: SyncConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config: Arc::new(config),
            clock,
        }
    }

    pub fn with_system_clock(config: SyncConfig) -> Self {
        Self::new(config, Arc::new(SystemClock))
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Starts a fresh budget for one run.
    pub fn start_budget(&self) -> RunBudget {
        RunBudget::start(self.config.run_budget)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_budget_is_exhausted() {
        let budget = RunBudget::start(Duration::ZERO);
        assert!(budget.is_exhausted());
        assert_eq!(budget.remaining(), Duration::ZERO);
    }

    #[test]
    fn test_unlimited_budget() {
        let budget = RunBudget::unlimited();
        assert!(!budget.is_exhausted());
        assert!(budget.remaining() > Duration::from_secs(3600));
    }

    #[test]
    fn test_default_config() {
        let config = SyncConfig::default();
        assert_eq!(config.scan_threshold, 1_000);
        assert_eq!(config.run_budget, Duration::from_secs(110));
        assert!(!config.skip_enabled_only_writes);
    }
}
