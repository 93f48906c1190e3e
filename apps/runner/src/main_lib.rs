use std::sync::Arc;

use securitymaster_core::symbols::{CycleSummary, SymbolFetcher, SyncCycle};
use securitymaster_core::SyncContext;
use securitymaster_storage_sqlite::{db, DocumentRepository, MergedSymbolRepository};
use tracing::{info, warn};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::Config;
use crate::fetch::{FileSymbolFetcher, HttpSymbolFetcher, TokenRing};

pub struct AppState {
    pub cycle: SyncCycle,
    pub db_path: String,
}

pub fn init_tracing(log_format: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);

    if log_format.eq_ignore_ascii_case("json") {
        registry
            .with(fmt::layer().json().with_current_span(false))
            .init();
    } else {
        registry
            .with(fmt::layer().with_target(true).with_line_number(true))
            .init();
    }
}

/// One fetcher per configured provider. The HTTP source wins over snapshot
/// files when both are configured.
pub fn build_fetchers(config: &Config) -> anyhow::Result<Vec<Arc<dyn SymbolFetcher>>> {
    let tokens = Arc::new(TokenRing::new(config.fetch_tokens.clone()));
    let mut fetchers: Vec<Arc<dyn SymbolFetcher>> = Vec::new();
    for provider in config.providers.providers() {
        let fetcher: Arc<dyn SymbolFetcher> = match (&config.fetch_url, &config.snapshot_dir) {
            (Some(url), _) => Arc::new(HttpSymbolFetcher::new(provider, url, tokens.clone())),
            (None, Some(dir)) => Arc::new(FileSymbolFetcher::new(provider, dir.clone())),
            (None, None) => {
                anyhow::bail!("Set SM_FETCH_URL or SM_SNAPSHOT_DIR to fetch provider symbols")
            }
        };
        fetchers.push(fetcher);
    }
    Ok(fetchers)
}

pub async fn build_state(config: &Config) -> anyhow::Result<Arc<AppState>> {
    let db_path = db::init(&config.db_path)?;
    info!("Database path in use: {}", db_path);

    let pool = db::create_pool(&db_path)?;
    db::run_migrations(&pool)?;
    let writer = db::spawn_writer((*pool).clone());

    let documents = Arc::new(DocumentRepository::new(pool.clone(), writer.clone()));
    let symbols = Arc::new(MergedSymbolRepository::new(pool.clone(), writer.clone()));

    let ctx = SyncContext::with_system_clock(config.sync_config());
    let cycle = SyncCycle::new(ctx, documents, symbols, build_fetchers(config)?);

    Ok(Arc::new(AppState { cycle, db_path }))
}

/// Runs one cycle and logs its outcome.
pub async fn run_cycle(state: &AppState, config: &Config) -> anyhow::Result<CycleSummary> {
    let summary = state
        .cycle
        .run(config.since, config.provider_filter.as_deref())
        .await?;

    for tracker in &summary.trackers {
        info!(
            "{}: {} fresh, {} inserted, {} updated, {} disabled, {} failed",
            tracker.provider,
            tracker.fresh,
            tracker.inserted,
            tracker.updated,
            tracker.disabled,
            tracker.failed
        );
    }
    for (provider, message) in &summary.tracker_failures {
        warn!("{}: tracker failed: {}", provider, message);
    }
    if summary.merge.timed_out {
        warn!("Merge stopped at the run budget; the next cycle picks up the rest");
    }
    Ok(summary)
}
