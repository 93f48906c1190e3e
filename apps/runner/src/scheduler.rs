//! Background scheduler for periodic sync cycles.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::main_lib::{run_cycle, AppState};

/// Initial delay before the first cycle.
const INITIAL_DELAY_SECS: u64 = 5;

/// Starts the periodic sync loop. Each tick runs one full cycle; a failing
/// cycle is logged and the next tick tries again.
pub fn start_sync_scheduler(
    state: Arc<AppState>,
    config: Arc<Config>,
    every: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!("Sync scheduler started ({:?} interval)", every);
        tokio::time::sleep(Duration::from_secs(INITIAL_DELAY_SECS)).await;

        let mut sync_interval = interval(every);
        loop {
            sync_interval.tick().await;
            match run_cycle(&state, &config).await {
                Ok(summary) if summary.is_success() => info!("Scheduled sync completed"),
                Ok(_) => warn!("Scheduled sync completed with failures"),
                Err(e) => error!("Scheduled sync failed: {:#}", e),
            }
        }
    })
}
