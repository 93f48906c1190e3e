mod config;
mod fetch;
mod main_lib;
mod scheduler;

use std::sync::Arc;

use config::Config;
use main_lib::{build_state, init_tracing, run_cycle};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env()?;
    init_tracing(&config.log_format);
    let state = build_state(&config).await?;

    match config.interval {
        None => {
            let summary = run_cycle(&state, &config).await?;
            if !summary.is_success() {
                anyhow::bail!("Sync cycle on {} completed with failures", state.db_path);
            }
        }
        Some(every) => {
            let config = Arc::new(config);
            let handle = scheduler::start_sync_scheduler(state, config, every);
            tokio::signal::ctrl_c().await?;
            tracing::info!("Shutting down");
            handle.abort();
        }
    }
    Ok(())
}
