//! Watch loop: periodic incremental re-indexing of every configured target.
//!
//! One pass per tick, per-target error isolation, and a plain sleep between
//! passes. The loop never exits on its own; cancellation happens at the sleep
//! boundary via the caller's signal handling (see `main.rs`).

use crate::config::Config;
use crate::embed::EmbeddingClient;
use crate::update;
use std::time::Duration;
use tracing::{error, info};

/// Minimum supported tick interval.
pub const MIN_INTERVAL_SECONDS: u64 = 1;

/// Run the incremental updater over all configured targets forever, sleeping
/// `interval_seconds` (clamped to at least one second) between passes.
pub async fn watch(config: &Config, client: &EmbeddingClient, interval_seconds: u64) {
    let interval = interval_seconds.max(MIN_INTERVAL_SECONDS);
    info!(
        interval_seconds = interval,
        folders = config.folders.len(),
        repos = config.git_repos.len(),
        "Watching targets"
    );

    loop {
        run_pass(config, client).await;
        tokio::time::sleep(Duration::from_secs(interval)).await;
    }
}

/// One full pass over every target. Errors are logged and never propagate.
pub async fn run_pass(config: &Config, client: &EmbeddingClient) {
    for (target, kind, outcome) in update::index_all_targets(config, client).await {
        match outcome {
            Ok(summary) if summary.changed => {
                info!(target = target.as_str(), kind = %kind, %summary, "Updated");
            }
            Ok(_) => {}
            Err(e) => {
                error!(target = target.as_str(), kind = %kind, error = %e, "Update failed");
            }
        }
    }
}
