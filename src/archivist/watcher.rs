use crate::archivist::audit;
use crate::archivist::config::ArchivistConfig;
use crate::archivist::pipeline::{CycleOutcome, Pipeline};
use crate::archivist::schedule::{Schedule, wait_duration};
use anyhow::Result;
use chrono::Utc;
use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};

const SOURCE_POLL: Duration = Duration::from_secs(1);

/// Block until `path` exists or `timeout` elapses.
pub fn wait_for_source(path: &Path, timeout: Duration, poll: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if path.is_file() {
            return true;
        }
        let now = Instant::now();
        if now >= deadline {
            return false;
        }
        thread::sleep(poll.min(deadline - now));
    }
}

pub fn run_once(cfg: &ArchivistConfig) -> Result<CycleOutcome> {
    Pipeline::from_config(cfg)?.run_cycle()
}

fn log_cycle(result: Result<CycleOutcome>) {
    match result {
        Ok(outcome) => tracing::info!(
            snapshots = outcome.snapshots,
            summarized = outcome.summarized,
            synced = outcome.synced,
            sync_failed = outcome.sync_failed,
            failures = outcome.failures.len(),
            "cycle finished"
        ),
        Err(err) => tracing::error!("cycle failed: {err:#}"),
    }
}

/// Initial cycle, then one cycle per schedule slot. Cycle errors are logged
/// and the loop waits for the next slot.
pub fn run_daemon(cfg: &ArchivistConfig) -> Result<()> {
    let schedule = Schedule::from_config(&cfg.schedule)?;
    let pipeline = Pipeline::from_config(cfg)?;
    audit::record(&cfg.paths, "watch", "started", &schedule.describe());
    tracing::info!(schedule = %schedule.describe(), "watcher started");

    let wait = Duration::from_secs(cfg.pipeline.source_wait_secs);
    if !wait_for_source(&cfg.paths.source_db, wait, SOURCE_POLL) {
        tracing::warn!(
            path = %cfg.paths.source_db.display(),
            "source database still missing after {}s",
            wait.as_secs()
        );
    }
    log_cycle(pipeline.run_cycle());

    loop {
        let (sleep_for, next) = wait_duration(&schedule, Utc::now());
        tracing::info!(next_run = %next, "sleeping until next cycle");
        thread::sleep(sleep_for);
        log_cycle(pipeline.run_cycle());
    }
}
