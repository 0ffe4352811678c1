use anyhow::Result;

use crate::archivist::config::load_config;
use crate::archivist::watcher;
use crate::commands::{CommandReport, report_cycle};

#[derive(Debug, Clone, Default)]
pub struct WatchOptions {
    pub once: bool,
}

pub fn run(opts: &WatchOptions) -> Result<CommandReport> {
    let cfg = load_config()?;
    let mut report = CommandReport::new("watch");

    if !opts.once {
        watcher::run_daemon(&cfg)?;
        return Ok(report);
    }

    let outcome = watcher::run_once(&cfg)?;
    report.detail("single cycle completed");
    report_cycle(&mut report, &outcome, cfg.remote.endpoint().is_some());
    Ok(report)
}
