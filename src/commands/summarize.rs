use anyhow::Result;

use crate::archivist::config::load_config;
use crate::archivist::pipeline::Pipeline;
use crate::commands::{CommandReport, report_cycle};

pub fn run() -> Result<CommandReport> {
    let cfg = load_config()?;
    let mut report = CommandReport::new("summarize");
    let pipeline = Pipeline::from_config(&cfg)?;
    let _lock = pipeline.lock()?;
    let outcome = pipeline.summarize_pending()?;
    report.detail(format!("summary_dir={}", cfg.paths.summary_dir.display()));
    report_cycle(&mut report, &outcome, cfg.remote.endpoint().is_some());
    Ok(report)
}
