use anyhow::Result;

use crate::archivist::config::load_config;
use crate::archivist::pipeline::Pipeline;
use crate::commands::{CommandReport, report_cycle};

pub fn run() -> Result<CommandReport> {
    let cfg = load_config()?;
    let mut report = CommandReport::new("run");
    let outcome = Pipeline::from_config(&cfg)?.run_cycle()?;
    report_cycle(&mut report, &outcome, cfg.remote.endpoint().is_some());
    Ok(report)
}
