use anyhow::Result;

use crate::archivist::config::load_config;
use crate::archivist::pipeline::Pipeline;
use crate::commands::{CommandReport, report_extract};

pub fn run() -> Result<CommandReport> {
    let cfg = load_config()?;
    let mut report = CommandReport::new("extract");
    let pipeline = Pipeline::from_config(&cfg)?;
    let _lock = pipeline.lock()?;
    let outcome = pipeline.extract()?;
    report.detail(format!(
        "snapshot_dir={}",
        cfg.paths.snapshot_dir.display()
    ));
    report_extract(&mut report, &outcome);
    Ok(report)
}
