pub mod extract;
pub mod inspect;
pub mod run;
pub mod status;
pub mod summarize;
pub mod watch;

use crate::archivist::pipeline::CycleOutcome;
use crate::archivist::snapshot::ExtractOutcome;
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct CommandReport {
    pub command: String,
    pub ok: bool,
    pub details: Vec<String>,
    pub issues: Vec<String>,
}

impl CommandReport {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            ok: true,
            details: Vec::new(),
            issues: Vec::new(),
        }
    }

    pub fn detail(&mut self, text: impl Into<String>) {
        self.details.push(text.into());
    }

    pub fn issue(&mut self, text: impl Into<String>) {
        self.ok = false;
        self.issues.push(text.into());
    }
}

pub fn report_extract(report: &mut CommandReport, outcome: &ExtractOutcome) {
    report.detail(format!("extract.groups={}", outcome.groups));
    report.detail(format!("extract.written={}", outcome.written));
    report.detail(format!("extract.unchanged={}", outcome.unchanged));
    report.detail(format!("extract.ghosts_removed={}", outcome.ghosts_removed));
    for failure in &outcome.failures {
        report.issue(format!("extract: {failure}"));
    }
}

pub fn report_cycle(report: &mut CommandReport, outcome: &CycleOutcome, remote_configured: bool) {
    if let Some(extract) = &outcome.extract {
        report_extract(report, extract);
    }
    report.detail(format!("summarize.snapshots={}", outcome.snapshots));
    report.detail(format!("summarize.unchanged={}", outcome.unchanged));
    report.detail(format!("summarize.no_new_messages={}", outcome.no_new_messages));
    report.detail(format!("summarize.summarized={}", outcome.summarized));
    report.detail(format!("sync.synced={}", outcome.synced));
    report.detail(format!("sync.failed={}", outcome.sync_failed));
    if outcome.sync_failed > 0 {
        if remote_configured {
            report.issue(format!(
                "{} summaries were not synced; they will be retried next cycle",
                outcome.sync_failed
            ));
        } else {
            report.issue("remote index not configured; summaries were written but not synced");
        }
    }
    for failure in &outcome.failures {
        report.issue(failure.clone());
    }
}
