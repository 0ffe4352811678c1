use anyhow::Result;
use std::env;

use crate::archivist::config::{ArchivistConfig, load_config};
use crate::archivist::manifest::ManifestStore;
use crate::archivist::pipeline::marker_is_valid;
use crate::archivist::schedule::Schedule;
use crate::archivist::snapshot::list_snapshots;
use crate::commands::CommandReport;
use crate::error::ArchivistError;

mod generated {
    include!(concat!(env!("OUT_DIR"), "/archivist_env_allowlist.rs"));
}

const ENV_PREFIX: &str = "ARCHIVIST_";

fn unknown_env_keys<I>(keys: I, prefix: &str, allowlist: &[&str]) -> Vec<String>
where
    I: IntoIterator<Item = String>,
{
    let mut unknown: Vec<String> = keys
        .into_iter()
        .filter(|key| key.starts_with(prefix) && !allowlist.contains(&key.as_str()))
        .collect();
    unknown.sort();
    unknown
}

fn describe_model(cfg: &ArchivistConfig) -> String {
    if cfg.summary.simulate {
        return "simulated".to_string();
    }
    match cfg.summary.endpoint() {
        Some(url) => format!("{url} ({})", cfg.summary.model),
        None => "not configured".to_string(),
    }
}

fn report_config(report: &mut CommandReport, cfg: &ArchivistConfig) -> Result<()> {
    let paths = &cfg.paths;
    report.detail(format!("home={}", paths.home.display()));
    report.detail(format!("source_db={}", paths.source_db.display()));
    report.detail(format!("snapshot_dir={}", paths.snapshot_dir.display()));
    report.detail(format!("summary_dir={}", paths.summary_dir.display()));
    report.detail(format!("audit_log={}", paths.audit_log().display()));

    match Schedule::from_config(&cfg.schedule) {
        Ok(schedule) => report.detail(format!("schedule={}", schedule.describe())),
        Err(err) => report.issue(format!("schedule invalid: {err:#}")),
    }
    report.detail(format!("model={}", describe_model(cfg)));
    report.detail(format!(
        "remote={}",
        cfg.remote.endpoint().unwrap_or("not configured")
    ));

    if !paths.source_db.is_file() {
        report.issue(format!(
            "{}: source database missing at {}",
            ArchivistError::SourceUnavailable(String::new()).code(),
            paths.source_db.display()
        ));
    }

    let snapshots = list_snapshots(&paths.snapshot_dir)?;
    let pending = snapshots.iter().filter(|p| !marker_is_valid(p)).count();
    report.detail(format!("snapshots={}", snapshots.len()));
    report.detail(format!("snapshots.pending={pending}"));

    let store = ManifestStore::new(paths.manifest_file());
    report.detail(format!("manifest={}", store.path().display()));
    let manifest = store.read();
    let awaiting_retirement = manifest
        .entries()
        .filter(|(_, e)| e.previous_document_id.is_some())
        .count();
    report.detail(format!("manifest.entries={}", manifest.len()));
    if manifest.is_empty() {
        report.detail("manifest empty: nothing synced yet");
    }
    report.detail(format!(
        "manifest.awaiting_retirement={awaiting_retirement}"
    ));
    Ok(())
}

pub fn run() -> Result<CommandReport> {
    let mut report = CommandReport::new("status");

    match load_config() {
        Ok(cfg) => report_config(&mut report, &cfg)?,
        Err(err) => {
            let code = err
                .downcast_ref::<ArchivistError>()
                .map(ArchivistError::code)
                .unwrap_or("E000_UNKNOWN");
            report.issue(format!("{code}: {err:#}"));
        }
    }

    let present = env::vars().map(|(key, _)| key);
    for key in unknown_env_keys(present, ENV_PREFIX, generated::GENERATED_ENV_ALLOWLIST) {
        report.issue(format!("unknown environment variable {key}"));
    }
    Ok(report)
}
