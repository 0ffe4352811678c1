use anyhow::Result;

use crate::archivist::config::load_config;
use crate::archivist::manifest::ManifestStore;
use crate::commands::CommandReport;

pub fn run(filename: &str) -> Result<CommandReport> {
    let cfg = load_config()?;
    let mut report = CommandReport::new("inspect");
    let manifest = ManifestStore::new(cfg.paths.manifest_file()).read();

    let Some(key) = manifest.lookup_key(filename) else {
        report.issue(format!("no manifest entry for {filename}"));
        return Ok(report);
    };
    let Some(entry) = manifest.lookup(&key) else {
        report.issue(format!("no manifest entry for {filename}"));
        return Ok(report);
    };

    let none = || "-".to_string();
    report.detail(format!("key={key}"));
    report.detail(format!("filename={}", entry.filename));
    report.detail(format!(
        "filepath={}",
        entry.filepath.clone().unwrap_or_else(none)
    ));
    report.detail(format!(
        "document_id={}",
        entry.document_id.clone().unwrap_or_else(none)
    ));
    report.detail(format!(
        "previous_document_id={}",
        entry.previous_document_id.clone().unwrap_or_else(none)
    ));
    report.detail(format!(
        "last_message_timestamp={}",
        entry
            .last_message_timestamp
            .map(|ts| ts.to_string())
            .unwrap_or_else(none)
    ));
    report.detail(format!("group={}", entry.group.clone().unwrap_or_else(none)));
    report.detail(format!(
        "content_sha256={}",
        entry.content_sha256.clone().unwrap_or_else(none)
    ));
    report.detail(format!("updated_at_epoch_secs={}", entry.updated_at_epoch_secs));
    Ok(report)
}
