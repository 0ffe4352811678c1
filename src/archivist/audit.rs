use crate::archivist::paths::ArchivistPaths;
use crate::archivist::util::{append_text, now_epoch_secs};
use anyhow::Result;
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct AuditEvent {
    pub at_epoch_secs: u64,
    pub phase: String,
    pub status: String,
    pub message: String,
}

pub fn append_event(
    paths: &ArchivistPaths,
    phase: &str,
    status: &str,
    message: &str,
) -> Result<()> {
    let event = AuditEvent {
        at_epoch_secs: now_epoch_secs()?,
        phase: phase.to_string(),
        status: status.to_string(),
        message: message.to_string(),
    };
    let line = format!("{}\n", serde_json::to_string(&event)?);
    append_text(&paths.audit_log(), &line)
}

/// Audit failures never abort a cycle.
pub fn record(paths: &ArchivistPaths, phase: &str, status: &str, message: &str) {
    if let Err(err) = append_event(paths, phase, status, message) {
        tracing::warn!(phase, "failed to append audit event: {err:#}");
    }
}

#[cfg(test)]
mod tests {
    use super::append_event;
    use crate::archivist::paths::ArchivistPaths;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn events_are_appended_as_json_lines() {
        let tmp = tempdir().expect("tempdir");
        let paths = ArchivistPaths::under(tmp.path());
        append_event(&paths, "extract", "ok", "3 snapshots").expect("first");
        append_event(&paths, "sync", "degraded", "upload failed").expect("second");

        let raw = fs::read_to_string(paths.audit_log()).expect("read audit");
        let lines: Vec<&str> = raw.lines().collect();
        assert_eq!(lines.len(), 2);
        let second: serde_json::Value = serde_json::from_str(lines[1]).expect("json");
        assert_eq!(second["phase"], "sync");
        assert_eq!(second["status"], "degraded");
    }
}
