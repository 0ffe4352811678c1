use crate::archivist::audit;
use crate::archivist::chunker::{chunk, new_messages, newest_timestamp};
use crate::archivist::config::ArchivistConfig;
use crate::archivist::manifest::ManifestStore;
use crate::archivist::paths::done_marker_for;
use crate::archivist::remote::{RemoteSync, SyncRequest};
use crate::archivist::snapshot::{self, ExtractOutcome, Snapshot};
use crate::archivist::source::SourceStore;
use crate::archivist::summarizer::Summarizer;
use crate::archivist::util::{append_text, ensure_dir, now_epoch_secs, write_atomic};
use crate::error::ArchivistError;
use anyhow::{Context, Result};
use chrono::Local;
use fs2::FileExt;
use serde::Serialize;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

const SUMMARY_SUFFIX: &str = "_summary.md";
const SECTION_DATE_FORMAT: &str = "%Y-%m-%d %H:%M";

/// Exclusive per-cycle lock; released when dropped.
pub struct CycleLock {
    file: File,
    path: PathBuf,
}

impl CycleLock {
    pub fn acquire(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            ensure_dir(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(path)
            .with_context(|| format!("failed to open lock file {}", path.display()))?;
        if file.try_lock_exclusive().is_err() {
            return Err(ArchivistError::CycleLocked(path.display().to_string()).into());
        }
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }
}

impl Drop for CycleLock {
    fn drop(&mut self) {
        if let Err(err) = FileExt::unlock(&self.file) {
            tracing::debug!(path = %self.path.display(), "failed to release cycle lock: {err}");
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotState {
    /// Completion marker still valid.
    Unchanged,
    NoNewMessages,
    Synced,
    SyncFailed,
    /// Summarized, but no remote index is configured.
    SyncDisabled,
}

impl SnapshotState {
    fn did_work(self) -> bool {
        matches!(self, Self::Synced | Self::SyncFailed | Self::SyncDisabled)
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CycleOutcome {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extract: Option<ExtractOutcome>,
    pub snapshots: usize,
    pub unchanged: usize,
    pub no_new_messages: usize,
    pub summarized: usize,
    pub synced: usize,
    pub sync_failed: usize,
    pub failures: Vec<String>,
}

impl CycleOutcome {
    fn record(&mut self, state: SnapshotState) {
        match state {
            SnapshotState::Unchanged => self.unchanged += 1,
            SnapshotState::NoNewMessages => self.no_new_messages += 1,
            SnapshotState::Synced => {
                self.summarized += 1;
                self.synced += 1;
            }
            SnapshotState::SyncFailed | SnapshotState::SyncDisabled => {
                self.summarized += 1;
                self.sync_failed += 1;
            }
        }
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
            && self.sync_failed == 0
            && self.extract.as_ref().is_none_or(|e| e.failures.is_empty())
    }
}

/// `{dir}/{group}/{stem}.json` -> `{stem}_summary.md`
pub fn summary_filename(snapshot_path: &Path) -> String {
    let stem = snapshot_path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("unknown");
    format!("{stem}{SUMMARY_SUFFIX}")
}

/// A marker counts only while it is at least as new as its snapshot.
pub fn marker_is_valid(snapshot_path: &Path) -> bool {
    let marker = done_marker_for(snapshot_path);
    let modified = |p: &Path| fs::metadata(p).and_then(|m| m.modified()).ok();
    match (modified(&marker), modified(snapshot_path)) {
        (Some(done), Some(snap)) => done >= snap,
        _ => false,
    }
}

fn write_marker(snapshot_path: &Path) -> Result<()> {
    let stamp = format!("{}\n", now_epoch_secs()?);
    write_atomic(&done_marker_for(snapshot_path), stamp.as_bytes())
}

fn remote_group(snapshot: &Snapshot) -> &str {
    if snapshot.workspace_slug.trim().is_empty() {
        &snapshot.workspace
    } else {
        &snapshot.workspace_slug
    }
}

pub struct Pipeline<'a> {
    cfg: &'a ArchivistConfig,
    manifest: ManifestStore,
    summarizer: Summarizer,
    remote: Option<RemoteSync>,
}

impl<'a> Pipeline<'a> {
    pub fn from_config(cfg: &'a ArchivistConfig) -> Result<Self> {
        let manifest = ManifestStore::new(cfg.paths.manifest_file());
        let summarizer = Summarizer::from_config(&cfg.summary)?;
        let remote = RemoteSync::from_config(&cfg.remote, manifest.clone())?;
        Ok(Self::new(cfg, summarizer, remote))
    }

    pub fn new(cfg: &'a ArchivistConfig, summarizer: Summarizer, remote: Option<RemoteSync>) -> Self {
        Self {
            cfg,
            manifest: ManifestStore::new(cfg.paths.manifest_file()),
            summarizer,
            remote,
        }
    }

    pub fn lock(&self) -> Result<CycleLock> {
        CycleLock::acquire(&self.cfg.paths.cycle_lock_file())
    }

    /// Snapshot stage only. Fails when the source cannot be opened.
    pub fn extract(&self) -> Result<ExtractOutcome> {
        let store = SourceStore::open_read_only(&self.cfg.paths.source_db)?;
        let outcome = snapshot::extract(&store, &self.cfg.paths.snapshot_dir)?;
        audit::record(
            &self.cfg.paths,
            "extract",
            if outcome.failures.is_empty() { "ok" } else { "degraded" },
            &format!(
                "groups={} written={} unchanged={} ghosts_removed={}",
                outcome.groups, outcome.written, outcome.unchanged, outcome.ghosts_removed
            ),
        );
        Ok(outcome)
    }

    /// Summarize and sync every snapshot whose marker is stale.
    pub fn summarize_pending(&self) -> Result<CycleOutcome> {
        let snapshots = snapshot::list_snapshots(&self.cfg.paths.snapshot_dir)?;
        let mut outcome = CycleOutcome {
            snapshots: snapshots.len(),
            ..CycleOutcome::default()
        };
        let pause = Duration::from_secs(self.cfg.pipeline.rate_limit_secs);
        let mut pause_before_next = false;

        for path in &snapshots {
            if pause_before_next && !pause.is_zero() {
                thread::sleep(pause);
            }
            pause_before_next = false;
            match self.process_snapshot(path) {
                Ok(state) => {
                    tracing::debug!(path = %path.display(), ?state, "snapshot processed");
                    outcome.record(state);
                    pause_before_next = state.did_work();
                }
                Err(err) => {
                    tracing::warn!(
                        target_path = %path.display(),
                        operation = "process_snapshot",
                        "{err:#}"
                    );
                    outcome
                        .failures
                        .push(format!("{}: {err:#}", path.display()));
                }
            }
        }

        audit::record(
            &self.cfg.paths,
            "summarize",
            if outcome.is_clean() { "ok" } else { "degraded" },
            &format!(
                "snapshots={} unchanged={} no_new={} summarized={} synced={} sync_failed={}",
                outcome.snapshots,
                outcome.unchanged,
                outcome.no_new_messages,
                outcome.summarized,
                outcome.synced,
                outcome.sync_failed
            ),
        );
        Ok(outcome)
    }

    /// Full cycle under the cycle lock: extract, then summarize and sync.
    pub fn run_cycle(&self) -> Result<CycleOutcome> {
        let _lock = self.lock()?;
        let extracted = match self.extract() {
            Ok(outcome) => outcome,
            Err(err) => {
                audit::record(&self.cfg.paths, "extract", "failed", &format!("{err:#}"));
                return Err(err);
            }
        };
        let mut outcome = self.summarize_pending()?;
        outcome.extract = Some(extracted);
        Ok(outcome)
    }

    pub fn process_snapshot(&self, path: &Path) -> Result<SnapshotState> {
        if marker_is_valid(path) {
            return Ok(SnapshotState::Unchanged);
        }
        let snapshot = snapshot::load_snapshot(path)?;
        let filename = summary_filename(path);
        let since = self
            .manifest
            .read()
            .lookup(&filename)
            .and_then(|entry| entry.last_message_timestamp);

        let fresh = new_messages(&snapshot.messages, since);
        if fresh.is_empty() {
            write_marker(path)?;
            return Ok(SnapshotState::NoNewMessages);
        }

        let summary_path = self.cfg.paths.summary_dir.join(&filename);
        let blocks = chunk(
            &fresh,
            self.cfg.chunking.max_chars,
            self.cfg.chunking.max_messages,
        );
        tracing::info!(
            doc = %filename,
            new_messages = fresh.len(),
            blocks = blocks.len(),
            "summarizing"
        );

        let date = Local::now().format(SECTION_DATE_FORMAT).to_string();
        let heading = if summary_path.exists() {
            format!("\n## Update: {date}\n\n")
        } else {
            format!(
                "# Memory: {}\n\n**Workspace:** {} | **Date:** {date}\n\n",
                snapshot.title, snapshot.workspace
            )
        };
        append_text(&summary_path, &heading)?;

        for (idx, block) in blocks.iter().enumerate() {
            if idx > 0 {
                self.summarizer.pause_between_blocks();
            }
            tracing::debug!(doc = %filename, part = idx + 1, messages = block.message_count, "block");
            let text = self.summarizer.summarize(&block.text, &filename);
            append_text(
                &summary_path,
                &format!("### Part {}\n{}\n\n", idx + 1, text.trim_end()),
            )?;
        }

        let Some(remote) = &self.remote else {
            tracing::warn!(doc = %filename, operation = "sync", "no remote index configured");
            return Ok(SnapshotState::SyncDisabled);
        };
        let document = fs::read_to_string(&summary_path)
            .with_context(|| format!("failed to read {}", summary_path.display()))?;
        let relative = path
            .strip_prefix(&self.cfg.paths.snapshot_dir)
            .ok()
            .map(|p| p.to_string_lossy().into_owned());
        let synced = remote.sync(&SyncRequest {
            text: &document,
            filename: &filename,
            group: remote_group(&snapshot),
            filepath: relative.as_deref(),
        })?;
        if synced.is_none() {
            return Ok(SnapshotState::SyncFailed);
        }

        let newest = newest_timestamp(&snapshot.messages);
        self.manifest.upsert(&filename, |entry| {
            entry.last_message_timestamp = entry.last_message_timestamp.max(newest);
        })?;
        write_marker(path)?;
        Ok(SnapshotState::Synced)
    }
}

#[cfg(test)]
mod tests {
    use super::{CycleLock, Pipeline, SnapshotState, marker_is_valid, summary_filename};
    use crate::archivist::config::ArchivistConfig;
    use crate::archivist::manifest::ManifestStore;
    use crate::archivist::paths::{ArchivistPaths, done_marker_for};
    use crate::archivist::remote::RemoteSync;
    use crate::archivist::remote::fake::FakeIndex;
    use crate::archivist::source::fixture::{add_chat, add_group, add_thread, create_schema};
    use crate::archivist::summarizer::{CompletionBackend, CompletionError, Summarizer};
    use crate::error::ArchivistError;
    use rusqlite::Connection;
    use serde_json::json;
    use std::cell::RefCell;
    use std::fs;
    use std::path::{Path, PathBuf};
    use std::rc::Rc;
    use std::time::Duration;
    use tempfile::{TempDir, tempdir};

    #[derive(Clone, Default)]
    struct CountingBackend {
        blocks: Rc<RefCell<Vec<String>>>,
    }

    impl CompletionBackend for CountingBackend {
        fn complete(&self, _system: &str, user: &str) -> Result<String, CompletionError> {
            self.blocks.borrow_mut().push(user.to_string());
            Ok(format!("- summary #{}", self.blocks.borrow().len()))
        }
    }

    struct Harness {
        _tmp: TempDir,
        cfg: ArchivistConfig,
        db: Connection,
        backend: CountingBackend,
        index: FakeIndex,
    }

    impl Harness {
        fn new() -> Self {
            let tmp = tempdir().expect("tempdir");
            let mut cfg = ArchivistConfig::with_paths(ArchivistPaths::under(tmp.path()));
            cfg.pipeline.rate_limit_secs = 0;
            cfg.chunking.max_messages = 2;
            let db = create_schema(&cfg.paths.source_db);
            add_group(&db, 1, "Ops", "ops");
            add_thread(&db, 3, 1, "Plan");
            add_chat(&db, 1, Some(3), "step one", "ok", 1_700_000_000);
            add_chat(&db, 1, Some(3), "step two", "ok", 1_700_000_060);
            add_chat(&db, 1, Some(3), "step three", "ok", 1_700_000_120);
            Self {
                _tmp: tmp,
                cfg,
                db,
                backend: CountingBackend::default(),
                index: FakeIndex::default(),
            }
        }

        fn pipeline(&self, with_remote: bool) -> Pipeline<'_> {
            let summarizer =
                Summarizer::with_backend(Box::new(self.backend.clone()), 200, Duration::ZERO);
            let remote = with_remote.then(|| {
                RemoteSync::with_index(
                    Box::new(self.index.clone()),
                    ManifestStore::new(self.cfg.paths.manifest_file()),
                )
            });
            Pipeline::new(&self.cfg, summarizer, remote)
        }

        fn snapshot_path(&self) -> PathBuf {
            self.cfg.paths.snapshot_dir.join("Ops").join("Plan_3.json")
        }

        fn summary(&self) -> String {
            fs::read_to_string(self.cfg.paths.summary_dir.join("Plan_3_summary.md"))
                .expect("summary")
        }
    }

    fn manifest_bytes(path: &Path) -> Vec<u8> {
        fs::read(path).expect("manifest")
    }

    #[test]
    fn summary_filename_uses_snapshot_stem() {
        assert_eq!(
            summary_filename(Path::new("/a/Ops/Plan_3.json")),
            "Plan_3_summary.md"
        );
    }

    #[test]
    fn full_cycle_summarizes_syncs_and_then_idles() {
        let h = Harness::new();
        h.index
            .uploads
            .borrow_mut()
            .push_back(json!({"success": true, "documents": [{"id": "doc-1"}]}));
        let pipeline = h.pipeline(true);

        let first = pipeline.run_cycle().expect("cycle");
        assert_eq!(first.synced, 1);
        assert_eq!(h.backend.blocks.borrow().len(), 2);
        assert!(marker_is_valid(&h.snapshot_path()));

        let summary = h.summary();
        assert!(summary.starts_with("# Memory: Plan\n\n**Workspace:** Ops | **Date:** "));
        assert!(summary.contains("### Part 1\n- summary #1\n\n### Part 2\n- summary #2\n"));

        let manifest = ManifestStore::new(h.cfg.paths.manifest_file()).read();
        let entry = manifest.lookup("Plan_3_summary.md").expect("entry");
        assert_eq!(entry.document_id.as_deref(), Some("doc-1"));
        assert_eq!(entry.last_message_timestamp, Some(1_700_000_120_000));
        assert_eq!(entry.filepath.as_deref(), Some("Ops/Plan_3.json"));

        let manifest_before = manifest_bytes(&h.cfg.paths.manifest_file());
        let second = pipeline.run_cycle().expect("second cycle");
        assert_eq!(second.unchanged, 1);
        assert_eq!(second.extract.as_ref().map(|e| e.written), Some(0));
        assert_eq!(h.backend.blocks.borrow().len(), 2);
        assert_eq!(h.index.calls().len(), 2);
        assert_eq!(manifest_bytes(&h.cfg.paths.manifest_file()), manifest_before);
    }

    #[test]
    fn new_messages_append_a_dated_update_and_replace_remote_copy() {
        let h = Harness::new();
        h.index.uploads.borrow_mut().extend([
            json!({"success": true, "id": "doc-1"}),
            json!({"success": true, "id": "doc-2"}),
        ]);
        let pipeline = h.pipeline(true);
        pipeline.run_cycle().expect("first");

        // coarse mtime clocks would otherwise keep the old marker valid
        std::thread::sleep(Duration::from_millis(50));
        add_chat(&h.db, 1, Some(3), "step four", "ok", 1_700_000_180);
        let outcome = pipeline.run_cycle().expect("second");
        assert_eq!(outcome.synced, 1);

        let blocks = h.backend.blocks.borrow();
        assert_eq!(blocks.len(), 3);
        assert_eq!(blocks[2], "User: step four\nAI: ok\n\n");

        let summary = h.summary();
        let update = summary.find("## Update: ").expect("update section");
        assert!(summary[update..].contains("### Part 1\n- summary #3"));
        assert!(h.index.calls().contains(&"delete_direct doc-1".to_string()));

        let manifest = ManifestStore::new(h.cfg.paths.manifest_file()).read();
        let entry = manifest.lookup("Plan_3_summary.md").expect("entry");
        assert_eq!(entry.document_id.as_deref(), Some("doc-2"));
        assert_eq!(entry.previous_document_id, None);
        assert_eq!(entry.last_message_timestamp, Some(1_700_000_180_000));
    }

    #[test]
    fn failed_sync_leaves_no_marker_and_no_watermark() {
        let h = Harness::new();
        h.index
            .uploads
            .borrow_mut()
            .push_back(json!({"success": true}));
        let pipeline = h.pipeline(true);

        let outcome = pipeline.run_cycle().expect("cycle");
        assert_eq!(outcome.sync_failed, 1);
        assert!(!outcome.is_clean());
        assert!(!done_marker_for(&h.snapshot_path()).exists());
        assert!(h.summary().contains("### Part 1"));
        assert!(
            ManifestStore::new(h.cfg.paths.manifest_file())
                .read()
                .lookup("Plan_3_summary.md")
                .is_none()
        );
    }

    #[test]
    fn without_remote_the_summary_is_written_but_not_marked() {
        let h = Harness::new();
        let pipeline = h.pipeline(false);
        let outcome = pipeline.run_cycle().expect("cycle");
        assert_eq!(outcome.summarized, 1);
        assert_eq!(outcome.synced, 0);
        assert!(!done_marker_for(&h.snapshot_path()).exists());
    }

    #[test]
    fn snapshot_already_summarized_is_marked_without_calls() {
        let h = Harness::new();
        let pipeline = h.pipeline(true);
        pipeline.extract().expect("extract");
        ManifestStore::new(h.cfg.paths.manifest_file())
            .upsert("Plan_3_summary.md", |e| {
                e.last_message_timestamp = Some(1_700_000_120_000)
            })
            .expect("seed");

        let state = pipeline
            .process_snapshot(&h.snapshot_path())
            .expect("process");
        assert_eq!(state, SnapshotState::NoNewMessages);
        assert!(marker_is_valid(&h.snapshot_path()));
        assert!(h.backend.blocks.borrow().is_empty());
        assert!(h.index.calls().is_empty());
    }

    #[test]
    fn corrupt_snapshot_does_not_stop_its_siblings() {
        let h = Harness::new();
        h.index
            .uploads
            .borrow_mut()
            .push_back(json!({"success": true, "id": "doc-1"}));
        let pipeline = h.pipeline(true);
        pipeline.extract().expect("extract");
        let broken = h.cfg.paths.snapshot_dir.join("Ops").join("Broken_9.json");
        fs::write(&broken, "not json").expect("corrupt");

        let outcome = pipeline.summarize_pending().expect("summarize");
        assert_eq!(outcome.snapshots, 2);
        assert_eq!(outcome.synced, 1);
        assert_eq!(outcome.failures.len(), 1);
        assert!(outcome.failures[0].contains("Broken_9.json"));
        assert!(marker_is_valid(&h.snapshot_path()));
        assert!(!done_marker_for(&broken).exists());
    }

    #[test]
    fn overlapping_cycle_is_rejected() {
        let h = Harness::new();
        let _held = CycleLock::acquire(&h.cfg.paths.cycle_lock_file()).expect("lock");
        let err = h.pipeline(false).run_cycle().err().expect("locked");
        assert!(matches!(
            err.downcast_ref::<ArchivistError>(),
            Some(ArchivistError::CycleLocked(_))
        ));
    }

    #[test]
    fn missing_source_fails_the_cycle() {
        let mut h = Harness::new();
        h.cfg.paths.source_db = h.cfg.paths.home.join("absent.db");
        let err = h.pipeline(false).run_cycle().err().expect("fatal");
        assert!(matches!(
            err.downcast_ref::<ArchivistError>(),
            Some(ArchivistError::SourceUnavailable(_))
        ));
    }
}
