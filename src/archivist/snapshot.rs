use crate::archivist::paths::done_marker_for;
use crate::archivist::source::{SourceGroup, SourceMessage, SourceStore, SourceThread};
use crate::archivist::util::write_atomic;
use anyhow::{Context, Result};
use chrono::DateTime;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

const GENERIC_TITLES: &[&str] = &["thread", "new thread"];
const MAX_NAME_CHARS: usize = 60;
pub const DEFAULT_TITLE: &str = "defaultThread";
const LEGACY_DEFAULT_STEM: &str = "default";
const DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConversationId {
    Thread(i64),
    Sentinel(String),
}

impl ConversationId {
    pub fn default_sentinel() -> Self {
        Self::Sentinel("default".to_string())
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Thread(id) => write!(f, "{id}"),
            Self::Sentinel(s) => f.write_str(s),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationKind {
    Thread,
    DefaultThread,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotMessage {
    pub date: String,
    #[serde(default)]
    pub timestamp_ms: Option<i64>,
    pub user: String,
    pub ai: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub id: ConversationId,
    #[serde(rename = "type")]
    pub kind: ConversationKind,
    pub workspace: String,
    #[serde(default)]
    pub workspace_slug: String,
    pub title: String,
    pub messages: Vec<SnapshotMessage>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ExtractOutcome {
    pub groups: usize,
    pub written: usize,
    pub unchanged: usize,
    pub ghosts_removed: usize,
    pub failures: Vec<String>,
}

/// Keep alphanumerics, space, `_` and `-`; everything else becomes `_`.
pub fn sanitize_filename(input: &str) -> String {
    let replaced: String = input
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == ' ' || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect();
    let trimmed = replaced.trim().replace(' ', "_");
    let capped: String = trimmed.chars().take(MAX_NAME_CHARS).collect();
    if capped.is_empty() {
        "unknown".to_string()
    } else {
        capped
    }
}

fn is_generic_title(name: &str) -> bool {
    let lowered = name.trim().to_lowercase();
    lowered.is_empty() || GENERIC_TITLES.contains(&lowered.as_str())
}

fn first_sentence(text: &str) -> Option<String> {
    let line = text.lines().map(str::trim).find(|l| !l.is_empty())?;
    let end = line.find(['.', '?', '!']).unwrap_or(line.len());
    let sentence = line[..end].trim();
    if sentence.is_empty() {
        None
    } else {
        Some(sentence.to_string())
    }
}

pub fn resolve_title(name: Option<&str>, first_prompt: Option<&str>, id: i64) -> String {
    if let Some(name) = name
        && !is_generic_title(name)
    {
        return name.trim().to_string();
    }
    first_prompt
        .and_then(first_sentence)
        .unwrap_or_else(|| format!("Thread_{id}"))
}

fn format_date(timestamp_ms: Option<i64>) -> String {
    timestamp_ms
        .and_then(DateTime::from_timestamp_millis)
        .map(|dt| dt.format(DATE_FORMAT).to_string())
        .unwrap_or_default()
}

fn to_snapshot_messages(messages: &[SourceMessage]) -> Vec<SnapshotMessage> {
    messages
        .iter()
        .map(|m| SnapshotMessage {
            date: format_date(m.created_at_ms),
            timestamp_ms: m.created_at_ms,
            user: m.prompt.clone(),
            ai: m.response.clone(),
        })
        .collect()
}

pub fn thread_snapshot(
    group: &SourceGroup,
    thread: &SourceThread,
    messages: &[SourceMessage],
) -> Snapshot {
    let first_prompt = messages.first().map(|m| m.prompt.as_str());
    Snapshot {
        id: ConversationId::Thread(thread.id),
        kind: ConversationKind::Thread,
        workspace: group.name.clone(),
        workspace_slug: group.slug.clone(),
        title: resolve_title(thread.name.as_deref(), first_prompt, thread.id),
        messages: to_snapshot_messages(messages),
    }
}

pub fn default_snapshot(group: &SourceGroup, messages: &[SourceMessage]) -> Snapshot {
    Snapshot {
        id: ConversationId::default_sentinel(),
        kind: ConversationKind::DefaultThread,
        workspace: group.name.clone(),
        workspace_slug: group.slug.clone(),
        title: DEFAULT_TITLE.to_string(),
        messages: to_snapshot_messages(messages),
    }
}

pub fn group_dir(snapshot_dir: &Path, group: &SourceGroup) -> PathBuf {
    snapshot_dir.join(sanitize_filename(&group.name))
}

/// The default-conversation stem is reserved; threads titled like it are
/// filed as `Thread_{id}`.
pub fn snapshot_file_name(snapshot: &Snapshot, group_id: i64) -> String {
    match &snapshot.id {
        ConversationId::Thread(id) => {
            let stem = sanitize_filename(&snapshot.title);
            if stem == DEFAULT_TITLE || is_default_stem(&stem) {
                format!("Thread_{id}.json")
            } else {
                format!("{stem}_{id}.json")
            }
        }
        ConversationId::Sentinel(_) => format!("{DEFAULT_TITLE}_{group_id}.json"),
    }
}

pub fn load_snapshot(path: &Path) -> Result<Snapshot> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read snapshot {}", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse snapshot {}", path.display()))
}

/// Returns `true` when the file was (re)written. A structurally identical
/// snapshot leaves the file and its mtime untouched.
pub fn write_if_changed(path: &Path, snapshot: &Snapshot) -> Result<bool> {
    if path.exists()
        && let Ok(existing) = load_snapshot(path)
        && existing == *snapshot
    {
        return Ok(false);
    }
    let mut body = serde_json::to_vec_pretty(snapshot)?;
    body.push(b'\n');
    write_atomic(path, &body)?;
    Ok(true)
}

/// Every snapshot file under the per-group directories, sorted by path.
pub fn list_snapshots(snapshot_dir: &Path) -> Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    if !snapshot_dir.is_dir() {
        return Ok(out);
    }
    let groups = fs::read_dir(snapshot_dir)
        .with_context(|| format!("failed to read {}", snapshot_dir.display()))?;
    for group in groups {
        let group = group?.path();
        if !group.is_dir() {
            continue;
        }
        let entries =
            fs::read_dir(&group).with_context(|| format!("failed to read {}", group.display()))?;
        for entry in entries {
            let path = entry?.path();
            if path.is_file() && path.extension().is_some_and(|ext| ext == "json") {
                out.push(path);
            }
        }
    }
    out.sort();
    Ok(out)
}

fn trailing_id(stem: &str) -> Option<i64> {
    let (_, tail) = stem.rsplit_once('_')?;
    tail.parse::<i64>().ok()
}

fn is_default_stem(stem: &str) -> bool {
    stem == LEGACY_DEFAULT_STEM || stem.starts_with(&format!("{DEFAULT_TITLE}_"))
}

/// Delete snapshots in `dir` whose trailing `_{id}` is not in `live`, along
/// with their completion markers. Default-conversation files are never touched.
pub fn remove_ghosts(dir: &Path, live: &BTreeSet<i64>) -> Result<Vec<PathBuf>> {
    let mut removed = Vec::new();
    if !dir.is_dir() {
        return Ok(removed);
    }
    let entries = fs::read_dir(dir).with_context(|| format!("failed to read {}", dir.display()))?;
    for entry in entries {
        let path = entry?.path();
        if !path.is_file() || path.extension().is_none_or(|ext| ext != "json") {
            continue;
        }
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        if is_default_stem(stem) {
            continue;
        }
        let Some(id) = trailing_id(stem) else {
            continue;
        };
        if live.contains(&id) {
            continue;
        }
        fs::remove_file(&path)
            .with_context(|| format!("failed to remove ghost snapshot {}", path.display()))?;
        let marker = done_marker_for(&path);
        if marker.exists() {
            fs::remove_file(&marker)
                .with_context(|| format!("failed to remove marker {}", marker.display()))?;
        }
        removed.push(path);
    }
    removed.sort();
    Ok(removed)
}

fn write_counted(outcome: &mut ExtractOutcome, path: &Path, snapshot: &Snapshot) {
    match write_if_changed(path, snapshot) {
        Ok(true) => {
            tracing::debug!(path = %path.display(), "snapshot written");
            outcome.written += 1;
        }
        Ok(false) => outcome.unchanged += 1,
        Err(err) => {
            tracing::warn!(
                target_path = %path.display(),
                operation = "write_snapshot",
                "{err:#}"
            );
            outcome
                .failures
                .push(format!("write {}: {err:#}", path.display()));
        }
    }
}

fn extract_group(
    store: &SourceStore,
    dir: &Path,
    group: &SourceGroup,
    shared_dir: bool,
    outcome: &mut ExtractOutcome,
) {

    let threads = match store.threads(group.id) {
        Ok(threads) => Some(threads),
        Err(err) => {
            tracing::warn!(group = %group.name, operation = "list_threads", "{err:#}");
            outcome
                .failures
                .push(format!("threads of {}: {err:#}", group.name));
            None
        }
    };

    let mut live = BTreeSet::new();
    for thread in threads.iter().flatten() {
        live.insert(thread.id);
        let messages = match store.thread_messages(thread.id) {
            Ok(messages) => messages,
            Err(err) => {
                tracing::warn!(
                    group = %group.name,
                    thread = thread.id,
                    operation = "read_messages",
                    "{err:#}"
                );
                outcome
                    .failures
                    .push(format!("thread {} of {}: {err:#}", thread.id, group.name));
                continue;
            }
        };
        if messages.is_empty() {
            continue;
        }
        let snapshot = thread_snapshot(group, thread, &messages);
        let path = dir.join(snapshot_file_name(&snapshot, group.id));
        write_counted(outcome, &path, &snapshot);
    }

    match store.default_messages(group.id) {
        Ok(messages) if !messages.is_empty() => {
            let snapshot = default_snapshot(group, &messages);
            let path = dir.join(snapshot_file_name(&snapshot, group.id));
            write_counted(outcome, &path, &snapshot);
        }
        Ok(_) => {}
        Err(err) => {
            tracing::warn!(group = %group.name, operation = "read_default", "{err:#}");
            outcome
                .failures
                .push(format!("default conversation of {}: {err:#}", group.name));
        }
    }

    // Ghosts are only judged against a thread listing that actually succeeded,
    // and never in a directory another group also writes to.
    if threads.is_some() && !shared_dir {
        match remove_ghosts(dir, &live) {
            Ok(removed) => {
                for path in &removed {
                    tracing::info!(path = %path.display(), "removed ghost snapshot");
                }
                outcome.ghosts_removed += removed.len();
            }
            Err(err) => {
                tracing::warn!(group = %group.name, operation = "remove_ghosts", "{err:#}");
                outcome
                    .failures
                    .push(format!("ghost cleanup of {}: {err:#}", group.name));
            }
        }
    }
}

/// Mirror every conversation of every group into `snapshot_dir`.
pub fn extract(store: &SourceStore, snapshot_dir: &Path) -> Result<ExtractOutcome> {
    let groups = store.groups()?;
    let mut outcome = ExtractOutcome {
        groups: groups.len(),
        ..ExtractOutcome::default()
    };
    let mut owners: BTreeMap<PathBuf, Vec<&str>> = BTreeMap::new();
    for group in &groups {
        owners
            .entry(group_dir(snapshot_dir, group))
            .or_default()
            .push(&group.name);
    }
    for (dir, names) in owners.iter().filter(|(_, names)| names.len() > 1) {
        tracing::warn!(
            path = %dir.display(),
            groups = ?names,
            "groups share a snapshot directory; ghost cleanup skipped there"
        );
    }
    for group in &groups {
        let dir = group_dir(snapshot_dir, group);
        let shared = owners.get(&dir).is_some_and(|names| names.len() > 1);
        extract_group(store, &dir, group, shared, &mut outcome);
    }
    Ok(outcome)
}
