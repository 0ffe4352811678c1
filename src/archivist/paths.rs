use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};

pub const MANIFEST_FILE: &str = "manifest.json";
pub const CYCLE_LOCK_FILE: &str = ".archivist.lock";
pub const DONE_SUFFIX: &str = ".done";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchivistPaths {
    pub home: PathBuf,
    pub source_db: PathBuf,
    pub snapshot_dir: PathBuf,
    pub summary_dir: PathBuf,
    pub logs_dir: PathBuf,
}

impl ArchivistPaths {
    pub fn under(home: &Path) -> Self {
        Self {
            home: home.to_path_buf(),
            source_db: home.join("anythingllm.db"),
            snapshot_dir: home.join("archives"),
            summary_dir: home.join("markdowns"),
            logs_dir: home.join("logs"),
        }
    }

    pub fn manifest_file(&self) -> PathBuf {
        self.snapshot_dir.join(MANIFEST_FILE)
    }

    pub fn cycle_lock_file(&self) -> PathBuf {
        self.snapshot_dir.join(CYCLE_LOCK_FILE)
    }

    pub fn audit_log(&self) -> PathBuf {
        self.logs_dir.join("audit.log")
    }
}

/// `{snapshot}.json` -> `{snapshot}.json.done`
pub fn done_marker_for(snapshot: &Path) -> PathBuf {
    let mut raw = snapshot.as_os_str().to_os_string();
    raw.push(DONE_SUFFIX);
    PathBuf::from(raw)
}

fn required_home_dir() -> Result<PathBuf> {
    if let Some(home) = dirs::home_dir() {
        return Ok(home);
    }
    Err(anyhow::anyhow!("HOME directory could not be resolved"))
}

fn env_path_first(vars: &[&str]) -> Option<PathBuf> {
    vars.iter().find_map(|var| match env::var(var) {
        Ok(v) if !v.trim().is_empty() => Some(PathBuf::from(v.trim())),
        _ => None,
    })
}

pub fn archivist_home() -> Result<PathBuf> {
    match env_path_first(&["ARCHIVIST_HOME"]) {
        Some(home) => Ok(home),
        None => Ok(required_home_dir()?.join(".archivist")),
    }
}

/// Apply path overrides from the environment. Legacy variable
/// names are honoured after the `ARCHIVIST_*` ones.
pub fn apply_env_overrides(paths: &mut ArchivistPaths) {
    if let Some(v) = env_path_first(&["ARCHIVIST_DB_PATH", "DB_PATH"]) {
        paths.source_db = v;
    }
    if let Some(v) = env_path_first(&["ARCHIVIST_SNAPSHOT_DIR", "ARCHIVE_PATH"]) {
        paths.snapshot_dir = v;
    }
    if let Some(v) = env_path_first(&["ARCHIVIST_SUMMARY_DIR", "MD_PATH"]) {
        paths.summary_dir = v;
    }
    if let Some(v) = env_path_first(&["ARCHIVIST_LOGS_DIR"]) {
        paths.logs_dir = v;
    }
}

#[cfg(test)]
mod tests {
    use super::{ArchivistPaths, done_marker_for};
    use std::path::{Path, PathBuf};

    #[test]
    fn done_marker_appends_suffix_to_full_name() {
        let got = done_marker_for(Path::new("/a/ws/Title_3.json"));
        assert_eq!(got, PathBuf::from("/a/ws/Title_3.json.done"));
    }

    #[test]
    fn manifest_lives_at_snapshot_root() {
        let paths = ArchivistPaths::under(Path::new("/srv/archivist"));
        assert_eq!(
            paths.manifest_file(),
            PathBuf::from("/srv/archivist/archives/manifest.json")
        );
    }
}
