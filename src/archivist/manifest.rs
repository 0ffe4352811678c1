use crate::archivist::util::{now_epoch_secs, write_atomic};
use anyhow::Result;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Remote ids have been stored as strings and as bare numbers.
fn deserialize_remote_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<Value>::deserialize(deserializer)?;
    Ok(match raw {
        Some(Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    #[serde(default)]
    pub filename: String,
    /// Snapshot path relative to the snapshot root.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filepath: Option<String>,
    #[serde(
        default,
        alias = "any_document_id",
        deserialize_with = "deserialize_remote_id"
    )]
    pub document_id: Option<String>,
    #[serde(
        default,
        alias = "previous_any_document_id",
        deserialize_with = "deserialize_remote_id"
    )]
    pub previous_document_id: Option<String>,
    /// Newest message (ms) already folded into the remote summary.
    #[serde(default)]
    pub last_message_timestamp: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_sha256: Option<String>,
    #[serde(default)]
    pub updated_at_epoch_secs: u64,
}

impl ManifestEntry {
    /// Make `new_id` current. The displaced id, if different, waits in the
    /// previous slot until it is retired remotely.
    pub fn rotate_document_id(&mut self, new_id: &str) {
        match self.document_id.take() {
            Some(old) if old != new_id => self.previous_document_id = Some(old),
            _ => self.previous_document_id = None,
        }
        self.document_id = Some(new_id.to_string());
    }

    pub fn clear_retired(&mut self, retired_id: &str) {
        if self.previous_document_id.as_deref() == Some(retired_id) {
            self.previous_document_id = None;
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Manifest {
    entries: BTreeMap<String, ManifestEntry>,
}

impl Manifest {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> impl Iterator<Item = (&String, &ManifestEntry)> {
        self.entries.iter()
    }

    /// Key of the entry for `name`: exact key or `filename` match first, then
    /// a stored `filepath` ending with `name`.
    pub fn lookup_key(&self, name: &str) -> Option<String> {
        if self.entries.contains_key(name) {
            return Some(name.to_string());
        }
        if let Some((key, _)) = self.entries.iter().find(|(_, e)| e.filename == name) {
            return Some(key.clone());
        }
        self.entries
            .iter()
            .find(|(_, e)| e.filepath.as_deref().is_some_and(|p| p.ends_with(name)))
            .map(|(key, _)| key.clone())
    }

    pub fn lookup(&self, name: &str) -> Option<&ManifestEntry> {
        let key = self.lookup_key(name)?;
        self.entries.get(&key)
    }

    pub fn entry_mut(&mut self, name: &str) -> &mut ManifestEntry {
        let key = self.lookup_key(name).unwrap_or_else(|| name.to_string());
        self.entries
            .entry(key)
            .or_insert_with(|| ManifestEntry {
                filename: name.to_string(),
                ..ManifestEntry::default()
            })
    }
}

/// File-backed manifest at `{snapshot_dir}/manifest.json`.
#[derive(Debug, Clone)]
pub struct ManifestStore {
    path: PathBuf,
}

impl ManifestStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Missing or unreadable manifests read as empty.
    pub fn read(&self) -> Manifest {
        if !self.path.exists() {
            return Manifest::default();
        }
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) => {
                tracing::warn!(path = %self.path.display(), "manifest unreadable: {err}");
                return Manifest::default();
            }
        };
        match serde_json::from_str::<Manifest>(&raw) {
            Ok(manifest) => manifest,
            Err(err) => {
                tracing::warn!(
                    path = %self.path.display(),
                    "manifest corrupt, starting empty: {err}"
                );
                Manifest::default()
            }
        }
    }

    pub fn write(&self, manifest: &Manifest) -> Result<()> {
        let mut body = serde_json::to_vec_pretty(manifest)?;
        body.push(b'\n');
        write_atomic(&self.path, &body)
    }

    /// Read-modify-write of a single entry.
    pub fn upsert<F>(&self, filename: &str, update: F) -> Result<ManifestEntry>
    where
        F: FnOnce(&mut ManifestEntry),
    {
        let mut manifest = self.read();
        let entry = manifest.entry_mut(filename);
        update(entry);
        if entry.filename.is_empty() {
            entry.filename = filename.to_string();
        }
        entry.updated_at_epoch_secs = now_epoch_secs()?;
        let updated = entry.clone();
        self.write(&manifest)?;
        Ok(updated)
    }
}
