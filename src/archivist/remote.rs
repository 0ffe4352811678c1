use crate::archivist::config::RemoteConfig;
use crate::archivist::manifest::ManifestStore;
use crate::archivist::util::{sha256_hex, truncate_with_ellipsis};
use anyhow::{Context, Result};
use reqwest::StatusCode;
use reqwest::blocking::{Client, RequestBuilder, multipart};
use serde_json::Value;
use std::time::Duration;

const ID_KEYS: &[&str] = &["id", "document_id", "doc_id", "file_id"];

type IdStrategy = fn(&Value) -> Option<String>;

/// Probed in order; the first non-empty id wins.
const ID_STRATEGIES: &[IdStrategy] = &[
    id_at_top_level,
    id_in_first_document,
    id_in_data,
    id_in_any_list,
];

fn id_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn id_from_keys(obj: &Value) -> Option<String> {
    ID_KEYS.iter().find_map(|key| obj.get(*key).and_then(id_string))
}

fn id_at_top_level(json: &Value) -> Option<String> {
    id_from_keys(json)
}

fn id_in_first_document(json: &Value) -> Option<String> {
    json.get("documents")?
        .as_array()?
        .first()?
        .get("id")
        .and_then(id_string)
}

fn id_in_data(json: &Value) -> Option<String> {
    let data = json.get("data")?;
    if data.is_object() {
        id_from_keys(data)
    } else {
        None
    }
}

fn id_in_any_list(json: &Value) -> Option<String> {
    json.as_object()?.values().find_map(|value| {
        value
            .as_array()?
            .iter()
            .filter(|item| item.is_object())
            .find_map(|item| item.get("id").and_then(id_string))
    })
}

pub fn discover_document_id(json: &Value) -> Option<String> {
    ID_STRATEGIES.iter().find_map(|strategy| strategy(json))
}

fn document_location(json: &Value) -> Option<String> {
    json.get("documents")?
        .as_array()?
        .first()?
        .get("location")?
        .as_str()
        .filter(|s| !s.trim().is_empty())
        .map(str::to_string)
}

pub fn is_truthy(value: Option<&Value>) -> bool {
    match value {
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().is_some_and(|f| f != 0.0),
        Some(Value::String(s)) => !s.is_empty() && s != "false",
        Some(Value::Array(a)) => !a.is_empty(),
        Some(Value::Object(o)) => !o.is_empty(),
        Some(Value::Null) | None => false,
    }
}

/// Remote document index operations. Deletes answer whether the index
/// confirmed the removal.
pub trait DocumentIndex {
    fn upload(&self, filename: &str, body: &[u8]) -> Result<Value>;
    fn delete_direct(&self, id: &str) -> Result<bool>;
    fn delete_bulk(&self, id: &str) -> Result<bool>;
    fn delete_in_group(&self, group: &str, id: &str) -> Result<bool>;
    fn update_embeddings(&self, group: &str, adds: &[String]) -> Result<()>;
}

pub struct HttpDocumentIndex {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    upload_timeout: Duration,
}

impl HttpDocumentIndex {
    pub fn new(base_url: &str, cfg: &RemoteConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(cfg.request_timeout_secs))
            .build()
            .context("failed to build remote index http client")?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: cfg.api_key.clone().filter(|k| !k.trim().is_empty()),
            upload_timeout: Duration::from_secs(cfg.upload_timeout_secs),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }

    fn read_json(response: reqwest::blocking::Response) -> Result<(StatusCode, Value)> {
        let status = response.status();
        let text = response.text().context("failed to read remote response body")?;
        let json = serde_json::from_str::<Value>(&text).unwrap_or_else(|_| {
            serde_json::json!({
                "status_code": status.as_u16(),
                "text": text,
            })
        });
        Ok((status, json))
    }
}

impl DocumentIndex for HttpDocumentIndex {
    fn upload(&self, filename: &str, body: &[u8]) -> Result<Value> {
        let part = multipart::Part::bytes(body.to_vec())
            .file_name(filename.to_string())
            .mime_str("text/markdown")?;
        let form = multipart::Form::new().part("file", part);
        let request = self
            .client
            .post(self.url("/api/v1/document/upload"))
            .timeout(self.upload_timeout)
            .multipart(form);
        let response = self
            .authorized(request)
            .send()
            .with_context(|| format!("upload of {filename} failed"))?;
        let (_, json) = Self::read_json(response)?;
        Ok(json)
    }

    fn delete_direct(&self, id: &str) -> Result<bool> {
        let request = self.client.delete(self.url(&format!("/api/v1/document/{id}")));
        let response = self.authorized(request).send()?;
        Ok(matches!(
            response.status(),
            StatusCode::OK | StatusCode::NO_CONTENT
        ))
    }

    fn delete_bulk(&self, id: &str) -> Result<bool> {
        let request = self
            .client
            .post(self.url("/api/v1/document/delete"))
            .json(&serde_json::json!({ "ids": [id] }));
        let (status, json) = Self::read_json(self.authorized(request).send()?)?;
        Ok(status == StatusCode::OK
            && (is_truthy(json.get("success")) || is_truthy(json.get("deleted"))))
    }

    fn delete_in_group(&self, group: &str, id: &str) -> Result<bool> {
        let request = self.client.post(self.url(&format!(
            "/api/v1/workspace/{group}/document/{id}/delete"
        )));
        let (status, json) = Self::read_json(self.authorized(request).send()?)?;
        Ok(status == StatusCode::OK && is_truthy(json.get("success")))
    }

    fn update_embeddings(&self, group: &str, adds: &[String]) -> Result<()> {
        let request = self
            .client
            .post(self.url(&format!("/api/v1/workspace/{group}/update-embeddings")))
            .json(&serde_json::json!({ "adds": adds, "deletes": [] }));
        let response = self.authorized(request).send()?;
        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("update-embeddings for {group} returned status {status}");
        }
        Ok(())
    }
}

/// Try each delete flavour in turn; stop at the first confirmed removal.
pub fn retire_document(index: &dyn DocumentIndex, group: &str, id: &str) -> bool {
    let attempts: [(&str, Box<dyn Fn() -> Result<bool> + '_>); 3] = [
        ("delete_direct", Box::new(|| index.delete_direct(id))),
        ("delete_bulk", Box::new(|| index.delete_bulk(id))),
        ("delete_in_group", Box::new(|| index.delete_in_group(group, id))),
    ];
    for (operation, attempt) in attempts {
        match attempt() {
            Ok(true) => return true,
            Ok(false) => tracing::debug!(document = id, operation, "delete not confirmed"),
            Err(err) => tracing::debug!(document = id, operation, "{err:#}"),
        }
    }
    false
}

pub struct SyncRequest<'a> {
    pub text: &'a str,
    pub filename: &'a str,
    pub group: &'a str,
    /// Snapshot path relative to the snapshot root, recorded in the manifest.
    pub filepath: Option<&'a str>,
}

pub struct RemoteSync {
    index: Box<dyn DocumentIndex>,
    manifest: ManifestStore,
}

impl RemoteSync {
    /// `None` when no remote index is configured.
    pub fn from_config(cfg: &RemoteConfig, manifest: ManifestStore) -> Result<Option<Self>> {
        match cfg.endpoint() {
            Some(url) => Ok(Some(Self::with_index(
                Box::new(HttpDocumentIndex::new(url, cfg)?),
                manifest,
            ))),
            None => Ok(None),
        }
    }

    pub fn with_index(index: Box<dyn DocumentIndex>, manifest: ManifestStore) -> Self {
        Self { index, manifest }
    }

    /// Upload, retire the displaced copy, re-embed, record. Returns the new
    /// remote id, or `None` when the upload did not yield one. `Err` only when
    /// the manifest could not be persisted.
    pub fn sync(&self, request: &SyncRequest<'_>) -> Result<Option<String>> {
        let filename = request.filename;
        let response = match self.index.upload(filename, request.text.as_bytes()) {
            Ok(json) => json,
            Err(err) => {
                tracing::warn!(target_doc = filename, operation = "upload", "{err:#}");
                return Ok(None);
            }
        };
        if !is_truthy(response.get("success")) {
            tracing::warn!(
                target_doc = filename,
                operation = "upload",
                "upload rejected: {}",
                truncate_with_ellipsis(&response.to_string(), 300)
            );
            return Ok(None);
        }
        let Some(new_id) = discover_document_id(&response) else {
            tracing::warn!(
                target_doc = filename,
                operation = "upload",
                "upload reported success without a document id"
            );
            return Ok(None);
        };

        let old_id = self
            .manifest
            .read()
            .lookup(filename)
            .and_then(|entry| entry.document_id.clone());
        let retired = match old_id {
            Some(old) if old != new_id => {
                if retire_document(self.index.as_ref(), request.group, &old) {
                    Some(old)
                } else {
                    tracing::warn!(
                        target_doc = filename,
                        document = %old,
                        operation = "retire",
                        "previous remote copy could not be deleted"
                    );
                    None
                }
            }
            _ => None,
        };

        let adds: Vec<String> = document_location(&response).into_iter().collect();
        if let Err(err) = self.index.update_embeddings(request.group, &adds) {
            tracing::warn!(group = request.group, operation = "update_embeddings", "{err:#}");
        }

        let digest = sha256_hex(request.text.as_bytes());
        self.manifest.upsert(filename, |entry| {
            entry.rotate_document_id(&new_id);
            if let Some(old) = retired.as_deref() {
                entry.clear_retired(old);
            }
            entry.group = Some(request.group.to_string());
            if let Some(path) = request.filepath {
                entry.filepath = Some(path.to_string());
            }
            entry.content_sha256 = Some(digest);
        })?;
        Ok(Some(new_id))
    }
}
