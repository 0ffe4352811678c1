use crate::archivist::paths::{self, ArchivistPaths};
use crate::archivist::schedule;
use crate::error::ArchivistError;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::PathBuf;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    /// Time of day (`04:00`, `4h30`) used when `interval_hours >= 24`.
    pub time: String,
    pub interval_hours: u64,
    /// IANA zone name; local time when unset.
    pub timezone: Option<String>,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            time: "04:00".to_string(),
            interval_hours: 24,
            timezone: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    pub max_chars: usize,
    pub max_messages: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_chars: 3500,
            max_messages: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SummaryConfig {
    pub word_limit: u32,
    pub model_url: Option<String>,
    pub model: String,
    pub api_key: Option<String>,
    pub timeout_secs: u64,
    pub temperature: f64,
    pub max_tokens: u32,
    pub block_pause_ms: u64,
    pub simulate: bool,
}

impl SummaryConfig {
    pub fn endpoint(&self) -> Option<&str> {
        self.model_url.as_deref().map(str::trim).filter(|u| !u.is_empty())
    }
}

impl Default for SummaryConfig {
    fn default() -> Self {
        Self {
            word_limit: 200,
            model_url: None,
            model: "qwen2.5:3b".to_string(),
            api_key: None,
            timeout_secs: 600,
            temperature: 0.1,
            max_tokens: 500,
            block_pause_ms: 1000,
            simulate: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub upload_timeout_secs: u64,
    pub request_timeout_secs: u64,
}

impl RemoteConfig {
    pub fn endpoint(&self) -> Option<&str> {
        self.base_url.as_deref().map(str::trim).filter(|u| !u.is_empty())
    }
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            api_key: None,
            upload_timeout_secs: 60,
            request_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Pause between snapshots that reached the model or the remote index.
    pub rate_limit_secs: u64,
    /// How long `watch` waits for the source database file to appear.
    pub source_wait_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            rate_limit_secs: 5,
            source_wait_secs: 60,
        }
    }
}

/// Process-wide settings, built once and passed by reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchivistConfig {
    pub paths: ArchivistPaths,
    pub schedule: ScheduleConfig,
    pub chunking: ChunkingConfig,
    pub summary: SummaryConfig,
    pub remote: RemoteConfig,
    pub pipeline: PipelineConfig,
}

impl ArchivistConfig {
    pub fn with_paths(paths: ArchivistPaths) -> Self {
        Self {
            paths,
            schedule: ScheduleConfig::default(),
            chunking: ChunkingConfig::default(),
            summary: SummaryConfig::default(),
            remote: RemoteConfig::default(),
            pipeline: PipelineConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FilePaths {
    source_db: Option<PathBuf>,
    snapshot_dir: Option<PathBuf>,
    summary_dir: Option<PathBuf>,
    logs_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct PartialArchivistConfig {
    paths: Option<FilePaths>,
    schedule: Option<ScheduleConfig>,
    chunking: Option<ChunkingConfig>,
    summary: Option<SummaryConfig>,
    remote: Option<RemoteConfig>,
    pipeline: Option<PipelineConfig>,
}

fn env_first(vars: &[&str]) -> Option<String> {
    for var in vars {
        if let Ok(v) = env::var(var) {
            let trimmed = v.trim();
            if !trimmed.is_empty() {
                return Some(trimmed.to_string());
            }
        }
    }
    None
}

/// Values that do not parse as `T` (including out-of-range numbers) keep the fallback.
fn parse_or<T: FromStr>(raw: Option<String>, fallback: T) -> T {
    raw.and_then(|v| v.parse::<T>().ok()).unwrap_or(fallback)
}

fn env_or_u64_first(vars: &[&str], fallback: u64) -> u64 {
    parse_or(env_first(vars), fallback)
}

fn env_or_u32_first(vars: &[&str], fallback: u32) -> u32 {
    parse_or(env_first(vars), fallback)
}

fn env_or_usize_first(vars: &[&str], fallback: usize) -> usize {
    parse_or(env_first(vars), fallback)
}

fn env_or_f64_first(vars: &[&str], fallback: f64) -> f64 {
    parse_or(env_first(vars), fallback)
}

fn env_or_bool(var: &str, fallback: bool) -> bool {
    match env::var(var) {
        Ok(v) => match v.trim() {
            "1" | "true" | "TRUE" | "yes" | "on" => true,
            "0" | "false" | "FALSE" | "no" | "off" => false,
            _ => fallback,
        },
        Err(_) => fallback,
    }
}

fn env_or_string_first(vars: &[&str], fallback: &str) -> String {
    env_first(vars).unwrap_or_else(|| fallback.to_string())
}

fn env_or_option_first(vars: &[&str], fallback: Option<String>) -> Option<String> {
    env_first(vars).or(fallback)
}

fn invalid(message: impl Into<String>) -> anyhow::Error {
    ArchivistError::InvalidConfig(message.into()).into()
}

pub fn validate(cfg: &ArchivistConfig) -> Result<()> {
    if cfg.chunking.max_chars == 0 {
        return Err(invalid("chunking.max_chars must be >= 1"));
    }
    if cfg.chunking.max_messages == 0 {
        return Err(invalid("chunking.max_messages must be >= 1"));
    }
    if cfg.summary.word_limit == 0 {
        return Err(invalid("summary.word_limit must be >= 1"));
    }
    if cfg.summary.timeout_secs == 0 {
        return Err(invalid("summary.timeout_secs must be >= 1"));
    }
    if !(0.0..=2.0).contains(&cfg.summary.temperature) {
        return Err(invalid("summary.temperature must be within 0.0..=2.0"));
    }
    if cfg.summary.model.trim().is_empty() {
        return Err(invalid("summary.model cannot be empty"));
    }
    if cfg.remote.upload_timeout_secs == 0 || cfg.remote.request_timeout_secs == 0 {
        return Err(invalid("remote timeouts must be >= 1 second"));
    }
    if cfg.schedule.interval_hours == 0 {
        return Err(invalid("schedule.interval_hours must be >= 1"));
    }
    if schedule::parse_time_of_day(&cfg.schedule.time).is_none() {
        return Err(invalid(format!(
            "schedule.time `{}` is not a time of day (use HH:MM)",
            cfg.schedule.time
        )));
    }
    if let Some(tz) = cfg.schedule.timezone.as_deref()
        && tz.parse::<chrono_tz::Tz>().is_err()
    {
        return Err(invalid(format!("schedule.timezone `{tz}` is unknown")));
    }
    Ok(())
}

fn resolve_config_path(home: &std::path::Path) -> PathBuf {
    if let Ok(custom) = env::var("ARCHIVIST_CONFIG_PATH") {
        let trimmed = custom.trim();
        if !trimmed.is_empty() {
            return PathBuf::from(trimmed);
        }
    }
    home.join("archivist.toml")
}

fn merge_file_config(base: &mut ArchivistConfig, path: &std::path::Path) -> Result<()> {
    if !path.exists() {
        return Ok(());
    }

    let raw = fs::read_to_string(path)
        .map_err(|err| invalid(format!("failed to read {}: {err}", path.display())))?;
    let parsed: PartialArchivistConfig = toml::from_str(&raw)
        .map_err(|err| invalid(format!("failed to parse {}: {err}", path.display())))?;
    if let Some(file_paths) = parsed.paths {
        if let Some(v) = file_paths.source_db {
            base.paths.source_db = v;
        }
        if let Some(v) = file_paths.snapshot_dir {
            base.paths.snapshot_dir = v;
        }
        if let Some(v) = file_paths.summary_dir {
            base.paths.summary_dir = v;
        }
        if let Some(v) = file_paths.logs_dir {
            base.paths.logs_dir = v;
        }
    }
    if let Some(schedule) = parsed.schedule {
        base.schedule = schedule;
    }
    if let Some(chunking) = parsed.chunking {
        base.chunking = chunking;
    }
    if let Some(summary) = parsed.summary {
        base.summary = summary;
    }
    if let Some(remote) = parsed.remote {
        base.remote = remote;
    }
    if let Some(pipeline) = parsed.pipeline {
        base.pipeline = pipeline;
    }
    Ok(())
}

fn apply_env_overrides(cfg: &mut ArchivistConfig) {
    paths::apply_env_overrides(&mut cfg.paths);

    cfg.schedule.time =
        env_or_string_first(&["ARCHIVIST_SCHEDULE_TIME", "SUMMARY_TIME"], &cfg.schedule.time);
    cfg.schedule.interval_hours = env_or_u64_first(
        &["ARCHIVIST_INTERVAL_HOURS", "INTERVAL_HOURS"],
        cfg.schedule.interval_hours,
    );
    cfg.schedule.timezone =
        env_or_option_first(&["ARCHIVIST_TIMEZONE"], cfg.schedule.timezone.take());

    cfg.chunking.max_chars = env_or_usize_first(
        &["ARCHIVIST_CHUNK_CHARS", "CHUNK_SIZE"],
        cfg.chunking.max_chars,
    );
    cfg.chunking.max_messages =
        env_or_usize_first(&["ARCHIVIST_CHUNK_MESSAGES"], cfg.chunking.max_messages);

    cfg.summary.word_limit = env_or_u32_first(
        &["ARCHIVIST_WORD_LIMIT", "WORD_LIMIT"],
        cfg.summary.word_limit,
    );
    cfg.summary.model_url = env_or_option_first(
        &["ARCHIVIST_MODEL_URL", "LITELLM_URL"],
        cfg.summary.model_url.take(),
    );
    cfg.summary.model =
        env_or_string_first(&["ARCHIVIST_MODEL", "BASE_MODEL"], &cfg.summary.model);
    cfg.summary.api_key = env_or_option_first(
        &["ARCHIVIST_MODEL_API_KEY", "LITELLM_API_KEY"],
        cfg.summary.api_key.take(),
    );
    cfg.summary.timeout_secs = env_or_u64_first(
        &["ARCHIVIST_MODEL_TIMEOUT_SECS", "LLM_TIMEOUT"],
        cfg.summary.timeout_secs,
    );
    cfg.summary.temperature =
        env_or_f64_first(&["ARCHIVIST_MODEL_TEMPERATURE"], cfg.summary.temperature);
    cfg.summary.max_tokens =
        env_or_u32_first(&["ARCHIVIST_MODEL_MAX_TOKENS"], cfg.summary.max_tokens);
    cfg.summary.block_pause_ms =
        env_or_u64_first(&["ARCHIVIST_BLOCK_PAUSE_MS"], cfg.summary.block_pause_ms);
    cfg.summary.simulate = env_or_bool("ARCHIVIST_SIMULATE_SUMMARIES", cfg.summary.simulate);

    cfg.remote.base_url = env_or_option_first(
        &["ARCHIVIST_REMOTE_URL", "ANYTHING_LLM_HOST"],
        cfg.remote.base_url.take(),
    );
    cfg.remote.api_key = env_or_option_first(
        &["ARCHIVIST_REMOTE_API_KEY", "ANYTHING_LLM_API_KEY"],
        cfg.remote.api_key.take(),
    );
    cfg.remote.upload_timeout_secs = env_or_u64_first(
        &["ARCHIVIST_UPLOAD_TIMEOUT_SECS"],
        cfg.remote.upload_timeout_secs,
    );
    cfg.remote.request_timeout_secs = env_or_u64_first(
        &["ARCHIVIST_REMOTE_TIMEOUT_SECS"],
        cfg.remote.request_timeout_secs,
    );

    cfg.pipeline.rate_limit_secs = env_or_u64_first(
        &["ARCHIVIST_RATE_LIMIT_SECS", "RATE_LIMIT_SLEEP"],
        cfg.pipeline.rate_limit_secs,
    );
    cfg.pipeline.source_wait_secs =
        env_or_u64_first(&["ARCHIVIST_SOURCE_WAIT_SECS"], cfg.pipeline.source_wait_secs);
}

pub fn load_config() -> Result<ArchivistConfig> {
    let home = paths::archivist_home()?;
    let mut cfg = ArchivistConfig::with_paths(ArchivistPaths::under(&home));
    merge_file_config(&mut cfg, &resolve_config_path(&home))?;
    apply_env_overrides(&mut cfg);
    validate(&cfg)?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::{ArchivistConfig, merge_file_config, parse_or, validate};
    use crate::archivist::paths::ArchivistPaths;
    use std::fs;
    use std::path::{Path, PathBuf};
    use tempfile::tempdir;

    fn base() -> ArchivistConfig {
        ArchivistConfig::with_paths(ArchivistPaths::under(Path::new("/srv/archivist")))
    }

    #[test]
    fn defaults_are_valid() {
        validate(&base()).expect("defaults validate");
    }

    #[test]
    fn file_config_merges_partial_tables() {
        let tmp = tempdir().expect("tempdir");
        let path = tmp.path().join("archivist.toml");
        fs::write(
            &path,
            "[paths]\nsource_db = \"/data/llm.db\"\n\n[summary]\nmodel = \"phi3:mini\"\n",
        )
        .expect("write config");

        let mut cfg = base();
        merge_file_config(&mut cfg, &path).expect("merge");
        assert_eq!(cfg.paths.source_db, PathBuf::from("/data/llm.db"));
        assert_eq!(
            cfg.paths.snapshot_dir,
            PathBuf::from("/srv/archivist/archives")
        );
        assert_eq!(cfg.summary.model, "phi3:mini");
        assert_eq!(cfg.summary.word_limit, 200);
    }

    #[test]
    fn oversized_numbers_keep_the_fallback() {
        assert_eq!(parse_or(Some("4294967496".to_string()), 200u32), 200);
        assert_eq!(parse_or(Some("350".to_string()), 200u32), 350);
        assert_eq!(parse_or(Some("-1".to_string()), 3500usize), 3500);
        assert_eq!(parse_or::<u32>(None, 500), 500);
    }

    #[test]
    fn broken_file_config_is_an_error() {
        let tmp = tempdir().expect("tempdir");
        let path = tmp.path().join("archivist.toml");
        fs::write(&path, "[summary\nmodel=").expect("write config");
        let mut cfg = base();
        assert!(merge_file_config(&mut cfg, &path).is_err());
    }

    #[test]
    fn validate_rejects_zero_budgets_and_bad_zone() {
        let mut cfg = base();
        cfg.chunking.max_chars = 0;
        assert!(validate(&cfg).is_err());

        let mut cfg = base();
        cfg.schedule.timezone = Some("Mars/Olympus".to_string());
        assert!(validate(&cfg).is_err());

        let mut cfg = base();
        cfg.schedule.timezone = Some("Europe/Paris".to_string());
        validate(&cfg).expect("known zone");
    }
}
