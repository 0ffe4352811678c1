use crate::archivist::config::SummaryConfig;
use anyhow::{Context, Result};
use reqwest::blocking::Client;
use serde_json::Value;
use std::thread;
use std::time::Duration;
use thiserror::Error;

const SYSTEM_MARKER: &str = "### System:";
const USER_MARKER: &str = "### User:";

#[derive(Debug, Error)]
pub enum CompletionError {
    #[error("completion request timed out")]
    Timeout,
    #[error("completion request failed: {0}")]
    Api(String),
    #[error("completion response malformed: {0}")]
    Unexpected(String),
    #[error("no completion endpoint configured")]
    NotConfigured,
}

impl CompletionError {
    /// Text written into the summary in place of a real part.
    pub fn placeholder(&self) -> &'static str {
        match self {
            Self::Timeout => "[Timeout LLM]",
            Self::Api(_) => "[LLM API error]",
            Self::Unexpected(_) => "[LLM unexpected response]",
            Self::NotConfigured => "[LLM NOT CONFIGURED]",
        }
    }
}

pub trait CompletionBackend {
    fn complete(&self, system: &str, user: &str) -> Result<String, CompletionError>;
}

/// `POST {base}/chat/completions` on any OpenAI-compatible endpoint.
pub struct OpenAiCompatBackend {
    client: Client,
    url: String,
    model: String,
    api_key: Option<String>,
    temperature: f64,
    max_tokens: u32,
}

impl OpenAiCompatBackend {
    pub fn new(base_url: &str, cfg: &SummaryConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build()
            .context("failed to build completion http client")?;
        Ok(Self {
            client,
            url: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            model: cfg.model.clone(),
            api_key: cfg.api_key.clone().filter(|k| !k.trim().is_empty()),
            temperature: cfg.temperature,
            max_tokens: cfg.max_tokens,
        })
    }
}

fn extract_completion_text(json: &Value) -> Option<String> {
    let content = json
        .get("choices")?
        .as_array()?
        .first()?
        .get("message")?
        .get("content")?;
    match content {
        Value::String(s) => Some(s.to_string()),
        Value::Array(parts) => {
            let chunks: Vec<&str> = parts
                .iter()
                .filter_map(|p| p.get("text").and_then(Value::as_str))
                .collect();
            if chunks.is_empty() {
                None
            } else {
                Some(chunks.join("\n"))
            }
        }
        _ => None,
    }
}

fn classify_transport(err: reqwest::Error) -> CompletionError {
    if err.is_timeout() {
        CompletionError::Timeout
    } else {
        CompletionError::Api(err.to_string())
    }
}

impl CompletionBackend for OpenAiCompatBackend {
    fn complete(&self, system: &str, user: &str) -> Result<String, CompletionError> {
        let payload = serde_json::json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": user}
            ],
            "temperature": self.temperature,
            "max_tokens": self.max_tokens
        });

        let mut request = self.client.post(&self.url).json(&payload);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        let response = request.send().map_err(classify_transport)?;
        let status = response.status();
        if !status.is_success() {
            return Err(CompletionError::Api(format!("status {status}")));
        }
        let body = response.text().map_err(classify_transport)?;
        let json: Value = serde_json::from_str(&body)
            .map_err(|err| CompletionError::Unexpected(format!("invalid json: {err}")))?;
        extract_completion_text(&json)
            .ok_or_else(|| CompletionError::Unexpected("missing choices[0].message.content".into()))
    }
}

/// Stand-in used when summaries are simulated.
pub struct SimulatedBackend;

impl CompletionBackend for SimulatedBackend {
    fn complete(&self, _system: &str, user: &str) -> Result<String, CompletionError> {
        Ok(format!(
            "- Simulated summary of {} characters of conversation\n- No model call was made",
            user.chars().count()
        ))
    }
}

pub struct UnconfiguredBackend;

impl CompletionBackend for UnconfiguredBackend {
    fn complete(&self, _system: &str, _user: &str) -> Result<String, CompletionError> {
        Err(CompletionError::NotConfigured)
    }
}

pub fn system_instruction(word_limit: u32) -> String {
    format!(
        "You are a technical archivist. Summarize the conversation excerpt as terse \
         bullet points only. No preamble and no conclusion. Ignore greetings and small \
         talk. Preserve exact technical parameters such as names, versions, paths, \
         numbers and commands. Hard limit: {word_limit} words."
    )
}

/// Small models sometimes echo the prompt before answering. Drop everything
/// up to the end of the echoed user section.
pub fn strip_prompt_echo(text: &str) -> String {
    if !(text.contains(SYSTEM_MARKER) && text.contains(USER_MARKER)) {
        return text.trim().to_string();
    }
    let Some(pos) = text.find(USER_MARKER) else {
        return text.to_string();
    };
    let rest = &text[pos + USER_MARKER.len()..];
    let tail = if let Some(blank) = rest.find("\n\n") {
        &rest[blank + 2..]
    } else if let Some(newline) = rest.find('\n') {
        &rest[newline + 1..]
    } else {
        ""
    };
    let cleaned = tail.trim();
    if cleaned.is_empty() {
        text.to_string()
    } else {
        cleaned.to_string()
    }
}

pub struct Summarizer {
    backend: Box<dyn CompletionBackend>,
    word_limit: u32,
    block_pause: Duration,
}

impl Summarizer {
    pub fn from_config(cfg: &SummaryConfig) -> Result<Self> {
        let backend: Box<dyn CompletionBackend> = if cfg.simulate {
            Box::new(SimulatedBackend)
        } else {
            match cfg.endpoint() {
                Some(url) => Box::new(OpenAiCompatBackend::new(url, cfg)?),
                None => Box::new(UnconfiguredBackend),
            }
        };
        Ok(Self::with_backend(
            backend,
            cfg.word_limit,
            Duration::from_millis(cfg.block_pause_ms),
        ))
    }

    pub fn with_backend(
        backend: Box<dyn CompletionBackend>,
        word_limit: u32,
        block_pause: Duration,
    ) -> Self {
        Self {
            backend,
            word_limit,
            block_pause,
        }
    }

    /// One round-trip per block. Failures come back as placeholder text.
    pub fn summarize(&self, block: &str, context: &str) -> String {
        let system = system_instruction(self.word_limit);
        match self.backend.complete(&system, block) {
            Ok(text) => strip_prompt_echo(&text),
            Err(err) => {
                tracing::warn!(target_doc = context, operation = "summarize", "{err}");
                err.placeholder().to_string()
            }
        }
    }

    pub fn pause_between_blocks(&self) {
        if !self.block_pause.is_zero() {
            thread::sleep(self.block_pause);
        }
    }
}
