//! Upstream LLM providers.
//!
//! Both dialects speak HTTP + SSE but disagree on how a frame is cut and
//! what it means. Each adapter turns its dialect into the same `DeltaEvent` stream so
//! the relay never sees provider-specific shapes.

use std::fmt;
use std::time::Duration;

use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::ProviderConfig;
use crate::relay::error::RelayError;
use crate::relay::messages::NormalizedMessage;

pub mod completion;
pub mod lines;
pub mod reasoning;
mod upstream;

pub use completion::CompletionAdapter;
pub use reasoning::ReasoningAdapter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderKind {
    /// Multimodal provider with a separate reasoning channel (Volcengine Ark).
    ReasoningMultimodal,
    /// Text-only OpenAI-compatible provider (SiliconFlow).
    PlainCompletion,
}

impl ProviderKind {
    pub fn accepts_images(&self) -> bool {
        matches!(self, ProviderKind::ReasoningMultimodal)
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ProviderKind::ReasoningMultimodal => "reasoning-multimodal",
            ProviderKind::PlainCompletion => "plain-completion",
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReasoningEffort {
    Low,
    #[default]
    Medium,
    High,
}

/// Sampling parameters passed through to the upstream untouched.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationParams {
    pub reasoning_effort: ReasoningEffort,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            reasoning_effort: ReasoningEffort::default(),
            temperature: 0.7,
            max_tokens: None,
        }
    }
}

/// Provider-agnostic input to `ProviderAdapter::open`.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub messages: Vec<NormalizedMessage>,
    pub params: GenerationParams,
}

/// The unit every adapter emits.
///
/// A stream from `open` yields any number of `Answer`/`Reasoning` events and
/// then exactly one `Done` or `Error`, after which it ends.
#[derive(Debug, Clone, PartialEq)]
pub enum DeltaEvent {
    Answer(String),
    Reasoning(String),
    Done,
    Error(RelayError),
}

pub type DeltaStream = BoxStream<'static, DeltaEvent>;

/// One upstream dialect.
///
/// `open` is lazy: nothing is sent until the returned stream is first polled.
/// Dropping the stream drops the in-flight HTTP response, which closes the
/// upstream connection. Opening twice issues two independent requests.
pub trait ProviderAdapter: Send + Sync {
    fn kind(&self) -> ProviderKind;

    /// `timeout` bounds connecting and every individual read.
    fn open(&self, request: CompletionRequest, timeout: Duration) -> DeltaStream;
}

/// Where and as whom an adapter talks to its upstream.
#[derive(Debug, Clone)]
pub struct ProviderEndpoint {
    pub completions_url: String,
    pub api_key: String,
    pub model: String,
}

impl ProviderEndpoint {
    pub fn from_config(config: &ProviderConfig) -> Self {
        Self {
            completions_url: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
        }
    }
}

const ACCESS_DENIED: &str = "upstream access denied (403 Forbidden)";
const ACCESS_DENIED_HINT: &str = "upstream access denied (403): check that the API key is valid, \
    the account has remaining balance, and the key is permitted to use this model";
const MAX_RAW_ERROR_CHARS: usize = 200;

/// Builds a readable message from a 403 response body.
///
/// Recognized shapes: `{"message": ..}`, `{"error": {"message": ..}}`,
/// `{"error": ..}`, or any non-JSON text (first 200 characters).
pub fn describe_access_denied(body: &str) -> String {
    let detail = match serde_json::from_str::<Value>(body) {
        Ok(Value::Object(map)) => {
            if let Some(message) = map.get("message") {
                Some(value_text(message))
            } else {
                map.get("error").map(|error| match error.get("message") {
                    Some(message) => value_text(message),
                    None => value_text(error),
                })
            }
        }
        Ok(_) => None,
        Err(_) => {
            let raw: String = body.chars().take(MAX_RAW_ERROR_CHARS).collect();
            (!raw.trim().is_empty()).then_some(raw)
        }
    };

    match detail {
        Some(detail) if !detail.trim().is_empty() => format!("{ACCESS_DENIED}: {detail}"),
        _ => ACCESS_DENIED_HINT.to_string(),
    }
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
