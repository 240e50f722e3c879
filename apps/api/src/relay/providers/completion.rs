//! Variant B: plain OpenAI-compatible completion provider (SiliconFlow).
//!
//! Best-effort line protocol: only `data: ` lines count, `[DONE]` ends the
//! stream, and a payload that fails to parse is skipped.

use std::collections::VecDeque;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use super::upstream::{open_stream, Flow, Framing};
use super::{
    CompletionRequest, DeltaEvent, DeltaStream, ProviderAdapter, ProviderEndpoint, ProviderKind,
};
use crate::relay::error::RelayError;
use crate::relay::messages::NormalizedMessage;

const DATA_PREFIX: &str = "data: ";
const DONE_SENTINEL: &str = "[DONE]";

#[derive(Debug, Serialize)]
struct CompletionBody<'a> {
    model: &'a str,
    messages: &'a [NormalizedMessage],
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct CompletionChunk {
    #[serde(default)]
    choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    #[serde(default)]
    delta: Option<CompletionDelta>,
}

#[derive(Debug, Deserialize)]
struct CompletionDelta {
    #[serde(default)]
    content: Option<String>,
}

impl CompletionChunk {
    fn into_content(self) -> Option<String> {
        self.choices
            .into_iter()
            .next()
            .and_then(|choice| choice.delta)
            .and_then(|delta| delta.content)
            .filter(|content| !content.is_empty())
    }
}

pub struct CompletionAdapter {
    client: Client,
    endpoint: ProviderEndpoint,
}

impl CompletionAdapter {
    pub fn new(client: Client, endpoint: ProviderEndpoint) -> Self {
        Self { client, endpoint }
    }

    fn request_body(&self, request: &CompletionRequest) -> Result<Value, RelayError> {
        let body = CompletionBody {
            model: &self.endpoint.model,
            messages: &request.messages,
            temperature: request.params.temperature,
            max_tokens: request.params.max_tokens,
            stream: true,
        };
        serde_json::to_value(&body).map_err(|e| RelayError::Decode(e.to_string()))
    }
}

impl ProviderAdapter for CompletionAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::PlainCompletion
    }

    fn open(&self, request: CompletionRequest, timeout: Duration) -> DeltaStream {
        match self.request_body(&request) {
            Ok(body) => open_stream(
                self.client.clone(),
                &self.endpoint,
                body,
                timeout,
                Framing::Lines,
                decode_completion_line,
            ),
            Err(e) => stream::iter([DeltaEvent::Error(e)]).boxed(),
        }
    }
}

pub(crate) fn decode_completion_line(line: &str, out: &mut VecDeque<DeltaEvent>) -> Flow {
    let Some(payload) = line.strip_prefix(DATA_PREFIX) else {
        return Flow::Continue;
    };
    if payload.trim() == DONE_SENTINEL {
        return Flow::End;
    }

    match serde_json::from_str::<CompletionChunk>(payload) {
        Ok(chunk) => {
            if let Some(content) = chunk.into_content() {
                out.push_back(DeltaEvent::Answer(content));
            }
        }
        Err(e) => debug!("Skipping unparseable completion line ({e}): {payload}"),
    }
    Flow::Continue
}
