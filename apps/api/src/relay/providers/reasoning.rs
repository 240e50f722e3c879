//! Variant A: reasoning-capable multimodal provider (Volcengine Ark / Doubao).
//!
//! The body is parsed as SSE events. Frames are strict: every event's data
//! must be a chat-completion chunk. Anything else aborts the stream with a
//! decode error.

use std::collections::VecDeque;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::upstream::{open_stream, Flow, Framing};
use super::{
    CompletionRequest, DeltaEvent, DeltaStream, ProviderAdapter, ProviderEndpoint, ProviderKind,
    ReasoningEffort,
};
use crate::relay::error::RelayError;
use crate::relay::messages::NormalizedMessage;

#[derive(Debug, Serialize)]
struct ReasoningRequest<'a> {
    model: &'a str,
    messages: &'a [NormalizedMessage],
    stream: bool,
    reasoning_effort: ReasoningEffort,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct ReasoningChunk {
    #[serde(default)]
    choices: Vec<ReasoningChoice>,
    #[serde(default)]
    usage: Option<Value>,
    #[serde(default)]
    error: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct ReasoningChoice {
    delta: ReasoningDelta,
}

#[derive(Debug, Deserialize)]
struct ReasoningDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    reasoning_content: Option<String>,
}

pub struct ReasoningAdapter {
    client: Client,
    endpoint: ProviderEndpoint,
}

impl ReasoningAdapter {
    pub fn new(client: Client, endpoint: ProviderEndpoint) -> Self {
        Self { client, endpoint }
    }

    fn request_body(&self, request: &CompletionRequest) -> Result<Value, RelayError> {
        let body = ReasoningRequest {
            model: &self.endpoint.model,
            messages: &request.messages,
            stream: true,
            reasoning_effort: request.params.reasoning_effort,
            temperature: request.params.temperature,
            max_tokens: request.params.max_tokens,
        };
        serde_json::to_value(&body).map_err(|e| RelayError::Decode(e.to_string()))
    }
}

impl ProviderAdapter for ReasoningAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::ReasoningMultimodal
    }

    fn open(&self, request: CompletionRequest, timeout: Duration) -> DeltaStream {
        match self.request_body(&request) {
            Ok(body) => open_stream(
                self.client.clone(),
                &self.endpoint,
                body,
                timeout,
                Framing::Events,
                decode_reasoning_event,
            ),
            Err(e) => stream::iter([DeltaEvent::Error(e)]).boxed(),
        }
    }
}

/// Reasoning first, then answer, when a frame carries both.
pub(crate) fn decode_reasoning_event(data: &str, out: &mut VecDeque<DeltaEvent>) -> Flow {
    let payload = data.trim();
    if payload.is_empty() {
        return Flow::Continue;
    }
    if payload == "[DONE]" {
        return Flow::End;
    }

    let chunk: ReasoningChunk = match serde_json::from_str(payload) {
        Ok(chunk) => chunk,
        Err(e) => return Flow::Fail(RelayError::Decode(e.to_string())),
    };

    if let Some(error) = chunk.error {
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .map(String::from)
            .unwrap_or_else(|| error.to_string());
        return Flow::Fail(RelayError::transport(message));
    }

    let Some(choice) = chunk.choices.into_iter().next() else {
        // Trailing usage-only frames carry no choices.
        if chunk.usage.is_some() {
            return Flow::Continue;
        }
        return Flow::Fail(RelayError::Decode(
            "frame carried no choices".to_string(),
        ));
    };

    if let Some(reasoning) = choice.delta.reasoning_content.filter(|r| !r.is_empty()) {
        out.push_back(DeltaEvent::Reasoning(reasoning));
    }
    if let Some(answer) = choice.delta.content {
        out.push_back(DeltaEvent::Answer(answer));
    }
    Flow::Continue
}
