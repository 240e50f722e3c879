use std::time::Duration;

use axum::{
    body::Body,
    extract::{Multipart, Path, State},
    http::header,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::errors::AppError;
use crate::persistence::{chat_title, ArtifactDraft};
use crate::relay::messages::{normalize, ChatMessage};
use crate::relay::providers::{CompletionRequest, GenerationParams, ProviderKind, ReasoningEffort};
use crate::relay::{sse_response, SessionOutcome, StreamSession};
use crate::state::AppState;
use crate::storage::{content_type_for, is_safe_filename, upload_filename, StoredBlob};

const UPLOAD_FIELD: &str = "file";

fn default_temperature() -> f32 {
    GenerationParams::default().temperature
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub reasoning_effort: ReasoningEffort,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    /// Replace this history instead of appending a new one.
    #[serde(default)]
    pub history_id: Option<Uuid>,
    #[serde(default)]
    pub title: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub content: String,
    pub reasoning_content: String,
    pub history_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub persistence_error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub filename: String,
    pub url: String,
}

/// Validates and normalizes `req` into a session for the reasoning provider.
pub fn chat_session(req: ChatRequest, timeout: Duration) -> Result<StreamSession, AppError> {
    if req.messages.is_empty() {
        return Err(AppError::Validation("messages must not be empty".to_string()));
    }
    let messages = normalize(&req.messages, ProviderKind::ReasoningMultimodal)?;
    let title = chat_title(req.title.as_deref(), &req.messages);

    let request = CompletionRequest {
        messages,
        params: GenerationParams {
            reasoning_effort: req.reasoning_effort,
            temperature: req.temperature,
            max_tokens: req.max_tokens,
        },
    };
    let artifact = ArtifactDraft::ChatHistory {
        history_id: req.history_id,
        title,
        transcript: req.messages,
    };
    Ok(StreamSession::new(
        ProviderKind::ReasoningMultimodal,
        request,
        artifact,
        timeout,
    ))
}

/// POST /api/assistant/chat
pub async fn handle_chat(
    State(state): State<AppState>,
    Json(req): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, AppError> {
    let session = chat_session(req, state.config.ark.request_timeout)?;

    match state.relay.collect(session).await {
        SessionOutcome::Completed {
            id,
            answer,
            reasoning,
            persisted,
        } => Ok(Json(ChatResponse {
            content: answer,
            reasoning_content: reasoning,
            history_id: id,
            persistence_error: persisted.err().map(|e| e.to_string()),
        })),
        SessionOutcome::Failed(e) => Err(e.into()),
        SessionOutcome::Aborted => Err(AppError::Internal(anyhow::anyhow!(
            "chat session aborted before completion"
        ))),
    }
}

/// POST /api/assistant/chat/stream
pub async fn handle_chat_stream(
    State(state): State<AppState>,
    Json(req): Json<ChatRequest>,
) -> Result<Response, AppError> {
    let session = chat_session(req, state.config.ark.stream_timeout)?;
    Ok(sse_response(state.relay.spawn(session)))
}

/// POST /api/assistant/upload-image
pub async fn handle_upload_image(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, AppError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::Validation(format!("Invalid multipart body: {e}")))?
    {
        if field.name() != Some(UPLOAD_FIELD) {
            continue;
        }

        let filename = upload_filename(field.file_name());
        let content_type = field
            .content_type()
            .map(String::from)
            .unwrap_or_else(|| content_type_for(&filename).to_string());
        let bytes = field
            .bytes()
            .await
            .map_err(|e| AppError::Validation(format!("Failed to read upload: {e}")))?;
        if bytes.is_empty() {
            return Err(AppError::Validation("Uploaded file is empty".to_string()));
        }

        let size = bytes.len();
        let url = state
            .blobs
            .put(
                &filename,
                StoredBlob {
                    bytes,
                    content_type,
                },
            )
            .await
            .map_err(|e| AppError::S3(e.to_string()))?;

        info!("Stored uploaded image {filename} ({size} bytes)");
        return Ok(Json(UploadResponse { filename, url }));
    }

    Err(AppError::Validation(format!(
        "Multipart field '{UPLOAD_FIELD}' is required"
    )))
}

/// GET /uploads/:filename
pub async fn handle_get_upload(
    State(state): State<AppState>,
    Path(filename): Path<String>,
) -> Result<Response, AppError> {
    if !is_safe_filename(&filename) {
        warn!("Rejected upload lookup for {filename:?}");
        return Err(AppError::NotFound(format!("Upload {filename} not found")));
    }

    let blob = state
        .blobs
        .get(&filename)
        .await
        .map_err(|e| AppError::S3(e.to_string()))?
        .ok_or_else(|| AppError::NotFound(format!("Upload {filename} not found")))?;

    Ok((
        [(header::CONTENT_TYPE, blob.content_type)],
        Body::from(blob.bytes),
    )
        .into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::PersistedArtifact;
    use crate::relay::messages::{ContentPart, MessageBody, Role};

    fn parse(body: &str) -> ChatRequest {
        serde_json::from_str(body).unwrap()
    }

    #[test]
    fn test_request_defaults() {
        let req = parse(r#"{"messages":[{"role":"user","content":"hi"}]}"#);
        assert_eq!(req.reasoning_effort, ReasoningEffort::Medium);
        assert_eq!(req.temperature, 0.7);
        assert!(req.max_tokens.is_none());
        assert!(req.history_id.is_none());
    }

    #[test]
    fn test_session_carries_params_and_images() {
        let req = parse(
            r#"{"messages":[{"role":"user","content":"what is this?","image_urls":["/uploads/a.png"]}],
                "reasoning_effort":"high","temperature":0.2,"max_tokens":512}"#,
        );
        let session = chat_session(req, Duration::from_secs(60)).unwrap();
        assert_eq!(session.provider, ProviderKind::ReasoningMultimodal);
        assert_eq!(session.request.params.reasoning_effort, ReasoningEffort::High);
        assert_eq!(session.request.params.max_tokens, Some(512));
        assert_eq!(session.timeout, Duration::from_secs(60));

        let MessageBody::Parts(parts) = &session.request.messages[0].content else {
            panic!("expected multipart content");
        };
        assert_eq!(parts.len(), 2);
        assert!(matches!(parts[1], ContentPart::Text { .. }));
    }

    #[test]
    fn test_session_reuses_history_id_and_derives_title() {
        let id = Uuid::new_v4();
        let req = parse(&format!(
            r#"{{"messages":[{{"role":"user","content":"How do I prepare for a system design interview?"}}],
                "history_id":"{id}"}}"#
        ));
        let mut session = chat_session(req, Duration::from_secs(1)).unwrap();
        assert_eq!(session.id, id);

        session.apply(crate::relay::providers::DeltaEvent::Answer("Practice.".to_string()));
        session.apply(crate::relay::providers::DeltaEvent::Done);
        let Some(PersistedArtifact::ChatHistory(history)) = session.finished_artifact() else {
            panic!("expected chat history");
        };
        assert_eq!(history.title, "How do I prepare for a system ...");
        assert_eq!(history.messages.len(), 2);
        assert_eq!(history.messages[1].role, Role::Assistant.as_str());
    }

    #[test]
    fn test_unknown_role_is_rejected() {
        let req = parse(r#"{"messages":[{"role":"tool","content":"x"}]}"#);
        assert!(matches!(
            chat_session(req, Duration::from_secs(1)),
            Err(AppError::Relay(crate::relay::RelayError::Validation(_)))
        ));
    }

    #[test]
    fn test_empty_history_is_rejected() {
        let req = parse(r#"{"messages":[]}"#);
        assert!(matches!(
            chat_session(req, Duration::from_secs(1)),
            Err(AppError::Validation(_))
        ));
    }
}
