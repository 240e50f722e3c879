use std::time::Duration;

use axum::{extract::State, response::Response, Json};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::analysis::jobs::{find_job_description, JobDescriptionRow};
use crate::analysis::prompts::{jd_breakdown_user, JD_BREAKDOWN_SYSTEM};
use crate::errors::AppError;
use crate::persistence::ArtifactDraft;
use crate::relay::messages::{NormalizedMessage, Role};
use crate::relay::providers::{CompletionRequest, GenerationParams, ProviderKind};
use crate::relay::{sse_response, SessionOutcome, StreamSession};
use crate::state::AppState;

const BREAKDOWN_TEMPERATURE: f32 = 0.7;
const BREAKDOWN_MAX_TOKENS: u32 = 8000;

#[derive(Debug, Deserialize)]
pub struct AnalyzeRequest {
    pub jd_id: Uuid,
    /// Replaces the default breakdown prompt when non-blank.
    #[serde(default)]
    pub system_prompt: Option<String>,
}

/// The finished breakdown. `created_at`/`updated_at` are present only when the
/// breakdown was saved; otherwise `persistence_error` says why it was not.
#[derive(Debug, Serialize)]
pub struct JdBreakdownResponse {
    pub id: Uuid,
    pub jd_id: Uuid,
    pub company: String,
    pub position: String,
    pub breakdown_content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub persistence_error: Option<String>,
}

/// Builds the breakdown session for `job`. Fails when the JD has no text.
pub fn breakdown_session(
    job: JobDescriptionRow,
    system_prompt: Option<&str>,
    timeout: Duration,
) -> Result<StreamSession, AppError> {
    if job.description.trim().is_empty() {
        return Err(AppError::Validation(format!(
            "Job description {} has no text to analyze",
            job.id
        )));
    }
    let system = system_prompt
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .unwrap_or(JD_BREAKDOWN_SYSTEM);

    let request = CompletionRequest {
        messages: vec![
            NormalizedMessage::text(Role::System, system),
            NormalizedMessage::text(Role::User, jd_breakdown_user(&job.description)),
        ],
        params: GenerationParams {
            temperature: BREAKDOWN_TEMPERATURE,
            max_tokens: Some(BREAKDOWN_MAX_TOKENS),
            ..GenerationParams::default()
        },
    };
    let artifact = ArtifactDraft::JdBreakdown {
        jd_id: job.id,
        company: job.company,
        position: job.position,
    };
    Ok(StreamSession::new(
        ProviderKind::PlainCompletion,
        request,
        artifact,
        timeout,
    ))
}

async fn load_job(state: &AppState, jd_id: Uuid) -> Result<JobDescriptionRow, AppError> {
    find_job_description(&state.db, jd_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Job description {jd_id} not found")))
}

/// Shapes a batch outcome. A failed save still returns the breakdown.
pub fn breakdown_response(
    jd_id: Uuid,
    company: String,
    position: String,
    outcome: SessionOutcome,
) -> Result<JdBreakdownResponse, AppError> {
    match outcome {
        SessionOutcome::Completed {
            id,
            answer,
            persisted,
            ..
        } => {
            let (created_at, updated_at, persistence_error) = match persisted {
                Ok(record) => (Some(record.created_at), Some(record.updated_at), None),
                Err(e) => (None, None, Some(e.to_string())),
            };
            Ok(JdBreakdownResponse {
                id,
                jd_id,
                company,
                position,
                breakdown_content: answer,
                created_at,
                updated_at,
                persistence_error,
            })
        }
        SessionOutcome::Failed(e) => Err(e.into()),
        SessionOutcome::Aborted => Err(AppError::Internal(anyhow::anyhow!(
            "JD analysis aborted before completion"
        ))),
    }
}

/// POST /api/resume/jd-breakdowns/analyze
pub async fn handle_analyze(
    State(state): State<AppState>,
    Json(req): Json<AnalyzeRequest>,
) -> Result<Json<JdBreakdownResponse>, AppError> {
    let job = load_job(&state, req.jd_id).await?;
    let (company, position) = (job.company.clone(), job.position.clone());
    let session = breakdown_session(
        job,
        req.system_prompt.as_deref(),
        state.config.siliconflow.request_timeout,
    )?;

    let outcome = state.relay.collect(session).await;
    breakdown_response(req.jd_id, company, position, outcome).map(Json)
}

/// POST /api/resume/jd-breakdowns/analyze-stream
pub async fn handle_analyze_stream(
    State(state): State<AppState>,
    Json(req): Json<AnalyzeRequest>,
) -> Result<Response, AppError> {
    let job = load_job(&state, req.jd_id).await?;
    let session = breakdown_session(
        job,
        req.system_prompt.as_deref(),
        state.config.siliconflow.stream_timeout,
    )?;
    Ok(sse_response(state.relay.spawn(session)))
}
