//! Durable storage for finished relay sessions.
//!
//! The relay's only contract with storage is `PersistenceSink::upsert`:
//! append-or-replace one record keyed by the session id, called once and only
//! after a session completed.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;
use uuid::Uuid;

use crate::relay::error::RelayError;
use crate::relay::messages::{ChatMessage, Role};

pub mod postgres;

pub use postgres::PgPersistenceSink;

const TITLE_CHARS: usize = 30;
const DEFAULT_TITLE: &str = "New conversation";

/// The part of an artifact known before the stream starts.
#[derive(Debug, Clone)]
pub enum ArtifactDraft {
    ChatHistory {
        /// Existing history to replace; a new record is appended when `None`.
        history_id: Option<Uuid>,
        title: String,
        transcript: Vec<ChatMessage>,
    },
    JdBreakdown {
        jd_id: Uuid,
        company: String,
        position: String,
    },
}

impl ArtifactDraft {
    /// A caller-chosen record id, if the session replaces an existing record.
    pub fn key(&self) -> Option<Uuid> {
        match self {
            ArtifactDraft::ChatHistory { history_id, .. } => *history_id,
            ArtifactDraft::JdBreakdown { .. } => None,
        }
    }

    /// Completes the draft with the accumulated answer.
    pub fn finish(&self, id: Uuid, answer: &str) -> PersistedArtifact {
        match self {
            ArtifactDraft::ChatHistory {
                title, transcript, ..
            } => {
                let mut messages = transcript.clone();
                messages.push(ChatMessage::new(Role::Assistant, answer));
                PersistedArtifact::ChatHistory(ChatHistoryArtifact {
                    id,
                    title: title.clone(),
                    messages,
                })
            }
            ArtifactDraft::JdBreakdown {
                jd_id,
                company,
                position,
            } => PersistedArtifact::JdBreakdown(JdBreakdownArtifact {
                id,
                jd_id: *jd_id,
                company: company.clone(),
                position: position.clone(),
                breakdown_content: answer.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatHistoryArtifact {
    pub id: Uuid,
    pub title: String,
    pub messages: Vec<ChatMessage>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JdBreakdownArtifact {
    pub id: Uuid,
    pub jd_id: Uuid,
    pub company: String,
    pub position: String,
    pub breakdown_content: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PersistedArtifact {
    ChatHistory(ChatHistoryArtifact),
    JdBreakdown(JdBreakdownArtifact),
}

impl PersistedArtifact {
    pub fn id(&self) -> Uuid {
        match self {
            PersistedArtifact::ChatHistory(a) => a.id,
            PersistedArtifact::JdBreakdown(a) => a.id,
        }
    }
}

/// Row stamps returned by a successful upsert.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct PersistedRecord {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[async_trait]
pub trait PersistenceSink: Send + Sync {
    async fn upsert(&self, artifact: &PersistedArtifact) -> Result<PersistedRecord, RelayError>;
}

/// Uses `explicit` when non-blank, else the opening of the first user message.
pub fn chat_title(explicit: Option<&str>, messages: &[ChatMessage]) -> String {
    if let Some(title) = explicit.map(str::trim).filter(|t| !t.is_empty()) {
        return title.to_string();
    }
    messages
        .iter()
        .find(|m| m.role == Role::User.as_str() && !m.text().is_empty())
        .map(|m| {
            let text = m.text();
            let mut title: String = text.chars().take(TITLE_CHARS).collect();
            if text.chars().count() > TITLE_CHARS {
                title.push_str("...");
            }
            title
        })
        .unwrap_or_else(|| DEFAULT_TITLE.to_string())
}
