use async_trait::async_trait;
use sqlx::types::Json;
use sqlx::PgPool;
use tracing::debug;

use super::{
    ChatHistoryArtifact, JdBreakdownArtifact, PersistedArtifact, PersistedRecord, PersistenceSink,
};
use crate::relay::error::RelayError;
use crate::relay::messages::ChatMessage;

/// Upserts finished artifacts into `chat_histories` / `jd_breakdowns`.
#[derive(Clone)]
pub struct PgPersistenceSink {
    pool: PgPool,
}

impl PgPersistenceSink {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn upsert_chat_history(
        &self,
        artifact: &ChatHistoryArtifact,
    ) -> Result<PersistedRecord, sqlx::Error> {
        sqlx::query_as::<_, PersistedRecord>(
            r#"
            INSERT INTO chat_histories (id, title, messages)
            VALUES ($1, $2, $3)
            ON CONFLICT (id) DO UPDATE
                SET title = EXCLUDED.title,
                    messages = EXCLUDED.messages,
                    updated_at = NOW()
            RETURNING id, created_at, updated_at
            "#,
        )
        .bind(artifact.id)
        .bind(&artifact.title)
        .bind(messages_column(artifact))
        .fetch_one(&self.pool)
        .await
    }

    async fn upsert_jd_breakdown(
        &self,
        artifact: &JdBreakdownArtifact,
    ) -> Result<PersistedRecord, sqlx::Error> {
        sqlx::query_as::<_, PersistedRecord>(
            r#"
            INSERT INTO jd_breakdowns (id, jd_id, company, position, breakdown_content)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (id) DO UPDATE
                SET breakdown_content = EXCLUDED.breakdown_content,
                    updated_at = NOW()
            RETURNING id, created_at, updated_at
            "#,
        )
        .bind(artifact.id)
        .bind(artifact.jd_id)
        .bind(&artifact.company)
        .bind(&artifact.position)
        .bind(&artifact.breakdown_content)
        .fetch_one(&self.pool)
        .await
    }
}

/// The `messages` JSONB value: the transcript as the client sent it.
fn messages_column(artifact: &ChatHistoryArtifact) -> Json<&[ChatMessage]> {
    Json(artifact.messages.as_slice())
}

#[async_trait]
impl PersistenceSink for PgPersistenceSink {
    async fn upsert(&self, artifact: &PersistedArtifact) -> Result<PersistedRecord, RelayError> {
        let result = match artifact {
            PersistedArtifact::ChatHistory(a) => self.upsert_chat_history(a).await,
            PersistedArtifact::JdBreakdown(a) => self.upsert_jd_breakdown(a).await,
        };
        let record = result.map_err(|e| RelayError::Persistence(e.to_string()))?;
        debug!("Upserted artifact {}", record.id);
        Ok(record)
    }
}
