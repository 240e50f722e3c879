use sqlx::{FromRow, PgPool};
use uuid::Uuid;

#[derive(Debug, Clone, FromRow)]
pub struct JobDescriptionRow {
    pub id: Uuid,
    pub company: String,
    pub position: String,
    pub description: String,
}

pub async fn find_job_description(
    pool: &PgPool,
    id: Uuid,
) -> Result<Option<JobDescriptionRow>, sqlx::Error> {
    sqlx::query_as::<_, JobDescriptionRow>(
        "SELECT id, company, position, description FROM job_descriptions WHERE id = $1",
    )
    .bind(id)
    .fetch_optional(pool)
    .await
}
