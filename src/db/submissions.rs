use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use super::{NewSubmission, PgStore, StoreResult, SubmissionStore};
use crate::models::{Submission, SubmissionStatus};

pub async fn create(pool: &PgPool, submission: &NewSubmission) -> Result<Submission, sqlx::Error> {
    sqlx::query_as::<_, Submission>(
        "INSERT INTO submissions (id, form_id, status, \"values\", site_handle, language, spam_reason, metadata)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8) RETURNING *",
    )
    .bind(Uuid::now_v7())
    .bind(submission.form_id)
    .bind(submission.status.as_str())
    .bind(&submission.values)
    .bind(&submission.site_handle)
    .bind(&submission.language)
    .bind(&submission.spam_reason)
    .bind(&submission.metadata)
    .fetch_one(pool)
    .await
}

pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Submission>, sqlx::Error> {
    sqlx::query_as::<_, Submission>("SELECT * FROM submissions WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
}

pub async fn list_by_form(
    pool: &PgPool,
    form_id: Uuid,
    limit: i64,
    offset: i64,
) -> Result<Vec<Submission>, sqlx::Error> {
    sqlx::query_as::<_, Submission>(
        "SELECT * FROM submissions WHERE form_id = $1
         ORDER BY created_at DESC LIMIT $2 OFFSET $3",
    )
    .bind(form_id)
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await
}

pub async fn set_status(
    pool: &PgPool,
    id: Uuid,
    status: SubmissionStatus,
    spam_reason: Option<&str>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE submissions SET status = $2, spam_reason = COALESCE($3, spam_reason), updated_at = now()
         WHERE id = $1",
    )
    .bind(id)
    .bind(status.as_str())
    .bind(spam_reason)
    .execute(pool)
    .await?;
    Ok(())
}

#[async_trait]
impl SubmissionStore for PgStore {
    async fn create(&self, submission: &NewSubmission) -> StoreResult<Submission> {
        Ok(create(&self.pool, submission).await?)
    }

    async fn find_by_id(&self, id: Uuid) -> StoreResult<Option<Submission>> {
        Ok(find_by_id(&self.pool, id).await?)
    }

    async fn list_by_form(&self, form_id: Uuid, limit: i64, offset: i64) -> StoreResult<Vec<Submission>> {
        Ok(list_by_form(&self.pool, form_id, limit, offset).await?)
    }

    async fn set_status(
        &self,
        id: Uuid,
        status: SubmissionStatus,
        spam_reason: Option<&str>,
    ) -> StoreResult<()> {
        Ok(set_status(&self.pool, id, status, spam_reason).await?)
    }
}
