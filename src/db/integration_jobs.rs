use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use super::{JobQueue, PgStore, StoreResult};
use crate::models::IntegrationJob;

pub async fn enqueue(
    pool: &PgPool,
    submission_id: Uuid,
    integration_uid: Uuid,
) -> Result<IntegrationJob, sqlx::Error> {
    sqlx::query_as::<_, IntegrationJob>(
        "INSERT INTO integration_jobs (id, submission_id, integration_uid)
         VALUES ($1, $2, $3) RETURNING *",
    )
    .bind(Uuid::now_v7())
    .bind(submission_id)
    .bind(integration_uid)
    .fetch_one(pool)
    .await
}

/// Atomically claim the next ready job using SELECT FOR UPDATE SKIP LOCKED.
/// Jobs that exhausted their attempts have `completed_at` set and are skipped.
pub async fn claim_next(pool: &PgPool) -> Result<Option<IntegrationJob>, sqlx::Error> {
    sqlx::query_as::<_, IntegrationJob>(
        "UPDATE integration_jobs SET status = 'processing', attempts = attempts + 1, progress = 0
         WHERE id = (
             SELECT id FROM integration_jobs
             WHERE status IN ('pending', 'failed')
               AND completed_at IS NULL
               AND next_retry_at <= now()
             ORDER BY next_retry_at ASC
             LIMIT 1
             FOR UPDATE SKIP LOCKED
         )
         RETURNING *",
    )
    .fetch_optional(pool)
    .await
}

pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<IntegrationJob>, sqlx::Error> {
    sqlx::query_as::<_, IntegrationJob>("SELECT * FROM integration_jobs WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
}

pub async fn set_progress(pool: &PgPool, id: Uuid, progress: f64) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE integration_jobs SET progress = $2 WHERE id = $1")
        .bind(id)
        .bind(progress)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn mark_completed(pool: &PgPool, id: Uuid) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE integration_jobs SET status = 'completed', progress = 1, completed_at = now()
         WHERE id = $1",
    )
    .bind(id)
    .execute(pool)
    .await?;
    Ok(())
}

/// Mark as failed with exponential backoff. If max attempts reached, stays 'failed' permanently.
pub async fn mark_failed(
    pool: &PgPool,
    id: Uuid,
    attempts: i32,
    max_attempts: i32,
    error: &str,
) -> Result<(), sqlx::Error> {
    if attempts >= max_attempts {
        sqlx::query(
            "UPDATE integration_jobs SET status = 'failed', last_error = $2, completed_at = now()
             WHERE id = $1",
        )
        .bind(id)
        .bind(error)
        .execute(pool)
        .await?;
    } else {
        // Retry with exponential backoff: 2^attempts seconds
        let backoff_secs = 2_i64.pow(attempts.max(0) as u32);
        sqlx::query(
            "UPDATE integration_jobs
             SET status = 'failed',
                 last_error = $2,
                 next_retry_at = now() + make_interval(secs => $3::double precision)
             WHERE id = $1",
        )
        .bind(id)
        .bind(error)
        .bind(backoff_secs as f64)
        .execute(pool)
        .await?;
    }
    Ok(())
}

#[async_trait]
impl JobQueue for PgStore {
    async fn enqueue(&self, submission_id: Uuid, integration_uid: Uuid) -> StoreResult<IntegrationJob> {
        Ok(enqueue(&self.pool, submission_id, integration_uid).await?)
    }

    async fn claim_next(&self) -> StoreResult<Option<IntegrationJob>> {
        Ok(claim_next(&self.pool).await?)
    }

    async fn find_by_id(&self, id: Uuid) -> StoreResult<Option<IntegrationJob>> {
        Ok(find_by_id(&self.pool, id).await?)
    }

    async fn set_progress(&self, id: Uuid, progress: f64) -> StoreResult<()> {
        Ok(set_progress(&self.pool, id, progress).await?)
    }

    async fn mark_completed(&self, id: Uuid) -> StoreResult<()> {
        Ok(mark_completed(&self.pool, id).await?)
    }

    async fn mark_failed(
        &self,
        id: Uuid,
        attempts: i32,
        max_attempts: i32,
        error: &str,
    ) -> StoreResult<()> {
        Ok(mark_failed(&self.pool, id, attempts, max_attempts, error).await?)
    }
}
