use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use super::{IntegrationLogStore, PgStore, StoreResult};
use crate::models::IntegrationLog;

pub async fn create(
    pool: &PgPool,
    integration_id: Uuid,
    submission_id: Uuid,
    success: bool,
    response: Option<&serde_json::Value>,
) -> Result<IntegrationLog, sqlx::Error> {
    sqlx::query_as::<_, IntegrationLog>(
        "INSERT INTO integration_log (id, integration_id, submission_id, success, response)
         VALUES ($1, $2, $3, $4, $5) RETURNING *",
    )
    .bind(Uuid::now_v7())
    .bind(integration_id)
    .bind(submission_id)
    .bind(success)
    .bind(response)
    .fetch_one(pool)
    .await
}

pub async fn list_by_integration(
    pool: &PgPool,
    integration_id: Uuid,
    limit: i64,
    offset: i64,
) -> Result<Vec<IntegrationLog>, sqlx::Error> {
    sqlx::query_as::<_, IntegrationLog>(
        "SELECT * FROM integration_log WHERE integration_id = $1
         ORDER BY created_at DESC LIMIT $2 OFFSET $3",
    )
    .bind(integration_id)
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await
}

#[async_trait]
impl IntegrationLogStore for PgStore {
    async fn create(
        &self,
        integration_id: Uuid,
        submission_id: Uuid,
        success: bool,
        response: Option<&serde_json::Value>,
    ) -> StoreResult<IntegrationLog> {
        Ok(create(&self.pool, integration_id, submission_id, success, response).await?)
    }

    async fn list_by_integration(
        &self,
        integration_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> StoreResult<Vec<IntegrationLog>> {
        Ok(list_by_integration(&self.pool, integration_id, limit, offset).await?)
    }
}
