use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use super::{FormIntegrationInput, IntegrationStore, NewIntegration, PgStore, StoreResult, form_integrations};
use crate::models::{FormIntegration, Integration};

pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Integration>, sqlx::Error> {
    sqlx::query_as::<_, Integration>("SELECT * FROM integrations WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
}

pub async fn find_by_uid(pool: &PgPool, uid: Uuid) -> Result<Option<Integration>, sqlx::Error> {
    sqlx::query_as::<_, Integration>("SELECT * FROM integrations WHERE uid = $1")
        .bind(uid)
        .fetch_optional(pool)
        .await
}

pub async fn find_by_handle(pool: &PgPool, handle: &str) -> Result<Option<Integration>, sqlx::Error> {
    sqlx::query_as::<_, Integration>("SELECT * FROM integrations WHERE handle = $1")
        .bind(handle)
        .fetch_optional(pool)
        .await
}

pub async fn list(pool: &PgPool) -> Result<Vec<Integration>, sqlx::Error> {
    sqlx::query_as::<_, Integration>("SELECT * FROM integrations ORDER BY name ASC")
        .fetch_all(pool)
        .await
}

pub async fn create(pool: &PgPool, integration: &NewIntegration) -> Result<Integration, sqlx::Error> {
    sqlx::query_as::<_, Integration>(
        "INSERT INTO integrations (id, uid, handle, name, provider, settings, enabled)
         VALUES ($1, $2, $3, $4, $5, $6, $7) RETURNING *",
    )
    .bind(Uuid::now_v7())
    .bind(Uuid::now_v7())
    .bind(&integration.handle)
    .bind(&integration.name)
    .bind(&integration.provider)
    .bind(&integration.settings)
    .bind(integration.enabled)
    .fetch_one(pool)
    .await
}

/// Settings changes invalidate the cached form settings.
pub async fn update(
    pool: &PgPool,
    id: Uuid,
    integration: &NewIntegration,
) -> Result<Integration, sqlx::Error> {
    sqlx::query_as::<_, Integration>(
        "UPDATE integrations
         SET handle = $2, name = $3, provider = $4, settings = $5, enabled = $6,
             cache = NULL, updated_at = now()
         WHERE id = $1 RETURNING *",
    )
    .bind(id)
    .bind(&integration.handle)
    .bind(&integration.name)
    .bind(&integration.provider)
    .bind(&integration.settings)
    .bind(integration.enabled)
    .fetch_one(pool)
    .await
}

pub async fn delete(pool: &PgPool, id: Uuid) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM integrations WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn save_cache(pool: &PgPool, id: Uuid, cache: &serde_json::Value) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE integrations SET cache = $2 WHERE id = $1")
        .bind(id)
        .bind(cache)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn set_token(pool: &PgPool, id: Uuid, token_id: Option<Uuid>) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE integrations SET token_id = $2, updated_at = now() WHERE id = $1")
        .bind(id)
        .bind(token_id)
        .execute(pool)
        .await?;
    Ok(())
}

#[async_trait]
impl IntegrationStore for PgStore {
    async fn find_by_id(&self, id: Uuid) -> StoreResult<Option<Integration>> {
        Ok(find_by_id(&self.pool, id).await?)
    }

    async fn find_by_uid(&self, uid: Uuid) -> StoreResult<Option<Integration>> {
        Ok(find_by_uid(&self.pool, uid).await?)
    }

    async fn find_by_handle(&self, handle: &str) -> StoreResult<Option<Integration>> {
        Ok(find_by_handle(&self.pool, handle).await?)
    }

    async fn list(&self) -> StoreResult<Vec<Integration>> {
        Ok(list(&self.pool).await?)
    }

    async fn create(&self, integration: &NewIntegration) -> StoreResult<Integration> {
        Ok(create(&self.pool, integration).await?)
    }

    async fn update(&self, id: Uuid, integration: &NewIntegration) -> StoreResult<Integration> {
        Ok(update(&self.pool, id, integration).await?)
    }

    async fn delete(&self, id: Uuid) -> StoreResult<()> {
        Ok(delete(&self.pool, id).await?)
    }

    async fn save_cache(&self, id: Uuid, cache: &serde_json::Value) -> StoreResult<()> {
        Ok(save_cache(&self.pool, id, cache).await?)
    }

    async fn set_token(&self, id: Uuid, token_id: Option<Uuid>) -> StoreResult<()> {
        Ok(set_token(&self.pool, id, token_id).await?)
    }

    async fn list_for_form(&self, form_id: Uuid) -> StoreResult<Vec<FormIntegration>> {
        Ok(form_integrations::list_for_form(&self.pool, form_id).await?)
    }

    async fn find_form_integration(
        &self,
        form_id: Uuid,
        integration_id: Uuid,
    ) -> StoreResult<Option<FormIntegration>> {
        Ok(form_integrations::find(&self.pool, form_id, integration_id).await?)
    }

    async fn save_form_integration(
        &self,
        form_id: Uuid,
        integration_id: Uuid,
        input: &FormIntegrationInput,
    ) -> StoreResult<FormIntegration> {
        Ok(form_integrations::upsert(&self.pool, form_id, integration_id, input).await?)
    }
}
