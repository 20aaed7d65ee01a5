use sqlx::PgPool;
use sqlx::types::Json;
use uuid::Uuid;

use super::FormIntegrationInput;
use crate::models::FormIntegration;

pub async fn list_for_form(pool: &PgPool, form_id: Uuid) -> Result<Vec<FormIntegration>, sqlx::Error> {
    sqlx::query_as::<_, FormIntegration>(
        "SELECT fi.* FROM form_integrations fi
         JOIN integrations i ON fi.integration_id = i.id
         WHERE fi.form_id = $1
         ORDER BY i.name ASC",
    )
    .bind(form_id)
    .fetch_all(pool)
    .await
}

pub async fn find(
    pool: &PgPool,
    form_id: Uuid,
    integration_id: Uuid,
) -> Result<Option<FormIntegration>, sqlx::Error> {
    sqlx::query_as::<_, FormIntegration>(
        "SELECT * FROM form_integrations WHERE form_id = $1 AND integration_id = $2",
    )
    .bind(form_id)
    .bind(integration_id)
    .fetch_optional(pool)
    .await
}

pub async fn upsert(
    pool: &PgPool,
    form_id: Uuid,
    integration_id: Uuid,
    input: &FormIntegrationInput,
) -> Result<FormIntegration, sqlx::Error> {
    sqlx::query_as::<_, FormIntegration>(
        "INSERT INTO form_integrations (form_id, integration_id, enabled, settings, field_mappings)
         VALUES ($1, $2, $3, $4, $5)
         ON CONFLICT (form_id, integration_id) DO UPDATE
         SET enabled = EXCLUDED.enabled,
             settings = EXCLUDED.settings,
             field_mappings = EXCLUDED.field_mappings,
             updated_at = now()
         RETURNING *",
    )
    .bind(form_id)
    .bind(integration_id)
    .bind(input.enabled)
    .bind(&input.settings)
    .bind(Json(&input.field_mappings))
    .fetch_one(pool)
    .await
}
