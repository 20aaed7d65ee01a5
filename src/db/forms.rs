use async_trait::async_trait;
use sqlx::PgPool;
use sqlx::types::Json;
use uuid::Uuid;

use super::{FormStore, NewForm, PgStore, StoreResult};
use crate::models::Form;

pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Form>, sqlx::Error> {
    sqlx::query_as::<_, Form>("SELECT * FROM forms WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
}

pub async fn find_by_handle(pool: &PgPool, handle: &str) -> Result<Option<Form>, sqlx::Error> {
    sqlx::query_as::<_, Form>("SELECT * FROM forms WHERE handle = $1")
        .bind(handle)
        .fetch_optional(pool)
        .await
}

pub async fn list(pool: &PgPool) -> Result<Vec<Form>, sqlx::Error> {
    sqlx::query_as::<_, Form>("SELECT * FROM forms ORDER BY created_at DESC")
        .fetch_all(pool)
        .await
}

pub async fn create(pool: &PgPool, form: &NewForm) -> Result<Form, sqlx::Error> {
    sqlx::query_as::<_, Form>(
        "INSERT INTO forms (id, handle, title, fields, settings)
         VALUES ($1, $2, $3, $4, $5) RETURNING *",
    )
    .bind(Uuid::now_v7())
    .bind(&form.handle)
    .bind(&form.title)
    .bind(Json(&form.fields))
    .bind(Json(&form.settings))
    .fetch_one(pool)
    .await
}

pub async fn update(pool: &PgPool, id: Uuid, form: &NewForm) -> Result<Form, sqlx::Error> {
    sqlx::query_as::<_, Form>(
        "UPDATE forms SET handle = $2, title = $3, fields = $4, settings = $5, updated_at = now()
         WHERE id = $1 RETURNING *",
    )
    .bind(id)
    .bind(&form.handle)
    .bind(&form.title)
    .bind(Json(&form.fields))
    .bind(Json(&form.settings))
    .fetch_one(pool)
    .await
}

pub async fn delete(pool: &PgPool, id: Uuid) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM forms WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

#[async_trait]
impl FormStore for PgStore {
    async fn find_by_id(&self, id: Uuid) -> StoreResult<Option<Form>> {
        Ok(find_by_id(&self.pool, id).await?)
    }

    async fn find_by_handle(&self, handle: &str) -> StoreResult<Option<Form>> {
        Ok(find_by_handle(&self.pool, handle).await?)
    }

    async fn list(&self) -> StoreResult<Vec<Form>> {
        Ok(list(&self.pool).await?)
    }

    async fn create(&self, form: &NewForm) -> StoreResult<Form> {
        Ok(create(&self.pool, form).await?)
    }

    async fn update(&self, id: Uuid, form: &NewForm) -> StoreResult<Form> {
        Ok(update(&self.pool, id, form).await?)
    }

    async fn delete(&self, id: Uuid) -> StoreResult<()> {
        Ok(delete(&self.pool, id).await?)
    }
}
