use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use super::{NewToken, PgStore, StoreError, StoreResult, TokenStore};
use crate::crypto;
use crate::models::OauthToken;

#[derive(sqlx::FromRow)]
struct TokenRow {
    id: Uuid,
    integration_uid: Uuid,
    access_token: Vec<u8>,
    refresh_token: Option<Vec<u8>>,
    token_url: Option<String>,
    expires_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TokenRow {
    fn decrypt(self, key: &str) -> Result<OauthToken, StoreError> {
        let access_token = crypto::decrypt(&self.access_token, key).map_err(StoreError::Crypto)?;
        let refresh_token = self
            .refresh_token
            .map(|data| crypto::decrypt(&data, key))
            .transpose()
            .map_err(StoreError::Crypto)?;

        Ok(OauthToken {
            id: self.id,
            integration_uid: self.integration_uid,
            access_token,
            refresh_token,
            token_url: self.token_url,
            expires_at: self.expires_at,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

pub async fn find_for_integration(
    pool: &PgPool,
    integration_uid: Uuid,
    key: &str,
) -> StoreResult<Option<OauthToken>> {
    let row = sqlx::query_as::<_, TokenRow>("SELECT * FROM oauth_tokens WHERE integration_uid = $1")
        .bind(integration_uid)
        .fetch_optional(pool)
        .await?;

    row.map(|r| r.decrypt(key)).transpose()
}

/// One token per integration; saving replaces whatever was there.
pub async fn upsert(pool: &PgPool, token: &NewToken, key: &str) -> StoreResult<OauthToken> {
    let access = crypto::encrypt(&token.access_token, key).map_err(StoreError::Crypto)?;
    let refresh = token
        .refresh_token
        .as_deref()
        .map(|t| crypto::encrypt(t, key))
        .transpose()
        .map_err(StoreError::Crypto)?;

    let row = sqlx::query_as::<_, TokenRow>(
        "INSERT INTO oauth_tokens (id, integration_uid, access_token, refresh_token, token_url, expires_at)
         VALUES ($1, $2, $3, $4, $5, $6)
         ON CONFLICT (integration_uid) DO UPDATE
         SET access_token = EXCLUDED.access_token,
             refresh_token = COALESCE(EXCLUDED.refresh_token, oauth_tokens.refresh_token),
             token_url = COALESCE(EXCLUDED.token_url, oauth_tokens.token_url),
             expires_at = EXCLUDED.expires_at,
             updated_at = now()
         RETURNING *",
    )
    .bind(Uuid::now_v7())
    .bind(token.integration_uid)
    .bind(access)
    .bind(refresh)
    .bind(&token.token_url)
    .bind(token.expires_at)
    .fetch_one(pool)
    .await?;

    row.decrypt(key)
}

#[async_trait]
impl TokenStore for PgStore {
    async fn find_for_integration(&self, integration_uid: Uuid) -> StoreResult<Option<OauthToken>> {
        find_for_integration(&self.pool, integration_uid, &self.encryption_key).await
    }

    async fn save(&self, token: &NewToken) -> StoreResult<OauthToken> {
        upsert(&self.pool, token, &self.encryption_key).await
    }
}
