use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// Decrypted OAuth credentials for an integration. Stored encrypted; the
/// database layer never hands out ciphertext.
#[derive(Debug, Clone, Serialize)]
pub struct OauthToken {
    pub id: Uuid,
    pub integration_uid: Uuid,
    #[serde(skip_serializing)]
    pub access_token: String,
    #[serde(skip_serializing)]
    pub refresh_token: Option<String>,
    pub token_url: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
