use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct IntegrationLog {
    pub id: Uuid,
    pub integration_id: Uuid,
    pub submission_id: Uuid,
    pub success: bool,
    pub response: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}
