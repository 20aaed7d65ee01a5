use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct IntegrationJob {
    pub id: Uuid,
    pub submission_id: Uuid,
    pub integration_uid: Uuid,
    pub status: String,
    pub attempts: i32,
    pub max_attempts: i32,
    pub progress: f64,
    pub last_error: Option<String>,
    pub next_retry_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}
