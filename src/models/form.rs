use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use uuid::Uuid;

use crate::fields::FormField;

#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct Form {
    pub id: Uuid,
    pub handle: String,
    pub title: String,
    pub fields: Json<Vec<FormField>>,
    pub settings: Json<FormSettings>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Form {
    pub fn field(&self, handle: &str) -> Option<&FormField> {
        self.fields.iter().find(|f| f.handle == handle)
    }

    /// Payment fields, in form order.
    pub fn payment_fields(&self) -> impl Iterator<Item = &FormField> {
        self.fields.iter().filter(|f| f.kind.is_payment())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FormSettings {
    pub use_queue_for_integrations: bool,
    pub rate_limit: u32,
    pub rate_limit_window_secs: u64,
    pub redirect_url: Option<String>,
    pub default_language: String,
    pub cors_origins: Vec<String>,
}

impl Default for FormSettings {
    fn default() -> Self {
        Self {
            use_queue_for_integrations: true,
            rate_limit: 10,
            rate_limit_window_secs: 60,
            redirect_url: None,
            default_language: "en".to_string(),
            cors_origins: Vec::new(),
        }
    }
}
