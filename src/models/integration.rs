use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::integrations::field::IntegrationFormSettings;

/// A configured instance of a provider. `uid` is what queued jobs hold on to,
/// so a reconfigured integration is picked up fresh at execution time.
#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct Integration {
    pub id: Uuid,
    pub uid: Uuid,
    pub handle: String,
    pub name: String,
    pub provider: String,
    pub settings: serde_json::Value,
    pub token_id: Option<Uuid>,
    pub enabled: bool,
    /// Last successfully fetched form settings.
    pub cache: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Integration {
    pub fn setting(&self, key: &str) -> Option<&str> {
        self.settings
            .get(key)
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
    }

    pub fn setting_bool(&self, key: &str) -> bool {
        match self.settings.get(key) {
            Some(serde_json::Value::Bool(b)) => *b,
            Some(serde_json::Value::String(s)) => matches!(s.as_str(), "1" | "true" | "yes"),
            _ => false,
        }
    }

    pub fn cached_form_settings(&self) -> IntegrationFormSettings {
        self.cache
            .as_ref()
            .and_then(|c| serde_json::from_value(c.clone()).ok())
            .unwrap_or_default()
    }
}
