use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use uuid::Uuid;

/// `{group: {external_handle: source_expression}}`. Providers with a single
/// flat schema use the `default` group.
pub type FieldMappings = BTreeMap<String, BTreeMap<String, String>>;

#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct FormIntegration {
    pub form_id: Uuid,
    pub integration_id: Uuid,
    pub enabled: bool,
    pub settings: serde_json::Value,
    pub field_mappings: Json<FieldMappings>,
    pub updated_at: DateTime<Utc>,
}

impl FormIntegration {
    pub fn mapping(&self, group: &str) -> Option<&BTreeMap<String, String>> {
        self.field_mappings.get(group)
    }

    pub fn setting_bool(&self, key: &str) -> bool {
        match self.settings.get(key) {
            Some(serde_json::Value::Bool(b)) => *b,
            Some(serde_json::Value::String(s)) => matches!(s.as_str(), "1" | "true" | "yes"),
            Some(serde_json::Value::Number(n)) => n.as_i64() == Some(1),
            _ => false,
        }
    }

    pub fn setting_str(&self, key: &str) -> Option<&str> {
        self.settings
            .get(key)
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
    }
}
