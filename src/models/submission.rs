use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubmissionStatus {
    Incomplete,
    Complete,
    Spam,
}

impl SubmissionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubmissionStatus::Incomplete => "incomplete",
            SubmissionStatus::Complete => "complete",
            SubmissionStatus::Spam => "spam",
        }
    }
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct Submission {
    pub id: Uuid,
    pub form_id: Uuid,
    pub status: String,
    pub values: serde_json::Value,
    pub site_handle: String,
    pub language: String,
    pub spam_reason: Option<String>,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Submission {
    pub fn value(&self, handle: &str) -> Option<&serde_json::Value> {
        self.values.get(handle)
    }

    pub fn is_spam(&self) -> bool {
        self.status == SubmissionStatus::Spam.as_str()
    }

    pub fn ip(&self) -> Option<&str> {
        self.metadata.get("ip").and_then(|v| v.as_str())
    }

    pub fn user_agent(&self) -> Option<&str> {
        self.metadata.get("user_agent").and_then(|v| v.as_str())
    }
}
