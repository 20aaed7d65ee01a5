use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Success,
    Failed,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Success => "success",
            PaymentStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(PaymentStatus::Pending),
            "success" => Some(PaymentStatus::Success),
            "failed" => Some(PaymentStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, PaymentStatus::Pending)
    }

    /// Only `pending` may move, and only to a terminal state.
    pub fn can_transition(&self, to: PaymentStatus) -> bool {
        *self == PaymentStatus::Pending && to.is_terminal()
    }
}

/// 3-D Secure step-up state of a pending payment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthenticationState {
    Required,
    /// A callback has claimed the challenge and is completing the payment.
    Verifying,
    Authenticated,
    Failed,
}

impl AuthenticationState {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthenticationState::Required => "required",
            AuthenticationState::Verifying => "verifying",
            AuthenticationState::Authenticated => "authenticated",
            AuthenticationState::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "required" => Some(AuthenticationState::Required),
            "verifying" => Some(AuthenticationState::Verifying),
            "authenticated" => Some(AuthenticationState::Authenticated),
            "failed" => Some(AuthenticationState::Failed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct Payment {
    pub id: Uuid,
    pub integration_id: Uuid,
    pub submission_id: Uuid,
    pub field_handle: String,
    pub amount: Decimal,
    pub currency: String,
    pub status: String,
    pub reference: Option<String>,
    pub authentication: Option<String>,
    pub response: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Payment {
    pub fn status(&self) -> Option<PaymentStatus> {
        PaymentStatus::parse(&self.status)
    }

    pub fn authentication(&self) -> Option<AuthenticationState> {
        self.authentication.as_deref().and_then(AuthenticationState::parse)
    }
}
