pub mod form_integrations;
pub mod forms;
pub mod integration_jobs;
pub mod integration_log;
pub mod integrations;
pub mod memory;
pub mod oauth_tokens;
pub mod payments;
pub mod submissions;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use sqlx::PgPool;
use uuid::Uuid;

use crate::fields::FormField;
use crate::models::{
    AuthenticationState, FieldMappings, Form, FormIntegration, FormSettings, Integration,
    IntegrationJob, IntegrationLog, OauthToken, Payment, PaymentStatus, Submission,
    SubmissionStatus,
};

#[derive(Debug)]
pub enum StoreError {
    Database(sqlx::Error),
    NotFound(String),
    Conflict(String),
    Crypto(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Database(err) => write!(f, "Database error: {err}"),
            StoreError::NotFound(msg) => write!(f, "Not found: {msg}"),
            StoreError::Conflict(msg) => write!(f, "Conflict: {msg}"),
            StoreError::Crypto(msg) => write!(f, "Crypto error: {msg}"),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => StoreError::NotFound("row not found".to_string()),
            sqlx::Error::Database(ref db) if db.is_unique_violation() => {
                StoreError::Conflict(db.message().to_string())
            }
            other => StoreError::Database(other),
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

// ── Inputs ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct NewForm {
    pub handle: String,
    pub title: String,
    #[serde(default)]
    pub fields: Vec<FormField>,
    #[serde(default)]
    pub settings: FormSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewIntegration {
    pub handle: String,
    pub name: String,
    pub provider: String,
    #[serde(default = "empty_object")]
    pub settings: serde_json::Value,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FormIntegrationInput {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "empty_object")]
    pub settings: serde_json::Value,
    #[serde(default)]
    pub field_mappings: FieldMappings,
}

#[derive(Debug, Clone)]
pub struct NewSubmission {
    pub form_id: Uuid,
    pub status: SubmissionStatus,
    pub values: serde_json::Value,
    pub site_handle: String,
    pub language: String,
    pub spam_reason: Option<String>,
    pub metadata: serde_json::Value,
}

#[derive(Debug, Clone)]
pub struct NewPayment {
    pub integration_id: Uuid,
    pub submission_id: Uuid,
    pub field_handle: String,
    pub amount: Decimal,
    pub currency: String,
    pub status: PaymentStatus,
    pub reference: Option<String>,
    pub authentication: Option<AuthenticationState>,
    pub response: serde_json::Value,
}

#[derive(Debug, Clone)]
pub struct NewToken {
    pub integration_uid: Uuid,
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub token_url: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

fn empty_object() -> serde_json::Value {
    serde_json::json!({})
}

fn default_true() -> bool {
    true
}

// ── Stores ──────────────────────────────────────────────────────

#[async_trait]
pub trait FormStore: Send + Sync {
    async fn find_by_id(&self, id: Uuid) -> StoreResult<Option<Form>>;
    async fn find_by_handle(&self, handle: &str) -> StoreResult<Option<Form>>;
    async fn list(&self) -> StoreResult<Vec<Form>>;
    async fn create(&self, form: &NewForm) -> StoreResult<Form>;
    async fn update(&self, id: Uuid, form: &NewForm) -> StoreResult<Form>;
    async fn delete(&self, id: Uuid) -> StoreResult<()>;
}

#[async_trait]
pub trait IntegrationStore: Send + Sync {
    async fn find_by_id(&self, id: Uuid) -> StoreResult<Option<Integration>>;
    async fn find_by_uid(&self, uid: Uuid) -> StoreResult<Option<Integration>>;
    async fn find_by_handle(&self, handle: &str) -> StoreResult<Option<Integration>>;
    async fn list(&self) -> StoreResult<Vec<Integration>>;
    async fn create(&self, integration: &NewIntegration) -> StoreResult<Integration>;
    async fn update(&self, id: Uuid, integration: &NewIntegration) -> StoreResult<Integration>;
    async fn delete(&self, id: Uuid) -> StoreResult<()>;
    async fn save_cache(&self, id: Uuid, cache: &serde_json::Value) -> StoreResult<()>;
    async fn set_token(&self, id: Uuid, token_id: Option<Uuid>) -> StoreResult<()>;

    async fn list_for_form(&self, form_id: Uuid) -> StoreResult<Vec<FormIntegration>>;
    async fn find_form_integration(
        &self,
        form_id: Uuid,
        integration_id: Uuid,
    ) -> StoreResult<Option<FormIntegration>>;
    async fn save_form_integration(
        &self,
        form_id: Uuid,
        integration_id: Uuid,
        input: &FormIntegrationInput,
    ) -> StoreResult<FormIntegration>;
}

#[async_trait]
pub trait SubmissionStore: Send + Sync {
    async fn create(&self, submission: &NewSubmission) -> StoreResult<Submission>;
    /// Looks up a submission whatever its status, incomplete and spam included.
    async fn find_by_id(&self, id: Uuid) -> StoreResult<Option<Submission>>;
    async fn list_by_form(&self, form_id: Uuid, limit: i64, offset: i64) -> StoreResult<Vec<Submission>>;
    async fn set_status(
        &self,
        id: Uuid,
        status: SubmissionStatus,
        spam_reason: Option<&str>,
    ) -> StoreResult<()>;
}

#[async_trait]
pub trait PaymentRepository: Send + Sync {
    async fn create(&self, payment: &NewPayment) -> StoreResult<Payment>;
    async fn find_by_id(&self, id: Uuid) -> StoreResult<Option<Payment>>;
    async fn find_by_reference(
        &self,
        integration_id: Uuid,
        reference: &str,
    ) -> StoreResult<Option<Payment>>;
    async fn list_for_submission(&self, submission_id: Uuid) -> StoreResult<Vec<Payment>>;
    /// Move a pending payment to `to`, recording the provider reference when
    /// one is given. Returns false, changing nothing, when the payment is no
    /// longer pending.
    async fn transition(
        &self,
        id: Uuid,
        to: PaymentStatus,
        reference: Option<&str>,
        response: &serde_json::Value,
    ) -> StoreResult<bool>;
    /// Record the provider reference of a payment that is still pending.
    async fn set_reference(&self, id: Uuid, reference: &str) -> StoreResult<()>;
    async fn set_authentication(
        &self,
        id: Uuid,
        state: AuthenticationState,
    ) -> StoreResult<()>;
    /// Compare-and-set on the authentication state of a pending payment.
    /// Returns false when another caller got there first.
    async fn swap_authentication(
        &self,
        id: Uuid,
        from: AuthenticationState,
        to: AuthenticationState,
    ) -> StoreResult<bool>;
}

#[async_trait]
pub trait TokenStore: Send + Sync {
    async fn find_for_integration(&self, integration_uid: Uuid) -> StoreResult<Option<OauthToken>>;
    async fn save(&self, token: &NewToken) -> StoreResult<OauthToken>;
}

#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn enqueue(&self, submission_id: Uuid, integration_uid: Uuid) -> StoreResult<IntegrationJob>;
    /// Claim the next ready job, bumping its attempt count.
    async fn claim_next(&self) -> StoreResult<Option<IntegrationJob>>;
    async fn find_by_id(&self, id: Uuid) -> StoreResult<Option<IntegrationJob>>;
    async fn set_progress(&self, id: Uuid, progress: f64) -> StoreResult<()>;
    async fn mark_completed(&self, id: Uuid) -> StoreResult<()>;
    async fn mark_failed(
        &self,
        id: Uuid,
        attempts: i32,
        max_attempts: i32,
        error: &str,
    ) -> StoreResult<()>;
}

#[async_trait]
pub trait IntegrationLogStore: Send + Sync {
    async fn create(
        &self,
        integration_id: Uuid,
        submission_id: Uuid,
        success: bool,
        response: Option<&serde_json::Value>,
    ) -> StoreResult<IntegrationLog>;
    async fn list_by_integration(
        &self,
        integration_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> StoreResult<Vec<IntegrationLog>>;
}

/// Postgres-backed implementation of every store.
#[derive(Clone)]
pub struct PgStore {
    pub pool: PgPool,
    encryption_key: String,
}

impl PgStore {
    pub fn new(pool: PgPool, encryption_key: &str) -> Self {
        Self {
            pool,
            encryption_key: encryption_key.to_string(),
        }
    }
}

#[derive(Clone)]
pub struct Stores {
    pub forms: Arc<dyn FormStore>,
    pub integrations: Arc<dyn IntegrationStore>,
    pub submissions: Arc<dyn SubmissionStore>,
    pub payments: Arc<dyn PaymentRepository>,
    pub tokens: Arc<dyn TokenStore>,
    pub jobs: Arc<dyn JobQueue>,
    pub logs: Arc<dyn IntegrationLogStore>,
}

impl Stores {
    pub fn postgres(pool: PgPool, encryption_key: &str) -> Self {
        let store = Arc::new(PgStore::new(pool, encryption_key));
        Self {
            forms: store.clone(),
            integrations: store.clone(),
            submissions: store.clone(),
            payments: store.clone(),
            tokens: store.clone(),
            jobs: store.clone(),
            logs: store,
        }
    }

    pub fn memory() -> Self {
        let store = Arc::new(memory::MemoryStore::new());
        Self {
            forms: store.clone(),
            integrations: store.clone(),
            submissions: store.clone(),
            payments: store.clone(),
            tokens: store.clone(),
            jobs: store.clone(),
            logs: store,
        }
    }
}
