pub mod captchas;
pub mod client;
pub mod crm;
pub mod elements;
pub mod email_marketing;
pub mod error;
pub mod field;
pub mod hooks;
pub mod mapping;
pub mod miscellaneous;
pub mod oauth;
pub mod payments;
pub mod service;
pub mod template;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use axum::http::HeaderMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::db::TokenStore;
use crate::fields::FormField;
use crate::models::{
    AuthenticationState, Form, FormIntegration, Integration, Payment, PaymentStatus, Submission,
};
use crate::payments::PaymentFieldSettings;

pub use error::{ErrorKind, IntegrationError};
pub use field::{IntegrationField, IntegrationFieldType, IntegrationFormSettings};
pub use hooks::{HookChain, HookOutcome, IntegrationHook};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntegrationKind {
    Crm,
    EmailMarketing,
    Payment,
    Captcha,
    Miscellaneous,
    Element,
}

/// Normalized result of one delivery attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntegrationResponse {
    pub success: bool,
    pub message: Value,
    /// Why a failed attempt failed, when the provider said.
    #[serde(skip)]
    pub kind: Option<ErrorKind>,
}

impl IntegrationResponse {
    pub fn ok() -> Self {
        Self {
            success: true,
            message: Value::Null,
            kind: None,
        }
    }

    pub fn failed(message: impl Into<Value>) -> Self {
        Self {
            success: false,
            message: message.into(),
            kind: None,
        }
    }

    pub fn from_error(err: &IntegrationError) -> Self {
        Self {
            success: false,
            message: service::error_message(err),
            kind: Some(err.kind),
        }
    }

    /// Whether sending the same payload again could succeed. Failures of
    /// unknown cause are retried.
    pub fn is_retryable(&self) -> bool {
        !self.success && self.kind.is_none_or(|kind| kind.is_retryable())
    }
}

/// What came of a send once hooks have had their say.
#[derive(Debug, Clone, PartialEq)]
pub enum Delivery {
    Sent(Value),
    /// A before/after hook vetoed the send. Counts as success.
    Skipped,
}

/// Ambient dependencies every provider call gets.
#[derive(Clone, Copy)]
pub struct IntegrationContext<'a> {
    pub integration: &'a Integration,
    pub http: &'a reqwest::Client,
    pub tokens: &'a dyn TokenStore,
    pub hooks: &'a HookChain,
}

/// A provider call made on behalf of one submission.
#[derive(Clone, Copy)]
pub struct SendContext<'a> {
    pub ctx: IntegrationContext<'a>,
    pub form: &'a Form,
    pub submission: &'a Submission,
    pub form_integration: &'a FormIntegration,
}

impl<'a> SendContext<'a> {
    pub fn integration(&self) -> &'a Integration {
        self.ctx.integration
    }

    /// `overwriteValues` form setting: send empty values rather than leaving
    /// the remote record's existing data alone.
    pub fn overwrite_values(&self) -> bool {
        self.form_integration.setting_bool("overwriteValues")
    }
}

#[async_trait]
pub trait IntegrationProvider: Send + Sync {
    /// Stable registry key stored on `Integration::provider`.
    fn id(&self) -> &str;
    fn name(&self) -> &str;
    fn kind(&self) -> IntegrationKind;
    fn settings_schema(&self) -> Value;
    fn validate_settings(&self, settings: &Value) -> Result<(), IntegrationError>;

    /// Whether rich-text values may be sent as markup.
    fn accepts_markup(&self) -> bool {
        false
    }

    /// Whether relation fields are sent as element ids.
    fn relations_as_ids(&self) -> bool {
        self.kind() == IntegrationKind::Element
    }

    fn supports_payload_sending(&self) -> bool {
        true
    }

    /// Provider-specific rewrite of a mapped value, applied before user hooks.
    fn modify_field_value(&self, _field: &FormField, value: Value) -> Value {
        value
    }

    async fn fetch_connection(&self, _ctx: &IntegrationContext<'_>) -> Result<(), IntegrationError> {
        Ok(())
    }

    async fn fetch_form_settings(
        &self,
        _ctx: &IntegrationContext<'_>,
    ) -> Result<IntegrationFormSettings, IntegrationError> {
        Ok(IntegrationFormSettings::default())
    }

    async fn send_payload(&self, _ctx: &SendContext<'_>) -> Result<Delivery, IntegrationError> {
        Err(IntegrationError::config(
            "Integration does not support payload sending.",
        ))
    }
}

/// Inputs for one capture attempt. Amount and currency are already resolved
/// from the field settings but may be missing; the gateway decides which
/// missing value to report first.
pub struct PaymentRequest<'a> {
    pub ctx: IntegrationContext<'a>,
    pub form: &'a Form,
    pub submission: &'a Submission,
    pub field: &'a FormField,
    pub settings: &'a PaymentFieldSettings,
    pub amount: Option<rust_decimal::Decimal>,
    pub currency: Option<String>,
}

impl PaymentRequest<'_> {
    /// The payment field's submitted value (tokens from the hosted frame).
    pub fn field_value(&self) -> &Value {
        self.submission.value(&self.field.handle).unwrap_or(&Value::Null)
    }
}

#[derive(Debug, Clone)]
pub struct GatewayResult {
    pub status: PaymentStatus,
    pub reference: Option<String>,
    pub authentication: Option<AuthenticationState>,
    pub response: Value,
}

/// A provider-pushed notification about an existing payment.
#[derive(Debug, Clone)]
pub struct WebhookNotification {
    pub reference: String,
    pub status: PaymentStatus,
    pub response: Value,
}

/// Outcome of a 3-D Secure authentication request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThreeDsStatus {
    Frictionless,
    Challenge,
    Failed,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreeDsResult {
    pub three_ds_status: ThreeDsStatus,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

#[async_trait]
pub trait PaymentGateway: IntegrationProvider {
    async fn process_payment(&self, req: &PaymentRequest<'_>) -> Result<GatewayResult, IntegrationError>;

    fn supports_webhooks(&self) -> bool {
        false
    }

    /// Check authenticity of a pushed notification against the raw body.
    fn verify_webhook(
        &self,
        _integration: &Integration,
        _headers: &HeaderMap,
        _body: &[u8],
    ) -> Result<(), IntegrationError> {
        Err(IntegrationError::config("Integration does not support webhooks."))
    }

    /// `Ok(None)` for notifications that carry nothing to reconcile.
    fn parse_webhook(&self, _body: &Value) -> Result<Option<WebhookNotification>, IntegrationError> {
        Err(IntegrationError::config("Integration does not support webhooks."))
    }

    /// Second leg of a challenge flow: complete the authenticated payment.
    async fn process_callback(
        &self,
        _ctx: &IntegrationContext<'_>,
        _payment: &Payment,
        _params: &Value,
    ) -> Result<GatewayResult, IntegrationError> {
        Err(IntegrationError::config("Integration does not support callbacks."))
    }

    async fn request_3ds_auth(
        &self,
        _ctx: &IntegrationContext<'_>,
        _token_id: &str,
        _params: &Value,
        _live_mode: bool,
    ) -> ThreeDsResult {
        ThreeDsResult {
            three_ds_status: ThreeDsStatus::Error,
            success: false,
            message: Some("Integration does not support 3-D Secure.".to_string()),
            data: None,
        }
    }
}

pub struct CaptchaRequest<'a> {
    pub integration: &'a Integration,
    pub http: &'a reqwest::Client,
    pub form: &'a Form,
    /// Raw submitted values, which carry the client-side token.
    pub values: &'a Value,
    pub ip: Option<&'a str>,
    pub user_agent: Option<&'a str>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CaptchaVerdict {
    pub passed: bool,
    pub spam_reason: Option<String>,
}

impl CaptchaVerdict {
    pub fn pass() -> Self {
        Self {
            passed: true,
            spam_reason: None,
        }
    }

    pub fn reject(reason: impl Into<String>) -> Self {
        Self {
            passed: false,
            spam_reason: Some(reason.into()),
        }
    }
}

#[async_trait]
pub trait CaptchaProvider: IntegrationProvider {
    /// Never errors: transport failures are logged and count as a rejection.
    async fn validate_submission(&self, req: &CaptchaRequest<'_>) -> CaptchaVerdict;
}

/// Providers keyed by their stable id.
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn IntegrationProvider>>,
    gateways: HashMap<String, Arc<dyn PaymentGateway>>,
    captchas: HashMap<String, Arc<dyn CaptchaProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self {
            providers: HashMap::new(),
            gateways: HashMap::new(),
            captchas: HashMap::new(),
        }
    }

    pub fn register(&mut self, provider: Arc<dyn IntegrationProvider>) {
        self.providers.insert(provider.id().to_string(), provider);
    }

    pub fn register_payment<P: PaymentGateway + 'static>(&mut self, gateway: Arc<P>) {
        self.providers
            .insert(gateway.id().to_string(), gateway.clone());
        self.gateways.insert(gateway.id().to_string(), gateway);
    }

    pub fn register_captcha<P: CaptchaProvider + 'static>(&mut self, captcha: Arc<P>) {
        self.providers
            .insert(captcha.id().to_string(), captcha.clone());
        self.captchas.insert(captcha.id().to_string(), captcha);
    }

    pub fn get(&self, id: &str) -> Option<&Arc<dyn IntegrationProvider>> {
        self.providers.get(id)
    }

    pub fn gateway(&self, id: &str) -> Option<&Arc<dyn PaymentGateway>> {
        self.gateways.get(id)
    }

    pub fn captcha(&self, id: &str) -> Option<&Arc<dyn CaptchaProvider>> {
        self.captchas.get(id)
    }

    pub fn list(&self) -> Vec<&Arc<dyn IntegrationProvider>> {
        let mut list: Vec<_> = self.providers.values().collect();
        list.sort_by(|a, b| a.id().cmp(b.id()));
        list
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}
