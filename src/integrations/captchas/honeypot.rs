use async_trait::async_trait;
use serde_json::{Value, json};

use crate::integrations::{
    CaptchaProvider, CaptchaRequest, CaptchaVerdict, IntegrationError, IntegrationKind,
    IntegrationProvider,
};

const DEFAULT_FIELD: &str = "beesknees";

/// A hidden input real visitors leave empty.
pub struct Honeypot;

/// Whether `field` carries anything. Any non-string value counts.
pub fn is_filled(values: &Value, field: &str) -> bool {
    match values.get(field) {
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Null) | None => false,
        Some(_) => true,
    }
}

#[async_trait]
impl IntegrationProvider for Honeypot {
    fn id(&self) -> &str {
        "honeypot"
    }

    fn name(&self) -> &str {
        "Honeypot"
    }

    fn kind(&self) -> IntegrationKind {
        IntegrationKind::Captcha
    }

    fn supports_payload_sending(&self) -> bool {
        false
    }

    fn settings_schema(&self) -> Value {
        json!({
            "field": {"type": "string", "default": DEFAULT_FIELD}
        })
    }

    fn validate_settings(&self, settings: &Value) -> Result<(), IntegrationError> {
        match settings.get("field") {
            None | Some(Value::Null) => Ok(()),
            Some(Value::String(s)) if !s.trim().is_empty() => Ok(()),
            Some(_) => Err(IntegrationError::config("field must be a non-empty string.")),
        }
    }
}

#[async_trait]
impl CaptchaProvider for Honeypot {
    async fn validate_submission(&self, req: &CaptchaRequest<'_>) -> CaptchaVerdict {
        let field = req.integration.setting("field").unwrap_or(DEFAULT_FIELD);
        if is_filled(req.values, field) {
            CaptchaVerdict::reject(format!("Honeypot field `{field}` was filled in."))
        } else {
            CaptchaVerdict::pass()
        }
    }
}
