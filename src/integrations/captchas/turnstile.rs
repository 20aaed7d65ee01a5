use async_trait::async_trait;
use serde_json::{Value, json};

use super::{MISSING_TOKEN, client_token, transport_failure};
use crate::integrations::client::OutboundRequest;
use crate::integrations::{
    CaptchaProvider, CaptchaRequest, CaptchaVerdict, IntegrationError, IntegrationKind,
    IntegrationProvider,
};

pub const TOKEN_PARAM: &str = "cf-turnstile-response";

/// Cloudflare Turnstile.
pub struct Turnstile {
    verify_url: String,
}

impl Turnstile {
    pub fn new(verify_url: &str) -> Self {
        Self {
            verify_url: verify_url.to_string(),
        }
    }
}

#[async_trait]
impl IntegrationProvider for Turnstile {
    fn id(&self) -> &str {
        "turnstile"
    }

    fn name(&self) -> &str {
        "Cloudflare Turnstile"
    }

    fn kind(&self) -> IntegrationKind {
        IntegrationKind::Captcha
    }

    fn supports_payload_sending(&self) -> bool {
        false
    }

    fn settings_schema(&self) -> Value {
        json!({
            "siteKey": {"type": "string", "required": true},
            "secretKey": {"type": "string", "required": true, "secret": true}
        })
    }

    fn validate_settings(&self, settings: &Value) -> Result<(), IntegrationError> {
        for key in ["siteKey", "secretKey"] {
            if settings.get(key).and_then(|v| v.as_str()).is_none_or(|s| s.trim().is_empty()) {
                return Err(IntegrationError::config(format!("{key} is required.")));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl CaptchaProvider for Turnstile {
    async fn validate_submission(&self, req: &CaptchaRequest<'_>) -> CaptchaVerdict {
        let Some(token) = client_token(req.values, TOKEN_PARAM) else {
            return CaptchaVerdict::reject(MISSING_TOKEN);
        };

        let body = json!({
            "secret": req.integration.setting("secretKey").unwrap_or_default(),
            "response": token,
            "remoteip": req.ip,
        });

        let result = match OutboundRequest::post(&self.verify_url).json(body).send(req.http).await {
            Ok(result) => result,
            Err(err) => return transport_failure(req.integration, err),
        };

        if result.get("success").and_then(|v| v.as_bool()).unwrap_or(false) {
            CaptchaVerdict::pass()
        } else {
            CaptchaVerdict::reject(result.to_string())
        }
    }
}
