use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use super::{MISSING_TOKEN, client_token, transport_failure};
use crate::integrations::client::OutboundRequest;
use crate::integrations::{
    CaptchaProvider, CaptchaRequest, CaptchaVerdict, IntegrationError, IntegrationKind,
    IntegrationProvider,
};
use crate::models::Integration;

pub const TOKEN_PARAM: &str = "g-recaptcha-response";
pub const DEFAULT_MIN_SCORE: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecaptchaType {
    V2Checkbox,
    V2Invisible,
    V3,
    Enterprise,
}

impl RecaptchaType {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "v2_checkbox" => Some(RecaptchaType::V2Checkbox),
            "v2_invisible" => Some(RecaptchaType::V2Invisible),
            "v3" => Some(RecaptchaType::V3),
            "enterprise" => Some(RecaptchaType::Enterprise),
            _ => None,
        }
    }
}

/// Google reCAPTCHA, classic siteverify or an Enterprise assessment.
pub struct Recaptcha {
    verify_url: String,
    enterprise_url: String,
}

impl Recaptcha {
    pub fn new(verify_url: &str, enterprise_url: &str) -> Self {
        Self {
            verify_url: verify_url.to_string(),
            enterprise_url: enterprise_url.trim_end_matches('/').to_string(),
        }
    }

    fn recaptcha_type(integration: &Integration) -> RecaptchaType {
        integration
            .setting("type")
            .and_then(RecaptchaType::parse)
            .unwrap_or(RecaptchaType::V2Checkbox)
    }

    fn min_score(integration: &Integration) -> f64 {
        match integration.settings.get("minScore") {
            Some(Value::Number(n)) => n.as_f64(),
            Some(Value::String(s)) => s.trim().parse().ok(),
            _ => None,
        }
        .unwrap_or(DEFAULT_MIN_SCORE)
    }

    async fn siteverify(&self, req: &CaptchaRequest<'_>, token: &str) -> Result<Value, IntegrationError> {
        let mut params = vec![
            (
                "secret".to_string(),
                req.integration.setting("secretKey").unwrap_or_default().to_string(),
            ),
            ("response".to_string(), token.to_string()),
        ];
        if let Some(ip) = req.ip {
            params.push(("remoteip".to_string(), ip.to_string()));
        }

        OutboundRequest::post(&self.verify_url)
            .form(params)
            .send(req.http)
            .await
    }

    async fn assess(&self, req: &CaptchaRequest<'_>, token: &str) -> Result<Value, IntegrationError> {
        let integration = req.integration;
        let project = integration
            .setting("projectId")
            .ok_or_else(|| IntegrationError::config("reCAPTCHA Enterprise project id is not set."))?;
        let query: String = form_urlencoded::Serializer::new(String::new())
            .append_pair("key", integration.setting("secretKey").unwrap_or_default())
            .finish();

        let url = format!("{}/v1/projects/{project}/assessments?{query}", self.enterprise_url);
        let body = json!({
            "event": {
                "siteKey": integration.setting("siteKey").unwrap_or_default(),
                "token": token,
                "userAgent": req.user_agent,
                "userIpAddress": req.ip,
            }
        });

        OutboundRequest::post(url).json(body).send(req.http).await
    }
}

/// Verdict for a classic siteverify response. Scores are only present for v3.
pub fn siteverify_verdict(result: &Value, min_score: f64) -> CaptchaVerdict {
    let success = result.get("success").and_then(|v| v.as_bool()).unwrap_or(false);

    if success {
        return match result.get("score").and_then(|v| v.as_f64()) {
            Some(score) if score < min_score => {
                CaptchaVerdict::reject(format!("Score {score} is below threshold {min_score}."))
            }
            _ => CaptchaVerdict::pass(),
        };
    }

    CaptchaVerdict::reject(result.to_string())
}

/// Verdict for an Enterprise assessment. The token must be valid; a score,
/// when present, must then meet the threshold.
pub fn assessment_verdict(result: &Value, min_score: f64) -> CaptchaVerdict {
    let valid = result
        .pointer("/tokenProperties/valid")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);

    if !valid {
        let reason = result
            .pointer("/tokenProperties/invalidReason")
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .unwrap_or("Captcha validation failed.");
        return CaptchaVerdict::reject(reason);
    }

    let score = result
        .pointer("/riskAnalysis/score")
        .or_else(|| result.get("score"))
        .and_then(|v| v.as_f64());

    match score {
        Some(score) if score < min_score => {
            CaptchaVerdict::reject(format!("Score {score} is below threshold {min_score}."))
        }
        _ => CaptchaVerdict::pass(),
    }
}

#[async_trait]
impl IntegrationProvider for Recaptcha {
    fn id(&self) -> &str {
        "recaptcha"
    }

    fn name(&self) -> &str {
        "reCAPTCHA"
    }

    fn kind(&self) -> IntegrationKind {
        IntegrationKind::Captcha
    }

    fn supports_payload_sending(&self) -> bool {
        false
    }

    fn settings_schema(&self) -> Value {
        json!({
            "type": {
                "type": "string",
                "options": ["v2_checkbox", "v2_invisible", "v3", "enterprise"],
                "default": "v2_checkbox"
            },
            "siteKey": {"type": "string", "required": true},
            "secretKey": {"type": "string", "required": true, "secret": true},
            "projectId": {"type": "string"},
            "minScore": {"type": "number", "default": DEFAULT_MIN_SCORE}
        })
    }

    fn validate_settings(&self, settings: &Value) -> Result<(), IntegrationError> {
        let text = |key: &str| settings.get(key).and_then(|v| v.as_str()).map(str::trim).filter(|s| !s.is_empty());

        for key in ["siteKey", "secretKey"] {
            if text(key).is_none() {
                return Err(IntegrationError::config(format!("{key} is required.")));
            }
        }

        match text("type").map(RecaptchaType::parse) {
            None => Ok(()),
            Some(None) => Err(IntegrationError::config("Unknown reCAPTCHA type.")),
            Some(Some(RecaptchaType::Enterprise)) if text("projectId").is_none() => {
                Err(IntegrationError::config("projectId is required for reCAPTCHA Enterprise."))
            }
            Some(Some(_)) => Ok(()),
        }
    }
}

#[async_trait]
impl CaptchaProvider for Recaptcha {
    async fn validate_submission(&self, req: &CaptchaRequest<'_>) -> CaptchaVerdict {
        let Some(token) = client_token(req.values, TOKEN_PARAM) else {
            return CaptchaVerdict::reject(MISSING_TOKEN);
        };

        let min_score = Self::min_score(req.integration);

        match Self::recaptcha_type(req.integration) {
            RecaptchaType::Enterprise => match self.assess(req, token).await {
                Ok(result) => assessment_verdict(&result, min_score),
                Err(err) => transport_failure(req.integration, err),
            },
            _ => match self.siteverify(req, token).await {
                Ok(result) => siteverify_verdict(&result, min_score),
                Err(err) => transport_failure(req.integration, err),
            },
        }
    }
}
