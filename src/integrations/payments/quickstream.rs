use async_trait::async_trait;
use axum::http::HeaderMap;
use hmac::{Hmac, Mac};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde_json::{Map, Value, json};
use sha2::Sha256;

use crate::integrations::client::{OutboundRequest, RequestAuth};
use crate::integrations::{
    GatewayResult, IntegrationContext, IntegrationError, IntegrationKind, IntegrationProvider,
    PaymentGateway, PaymentRequest, ThreeDsResult, ThreeDsStatus, WebhookNotification,
};
use crate::models::{AuthenticationState, Integration, Payment, PaymentStatus};
use crate::payments::three_ds;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "x-quickstream-signature";

/// Westpac QuickStream card payments, with 3-D Secure step-up.
pub struct QuickStream {
    live_url: String,
    test_url: String,
}

impl QuickStream {
    pub fn new(live_url: &str, test_url: &str) -> Self {
        Self {
            live_url: live_url.trim_end_matches('/').to_string(),
            test_url: test_url.trim_end_matches('/').to_string(),
        }
    }

    fn request(
        &self,
        integration: &Integration,
        test_mode: bool,
        method: reqwest::Method,
        path: &str,
    ) -> Result<OutboundRequest, IntegrationError> {
        let secret = integration
            .setting("secretKey")
            .ok_or_else(|| IntegrationError::config("QuickStream secret key is not set."))?;
        let base = if test_mode { &self.test_url } else { &self.live_url };

        Ok(OutboundRequest::new(method, format!("{base}/{}", path.trim_start_matches('/')))
            .header("Accept", "application/json")
            .auth(RequestAuth::Basic {
                username: secret.to_string(),
                password: None,
            }))
    }

    fn supplier_code(integration: &Integration) -> Result<&str, IntegrationError> {
        integration
            .setting("supplierBusinessCode")
            .ok_or_else(|| IntegrationError::config("QuickStream supplier business code is not set."))
    }
}

/// Payment status for a QuickStream transaction status, or `None` when the
/// transaction did not go through.
pub fn classify_status(status: &str) -> Option<(PaymentStatus, Option<AuthenticationState>)> {
    match status {
        "Approved" | "Approved*" => Some((PaymentStatus::Success, None)),
        "Pending" => Some((PaymentStatus::Pending, None)),
        "Authentication Required" => Some((PaymentStatus::Pending, Some(AuthenticationState::Required))),
        _ => None,
    }
}

/// `"DECLINED_BY_BANK"` → `"Declined By Bank"`.
pub fn titleize(input: &str) -> String {
    input
        .replace(['_', '-'], " ")
        .split_whitespace()
        .map(|word| {
            let lower = word.to_lowercase();
            let mut chars = lower.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn amount_value(amount: Decimal) -> Value {
    amount
        .round_dp(2)
        .to_f64()
        .map(Value::from)
        .unwrap_or_else(|| Value::String(amount.to_string()))
}

/// Turn a transaction response into a gateway result, or a RemoteRejected
/// error carrying the response for anything that wasn't accepted.
fn transaction_result(response: Value) -> Result<GatewayResult, IntegrationError> {
    let status = response.get("status").and_then(|v| v.as_str()).unwrap_or("");
    match classify_status(status) {
        Some((status, authentication)) => Ok(GatewayResult {
            status,
            reference: response
                .get("receiptNumber")
                .and_then(|v| v.as_str())
                .filter(|s| !s.is_empty())
                .map(|s| s.to_string()),
            authentication,
            response,
        }),
        None => {
            let text = response.get("responseText").and_then(|v| v.as_str()).unwrap_or("");
            Err(IntegrationError::rejected(format!("{}: {text}", titleize(status))).with_response(response))
        }
    }
}

fn token_from(value: &Value) -> Option<&str> {
    value
        .get("singleUseTokenId")
        .or_else(|| value.get("quickstreamTokenId"))
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
}

#[async_trait]
impl IntegrationProvider for QuickStream {
    fn id(&self) -> &str {
        "quickstream"
    }

    fn name(&self) -> &str {
        "Westpac QuickStream"
    }

    fn kind(&self) -> IntegrationKind {
        IntegrationKind::Payment
    }

    fn supports_payload_sending(&self) -> bool {
        false
    }

    fn settings_schema(&self) -> Value {
        json!({
            "publishableKey": {"type": "string", "required": true},
            "secretKey": {"type": "string", "required": true, "secret": true},
            "supplierBusinessCode": {"type": "string", "required": true},
            "webhookSecret": {"type": "string", "secret": true},
            "isTestMode": {"type": "boolean", "default": true}
        })
    }

    fn validate_settings(&self, settings: &Value) -> Result<(), IntegrationError> {
        for key in ["publishableKey", "secretKey", "supplierBusinessCode"] {
            let present = settings
                .get(key)
                .and_then(|v| v.as_str())
                .is_some_and(|s| !s.trim().is_empty());
            if !present {
                return Err(IntegrationError::config(format!("{key} is required.")));
            }
        }
        Ok(())
    }

    async fn fetch_connection(&self, ctx: &IntegrationContext<'_>) -> Result<(), IntegrationError> {
        let test_mode = ctx
            .integration
            .settings
            .get("isTestMode")
            .and_then(|v| v.as_bool())
            .unwrap_or(true);
        self.request(ctx.integration, test_mode, reqwest::Method::GET, "/")?
            .send(ctx.http)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl PaymentGateway for QuickStream {
    async fn process_payment(&self, req: &PaymentRequest<'_>) -> Result<GatewayResult, IntegrationError> {
        let integration = req.ctx.integration;

        let token = token_from(req.field_value())
            .ok_or_else(|| IntegrationError::config("Missing `singleUseTokenId` from payload."))?;
        let amount = req
            .amount
            .ok_or_else(|| IntegrationError::config("Missing `amount` from payload."))?;
        let currency = req
            .currency
            .as_deref()
            .ok_or_else(|| IntegrationError::config("Missing `currency` from payload."))?;

        let mut payload = json!({
            "transactionType": "PAYMENT",
            "singleUseTokenId": token,
            "supplierBusinessCode": Self::supplier_code(integration)?,
            "principalAmount": amount_value(amount),
            "currency": currency,
            "metadata": {
                "submissionId": req.submission.id.to_string(),
            },
            "eci": "INTERNET",
            "ipAddress": req.submission.ip(),
        });

        if req.settings.show_reference {
            if let Some(reference_field) = &req.settings.reference_field {
                let handle = reference_field.trim_start_matches('{').trim_end_matches('}');
                if let Some(value) = req.submission.value(handle).filter(|v| !v.is_null()) {
                    payload["customerReferenceNumber"] = value.clone();
                }
            }
        }

        let payload = req.ctx.hooks.modify_payment_payload(integration, req.submission, payload);

        let response = self
            .request(integration, req.settings.is_test_mode, reqwest::Method::POST, "transactions")?
            .json(payload)
            .send(req.ctx.http)
            .await?;

        transaction_result(response)
    }

    fn supports_webhooks(&self) -> bool {
        true
    }

    fn verify_webhook(&self, integration: &Integration, headers: &HeaderMap, body: &[u8]) -> Result<(), IntegrationError> {
        let secret = integration
            .setting("webhookSecret")
            .ok_or_else(|| IntegrationError::config("QuickStream webhook secret is not set."))?;

        let signature = headers
            .get(SIGNATURE_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| IntegrationError::malicious("Missing webhook signature."))?;
        let signature = hex::decode(signature.trim())
            .map_err(|_| IntegrationError::malicious("Invalid webhook signature."))?;

        let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
            .map_err(|e| IntegrationError::config(format!("Invalid webhook secret: {e}")))?;
        mac.update(body);
        mac.verify_slice(&signature)
            .map_err(|_| IntegrationError::malicious("Invalid webhook signature."))
    }

    fn parse_webhook(&self, body: &Value) -> Result<Option<WebhookNotification>, IntegrationError> {
        let transaction = body.get("data").unwrap_or(body);
        let Some(reference) = transaction
            .get("receiptNumber")
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
        else {
            return Ok(None);
        };

        let status = transaction.get("status").and_then(|v| v.as_str()).unwrap_or("");
        let status = classify_status(status)
            .map(|(status, _)| status)
            .unwrap_or(PaymentStatus::Failed);

        Ok(Some(WebhookNotification {
            reference: reference.to_string(),
            status,
            response: transaction.clone(),
        }))
    }

    /// Complete a payment that needed authentication. The browser posts back
    /// the fresh single-use token once the challenge has been passed.
    async fn process_callback(
        &self,
        ctx: &IntegrationContext<'_>,
        payment: &Payment,
        params: &Value,
    ) -> Result<GatewayResult, IntegrationError> {
        if params.get("authentication").and_then(|v| v.as_str()) == Some("failed") {
            return Ok(GatewayResult {
                status: PaymentStatus::Failed,
                reference: payment.reference.clone(),
                authentication: Some(AuthenticationState::Failed),
                response: json!({ "message": "3-D Secure authentication failed." }),
            });
        }

        let token = token_from(params)
            .ok_or_else(|| IntegrationError::config("Missing `singleUseTokenId` from payload."))?;
        let live_mode = params.get("liveMode").and_then(|v| v.as_bool()).unwrap_or(false);

        let mut payload = json!({
            "transactionType": "PAYMENT",
            "singleUseTokenId": token,
            "supplierBusinessCode": Self::supplier_code(ctx.integration)?,
            "principalAmount": amount_value(payment.amount),
            "currency": payment.currency,
            "metadata": {
                "submissionId": payment.submission_id.to_string(),
                "paymentId": payment.id.to_string(),
            },
            "eci": "INTERNET",
        });
        if let Some(three_ds) = params.get("threeDS") {
            payload["threeDS"] = three_ds.clone();
        }

        let response = self
            .request(ctx.integration, !live_mode, reqwest::Method::POST, "transactions")?
            .json(payload)
            .send(ctx.http)
            .await?;

        let mut result = transaction_result(response)?;
        if result.status == PaymentStatus::Pending && result.authentication == Some(AuthenticationState::Required) {
            return Err(IntegrationError::rejected("Payment still requires authentication.").with_response(result.response));
        }
        result.authentication = Some(AuthenticationState::Authenticated);
        Ok(result)
    }

    async fn request_3ds_auth(
        &self,
        ctx: &IntegrationContext<'_>,
        token_id: &str,
        params: &Value,
        live_mode: bool,
    ) -> ThreeDsResult {
        if token_id.is_empty() {
            return three_ds::error("Missing `singleUseTokenId` from payload.");
        }

        let supplier = match Self::supplier_code(ctx.integration) {
            Ok(code) => code,
            Err(err) => return three_ds::error(err.message),
        };

        let mut payload = Map::new();
        if let Some(extra) = params.as_object() {
            payload.extend(extra.clone());
        }
        payload.insert("singleUseTokenId".to_string(), json!(token_id));
        payload.insert("supplierBusinessCode".to_string(), json!(supplier));

        let request = match self.request(ctx.integration, !live_mode, reqwest::Method::POST, "three-ds-authentications") {
            Ok(request) => request.json(Value::Object(payload)),
            Err(err) => return three_ds::error(err.message),
        };

        let response = match request.send(ctx.http).await {
            Ok(response) => response,
            Err(err) => {
                crate::integrations::service::log_api_error(ctx.integration, &err);
                return three_ds::error(err.message);
            }
        };

        let status = response
            .get("transStatus")
            .or_else(|| response.get("status"))
            .and_then(|v| v.as_str())
            .map(three_ds::classify)
            .unwrap_or(ThreeDsStatus::Error);

        let message = response
            .get("responseText")
            .or_else(|| response.get("message"))
            .and_then(|v| v.as_str())
            .map(|s| s.to_string());

        ThreeDsResult {
            three_ds_status: status,
            success: matches!(status, ThreeDsStatus::Frictionless | ThreeDsStatus::Challenge),
            message,
            data: Some(response),
        }
    }
}
