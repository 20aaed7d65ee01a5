use async_trait::async_trait;
use serde_json::{Map, Value, json};

use crate::fields::NormalizeTarget;
use crate::integrations::client::{self, OutboundRequest};
use crate::integrations::template::{self, TemplateContext};
use crate::integrations::{
    Delivery, IntegrationContext, IntegrationError, IntegrationKind, IntegrationProvider, SendContext,
};
use crate::models::{Form, Submission};

/// Posts the whole submission to a URL.
pub struct Webhook;

impl Webhook {
    pub fn new() -> Self {
        Self
    }
}

impl Default for Webhook {
    fn default() -> Self {
        Self::new()
    }
}

/// Every field's value in its natural integration shape, plus submission
/// details.
pub fn submission_payload(form: &Form, submission: &Submission) -> Value {
    let mut fields = Map::new();
    for field in form.fields.iter() {
        if field.kind.is_payment() {
            continue;
        }
        let raw = submission.value(&field.handle).unwrap_or(&Value::Null);
        let target = NormalizeTarget::new(field.kind.natural_type(), IntegrationKind::Miscellaneous);
        fields.insert(field.handle.clone(), field.value_for_integration(raw, &target));
    }

    json!({
        "submission": {
            "id": submission.id,
            "status": submission.status,
            "site": submission.site_handle,
            "language": submission.language,
            "dateCreated": submission.created_at,
        },
        "form": {
            "id": form.id,
            "handle": form.handle,
            "title": form.title,
        },
        "fields": fields,
    })
}

#[async_trait]
impl IntegrationProvider for Webhook {
    fn id(&self) -> &str {
        "webhook"
    }

    fn name(&self) -> &str {
        "Webhook"
    }

    fn kind(&self) -> IntegrationKind {
        IntegrationKind::Miscellaneous
    }

    fn settings_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "url": { "type": "string", "description": "Webhook URL" },
                "method": { "type": "string", "enum": ["POST", "PUT"], "default": "POST" },
                "headers": { "type": "object", "description": "Custom headers" },
                "body_template": { "type": "string", "description": "Custom body template (JSON). If empty, sends the full submission." }
            },
            "required": ["url"]
        })
    }

    fn validate_settings(&self, settings: &Value) -> Result<(), IntegrationError> {
        settings
            .get("url")
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| IntegrationError::config("url is required"))?;
        Ok(())
    }

    async fn fetch_connection(&self, ctx: &IntegrationContext<'_>) -> Result<(), IntegrationError> {
        let url = ctx
            .integration
            .setting("url")
            .ok_or_else(|| IntegrationError::config("url is required"))?;
        OutboundRequest::post(url)
            .json(json!({ "test": true }))
            .send(ctx.http)
            .await?;
        Ok(())
    }

    async fn send_payload(&self, ctx: &SendContext<'_>) -> Result<Delivery, IntegrationError> {
        let integration = ctx.integration();
        let tctx = TemplateContext {
            form: ctx.form,
            submission: ctx.submission,
            integration: Some(integration),
        };

        // A per-form URL overrides the integration's.
        let url = ctx
            .form_integration
            .setting_str("url")
            .or_else(|| integration.setting("url"))
            .ok_or_else(|| IntegrationError::config("url is required"))?;
        let url = template::render(url, &tctx);

        let method = match integration.setting("method") {
            Some("PUT") => reqwest::Method::PUT,
            _ => reqwest::Method::POST,
        };

        let body = match integration.setting("body_template") {
            Some(tmpl) => {
                let rendered = template::render(tmpl, &tctx);
                serde_json::from_str(&rendered).unwrap_or(json!(rendered))
            }
            None => submission_payload(ctx.form, ctx.submission),
        };

        let mut request = OutboundRequest::new(method, url).json(body);
        if let Some(headers) = integration.settings.get("headers").and_then(|v| v.as_object()) {
            for (name, value) in headers {
                if let Some(value) = value.as_str() {
                    request = request.header(name, template::render(value, &tctx));
                }
            }
        }

        client::deliver_payload(ctx, request, None).await
    }
}
