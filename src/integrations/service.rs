use serde_json::{Value, json};

use super::{
    Delivery, ErrorKind, IntegrationContext, IntegrationError, IntegrationFormSettings,
    IntegrationProvider, SendContext,
};
use crate::models::Integration;

/// Log a provider failure with enough context to debug it. Malicious
/// errors are the client's fault and are not logged.
pub fn log_api_error(integration: &Integration, err: &IntegrationError) {
    if err.kind == ErrorKind::Malicious {
        return;
    }

    tracing::error!(
        integration = %integration.handle,
        provider = %integration.provider,
        kind = err.kind.as_str(),
        status = ?err.status,
        origin = %err.origin(),
        request = %err.request.as_ref().map(|r| r.to_string()).unwrap_or_default(),
        response = %err.response.as_ref().map(|r| r.to_string()).unwrap_or_default(),
        "API error: {}",
        err.message
    );
}

/// Structured message stored on the integration log and job error.
pub fn error_message(err: &IntegrationError) -> Value {
    let mut message = json!({
        "kind": err.kind.as_str(),
        "message": err.message,
    });
    if let Some(status) = err.status {
        message["status"] = json!(status);
    }
    if let Some(response) = &err.response {
        message["response"] = response.clone();
    }
    message
}

/// Test the provider's credentials. Never errors.
pub async fn check_connection(provider: &dyn IntegrationProvider, ctx: &IntegrationContext<'_>) -> bool {
    match provider.fetch_connection(ctx).await {
        Ok(()) => true,
        Err(err) => {
            log_api_error(ctx.integration, &err);
            false
        }
    }
}

/// Fetch the provider's mappable fields. Failures are logged and produce an
/// empty set so form editing still works against a broken integration.
pub async fn form_settings(
    provider: &dyn IntegrationProvider,
    ctx: &IntegrationContext<'_>,
) -> IntegrationFormSettings {
    match provider.fetch_form_settings(ctx).await {
        Ok(settings) => settings.sanitized(&ctx.integration.handle),
        Err(err) => {
            log_api_error(ctx.integration, &err);
            IntegrationFormSettings::default()
        }
    }
}

/// Deliver one submission. Failures are logged and kept so the caller can
/// decide whether the attempt is worth repeating.
pub async fn send_payload(
    provider: &dyn IntegrationProvider,
    ctx: &SendContext<'_>,
) -> Result<Delivery, IntegrationError> {
    provider.send_payload(ctx).await.inspect_err(|err| {
        log_api_error(ctx.integration(), err);
    })
}
