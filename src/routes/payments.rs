use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::{Value, json};
use uuid::Uuid;

use crate::error::AppError;
use crate::integrations::service::log_api_error;
use crate::integrations::{ErrorKind, IntegrationError, PaymentGateway};
use crate::models::{AuthenticationState, Integration, PaymentStatus, SubmissionStatus};
use crate::payments::{ReconcileOutcome, reconcile, three_ds};
use crate::state::SharedState;
use crate::submission::pipeline;

/// HTTP error for a failed webhook or callback. Payment state is untouched.
fn gateway_error(integration: &Integration, err: IntegrationError) -> AppError {
    log_api_error(integration, &err);
    match err.kind {
        ErrorKind::Config | ErrorKind::RemoteRejected => AppError::BadRequest(err.message),
        ErrorKind::Malicious => AppError::Unauthorized(err.message),
        ErrorKind::Transient => AppError::Internal(err.message),
    }
}

async fn load_gateway(
    state: &SharedState,
    handle: &str,
) -> Result<(Integration, std::sync::Arc<dyn PaymentGateway>), AppError> {
    let integration = state
        .stores
        .integrations
        .find_by_handle(handle)
        .await?
        .filter(|i| i.enabled)
        .ok_or_else(|| AppError::NotFound("Integration not found".to_string()))?;

    let gateway = state
        .registry
        .gateway(&integration.provider)
        .cloned()
        .ok_or_else(|| AppError::BadRequest("Integration is not a payment integration.".to_string()))?;

    Ok((integration, gateway))
}

fn outcome_status(outcome: &ReconcileOutcome) -> &'static str {
    match outcome {
        ReconcileOutcome::Unknown => "ignored",
        ReconcileOutcome::AlreadyFinal(_) => "unchanged",
        ReconcileOutcome::StillPending(_) => "pending",
        ReconcileOutcome::Transitioned(_) => "processed",
    }
}

/// Once every payment on a submission has succeeded, the submission was
/// only waiting on them: complete it and send it on.
async fn finish_submission(state: &SharedState, submission_id: Uuid) -> Result<(), AppError> {
    let Some(submission) = state.stores.submissions.find_by_id(submission_id).await? else {
        return Ok(());
    };
    if submission.status != SubmissionStatus::Incomplete.as_str() {
        return Ok(());
    }

    let payments = state.stores.payments.list_for_submission(submission_id).await?;
    if payments.iter().any(|p| p.status() != Some(PaymentStatus::Success)) {
        return Ok(());
    }

    let Some(form) = state.stores.forms.find_by_id(submission.form_id).await? else {
        return Ok(());
    };

    pipeline::complete(state, &form, submission).await?;
    Ok(())
}

pub async fn webhook(
    State(state): State<SharedState>,
    Path(handle): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, AppError> {
    let (integration, gateway) = load_gateway(&state, &handle).await?;

    if !gateway.supports_webhooks() {
        return Err(AppError::BadRequest("Integration does not support webhooks.".to_string()));
    }

    gateway
        .verify_webhook(&integration, &headers, &body)
        .map_err(|e| gateway_error(&integration, e))?;

    let payload: Value =
        serde_json::from_slice(&body).map_err(|e| AppError::BadRequest(format!("Invalid JSON: {e}")))?;

    state.hooks.before_webhook(&integration, &payload);

    let notification = gateway
        .parse_webhook(&payload)
        .map_err(|e| gateway_error(&integration, e))?;

    let Some(notification) = notification else {
        state.hooks.after_webhook(&integration, None);
        return Ok(Json(json!({ "status": "ignored" })));
    };

    let outcome = reconcile(state.stores.payments.as_ref(), &state.hooks, &integration, &notification).await?;

    if let ReconcileOutcome::Transitioned(payment) = &outcome {
        if payment.status() == Some(PaymentStatus::Success) {
            finish_submission(&state, payment.submission_id).await?;
        }
    }

    state.hooks.after_webhook(&integration, Some(&notification));

    Ok(Json(json!({ "status": outcome_status(&outcome) })))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallbackRequest {
    pub payment_id: Uuid,
    #[serde(flatten)]
    pub params: Value,
}

/// Second leg of a 3-D Secure challenge. Only a payment waiting on
/// authentication is completed, and only by the first callback to claim it.
pub async fn callback(
    State(state): State<SharedState>,
    Path(handle): Path<String>,
    Json(req): Json<CallbackRequest>,
) -> Result<Json<Value>, AppError> {
    let (integration, gateway) = load_gateway(&state, &handle).await?;
    let payments = state.stores.payments.as_ref();

    let payment = payments
        .find_by_id(req.payment_id)
        .await?
        .filter(|p| p.integration_id == integration.id)
        .ok_or_else(|| AppError::NotFound("Payment not found".to_string()))?;

    let claimed = payment.authentication() == Some(AuthenticationState::Required)
        && payments
            .swap_authentication(payment.id, AuthenticationState::Required, AuthenticationState::Verifying)
            .await?;

    if !claimed {
        let current = payments.find_by_id(payment.id).await?.unwrap_or(payment);
        return Ok(Json(json!({
            "status": "unchanged",
            "payment": current,
        })));
    }

    let ctx = state.dispatcher.context(&integration);
    let outcome = match gateway.process_callback(&ctx, &payment, &req.params).await {
        Ok(result) => {
            reconcile::apply(
                payments,
                &state.hooks,
                payment,
                result.status,
                result.reference.as_deref(),
                &result.response,
                result.authentication,
            )
            .await?
        }
        Err(err) if err.kind == ErrorKind::Transient => {
            // Nothing was charged; hand the challenge back for another try.
            payments
                .swap_authentication(payment.id, AuthenticationState::Verifying, AuthenticationState::Required)
                .await?;
            return Err(gateway_error(&integration, err));
        }
        Err(err) => {
            log_api_error(&integration, &err);
            let response = err.response.clone().unwrap_or_else(|| json!({ "message": err.message }));
            reconcile::apply(
                payments,
                &state.hooks,
                payment,
                PaymentStatus::Failed,
                None,
                &response,
                Some(AuthenticationState::Failed),
            )
            .await?
        }
    };

    let payment = match &outcome {
        ReconcileOutcome::Unknown => None,
        ReconcileOutcome::AlreadyFinal(p) | ReconcileOutcome::StillPending(p) | ReconcileOutcome::Transitioned(p) => {
            Some(p.clone())
        }
    };

    if let Some(payment) = &payment {
        if outcome.transitioned() && payment.status() == Some(PaymentStatus::Success) {
            finish_submission(&state, payment.submission_id).await?;
        }
    }

    Ok(Json(json!({
        "status": outcome_status(&outcome),
        "payment": payment,
    })))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreeDsAuthRequest {
    #[serde(default, alias = "quickstreamTokenId")]
    pub single_use_token_id: String,
    #[serde(default)]
    pub params: Value,
    #[serde(default)]
    pub live_mode: bool,
}

/// Anonymous: called by the payment frame in the visitor's browser.
pub async fn three_ds_auth(
    State(state): State<SharedState>,
    Path(handle): Path<String>,
    Json(req): Json<ThreeDsAuthRequest>,
) -> Result<Response, AppError> {
    let (integration, gateway) = load_gateway(&state, &handle).await?;

    let ctx = state.dispatcher.context(&integration);
    let result = gateway
        .request_3ds_auth(&ctx, &req.single_use_token_id, &req.params, req.live_mode)
        .await;

    let status = StatusCode::from_u16(three_ds::http_status(&result)).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    Ok((status, Json(result)).into_response())
}
