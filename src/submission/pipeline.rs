use std::net::IpAddr;

use axum::http::HeaderMap;
use serde::Serialize;
use serde_json::{Value, json};
use uuid::Uuid;

use crate::db::{NewSubmission, StoreError};
use crate::error::AppError;
use crate::integrations::CaptchaRequest;
use crate::models::{AuthenticationState, Form, Payment, Submission, SubmissionStatus};
use crate::payments::{PaymentOutcome, PaymentProcessor};
use crate::state::SharedState;

use super::fields::{self, FieldErrors};
use super::metadata::{self, RequestMeta};

const DEFAULT_SITE: &str = "default";

#[derive(Debug, Clone, Serialize)]
pub struct PaymentSummary {
    pub field: String,
    pub id: Uuid,
    pub status: String,
    pub authentication: Option<String>,
    pub reference: Option<String>,
}

impl PaymentSummary {
    fn new(payment: &Payment) -> Self {
        Self {
            field: payment.field_handle.clone(),
            id: payment.id,
            status: payment.status.clone(),
            authentication: payment.authentication.clone(),
            reference: payment.reference.clone(),
        }
    }
}

#[derive(Debug)]
pub enum PipelineOutcome {
    Accepted {
        submission_id: Uuid,
        redirect_url: Option<String>,
        payments: Vec<PaymentSummary>,
    },
    /// A payment needs a 3-D Secure challenge before the submission can
    /// complete. The callback endpoint finishes the job.
    AwaitingAuthentication {
        submission_id: Uuid,
        payments: Vec<PaymentSummary>,
    },
    /// Caught by a captcha. Stored for audit, reported to the client as a
    /// normal success.
    Spam { redirect_url: Option<String> },
}

#[derive(Debug)]
pub enum PipelineError {
    RateLimited(u64),
    Invalid(FieldErrors),
    Store(StoreError),
}

impl From<StoreError> for PipelineError {
    fn from(err: StoreError) -> Self {
        PipelineError::Store(err)
    }
}

impl From<PipelineError> for AppError {
    fn from(err: PipelineError) -> Self {
        match err {
            PipelineError::RateLimited(retry_after) => {
                AppError::RateLimited(format!("Rate limited. Retry after {retry_after}s"))
            }
            PipelineError::Invalid(errors) => AppError::UnprocessableEntity(json!(errors)),
            PipelineError::Store(err) => err.into(),
        }
    }
}

pub async fn run(
    state: &SharedState,
    form: &Form,
    headers: &HeaderMap,
    peer_addr: Option<IpAddr>,
    raw: Value,
) -> Result<PipelineOutcome, PipelineError> {
    let meta = metadata::extract(headers, peer_addr, &state.config.trusted_proxies);

    if let Err(retry_after) = state.submission_limiter.check(
        form.id,
        meta.ip,
        form.settings.rate_limit,
        form.settings.rate_limit_window_secs,
    ) {
        return Err(PipelineError::RateLimited(retry_after));
    }

    let values = fields::known_values(form, &raw);
    let errors = fields::validate_required(form, &values);
    if !errors.is_empty() {
        return Err(PipelineError::Invalid(errors));
    }

    let mut new_submission = NewSubmission {
        form_id: form.id,
        status: SubmissionStatus::Incomplete,
        values,
        site_handle: DEFAULT_SITE.to_string(),
        language: form.settings.default_language.clone(),
        spam_reason: None,
        metadata: meta.to_json(),
    };

    if let Some(reason) = check_captchas(state, form, &raw, &meta).await? {
        new_submission.status = SubmissionStatus::Spam;
        new_submission.spam_reason = Some(reason);
        let submission = state.stores.submissions.create(&new_submission).await?;
        tracing::info!(
            form = %form.handle,
            submission = %submission.id,
            reason = submission.spam_reason.as_deref().unwrap_or_default(),
            "Submission marked as spam"
        );
        return Ok(PipelineOutcome::Spam {
            redirect_url: form.settings.redirect_url.clone(),
        });
    }

    let submission = state.stores.submissions.create(&new_submission).await?;

    let processor = PaymentProcessor {
        stores: &state.stores,
        registry: &state.registry,
        hooks: &state.hooks,
        http: &state.http,
    };

    let mut payments = Vec::new();
    let mut awaiting_authentication = false;

    for field in form.payment_fields() {
        match processor.process(form, &submission, field).await? {
            PaymentOutcome::Cancelled => {}
            PaymentOutcome::Completed(payment) => {
                awaiting_authentication |= payment.authentication() == Some(AuthenticationState::Required);
                payments.push(PaymentSummary::new(&payment));
            }
            PaymentOutcome::Failed { message, .. } => {
                // Stop here: later payment fields must not be charged.
                let mut errors = FieldErrors::new();
                errors.insert(field.handle.clone(), vec![message]);
                return Err(PipelineError::Invalid(errors));
            }
        }
    }

    if awaiting_authentication {
        return Ok(PipelineOutcome::AwaitingAuthentication {
            submission_id: submission.id,
            payments,
        });
    }

    let submission_id = submission.id;
    complete(state, form, submission).await?;

    Ok(PipelineOutcome::Accepted {
        submission_id,
        redirect_url: form.settings.redirect_url.clone(),
        payments,
    })
}

/// Mark the submission complete and hand it to its integrations.
pub async fn complete(state: &SharedState, form: &Form, mut submission: Submission) -> Result<(), StoreError> {
    state
        .stores
        .submissions
        .set_status(submission.id, SubmissionStatus::Complete, None)
        .await?;
    submission.status = SubmissionStatus::Complete.as_str().to_string();

    tracing::info!(form = %form.handle, submission = %submission.id, "Submission complete");

    for report in state.dispatcher.trigger_integrations(form, &submission).await? {
        tracing::debug!(integration = %report.integration, dispatch = ?report.dispatch, "Integration dispatched");
    }

    Ok(())
}

/// Run every captcha attached to the form. Returns the spam reason of the
/// first one that rejects the submission.
async fn check_captchas(
    state: &SharedState,
    form: &Form,
    raw: &Value,
    meta: &RequestMeta,
) -> Result<Option<String>, StoreError> {
    let ip = meta.ip.to_string();

    for form_integration in state.stores.integrations.list_for_form(form.id).await? {
        if !form_integration.enabled {
            continue;
        }
        let Some(integration) = state
            .stores
            .integrations
            .find_by_id(form_integration.integration_id)
            .await?
            .filter(|i| i.enabled)
        else {
            continue;
        };
        let Some(captcha) = state.registry.captcha(&integration.provider) else {
            continue;
        };

        let request = CaptchaRequest {
            integration: &integration,
            http: &state.http,
            form,
            values: raw,
            ip: Some(&ip),
            user_agent: Some(&meta.user_agent).filter(|ua| !ua.is_empty()).map(|ua| ua.as_str()),
        };

        let verdict = captcha.validate_submission(&request).await;
        if !verdict.passed {
            let reason = verdict
                .spam_reason
                .unwrap_or_else(|| format!("Failed {} validation.", integration.name));
            return Ok(Some(reason));
        }
    }

    Ok(None)
}
