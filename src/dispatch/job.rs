use serde_json::Value;
use uuid::Uuid;

use super::Dispatcher;
use crate::integrations::IntegrationResponse;
use crate::models::IntegrationJob;
use crate::site::{self, SiteContext};

#[derive(Debug, Clone, PartialEq)]
pub struct JobError {
    pub message: String,
    /// False when running the job again would fail the same way.
    pub retryable: bool,
}

impl JobError {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: true,
        }
    }

    fn permanent(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: false,
        }
    }

    /// Error for a failed delivery, carrying the provider's message when
    /// there is one.
    pub fn from_response(response: &IntegrationResponse) -> Self {
        let message = match &response.message {
            Value::Null => "Failed to trigger integration. Check the log files.".to_string(),
            Value::String(s) if s.is_empty() => "Failed to trigger integration. Check the log files.".to_string(),
            message => format!("Failed to trigger integration: {message}."),
        };
        Self {
            message,
            retryable: response.is_retryable(),
        }
    }
}

impl std::fmt::Display for JobError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for JobError {}

/// Queued delivery of one submission to one integration. Holds ids only;
/// everything is reloaded when the job runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TriggerIntegration {
    pub job_id: Option<Uuid>,
    pub submission_id: Uuid,
    pub integration_uid: Uuid,
}

impl TriggerIntegration {
    pub fn from_job(job: &IntegrationJob) -> Self {
        Self {
            job_id: Some(job.id),
            submission_id: job.submission_id,
            integration_uid: job.integration_uid,
        }
    }

    pub fn description(&self) -> &'static str {
        "Triggering form integration."
    }

    pub async fn execute(&self, dispatcher: &Dispatcher) -> Result<(), JobError> {
        let stores = &dispatcher.stores;

        self.progress(dispatcher, 0.25).await;

        // Any status: spam and incomplete submissions can still be resent by hand.
        let submission = stores
            .submissions
            .find_by_id(self.submission_id)
            .await
            .map_err(|e| JobError::new(format!("Failed to load submission: {e}")))?
            .ok_or_else(|| JobError::permanent(format!("Submission {} not found.", self.submission_id)))?;

        let form = stores
            .forms
            .find_by_id(submission.form_id)
            .await
            .map_err(|e| JobError::new(format!("Failed to load form: {e}")))?
            .ok_or_else(|| JobError::permanent(format!("Form {} not found.", submission.form_id)))?;

        self.progress(dispatcher, 0.5).await;

        let integration = stores
            .integrations
            .find_by_uid(self.integration_uid)
            .await
            .map_err(|e| JobError::new(format!("Failed to load integration: {e}")))?
            .ok_or_else(|| JobError::permanent(format!("Integration {} not found.", self.integration_uid)))?;

        let form_integration = stores
            .integrations
            .find_form_integration(form.id, integration.id)
            .await
            .map_err(|e| JobError::new(format!("Failed to load form integration: {e}")))?;

        let Some(form_integration) = form_integration.filter(|fi| fi.enabled && integration.enabled) else {
            tracing::info!(
                integration = %integration.handle,
                submission = %submission.id,
                "Integration no longer enabled for form, skipping"
            );
            self.progress(dispatcher, 1.0).await;
            return Ok(());
        };

        let response = site::scope(SiteContext::for_submission(&submission), async {
            self.progress(dispatcher, 0.75).await;
            dispatcher
                .send_integration_payload(&form, &submission, &integration, &form_integration)
                .await
        })
        .await;

        if !response.success {
            return Err(JobError::from_response(&response));
        }

        self.progress(dispatcher, 1.0).await;
        Ok(())
    }

    async fn progress(&self, dispatcher: &Dispatcher, progress: f64) {
        let Some(job_id) = self.job_id else {
            return;
        };
        tracing::debug!(job = %job_id, progress, "{}", self.description());
        if let Err(e) = dispatcher.stores.jobs.set_progress(job_id, progress).await {
            tracing::debug!(job = %job_id, "Failed to record job progress: {e}");
        }
    }
}
