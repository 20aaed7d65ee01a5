pub mod job;

use std::sync::Arc;

use serde_json::Value;
use uuid::Uuid;

use crate::db::{StoreResult, Stores};
use crate::integrations::{
    Delivery, HookChain, IntegrationContext, IntegrationError, IntegrationProvider,
    IntegrationResponse, ProviderRegistry, SendContext, service,
};
use crate::models::{Form, FormIntegration, Integration, Submission};
use crate::site::{self, SiteContext};

pub use job::{JobError, TriggerIntegration};

/// What happened to one integration when a submission was dispatched.
#[derive(Debug, Clone, PartialEq)]
pub enum Dispatch {
    Queued(Uuid),
    Sent(IntegrationResponse),
    /// Could not be queued or sent at all, e.g. a storage failure.
    Failed(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct DispatchReport {
    pub integration: String,
    pub dispatch: Dispatch,
}

/// Sends submissions to their integrations, inline or through the job queue.
pub struct Dispatcher {
    pub stores: Stores,
    pub registry: Arc<ProviderRegistry>,
    pub hooks: HookChain,
    pub http: reqwest::Client,
}

impl Dispatcher {
    pub fn new(stores: Stores, registry: Arc<ProviderRegistry>, hooks: HookChain, http: reqwest::Client) -> Self {
        Self {
            stores,
            registry,
            hooks,
            http,
        }
    }

    pub fn context<'a>(&'a self, integration: &'a Integration) -> IntegrationContext<'a> {
        IntegrationContext {
            integration,
            http: &self.http,
            tokens: self.stores.tokens.as_ref(),
            hooks: &self.hooks,
        }
    }

    /// Payload integrations attached to `form` and enabled on both sides.
    pub async fn payload_integrations(&self, form: &Form) -> StoreResult<Vec<(Integration, FormIntegration)>> {
        let mut attached = Vec::new();

        for form_integration in self.stores.integrations.list_for_form(form.id).await? {
            if !form_integration.enabled {
                continue;
            }
            let Some(integration) = self.stores.integrations.find_by_id(form_integration.integration_id).await? else {
                continue;
            };
            if !integration.enabled {
                continue;
            }
            match self.registry.get(&integration.provider) {
                Some(provider) if provider.supports_payload_sending() => {
                    attached.push((integration, form_integration));
                }
                Some(_) => {}
                None => tracing::warn!(
                    integration = %integration.handle,
                    provider = %integration.provider,
                    "Skipping integration with unknown provider"
                ),
            }
        }

        Ok(attached)
    }

    /// Queue or send every payload integration for a completed submission.
    /// One integration failing never stops the others.
    pub async fn trigger_integrations(&self, form: &Form, submission: &Submission) -> StoreResult<Vec<DispatchReport>> {
        let attached = self.payload_integrations(form).await?;
        let mut reports = Vec::with_capacity(attached.len());

        for (integration, form_integration) in attached {
            let dispatch = if form.settings.use_queue_for_integrations {
                match self.stores.jobs.enqueue(submission.id, integration.uid).await {
                    Ok(job) => {
                        tracing::debug!(
                            job = %job.id,
                            integration = %integration.handle,
                            submission = %submission.id,
                            "Queued integration"
                        );
                        Dispatch::Queued(job.id)
                    }
                    Err(e) => {
                        tracing::error!(integration = %integration.handle, "Failed to queue integration: {e}");
                        Dispatch::Failed(e.to_string())
                    }
                }
            } else {
                let response = site::scope(
                    SiteContext::for_submission(submission),
                    self.send_integration_payload(form, submission, &integration, &form_integration),
                )
                .await;
                Dispatch::Sent(response)
            };

            reports.push(DispatchReport {
                integration: integration.handle.clone(),
                dispatch,
            });
        }

        Ok(reports)
    }

    /// Deliver one submission to one integration and record the attempt in
    /// the integration log. Never errors.
    pub async fn send_integration_payload(
        &self,
        form: &Form,
        submission: &Submission,
        integration: &Integration,
        form_integration: &FormIntegration,
    ) -> IntegrationResponse {
        let Some(provider) = self.registry.get(&integration.provider) else {
            let response = IntegrationResponse::from_error(&IntegrationError::config(format!(
                "Unknown provider “{}”.",
                integration.provider
            )));
            self.log_attempt(integration, submission, &response, None).await;
            return response;
        };

        let ctx = SendContext {
            ctx: self.context(integration),
            form,
            submission,
            form_integration,
        };

        let (response, body) = deliver(provider.as_ref(), &ctx).await;
        self.log_attempt(integration, submission, &response, body.as_ref()).await;
        response
    }

    async fn log_attempt(
        &self,
        integration: &Integration,
        submission: &Submission,
        response: &IntegrationResponse,
        body: Option<&Value>,
    ) {
        let logged = if response.success { body } else { Some(&response.message) };
        if let Err(e) = self
            .stores
            .logs
            .create(integration.id, submission.id, response.success, logged)
            .await
        {
            tracing::warn!(integration = %integration.handle, "Failed to write integration log: {e}");
        }

        if response.success {
            tracing::info!(
                integration = %integration.handle,
                submission = %submission.id,
                "Integration payload sent"
            );
        }
    }
}

async fn deliver(provider: &dyn IntegrationProvider, ctx: &SendContext<'_>) -> (IntegrationResponse, Option<Value>) {
    match service::send_payload(provider, ctx).await {
        Ok(Delivery::Sent(body)) => (IntegrationResponse::ok(), Some(body)),
        Ok(Delivery::Skipped) => (IntegrationResponse::ok(), None),
        Err(err) => (IntegrationResponse::from_error(&err), None),
    }
}
