use std::sync::Arc;

use serde_json::Value;

use super::client::OutboundRequest;
use super::mapping::MappingContext;
use super::{PaymentRequest, SendContext, WebhookNotification};
use crate::fields::FormField;
use crate::models::{Integration, Payment, Submission};

pub enum HookOutcome<T> {
    Continue(T),
    Abort,
}

/// Extension point invoked at fixed places in the send and payment
/// pipelines. Every method has a pass-through default, so a hook only
/// overrides what it cares about.
pub trait IntegrationHook: Send + Sync {
    /// May rewrite the endpoint, method or payload, or veto the send.
    fn before_send(&self, _ctx: &SendContext<'_>, request: OutboundRequest) -> HookOutcome<OutboundRequest> {
        HookOutcome::Continue(request)
    }

    fn after_send(
        &self,
        _ctx: &SendContext<'_>,
        _request: &OutboundRequest,
        response: Value,
    ) -> HookOutcome<Value> {
        HookOutcome::Continue(response)
    }

    fn modify_field_value(
        &self,
        _ctx: &MappingContext<'_>,
        _external_handle: &str,
        _field: Option<&FormField>,
        value: Value,
    ) -> Value {
        value
    }

    /// Returning false cancels the payment; the submission goes ahead.
    fn before_payment(&self, _req: &PaymentRequest<'_>) -> bool {
        true
    }

    fn modify_payment_payload(&self, _integration: &Integration, _submission: &Submission, payload: Value) -> Value {
        payload
    }

    /// Returning false overrides the outcome to success.
    fn after_payment(&self, _submission: &Submission, _payment: &Payment) -> bool {
        true
    }

    fn before_webhook(&self, _integration: &Integration, _body: &Value) {}

    fn after_webhook(&self, _integration: &Integration, _notification: Option<&WebhookNotification>) {}

    /// Fired once per actual pending to terminal transition, never on replays.
    fn after_payment_reconciled(&self, _payment: &Payment) {}
}

#[derive(Clone, Default)]
pub struct HookChain {
    hooks: Vec<Arc<dyn IntegrationHook>>,
}

impl HookChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, hook: Arc<dyn IntegrationHook>) {
        self.hooks.push(hook);
    }

    pub fn with(mut self, hook: Arc<dyn IntegrationHook>) -> Self {
        self.push(hook);
        self
    }

    pub fn before_send(&self, ctx: &SendContext<'_>, request: OutboundRequest) -> HookOutcome<OutboundRequest> {
        let mut request = request;
        for hook in &self.hooks {
            match hook.before_send(ctx, request) {
                HookOutcome::Continue(next) => request = next,
                HookOutcome::Abort => {
                    tracing::info!(
                        integration = %ctx.integration().handle,
                        submission = %ctx.submission.id,
                        "Sending payload cancelled by hook"
                    );
                    return HookOutcome::Abort;
                }
            }
        }
        HookOutcome::Continue(request)
    }

    pub fn after_send(&self, ctx: &SendContext<'_>, request: &OutboundRequest, response: Value) -> HookOutcome<Value> {
        let mut response = response;
        for hook in &self.hooks {
            match hook.after_send(ctx, request, response) {
                HookOutcome::Continue(next) => response = next,
                HookOutcome::Abort => {
                    tracing::info!(
                        integration = %ctx.integration().handle,
                        submission = %ctx.submission.id,
                        "Payload response marked invalid by hook"
                    );
                    return HookOutcome::Abort;
                }
            }
        }
        HookOutcome::Continue(response)
    }

    pub fn modify_field_value(
        &self,
        ctx: &MappingContext<'_>,
        external_handle: &str,
        field: Option<&FormField>,
        value: Value,
    ) -> Value {
        self.hooks.iter().fold(value, |value, hook| {
            hook.modify_field_value(ctx, external_handle, field, value)
        })
    }

    pub fn before_payment(&self, req: &PaymentRequest<'_>) -> bool {
        self.hooks.iter().all(|hook| hook.before_payment(req))
    }

    pub fn modify_payment_payload(&self, integration: &Integration, submission: &Submission, payload: Value) -> Value {
        self.hooks.iter().fold(payload, |payload, hook| {
            hook.modify_payment_payload(integration, submission, payload)
        })
    }

    pub fn after_payment(&self, submission: &Submission, payment: &Payment) -> bool {
        self.hooks.iter().all(|hook| hook.after_payment(submission, payment))
    }

    pub fn before_webhook(&self, integration: &Integration, body: &Value) {
        for hook in &self.hooks {
            hook.before_webhook(integration, body);
        }
    }

    pub fn after_webhook(&self, integration: &Integration, notification: Option<&WebhookNotification>) {
        for hook in &self.hooks {
            hook.after_webhook(integration, notification);
        }
    }

    pub fn after_payment_reconciled(&self, payment: &Payment) {
        for hook in &self.hooks {
            hook.after_payment_reconciled(payment);
        }
    }
}
