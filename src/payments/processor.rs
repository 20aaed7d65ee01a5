use serde_json::json;

use super::amount;
use crate::db::{NewPayment, StoreResult, Stores};
use crate::fields::{FieldKind, FormField};
use crate::integrations::service::log_api_error;
use crate::integrations::{HookChain, IntegrationContext, PaymentRequest, ProviderRegistry};
use crate::models::{Form, Payment, PaymentStatus, Submission};

#[derive(Debug, Clone)]
pub enum PaymentOutcome {
    /// A before-payment hook vetoed the payment. Nothing was charged or
    /// recorded, and the submission carries on.
    Cancelled,
    /// The gateway accepted the payment. It may still be pending.
    Completed(Payment),
    /// The payment failed. `payment` is the failed record when one could be
    /// written; `message` goes on the field as a validation error.
    Failed {
        payment: Option<Payment>,
        message: String,
    },
}

impl PaymentOutcome {
    pub fn is_success(&self) -> bool {
        !matches!(self, PaymentOutcome::Failed { .. })
    }

    pub fn payment(&self) -> Option<&Payment> {
        match self {
            PaymentOutcome::Cancelled => None,
            PaymentOutcome::Completed(payment) => Some(payment),
            PaymentOutcome::Failed { payment, .. } => payment.as_ref(),
        }
    }
}

/// Runs the synchronous capture for payment fields at submit time.
pub struct PaymentProcessor<'a> {
    pub stores: &'a Stores,
    pub registry: &'a ProviderRegistry,
    pub hooks: &'a HookChain,
    pub http: &'a reqwest::Client,
}

impl PaymentProcessor<'_> {
    pub async fn process(&self, form: &Form, submission: &Submission, field: &FormField) -> StoreResult<PaymentOutcome> {
        let FieldKind::Payment { integration: handle, settings } = &field.kind else {
            return Ok(PaymentOutcome::Cancelled);
        };

        let integration = self
            .stores
            .integrations
            .find_by_handle(handle)
            .await?
            .filter(|i| i.enabled);
        let Some(integration) = integration else {
            tracing::warn!(field = %field.handle, integration = %handle, "Payment integration not found or disabled");
            return Ok(PaymentOutcome::Failed {
                payment: None,
                message: format!("Payment integration “{handle}” is not available."),
            });
        };
        let Some(gateway) = self.registry.gateway(&integration.provider) else {
            tracing::warn!(field = %field.handle, provider = %integration.provider, "Unknown payment provider");
            return Ok(PaymentOutcome::Failed {
                payment: None,
                message: format!("Payment integration “{handle}” is not available."),
            });
        };

        let ctx = IntegrationContext {
            integration: &integration,
            http: self.http,
            tokens: self.stores.tokens.as_ref(),
            hooks: self.hooks,
        };
        let amount = amount::resolve_amount(settings, form, submission);
        let currency = amount::resolve_currency(settings, form, submission);

        let request = PaymentRequest {
            ctx,
            form,
            submission,
            field,
            settings,
            amount,
            currency: currency.clone(),
        };

        if !self.hooks.before_payment(&request) {
            tracing::info!(integration = %integration.handle, submission = %submission.id, "Payment processing cancelled by hook");
            return Ok(PaymentOutcome::Cancelled);
        }

        let base = NewPayment {
            integration_id: integration.id,
            submission_id: submission.id,
            field_handle: field.handle.clone(),
            amount: amount.unwrap_or_default(),
            currency: currency.unwrap_or_default(),
            status: PaymentStatus::Failed,
            reference: None,
            authentication: None,
            response: serde_json::Value::Null,
        };

        match gateway.process_payment(&request).await {
            Ok(result) => {
                let payment = self
                    .stores
                    .payments
                    .create(&NewPayment {
                        status: result.status,
                        reference: result.reference,
                        authentication: result.authentication,
                        response: result.response,
                        ..base
                    })
                    .await?;

                tracing::info!(
                    integration = %integration.handle,
                    submission = %submission.id,
                    payment = %payment.id,
                    status = %payment.status,
                    "Payment processed"
                );

                if !self.hooks.after_payment(submission, &payment) {
                    tracing::info!(integration = %integration.handle, "Payment processing marked as invalid by hook");
                }
                Ok(PaymentOutcome::Completed(payment))
            }
            Err(err) => {
                log_api_error(&integration, &err);

                let response = err
                    .response
                    .as_ref()
                    .and_then(|r| r.get("customerMessage"))
                    .filter(|m| !m.is_null())
                    .cloned()
                    .unwrap_or_else(|| json!({ "message": err.message }));

                let payment = self
                    .stores
                    .payments
                    .create(&NewPayment {
                        status: PaymentStatus::Failed,
                        response,
                        ..base
                    })
                    .await?;

                Ok(PaymentOutcome::Failed {
                    payment: Some(payment),
                    message: err.message,
                })
            }
        }
    }
}
