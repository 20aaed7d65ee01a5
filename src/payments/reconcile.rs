use serde_json::Value;

use crate::db::{PaymentRepository, StoreResult};
use crate::integrations::{HookChain, WebhookNotification};
use crate::models::{AuthenticationState, Integration, Payment, PaymentStatus};

#[derive(Debug, Clone)]
pub enum ReconcileOutcome {
    /// No payment carries this reference. Acknowledged so the provider stops
    /// redelivering.
    Unknown,
    /// The payment was already final; nothing changed.
    AlreadyFinal(Payment),
    /// The notification still reports the payment as pending.
    StillPending(Payment),
    Transitioned(Payment),
}

impl ReconcileOutcome {
    pub fn transitioned(&self) -> bool {
        matches!(self, ReconcileOutcome::Transitioned(_))
    }
}

/// Apply a provider notification to the payment it references.
pub async fn reconcile(
    payments: &dyn PaymentRepository,
    hooks: &HookChain,
    integration: &Integration,
    notification: &WebhookNotification,
) -> StoreResult<ReconcileOutcome> {
    let Some(payment) = payments
        .find_by_reference(integration.id, &notification.reference)
        .await?
    else {
        tracing::info!(
            integration = %integration.handle,
            reference = %notification.reference,
            "Ignoring notification for unknown payment"
        );
        return Ok(ReconcileOutcome::Unknown);
    };

    apply(payments, hooks, payment, notification.status, None, &notification.response, None).await
}

/// Move `payment` to `to` if it is still pending. The underlying update is a
/// compare-and-set, so concurrent or replayed notifications transition the
/// payment exactly once and fire fulfillment hooks exactly once. A new
/// provider reference is stored even when the payment stays pending, so
/// later notifications can find it.
pub async fn apply(
    payments: &dyn PaymentRepository,
    hooks: &HookChain,
    payment: Payment,
    to: PaymentStatus,
    reference: Option<&str>,
    response: &Value,
    authentication: Option<AuthenticationState>,
) -> StoreResult<ReconcileOutcome> {
    if payment.status().is_none_or(|s| s.is_terminal()) {
        tracing::debug!(payment = %payment.id, status = %payment.status, "Payment already final");
        return Ok(ReconcileOutcome::AlreadyFinal(payment));
    }

    if let Some(state) = authentication {
        payments.set_authentication(payment.id, state).await?;
    }

    if to == PaymentStatus::Pending {
        if let Some(reference) = reference {
            payments.set_reference(payment.id, reference).await?;
        }
        let current = payments.find_by_id(payment.id).await?.unwrap_or(payment);
        return Ok(ReconcileOutcome::StillPending(current));
    }

    let moved = payments.transition(payment.id, to, reference, response).await?;
    let current = payments.find_by_id(payment.id).await?.unwrap_or(payment);

    if !moved {
        return Ok(ReconcileOutcome::AlreadyFinal(current));
    }

    tracing::info!(payment = %current.id, status = %current.status, "Payment reconciled");
    hooks.after_payment_reconciled(&current);
    Ok(ReconcileOutcome::Transitioned(current))
}
