use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use super::{NewPayment, PaymentRepository, PgStore, StoreResult};
use crate::models::{AuthenticationState, Payment, PaymentStatus};

pub async fn create(pool: &PgPool, payment: &NewPayment) -> Result<Payment, sqlx::Error> {
    sqlx::query_as::<_, Payment>(
        "INSERT INTO payments
             (id, integration_id, submission_id, field_handle, amount, currency, status, reference, authentication, response)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) RETURNING *",
    )
    .bind(Uuid::now_v7())
    .bind(payment.integration_id)
    .bind(payment.submission_id)
    .bind(&payment.field_handle)
    .bind(payment.amount)
    .bind(&payment.currency)
    .bind(payment.status.as_str())
    .bind(&payment.reference)
    .bind(payment.authentication.map(|a| a.as_str()))
    .bind(&payment.response)
    .fetch_one(pool)
    .await
}

pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Payment>, sqlx::Error> {
    sqlx::query_as::<_, Payment>("SELECT * FROM payments WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
}

pub async fn find_by_reference(
    pool: &PgPool,
    integration_id: Uuid,
    reference: &str,
) -> Result<Option<Payment>, sqlx::Error> {
    sqlx::query_as::<_, Payment>(
        "SELECT * FROM payments WHERE integration_id = $1 AND reference = $2
         ORDER BY created_at DESC LIMIT 1",
    )
    .bind(integration_id)
    .bind(reference)
    .fetch_optional(pool)
    .await
}

pub async fn list_for_submission(pool: &PgPool, submission_id: Uuid) -> Result<Vec<Payment>, sqlx::Error> {
    sqlx::query_as::<_, Payment>(
        "SELECT * FROM payments WHERE submission_id = $1 ORDER BY created_at ASC",
    )
    .bind(submission_id)
    .fetch_all(pool)
    .await
}

/// Compare-and-set on `status = 'pending'`: concurrent or replayed
/// notifications can only win once.
pub async fn transition(
    pool: &PgPool,
    id: Uuid,
    to: PaymentStatus,
    reference: Option<&str>,
    response: &serde_json::Value,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE payments
         SET status = $2, reference = COALESCE($3, reference), response = $4, updated_at = now()
         WHERE id = $1 AND status = 'pending'",
    )
    .bind(id)
    .bind(to.as_str())
    .bind(reference)
    .bind(response)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() == 1)
}

pub async fn set_reference(pool: &PgPool, id: Uuid, reference: &str) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE payments SET reference = $2, updated_at = now()
         WHERE id = $1 AND status = 'pending'",
    )
    .bind(id)
    .bind(reference)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn set_authentication(
    pool: &PgPool,
    id: Uuid,
    state: AuthenticationState,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE payments SET authentication = $2, updated_at = now() WHERE id = $1")
        .bind(id)
        .bind(state.as_str())
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn swap_authentication(
    pool: &PgPool,
    id: Uuid,
    from: AuthenticationState,
    to: AuthenticationState,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE payments SET authentication = $3, updated_at = now()
         WHERE id = $1 AND status = 'pending' AND authentication = $2",
    )
    .bind(id)
    .bind(from.as_str())
    .bind(to.as_str())
    .execute(pool)
    .await?;
    Ok(result.rows_affected() == 1)
}

#[async_trait]
impl PaymentRepository for PgStore {
    async fn create(&self, payment: &NewPayment) -> StoreResult<Payment> {
        Ok(create(&self.pool, payment).await?)
    }

    async fn find_by_id(&self, id: Uuid) -> StoreResult<Option<Payment>> {
        Ok(find_by_id(&self.pool, id).await?)
    }

    async fn find_by_reference(
        &self,
        integration_id: Uuid,
        reference: &str,
    ) -> StoreResult<Option<Payment>> {
        Ok(find_by_reference(&self.pool, integration_id, reference).await?)
    }

    async fn list_for_submission(&self, submission_id: Uuid) -> StoreResult<Vec<Payment>> {
        Ok(list_for_submission(&self.pool, submission_id).await?)
    }

    async fn transition(
        &self,
        id: Uuid,
        to: PaymentStatus,
        reference: Option<&str>,
        response: &serde_json::Value,
    ) -> StoreResult<bool> {
        if !PaymentStatus::Pending.can_transition(to) {
            return Ok(false);
        }
        Ok(transition(&self.pool, id, to, reference, response).await?)
    }

    async fn set_reference(&self, id: Uuid, reference: &str) -> StoreResult<()> {
        Ok(set_reference(&self.pool, id, reference).await?)
    }

    async fn set_authentication(&self, id: Uuid, state: AuthenticationState) -> StoreResult<()> {
        Ok(set_authentication(&self.pool, id, state).await?)
    }

    async fn swap_authentication(
        &self,
        id: Uuid,
        from: AuthenticationState,
        to: AuthenticationState,
    ) -> StoreResult<bool> {
        Ok(swap_authentication(&self.pool, id, from, to).await?)
    }
}
