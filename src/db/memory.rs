//! In-process implementation of every store, for embedding and tests.
//! Semantics match the Postgres queries, including the pending-only payment
//! transition and the job queue's backoff.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{Duration, Utc};
use sqlx::types::Json;
use uuid::Uuid;

use super::{
    FormIntegrationInput, FormStore, IntegrationLogStore, IntegrationStore, JobQueue, NewForm,
    NewIntegration, NewPayment, NewSubmission, NewToken, PaymentRepository, StoreError,
    StoreResult, SubmissionStore, TokenStore,
};
use crate::models::{
    AuthenticationState, Form, FormIntegration, Integration, IntegrationJob, IntegrationLog,
    OauthToken, Payment, PaymentStatus, Submission, SubmissionStatus,
};

#[derive(Default)]
struct MemoryData {
    forms: Vec<Form>,
    integrations: Vec<Integration>,
    form_integrations: Vec<FormIntegration>,
    submissions: HashMap<Uuid, Submission>,
    payments: Vec<Payment>,
    tokens: HashMap<Uuid, OauthToken>,
    jobs: Vec<IntegrationJob>,
    logs: Vec<IntegrationLog>,
}

#[derive(Default)]
pub struct MemoryStore {
    data: Mutex<MemoryData>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryData> {
        // A poisoned lock only means another test thread panicked mid-write.
        self.data.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn not_found(what: &str, id: Uuid) -> StoreError {
    StoreError::NotFound(format!("{what} {id}"))
}

#[async_trait]
impl FormStore for MemoryStore {
    async fn find_by_id(&self, id: Uuid) -> StoreResult<Option<Form>> {
        Ok(self.lock().forms.iter().find(|f| f.id == id).cloned())
    }

    async fn find_by_handle(&self, handle: &str) -> StoreResult<Option<Form>> {
        Ok(self.lock().forms.iter().find(|f| f.handle == handle).cloned())
    }

    async fn list(&self) -> StoreResult<Vec<Form>> {
        Ok(self.lock().forms.clone())
    }

    async fn create(&self, form: &NewForm) -> StoreResult<Form> {
        let mut data = self.lock();
        if data.forms.iter().any(|f| f.handle == form.handle) {
            return Err(StoreError::Conflict(format!("form handle {} exists", form.handle)));
        }
        let now = Utc::now();
        let created = Form {
            id: Uuid::now_v7(),
            handle: form.handle.clone(),
            title: form.title.clone(),
            fields: Json(form.fields.clone()),
            settings: Json(form.settings.clone()),
            created_at: now,
            updated_at: now,
        };
        data.forms.push(created.clone());
        Ok(created)
    }

    async fn update(&self, id: Uuid, form: &NewForm) -> StoreResult<Form> {
        let mut data = self.lock();
        let existing = data
            .forms
            .iter_mut()
            .find(|f| f.id == id)
            .ok_or_else(|| not_found("form", id))?;
        existing.handle = form.handle.clone();
        existing.title = form.title.clone();
        existing.fields = Json(form.fields.clone());
        existing.settings = Json(form.settings.clone());
        existing.updated_at = Utc::now();
        Ok(existing.clone())
    }

    async fn delete(&self, id: Uuid) -> StoreResult<()> {
        let mut data = self.lock();
        data.forms.retain(|f| f.id != id);
        data.form_integrations.retain(|fi| fi.form_id != id);
        Ok(())
    }
}

#[async_trait]
impl IntegrationStore for MemoryStore {
    async fn find_by_id(&self, id: Uuid) -> StoreResult<Option<Integration>> {
        Ok(self.lock().integrations.iter().find(|i| i.id == id).cloned())
    }

    async fn find_by_uid(&self, uid: Uuid) -> StoreResult<Option<Integration>> {
        Ok(self.lock().integrations.iter().find(|i| i.uid == uid).cloned())
    }

    async fn find_by_handle(&self, handle: &str) -> StoreResult<Option<Integration>> {
        Ok(self
            .lock()
            .integrations
            .iter()
            .find(|i| i.handle == handle)
            .cloned())
    }

    async fn list(&self) -> StoreResult<Vec<Integration>> {
        let mut list = self.lock().integrations.clone();
        list.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(list)
    }

    async fn create(&self, integration: &NewIntegration) -> StoreResult<Integration> {
        let mut data = self.lock();
        if data.integrations.iter().any(|i| i.handle == integration.handle) {
            return Err(StoreError::Conflict(format!(
                "integration handle {} exists",
                integration.handle
            )));
        }
        let now = Utc::now();
        let created = Integration {
            id: Uuid::now_v7(),
            uid: Uuid::now_v7(),
            handle: integration.handle.clone(),
            name: integration.name.clone(),
            provider: integration.provider.clone(),
            settings: integration.settings.clone(),
            token_id: None,
            enabled: integration.enabled,
            cache: None,
            created_at: now,
            updated_at: now,
        };
        data.integrations.push(created.clone());
        Ok(created)
    }

    async fn update(&self, id: Uuid, integration: &NewIntegration) -> StoreResult<Integration> {
        let mut data = self.lock();
        let existing = data
            .integrations
            .iter_mut()
            .find(|i| i.id == id)
            .ok_or_else(|| not_found("integration", id))?;
        existing.handle = integration.handle.clone();
        existing.name = integration.name.clone();
        existing.provider = integration.provider.clone();
        existing.settings = integration.settings.clone();
        existing.enabled = integration.enabled;
        existing.cache = None;
        existing.updated_at = Utc::now();
        Ok(existing.clone())
    }

    async fn delete(&self, id: Uuid) -> StoreResult<()> {
        let mut data = self.lock();
        data.integrations.retain(|i| i.id != id);
        data.form_integrations.retain(|fi| fi.integration_id != id);
        Ok(())
    }

    async fn save_cache(&self, id: Uuid, cache: &serde_json::Value) -> StoreResult<()> {
        let mut data = self.lock();
        let existing = data
            .integrations
            .iter_mut()
            .find(|i| i.id == id)
            .ok_or_else(|| not_found("integration", id))?;
        existing.cache = Some(cache.clone());
        Ok(())
    }

    async fn set_token(&self, id: Uuid, token_id: Option<Uuid>) -> StoreResult<()> {
        let mut data = self.lock();
        let existing = data
            .integrations
            .iter_mut()
            .find(|i| i.id == id)
            .ok_or_else(|| not_found("integration", id))?;
        existing.token_id = token_id;
        existing.updated_at = Utc::now();
        Ok(())
    }

    async fn list_for_form(&self, form_id: Uuid) -> StoreResult<Vec<FormIntegration>> {
        Ok(self
            .lock()
            .form_integrations
            .iter()
            .filter(|fi| fi.form_id == form_id)
            .cloned()
            .collect())
    }

    async fn find_form_integration(
        &self,
        form_id: Uuid,
        integration_id: Uuid,
    ) -> StoreResult<Option<FormIntegration>> {
        Ok(self
            .lock()
            .form_integrations
            .iter()
            .find(|fi| fi.form_id == form_id && fi.integration_id == integration_id)
            .cloned())
    }

    async fn save_form_integration(
        &self,
        form_id: Uuid,
        integration_id: Uuid,
        input: &FormIntegrationInput,
    ) -> StoreResult<FormIntegration> {
        let mut data = self.lock();
        let saved = FormIntegration {
            form_id,
            integration_id,
            enabled: input.enabled,
            settings: input.settings.clone(),
            field_mappings: Json(input.field_mappings.clone()),
            updated_at: Utc::now(),
        };
        data.form_integrations
            .retain(|fi| !(fi.form_id == form_id && fi.integration_id == integration_id));
        data.form_integrations.push(saved.clone());
        Ok(saved)
    }
}

#[async_trait]
impl SubmissionStore for MemoryStore {
    async fn create(&self, submission: &NewSubmission) -> StoreResult<Submission> {
        let now = Utc::now();
        let created = Submission {
            id: Uuid::now_v7(),
            form_id: submission.form_id,
            status: submission.status.as_str().to_string(),
            values: submission.values.clone(),
            site_handle: submission.site_handle.clone(),
            language: submission.language.clone(),
            spam_reason: submission.spam_reason.clone(),
            metadata: submission.metadata.clone(),
            created_at: now,
            updated_at: now,
        };
        self.lock().submissions.insert(created.id, created.clone());
        Ok(created)
    }

    async fn find_by_id(&self, id: Uuid) -> StoreResult<Option<Submission>> {
        Ok(self.lock().submissions.get(&id).cloned())
    }

    async fn list_by_form(&self, form_id: Uuid, limit: i64, offset: i64) -> StoreResult<Vec<Submission>> {
        let mut list: Vec<Submission> = self
            .lock()
            .submissions
            .values()
            .filter(|s| s.form_id == form_id)
            .cloned()
            .collect();
        list.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(list
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect())
    }

    async fn set_status(
        &self,
        id: Uuid,
        status: SubmissionStatus,
        spam_reason: Option<&str>,
    ) -> StoreResult<()> {
        let mut data = self.lock();
        let existing = data
            .submissions
            .get_mut(&id)
            .ok_or_else(|| not_found("submission", id))?;
        existing.status = status.as_str().to_string();
        if let Some(reason) = spam_reason {
            existing.spam_reason = Some(reason.to_string());
        }
        existing.updated_at = Utc::now();
        Ok(())
    }
}

#[async_trait]
impl PaymentRepository for MemoryStore {
    async fn create(&self, payment: &NewPayment) -> StoreResult<Payment> {
        let now = Utc::now();
        let created = Payment {
            id: Uuid::now_v7(),
            integration_id: payment.integration_id,
            submission_id: payment.submission_id,
            field_handle: payment.field_handle.clone(),
            amount: payment.amount,
            currency: payment.currency.clone(),
            status: payment.status.as_str().to_string(),
            reference: payment.reference.clone(),
            authentication: payment.authentication.map(|a| a.as_str().to_string()),
            response: payment.response.clone(),
            created_at: now,
            updated_at: now,
        };
        self.lock().payments.push(created.clone());
        Ok(created)
    }

    async fn find_by_id(&self, id: Uuid) -> StoreResult<Option<Payment>> {
        Ok(self.lock().payments.iter().find(|p| p.id == id).cloned())
    }

    async fn find_by_reference(
        &self,
        integration_id: Uuid,
        reference: &str,
    ) -> StoreResult<Option<Payment>> {
        Ok(self
            .lock()
            .payments
            .iter()
            .rev()
            .find(|p| p.integration_id == integration_id && p.reference.as_deref() == Some(reference))
            .cloned())
    }

    async fn list_for_submission(&self, submission_id: Uuid) -> StoreResult<Vec<Payment>> {
        Ok(self
            .lock()
            .payments
            .iter()
            .filter(|p| p.submission_id == submission_id)
            .cloned()
            .collect())
    }

    async fn transition(
        &self,
        id: Uuid,
        to: PaymentStatus,
        reference: Option<&str>,
        response: &serde_json::Value,
    ) -> StoreResult<bool> {
        let mut data = self.lock();
        let Some(payment) = data.payments.iter_mut().find(|p| p.id == id) else {
            return Ok(false);
        };
        let can_move = payment
            .status()
            .is_some_and(|current| current.can_transition(to));
        if !can_move {
            return Ok(false);
        }
        payment.status = to.as_str().to_string();
        if let Some(reference) = reference {
            payment.reference = Some(reference.to_string());
        }
        payment.response = response.clone();
        payment.updated_at = Utc::now();
        Ok(true)
    }

    async fn set_reference(&self, id: Uuid, reference: &str) -> StoreResult<()> {
        let mut data = self.lock();
        if let Some(payment) = data
            .payments
            .iter_mut()
            .find(|p| p.id == id && p.status() == Some(PaymentStatus::Pending))
        {
            payment.reference = Some(reference.to_string());
            payment.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn set_authentication(&self, id: Uuid, state: AuthenticationState) -> StoreResult<()> {
        let mut data = self.lock();
        let payment = data
            .payments
            .iter_mut()
            .find(|p| p.id == id)
            .ok_or_else(|| not_found("payment", id))?;
        payment.authentication = Some(state.as_str().to_string());
        payment.updated_at = Utc::now();
        Ok(())
    }

    async fn swap_authentication(
        &self,
        id: Uuid,
        from: AuthenticationState,
        to: AuthenticationState,
    ) -> StoreResult<bool> {
        let mut data = self.lock();
        let Some(payment) = data.payments.iter_mut().find(|p| {
            p.id == id && p.status() == Some(PaymentStatus::Pending) && p.authentication() == Some(from)
        }) else {
            return Ok(false);
        };
        payment.authentication = Some(to.as_str().to_string());
        payment.updated_at = Utc::now();
        Ok(true)
    }
}

#[async_trait]
impl TokenStore for MemoryStore {
    async fn find_for_integration(&self, integration_uid: Uuid) -> StoreResult<Option<OauthToken>> {
        Ok(self.lock().tokens.get(&integration_uid).cloned())
    }

    async fn save(&self, token: &NewToken) -> StoreResult<OauthToken> {
        let mut data = self.lock();
        let now = Utc::now();
        let previous = data.tokens.get(&token.integration_uid).cloned();
        let saved = OauthToken {
            id: previous.as_ref().map(|p| p.id).unwrap_or_else(Uuid::now_v7),
            integration_uid: token.integration_uid,
            access_token: token.access_token.clone(),
            refresh_token: token
                .refresh_token
                .clone()
                .or_else(|| previous.as_ref().and_then(|p| p.refresh_token.clone())),
            token_url: token
                .token_url
                .clone()
                .or_else(|| previous.as_ref().and_then(|p| p.token_url.clone())),
            expires_at: token.expires_at,
            created_at: previous.as_ref().map(|p| p.created_at).unwrap_or(now),
            updated_at: now,
        };
        data.tokens.insert(token.integration_uid, saved.clone());
        Ok(saved)
    }
}

#[async_trait]
impl JobQueue for MemoryStore {
    async fn enqueue(&self, submission_id: Uuid, integration_uid: Uuid) -> StoreResult<IntegrationJob> {
        let now = Utc::now();
        let job = IntegrationJob {
            id: Uuid::now_v7(),
            submission_id,
            integration_uid,
            status: "pending".to_string(),
            attempts: 0,
            max_attempts: 5,
            progress: 0.0,
            last_error: None,
            next_retry_at: now,
            created_at: now,
            completed_at: None,
        };
        self.lock().jobs.push(job.clone());
        Ok(job)
    }

    async fn claim_next(&self) -> StoreResult<Option<IntegrationJob>> {
        let mut data = self.lock();
        let now = Utc::now();
        let next = data
            .jobs
            .iter_mut()
            .filter(|j| {
                matches!(j.status.as_str(), "pending" | "failed")
                    && j.completed_at.is_none()
                    && j.next_retry_at <= now
            })
            .min_by_key(|j| j.next_retry_at);

        Ok(next.map(|job| {
            job.status = "processing".to_string();
            job.attempts += 1;
            job.progress = 0.0;
            job.clone()
        }))
    }

    async fn find_by_id(&self, id: Uuid) -> StoreResult<Option<IntegrationJob>> {
        Ok(self.lock().jobs.iter().find(|j| j.id == id).cloned())
    }

    async fn set_progress(&self, id: Uuid, progress: f64) -> StoreResult<()> {
        if let Some(job) = self.lock().jobs.iter_mut().find(|j| j.id == id) {
            job.progress = progress;
        }
        Ok(())
    }

    async fn mark_completed(&self, id: Uuid) -> StoreResult<()> {
        if let Some(job) = self.lock().jobs.iter_mut().find(|j| j.id == id) {
            job.status = "completed".to_string();
            job.progress = 1.0;
            job.completed_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn mark_failed(
        &self,
        id: Uuid,
        attempts: i32,
        max_attempts: i32,
        error: &str,
    ) -> StoreResult<()> {
        if let Some(job) = self.lock().jobs.iter_mut().find(|j| j.id == id) {
            job.status = "failed".to_string();
            job.last_error = Some(error.to_string());
            if attempts >= max_attempts {
                job.completed_at = Some(Utc::now());
            } else {
                job.next_retry_at = Utc::now() + Duration::seconds(2_i64.pow(attempts.max(0) as u32));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl IntegrationLogStore for MemoryStore {
    async fn create(
        &self,
        integration_id: Uuid,
        submission_id: Uuid,
        success: bool,
        response: Option<&serde_json::Value>,
    ) -> StoreResult<IntegrationLog> {
        let entry = IntegrationLog {
            id: Uuid::now_v7(),
            integration_id,
            submission_id,
            success,
            response: response.cloned(),
            created_at: Utc::now(),
        };
        self.lock().logs.push(entry.clone());
        Ok(entry)
    }

    async fn list_by_integration(
        &self,
        integration_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> StoreResult<Vec<IntegrationLog>> {
        Ok(self
            .lock()
            .logs
            .iter()
            .rev()
            .filter(|l| l.integration_id == integration_id)
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }
}
