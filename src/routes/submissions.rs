use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{Value, json};
use uuid::Uuid;

use crate::auth::extractor::AdminAuth;
use crate::error::AppError;
use crate::models::{Payment, Submission};
use crate::state::SharedState;

#[derive(Deserialize)]
pub struct ListParams {
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

impl ListParams {
    /// `(limit, offset)`, clamped to sane page sizes.
    pub fn window(&self) -> (i64, i64) {
        let page = self.page.unwrap_or(1).max(1);
        let per_page = self.per_page.unwrap_or(20).clamp(1, 100);
        (per_page, (page - 1) * per_page)
    }
}

#[derive(Deserialize, Default)]
pub struct ResendParams {
    #[serde(default)]
    pub queue: bool,
}

pub async fn list(
    _auth: AdminAuth,
    State(state): State<SharedState>,
    Path(form_id): Path<Uuid>,
    Query(params): Query<ListParams>,
) -> Result<Json<Value>, AppError> {
    let (limit, offset) = params.window();
    let submissions = state.stores.submissions.list_by_form(form_id, limit, offset).await?;

    Ok(Json(json!({
        "submissions": submissions,
        "page": params.page.unwrap_or(1).max(1),
        "per_page": limit,
    })))
}

pub async fn get(
    _auth: AdminAuth,
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Submission>, AppError> {
    Ok(Json(find_submission(&state, id).await?))
}

pub async fn payments(
    _auth: AdminAuth,
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<Payment>>, AppError> {
    find_submission(&state, id).await?;
    Ok(Json(state.stores.payments.list_for_submission(id).await?))
}

/// Send a submission to one integration again, whatever its status. Inline
/// by default; `?queue=true` hands it to the worker pool instead.
pub async fn resend(
    _auth: AdminAuth,
    State(state): State<SharedState>,
    Path((id, integration_id)): Path<(Uuid, Uuid)>,
    Query(params): Query<ResendParams>,
) -> Result<Json<Value>, AppError> {
    let submission = find_submission(&state, id).await?;
    let integration = state
        .stores
        .integrations
        .find_by_id(integration_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Integration not found".to_string()))?;

    if params.queue {
        let job = state.stores.jobs.enqueue(submission.id, integration.uid).await?;
        return Ok(Json(json!({ "queued": true, "job_id": job.id })));
    }

    let form = state
        .stores
        .forms
        .find_by_id(submission.form_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Form not found".to_string()))?;
    let form_integration = state
        .stores
        .integrations
        .find_form_integration(form.id, integration.id)
        .await?
        .ok_or_else(|| AppError::BadRequest("Integration is not attached to this form".to_string()))?;

    let response = crate::site::scope(
        crate::site::SiteContext::for_submission(&submission),
        state
            .dispatcher
            .send_integration_payload(&form, &submission, &integration, &form_integration),
    )
    .await;

    Ok(Json(json!(response)))
}

async fn find_submission(state: &SharedState, id: Uuid) -> Result<Submission, AppError> {
    state
        .stores
        .submissions
        .find_by_id(id)
        .await?
        .ok_or_else(|| AppError::NotFound("Submission not found".to_string()))
}
