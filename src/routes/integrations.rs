use axum::extract::{Path, Query, State};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{Value, json};
use uuid::Uuid;

use crate::auth::extractor::AdminAuth;
use crate::db::{NewIntegration, NewToken};
use crate::error::AppError;
use crate::integrations::{IntegrationFormSettings, IntegrationProvider, service};
use crate::models::{Integration, IntegrationLog};
use crate::state::SharedState;

use super::submissions::ListParams;

pub async fn list_providers(_auth: AdminAuth, State(state): State<SharedState>) -> Json<Value> {
    let providers: Vec<Value> = state
        .registry
        .list()
        .iter()
        .map(|p| {
            json!({
                "id": p.id(),
                "name": p.name(),
                "kind": p.kind(),
                "supports_payload_sending": p.supports_payload_sending(),
                "settings_schema": p.settings_schema(),
            })
        })
        .collect();

    Json(json!({ "providers": providers }))
}

pub async fn list(_auth: AdminAuth, State(state): State<SharedState>) -> Result<Json<Vec<Integration>>, AppError> {
    Ok(Json(state.stores.integrations.list().await?))
}

pub async fn create(
    _auth: AdminAuth,
    State(state): State<SharedState>,
    Json(req): Json<NewIntegration>,
) -> Result<Json<Integration>, AppError> {
    validate(&state, &req)?;
    let integration = state.stores.integrations.create(&req).await?;
    tracing::info!(integration = %integration.handle, provider = %integration.provider, "Integration created");
    Ok(Json(integration))
}

pub async fn get(
    _auth: AdminAuth,
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Integration>, AppError> {
    Ok(Json(find_integration(&state, id).await?))
}

pub async fn update(
    _auth: AdminAuth,
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    Json(req): Json<NewIntegration>,
) -> Result<Json<Integration>, AppError> {
    validate(&state, &req)?;
    Ok(Json(state.stores.integrations.update(id, &req).await?))
}

pub async fn delete(
    _auth: AdminAuth,
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    state.stores.integrations.delete(id).await?;
    Ok(Json(json!({ "deleted": true })))
}

pub async fn check_connection(
    _auth: AdminAuth,
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let integration = find_integration(&state, id).await?;
    let provider = provider_for(&state, &integration)?;

    let ctx = state.dispatcher.context(&integration);
    let success = service::check_connection(provider.as_ref(), &ctx).await;
    Ok(Json(json!({ "success": success })))
}

/// The last fetched form settings, without calling the provider.
pub async fn cached_form_settings(
    _auth: AdminAuth,
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<Json<IntegrationFormSettings>, AppError> {
    let integration = find_integration(&state, id).await?;
    Ok(Json(integration.cached_form_settings()))
}

/// Fetch form settings from the provider and cache them. A failed fetch
/// leaves the previous cache in place.
pub async fn refresh_form_settings(
    _auth: AdminAuth,
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<Json<IntegrationFormSettings>, AppError> {
    let integration = find_integration(&state, id).await?;
    let provider = provider_for(&state, &integration)?;

    let ctx = state.dispatcher.context(&integration);
    let settings = service::form_settings(provider.as_ref(), &ctx).await;

    if settings.is_empty() {
        return Ok(Json(integration.cached_form_settings()));
    }

    let cache = serde_json::to_value(&settings).map_err(|e| AppError::Internal(e.to_string()))?;
    state.stores.integrations.save_cache(integration.id, &cache).await?;
    Ok(Json(settings))
}

pub async fn log(
    _auth: AdminAuth,
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    Query(params): Query<ListParams>,
) -> Result<Json<Vec<IntegrationLog>>, AppError> {
    find_integration(&state, id).await?;
    let (limit, offset) = params.window();
    Ok(Json(state.stores.logs.list_by_integration(id, limit, offset).await?))
}

#[derive(Deserialize)]
pub struct SaveToken {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub token_url: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Store the OAuth token obtained from the provider's consent flow.
pub async fn save_token(
    _auth: AdminAuth,
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    Json(req): Json<SaveToken>,
) -> Result<Json<Value>, AppError> {
    let integration = find_integration(&state, id).await?;
    if req.access_token.trim().is_empty() {
        return Err(AppError::BadRequest("access_token is required".to_string()));
    }

    let token = state
        .stores
        .tokens
        .save(&NewToken {
            integration_uid: integration.uid,
            access_token: req.access_token,
            refresh_token: req.refresh_token,
            token_url: req.token_url,
            expires_at: req.expires_at,
        })
        .await?;
    state.stores.integrations.set_token(integration.id, Some(token.id)).await?;

    tracing::info!(integration = %integration.handle, "OAuth token saved");
    Ok(Json(json!({ "connected": true, "expires_at": token.expires_at })))
}

fn validate(state: &SharedState, req: &NewIntegration) -> Result<(), AppError> {
    if req.handle.trim().is_empty() {
        return Err(AppError::BadRequest("Integration handle is required".to_string()));
    }
    let provider = state
        .registry
        .get(&req.provider)
        .ok_or_else(|| AppError::BadRequest(format!("Unknown provider: {}", req.provider)))?;
    provider
        .validate_settings(&req.settings)
        .map_err(|e| AppError::BadRequest(e.message))
}

fn provider_for(
    state: &SharedState,
    integration: &Integration,
) -> Result<std::sync::Arc<dyn IntegrationProvider>, AppError> {
    state
        .registry
        .get(&integration.provider)
        .cloned()
        .ok_or_else(|| AppError::BadRequest(format!("Unknown provider: {}", integration.provider)))
}

async fn find_integration(state: &SharedState, id: Uuid) -> Result<Integration, AppError> {
    state
        .stores
        .integrations
        .find_by_id(id)
        .await?
        .ok_or_else(|| AppError::NotFound("Integration not found".to_string()))
}
