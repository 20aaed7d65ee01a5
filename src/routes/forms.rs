use std::collections::BTreeMap;

use axum::extract::{Path, State};
use axum::Json;
use serde_json::{Value, json};
use uuid::Uuid;

use crate::auth::extractor::AdminAuth;
use crate::db::{FormIntegrationInput, NewForm};
use crate::error::AppError;
use crate::integrations::mapping::validate_field_mapping;
use crate::integrations::{IntegrationField, IntegrationFormSettings};
use crate::models::{Form, FormIntegration};
use crate::state::SharedState;

pub async fn list(_auth: AdminAuth, State(state): State<SharedState>) -> Result<Json<Vec<Form>>, AppError> {
    Ok(Json(state.stores.forms.list().await?))
}

pub async fn create(
    _auth: AdminAuth,
    State(state): State<SharedState>,
    Json(req): Json<NewForm>,
) -> Result<Json<Form>, AppError> {
    validate_form(&req)?;
    let form = state.stores.forms.create(&req).await?;
    tracing::info!(form = %form.handle, "Form created");
    Ok(Json(form))
}

pub async fn get(
    _auth: AdminAuth,
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Form>, AppError> {
    let form = find_form(&state, id).await?;
    Ok(Json(form))
}

pub async fn update(
    _auth: AdminAuth,
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    Json(req): Json<NewForm>,
) -> Result<Json<Form>, AppError> {
    validate_form(&req)?;
    let form = state.stores.forms.update(id, &req).await?;
    Ok(Json(form))
}

pub async fn delete(
    _auth: AdminAuth,
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    state.stores.forms.delete(id).await?;
    Ok(Json(json!({ "deleted": true })))
}

pub async fn list_integrations(
    _auth: AdminAuth,
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<FormIntegration>>, AppError> {
    find_form(&state, id).await?;
    Ok(Json(state.stores.integrations.list_for_form(id).await?))
}

/// Save a form's settings and field mapping for one integration. Mappings
/// are checked against the integration's last fetched form settings.
pub async fn save_integration(
    _auth: AdminAuth,
    State(state): State<SharedState>,
    Path((form_id, integration_id)): Path<(Uuid, Uuid)>,
    Json(req): Json<FormIntegrationInput>,
) -> Result<Json<FormIntegration>, AppError> {
    let form = find_form(&state, form_id).await?;
    let integration = state
        .stores
        .integrations
        .find_by_id(integration_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Integration not found".to_string()))?;

    if req.enabled {
        let settings = integration.cached_form_settings();
        let mut errors = BTreeMap::new();
        for (group, mapping) in req.field_mappings.iter() {
            let schema = mapping_schema(&settings, group, &req.settings);
            if let Err(messages) = validate_field_mapping(&form, Some(mapping), schema) {
                errors.insert(group.clone(), messages);
            }
        }
        if !errors.is_empty() {
            return Err(AppError::UnprocessableEntity(json!(errors)));
        }
    }

    let saved = state
        .stores
        .integrations
        .save_form_integration(form_id, integration_id, &req)
        .await?;
    Ok(Json(saved))
}

/// The external fields a mapping group targets: the group's own field list,
/// or the fields of whichever collection the form settings select.
fn mapping_schema<'a>(settings: &'a IntegrationFormSettings, group: &str, form_settings: &Value) -> &'a [IntegrationField] {
    let fields = settings.fields(group);
    if !fields.is_empty() {
        return fields;
    }

    form_settings
        .as_object()
        .into_iter()
        .flat_map(|map| map.values())
        .filter_map(|v| v.as_str())
        .find_map(|id| settings.find_collection(id))
        .map(|collection| collection.fields.as_slice())
        .unwrap_or(&[])
}

async fn find_form(state: &SharedState, id: Uuid) -> Result<Form, AppError> {
    state
        .stores
        .forms
        .find_by_id(id)
        .await?
        .ok_or_else(|| AppError::NotFound("Form not found".to_string()))
}

fn validate_form(form: &NewForm) -> Result<(), AppError> {
    if form.handle.trim().is_empty() {
        return Err(AppError::BadRequest("Form handle is required".to_string()));
    }
    let mut seen = std::collections::HashSet::new();
    for field in &form.fields {
        if field.handle.trim().is_empty() {
            return Err(AppError::BadRequest("Every field needs a handle".to_string()));
        }
        if !seen.insert(field.handle.as_str()) {
            return Err(AppError::BadRequest(format!("Duplicate field handle: {}", field.handle)));
        }
    }
    Ok(())
}
