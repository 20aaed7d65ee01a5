use std::net::{IpAddr, SocketAddr};

use axum::body::Bytes;
use axum::extract::{ConnectInfo, Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Redirect, Response};
use axum::Json;
use serde_json::json;

use crate::error::AppError;
use crate::state::SharedState;
use crate::submission::pipeline::{self, PipelineOutcome};
use crate::submission::parser;

pub async fn ingest(
    State(state): State<SharedState>,
    Path(handle): Path<String>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, AppError> {
    let form = state
        .stores
        .forms
        .find_by_handle(&handle)
        .await?
        .ok_or_else(|| AppError::NotFound("Form not found".to_string()))?;

    let content_type = headers.get("content-type").and_then(|v| v.to_str().ok());

    let raw = if content_type.is_some_and(|ct| ct.contains("multipart/form-data")) {
        parser::parse_multipart(&headers, body).await
    } else {
        parser::parse_body(content_type, &body)
    }
    .map_err(AppError::BadRequest)?;

    let peer_ip: Option<IpAddr> = Some(addr.ip());
    let outcome = pipeline::run(&state, &form, &headers, peer_ip, raw).await?;

    let is_browser_post = content_type.is_some_and(|ct| ct.contains("form"));

    let response = match outcome {
        PipelineOutcome::Spam { redirect_url } => match redirect_url {
            Some(url) if is_browser_post => Redirect::to(&url).into_response(),
            // Silent 200 for spam
            _ => (StatusCode::OK, Json(json!({"status": "ok"}))).into_response(),
        },
        PipelineOutcome::AwaitingAuthentication {
            submission_id,
            payments,
        } => (
            StatusCode::ACCEPTED,
            Json(json!({
                "status": "pending",
                "submission_id": submission_id,
                "payments": payments,
            })),
        )
            .into_response(),
        PipelineOutcome::Accepted {
            submission_id,
            redirect_url,
            payments,
        } => match redirect_url {
            Some(url) if is_browser_post => Redirect::to(&url).into_response(),
            _ => (
                StatusCode::CREATED,
                Json(json!({
                    "status": "created",
                    "submission_id": submission_id,
                    "payments": payments,
                })),
            )
                .into_response(),
        },
    };

    Ok(response)
}

pub async fn ingest_options(State(state): State<SharedState>, Path(handle): Path<String>) -> Response {
    let form = state.stores.forms.find_by_handle(&handle).await;

    let allowed_origins = form
        .ok()
        .flatten()
        .map(|f| f.settings.cors_origins.join(", "))
        .filter(|origins| !origins.is_empty())
        .unwrap_or_else(|| "*".to_string());

    (
        [
            ("Access-Control-Allow-Origin", allowed_origins),
            ("Access-Control-Allow-Methods", "POST, OPTIONS".to_string()),
            ("Access-Control-Allow-Headers", "Content-Type".to_string()),
            ("Access-Control-Max-Age", "86400".to_string()),
        ],
        StatusCode::NO_CONTENT,
    )
        .into_response()
}
