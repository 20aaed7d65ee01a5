pub mod forms;
pub mod ingest;
pub mod integrations;
pub mod payments;
pub mod submissions;

use axum::routing::{get, post, put};
use axum::Router;

use crate::state::SharedState;

pub fn api_routes() -> Router<SharedState> {
    Router::new()
        // Providers
        .route("/api/v1/providers", get(integrations::list_providers))
        // Integrations
        .route(
            "/api/v1/integrations",
            get(integrations::list).post(integrations::create),
        )
        .route(
            "/api/v1/integrations/{id}",
            get(integrations::get)
                .put(integrations::update)
                .delete(integrations::delete),
        )
        .route(
            "/api/v1/integrations/{id}/check-connection",
            post(integrations::check_connection),
        )
        .route(
            "/api/v1/integrations/{id}/form-settings",
            get(integrations::cached_form_settings).post(integrations::refresh_form_settings),
        )
        .route("/api/v1/integrations/{id}/log", get(integrations::log))
        .route("/api/v1/integrations/{id}/token", put(integrations::save_token))
        // Forms
        .route("/api/v1/forms", get(forms::list).post(forms::create))
        .route(
            "/api/v1/forms/{id}",
            get(forms::get).put(forms::update).delete(forms::delete),
        )
        .route("/api/v1/forms/{id}/integrations", get(forms::list_integrations))
        .route(
            "/api/v1/forms/{id}/integrations/{integration_id}",
            put(forms::save_integration),
        )
        // Submissions
        .route("/api/v1/forms/{id}/submissions", get(submissions::list))
        .route("/api/v1/submissions/{id}", get(submissions::get))
        .route("/api/v1/submissions/{id}/payments", get(submissions::payments))
        .route(
            "/api/v1/submissions/{id}/integrations/{integration_id}/send",
            post(submissions::resend),
        )
}

pub fn ingest_routes() -> Router<SharedState> {
    Router::new()
        .route(
            "/v1/forms/{handle}/submissions",
            post(ingest::ingest).options(ingest::ingest_options),
        )
}

pub fn payment_routes() -> Router<SharedState> {
    Router::new()
        .route("/v1/payments/{handle}/webhook", post(payments::webhook))
        .route("/v1/payments/{handle}/callback", post(payments::callback))
        .route("/v1/payments/{handle}/3ds-auth", post(payments::three_ds_auth))
}
