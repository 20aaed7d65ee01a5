pub mod auth;
pub mod cms;
pub mod config;
pub mod crypto;
pub mod db;
pub mod dispatch;
pub mod error;
pub mod fields;
pub mod integrations;
pub mod models;
pub mod payments;
pub mod rate_limit;
pub mod routes;
pub mod site;
pub mod state;
pub mod submission;
pub mod worker;

use std::sync::Arc;
use std::time::Duration;

use axum::http::{HeaderName, HeaderValue};
use axum::Router;
use tower::ServiceBuilder;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;

use crate::cms::CmsClient;
use crate::config::Config;
use crate::db::Stores;
use crate::dispatch::Dispatcher;
use crate::integrations::captchas::{Honeypot, Recaptcha, Turnstile};
use crate::integrations::crm::{Dynamics365, Klaviyo};
use crate::integrations::elements::Entry;
use crate::integrations::email_marketing::Campaign;
use crate::integrations::miscellaneous::Webhook;
use crate::integrations::payments::QuickStream;
use crate::integrations::{HookChain, ProviderRegistry};
use crate::rate_limit::SubmissionRateLimiter;
use crate::state::{AppState, SharedState};

/// Every built-in provider. CMS-backed providers are only available when a
/// CMS URL is configured.
pub fn build_registry(config: &Config) -> ProviderRegistry {
    let endpoints = &config.endpoints;
    let mut registry = ProviderRegistry::new();

    registry.register(Arc::new(Klaviyo::new(&endpoints.klaviyo_url)));
    registry.register(Arc::new(Dynamics365::new()));
    registry.register(Arc::new(Webhook::new()));

    if let Some(cms) = &config.cms {
        let client = CmsClient::new(&cms.url, cms.token.as_deref());
        registry.register(Arc::new(Campaign::new(client.clone())));
        registry.register(Arc::new(Entry::new(client)));
    }

    registry.register_payment(Arc::new(QuickStream::new(
        &endpoints.quickstream_live_url,
        &endpoints.quickstream_test_url,
    )));

    registry.register_captcha(Arc::new(Recaptcha::new(
        &endpoints.recaptcha_verify_url,
        &endpoints.recaptcha_enterprise_url,
    )));
    registry.register_captcha(Arc::new(Turnstile::new(&endpoints.turnstile_verify_url)));
    registry.register_captcha(Arc::new(Honeypot));

    registry
}

pub fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .user_agent(concat!("formrelay/", env!("CARGO_PKG_VERSION")))
        .build()
        .unwrap_or_default()
}

pub fn build_state(stores: Stores, config: Config, registry: ProviderRegistry, hooks: HookChain) -> SharedState {
    let registry = Arc::new(registry);
    let http = http_client();
    let dispatcher = Arc::new(Dispatcher::new(
        stores.clone(),
        registry.clone(),
        hooks.clone(),
        http.clone(),
    ));

    Arc::new(AppState {
        stores,
        config,
        registry,
        hooks,
        http,
        dispatcher,
        submission_limiter: SubmissionRateLimiter::new(),
    })
}

pub fn build_app(stores: Stores, config: Config) -> Router {
    let registry = build_registry(&config);
    build_app_with(build_state(stores, config, registry, HookChain::new()))
}

pub fn build_app_with(state: SharedState) -> Router {
    let max_body_size = state.config.max_body_size;

    Router::new()
        .merge(routes::api_routes())
        .merge(routes::ingest_routes())
        .merge(routes::payment_routes())
        .route("/health", axum::routing::get(health))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(RequestBodyLimitLayer::new(max_body_size)),
        )
        // Security headers
        .layer(SetResponseHeaderLayer::overriding(
            HeaderName::from_static("x-content-type-options"),
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            HeaderName::from_static("x-frame-options"),
            HeaderValue::from_static("DENY"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            HeaderName::from_static("referrer-policy"),
            HeaderValue::from_static("strict-origin-when-cross-origin"),
        ))
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}
