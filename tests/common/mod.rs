#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, Method, StatusCode as AxumStatus, Uri};
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use reqwest::{Client, StatusCode};
use serde_json::{Map, Value, json};

use formrelay::config::{CmsConfig, Config, ProviderEndpoints};
use formrelay::db::Stores;
use formrelay::integrations::HookChain;
use formrelay::state::SharedState;

pub const ADMIN_TOKEN: &str = "test-admin-token";

/// One request received by the fake provider.
#[derive(Debug, Clone)]
pub struct Recorded {
    pub method: String,
    pub path: String,
    pub query: Option<String>,
    pub headers: HeaderMap,
    pub body: Value,
}

#[derive(Default)]
struct FakeState {
    requests: Mutex<Vec<Recorded>>,
    responses: Mutex<HashMap<String, (u16, Value)>>,
    queued: Mutex<HashMap<String, VecDeque<(u16, Value)>>>,
}

/// Stands in for every third-party API. Records what it receives and answers
/// with a queued one-off response for the path if there is one, then whatever
/// was configured for the path, `200 {"ok": true}` otherwise.
#[derive(Clone)]
pub struct FakeProvider {
    pub addr: SocketAddr,
    state: Arc<FakeState>,
}

impl FakeProvider {
    pub async fn start() -> Self {
        let state = Arc::new(FakeState::default());
        let app = Router::new().fallback(record).with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind fake provider");
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            axum::serve(listener, app).await.expect("Fake provider failed");
        });

        Self { addr, state }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn respond(&self, path: &str, status: u16, body: Value) {
        self.state
            .responses
            .lock()
            .unwrap()
            .insert(path.to_string(), (status, body));
    }

    /// Answer the next request to `path` with this, ahead of `respond`.
    pub fn respond_once(&self, path: &str, status: u16, body: Value) {
        self.state
            .queued
            .lock()
            .unwrap()
            .entry(path.to_string())
            .or_default()
            .push_back((status, body));
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.state.requests.lock().unwrap().clone()
    }

    pub fn requests_to(&self, path: &str) -> Vec<Recorded> {
        self.requests().into_iter().filter(|r| r.path == path).collect()
    }
}

async fn record(
    State(state): State<Arc<FakeState>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let content_type = headers
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();

    let parsed = if content_type.contains("json") {
        serde_json::from_slice(&body).unwrap_or(Value::Null)
    } else if content_type.contains("x-www-form-urlencoded") {
        let map: Map<String, Value> = form_urlencoded::parse(&body)
            .map(|(k, v)| (k.into_owned(), Value::String(v.into_owned())))
            .collect();
        Value::Object(map)
    } else if body.is_empty() {
        Value::Null
    } else {
        Value::String(String::from_utf8_lossy(&body).into_owned())
    };

    let path = uri.path().to_string();
    state.requests.lock().unwrap().push(Recorded {
        method: method.to_string(),
        path: path.clone(),
        query: uri.query().map(|q| q.to_string()),
        headers,
        body: parsed,
    });

    let queued = state
        .queued
        .lock()
        .unwrap()
        .get_mut(&path)
        .and_then(|q| q.pop_front());
    let (status, body) = queued.unwrap_or_else(|| {
        state
            .responses
            .lock()
            .unwrap()
            .get(&path)
            .cloned()
            .unwrap_or((200, json!({ "ok": true })))
    });

    (AxumStatus::from_u16(status).unwrap(), Json(body)).into_response()
}

/// A running test server backed by in-memory stores.
pub struct TestApp {
    pub addr: SocketAddr,
    pub client: Client,
    pub state: SharedState,
    pub fake: FakeProvider,
}

impl TestApp {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    async fn read(resp: reqwest::Response) -> (Value, StatusCode) {
        let status = resp.status();
        let body: Value = resp.json().await.unwrap_or(json!(null));
        (body, status)
    }

    /// Make an authenticated GET request.
    pub async fn get_auth(&self, path: &str) -> (Value, StatusCode) {
        let resp = self
            .client
            .get(self.url(path))
            .bearer_auth(ADMIN_TOKEN)
            .send()
            .await
            .expect("get request failed");
        Self::read(resp).await
    }

    /// Make an authenticated POST request with JSON body.
    pub async fn post_auth(&self, path: &str, body: &Value) -> (Value, StatusCode) {
        let resp = self
            .client
            .post(self.url(path))
            .bearer_auth(ADMIN_TOKEN)
            .json(body)
            .send()
            .await
            .expect("post request failed");
        Self::read(resp).await
    }

    /// Make an authenticated PUT request with JSON body.
    pub async fn put_auth(&self, path: &str, body: &Value) -> (Value, StatusCode) {
        let resp = self
            .client
            .put(self.url(path))
            .bearer_auth(ADMIN_TOKEN)
            .json(body)
            .send()
            .await
            .expect("put request failed");
        Self::read(resp).await
    }

    /// Make an authenticated DELETE request.
    pub async fn delete_auth(&self, path: &str) -> (Value, StatusCode) {
        let resp = self
            .client
            .delete(self.url(path))
            .bearer_auth(ADMIN_TOKEN)
            .send()
            .await
            .expect("delete request failed");
        Self::read(resp).await
    }

    /// POST an anonymous JSON body, as the payment frame and providers do.
    pub async fn post_json(&self, path: &str, body: &Value) -> (Value, StatusCode) {
        let resp = self
            .client
            .post(self.url(path))
            .json(body)
            .send()
            .await
            .expect("post request failed");
        Self::read(resp).await
    }

    /// Submit a form (JSON), return (body, status).
    pub async fn submit_json(&self, handle: &str, data: &Value) -> (Value, StatusCode) {
        self.post_json(&format!("/v1/forms/{handle}/submissions"), data).await
    }

    /// Submit form-urlencoded data, return (body, status).
    pub async fn submit_form(&self, handle: &str, data: &[(&str, &str)]) -> (Value, StatusCode) {
        let resp = self
            .client
            .post(self.url(&format!("/v1/forms/{handle}/submissions")))
            .form(data)
            .send()
            .await
            .expect("submit form failed");
        Self::read(resp).await
    }

    /// Create a form, return the form JSON.
    pub async fn create_form(&self, body: Value) -> Value {
        let (form, status) = self.post_auth("/api/v1/forms", &body).await;
        assert_eq!(status, StatusCode::OK, "create form failed: {form}");
        form
    }

    /// Create an integration, return the integration JSON.
    pub async fn create_integration(&self, handle: &str, provider: &str, settings: Value) -> Value {
        let (integration, status) = self
            .post_auth(
                "/api/v1/integrations",
                &json!({
                    "handle": handle,
                    "name": handle,
                    "provider": provider,
                    "settings": settings,
                }),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "create integration failed: {integration}");
        integration
    }

    /// Attach an integration to a form with the given settings and mapping.
    pub async fn attach(&self, form: &Value, integration: &Value, body: Value) -> Value {
        let path = format!(
            "/api/v1/forms/{}/integrations/{}",
            form["id"].as_str().unwrap(),
            integration["id"].as_str().unwrap()
        );
        let (saved, status) = self.put_auth(&path, &body).await;
        assert_eq!(status, StatusCode::OK, "attach integration failed: {saved}");
        saved
    }

    /// A webhook integration pointing at the fake provider, attached to `form`.
    pub async fn attach_webhook(&self, form: &Value, handle: &str, path: &str) -> Value {
        let integration = self
            .create_integration(handle, "webhook", json!({ "url": self.fake.url(path) }))
            .await;
        self.attach(form, &integration, json!({ "enabled": true })).await;
        integration
    }

    /// Run queued jobs until the queue has nothing ready.
    pub async fn drain_queue(&self) -> usize {
        let mut processed = 0;
        while formrelay::worker::process_next(&self.state.dispatcher, Duration::from_secs(5))
            .await
            .expect("worker failed")
        {
            processed += 1;
        }
        processed
    }
}

pub fn test_config(fake: &FakeProvider) -> Config {
    Config {
        database_url: String::new(),
        encryption_key: "test-encryption-key-32-chars-ok!".to_string(),
        admin_token: ADMIN_TOKEN.to_string(),
        host: "127.0.0.1".parse().unwrap(),
        port: 0, // unused, we bind to random port
        base_url: "http://localhost:0".to_string(),
        max_body_size: 1_048_576,
        trusted_proxies: vec![],
        worker_count: 1,
        job_timeout: Duration::from_secs(5),
        log_level: "warn".to_string(),
        cms: None,
        endpoints: ProviderEndpoints {
            recaptcha_verify_url: fake.url("/recaptcha/siteverify"),
            recaptcha_enterprise_url: fake.url("/recaptcha-enterprise"),
            turnstile_verify_url: fake.url("/turnstile/siteverify"),
            klaviyo_url: fake.url("/klaviyo"),
            quickstream_live_url: fake.url("/quickstream-live"),
            quickstream_test_url: fake.url("/quickstream"),
        },
    }
}

pub async fn spawn_app() -> TestApp {
    spawn_app_with(HookChain::new()).await
}

/// Spawn a test app with fresh in-memory stores and extra hooks.
pub async fn spawn_app_with(hooks: HookChain) -> TestApp {
    let fake = FakeProvider::start().await;
    let config = test_config(&fake);
    serve(fake, config, hooks).await
}

/// Spawn a test app whose CMS API is the fake provider under `/cms`, so the
/// element and mailing-list integrations are registered.
pub async fn spawn_app_with_cms() -> TestApp {
    let fake = FakeProvider::start().await;
    let mut config = test_config(&fake);
    config.cms = Some(CmsConfig {
        url: fake.url("/cms"),
        token: Some("cms-token".to_string()),
    });
    serve(fake, config, HookChain::new()).await
}

async fn serve(fake: FakeProvider, config: Config, hooks: HookChain) -> TestApp {
    let registry = formrelay::build_registry(&config);
    let state = formrelay::build_state(Stores::memory(), config, registry, hooks);
    let app = formrelay::build_app_with(state.clone());

    // Bind to random port
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind to random port");
    let addr = listener.local_addr().unwrap();

    // Spawn server in background
    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .expect("Server failed");
    });

    let client = Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .unwrap();

    TestApp {
        addr,
        client,
        state,
        fake,
    }
}

/// A contact form queued or sent inline depending on `use_queue`.
pub fn contact_form(handle: &str, use_queue: bool) -> Value {
    json!({
        "handle": handle,
        "title": "Contact",
        "fields": [
            { "handle": "firstName", "label": "First name", "type": "single_line_text" },
            { "handle": "email", "label": "Email", "type": "email", "required": true },
            { "handle": "message", "label": "Message", "type": "multi_line_text", "rich_text": true },
        ],
        "settings": {
            "use_queue_for_integrations": use_queue,
            "rate_limit": 100,
        },
    })
}

/// An in-memory form, for tests that don't go through the API.
pub fn form_with(fields: Vec<formrelay::fields::FormField>) -> formrelay::models::Form {
    let now = chrono::Utc::now();
    formrelay::models::Form {
        id: uuid::Uuid::now_v7(),
        handle: "test".to_string(),
        title: "Test".to_string(),
        fields: sqlx::types::Json(fields),
        settings: sqlx::types::Json(Default::default()),
        created_at: now,
        updated_at: now,
    }
}

pub fn submission_with(form: &formrelay::models::Form, values: Value) -> formrelay::models::Submission {
    let now = chrono::Utc::now();
    formrelay::models::Submission {
        id: uuid::Uuid::now_v7(),
        form_id: form.id,
        status: "complete".to_string(),
        values,
        site_handle: "default".to_string(),
        language: "en".to_string(),
        spam_reason: None,
        metadata: json!({ "ip": "203.0.113.9", "user_agent": "tests" }),
        created_at: now,
        updated_at: now,
    }
}

pub fn integration_with(provider: &str, settings: Value) -> formrelay::models::Integration {
    let now = chrono::Utc::now();
    formrelay::models::Integration {
        id: uuid::Uuid::now_v7(),
        uid: uuid::Uuid::now_v7(),
        handle: provider.to_string(),
        name: provider.to_string(),
        provider: provider.to_string(),
        settings,
        token_id: None,
        enabled: true,
        cache: None,
        created_at: now,
        updated_at: now,
    }
}
