use std::panic::Location;

use reqwest::{Client, Method};
use serde_json::{Value, json};

use super::hooks::HookOutcome;
use super::oauth::OauthClient;
use super::{Delivery, IntegrationError, SendContext};

/// Bodies longer than this are truncated in logs and error payloads.
const MAX_LOGGED_BODY: usize = 4096;

#[derive(Debug, Clone)]
pub enum RequestAuth {
    None,
    Basic { username: String, password: Option<String> },
    Bearer(String),
    Header { name: String, value: String },
}

#[derive(Debug, Clone)]
pub enum RequestBody {
    Empty,
    Json(Value),
    Form(Vec<(String, String)>),
}

/// A provider request, built up front so hooks can inspect and rewrite it
/// before anything goes over the wire.
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub auth: RequestAuth,
    pub body: RequestBody,
}

impl OutboundRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Vec::new(),
            auth: RequestAuth::None,
            body: RequestBody::Empty,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new(Method::POST, url)
    }

    pub fn json(mut self, body: Value) -> Self {
        self.body = RequestBody::Json(body);
        self
    }

    pub fn form(mut self, pairs: Vec<(String, String)>) -> Self {
        self.body = RequestBody::Form(pairs);
        self
    }

    pub fn header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.push((name.to_string(), value.into()));
        self
    }

    pub fn auth(mut self, auth: RequestAuth) -> Self {
        self.auth = auth;
        self
    }

    pub fn payload(&self) -> Option<&Value> {
        match &self.body {
            RequestBody::Json(body) => Some(body),
            _ => None,
        }
    }

    pub fn payload_mut(&mut self) -> Option<&mut Value> {
        match &mut self.body {
            RequestBody::Json(body) => Some(body),
            _ => None,
        }
    }

    /// Loggable summary. Never includes credentials or form-encoded secrets.
    pub fn describe(&self) -> Value {
        let body = match &self.body {
            RequestBody::Empty => Value::Null,
            RequestBody::Json(body) => body.clone(),
            RequestBody::Form(pairs) => {
                Value::Array(pairs.iter().map(|(k, _)| Value::String(k.clone())).collect())
            }
        };
        json!({
            "method": self.method.as_str(),
            "url": self.url,
            "body": body,
        })
    }

    /// Perform the request and classify the response. Errors point at the
    /// caller.
    #[track_caller]
    pub fn send<'a>(&'a self, http: &'a Client) -> impl Future<Output = Result<Value, IntegrationError>> + Send + 'a {
        self.send_from(http, Location::caller())
    }

    async fn send_from(&self, http: &Client, caller: &'static Location<'static>) -> Result<Value, IntegrationError> {
        let mut builder = http.request(self.method.clone(), &self.url);

        for (name, value) in &self.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        builder = match &self.auth {
            RequestAuth::None => builder,
            RequestAuth::Basic { username, password } => builder.basic_auth(username, password.as_deref()),
            RequestAuth::Bearer(token) => builder.bearer_auth(token),
            RequestAuth::Header { name, value } => builder.header(name.as_str(), value.as_str()),
        };

        builder = match &self.body {
            RequestBody::Empty => builder,
            RequestBody::Json(body) => builder.json(body),
            RequestBody::Form(pairs) => builder.form(pairs),
        };

        let resp = builder.send().await.map_err(|e| {
            IntegrationError::transient(format!("Request failed: {e}"))
                .with_request(self.describe())
                .at(caller)
        })?;

        let status = resp.status().as_u16();
        let text = resp.text().await.unwrap_or_default();
        classify(status, parse_body(&text), self).map_err(|e| e.at(caller))
    }
}

/// JSON when the body parses, otherwise the (truncated) text.
pub fn parse_body(text: &str) -> Value {
    if text.trim().is_empty() {
        return Value::Null;
    }
    serde_json::from_str(text)
        .unwrap_or_else(|_| Value::String(text.chars().take(MAX_LOGGED_BODY).collect()))
}

#[track_caller]
pub fn classify(status: u16, body: Value, request: &OutboundRequest) -> Result<Value, IntegrationError> {
    match status {
        200..=299 => Ok(body),
        401 => Err(IntegrationError::transient("Unauthorized (401) from provider.")
            .with_status(status)
            .with_request(request.describe())
            .with_response(body)),
        408 | 429 | 500..=599 => Err(IntegrationError::transient(format!(
            "Provider returned HTTP {status}."
        ))
        .with_status(status)
        .with_request(request.describe())
        .with_response(body)),
        400..=499 => Err(IntegrationError::rejected(format!(
            "Provider rejected the request with HTTP {status}: {}",
            error_summary(&body)
        ))
        .with_status(status)
        .with_request(request.describe())
        .with_response(body)),
        _ => Err(IntegrationError::transient(format!(
            "Unexpected HTTP {status} from provider."
        ))
        .with_status(status)
        .with_request(request.describe())
        .with_response(body)),
    }
}

/// Best short description of a provider error body.
fn error_summary(body: &Value) -> String {
    let candidates = [
        body.pointer("/errors/0/detail"),
        body.pointer("/error/message"),
        body.get("message"),
        body.get("error_description"),
        body.get("error"),
    ];
    candidates
        .into_iter()
        .flatten()
        .find_map(|v| v.as_str().map(|s| s.to_string()))
        .unwrap_or_else(|| {
            let text = body.to_string();
            text.chars().take(200).collect()
        })
}

/// Send, refreshing the OAuth token and retrying once on a 401.
#[track_caller]
pub fn send_authorized<'a>(
    http: &'a Client,
    request: &'a OutboundRequest,
    oauth: Option<&'a OauthClient<'a>>,
) -> impl Future<Output = Result<Value, IntegrationError>> + Send + 'a {
    send_authorized_from(http, request, oauth, Location::caller())
}

async fn send_authorized_from(
    http: &Client,
    request: &OutboundRequest,
    oauth: Option<&OauthClient<'_>>,
    caller: &'static Location<'static>,
) -> Result<Value, IntegrationError> {
    match (request.send_from(http, caller).await, oauth) {
        (Err(err), Some(oauth)) if err.is_unauthorized() => {
            let token = oauth.refresh().await.map_err(|e| e.at(caller))?;
            let mut retry = request.clone();
            retry.auth = RequestAuth::Bearer(token);
            retry.send_from(http, caller).await
        }
        (result, _) => result,
    }
}

/// The send pipeline shared by every payload integration: before-send hooks,
/// the request itself, then after-send hooks. A veto on either side is a
/// successful no-op.
#[track_caller]
pub fn deliver_payload<'a>(
    ctx: &'a SendContext<'a>,
    request: OutboundRequest,
    oauth: Option<&'a OauthClient<'a>>,
) -> impl Future<Output = Result<Delivery, IntegrationError>> + Send + 'a {
    let caller = Location::caller();
    async move {
        let request = match ctx.ctx.hooks.before_send(ctx, request) {
            HookOutcome::Continue(request) => request,
            HookOutcome::Abort => return Ok(Delivery::Skipped),
        };

        let response = send_authorized_from(ctx.ctx.http, &request, oauth, caller).await?;

        match ctx.ctx.hooks.after_send(ctx, &request, response) {
            HookOutcome::Continue(response) => Ok(Delivery::Sent(response)),
            HookOutcome::Abort => Ok(Delivery::Skipped),
        }
    }
}
