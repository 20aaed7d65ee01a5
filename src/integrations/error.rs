use std::panic::Location;

use serde::Serialize;
use serde_json::Value;

/// How an integration failure should be treated by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Missing credentials, settings or required values. No request was made.
    Config,
    /// Network failure or a retryable HTTP status.
    Transient,
    /// The remote API refused the payload. Resending it unchanged won't help.
    RemoteRejected,
    /// Bad client input such as a missing captcha token. Not logged.
    Malicious,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Config => "config",
            ErrorKind::Transient => "transient",
            ErrorKind::RemoteRejected => "remote_rejected",
            ErrorKind::Malicious => "malicious",
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorKind::Transient)
    }
}

#[derive(Debug)]
pub struct IntegrationError {
    pub kind: ErrorKind,
    pub message: String,
    pub status: Option<u16>,
    pub request: Option<Value>,
    pub response: Option<Value>,
    pub location: &'static Location<'static>,
}

impl IntegrationError {
    #[track_caller]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            status: None,
            request: None,
            response: None,
            location: Location::caller(),
        }
    }

    #[track_caller]
    pub fn config(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Config, message)
    }

    #[track_caller]
    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transient, message)
    }

    #[track_caller]
    pub fn rejected(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::RemoteRejected, message)
    }

    #[track_caller]
    pub fn malicious(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Malicious, message)
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_request(mut self, request: Value) -> Self {
        self.request = Some(request);
        self
    }

    pub fn with_response(mut self, response: Value) -> Self {
        self.response = Some(response);
        self
    }

    /// Attribute the error to `location` instead of where it was built.
    pub fn at(mut self, location: &'static Location<'static>) -> Self {
        self.location = location;
        self
    }

    pub fn is_unauthorized(&self) -> bool {
        self.status == Some(401)
    }

    /// `file:line` of where the error was raised.
    pub fn origin(&self) -> String {
        format!("{}:{}", self.location.file(), self.location.line())
    }
}

impl std::fmt::Display for IntegrationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for IntegrationError {}

impl From<reqwest::Error> for IntegrationError {
    #[track_caller]
    fn from(err: reqwest::Error) -> Self {
        let mut error = IntegrationError::transient(format!("Request failed: {err}"));
        if let Some(status) = err.status() {
            error.status = Some(status.as_u16());
        }
        error
    }
}

impl From<crate::db::StoreError> for IntegrationError {
    #[track_caller]
    fn from(err: crate::db::StoreError) -> Self {
        IntegrationError::transient(format!("Storage error: {err}"))
    }
}
