pub mod honeypot;
pub mod recaptcha;
pub mod turnstile;

pub use honeypot::Honeypot;
pub use recaptcha::{Recaptcha, RecaptchaType};
pub use turnstile::Turnstile;

use serde_json::Value;

use super::CaptchaVerdict;
use super::service::log_api_error;
use super::IntegrationError;
use crate::models::Integration;

pub const MISSING_TOKEN: &str = "Client-side token missing.";

/// The client-side token posted under `param`, when it is a non-empty string.
pub fn client_token<'a>(values: &'a Value, param: &str) -> Option<&'a str> {
    values
        .get(param)
        .and_then(|v| v.as_str())
        .filter(|s| !s.trim().is_empty())
}

/// A verification call that never reached a verdict. Logged, then rejected.
fn transport_failure(integration: &Integration, err: IntegrationError) -> CaptchaVerdict {
    log_api_error(integration, &err);
    CaptchaVerdict::reject(err.message)
}
