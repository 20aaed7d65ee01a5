use crate::integrations::{ThreeDsResult, ThreeDsStatus};

/// HTTP status for a 3-D Secure result: frictionless and challenge are both
/// successful outcomes for the browser to act on.
pub fn http_status(result: &ThreeDsResult) -> u16 {
    match result.three_ds_status {
        ThreeDsStatus::Frictionless | ThreeDsStatus::Challenge => 200,
        ThreeDsStatus::Failed => 400,
        ThreeDsStatus::Error => 500,
    }
}

/// Map a provider's authentication status onto [`ThreeDsStatus`]. Accepts
/// EMV 3DS `transStatus` codes and spelled-out statuses.
pub fn classify(status: &str) -> ThreeDsStatus {
    match status.trim().to_ascii_uppercase().as_str() {
        "Y" | "A" | "FRICTIONLESS" | "AUTHENTICATED" | "ATTEMPTED" => ThreeDsStatus::Frictionless,
        "C" | "D" | "CHALLENGE" | "CHALLENGE_REQUIRED" => ThreeDsStatus::Challenge,
        "N" | "R" | "U" | "FAILED" | "REJECTED" | "NOT_AUTHENTICATED" => ThreeDsStatus::Failed,
        _ => ThreeDsStatus::Error,
    }
}

pub fn error(message: impl Into<String>) -> ThreeDsResult {
    ThreeDsResult {
        three_ds_status: ThreeDsStatus::Error,
        success: false,
        message: Some(message.into()),
        data: None,
    }
}
