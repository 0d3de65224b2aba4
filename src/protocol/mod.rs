//! Wire formats for the streaming provider's services.
//!
//! This module contains the data types exchanged with the provider and
//! its companion token relay:
//!
//! # Submodules
//!
//! * [`auth`] - Token exchange request and response
//! * [`catalog`] - Profile, library and search responses
//! * [`player`] - Playback engine state and transport bodies
//!
//! # Shared Functionality
//!
//! * JSON parsing with consistent logging ([`json`])
//! * The provider's error envelope ([`ApiErrorBody`])

pub mod auth;
pub mod catalog;
pub mod player;

use std::fmt::Debug;

use serde::Deserialize;

/// Reason code the provider attaches to permission failures caused by the
/// account's subscription tier.
pub const PREMIUM_REQUIRED: &str = "PREMIUM_REQUIRED";

/// Error envelope returned by the provider's API and transport endpoints.
///
/// ```json
/// { "error": { "status": 403, "message": "Player command failed",
///              "reason": "PREMIUM_REQUIRED" } }
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct ApiErrorBody {
    pub error: ApiErrorDetail,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct ApiErrorDetail {
    #[serde(default)]
    pub status: Option<u16>,

    /// Human-readable description of the failure.
    #[serde(default)]
    pub message: Option<String>,

    /// Machine-readable reason code, where the endpoint provides one.
    #[serde(default)]
    pub reason: Option<String>,
}

/// Parses and logs JSON response bodies.
///
/// # Logging
///
/// * Success: logs the parsed structure at TRACE level
/// * Parse error: logs the raw JSON at TRACE level if it is valid JSON,
///   else the error and raw text at ERROR level
pub fn json<T>(body: &str, origin: &str) -> serde_json::Result<T>
where
    T: for<'de> Deserialize<'de> + Debug,
{
    match serde_json::from_str(body) {
        Ok(result) => {
            trace!("{origin}: {result:#?}");
            Ok(result)
        }
        Err(e) => {
            if let Ok(json) = serde_json::from_str::<serde_json::Value>(body) {
                trace!("{origin}: {json:#?}");
            } else {
                error!("{origin}: failed parsing response ({e:?})");
                trace!("{body}");
            }
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_body_with_reason() {
        let body = r#"{"error":{"status":403,"message":"Player command failed","reason":"PREMIUM_REQUIRED"}}"#;
        let parsed: ApiErrorBody = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.error.status, Some(403));
        assert_eq!(parsed.error.reason.as_deref(), Some(PREMIUM_REQUIRED));
    }

    #[test]
    fn error_body_without_reason() {
        let body = r#"{"error":{"status":404,"message":"Not found"}}"#;
        let parsed: ApiErrorBody = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.error.message.as_deref(), Some("Not found"));
        assert!(parsed.error.reason.is_none());
    }
}
