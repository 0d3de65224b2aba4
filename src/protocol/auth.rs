//! Token exchange payloads.
//!
//! The authorization code flow ends with a `POST` to the token relay,
//! which completes the exchange with the provider on the client's
//! behalf. These are the relay's request and response bodies.
//!
//! # Security
//!
//! * Code verifiers are redacted in debug output
//! * Access and refresh tokens are redacted in debug output

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_with::{formats::Flexible, serde_as, DurationSeconds};
use url::Url;
use veil::Redact;

/// Request body for the relay's token endpoint.
#[derive(Clone, PartialEq, Eq, Serialize, Redact)]
pub struct TokenRequest {
    /// Authorization code returned on the callback.
    pub code: String,

    /// Code verifier matching the challenge sent at authorization.
    #[redact]
    pub code_verifier: String,

    /// Redirect URI the code was issued for.
    pub redirect_uri: Url,

    /// Client identifier of this application.
    pub client_id: String,
}

/// Successful token exchange response.
#[serde_as]
#[derive(Clone, PartialEq, Eq, Deserialize, Redact)]
pub struct TokenResponse {
    /// Bearer token for API access.
    #[redact]
    pub access_token: String,

    /// How long the token remains valid from the moment of issue.
    #[serde_as(as = "DurationSeconds<u64, Flexible>")]
    pub expires_in: Duration,

    /// Token type; the provider issues `Bearer` tokens.
    pub token_type: String,

    /// Scopes actually granted, which may differ from those requested.
    #[serde(default)]
    pub scope: Option<String>,

    /// Refresh token, when the provider issues one.
    #[serde(default)]
    #[redact]
    pub refresh_token: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_parses_with_optional_fields_absent() {
        let body = r#"{
            "access_token": "NgCXRK...MzYjw",
            "token_type": "Bearer",
            "expires_in": 3600
        }"#;

        let response: TokenResponse = serde_json::from_str(body).unwrap();
        assert_eq!(response.expires_in, Duration::from_secs(3600));
        assert_eq!(response.token_type, "Bearer");
        assert!(response.scope.is_none());
        assert!(response.refresh_token.is_none());
    }

    #[test]
    fn request_serializes_all_fields() {
        let request = TokenRequest {
            code: "AQDKxyz".to_string(),
            code_verifier: "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk".to_string(),
            redirect_uri: Url::parse("https://localhost:8080/callback").unwrap(),
            client_id: "0123456789abcdef0123456789abcdef".to_string(),
        };

        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["code"], "AQDKxyz");
        assert_eq!(
            value["code_verifier"],
            "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk"
        );
        assert_eq!(value["redirect_uri"], "https://localhost:8080/callback");
    }

    #[test]
    fn secrets_are_redacted_in_debug_output() {
        let response: TokenResponse = serde_json::from_str(
            r#"{
                "access_token": "NgCXRK...MzYjw",
                "token_type": "Bearer",
                "expires_in": 3600,
                "refresh_token": "AQD...xyz"
            }"#,
        )
        .unwrap();

        let debug = format!("{response:?}");
        assert!(!debug.contains("NgCXRK"));
        assert!(!debug.contains("AQD...xyz"));
    }
}
