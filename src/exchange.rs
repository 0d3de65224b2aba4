//! Authorization code exchange through the token relay.
//!
//! The provider's token endpoint requires a client secret, which a
//! distributable client cannot hold. A companion relay performs the
//! final exchange instead: this client posts the authorization code
//! and its PKCE verifier, and the relay returns the provider's token
//! response verbatim.
//!
//! The relay is a black box with one fixed contract:
//!
//! * Request: `POST /api/token` with `{code, code_verifier,
//!   redirect_uri, client_id}`
//! * Success: the provider's token response as JSON
//! * Failure: a non-2xx status; the body is logged but not
//!   interpreted

use std::sync::Arc;

use reqwest::{
    header::{HeaderValue, CONTENT_TYPE},
    StatusCode,
};
use thiserror::Error;
use url::Url;

use crate::{
    config::Config,
    http::Client as HttpClient,
    protocol::{
        self,
        auth::{TokenRequest, TokenResponse},
    },
};

/// Errors that can occur completing a token exchange.
#[derive(Error, Debug)]
pub enum Error {
    /// The relay refused the exchange. Covers expired and replayed
    /// authorization codes as well as relay misconfiguration.
    #[error("token exchange failed with status {status}")]
    Failed { status: StatusCode, body: String },

    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    #[error("HTTP header error: {0}")]
    HttpHeader(String),

    #[error("parsing JSON error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("parsing URL failed: {0}")]
    UrlParse(#[from] url::ParseError),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Client for the companion token relay.
pub struct TokenExchangeClient {
    http_client: Arc<HttpClient>,

    /// Fully resolved token endpoint on the relay.
    endpoint: Url,

    redirect_uri: Url,
    client_id: String,
}

impl TokenExchangeClient {
    /// Path of the token endpoint, relative to the relay root.
    const TOKEN_PATH: &'static str = "api/token";

    /// The `Content-Type` header value for relay requests.
    const JSON_CONTENT: HeaderValue = HeaderValue::from_static("application/json");

    /// Maximum number of characters of an error body to keep for
    /// diagnostics.
    const ERROR_BODY_LIMIT: usize = 256;

    /// Creates a relay client from the configured relay root URL.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the token endpoint cannot be joined onto
    /// the configured relay URL.
    pub fn new(config: &Config, http_client: Arc<HttpClient>) -> Result<Self> {
        let endpoint = config.token_relay_url.join(Self::TOKEN_PATH)?;

        Ok(Self {
            http_client,
            endpoint,
            redirect_uri: config.redirect_uri.clone(),
            client_id: config.client_id.clone(),
        })
    }

    /// Exchanges an authorization code for a token response.
    ///
    /// The `code_verifier` must be the one whose derived challenge was
    /// sent with the authorization request that produced `code`.
    /// Authorization codes are single-use; a replay fails on the
    /// provider side and surfaces here as [`Error::Failed`].
    ///
    /// # Errors
    ///
    /// Will return `Err` if:
    /// - the relay is unreachable or the request times out
    /// - the relay returns a non-2xx status
    /// - the response body does not parse as a token response
    pub async fn exchange(&self, code: &str, code_verifier: &str) -> Result<TokenResponse> {
        let body = serde_json::to_string(&TokenRequest {
            code: code.to_owned(),
            code_verifier: code_verifier.to_owned(),
            redirect_uri: self.redirect_uri.clone(),
            client_id: self.client_id.clone(),
        })?;

        let mut request = self.http_client.post(self.endpoint.clone(), body);
        request
            .headers_mut()
            .try_insert(CONTENT_TYPE, Self::JSON_CONTENT)?;

        let response = self.http_client.execute(request).await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            let snippet: String = body.chars().take(Self::ERROR_BODY_LIMIT).collect();
            error!("token exchange failed with status {status}: {snippet}");
            return Err(Error::Failed {
                status,
                body: snippet,
            });
        }

        protocol::json(&body, "token exchange").map_err(Into::into)
    }
}

impl From<http::header::MaxSizeReached> for Error {
    fn from(e: http::header::MaxSizeReached) -> Self {
        Self::HttpHeader(e.to_string())
    }
}
