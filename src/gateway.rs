//! Authenticated access to the provider's Web API.
//!
//! The gateway attaches the stored bearer token to every request and
//! normalizes the API's failure modes into [`Error`]:
//!
//! * No token on hand rejects the call locally as
//!   [`Error::Unauthenticated`] and forces a logout
//! * `401 Unauthorized` retires the token with a full logout and
//!   surfaces as [`Error::ExpiredToken`]
//! * `429 Too Many Requests` surfaces as [`Error::RateLimited`] with
//!   the server's retry hint
//! * Any other non-2xx surfaces as [`Error::Api`] with the message
//!   from the error envelope
//!
//! Requests are never retried here. Rate limit and API errors go back
//! to the caller to decide; authentication failures end the session,
//! after which only a fresh login helps.
//!
//! # Pagination
//!
//! [`request`](Gateway::request) accepts absolute `http(s)` URLs as
//! well as endpoints relative to the API root, so the `next` URL of a
//! [`Page`] can be passed back unchanged.

use std::{sync::Arc, time::Duration};

use reqwest::{
    header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE, RETRY_AFTER},
    Method, StatusCode,
};
use serde::Deserialize;
use thiserror::Error;
use url::Url;

use crate::{
    auth::AuthSession,
    config::Config,
    http::Client as HttpClient,
    protocol::{
        self,
        catalog::{Page, Playlist, PlaylistTrack, Profile, SavedTrack, SearchResults},
        ApiErrorBody,
    },
};

/// Errors that can occur calling the Web API.
#[derive(Error, Debug)]
pub enum Error {
    /// No access token on hand; the session has been logged out.
    #[error("not authenticated")]
    Unauthenticated,

    /// The API rejected the token; the session has been logged out.
    #[error("access token expired")]
    ExpiredToken,

    /// The API is throttling this client.
    #[error("rate limited; retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },

    /// Any other non-2xx response.
    #[error("API error {status}: {message}")]
    Api { status: StatusCode, message: String },

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

/// Authenticated Web API client.
pub struct Gateway {
    http_client: Arc<HttpClient>,
    auth: AuthSession,
    api_url: Url,
}

impl Gateway {
    /// Retry hint used when a 429 carries no `Retry-After` header.
    const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(1);

    /// The `Content-Type` header value for API requests.
    const JSON_CONTENT: HeaderValue = HeaderValue::from_static("application/json");

    #[must_use]
    pub fn new(config: &Config, http_client: Arc<HttpClient>, auth: AuthSession) -> Self {
        Self {
            http_client,
            auth,
            api_url: config.api_url.clone(),
        }
    }

    /// Performs an authenticated API request and parses the response.
    ///
    /// `endpoint` is either relative to the API root, with or without
    /// a leading slash, or an absolute `http(s)` URL. Any `headers`
    /// passed in override the defaults.
    ///
    /// # Errors
    ///
    /// Will return `Err` if:
    /// - no access token is on hand
    /// - the API answers 401, 429 or another non-2xx status
    /// - the request fails or the response does not parse
    pub async fn request<T>(
        &self,
        method: Method,
        endpoint: &str,
        body: Option<String>,
        headers: Option<HeaderMap>,
    ) -> Result<T>
    where
        T: std::fmt::Debug + for<'de> Deserialize<'de>,
    {
        let url = self.endpoint_url(endpoint)?;
        self.request_url(method, url, body, headers).await
    }

    /// Performs an authenticated GET request.
    ///
    /// Convenience method for [`request`](Self::request) with the GET
    /// method, no body and default headers. Accepts the absolute
    /// `next` URL of a [`Page`] as well.
    ///
    /// # Errors
    ///
    /// Same as [`request`](Self::request).
    pub async fn get<T>(&self, endpoint: &str) -> Result<T>
    where
        T: std::fmt::Debug + for<'de> Deserialize<'de>,
    {
        self.request(Method::GET, endpoint, None, None).await
    }

    /// The authenticated user's profile.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the request fails.
    pub async fn profile(&self) -> Result<Profile> {
        self.get("me").await
    }

    /// One page of the user's saved tracks.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the request fails.
    pub async fn saved_tracks(&self, limit: u32, offset: u32) -> Result<Page<SavedTrack>> {
        self.get(&format!("me/tracks?limit={limit}&offset={offset}"))
            .await
    }

    /// One page of the user's playlists.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the request fails.
    pub async fn playlists(&self, limit: u32, offset: u32) -> Result<Page<Playlist>> {
        self.get(&format!("me/playlists?limit={limit}&offset={offset}"))
            .await
    }

    /// One page of a playlist's tracks.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the request fails.
    pub async fn playlist_tracks(
        &self,
        playlist_id: &str,
        limit: u32,
        offset: u32,
    ) -> Result<Page<PlaylistTrack>> {
        self.get(&format!(
            "playlists/{playlist_id}/tracks?limit={limit}&offset={offset}"
        ))
        .await
    }

    /// Searches the catalog.
    ///
    /// `types` names the result sets to return, e.g. `["track",
    /// "playlist"]`. The query is percent-encoded here; pass it raw.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the request fails.
    pub async fn search(&self, query: &str, types: &[&str], limit: u32) -> Result<SearchResults> {
        let mut url = self.api_url.join("search")?;
        url.query_pairs_mut()
            .append_pair("q", query)
            .append_pair("type", &types.join(","))
            .append_pair("limit", &limit.to_string());

        self.request_url(Method::GET, url, None, None).await
    }

    /// Resolves an endpoint against the API root.
    fn endpoint_url(&self, endpoint: &str) -> Result<Url> {
        if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
            return Url::parse(endpoint).map_err(Into::into);
        }

        // A leading slash would make `join` drop the API root path.
        self.api_url
            .join(endpoint.trim_start_matches('/'))
            .map_err(Into::into)
    }

    async fn request_url<T>(
        &self,
        method: Method,
        url: Url,
        body: Option<String>,
        headers: Option<HeaderMap>,
    ) -> Result<T>
    where
        T: std::fmt::Debug + for<'de> Deserialize<'de>,
    {
        let Some(access_token) = self.auth.access_token().await else {
            warn!("API request without a credential; logging out");
            self.auth.logout().await;
            return Err(Error::Unauthenticated);
        };

        let origin = url.path().to_owned();
        let mut request = self
            .http_client
            .request(method, url, body.unwrap_or_default());

        let request_headers = request.headers_mut();
        request_headers.try_insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {access_token}"))?,
        )?;
        request_headers.try_insert(CONTENT_TYPE, Self::JSON_CONTENT)?;

        // Add any headers that were passed in, overriding the defaults.
        if let Some(headers) = headers {
            request_headers.extend(headers);
        }

        let response = self.http_client.execute(request).await?;
        let status = response.status();

        if status == StatusCode::UNAUTHORIZED {
            warn!("access token rejected; logging out");
            self.auth.logout().await;
            return Err(Error::ExpiredToken);
        }

        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|value| value.to_str().ok())
                .and_then(|seconds| seconds.parse::<u64>().ok())
                .map_or(Self::DEFAULT_RETRY_AFTER, Duration::from_secs);

            warn!("rate limited on {origin}; retry after {retry_after:?}");
            return Err(Error::RateLimited { retry_after });
        }

        let body = response.text().await?;

        if !status.is_success() {
            let message = serde_json::from_str::<ApiErrorBody>(&body)
                .ok()
                .and_then(|envelope| envelope.error.message)
                .unwrap_or_else(|| {
                    status
                        .canonical_reason()
                        .unwrap_or("unknown error")
                        .to_string()
                });

            warn!("API error on {origin}: {status} {message}");
            return Err(Error::Api { status, message });
        }

        // Some write endpoints answer 204 with no body.
        if body.is_empty() {
            return protocol::json("null", &origin).map_err(Into::into);
        }

        protocol::json(&body, &origin).map_err(Into::into)
    }
}

impl From<http::header::MaxSizeReached> for Error {
    fn from(e: http::header::MaxSizeReached) -> Self {
        Self::HttpHeader(e.to_string())
    }
}

impl From<http::header::InvalidHeaderValue> for Error {
    fn from(e: http::header::InvalidHeaderValue) -> Self {
        Self::HttpHeader(e.to_string())
    }
}
