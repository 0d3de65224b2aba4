//! OAuth session lifecycle.
//!
//! Drives the authorization code flow with PKCE from anonymous to
//! authenticated and back:
//!
//! 1. [`login`](AuthSession::login) generates a verifier, challenge
//!    and `state` nonce, persists them, and returns the authorization
//!    URL to open
//! 2. [`parse_callback`](AuthSession::parse_callback) classifies the
//!    redirect the provider sends back
//! 3. [`complete_login`](AuthSession::complete_login) validates the
//!    callback against the stored artifact and exchanges the code for
//!    a token through the relay
//!
//! # State Machine
//!
//! ```text
//! Anonymous -> Authorizing -> Exchanging -> Authenticated
//!                  |              |
//!                  +--> Failed <--+
//!                         |
//!                     (logout)
//!                         |
//!                     Anonymous
//! ```
//!
//! Every failure path resolves through logout, which clears the
//! credential store and emits [`Event::LoggedOut`]. Logout is
//! idempotent and emits its event even when the session is already
//! anonymous, so observers can always converge on the logged-out
//! view.
//!
//! # Security
//!
//! * The PKCE verifier and `state` nonce are single-use: they are
//!   retired before the callback is inspected at all
//! * A `state` mismatch discards the authorization code unused
//! * Authorization codes are redacted in debug output

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{mpsc::UnboundedSender, Mutex};
use url::Url;
use veil::Redact;

use crate::{
    config::Config,
    events::Event,
    exchange::{self, TokenExchangeClient},
    pkce,
    protocol::catalog::Profile,
    store::{self, CredentialStore, PkceArtifact},
};

/// Errors that can occur completing a login.
#[derive(Error, Debug)]
pub enum Error {
    /// The user or provider denied the authorization request.
    #[error("authorization denied: {reason}")]
    Denied { reason: String },

    /// A callback arrived without a pending authorization attempt.
    #[error("no authorization attempt in progress")]
    MissingArtifact,

    /// The callback `state` nonce did not match the stored one.
    #[error("state parameter mismatch")]
    StateMismatch,

    /// The relay could not complete the token exchange.
    #[error(transparent)]
    ExchangeFailed(#[from] exchange::Error),

    /// The credential store could not be read or written.
    #[error("credential store error: {0}")]
    Store(#[from] store::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Phases of the authentication lifecycle.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum SessionState {
    /// No credential; API access is rejected.
    #[default]
    Anonymous,

    /// PKCE artifact generated and authorization URL issued.
    Authorizing,

    /// Callback accepted; token exchange in flight.
    Exchanging,

    /// A credential is on hand.
    Authenticated,

    /// Authorization or exchange failed; resolved by logout.
    Failed,
}

/// Payload of a granted authorization callback.
#[derive(Clone, PartialEq, Eq, Redact)]
pub struct AuthorizationCode {
    /// Single-use authorization code.
    #[redact]
    pub code: String,

    /// Echo of the `state` nonce, if the provider sent one.
    pub state: Option<String>,
}

/// Outcome carried on an authorization callback URL.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AuthorizationResult {
    /// The user approved the request.
    Granted(AuthorizationCode),

    /// The user or provider denied the request.
    Denied { reason: String },
}

struct Inner {
    state: SessionState,
    store: CredentialStore,
}

/// Cloneable handle on the authentication session.
///
/// All clones share one state machine and credential store.
#[derive(Clone)]
pub struct AuthSession {
    inner: Arc<Mutex<Inner>>,
    exchange: Arc<TokenExchangeClient>,
    events: UnboundedSender<Event>,

    authorize_url: Url,
    redirect_uri: Url,
    client_id: String,
    scopes: String,
}

impl AuthSession {
    /// Creates a session over an existing credential store.
    ///
    /// A store loaded from disk may already hold a credential, in
    /// which case the session reports authenticated without a new
    /// login.
    #[must_use]
    pub fn new(
        config: &Config,
        store: CredentialStore,
        exchange: Arc<TokenExchangeClient>,
        events: UnboundedSender<Event>,
    ) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                state: SessionState::default(),
                store,
            })),
            exchange,
            events,
            authorize_url: config.authorize_url.clone(),
            redirect_uri: config.redirect_uri.clone(),
            client_id: config.client_id.clone(),
            scopes: config.scopes.clone(),
        }
    }

    /// Starts an authorization attempt.
    ///
    /// Generates fresh PKCE material, persists it for the callback,
    /// and returns the URL to open in a browser. Starting a new
    /// attempt replaces any artifact from an earlier, unfinished one.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the artifact cannot be persisted.
    pub async fn login(&self) -> Result<Url> {
        let mut inner = self.inner.lock().await;

        let code_verifier = pkce::generate_verifier();
        let code_challenge = pkce::derive_challenge(&code_verifier);
        let state = pkce::generate_state();

        inner.store.save_artifact(PkceArtifact {
            state: state.clone(),
            code_verifier,
        })?;
        inner.state = SessionState::Authorizing;

        let mut url = self.authorize_url.clone();
        url.query_pairs_mut()
            .append_pair("client_id", &self.client_id)
            .append_pair("response_type", "code")
            .append_pair("redirect_uri", self.redirect_uri.as_str())
            .append_pair("state", &state)
            .append_pair("scope", &self.scopes)
            .append_pair("code_challenge_method", "S256")
            .append_pair("code_challenge", &code_challenge);

        debug!("authorization started with state {state}");
        Ok(url)
    }

    /// Classifies an authorization callback URL.
    ///
    /// Returns `None` when the URL carries neither a code nor an
    /// error, in which case it was not a callback at all. A URL with
    /// both is treated as denied.
    #[must_use]
    pub fn parse_callback(url: &Url) -> Option<AuthorizationResult> {
        let mut code = None;
        let mut state = None;
        let mut error = None;

        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "code" => code = Some(value.into_owned()),
                "state" => state = Some(value.into_owned()),
                "error" => error = Some(value.into_owned()),
                _ => {}
            }
        }

        if let Some(reason) = error {
            return Some(AuthorizationResult::Denied { reason });
        }

        code.map(|code| AuthorizationResult::Granted(AuthorizationCode { code, state }))
    }

    /// Completes a login from a parsed callback.
    ///
    /// The pending artifact is consumed before the callback is
    /// inspected, whatever the outcome. Denied callbacks, missing
    /// artifacts, `state` mismatches, store errors and exchange
    /// failures all resolve through logout.
    ///
    /// On success the credential is stored and
    /// [`Event::LoginSucceeded`] is emitted. A refresh token in the
    /// relay response is not used; re-login restarts the flow from
    /// scratch instead.
    ///
    /// # Errors
    ///
    /// Will return `Err` if:
    /// - the authorization was denied
    /// - no authorization attempt was in progress
    /// - the callback `state` does not match the stored nonce
    /// - the credential store cannot be updated
    /// - the token exchange fails
    pub async fn complete_login(&self, result: AuthorizationResult) -> Result<()> {
        let mut inner = self.inner.lock().await;

        // Single-use: retire the artifact before looking at the
        // callback, so no failure path can leave it behind.
        let artifact = match inner.store.take_artifact() {
            Ok(artifact) => artifact,
            Err(e) => {
                self.fail(&mut inner);
                return Err(e.into());
            }
        };

        let AuthorizationCode { code, state } = match result {
            AuthorizationResult::Granted(granted) => granted,
            AuthorizationResult::Denied { reason } => {
                warn!("authorization denied: {reason}");
                self.fail(&mut inner);
                return Err(Error::Denied { reason });
            }
        };

        let Some(artifact) = artifact else {
            warn!("callback received without a pending authorization attempt");
            self.fail(&mut inner);
            return Err(Error::MissingArtifact);
        };

        if state.as_deref() != Some(artifact.state.as_str()) {
            warn!("state parameter mismatch; discarding authorization code");
            self.fail(&mut inner);
            return Err(Error::StateMismatch);
        }

        inner.state = SessionState::Exchanging;

        let response = match self.exchange.exchange(&code, &artifact.code_verifier).await {
            Ok(response) => response,
            Err(e) => {
                self.fail(&mut inner);
                return Err(e.into());
            }
        };

        if response.refresh_token.is_some() {
            debug!("relay returned a refresh token; re-login is used instead");
        }
        if let Some(ref scope) = response.scope {
            debug!("token granted with scopes: {scope}");
        }

        // The login already succeeded with the provider; failing to
        // persist only costs the credential on the next start.
        if let Err(e) = inner.store.save(&response.access_token, response.expires_in) {
            warn!("failed to persist credential: {e}");
        }
        inner.state = SessionState::Authenticated;

        info!("logged in");
        self.emit(Event::LoginSucceeded);

        Ok(())
    }

    /// Logs out and returns to the anonymous state.
    ///
    /// Idempotent; emits [`Event::LoggedOut`] even when the session is
    /// already anonymous.
    pub async fn logout(&self) {
        let mut inner = self.inner.lock().await;
        self.force_logout(&mut inner);
    }

    /// Whether a valid credential is on hand.
    ///
    /// A credential that turns out to be expired is retired here with
    /// a full logout. An absent credential reports `false` without
    /// side effects.
    pub async fn is_authenticated(&self) -> bool {
        let mut inner = self.inner.lock().await;

        if inner.store.is_valid() {
            inner.state = SessionState::Authenticated;
            return true;
        }

        if inner.store.credential().is_some() {
            info!("access token expired");
            self.force_logout(&mut inner);
        }

        false
    }

    /// The stored access token, if any.
    ///
    /// Not gated on expiry; the API answers an expired token with 401,
    /// which retires it.
    pub async fn access_token(&self) -> Option<String> {
        let inner = self.inner.lock().await;
        inner.store.access_token().map(ToOwned::to_owned)
    }

    /// Current lifecycle state.
    pub async fn state(&self) -> SessionState {
        self.inner.lock().await.state
    }

    /// Caches the user profile next to the credential.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the profile cannot be serialized or the
    /// store cannot be written.
    pub async fn cache_profile(&self, profile: &Profile) -> Result<()> {
        let value = serde_json::to_value(profile).map_err(store::Error::from)?;
        let mut inner = self.inner.lock().await;
        inner.store.cache_profile(value)?;
        Ok(())
    }

    /// The cached user profile, if one was stored and still parses.
    pub async fn cached_profile(&self) -> Option<Profile> {
        let inner = self.inner.lock().await;
        inner
            .store
            .cached_profile()
            .and_then(|value| serde_json::from_value(value.clone()).ok())
    }

    /// Marks the attempt failed, then resolves it through logout.
    fn fail(&self, inner: &mut Inner) {
        inner.state = SessionState::Failed;
        self.force_logout(inner);
    }

    fn force_logout(&self, inner: &mut Inner) {
        if let Err(e) = inner.store.clear() {
            warn!("failed to clear credential store: {e}");
        }
        inner.state = SessionState::Anonymous;

        info!("logged out");
        self.emit(Event::LoggedOut);
    }

    fn emit(&self, event: Event) {
        if self.events.send(event).is_err() {
            debug!("event receiver closed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn callback(query: &str) -> Url {
        Url::parse(&format!("https://localhost:8080/callback?{query}")).unwrap()
    }

    #[test]
    fn parse_callback_classifies_granted() {
        let result = AuthSession::parse_callback(&callback("code=AQDabc&state=xyz")).unwrap();
        assert_eq!(
            result,
            AuthorizationResult::Granted(AuthorizationCode {
                code: "AQDabc".to_string(),
                state: Some("xyz".to_string()),
            })
        );
    }

    #[test]
    fn parse_callback_classifies_denied() {
        let result = AuthSession::parse_callback(&callback("error=access_denied")).unwrap();
        assert_eq!(
            result,
            AuthorizationResult::Denied {
                reason: "access_denied".to_string(),
            }
        );
    }

    #[test]
    fn parse_callback_prefers_error_over_code() {
        let result =
            AuthSession::parse_callback(&callback("code=AQDabc&error=access_denied")).unwrap();
        assert!(matches!(result, AuthorizationResult::Denied { .. }));
    }

    #[test]
    fn parse_callback_ignores_unrelated_urls() {
        assert!(AuthSession::parse_callback(&callback("foo=bar")).is_none());
        let plain = Url::parse("https://localhost:8080/").unwrap();
        assert!(AuthSession::parse_callback(&plain).is_none());
    }

    #[test]
    fn authorization_code_is_redacted_in_debug_output() {
        let granted = AuthorizationCode {
            code: "AQDsecret".to_string(),
            state: Some("xyz".to_string()),
        };
        let debug = format!("{granted:?}");
        assert!(!debug.contains("AQDsecret"));
        assert!(debug.contains("xyz"));
    }
}
