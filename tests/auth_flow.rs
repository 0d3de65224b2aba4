//! Tests of the authorization flow over the public API.
//!
//! A wiremock server stands in for the companion token relay; the
//! provider's authorize endpoint is never contacted, because the flow
//! only builds its URL.

use std::{
    collections::HashMap,
    fs,
    sync::Arc,
    time::{Duration, SystemTime},
};

use tokio::sync::mpsc;
use url::Url;
use wiremock::{
    matchers::{body_partial_json, header, method, path},
    Mock, MockServer, ResponseTemplate,
};

use tonearm::{
    auth::{AuthSession, AuthorizationCode, AuthorizationResult, Error, SessionState},
    config::Config,
    events::Event,
    exchange,
    http::Client as HttpClient,
    pkce,
    store::CredentialStore,
};

const CLIENT_ID: &str = "0123456789abcdef0123456789abcdef";

fn config_with_relay(relay_url: &str) -> Config {
    let mut config = Config::with_client_id(CLIENT_ID.to_string());
    config.token_relay_url = Url::parse(relay_url).expect("relay url");
    config
}

fn build_session(
    config: &Config,
    store: CredentialStore,
) -> (AuthSession, mpsc::UnboundedReceiver<Event>) {
    let http_client = Arc::new(HttpClient::new(config).expect("http client"));
    let exchange = Arc::new(
        exchange::TokenExchangeClient::new(config, http_client).expect("relay client"),
    );
    let (events_tx, events_rx) = mpsc::unbounded_channel();

    (
        AuthSession::new(config, store, exchange, events_tx),
        events_rx,
    )
}

fn drain(events: &mut mpsc::UnboundedReceiver<Event>) -> Vec<Event> {
    let mut drained = Vec::new();
    while let Ok(event) = events.try_recv() {
        drained.push(event);
    }
    drained
}

fn granted(code: &str, state: Option<&str>) -> AuthorizationResult {
    AuthorizationResult::Granted(AuthorizationCode {
        code: code.to_string(),
        state: state.map(str::to_string),
    })
}

fn query_map(url: &Url) -> HashMap<String, String> {
    url.query_pairs().into_owned().collect()
}

mod login_url {
    use super::*;

    #[tokio::test]
    async fn carries_all_authorization_parameters() {
        let config = Config::with_client_id(CLIENT_ID.to_string());
        let (auth, _events) = build_session(&config, CredentialStore::new());

        let url = auth.login().await.unwrap();
        assert!(url.as_str().starts_with(config.authorize_url.as_str()));
        assert_eq!(auth.state().await, SessionState::Authorizing);

        let params = query_map(&url);
        assert_eq!(params["client_id"], CLIENT_ID);
        assert_eq!(params["response_type"], "code");
        assert_eq!(params["redirect_uri"], config.redirect_uri.as_str());
        assert_eq!(params["scope"], config.scopes);
        assert_eq!(params["code_challenge_method"], "S256");
        assert_eq!(params["state"].len(), 16);

        // An S256 challenge is a 32-byte digest, base64url without padding.
        let challenge = &params["code_challenge"];
        assert_eq!(challenge.len(), 43);
        assert!(!challenge.contains('+'));
        assert!(!challenge.contains('/'));
        assert!(!challenge.contains('='));
    }

    #[tokio::test]
    async fn every_attempt_uses_fresh_material() {
        let config = Config::with_client_id(CLIENT_ID.to_string());
        let (auth, _events) = build_session(&config, CredentialStore::new());

        let first = query_map(&auth.login().await.unwrap());
        let second = query_map(&auth.login().await.unwrap());

        assert_ne!(first["state"], second["state"]);
        assert_ne!(first["code_challenge"], second["code_challenge"]);
    }
}

mod callback {
    use super::*;

    #[tokio::test]
    async fn state_mismatch_logs_out_without_contacting_the_relay() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/token"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let config = config_with_relay(&server.uri());
        let (auth, mut events) = build_session(&config, CredentialStore::new());

        auth.login().await.unwrap();
        let result = auth
            .complete_login(granted("AQDcode123", Some("forged-nonce")))
            .await;

        match result.unwrap_err() {
            Error::StateMismatch => {}
            e => panic!("expected StateMismatch, got: {e:?}"),
        }
        assert!(!auth.is_authenticated().await);
        assert_eq!(auth.state().await, SessionState::Anonymous);
        assert_eq!(drain(&mut events), vec![Event::LoggedOut]);
    }

    #[tokio::test]
    async fn denied_callback_logs_out_without_contacting_the_relay() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/token"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let config = config_with_relay(&server.uri());
        let (auth, mut events) = build_session(&config, CredentialStore::new());

        auth.login().await.unwrap();
        let result = auth
            .complete_login(AuthorizationResult::Denied {
                reason: "access_denied".to_string(),
            })
            .await;

        match result.unwrap_err() {
            Error::Denied { reason } => assert_eq!(reason, "access_denied"),
            e => panic!("expected Denied, got: {e:?}"),
        }
        assert_eq!(drain(&mut events), vec![Event::LoggedOut]);
    }

    #[tokio::test]
    async fn artifact_is_consumed_by_the_first_attempt() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/token"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let config = config_with_relay(&server.uri());
        let (auth, _events) = build_session(&config, CredentialStore::new());

        let url = auth.login().await.unwrap();
        let state = query_map(&url)["state"].clone();

        let first = auth.complete_login(granted("AQDcode123", Some("wrong"))).await;
        assert!(matches!(first.unwrap_err(), Error::StateMismatch));

        // Replaying the callback with the right nonce finds nothing to
        // match against; the artifact is gone.
        let second = auth
            .complete_login(granted("AQDcode123", Some(&state)))
            .await;
        assert!(matches!(second.unwrap_err(), Error::MissingArtifact));
    }

    #[tokio::test]
    async fn callback_without_pending_attempt_is_rejected() {
        let config = Config::with_client_id(CLIENT_ID.to_string());
        let (auth, mut events) = build_session(&config, CredentialStore::new());

        let result = auth.complete_login(granted("AQDcode123", Some("xyz"))).await;
        assert!(matches!(result.unwrap_err(), Error::MissingArtifact));
        assert_eq!(drain(&mut events), vec![Event::LoggedOut]);
    }

    #[tokio::test]
    async fn store_failure_logs_out_without_contacting_the_relay() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/token"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let session_file = dir.path().join("session.json");

        let config = config_with_relay(&server.uri());
        let store = CredentialStore::with_file(&session_file).unwrap();
        let (auth, mut events) = build_session(&config, store);

        let url = auth.login().await.unwrap();
        let state = query_map(&url)["state"].clone();

        // Retiring the artifact can no longer be persisted once the
        // session file path points at a directory.
        fs::remove_file(&session_file).unwrap();
        fs::create_dir(&session_file).unwrap();

        let result = auth
            .complete_login(granted("AQDcode123", Some(&state)))
            .await;

        assert!(matches!(result.unwrap_err(), Error::Store(_)));
        assert_eq!(auth.state().await, SessionState::Anonymous);
        assert_eq!(drain(&mut events), vec![Event::LoggedOut]);
    }
}

mod token_exchange {
    use super::*;

    #[tokio::test]
    async fn success_stores_the_token_and_binds_the_verifier() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/token"))
            .and(header("content-type", "application/json"))
            .and(body_partial_json(serde_json::json!({
                "code": "AQDcode123",
                "redirect_uri": "https://localhost:8080/callback",
                "client_id": CLIENT_ID,
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "abc",
                "token_type": "Bearer",
                "expires_in": 3600,
                "scope": "streaming user-read-private"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let config = config_with_relay(&server.uri());
        let (auth, mut events) = build_session(&config, CredentialStore::new());

        let url = auth.login().await.unwrap();
        let params = query_map(&url);

        auth.complete_login(granted("AQDcode123", Some(&params["state"])))
            .await
            .unwrap();

        assert!(auth.is_authenticated().await);
        assert_eq!(auth.state().await, SessionState::Authenticated);
        assert_eq!(auth.access_token().await.as_deref(), Some("abc"));
        assert_eq!(drain(&mut events), vec![Event::LoginSucceeded]);

        // The verifier sent to the relay must be the one whose derived
        // challenge went out with the authorization request.
        let requests = server.received_requests().await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
        let verifier = body["code_verifier"].as_str().unwrap();
        assert_eq!(pkce::derive_challenge(verifier), params["code_challenge"]);
    }

    #[tokio::test]
    async fn expiry_is_persisted_with_the_exchanged_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "abc",
                "token_type": "Bearer",
                "expires_in": 3600
            })))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let session_file = dir.path().join("session.json");

        let config = config_with_relay(&server.uri());
        let store = CredentialStore::with_file(&session_file).unwrap();
        let (auth, _events) = build_session(&config, store);

        let url = auth.login().await.unwrap();
        let state = query_map(&url)["state"].clone();
        auth.complete_login(granted("AQDcode123", Some(&state)))
            .await
            .unwrap();

        // Reading the session file back gives the same credential with
        // an absolute expiry an hour out.
        let persisted = CredentialStore::with_file(&session_file).unwrap();
        assert_eq!(persisted.access_token(), Some("abc"));

        let expires_at = persisted.credential().unwrap().expires_at;
        let ttl = expires_at
            .duration_since(SystemTime::now())
            .expect("expiry lies in the future");
        assert!(ttl <= Duration::from_secs(3600));
        assert!(ttl > Duration::from_secs(3590));

        assert!(persisted.is_valid_at(expires_at - Duration::from_millis(1)));
        assert!(!persisted.is_valid_at(expires_at));
        assert!(!persisted.is_valid_at(SystemTime::now() + Duration::from_secs(3601)));
    }

    #[tokio::test]
    async fn relay_failure_logs_out() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/token"))
            .respond_with(ResponseTemplate::new(500).set_body_json(serde_json::json!({
                "error": "server_error"
            })))
            .mount(&server)
            .await;

        let config = config_with_relay(&server.uri());
        let (auth, mut events) = build_session(&config, CredentialStore::new());

        let url = auth.login().await.unwrap();
        let state = query_map(&url)["state"].clone();
        let result = auth.complete_login(granted("AQDcode123", Some(&state))).await;

        match result.unwrap_err() {
            Error::ExchangeFailed(exchange::Error::Failed { status, .. }) => {
                assert_eq!(status.as_u16(), 500);
            }
            e => panic!("expected ExchangeFailed, got: {e:?}"),
        }
        assert!(!auth.is_authenticated().await);
        assert_eq!(drain(&mut events), vec![Event::LoggedOut]);
    }
}

mod session {
    use super::*;

    #[tokio::test]
    async fn store_loaded_with_a_valid_credential_is_authenticated() {
        let mut store = CredentialStore::new();
        store.save("abc", Duration::from_secs(3600)).unwrap();

        let config = Config::with_client_id(CLIENT_ID.to_string());
        let (auth, mut events) = build_session(&config, store);

        assert!(auth.is_authenticated().await);
        assert_eq!(auth.access_token().await.as_deref(), Some("abc"));
        assert!(drain(&mut events).is_empty());
    }

    #[tokio::test]
    async fn expired_credential_is_retired_on_query() {
        let mut store = CredentialStore::new();
        store.save("stale", Duration::ZERO).unwrap();

        let config = Config::with_client_id(CLIENT_ID.to_string());
        let (auth, mut events) = build_session(&config, store);

        assert!(!auth.is_authenticated().await);
        assert_eq!(drain(&mut events), vec![Event::LoggedOut]);
        assert!(auth.access_token().await.is_none());

        // Polling again finds no credential and stays quiet.
        assert!(!auth.is_authenticated().await);
        assert!(drain(&mut events).is_empty());
    }

    #[tokio::test]
    async fn logout_is_idempotent_and_always_signals() {
        let config = Config::with_client_id(CLIENT_ID.to_string());
        let (auth, mut events) = build_session(&config, CredentialStore::new());

        auth.logout().await;
        auth.logout().await;

        assert_eq!(drain(&mut events), vec![Event::LoggedOut, Event::LoggedOut]);
        assert_eq!(auth.state().await, SessionState::Anonymous);
    }
}
