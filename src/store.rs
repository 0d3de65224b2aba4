//! Credential and session state storage.
//!
//! [`CredentialStore`] owns everything a login leaves behind: the access
//! token with its absolute expiry, the profile document cached after the
//! first fetch, and the transient PKCE artifact of an in-flight login
//! attempt. It is constructed explicitly and passed to the session that
//! needs it; there is no ambient global state.
//!
//! The store can be memory-only ([`CredentialStore::new`]) or backed by a
//! JSON state file ([`CredentialStore::with_file`]) so a command-line run
//! survives process restarts. Everything is cleared as a unit on logout,
//! including the file.

use std::{
    fs, io,
    path::{Path, PathBuf},
    time::{Duration, SystemTime},
};

use serde::{Deserialize, Serialize};
use serde_with::{serde_as, TimestampMilliSeconds};
use thiserror::Error;
use veil::Redact;

#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("parsing JSON error: {0}")]
    JsonParse(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// An access token with its absolute expiry.
#[serde_as]
#[derive(Clone, Eq, PartialEq, Serialize, Deserialize, Redact)]
pub struct Credential {
    /// Bearer token for the streaming API.
    #[redact]
    pub access_token: String,

    /// When the token stops being valid.
    ///
    /// Stored as unix milliseconds, like the expiry the token exchange
    /// response is converted into.
    #[serde_as(as = "TimestampMilliSeconds<i64>")]
    pub expires_at: SystemTime,
}

/// Transient PKCE material for a single login attempt.
///
/// Created when the authorization URL is built and consumed exactly once
/// by the callback handler. Never reused across attempts: a new login
/// overwrites any previous artifact.
#[derive(Clone, Eq, PartialEq, Serialize, Deserialize, Redact)]
pub struct PkceArtifact {
    /// Anti-forgery nonce to match against the callback `state` parameter.
    pub state: String,

    /// Secret verifier, revealed only to the token relay.
    #[redact]
    pub code_verifier: String,
}

/// The persisted document. All fields optional; absent fields are simply
/// not written to disk.
#[derive(Debug, Default, Serialize, Deserialize)]
struct Document {
    #[serde(skip_serializing_if = "Option::is_none")]
    credential: Option<Credential>,

    #[serde(skip_serializing_if = "Option::is_none")]
    artifact: Option<PkceArtifact>,

    #[serde(skip_serializing_if = "Option::is_none")]
    profile: Option<serde_json::Value>,
}

/// Session state with an explicit lifecycle: starts empty, populated by
/// the authentication session, cleared by logout or detected expiry.
#[derive(Debug)]
pub struct CredentialStore {
    document: Document,
    path: Option<PathBuf>,
}

impl CredentialStore {
    /// Maximum size of the state file.
    ///
    /// Prevents an out-of-memory condition: the document is a token, a
    /// profile and some nonces, so anything larger is not ours.
    const MAX_FILE_SIZE: u64 = 64 * 1024;

    /// Creates an empty, memory-only store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            document: Document::default(),
            path: None,
        }
    }

    /// Opens a store backed by a JSON state file.
    ///
    /// A missing file yields an empty store; it is created on the first
    /// mutation. An existing file is read back in full.
    pub fn with_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let document = match fs::metadata(path) {
            Ok(attributes) => {
                if attributes.len() > Self::MAX_FILE_SIZE {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!("{} is too large", path.display()),
                    )
                    .into());
                }
                serde_json::from_str(&fs::read_to_string(path)?)?
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Document::default(),
            Err(e) => return Err(e.into()),
        };

        Ok(Self {
            document,
            path: Some(path.to_path_buf()),
        })
    }

    /// Stores a token, computing its absolute expiry from now.
    pub fn save(&mut self, access_token: &str, expires_in: Duration) -> Result<()> {
        self.document.credential = Some(Credential {
            access_token: access_token.to_owned(),
            expires_at: SystemTime::now() + expires_in,
        });
        self.persist()
    }

    #[must_use]
    pub fn credential(&self) -> Option<&Credential> {
        self.document.credential.as_ref()
    }

    /// The stored token, valid or not.
    ///
    /// Expiry is not checked here: an expired token still hits the API and
    /// is retired by the 401 it earns. [`is_valid`](Self::is_valid) is the
    /// gate for treating the session as authenticated.
    #[must_use]
    pub fn access_token(&self) -> Option<&str> {
        self.document
            .credential
            .as_ref()
            .map(|credential| credential.access_token.as_str())
    }

    /// Whether a token is present and not yet expired.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.is_valid_at(SystemTime::now())
    }

    /// [`is_valid`](Self::is_valid) against an explicit clock reading.
    ///
    /// A token is invalid from its expiry instant onwards.
    #[must_use]
    pub fn is_valid_at(&self, now: SystemTime) -> bool {
        self.document
            .credential
            .as_ref()
            .is_some_and(|credential| now < credential.expires_at)
    }

    /// Removes token, expiry, cached profile and any pending artifact.
    ///
    /// Idempotent; also removes the state file when one is configured.
    pub fn clear(&mut self) -> Result<()> {
        self.document = Document::default();

        if let Some(ref path) = self.path {
            if let Err(e) = fs::remove_file(path) {
                if e.kind() != io::ErrorKind::NotFound {
                    return Err(e.into());
                }
            }
        }

        Ok(())
    }

    /// Stores the PKCE artifact of a new login attempt, replacing any
    /// previous one.
    pub fn save_artifact(&mut self, artifact: PkceArtifact) -> Result<()> {
        self.document.artifact = Some(artifact);
        self.persist()
    }

    #[must_use]
    pub fn artifact(&self) -> Option<&PkceArtifact> {
        self.document.artifact.as_ref()
    }

    /// Consumes the pending PKCE artifact.
    ///
    /// The artifact is deleted whether or not the caller's login attempt
    /// goes on to succeed.
    pub fn take_artifact(&mut self) -> Result<Option<PkceArtifact>> {
        let artifact = self.document.artifact.take();
        if artifact.is_some() {
            self.persist()?;
        }
        Ok(artifact)
    }

    /// Caches the profile document fetched after login.
    pub fn cache_profile(&mut self, profile: serde_json::Value) -> Result<()> {
        self.document.profile = Some(profile);
        self.persist()
    }

    #[must_use]
    pub fn cached_profile(&self) -> Option<&serde_json::Value> {
        self.document.profile.as_ref()
    }

    fn persist(&self) -> Result<()> {
        if let Some(ref path) = self.path {
            fs::write(path, serde_json::to_vec_pretty(&self.document)?)?;
        }
        Ok(())
    }
}

impl Default for CredentialStore {
    fn default() -> Self {
        Self::new()
    }
}
