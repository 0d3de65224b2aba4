//! PKCE material for the OAuth 2.0 authorization code flow.
//!
//! The authorization code is bound to a locally held secret (the code
//! verifier) through a public derived value (the code challenge), so the
//! token relay never needs a client secret. The `state` nonce protects the
//! callback against forgery.
//!
//! All randomness comes from [`rand::thread_rng`], which is a CSPRNG.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use rand::{distributions::Alphanumeric, Rng, RngCore};
use sha2::{Digest, Sha256};

/// Number of random bytes underlying a code verifier.
///
/// RFC 7636 requires between 32 and 96 bytes of entropy; 32 bytes encode
/// to the minimum verifier length of 43 characters.
const VERIFIER_BYTES: usize = 32;

/// Length of the `state` anti-forgery nonce in characters.
const STATE_LENGTH: usize = 16;

/// Generates a new code verifier.
///
/// Returns 32 random bytes, base64url-encoded without padding.
#[must_use]
pub fn generate_verifier() -> String {
    let mut bytes = [0u8; VERIFIER_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Derives the code challenge for a verifier.
///
/// The challenge is the SHA-256 digest of the verifier's ASCII bytes,
/// base64url-encoded without padding (the `S256` challenge method).
/// Deterministic for a given verifier.
#[must_use]
pub fn derive_challenge(verifier: &str) -> String {
    let digest = Sha256::digest(verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(digest)
}

/// Generates a `state` nonce for one authorization attempt.
#[must_use]
pub fn generate_state() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(STATE_LENGTH)
        .map(char::from)
        .collect()
}
