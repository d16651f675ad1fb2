//! PKCE (Proof Key for Code Exchange) implementation for `OAuth2`.
//!
//! PKCE (RFC 7636) binds an authorization code to the client that requested
//! it. Only the `S256` method is implemented; `plain` is never offered.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::Rng;
use secrecy::{ExposeSecret, SecretString};
use sha2::{Digest, Sha256};

/// The only code challenge method this crate sends.
pub const CODE_CHALLENGE_METHOD: &str = "S256";

/// PKCE code challenge and verifier pair.
#[derive(Debug, Clone)]
pub struct PkceChallenge {
    verifier: SecretString,
    challenge: String,
}

impl PkceChallenge {
    /// Generates a new PKCE challenge.
    ///
    /// Creates a random 43-character verifier and its SHA256 challenge.
    #[must_use]
    pub fn generate() -> Self {
        let verifier = random_urlsafe(32);
        let challenge = Self::compute_challenge(&verifier);

        Self {
            verifier: SecretString::from(verifier),
            challenge,
        }
    }

    /// Computes the code challenge from a verifier using SHA256.
    #[must_use]
    pub fn compute_challenge(verifier: &str) -> String {
        let hash = Sha256::digest(verifier.as_bytes());
        URL_SAFE_NO_PAD.encode(hash)
    }

    /// Returns the verifier.
    #[must_use]
    pub fn verifier(&self) -> &str {
        self.verifier.expose_secret()
    }

    /// Returns the challenge.
    #[must_use]
    pub fn challenge(&self) -> &str {
        &self.challenge
    }

    /// Returns the method. Always `S256`.
    #[must_use]
    pub const fn method(&self) -> &'static str {
        CODE_CHALLENGE_METHOD
    }
}

/// Generates `len` random bytes and encodes them as unpadded base64url.
pub(crate) fn random_urlsafe(len: usize) -> String {
    let mut rng = rand::thread_rng();
    let random_bytes: Vec<u8> = (0..len).map(|_| rng.r#gen::<u8>()).collect();
    URL_SAFE_NO_PAD.encode(random_bytes)
}
