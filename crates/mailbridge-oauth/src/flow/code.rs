//! Authorization Code Flow implementation.

use super::pkce::random_urlsafe;
use super::{OAuthClient, PkceChallenge};
use crate::error::{Error, Result};
use crate::token::CredentialSet;
use url::Url;

/// Authorization Code Flow with PKCE for `OAuth2`.
///
/// Every flow carries its own `S256` PKCE pair and anti-CSRF `state`, both
/// generated on construction and never reused across flows.
#[derive(Debug)]
pub struct AuthorizationCodeFlow {
    client: OAuthClient,
    pkce: PkceChallenge,
    state: String,
}

impl AuthorizationCodeFlow {
    /// Creates a new authorization code flow.
    #[must_use]
    pub fn new(client: OAuthClient) -> Self {
        Self {
            client,
            pkce: PkceChallenge::generate(),
            state: random_urlsafe(32),
        }
    }

    /// Builds the authorization URL for user consent.
    ///
    /// The user should be redirected to this URL to authorize the application.
    ///
    /// # Arguments
    ///
    /// * `scope` - Space separated scopes to request; omitted when empty
    ///
    /// # Errors
    ///
    /// Returns an error if no redirect URI is configured.
    pub fn authorization_url(&self, scope: &str) -> Result<Url> {
        let redirect_uri = self
            .client
            .redirect_uri
            .as_deref()
            .ok_or_else(|| Error::InvalidConfig("redirect URI is required".to_string()))?;

        let mut url = self.client.metadata.authorization_endpoint.clone();

        {
            let mut pairs = url.query_pairs_mut();
            pairs
                .append_pair("response_type", "code")
                .append_pair("client_id", &self.client.client_id)
                .append_pair("redirect_uri", redirect_uri);

            if !scope.trim().is_empty() {
                pairs.append_pair("scope", scope.trim());
            }

            pairs
                .append_pair("state", &self.state)
                .append_pair("code_challenge", self.pkce.challenge())
                .append_pair("code_challenge_method", self.pkce.method());
        }

        Ok(url)
    }

    /// Checks the `state` echoed back on the redirect.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StateMismatch`] if the state is missing or differs
    /// from the one sent in the authorization URL.
    pub fn verify_state(&self, returned: Option<&str>) -> Result<()> {
        match returned {
            Some(state) if constant_time_eq(state.as_bytes(), self.state.as_bytes()) => Ok(()),
            _ => Err(Error::StateMismatch),
        }
    }

    /// Exchanges the authorization code for tokens, presenting the PKCE verifier.
    ///
    /// # Errors
    ///
    /// Returns an error if the token exchange fails.
    pub async fn exchange_code(&self, code: &str) -> Result<CredentialSet> {
        self.client.exchange_code(code, self.pkce.verifier()).await
    }

    /// Returns the anti-CSRF state sent with the authorization request.
    #[must_use]
    pub fn state(&self) -> &str {
        &self.state
    }

    /// Returns the PKCE pair used by this flow.
    #[must_use]
    pub const fn pkce(&self) -> &PkceChallenge {
        &self.pkce
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
