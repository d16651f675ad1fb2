//! `OAuth2` token types and expiry arithmetic.

use crate::error::{Error, Result};
use chrono::Utc;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

/// Seconds before expiry at which an access token is already treated as stale.
pub const EXPIRY_BUFFER_SECS: i64 = 60;

/// A full set of credentials as issued by the authorization server.
///
/// Always replaced as a whole; never patched field by field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialSet {
    /// Access token presented to the mail API.
    #[serde(with = "secret")]
    pub access_token: SecretString,
    /// Refresh token for obtaining new access tokens.
    #[serde(default, with = "optional_secret", skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<SecretString>,
    /// Absolute expiry, seconds since the Unix epoch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
    /// OIDC identity token, if one was issued.
    #[serde(default, with = "optional_secret", skip_serializing_if = "Option::is_none")]
    pub id_token: Option<SecretString>,
}

impl CredentialSet {
    /// Creates a credential set holding only an access token.
    #[must_use]
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            access_token: SecretString::from(access_token.into()),
            refresh_token: None,
            expires_at: None,
            id_token: None,
        }
    }

    /// Builds a credential set from a token endpoint response received at `now`.
    ///
    /// # Errors
    ///
    /// Returns an error if the response carries an empty access token or a
    /// token type other than `Bearer`.
    pub fn from_response(response: TokenResponse, now: i64) -> Result<Self> {
        if response.access_token.expose_secret().is_empty() {
            return Err(Error::InvalidResponse("empty access_token".to_string()));
        }
        if !response.token_type.eq_ignore_ascii_case("bearer") {
            return Err(Error::InvalidResponse(format!(
                "unsupported token_type {}",
                response.token_type
            )));
        }

        Ok(Self {
            access_token: response.access_token,
            refresh_token: response.refresh_token,
            expires_at: response
                .expires_in
                .map(|secs| now.saturating_add(i64::try_from(secs).unwrap_or(i64::MAX))),
            id_token: response.id_token,
        })
    }

    /// Sets the refresh token.
    #[must_use]
    pub fn with_refresh_token(mut self, refresh_token: impl Into<String>) -> Self {
        self.refresh_token = Some(SecretString::from(refresh_token.into()));
        self
    }

    /// Sets the absolute expiry (seconds since epoch).
    #[must_use]
    pub const fn with_expires_at(mut self, expires_at: i64) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// Sets the identity token.
    #[must_use]
    pub fn with_id_token(mut self, id_token: impl Into<String>) -> Self {
        self.id_token = Some(SecretString::from(id_token.into()));
        self
    }

    /// Seconds of lifetime left at `now`, or `None` when no expiry is known.
    ///
    /// Saturates instead of overflowing for nonsensical stored expiries.
    #[must_use]
    pub fn remaining_lifetime(&self, now: i64) -> Option<i64> {
        self.expires_at.map(|exp| exp.saturating_sub(now))
    }

    /// Returns true if the access token can still be used at `now`.
    ///
    /// A token needs strictly more than [`EXPIRY_BUFFER_SECS`] left. A set
    /// without an expiry is always considered valid; the server will reject
    /// it if that is wrong.
    #[must_use]
    pub fn is_valid_at(&self, now: i64) -> bool {
        self.remaining_lifetime(now)
            .is_none_or(|remaining| remaining > EXPIRY_BUFFER_SECS)
    }

    /// Returns true if the access token is usable right now.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.is_valid_at(Utc::now().timestamp())
    }

    /// Returns the refresh token if available.
    ///
    /// # Errors
    ///
    /// Returns an error if no refresh token is available.
    pub fn refresh_token(&self) -> Result<&str> {
        self.refresh_token
            .as_ref()
            .map(ExposeSecret::expose_secret)
            .ok_or(Error::NoRefreshToken)
    }

    /// Value for an HTTP `Authorization` header.
    #[must_use]
    pub fn authorization_header_value(&self) -> String {
        format!("Bearer {}", self.access_token.expose_secret())
    }
}

impl PartialEq for CredentialSet {
    fn eq(&self, other: &Self) -> bool {
        let same = |a: &Option<SecretString>, b: &Option<SecretString>| match (a, b) {
            (Some(a), Some(b)) => a.expose_secret() == b.expose_secret(),
            (None, None) => true,
            _ => false,
        };
        self.access_token.expose_secret() == other.access_token.expose_secret()
            && same(&self.refresh_token, &other.refresh_token)
            && self.expires_at == other.expires_at
            && same(&self.id_token, &other.id_token)
    }
}

impl Eq for CredentialSet {}

/// Token response from `OAuth2` server.
#[derive(Debug, Deserialize)]
pub struct TokenResponse {
    /// Access token.
    #[serde(with = "secret")]
    pub access_token: SecretString,
    /// Token type.
    #[serde(default = "default_token_type")]
    pub token_type: String,
    /// Expires in seconds.
    pub expires_in: Option<u64>,
    /// Refresh token.
    #[serde(default, with = "optional_secret")]
    pub refresh_token: Option<SecretString>,
    /// OIDC identity token.
    #[serde(default, with = "optional_secret")]
    pub id_token: Option<SecretString>,
    /// Scope.
    pub scope: Option<String>,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

/// Error response from `OAuth2` server.
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorResponse {
    /// Error code.
    pub error: String,
    /// Error description.
    #[serde(default)]
    pub error_description: String,
}

impl ErrorResponse {
    /// Converts to an Error.
    #[must_use]
    pub fn into_error(self) -> Error {
        Error::oauth_error(self.error, self.error_description)
    }
}

// Secrets are written in the clear only when persisted by the credential store.
mod secret {
    use secrecy::{ExposeSecret, SecretString};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        value: &SecretString,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(value.expose_secret())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<SecretString, D::Error> {
        String::deserialize(deserializer).map(SecretString::from)
    }
}

mod optional_secret {
    use secrecy::{ExposeSecret, SecretString};
    use serde::{Deserialize, Deserializer, Serializer};

    #[allow(clippy::ref_option)]
    pub fn serialize<S: Serializer>(
        value: &Option<SecretString>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(value) => serializer.serialize_some(value.expose_secret()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<SecretString>, D::Error> {
        Option::<String>::deserialize(deserializer).map(|value| value.map(SecretString::from))
    }
}
