//! `Authorization` header source for the mail session client.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use secrecy::{ExposeSecret, SecretString};

use super::refresh::{RefreshCoordinator, TokenError};

/// How requests to the mail session are authenticated.
#[derive(Debug, Clone)]
pub enum SessionAuth {
    /// HTTP Basic with a fixed username and password.
    Basic {
        /// Account name.
        username: String,
        /// Account password or app password.
        password: SecretString,
    },
    /// A static bearer token.
    Bearer(SecretString),
    /// Tokens from the login flow, refreshed on demand.
    Oidc(RefreshCoordinator),
}

impl SessionAuth {
    /// Value for the `Authorization` header of the next request.
    ///
    /// Only the OIDC mode touches the network, and only when the current
    /// access token is about to expire.
    ///
    /// # Errors
    ///
    /// Returns an error if OIDC credentials are missing or cannot be
    /// refreshed.
    pub async fn header_value(&self) -> Result<String, TokenError> {
        match self {
            Self::Basic { username, password } => {
                Ok(basic_header(username, password.expose_secret()))
            }
            Self::Bearer(token) => Ok(format!("Bearer {}", token.expose_secret())),
            Self::Oidc(coordinator) => coordinator.authorization_header_value().await,
        }
    }

    /// Short mode name for logs.
    #[must_use]
    pub const fn mode(&self) -> &'static str {
        match self {
            Self::Basic { .. } => "basic",
            Self::Bearer(_) => "bearer",
            Self::Oidc(_) => "oidc",
        }
    }
}

fn basic_header(username: &str, password: &str) -> String {
    format!("Basic {}", STANDARD.encode(format!("{username}:{password}")))
}
