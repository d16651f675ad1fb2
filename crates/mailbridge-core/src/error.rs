//! Error types for the core library.

use thiserror::Error;

use crate::auth::{FlowError, TokenError};
use crate::config::ConfigError;
use crate::credentials::StoreError;

/// Errors that can occur in core operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration could not be loaded.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Credential file could not be read or written.
    #[error("Credential store error: {0}")]
    Store(#[from] StoreError),

    /// No valid token could be produced.
    #[error("Token error: {0}")]
    Token(#[from] TokenError),

    /// Interactive login failed.
    #[error("Login error: {0}")]
    Flow(#[from] FlowError),

    /// Endpoint discovery failed.
    #[error("Discovery error: {0}")]
    Discovery(#[from] mailbridge_discovery::Error),

    /// `OAuth2` protocol or transport failure.
    #[error("OAuth error: {0}")]
    OAuth(#[from] mailbridge_oauth::Error),

    /// HTTP client could not be built.
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),
}

impl Error {
    /// Returns true if only a new interactive login can fix this.
    #[must_use]
    pub fn requires_reauthentication(&self) -> bool {
        matches!(self, Self::Token(e) if e.requires_reauthentication())
    }
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;
