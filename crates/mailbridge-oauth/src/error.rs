//! Error types for `OAuth2` operations.

use std::io;
use std::time::Duration;

/// Result type alias for `OAuth2` operations.
pub type Result<T> = std::result::Result<T, Error>;

/// `OAuth2` error types.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// HTTP request error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON parsing error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// `OAuth2` error from server.
    #[error("OAuth2 error: {error} - {description}")]
    OAuth {
        /// Error code (e.g., `invalid_grant`).
        error: String,
        /// Human-readable description.
        description: String,
    },

    /// No refresh token available.
    #[error("No refresh token available")]
    NoRefreshToken,

    /// Invalid token response.
    #[error("Invalid token response: {0}")]
    InvalidResponse(String),

    /// Issuer metadata could not be discovered or failed validation.
    #[error("Issuer metadata error for {issuer}: {reason}")]
    Metadata {
        /// Issuer that was queried.
        issuer: String,
        /// What went wrong.
        reason: String,
    },

    /// Authorization timeout.
    #[error("Authorization timed out after {0:?}")]
    Timeout(Duration),

    /// User denied authorization.
    #[error("User denied authorization")]
    AccessDenied,

    /// The `state` returned on the callback differs from the one sent.
    #[error("Authorization state mismatch (possible CSRF attack)")]
    StateMismatch,

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// URL parsing error.
    #[error("URL error: {0}")]
    UrlError(#[from] url::ParseError),
}

impl Error {
    /// Creates an OAuth error from error code and description.
    #[must_use]
    pub fn oauth_error(error: impl Into<String>, description: impl Into<String>) -> Self {
        Self::OAuth {
            error: error.into(),
            description: description.into(),
        }
    }

    /// Creates a metadata error for the given issuer.
    #[must_use]
    pub fn metadata(issuer: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Metadata {
            issuer: issuer.into(),
            reason: reason.into(),
        }
    }

    /// Returns true if the authorization server rejected the grant itself.
    ///
    /// An `invalid_grant` answer to a refresh means the refresh token is dead
    /// and only a new interactive login can recover.
    #[must_use]
    pub fn is_invalid_grant(&self) -> bool {
        matches!(self, Self::OAuth { error, .. } if error == "invalid_grant")
    }
}
