//! Error types for endpoint discovery.

use std::fmt;

use serde::Serialize;

/// Result type alias for discovery operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Stage of the discovery chain an error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum DiscoveryStage {
    /// Parsing the email address.
    EmailParse,
    /// DNS SRV lookup and verification of the advertised host.
    DnsSrv,
    /// Well-known endpoint on the bare domain.
    WellKnown,
}

impl DiscoveryStage {
    /// Stable name, as used in logs and serialized results.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::EmailParse => "email-parse",
            Self::DnsSrv => "dns-srv",
            Self::WellKnown => "well-known",
        }
    }
}

impl fmt::Display for DiscoveryStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Discovery errors.
///
/// Expected absence and transient network failures never surface here; the
/// probes fold them into "not found" and the chain moves on.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The input is not a usable email address.
    #[error("Invalid email format: {0}")]
    InvalidEmail(String),

    /// Every strategy was tried without locating an endpoint.
    #[error("No mail endpoint found for {domain} (last stage attempted: {stage})")]
    NotFound {
        /// Domain taken from the email address.
        domain: String,
        /// Last stage attempted.
        stage: DiscoveryStage,
    },

    /// HTTP client could not be built.
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),
}

impl Error {
    /// Domain the failed discovery was about, if one was extracted.
    #[must_use]
    pub fn domain(&self) -> Option<&str> {
        match self {
            Self::NotFound { domain, .. } => Some(domain),
            Self::InvalidEmail(_) | Self::Http(_) => None,
        }
    }

    /// Stage at which discovery stopped.
    #[must_use]
    pub const fn stage(&self) -> Option<DiscoveryStage> {
        match self {
            Self::InvalidEmail(_) => Some(DiscoveryStage::EmailParse),
            Self::NotFound { stage, .. } => Some(*stage),
            Self::Http(_) => None,
        }
    }
}
