//! Discovery data model.

use std::time::Duration;

use serde::Serialize;
use url::Url;

/// Default SRV service label (`_jmap._tcp.<domain>`).
pub const DEFAULT_SERVICE: &str = "jmap";

/// A DNS SRV record. Consumed immediately, never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SrvRecord {
    /// Target host name, without the trailing dot.
    pub host: String,
    /// Target port.
    pub port: u16,
    /// Lower is preferred.
    pub priority: u16,
    /// Higher is preferred among equal priorities.
    pub weight: u16,
}

/// How the mail endpoint was located.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum EndpointMethod {
    /// SRV record, confirmed by the well-known verifier.
    DnsSrv,
    /// Well-known resource on the bare domain.
    WellKnown,
    /// Supplied by configuration.
    Manual,
}

/// How the authorization server was located.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum AuthServerMethod {
    /// RFC 9728 protected resource metadata.
    ProtectedResource,
    /// `WWW-Authenticate` challenge on the endpoint.
    WwwAuthenticate,
    /// OIDC discovery on a conventional subdomain.
    WellKnownOidc,
    /// Supplied by configuration.
    Manual,
}

/// Authorization server identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthServer {
    /// Issuer URL.
    pub issuer: Url,
    /// Client id, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    /// How the issuer was found.
    pub method: AuthServerMethod,
}

impl AuthServer {
    pub(crate) const fn discovered(issuer: Url, method: AuthServerMethod) -> Self {
        Self {
            issuer,
            client_id: None,
            method,
        }
    }
}

/// Combined discovery outcome.
///
/// `auth_server` is only ever found by probing `endpoint`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiscoveryResult {
    /// Mail-access session endpoint.
    pub endpoint: Url,
    /// How the endpoint was located.
    pub endpoint_method: EndpointMethod,
    /// Authorization server, when one could be identified.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_server: Option<AuthServer>,
}

impl DiscoveryResult {
    /// Builds a result from operator-supplied settings.
    #[must_use]
    pub fn manual(endpoint: Url, issuer: Option<Url>, client_id: Option<String>) -> Self {
        Self {
            endpoint,
            endpoint_method: EndpointMethod::Manual,
            auth_server: issuer.map(|issuer| AuthServer {
                issuer,
                client_id,
                method: AuthServerMethod::Manual,
            }),
        }
    }
}

/// Probe settings. Each probe has its own timeout.
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    /// SRV service label.
    pub service: String,
    /// Bound on the SRV query.
    pub dns_timeout: Duration,
    /// Bound on each well-known verification request.
    pub well_known_timeout: Duration,
    /// Bound on each authorization-server probe step.
    pub metadata_timeout: Duration,
    /// User agent for HTTP probes.
    pub user_agent: String,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            service: DEFAULT_SERVICE.to_string(),
            dns_timeout: Duration::from_secs(5),
            well_known_timeout: Duration::from_secs(5),
            metadata_timeout: Duration::from_secs(5),
            user_agent: format!("mailbridge/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl DiscoveryConfig {
    /// Uses the same timeout for every probe.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.dns_timeout = timeout;
        self.well_known_timeout = timeout;
        self.metadata_timeout = timeout;
        self
    }
}
