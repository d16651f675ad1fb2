//! Discovery chain: email address → mail endpoint → authorization server.

use std::future::Future;

use reqwest::Client;
use tracing::{debug, info, instrument};
use url::Url;

use crate::auth_probe::probe_authorization_server;
use crate::dns::SrvResolver;
use crate::error::{DiscoveryStage, Error, Result};
use crate::types::{AuthServer, DiscoveryConfig, DiscoveryResult, EndpointMethod, SrvRecord};
use crate::well_known::{https_only_redirects, verify_endpoint, well_known_url};

/// Extracts the domain from an email address.
///
/// The address must contain exactly one `@` with a non-empty local part,
/// and the domain must contain at least one `.`.
///
/// # Errors
///
/// Returns [`Error::InvalidEmail`] otherwise.
pub fn extract_domain(email: &str) -> Result<&str> {
    let mut parts = email.split('@');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(local), Some(domain), None) if !local.is_empty() && domain.contains('.') => {
            Ok(domain)
        }
        _ => Err(Error::InvalidEmail(email.to_string())),
    }
}

/// Network capabilities the chain is built from.
///
/// Every method folds absence, timeouts and transport failures into `None`.
pub trait DiscoveryBackend: Send + Sync {
    /// Best SRV record for the configured service on `domain`.
    fn resolve_srv(&self, domain: &str) -> impl Future<Output = Option<SrvRecord>> + Send;

    /// Confirms `candidate` and returns the final URL after redirects.
    fn verify(&self, candidate: &Url) -> impl Future<Output = Option<Url>> + Send;

    /// Locates the authorization server protecting `endpoint`.
    fn probe_auth(&self, endpoint: &Url) -> impl Future<Output = Option<AuthServer>> + Send;
}

/// Endpoint strategies, tried in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EndpointStrategy {
    DnsSrv,
    WellKnown,
}

const ENDPOINT_CHAIN: [EndpointStrategy; 2] =
    [EndpointStrategy::DnsSrv, EndpointStrategy::WellKnown];

impl EndpointStrategy {
    const fn stage(self) -> DiscoveryStage {
        match self {
            Self::DnsSrv => DiscoveryStage::DnsSrv,
            Self::WellKnown => DiscoveryStage::WellKnown,
        }
    }

    const fn method(self) -> EndpointMethod {
        match self {
            Self::DnsSrv => EndpointMethod::DnsSrv,
            Self::WellKnown => EndpointMethod::WellKnown,
        }
    }

    async fn locate<B: DiscoveryBackend>(self, backend: &B, domain: &str) -> Option<Url> {
        let candidate = match self {
            Self::DnsSrv => {
                let record = backend.resolve_srv(domain).await?;
                well_known_url(&record.host, Some(record.port)).ok()?
            }
            Self::WellKnown => well_known_url(domain, None).ok()?,
        };

        let confirmed = backend.verify(&candidate).await;
        if confirmed.is_none() {
            debug!(%candidate, stage = %self.stage(), "Candidate not confirmed, falling through");
        }
        confirmed
    }
}

/// Runs the full discovery chain for `email`.
///
/// The endpoint is always resolved before the authorization server, and the
/// authorization server is only ever looked up on that endpoint. Failing to
/// find one is not an error.
///
/// # Errors
///
/// - [`Error::InvalidEmail`] before any network access
/// - [`Error::NotFound`] naming the domain and the last stage tried
#[instrument(skip_all)]
pub async fn discover_from_email<B: DiscoveryBackend>(
    backend: &B,
    email: &str,
) -> Result<DiscoveryResult> {
    let domain = extract_domain(email)?;
    debug!(%domain, "Starting endpoint discovery");
    let mut last_stage = DiscoveryStage::EmailParse;

    for strategy in ENDPOINT_CHAIN {
        last_stage = strategy.stage();
        let Some(endpoint) = strategy.locate(backend, domain).await else {
            continue;
        };

        info!(%endpoint, method = %last_stage, "Mail endpoint located");
        let auth_server = backend.probe_auth(&endpoint).await;
        match &auth_server {
            Some(server) => info!(
                issuer = %server.issuer,
                method = ?server.method,
                "Authorization server located"
            ),
            None => info!("No authorization server advertised"),
        }

        return Ok(DiscoveryResult {
            endpoint,
            endpoint_method: strategy.method(),
            auth_server,
        });
    }

    Err(Error::NotFound {
        domain: domain.to_string(),
        stage: last_stage,
    })
}

/// Production backend: system DNS plus a shared HTTP client.
#[derive(Debug, Clone)]
pub struct NetworkBackend {
    http: Client,
    resolver: SrvResolver,
    config: DiscoveryConfig,
}

impl NetworkBackend {
    /// Builds a backend from `config`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: DiscoveryConfig) -> Result<Self> {
        let http = Client::builder()
            .user_agent(config.user_agent.clone())
            .redirect(https_only_redirects())
            .build()?;
        Ok(Self {
            http,
            resolver: SrvResolver::from_system(),
            config,
        })
    }

    /// Probe settings in use.
    #[must_use]
    pub const fn config(&self) -> &DiscoveryConfig {
        &self.config
    }

    /// Runs [`discover_from_email`] with this backend.
    ///
    /// # Errors
    ///
    /// See [`discover_from_email`].
    pub async fn discover_from_email(&self, email: &str) -> Result<DiscoveryResult> {
        discover_from_email(self, email).await
    }
}

impl DiscoveryBackend for NetworkBackend {
    async fn resolve_srv(&self, domain: &str) -> Option<SrvRecord> {
        self.resolver
            .probe(&self.config.service, domain, self.config.dns_timeout)
            .await
    }

    async fn verify(&self, candidate: &Url) -> Option<Url> {
        verify_endpoint(&self.http, candidate, self.config.well_known_timeout).await
    }

    async fn probe_auth(&self, endpoint: &Url) -> Option<AuthServer> {
        probe_authorization_server(&self.http, endpoint, self.config.metadata_timeout).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Mutex;

    use proptest::prelude::*;

    use super::*;
    use crate::types::AuthServerMethod;

    #[derive(Default)]
    struct FakeBackend {
        srv: Option<SrvRecord>,
        confirmed: Vec<(String, String)>,
        auth: Option<AuthServer>,
        calls: Mutex<Vec<String>>,
    }

    impl FakeBackend {
        fn confirm(mut self, candidate: &str, final_url: &str) -> Self {
            self.confirmed
                .push((candidate.to_string(), final_url.to_string()));
            self
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl DiscoveryBackend for FakeBackend {
        async fn resolve_srv(&self, domain: &str) -> Option<SrvRecord> {
            self.calls.lock().unwrap().push(format!("srv {domain}"));
            self.srv.clone()
        }

        async fn verify(&self, candidate: &Url) -> Option<Url> {
            self.calls.lock().unwrap().push(format!("verify {candidate}"));
            self.confirmed
                .iter()
                .find(|(c, _)| c == candidate.as_str())
                .map(|(_, f)| Url::parse(f).unwrap())
        }

        async fn probe_auth(&self, endpoint: &Url) -> Option<AuthServer> {
            self.calls.lock().unwrap().push(format!("probe {endpoint}"));
            self.auth.clone()
        }
    }

    fn srv(host: &str, port: u16) -> Option<SrvRecord> {
        Some(SrvRecord {
            host: host.to_string(),
            port,
            priority: 10,
            weight: 10,
        })
    }

    #[test]
    fn test_extract_domain() {
        assert_eq!(extract_domain("user@example.com").unwrap(), "example.com");
        assert_eq!(extract_domain("a.b@mail.example.org").unwrap(), "mail.example.org");
    }

    #[test]
    fn test_extract_domain_rejects_malformed() {
        for input in ["", "user", "user@localhost", "a@b@example.com", "@example.com", "user@"] {
            let err = extract_domain(input).unwrap_err();
            assert!(matches!(err, Error::InvalidEmail(_)), "{input}");
            assert_eq!(err.stage(), Some(DiscoveryStage::EmailParse));
        }
    }

    #[tokio::test]
    async fn test_srv_then_protected_resource() {
        let backend = FakeBackend {
            srv: srv("jmap.example.com", 443),
            auth: Some(AuthServer::discovered(
                Url::parse("https://auth.example.com").unwrap(),
                AuthServerMethod::ProtectedResource,
            )),
            ..FakeBackend::default()
        }
        .confirm(
            "https://jmap.example.com/.well-known/jmap",
            "https://jmap.example.com/.well-known/jmap",
        );

        let result = discover_from_email(&backend, "user@example.com").await.unwrap();
        assert_eq!(
            result.endpoint.as_str(),
            "https://jmap.example.com/.well-known/jmap"
        );
        assert_eq!(result.endpoint_method, EndpointMethod::DnsSrv);
        let auth = result.auth_server.unwrap();
        assert_eq!(auth.issuer.as_str(), "https://auth.example.com/");
        assert_eq!(auth.method, AuthServerMethod::ProtectedResource);
    }

    #[tokio::test]
    async fn test_srv_port_is_kept_when_not_default() {
        let backend = FakeBackend {
            srv: srv("jmap.example.com", 8443),
            ..FakeBackend::default()
        }
        .confirm(
            "https://jmap.example.com:8443/.well-known/jmap",
            "https://jmap.example.com:8443/jmap/session",
        );

        let result = discover_from_email(&backend, "user@example.com").await.unwrap();
        assert_eq!(
            result.endpoint.as_str(),
            "https://jmap.example.com:8443/jmap/session"
        );
        assert!(result.auth_server.is_none());
    }

    #[tokio::test]
    async fn test_unverified_srv_falls_through_to_bare_domain() {
        let backend = FakeBackend {
            srv: srv("stale.example.com", 443),
            ..FakeBackend::default()
        }
        .confirm(
            "https://example.com/.well-known/jmap",
            "https://example.com/.well-known/jmap",
        );

        let result = discover_from_email(&backend, "user@example.com").await.unwrap();
        assert_eq!(result.endpoint_method, EndpointMethod::WellKnown);
        assert_eq!(
            backend.calls(),
            vec![
                "srv example.com",
                "verify https://stale.example.com/.well-known/jmap",
                "verify https://example.com/.well-known/jmap",
                "probe https://example.com/.well-known/jmap",
            ]
        );
    }

    #[tokio::test]
    async fn test_exhausted_chain_names_domain_and_stage() {
        let backend = FakeBackend::default();
        let err = discover_from_email(&backend, "user@example.com")
            .await
            .unwrap_err();

        assert!(matches!(
            &err,
            Error::NotFound { domain, stage: DiscoveryStage::WellKnown } if domain == "example.com"
        ));
        // No endpoint, so no authorization server probe.
        assert!(!backend.calls().iter().any(|c| c.starts_with("probe")));
    }

    #[tokio::test]
    async fn test_invalid_email_touches_no_network() {
        let backend = FakeBackend::default();
        let err = discover_from_email(&backend, "not-an-email").await.unwrap_err();
        assert!(matches!(err, Error::InvalidEmail(_)));
        assert!(backend.calls().is_empty());
    }

    proptest! {
        #[test]
        fn prop_extract_domain_returns_suffix(
            local in "[a-z0-9._+-]{1,20}",
            domain in "[a-z0-9-]{1,20}\\.[a-z]{2,10}",
        ) {
            let email = format!("{local}@{domain}");
            prop_assert_eq!(extract_domain(&email).unwrap(), domain.as_str());
        }

        #[test]
        fn prop_extract_domain_requires_single_at(input in "[^@]{0,30}") {
            prop_assert!(extract_domain(&input).is_err());
            let doubled = format!("{input}@a@b.c");
            prop_assert!(extract_domain(&doubled).is_err());
        }

        #[test]
        fn prop_extract_domain_requires_dot(local in "[a-z]{1,10}", domain in "[a-z0-9-]{1,20}") {
            let email = format!("{local}@{domain}");
            prop_assert!(extract_domain(&email).is_err());
        }
    }
}
