//! Authorization server prober.
//!
//! Three independent attempts against an already confirmed resource, in
//! order:
//!
//! 1. RFC 9728 protected resource metadata at the resource origin
//! 2. the `WWW-Authenticate` challenge of an unauthenticated request
//! 3. OIDC discovery on conventional subdomains of the base domain
//!
//! Each attempt is bounded by its own timeout and a failure simply moves on
//! to the next one.

mod challenge;

pub use challenge::{BearerChallenge, parse_bearer_challenge};

use std::future::Future;
use std::time::Duration;

use mailbridge_oauth::metadata;
use reqwest::header::WWW_AUTHENTICATE;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::debug;
use url::Url;

use crate::types::{AuthServer, AuthServerMethod};

/// RFC 9728 well-known suffix.
pub const PROTECTED_RESOURCE_PATH: &str = "/.well-known/oauth-protected-resource";

/// Subdomains tried, in order, when the resource publishes nothing.
pub const CONVENTIONAL_SUBDOMAINS: [&str; 4] = ["auth", "login", "sso", "id"];

#[derive(Debug, Deserialize)]
struct ProtectedResourceMetadata {
    #[serde(default)]
    authorization_servers: Vec<String>,
}

/// Runs the three probe steps against `resource` and returns the first hit.
pub async fn probe_authorization_server(
    http: &Client,
    resource: &Url,
    timeout: Duration,
) -> Option<AuthServer> {
    if let Some(issuer) = bounded(timeout, from_protected_resource(http, resource, timeout)).await
    {
        return Some(AuthServer::discovered(
            issuer,
            AuthServerMethod::ProtectedResource,
        ));
    }

    if let Some(issuer) = bounded(timeout, from_challenge(http, resource, timeout)).await {
        return Some(AuthServer::discovered(
            issuer,
            AuthServerMethod::WwwAuthenticate,
        ));
    }

    for candidate in conventional_issuers(resource) {
        if let Some(issuer) = bounded(timeout, from_oidc_discovery(http, &candidate, timeout)).await
        {
            return Some(AuthServer::discovered(
                issuer,
                AuthServerMethod::WellKnownOidc,
            ));
        }
    }

    debug!(%resource, "No authorization server advertised");
    None
}

/// Step 1: first entry of `authorization_servers` in the resource metadata.
pub async fn from_protected_resource(
    http: &Client,
    resource: &Url,
    timeout: Duration,
) -> Option<Url> {
    let url = protected_resource_url(resource)?;
    let response = http
        .get(url.clone())
        .timeout(timeout)
        .send()
        .await
        .inspect_err(|e| debug!(%url, "Protected resource metadata request failed: {e}"))
        .ok()?;

    if !response.status().is_success() {
        debug!(%url, status = %response.status(), "No protected resource metadata");
        return None;
    }

    let document: ProtectedResourceMetadata = response
        .json()
        .await
        .inspect_err(|e| debug!(%url, "Unreadable protected resource metadata: {e}"))
        .ok()?;

    let first = document.authorization_servers.into_iter().next()?;
    secure_issuer(&first)
}

/// Step 2: issuer from the `Bearer` challenge of a 401 response.
///
/// Uses the `issuer` parameter, or `realm` when it is itself an absolute
/// URL.
pub async fn from_challenge(http: &Client, resource: &Url, timeout: Duration) -> Option<Url> {
    let response = http
        .get(resource.clone())
        .timeout(timeout)
        .send()
        .await
        .inspect_err(|e| debug!(%resource, "Challenge request failed: {e}"))
        .ok()?;

    if response.status() != StatusCode::UNAUTHORIZED {
        debug!(%resource, status = %response.status(), "Resource did not challenge");
        return None;
    }

    response
        .headers()
        .get_all(WWW_AUTHENTICATE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .filter_map(parse_bearer_challenge)
        .find_map(|challenge| {
            challenge
                .issuer
                .as_deref()
                .and_then(secure_issuer)
                .or_else(|| challenge.realm.as_deref().and_then(secure_issuer))
        })
}

/// Step 3 helper: accept `candidate` if it serves a discovery document that
/// names an issuer.
async fn from_oidc_discovery(http: &Client, candidate: &Url, timeout: Duration) -> Option<Url> {
    match metadata::discover(http, candidate, timeout).await {
        Ok(found) => secure_issuer(&found.issuer),
        Err(e) => {
            debug!(%candidate, "No issuer metadata: {e}");
            None
        }
    }
}

/// Issuer candidates on conventional subdomains of the resource's base domain.
#[must_use]
pub fn conventional_issuers(resource: &Url) -> Vec<Url> {
    let Some(base) = resource.host_str().and_then(base_domain) else {
        return Vec::new();
    };

    CONVENTIONAL_SUBDOMAINS
        .iter()
        .filter_map(|sub| Url::parse(&format!("https://{sub}.{base}")).ok())
        .collect()
}

/// `jmap.example.com` → `example.com`; two-label hosts are already a base.
/// IP literals have no base domain.
fn base_domain(host: &str) -> Option<&str> {
    if host.parse::<std::net::IpAddr>().is_ok() || host.starts_with('[') {
        return None;
    }
    let labels = host.split('.').count();
    match labels {
        0 | 1 => None,
        2 => Some(host),
        _ => host.split_once('.').map(|(_, rest)| rest),
    }
}

fn protected_resource_url(resource: &Url) -> Option<Url> {
    let origin = resource.origin();
    if !origin.is_tuple() {
        return None;
    }
    Url::parse(&format!(
        "{}{PROTECTED_RESOURCE_PATH}",
        origin.ascii_serialization()
    ))
    .ok()
}

fn secure_issuer(value: &str) -> Option<Url> {
    Url::parse(value)
        .ok()
        .filter(metadata::is_secure)
        .filter(|url| !url.cannot_be_a_base())
}

async fn bounded<T>(timeout: Duration, step: impl Future<Output = Option<T>>) -> Option<T> {
    tokio::time::timeout(timeout, step).await.ok().flatten()
}
