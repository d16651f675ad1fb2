//! Authorization server metadata discovery.
//!
//! Fetches OpenID Connect Discovery 1.0 documents, falling back to
//! RFC 8414 authorization server metadata, and validates the parts the
//! authorization-code flow relies on.

use std::net::IpAddr;
use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;
use tracing::debug;
use url::{Host, Url};

use crate::error::{Error, Result};
use crate::flow::pkce::CODE_CHALLENGE_METHOD;

/// OIDC discovery suffix, appended to the issuer path.
pub const OIDC_CONFIGURATION_PATH: &str = ".well-known/openid-configuration";

/// RFC 8414 suffix, inserted between the issuer host and path.
pub const OAUTH_SERVER_METADATA_PATH: &str = ".well-known/oauth-authorization-server";

/// Validated authorization server metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuerMetadata {
    /// Issuer identifier, exactly as published by the server.
    pub issuer: String,
    /// Authorization endpoint.
    pub authorization_endpoint: Url,
    /// Token endpoint.
    pub token_endpoint: Url,
    /// Token revocation endpoint (RFC 7009).
    pub revocation_endpoint: Option<Url>,
    /// RP-initiated logout endpoint.
    pub end_session_endpoint: Option<Url>,
    /// Scopes the server advertises.
    pub scopes_supported: Vec<String>,
    /// PKCE methods the server advertises. Empty when not published.
    pub code_challenge_methods_supported: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RawMetadata {
    #[serde(default)]
    issuer: String,
    authorization_endpoint: Option<String>,
    token_endpoint: Option<String>,
    revocation_endpoint: Option<String>,
    end_session_endpoint: Option<String>,
    #[serde(default)]
    scopes_supported: Vec<String>,
    #[serde(default)]
    code_challenge_methods_supported: Vec<String>,
}

impl IssuerMetadata {
    /// Creates metadata from known endpoints, for servers that do not publish
    /// a discovery document.
    ///
    /// # Errors
    ///
    /// Returns an error if a URL is invalid or not secure.
    pub fn new(
        issuer: impl Into<String>,
        authorization_endpoint: impl AsRef<str>,
        token_endpoint: impl AsRef<str>,
    ) -> Result<Self> {
        let issuer = issuer.into();
        let authorization_endpoint = secure_url(&issuer, authorization_endpoint.as_ref())?;
        let token_endpoint = secure_url(&issuer, token_endpoint.as_ref())?;

        Ok(Self {
            issuer,
            authorization_endpoint,
            token_endpoint,
            revocation_endpoint: None,
            end_session_endpoint: None,
            scopes_supported: Vec::new(),
            code_challenge_methods_supported: Vec::new(),
        })
    }

    /// Parses and validates a discovery document fetched for `expected_issuer`.
    ///
    /// # Errors
    ///
    /// Returns an error if the document is malformed, names a different
    /// issuer, lacks the required endpoints, or cannot do `S256` PKCE.
    pub fn from_document(expected_issuer: &Url, body: &str) -> Result<Self> {
        let raw: RawMetadata = serde_json::from_str(body)?;
        let expected = expected_issuer.as_str();

        if raw.issuer.trim().is_empty() {
            return Err(Error::metadata(expected, "document has no issuer"));
        }
        if trim_slash(&raw.issuer) != trim_slash(expected) {
            return Err(Error::metadata(
                expected,
                format!("document names issuer {}", raw.issuer),
            ));
        }

        let authorization_endpoint = raw
            .authorization_endpoint
            .ok_or_else(|| Error::metadata(expected, "missing authorization_endpoint"))?;
        let token_endpoint = raw
            .token_endpoint
            .ok_or_else(|| Error::metadata(expected, "missing token_endpoint"))?;

        if !raw.code_challenge_methods_supported.is_empty()
            && !raw
                .code_challenge_methods_supported
                .iter()
                .any(|m| m == CODE_CHALLENGE_METHOD)
        {
            return Err(Error::metadata(expected, "server does not support S256 PKCE"));
        }

        let optional = |value: Option<String>| -> Result<Option<Url>> {
            value.map(|v| secure_url(expected, &v)).transpose()
        };

        Ok(Self {
            authorization_endpoint: secure_url(expected, &authorization_endpoint)?,
            token_endpoint: secure_url(expected, &token_endpoint)?,
            revocation_endpoint: optional(raw.revocation_endpoint)?,
            end_session_endpoint: optional(raw.end_session_endpoint)?,
            issuer: raw.issuer,
            scopes_supported: raw.scopes_supported,
            code_challenge_methods_supported: raw.code_challenge_methods_supported,
        })
    }
}

/// Discovers and validates metadata for `issuer`.
///
/// Tries the OIDC discovery document first and the RFC 8414 document
/// second. Each request is bounded by `timeout`.
///
/// # Errors
///
/// Returns the error of the last attempt if neither document yields valid
/// metadata.
pub async fn discover(http: &Client, issuer: &Url, timeout: Duration) -> Result<IssuerMetadata> {
    if !is_secure(issuer) {
        return Err(Error::metadata(issuer.as_str(), "issuer must use https"));
    }

    let mut last_error = None;
    for url in discovery_urls(issuer)? {
        debug!(%url, "Fetching issuer metadata");
        match fetch_document(http, issuer, &url, timeout).await {
            Ok(metadata) => return Ok(metadata),
            Err(e) => {
                debug!(%url, error = %e, "Issuer metadata attempt failed");
                last_error = Some(e);
            }
        }
    }

    Err(last_error.unwrap_or_else(|| Error::metadata(issuer.as_str(), "no discovery document")))
}

async fn fetch_document(
    http: &Client,
    issuer: &Url,
    url: &Url,
    timeout: Duration,
) -> Result<IssuerMetadata> {
    let response = http
        .get(url.clone())
        .header(reqwest::header::ACCEPT, "application/json")
        .timeout(timeout)
        .send()
        .await?;

    let status = response.status();
    if !status.is_success() {
        return Err(Error::metadata(
            issuer.as_str(),
            format!("{url} returned HTTP {status}"),
        ));
    }

    let body = response.text().await?;
    IssuerMetadata::from_document(issuer, &body)
}

/// Candidate discovery document locations for `issuer`, in preference order.
///
/// # Errors
///
/// Returns an error if the issuer cannot be used as a base URL.
pub fn discovery_urls(issuer: &Url) -> Result<Vec<Url>> {
    if issuer.cannot_be_a_base() {
        return Err(Error::metadata(issuer.as_str(), "issuer is not a base URL"));
    }

    let path = issuer.path().trim_end_matches('/');

    let mut oidc = issuer.clone();
    oidc.set_path(&format!("{path}/{OIDC_CONFIGURATION_PATH}"));
    oidc.set_query(None);

    let mut rfc8414 = issuer.clone();
    rfc8414.set_path(&format!("/{OAUTH_SERVER_METADATA_PATH}{path}"));
    rfc8414.set_query(None);

    Ok(vec![oidc, rfc8414])
}

/// Returns true for `https` URLs, and for `http` URLs on a loopback host.
#[must_use]
pub fn is_secure(url: &Url) -> bool {
    match url.scheme() {
        "https" => true,
        "http" => is_loopback(url),
        _ => false,
    }
}

fn is_loopback(url: &Url) -> bool {
    match url.host() {
        Some(Host::Domain(domain)) => domain.eq_ignore_ascii_case("localhost"),
        Some(Host::Ipv4(ip)) => IpAddr::V4(ip).is_loopback(),
        Some(Host::Ipv6(ip)) => IpAddr::V6(ip).is_loopback(),
        None => false,
    }
}

fn secure_url(issuer: &str, value: &str) -> Result<Url> {
    let url = Url::parse(value)?;
    if is_secure(&url) {
        Ok(url)
    } else {
        Err(Error::metadata(issuer, format!("endpoint {url} must use https")))
    }
}

fn trim_slash(value: &str) -> &str {
    value.trim_end_matches('/')
}
