//! Well-known endpoint verifier.

use std::time::Duration;

use reqwest::redirect::Policy;
use reqwest::{Client, StatusCode};
use tracing::debug;
use url::Url;

/// Well-known JMAP session resource (RFC 8620 §2.2).
pub const JMAP_WELL_KNOWN_PATH: &str = "/.well-known/jmap";

/// Default port for `https`; omitted from built URLs.
pub const DEFAULT_HTTPS_PORT: u16 = 443;

/// Redirects followed while verifying an endpoint.
pub const MAX_REDIRECTS: usize = 5;

/// Redirect policy for verification: at most [`MAX_REDIRECTS`] hops, and a
/// hop to anything other than `https` is not followed. The redirect response
/// itself is returned instead.
#[must_use]
pub fn https_only_redirects() -> Policy {
    redirects_within("https")
}

fn redirects_within(scheme: &'static str) -> Policy {
    Policy::custom(move |attempt| {
        if attempt.previous().len() >= MAX_REDIRECTS {
            attempt.error("too many redirects")
        } else if attempt.url().scheme() == scheme {
            attempt.follow()
        } else {
            attempt.stop()
        }
    })
}

/// Well-known URL on `host`, with `port` only when it is not the default.
///
/// # Errors
///
/// Returns an error if `host` cannot form a URL.
pub fn well_known_url(host: &str, port: Option<u16>) -> Result<Url, url::ParseError> {
    match port {
        Some(port) if port != DEFAULT_HTTPS_PORT => {
            Url::parse(&format!("https://{host}:{port}{JMAP_WELL_KNOWN_PATH}"))
        }
        _ => Url::parse(&format!("https://{host}{JMAP_WELL_KNOWN_PATH}")),
    }
}

/// Statuses that confirm an endpoint exists. An endpoint asking for
/// credentials is still an endpoint.
#[must_use]
pub fn confirms_endpoint(status: StatusCode) -> bool {
    status.is_success() || status == StatusCode::UNAUTHORIZED
}

/// Checks that `candidate` answers like a mail endpoint.
///
/// Only `https` is ever attempted. Returns the final URL after redirects,
/// which may differ from `candidate`; any other status, timeout or network
/// error yields `None`. `http` should be built with [`https_only_redirects`].
pub async fn verify_endpoint(http: &Client, candidate: &Url, timeout: Duration) -> Option<Url> {
    verify_over(http, candidate, timeout, "https").await
}

async fn verify_over(
    http: &Client,
    candidate: &Url,
    timeout: Duration,
    scheme: &str,
) -> Option<Url> {
    if candidate.scheme() != scheme {
        debug!(%candidate, "Refusing to verify a non-{scheme} endpoint");
        return None;
    }

    debug!(%candidate, "Verifying well-known endpoint");
    let response = match http.get(candidate.clone()).timeout(timeout).send().await {
        Ok(response) => response,
        Err(e) if e.is_timeout() => {
            debug!(%candidate, ?timeout, "Well-known verification timed out");
            return None;
        }
        Err(e) => {
            debug!(%candidate, "Well-known verification failed: {e}");
            return None;
        }
    };

    confirmed_location(candidate, response.status(), response.url(), scheme)
}

/// Final URL of a verification response, if the response confirms an
/// endpoint and never left `scheme`.
fn confirmed_location(
    candidate: &Url,
    status: StatusCode,
    final_url: &Url,
    scheme: &str,
) -> Option<Url> {
    if !confirms_endpoint(status) {
        debug!(%candidate, %status, "Well-known endpoint not confirmed");
        return None;
    }
    if final_url.scheme() != scheme {
        debug!(%candidate, %final_url, "Redirected to a non-{scheme} endpoint");
        return None;
    }

    debug!(%candidate, %final_url, %status, "Well-known endpoint confirmed");
    Some(final_url.clone())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use wiremock::matchers::{any, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn plain_client() -> Client {
        Client::builder()
            .redirect(redirects_within("http"))
            .build()
            .unwrap()
    }

    async fn redirect(server: &MockServer, from: &str, to: &str) {
        Mock::given(method("GET"))
            .and(path(from))
            .respond_with(ResponseTemplate::new(302).insert_header("Location", to))
            .mount(server)
            .await;
    }

    #[test]
    fn test_well_known_url_omits_default_port() {
        assert_eq!(
            well_known_url("jmap.example.com", Some(443)).unwrap().as_str(),
            "https://jmap.example.com/.well-known/jmap"
        );
        assert_eq!(
            well_known_url("jmap.example.com", Some(8443)).unwrap().as_str(),
            "https://jmap.example.com:8443/.well-known/jmap"
        );
        assert_eq!(
            well_known_url("example.com", None).unwrap().as_str(),
            "https://example.com/.well-known/jmap"
        );
    }

    #[test]
    fn test_confirming_statuses() {
        assert!(confirms_endpoint(StatusCode::OK));
        assert!(confirms_endpoint(StatusCode::UNAUTHORIZED));
        assert!(!confirms_endpoint(StatusCode::FORBIDDEN));
        assert!(!confirms_endpoint(StatusCode::NOT_FOUND));
        assert!(!confirms_endpoint(StatusCode::INTERNAL_SERVER_ERROR));
    }

    #[tokio::test]
    async fn test_plain_http_is_never_requested() {
        let server = MockServer::start().await;
        Mock::given(any())
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let candidate = Url::parse(&format!("{}{JMAP_WELL_KNOWN_PATH}", server.uri())).unwrap();
        let found = verify_endpoint(&Client::new(), &candidate, Duration::from_secs(1)).await;
        assert!(found.is_none());
    }

    #[tokio::test]
    async fn test_unreachable_host_is_not_found() {
        // Port 9 on loopback is almost never listening; a refused connection
        // must fold into "not found".
        let candidate = Url::parse("https://127.0.0.1:9/.well-known/jmap").unwrap();
        let found = verify_endpoint(&Client::new(), &candidate, Duration::from_secs(1)).await;
        assert!(found.is_none());
    }

    #[test]
    fn test_confirmed_location_requires_status_and_scheme() {
        let candidate = Url::parse("https://example.com/.well-known/jmap").unwrap();
        let moved = Url::parse("https://jmap.example.com/session").unwrap();
        let downgraded = Url::parse("http://jmap.example.com/session").unwrap();

        assert_eq!(
            confirmed_location(&candidate, StatusCode::UNAUTHORIZED, &moved, "https"),
            Some(moved.clone())
        );
        assert_eq!(
            confirmed_location(&candidate, StatusCode::OK, &candidate, "https"),
            Some(candidate.clone())
        );
        assert!(confirmed_location(&candidate, StatusCode::NOT_FOUND, &moved, "https").is_none());
        assert!(confirmed_location(&candidate, StatusCode::OK, &downgraded, "https").is_none());
    }

    #[tokio::test]
    async fn test_redirect_to_unauthorized_returns_final_url() {
        let server = MockServer::start().await;
        redirect(&server, JMAP_WELL_KNOWN_PATH, "/jmap/session").await;
        Mock::given(method("GET"))
            .and(path("/jmap/session"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&server)
            .await;

        let candidate = Url::parse(&format!("{}{JMAP_WELL_KNOWN_PATH}", server.uri())).unwrap();
        let found = verify_over(&plain_client(), &candidate, Duration::from_secs(1), "http")
            .await
            .unwrap();
        assert_eq!(found.as_str(), format!("{}/jmap/session", server.uri()));
    }

    #[tokio::test]
    async fn test_forbidden_endpoint_is_not_confirmed() {
        let server = MockServer::start().await;
        Mock::given(any())
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let candidate = Url::parse(&format!("{}{JMAP_WELL_KNOWN_PATH}", server.uri())).unwrap();
        let found = verify_over(&plain_client(), &candidate, Duration::from_secs(1), "http").await;
        assert!(found.is_none());
    }

    #[tokio::test]
    async fn test_redirect_loop_is_not_confirmed() {
        let server = MockServer::start().await;
        redirect(&server, JMAP_WELL_KNOWN_PATH, JMAP_WELL_KNOWN_PATH).await;

        let candidate = Url::parse(&format!("{}{JMAP_WELL_KNOWN_PATH}", server.uri())).unwrap();
        let found = verify_over(&plain_client(), &candidate, Duration::from_secs(1), "http").await;
        assert!(found.is_none());
        let requests = server.received_requests().await.unwrap();
        assert!(requests.len() <= MAX_REDIRECTS);
    }

    #[tokio::test]
    async fn test_https_policy_does_not_follow_plain_http_hop() {
        let server = MockServer::start().await;
        redirect(&server, "/start", &format!("{}/target", server.uri())).await;
        Mock::given(method("GET"))
            .and(path("/target"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let http = Client::builder()
            .redirect(https_only_redirects())
            .build()
            .unwrap();
        let response = http
            .get(format!("{}/start", server.uri()))
            .send()
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(response.url().path(), "/start");
    }
}
