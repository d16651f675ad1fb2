//! Tests for adapter setup: session preparation and discovery entry point.

#![allow(clippy::unwrap_used)]

use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::Utc;
use mailbridge_core::discovery::Error as DiscoveryError;
use mailbridge_core::{
    BrowserLauncher, Config, CoordinatorRegistry, CredentialSet, Error, FlowStage, SessionAuth,
    TokenErrorKind, discover_endpoint, prepare_session,
};
use serde_json::json;
use tempfile::TempDir;
use url::Url;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Follows the authorization URL back to the loopback listener with a code,
/// or ignores it entirely.
#[derive(Default)]
struct Browser {
    follow: bool,
    opened: AtomicUsize,
}

impl Browser {
    fn following() -> Self {
        Self {
            follow: true,
            ..Self::default()
        }
    }

    fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }
}

impl BrowserLauncher for Browser {
    fn open(&self, url: &Url) -> io::Result<()> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        if !self.follow {
            return Ok(());
        }

        let query: HashMap<_, _> = url.query_pairs().into_owned().collect();
        let mut callback = Url::parse(&query["redirect_uri"]).unwrap();
        callback
            .query_pairs_mut()
            .append_pair("code", "setup-code")
            .append_pair("state", &query["state"]);
        tokio::spawn(async move {
            let _ = reqwest::get(callback).await;
        });
        Ok(())
    }
}

async fn issuer() -> MockServer {
    let server = MockServer::start().await;
    let issuer = server.uri();
    Mock::given(method("GET"))
        .and(path("/.well-known/openid-configuration"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "issuer": issuer,
            "authorization_endpoint": format!("{issuer}/authorize"),
            "token_endpoint": format!("{issuer}/token"),
        })))
        .mount(&server)
        .await;
    server
}

fn config(dir: &TempDir, vars: &[(&str, String)]) -> Config {
    let mut map: HashMap<String, String> = vars
        .iter()
        .map(|(k, v)| (format!("MAILBRIDGE_{k}"), v.clone()))
        .collect();
    map.insert(
        "MAILBRIDGE_SESSION_URL".to_string(),
        "https://jmap.example.com/.well-known/jmap".to_string(),
    );
    map.insert(
        "MAILBRIDGE_CREDENTIALS_PATH".to_string(),
        dir.path().join("credentials.json").display().to_string(),
    );
    Config::from_lookup(|key| map.get(key).cloned()).unwrap()
}

fn oidc_config(dir: &TempDir, server: &MockServer) -> Config {
    config(
        dir,
        &[
            ("AUTH_MODE", "oidc".to_string()),
            ("OIDC_ISSUER", server.uri()),
            ("OIDC_CLIENT_ID", "mailbridge".to_string()),
            ("OIDC_REDIRECT_URI", "http://127.0.0.1:0/callback".to_string()),
            ("CALLBACK_TIMEOUT_SECS", "1".to_string()),
        ],
    )
}

#[tokio::test]
async fn basic_mode_needs_no_login() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(
        &dir,
        &[
            ("USERNAME", "Aladdin".to_string()),
            ("PASSWORD", "open sesame".to_string()),
        ],
    );
    let browser = Browser::default();

    let auth = prepare_session(&config, &CoordinatorRegistry::new(), &browser)
        .await
        .unwrap();

    assert!(matches!(auth, SessionAuth::Basic { .. }));
    assert_eq!(
        auth.header_value().await.unwrap(),
        "Basic QWxhZGRpbjpvcGVuIHNlc2FtZQ=="
    );
    assert_eq!(browser.opened(), 0);
}

#[tokio::test]
async fn missing_credentials_trigger_one_login() {
    let server = issuer().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "fresh-access",
            "token_type": "Bearer",
            "expires_in": 3600,
            "refresh_token": "fresh-refresh",
        })))
        .expect(1)
        .mount(&server)
        .await;
    let dir = tempfile::tempdir().unwrap();
    let config = oidc_config(&dir, &server);
    let browser = Browser::following();

    let auth = prepare_session(&config, &CoordinatorRegistry::new(), &browser)
        .await
        .unwrap();

    assert_eq!(auth.mode(), "oidc");
    assert_eq!(auth.header_value().await.unwrap(), "Bearer fresh-access");
    assert_eq!(browser.opened(), 1);
    assert!(config.credential_store().load().await.unwrap().is_some());
}

#[tokio::test]
async fn stored_credentials_skip_login() {
    let server = issuer().await;
    let dir = tempfile::tempdir().unwrap();
    let config = oidc_config(&dir, &server);
    let stored = CredentialSet::new("stored-access")
        .with_refresh_token("stored-refresh")
        .with_expires_at(Utc::now().timestamp() + 3600);
    config.credential_store().save(&stored).await.unwrap();
    let browser = Browser::following();

    let auth = prepare_session(&config, &CoordinatorRegistry::new(), &browser)
        .await
        .unwrap();

    assert_eq!(auth.header_value().await.unwrap(), "Bearer stored-access");
    assert_eq!(browser.opened(), 0);
}

#[tokio::test]
async fn abandoned_login_reports_callback_stage() {
    let server = issuer().await;
    let dir = tempfile::tempdir().unwrap();
    let config = oidc_config(&dir, &server);
    let browser = Browser::default();

    let err = prepare_session(&config, &CoordinatorRegistry::new(), &browser)
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Flow(ref e) if e.stage() == FlowStage::Callback));
    assert!(!err.requires_reauthentication());
    assert_eq!(browser.opened(), 1);
}

#[tokio::test]
async fn transient_refresh_failure_does_not_start_login() {
    let server = issuer().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(503))
        .expect(1)
        .mount(&server)
        .await;
    let dir = tempfile::tempdir().unwrap();
    let config = oidc_config(&dir, &server);
    let expired = CredentialSet::new("old-access")
        .with_refresh_token("refresh-1")
        .with_expires_at(Utc::now().timestamp() - 10);
    config.credential_store().save(&expired).await.unwrap();
    let browser = Browser::following();

    let err = prepare_session(&config, &CoordinatorRegistry::new(), &browser)
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Token(ref e) if e.kind() == TokenErrorKind::Transient));
    assert!(!err.requires_reauthentication());
    assert_eq!(browser.opened(), 0);
}

#[tokio::test]
async fn discovery_rejects_invalid_address_before_network() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(
        &dir,
        &[("AUTH_MODE", "bearer".to_string()), ("BEARER_TOKEN", "t".to_string())],
    );

    let err = discover_endpoint(&config, "not-an-address").await.unwrap_err();
    assert!(matches!(err, Error::Discovery(DiscoveryError::InvalidEmail(_))));
    assert!(!err.requires_reauthentication());
}
