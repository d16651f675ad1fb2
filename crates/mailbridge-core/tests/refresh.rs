//! Integration tests for the refresh coordinator.
//!
//! A wiremock server plays the issuer; credentials live in a temp dir.

#![allow(clippy::unwrap_used)]

use std::time::Duration;

use chrono::Utc;
use mailbridge_core::{
    CredentialSet, CredentialStore, RefreshCoordinator, RefreshSettings, TokenError, TokenErrorKind,
};
use secrecy::ExposeSecret;
use serde_json::json;
use tempfile::TempDir;
use tokio::task::JoinSet;
use url::Url;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

struct Fixture {
    server: MockServer,
    store: CredentialStore,
    _dir: TempDir,
}

impl Fixture {
    async fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let store = CredentialStore::new(dir.path().join("credentials.json"));
        Self {
            server: MockServer::start().await,
            store,
            _dir: dir,
        }
    }

    async fn expect_metadata(&self, hits: u64) {
        let issuer = self.server.uri();
        Mock::given(method("GET"))
            .and(path("/.well-known/openid-configuration"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "issuer": issuer,
                "authorization_endpoint": format!("{issuer}/authorize"),
                "token_endpoint": format!("{issuer}/token"),
            })))
            .expect(hits)
            .mount(&self.server)
            .await;
    }

    async fn expect_refresh(&self, response: ResponseTemplate, hits: u64) {
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("grant_type=refresh_token"))
            .and(body_string_contains("refresh_token=refresh-1"))
            .respond_with(response)
            .expect(hits)
            .mount(&self.server)
            .await;
    }

    fn coordinator(&self) -> RefreshCoordinator {
        let issuer = Url::parse(&self.server.uri()).unwrap();
        let settings = RefreshSettings::new(issuer, "mailbridge")
            .with_metadata_timeout(Duration::from_secs(5));
        RefreshCoordinator::new(settings, self.store.clone())
    }
}

fn expiring_in(secs: i64) -> CredentialSet {
    CredentialSet::new("old-access")
        .with_refresh_token("refresh-1")
        .with_expires_at(Utc::now().timestamp() + secs)
}

fn issued(access_token: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "access_token": access_token,
        "token_type": "Bearer",
        "expires_in": 3600,
    }))
}

#[tokio::test]
async fn concurrent_callers_share_one_refresh() {
    let fx = Fixture::new().await;
    fx.expect_metadata(1).await;
    fx.expect_refresh(issued("new-access").set_delay(Duration::from_millis(300)), 1)
        .await;
    fx.store.save(&expiring_in(-10)).await.unwrap();

    let coordinator = fx.coordinator();
    let mut callers = JoinSet::new();
    for _ in 0..16 {
        let coordinator = coordinator.clone();
        callers.spawn(async move { coordinator.ensure_valid_token().await });
    }

    let mut results = Vec::new();
    while let Some(joined) = callers.join_next().await {
        results.push(joined.unwrap().unwrap());
    }

    assert_eq!(results.len(), 16);
    for credentials in &results {
        assert_eq!(credentials, &results[0]);
        assert_eq!(credentials.access_token.expose_secret(), "new-access");
        // Not rotated by the server, so carried forward.
        assert_eq!(credentials.refresh_token().unwrap(), "refresh-1");
    }
    assert_eq!(fx.store.load().await.unwrap().unwrap(), results[0]);
}

#[tokio::test]
async fn valid_token_needs_no_network() {
    let fx = Fixture::new().await;
    fx.expect_metadata(0).await;
    fx.expect_refresh(issued("unused"), 0).await;
    fx.store.save(&expiring_in(3600)).await.unwrap();

    let credentials = fx.coordinator().ensure_valid_token().await.unwrap();
    assert_eq!(credentials.access_token.expose_secret(), "old-access");
}

#[tokio::test]
async fn token_inside_expiry_buffer_is_refreshed() {
    let fx = Fixture::new().await;
    fx.expect_metadata(1).await;
    fx.expect_refresh(issued("new-access"), 1).await;
    fx.store.save(&expiring_in(60)).await.unwrap();

    let header = fx.coordinator().authorization_header_value().await.unwrap();
    assert_eq!(header, "Bearer new-access");
}

#[tokio::test]
async fn rotated_refresh_token_is_stored() {
    let fx = Fixture::new().await;
    fx.expect_metadata(1).await;
    fx.expect_refresh(
        ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "new-access",
            "token_type": "Bearer",
            "expires_in": 3600,
            "refresh_token": "refresh-2",
        })),
        1,
    )
    .await;
    fx.store.save(&expiring_in(-10)).await.unwrap();

    fx.coordinator().ensure_valid_token().await.unwrap();
    let stored = fx.store.load().await.unwrap().unwrap();
    assert_eq!(stored.refresh_token().unwrap(), "refresh-2");
}

#[tokio::test]
async fn metadata_is_fetched_once_until_reset() {
    let fx = Fixture::new().await;
    fx.expect_metadata(2).await;
    fx.expect_refresh(issued("new-access"), 3).await;
    let coordinator = fx.coordinator();

    for _ in 0..2 {
        fx.store.save(&expiring_in(-10)).await.unwrap();
        coordinator.ensure_valid_token().await.unwrap();
    }

    coordinator.reset().await;
    fx.store.save(&expiring_in(-10)).await.unwrap();
    coordinator.ensure_valid_token().await.unwrap();
}

#[tokio::test]
async fn missing_credentials() {
    let fx = Fixture::new().await;
    let err = fx.coordinator().ensure_valid_token().await.unwrap_err();
    assert!(matches!(err, TokenError::NoCredentials));
    assert!(err.requires_reauthentication());
}

#[tokio::test]
async fn expired_without_refresh_token_requires_login() {
    let fx = Fixture::new().await;
    fx.expect_metadata(0).await;
    let expired = CredentialSet::new("old-access").with_expires_at(Utc::now().timestamp() - 10);
    fx.store.save(&expired).await.unwrap();

    let err = fx.coordinator().ensure_valid_token().await.unwrap_err();
    assert!(matches!(err, TokenError::ReauthenticationRequired));
    assert_eq!(err.kind(), TokenErrorKind::ReauthenticationRequired);
}

#[tokio::test]
async fn rejected_refresh_is_reported_and_can_be_retried() {
    let fx = Fixture::new().await;
    fx.expect_metadata(1).await;
    fx.expect_refresh(
        ResponseTemplate::new(400).set_body_json(json!({
            "error": "invalid_grant",
            "error_description": "refresh token revoked",
        })),
        2,
    )
    .await;
    fx.store.save(&expiring_in(-10)).await.unwrap();
    let coordinator = fx.coordinator();

    let err = coordinator.ensure_valid_token().await.unwrap_err();
    assert!(matches!(err, TokenError::Refresh(_)));
    assert_eq!(err.kind(), TokenErrorKind::ReauthenticationRequired);

    // The failed attempt no longer counts as in flight.
    assert!(coordinator.ensure_valid_token().await.is_err());
    assert_eq!(
        fx.store.load().await.unwrap().unwrap().access_token.expose_secret(),
        "old-access"
    );
}

#[tokio::test]
async fn server_error_is_transient() {
    let fx = Fixture::new().await;
    fx.expect_metadata(1).await;
    fx.expect_refresh(ResponseTemplate::new(503), 1).await;
    fx.store.save(&expiring_in(-10)).await.unwrap();

    let err = fx.coordinator().ensure_valid_token().await.unwrap_err();
    assert_eq!(err.kind(), TokenErrorKind::Transient);
    assert!(!err.requires_reauthentication());
}

#[tokio::test]
async fn logout_clears_credentials() {
    let fx = Fixture::new().await;
    fx.store.save(&expiring_in(3600)).await.unwrap();
    let coordinator = fx.coordinator();

    coordinator.logout().await.unwrap();
    assert!(fx.store.load().await.unwrap().is_none());
    assert!(matches!(
        coordinator.ensure_valid_token().await,
        Err(TokenError::NoCredentials)
    ));
}
