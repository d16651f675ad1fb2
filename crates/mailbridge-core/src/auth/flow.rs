//! Interactive authorization code login.

use std::io;
use std::time::Duration;

use mailbridge_oauth::{
    AuthorizationCodeFlow, CallbackListener, CredentialSet, OAuthClient, metadata,
};
use reqwest::Client;
use secrecy::SecretString;
use serde::Serialize;
use tracing::{info, warn};
use url::Url;

use crate::credentials::{CredentialStore, StoreError};

/// Scope requested when none is configured.
pub const DEFAULT_SCOPE: &str = "openid email offline_access";

/// Loopback redirect used when none is configured.
pub const DEFAULT_REDIRECT_URI: &str = "http://127.0.0.1:8976/callback";

/// How long the user gets to finish logging in.
pub const DEFAULT_CALLBACK_TIMEOUT: Duration = Duration::from_secs(300);

/// Opens a URL for the user.
pub trait BrowserLauncher: Send + Sync {
    /// Opens `url` in a browser.
    ///
    /// # Errors
    ///
    /// Returns an error if no browser could be started.
    fn open(&self, url: &Url) -> io::Result<()>;
}

/// The platform's default browser.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemBrowser;

impl BrowserLauncher for SystemBrowser {
    fn open(&self, url: &Url) -> io::Result<()> {
        opener::open_browser(url.as_str()).map_err(io::Error::other)
    }
}

/// Step at which the login stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum FlowStage {
    /// Issuer metadata lookup or authorization request construction.
    Discovery,
    /// Waiting for the browser redirect.
    Callback,
    /// Comparing the returned state with the one sent.
    StateValidation,
    /// Trading the code for tokens.
    TokenExchange,
    /// Saving the new credentials.
    Persist,
}

impl FlowStage {
    /// Stable name for logs and messages.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Discovery => "discovery",
            Self::Callback => "callback",
            Self::StateValidation => "state-validation",
            Self::TokenExchange => "token-exchange",
            Self::Persist => "persist",
        }
    }
}

impl std::fmt::Display for FlowStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Login failure, tagged with the stage it happened in.
#[derive(Debug, thiserror::Error)]
pub enum FlowError {
    /// Issuer metadata could not be obtained or used.
    #[error("Login failed during discovery: {0}")]
    Discovery(mailbridge_oauth::Error),

    /// No usable redirect arrived.
    #[error("Login failed waiting for the authorization callback: {0}")]
    Callback(mailbridge_oauth::Error),

    /// The returned state did not match. Never retried silently.
    #[error("Login aborted: authorization state mismatch (possible CSRF attack)")]
    StateValidation,

    /// The token endpoint rejected the code.
    #[error("Login failed exchanging the authorization code: {0}")]
    TokenExchange(mailbridge_oauth::Error),

    /// Tokens were issued but could not be saved.
    #[error("Login succeeded but credentials could not be saved: {0}")]
    Persist(StoreError),
}

impl FlowError {
    /// Stage the flow stopped at.
    #[must_use]
    pub const fn stage(&self) -> FlowStage {
        match self {
            Self::Discovery(_) => FlowStage::Discovery,
            Self::Callback(_) => FlowStage::Callback,
            Self::StateValidation => FlowStage::StateValidation,
            Self::TokenExchange(_) => FlowStage::TokenExchange,
            Self::Persist(_) => FlowStage::Persist,
        }
    }
}

/// Settings for one login.
#[derive(Debug, Clone)]
pub struct AuthorizationFlowOptions {
    /// Issuer URL.
    pub issuer: Url,
    /// Registered client id.
    pub client_id: String,
    /// Client secret for confidential clients.
    pub client_secret: Option<SecretString>,
    /// Space-separated scopes.
    pub scope: String,
    /// Loopback redirect URI; port `0` picks a free port.
    pub redirect_uri: Url,
    /// How long to wait for the redirect.
    pub callback_timeout: Duration,
    /// Bound on the issuer metadata request.
    pub metadata_timeout: Duration,
    http: Client,
}

impl AuthorizationFlowOptions {
    /// Options with the default scope and timeouts.
    #[must_use]
    pub fn new(issuer: Url, client_id: impl Into<String>, redirect_uri: Url) -> Self {
        Self {
            issuer,
            client_id: client_id.into(),
            client_secret: None,
            scope: DEFAULT_SCOPE.to_string(),
            redirect_uri,
            callback_timeout: DEFAULT_CALLBACK_TIMEOUT,
            metadata_timeout: Duration::from_secs(10),
            http: Client::new(),
        }
    }

    /// Sets the client secret.
    #[must_use]
    pub fn with_client_secret(mut self, secret: SecretString) -> Self {
        self.client_secret = Some(secret);
        self
    }

    /// Sets the requested scopes.
    #[must_use]
    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = scope.into();
        self
    }

    /// Sets the callback timeout.
    #[must_use]
    pub const fn with_callback_timeout(mut self, timeout: Duration) -> Self {
        self.callback_timeout = timeout;
        self
    }

    /// Sets the metadata request timeout.
    #[must_use]
    pub const fn with_metadata_timeout(mut self, timeout: Duration) -> Self {
        self.metadata_timeout = timeout;
        self
    }

    /// Uses a preconfigured HTTP client.
    #[must_use]
    pub fn with_http_client(mut self, http: Client) -> Self {
        self.http = http;
        self
    }
}

/// Runs the login once and stores the resulting credentials.
///
/// The state returned on the redirect must match the one generated here;
/// otherwise the code is never exchanged. There is no retry; callers restart
/// the whole flow.
///
/// # Errors
///
/// Returns a [`FlowError`] naming the stage that failed.
pub async fn perform_authorization_flow(
    options: &AuthorizationFlowOptions,
    store: &CredentialStore,
    browser: &dyn BrowserLauncher,
) -> Result<CredentialSet, FlowError> {
    info!(issuer = %options.issuer, "Starting authorization flow");

    let metadata = metadata::discover(&options.http, &options.issuer, options.metadata_timeout)
        .await
        .map_err(FlowError::Discovery)?;

    let listener = CallbackListener::bind(&options.redirect_uri)
        .await
        .map_err(FlowError::Callback)?;

    let mut client = OAuthClient::new(&options.client_id, metadata)
        .with_redirect_uri(listener.redirect_uri().as_str())
        .with_http_client(options.http.clone());
    if let Some(secret) = &options.client_secret {
        client = client.with_client_secret(secret.clone());
    }

    let flow = AuthorizationCodeFlow::new(client);
    let authorization_url = flow
        .authorization_url(&options.scope)
        .map_err(FlowError::Discovery)?;

    match browser.open(&authorization_url) {
        Ok(()) => info!("Opened browser for authorization"),
        Err(e) => warn!(
            "Could not open a browser ({e}); visit this URL to continue: {authorization_url}"
        ),
    }

    let params = listener
        .wait(options.callback_timeout)
        .await
        .map_err(FlowError::Callback)?;

    if flow.verify_state(params.state.as_deref()).is_err() {
        warn!("Authorization callback carried an unexpected state");
        return Err(FlowError::StateValidation);
    }
    params.check_error().map_err(FlowError::Callback)?;
    let code = params.authorization_code().map_err(FlowError::Callback)?;

    let credentials = flow
        .exchange_code(code)
        .await
        .map_err(FlowError::TokenExchange)?;

    store.save(&credentials).await.map_err(FlowError::Persist)?;
    info!(expires_at = ?credentials.expires_at, "Authorization complete");
    Ok(credentials)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_names() {
        assert_eq!(FlowError::StateValidation.stage().as_str(), "state-validation");
        assert_eq!(
            FlowError::TokenExchange(mailbridge_oauth::Error::NoRefreshToken)
                .stage()
                .to_string(),
            "token-exchange"
        );
        assert_eq!(
            serde_json::to_value(FlowStage::Discovery).unwrap(),
            "discovery"
        );
    }

    #[test]
    fn test_debug_hides_client_secret() {
        let options = AuthorizationFlowOptions::new(
            Url::parse("https://auth.example.com").unwrap(),
            "client",
            Url::parse(DEFAULT_REDIRECT_URI).unwrap(),
        )
        .with_client_secret(SecretString::from("very-secret".to_string()));
        let printed = format!("{options:?}");
        assert!(printed.contains("client"));
        assert!(!printed.contains("very-secret"));
    }

    #[test]
    fn test_default_options() {
        let options = AuthorizationFlowOptions::new(
            Url::parse("https://auth.example.com").unwrap(),
            "client",
            Url::parse(DEFAULT_REDIRECT_URI).unwrap(),
        );
        assert_eq!(options.scope, DEFAULT_SCOPE);
        assert_eq!(options.callback_timeout, Duration::from_secs(300));
        assert!(options.client_secret.is_none());
    }
}
