//! `OAuth2` authorization flows.

pub mod callback;
mod code;
pub(crate) mod pkce;

pub use callback::{CallbackListener, CallbackParams};
pub use code::AuthorizationCodeFlow;
pub use pkce::{CODE_CHALLENGE_METHOD, PkceChallenge};

use crate::error::Result;
use crate::metadata::IssuerMetadata;
use crate::token::{CredentialSet, ErrorResponse, TokenResponse};
use chrono::Utc;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use std::collections::HashMap;
use tracing::debug;

/// Common `OAuth2` client configuration.
#[derive(Debug, Clone)]
pub struct OAuthClient {
    /// Client ID registered with the authorization server.
    pub client_id: String,
    /// Client secret (optional for public clients).
    pub client_secret: Option<SecretString>,
    /// Redirect URI for authorization code flow.
    pub redirect_uri: Option<String>,
    /// Authorization server endpoints.
    pub metadata: IssuerMetadata,
    /// HTTP client.
    http_client: Client,
}

impl OAuthClient {
    /// Creates a new OAuth client.
    #[must_use]
    pub fn new(client_id: impl Into<String>, metadata: IssuerMetadata) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: None,
            redirect_uri: None,
            metadata,
            http_client: Client::new(),
        }
    }

    /// Sets the client secret.
    #[must_use]
    pub fn with_client_secret(mut self, secret: SecretString) -> Self {
        self.client_secret = Some(secret);
        self
    }

    /// Sets the redirect URI.
    #[must_use]
    pub fn with_redirect_uri(mut self, uri: impl Into<String>) -> Self {
        self.redirect_uri = Some(uri.into());
        self
    }

    /// Uses a preconfigured HTTP client (timeouts, proxies, user agent).
    #[must_use]
    pub fn with_http_client(mut self, http_client: Client) -> Self {
        self.http_client = http_client;
        self
    }

    /// Refreshes an access token using the refresh token in `credentials`.
    ///
    /// Refresh tokens are not always rotated: when the server does not return
    /// a new one, the previous refresh token is carried forward.
    ///
    /// # Errors
    ///
    /// Returns an error if the refresh fails or if there is no refresh token.
    pub async fn refresh(&self, credentials: &CredentialSet) -> Result<CredentialSet> {
        let refresh_token = credentials.refresh_token()?;

        let mut params = HashMap::new();
        params.insert("grant_type", "refresh_token");
        params.insert("refresh_token", refresh_token);

        debug!(token_endpoint = %self.metadata.token_endpoint, "Refreshing access token");
        let mut new_credentials = self.token_request(params).await?;

        // Preserve refresh token if not returned
        if new_credentials.refresh_token.is_none() {
            new_credentials
                .refresh_token
                .clone_from(&credentials.refresh_token);
        }

        Ok(new_credentials)
    }

    /// Exchanges an authorization code for tokens, sending the configured
    /// redirect URI.
    ///
    /// # Errors
    ///
    /// Returns an error if the exchange fails.
    pub(crate) async fn exchange_code(
        &self,
        code: &str,
        code_verifier: &str,
    ) -> Result<CredentialSet> {
        let mut params = HashMap::new();
        params.insert("grant_type", "authorization_code");
        params.insert("code", code);
        params.insert("code_verifier", code_verifier);

        if let Some(uri) = self.redirect_uri.as_deref() {
            params.insert("redirect_uri", uri);
        }

        debug!(token_endpoint = %self.metadata.token_endpoint, "Exchanging authorization code");
        self.token_request(params).await
    }

    async fn token_request<'a>(
        &'a self,
        mut params: HashMap<&'a str, &'a str>,
    ) -> Result<CredentialSet> {
        params.insert("client_id", &self.client_id);

        if let Some(secret) = &self.client_secret {
            params.insert("client_secret", secret.expose_secret());
        }

        let response = self
            .http_client
            .post(self.metadata.token_endpoint.clone())
            .form(&params)
            .send()
            .await?;

        if !response.status().is_success() {
            let error: ErrorResponse = response.json().await?;
            return Err(error.into_error());
        }

        let token_response: TokenResponse = response.json().await?;
        CredentialSet::from_response(token_response, Utc::now().timestamp())
    }
}
