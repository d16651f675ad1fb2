//! Single-flight token refresh.
//!
//! One [`RefreshCoordinator`] exists per (issuer, client id) pair. However
//! many tasks ask for a token at once, at most one refresh request is sent to
//! the authorization server; every caller waiting on it observes the same
//! outcome.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use mailbridge_oauth::{CredentialSet, IssuerMetadata, OAuthClient, metadata};
use reqwest::Client;
use secrecy::SecretString;
use serde::Serialize;
use tokio::sync::{Mutex, watch};
use tracing::{debug, info, warn};
use url::Url;

use crate::credentials::{CredentialStore, StoreError};

/// Default bound on the issuer metadata request.
pub const DEFAULT_METADATA_TIMEOUT: Duration = Duration::from_secs(10);

/// Broad classification of a [`TokenError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum TokenErrorKind {
    /// Nothing stored; the login flow has never run.
    NoCredentials,
    /// Only a new interactive login can recover.
    ReauthenticationRequired,
    /// The credential file could not be read or written.
    Storage,
    /// Network or server trouble; a later call may succeed.
    Transient,
}

/// Errors from [`RefreshCoordinator::ensure_valid_token`].
///
/// Cloneable so a single refresh outcome can be handed to every waiter.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TokenError {
    /// No stored credentials.
    #[error("No stored credentials; log in first")]
    NoCredentials,

    /// The access token expired and there is no refresh token.
    #[error("Token expired, re-authentication required")]
    ReauthenticationRequired,

    /// Credential store failure.
    #[error("Credential store error: {0}")]
    Store(Arc<StoreError>),

    /// Metadata discovery or the refresh grant failed.
    #[error("Token refresh failed: {0}")]
    Refresh(Arc<mailbridge_oauth::Error>),

    /// The refresh task ended without reporting an outcome.
    #[error("Token refresh aborted")]
    RefreshAborted,
}

impl TokenError {
    fn store(error: StoreError) -> Self {
        Self::Store(Arc::new(error))
    }

    fn refresh(error: mailbridge_oauth::Error) -> Self {
        Self::Refresh(Arc::new(error))
    }

    /// Classifies the error.
    ///
    /// A refresh rejected with `invalid_grant` means the refresh token is no
    /// longer accepted, so it counts as needing re-authentication.
    #[must_use]
    pub fn kind(&self) -> TokenErrorKind {
        match self {
            Self::NoCredentials => TokenErrorKind::NoCredentials,
            Self::ReauthenticationRequired => TokenErrorKind::ReauthenticationRequired,
            Self::Refresh(e) if e.is_invalid_grant() => TokenErrorKind::ReauthenticationRequired,
            Self::Store(_) => TokenErrorKind::Storage,
            Self::Refresh(_) | Self::RefreshAborted => TokenErrorKind::Transient,
        }
    }

    /// Returns true if the caller must run the interactive login again.
    #[must_use]
    pub fn requires_reauthentication(&self) -> bool {
        matches!(
            self.kind(),
            TokenErrorKind::NoCredentials | TokenErrorKind::ReauthenticationRequired
        )
    }
}

type RefreshOutcome = Result<CredentialSet, TokenError>;

/// Authorization server settings for a coordinator.
#[derive(Debug, Clone)]
pub struct RefreshSettings {
    /// Issuer URL.
    pub issuer: Url,
    /// Registered client id.
    pub client_id: String,
    /// Client secret for confidential clients.
    pub client_secret: Option<SecretString>,
    /// Bound on the issuer metadata request.
    pub metadata_timeout: Duration,
    http: Client,
}

impl RefreshSettings {
    /// Settings for a public client of `issuer`.
    #[must_use]
    pub fn new(issuer: Url, client_id: impl Into<String>) -> Self {
        Self {
            issuer,
            client_id: client_id.into(),
            client_secret: None,
            metadata_timeout: DEFAULT_METADATA_TIMEOUT,
            http: Client::new(),
        }
    }

    /// Sets the client secret.
    #[must_use]
    pub fn with_client_secret(mut self, secret: SecretString) -> Self {
        self.client_secret = Some(secret);
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

    fn key(&self) -> (String, String) {
        (self.issuer.to_string(), self.client_id.clone())
    }
}

#[derive(Default)]
struct State {
    metadata: Option<Arc<IssuerMetadata>>,
    in_flight: Option<watch::Receiver<Option<RefreshOutcome>>>,
}

struct Inner {
    settings: RefreshSettings,
    store: CredentialStore,
    state: Mutex<State>,
}

/// Hands out valid access tokens, refreshing them at most once at a time.
///
/// Cheap to clone; clones share the in-flight refresh and the cached issuer
/// metadata.
#[derive(Clone)]
pub struct RefreshCoordinator {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for RefreshCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefreshCoordinator")
            .field("issuer", &self.inner.settings.issuer.as_str())
            .field("client_id", &self.inner.settings.client_id)
            .field("store", &self.inner.store.path())
            .finish_non_exhaustive()
    }
}

impl RefreshCoordinator {
    /// Creates a coordinator reading and writing `store`.
    #[must_use]
    pub fn new(settings: RefreshSettings, store: CredentialStore) -> Self {
        Self {
            inner: Arc::new(Inner {
                settings,
                store,
                state: Mutex::new(State::default()),
            }),
        }
    }

    /// Issuer this coordinator refreshes against.
    #[must_use]
    pub fn issuer(&self) -> &Url {
        &self.inner.settings.issuer
    }

    /// Credential store in use.
    #[must_use]
    pub fn store(&self) -> &CredentialStore {
        &self.inner.store
    }

    /// Returns credentials whose access token is valid for more than the
    /// expiry buffer, refreshing first if necessary.
    ///
    /// A still-valid token is returned without any network call. When a
    /// refresh is needed and one is already running, this waits for it
    /// instead of starting another.
    ///
    /// # Errors
    ///
    /// - [`TokenError::NoCredentials`] if nothing is stored
    /// - [`TokenError::ReauthenticationRequired`] if the token expired and
    ///   cannot be refreshed
    /// - [`TokenError::Refresh`] or [`TokenError::Store`] if the refresh
    ///   itself failed
    pub async fn ensure_valid_token(&self) -> Result<CredentialSet, TokenError> {
        let current = self
            .inner
            .store
            .load()
            .await
            .map_err(TokenError::store)?
            .ok_or(TokenError::NoCredentials)?;

        if current.is_valid_at(Utc::now().timestamp()) {
            return Ok(current);
        }
        if current.refresh_token.is_none() {
            warn!("Access token expired and no refresh token is stored");
            return Err(TokenError::ReauthenticationRequired);
        }

        let mut outcome = self.join_or_start().await;
        let result = outcome
            .wait_for(Option::is_some)
            .await
            .map_err(|_| TokenError::RefreshAborted)?;
        result.clone().unwrap_or(Err(TokenError::RefreshAborted))
    }

    /// `Authorization` header value for the mail session client.
    ///
    /// # Errors
    ///
    /// See [`Self::ensure_valid_token`].
    pub async fn authorization_header_value(&self) -> Result<String, TokenError> {
        self.ensure_valid_token()
            .await
            .map(|credentials| credentials.authorization_header_value())
    }

    /// Forgets the cached issuer metadata; the next refresh fetches it again.
    pub async fn reset(&self) {
        self.inner.state.lock().await.metadata = None;
        debug!("Refresh coordinator reset");
    }

    /// Deletes the stored credentials and forgets cached metadata.
    ///
    /// # Errors
    ///
    /// Returns an error if the credential file cannot be removed.
    pub async fn logout(&self) -> Result<(), TokenError> {
        self.inner.store.clear().await.map_err(TokenError::store)?;
        self.reset().await;
        info!("Logged out");
        Ok(())
    }

    /// Returns the receiver of the running refresh, starting one if none is
    /// running. Check and install happen under one lock.
    async fn join_or_start(&self) -> watch::Receiver<Option<RefreshOutcome>> {
        let mut state = self.inner.state.lock().await;

        if let Some(running) = &state.in_flight {
            // A dropped sender means the task died; start over.
            if running.has_changed().is_ok() {
                debug!("Joining in-flight token refresh");
                return running.clone();
            }
        }

        let (sender, receiver) = watch::channel(None);
        state.in_flight = Some(receiver.clone());
        drop(state);

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let outcome = inner.refresh().await;
            inner.state.lock().await.in_flight = None;
            sender.send_replace(Some(outcome));
        });

        receiver
    }
}

impl Inner {
    async fn refresh(&self) -> RefreshOutcome {
        // Reload: a refresh that finished just before this one started may
        // already have rotated the refresh token.
        let current = self
            .store
            .load()
            .await
            .map_err(TokenError::store)?
            .ok_or(TokenError::NoCredentials)?;
        if current.is_valid_at(Utc::now().timestamp()) {
            debug!("Credentials were refreshed concurrently");
            return Ok(current);
        }
        if current.refresh_token.is_none() {
            return Err(TokenError::ReauthenticationRequired);
        }

        let metadata = self.metadata().await?;
        let mut client = OAuthClient::new(&self.settings.client_id, (*metadata).clone())
            .with_http_client(self.settings.http.clone());
        if let Some(secret) = &self.settings.client_secret {
            client = client.with_client_secret(secret.clone());
        }

        info!(issuer = %self.settings.issuer, "Refreshing access token");
        let refreshed = client.refresh(&current).await.map_err(|e| {
            warn!("Token refresh failed: {e}");
            TokenError::refresh(e)
        })?;

        self.store.save(&refreshed).await.map_err(TokenError::store)?;
        debug!(expires_at = ?refreshed.expires_at, "Refreshed credentials saved");
        Ok(refreshed)
    }

    async fn metadata(&self) -> Result<Arc<IssuerMetadata>, TokenError> {
        if let Some(cached) = &self.state.lock().await.metadata {
            return Ok(Arc::clone(cached));
        }

        let fetched = metadata::discover(
            &self.settings.http,
            &self.settings.issuer,
            self.settings.metadata_timeout,
        )
        .await
        .map(Arc::new)
        .map_err(TokenError::refresh)?;

        self.state.lock().await.metadata = Some(Arc::clone(&fetched));
        Ok(fetched)
    }
}

/// One shared coordinator per (issuer, client id).
///
/// Handing every consumer the same coordinator is what makes the refresh
/// single-flight across the whole process.
#[derive(Debug, Default)]
pub struct CoordinatorRegistry {
    coordinators: Mutex<HashMap<(String, String), RefreshCoordinator>>,
}

impl CoordinatorRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the coordinator for `settings`, creating it on first use.
    ///
    /// An existing coordinator keeps the store it was created with.
    pub async fn coordinator(
        &self,
        settings: RefreshSettings,
        store: CredentialStore,
    ) -> RefreshCoordinator {
        let mut coordinators = self.coordinators.lock().await;
        coordinators
            .entry(settings.key())
            .or_insert_with(|| RefreshCoordinator::new(settings, store))
            .clone()
    }

    /// Number of coordinators handed out so far.
    pub async fn len(&self) -> usize {
        self.coordinators.lock().await.len()
    }

    /// Returns true if no coordinator has been created.
    pub async fn is_empty(&self) -> bool {
        self.coordinators.lock().await.is_empty()
    }
}
