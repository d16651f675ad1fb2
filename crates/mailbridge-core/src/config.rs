//! Environment configuration.
//!
//! Every setting is read from a `MAILBRIDGE_*` variable. [`Config::from_lookup`]
//! takes any lookup function so tests never touch the process environment.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use mailbridge_discovery::DiscoveryConfig;
use reqwest::Client;
use secrecy::SecretString;
use url::Url;

use crate::auth::flow::{DEFAULT_REDIRECT_URI, DEFAULT_SCOPE};
use crate::auth::{AuthorizationFlowOptions, CoordinatorRegistry, RefreshSettings, SessionAuth};
use crate::credentials::{self, CredentialStore};

/// Prefix shared by every variable.
pub const ENV_PREFIX: &str = "MAILBRIDGE_";

const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 10;
const DEFAULT_DISCOVERY_TIMEOUT_SECS: u64 = 5;
const DEFAULT_CALLBACK_TIMEOUT_SECS: u64 = 300;

/// Configuration errors. Each names the offending variable.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required variable is unset or blank.
    #[error("Missing required environment variable {0}")]
    Missing(String),

    /// A variable has an unusable value.
    #[error("Invalid value for {var}: {reason}")]
    Invalid {
        /// Variable name.
        var: String,
        /// What is wrong with it.
        reason: String,
    },

    /// No credentials path was given and there is no config directory.
    #[error("No credentials path configured and no user config directory available")]
    NoConfigDir,
}

/// Result type for configuration loading.
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Session authentication mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthMode {
    /// Username and password.
    #[default]
    Basic,
    /// Static bearer token.
    Bearer,
    /// Interactive login with refreshed tokens.
    Oidc,
}

impl FromStr for AuthMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "basic" => Ok(Self::Basic),
            "bearer" => Ok(Self::Bearer),
            "oidc" => Ok(Self::Oidc),
            other => Err(format!(
                "unknown auth mode '{other}' (expected basic, bearer or oidc)"
            )),
        }
    }
}

/// Authorization server settings for OIDC mode.
#[derive(Debug, Clone)]
pub struct OidcConfig {
    /// Issuer URL.
    pub issuer: Url,
    /// Registered client id.
    pub client_id: String,
    /// Client secret for confidential clients.
    pub client_secret: Option<SecretString>,
    /// Space-separated scopes.
    pub scope: String,
    /// Loopback redirect URI.
    pub redirect_uri: Url,
}

/// Credentials for the selected mode.
#[derive(Debug, Clone)]
pub enum AuthConfig {
    /// Basic mode.
    Basic {
        /// Account name.
        username: String,
        /// Password.
        password: SecretString,
    },
    /// Bearer mode.
    Bearer {
        /// Token.
        token: SecretString,
    },
    /// OIDC mode.
    Oidc(OidcConfig),
}

/// Complete adapter configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Mail session URL.
    pub session_url: Url,
    /// Authentication settings.
    pub auth: AuthConfig,
    /// Bound on token and metadata requests.
    pub http_timeout: Duration,
    /// Bound on each discovery probe.
    pub discovery_timeout: Duration,
    /// How long the login flow waits for the browser redirect.
    pub callback_timeout: Duration,
    /// Credential file.
    pub credentials_path: PathBuf,
}

impl Config {
    /// Reads the process environment.
    ///
    /// # Errors
    ///
    /// Returns an error naming the first missing or invalid variable.
    pub fn from_env() -> ConfigResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads variables through `lookup`, which receives full variable names.
    ///
    /// # Errors
    ///
    /// Returns an error naming the first missing or invalid variable.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> ConfigResult<Self> {
        let env = Env { lookup: &lookup };

        let mode = match env.optional("AUTH_MODE") {
            Some(value) => value.parse::<AuthMode>().map_err(|reason| ConfigError::Invalid {
                var: var_name("AUTH_MODE"),
                reason,
            })?,
            None => AuthMode::default(),
        };

        let session_url = env.url("SESSION_URL")?;

        let auth = match mode {
            AuthMode::Basic => AuthConfig::Basic {
                username: env.required("USERNAME")?,
                password: env.secret("PASSWORD")?,
            },
            AuthMode::Bearer => AuthConfig::Bearer {
                token: env.secret("BEARER_TOKEN")?,
            },
            AuthMode::Oidc => AuthConfig::Oidc(OidcConfig {
                issuer: env.url("OIDC_ISSUER")?,
                client_id: env.required("OIDC_CLIENT_ID")?,
                client_secret: env.optional("OIDC_CLIENT_SECRET").map(SecretString::from),
                scope: env
                    .optional("OIDC_SCOPE")
                    .unwrap_or_else(|| DEFAULT_SCOPE.to_string()),
                redirect_uri: env.url_or("OIDC_REDIRECT_URI", DEFAULT_REDIRECT_URI)?,
            }),
        };

        let credentials_path = match env.optional("CREDENTIALS_PATH") {
            Some(path) => PathBuf::from(path),
            None => credentials::default_location().map_err(|_| ConfigError::NoConfigDir)?,
        };

        Ok(Self {
            session_url,
            auth,
            http_timeout: env.seconds("HTTP_TIMEOUT_SECS", DEFAULT_HTTP_TIMEOUT_SECS)?,
            discovery_timeout: env
                .seconds("DISCOVERY_TIMEOUT_SECS", DEFAULT_DISCOVERY_TIMEOUT_SECS)?,
            callback_timeout: env.seconds("CALLBACK_TIMEOUT_SECS", DEFAULT_CALLBACK_TIMEOUT_SECS)?,
            credentials_path,
        })
    }

    /// Selected authentication mode.
    #[must_use]
    pub const fn auth_mode(&self) -> AuthMode {
        match self.auth {
            AuthConfig::Basic { .. } => AuthMode::Basic,
            AuthConfig::Bearer { .. } => AuthMode::Bearer,
            AuthConfig::Oidc(_) => AuthMode::Oidc,
        }
    }

    /// HTTP client with the configured timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the TLS backend cannot be initialized.
    pub fn http_client(&self) -> reqwest::Result<Client> {
        Client::builder()
            .timeout(self.http_timeout)
            .user_agent(concat!("mailbridge/", env!("CARGO_PKG_VERSION")))
            .build()
    }

    /// Probe settings for endpoint discovery.
    #[must_use]
    pub fn discovery_config(&self) -> DiscoveryConfig {
        DiscoveryConfig::default().with_timeout(self.discovery_timeout)
    }

    /// Credential store at the configured path.
    #[must_use]
    pub fn credential_store(&self) -> CredentialStore {
        CredentialStore::new(&self.credentials_path)
    }

    /// Refresh settings, in OIDC mode only.
    #[must_use]
    pub fn refresh_settings(&self, http: Client) -> Option<RefreshSettings> {
        match &self.auth {
            AuthConfig::Oidc(oidc) => Some(self.oidc_refresh_settings(oidc, http)),
            AuthConfig::Basic { .. } | AuthConfig::Bearer { .. } => None,
        }
    }

    fn oidc_refresh_settings(&self, oidc: &OidcConfig, http: Client) -> RefreshSettings {
        let settings = RefreshSettings::new(oidc.issuer.clone(), &oidc.client_id)
            .with_metadata_timeout(self.http_timeout)
            .with_http_client(http);
        match &oidc.client_secret {
            Some(secret) => settings.with_client_secret(secret.clone()),
            None => settings,
        }
    }

    /// Login flow options, in OIDC mode only.
    #[must_use]
    pub fn flow_options(&self, http: Client) -> Option<AuthorizationFlowOptions> {
        let AuthConfig::Oidc(oidc) = &self.auth else {
            return None;
        };
        let mut options = AuthorizationFlowOptions::new(
            oidc.issuer.clone(),
            &oidc.client_id,
            oidc.redirect_uri.clone(),
        )
        .with_scope(&oidc.scope)
        .with_callback_timeout(self.callback_timeout)
        .with_metadata_timeout(self.http_timeout)
        .with_http_client(http);
        if let Some(secret) = &oidc.client_secret {
            options = options.with_client_secret(secret.clone());
        }
        Some(options)
    }

    /// Header source for the mail session client.
    ///
    /// In OIDC mode the coordinator comes from `registry`, so every session
    /// built from the same issuer and client shares one refresh.
    pub async fn session_auth(&self, registry: &CoordinatorRegistry, http: Client) -> SessionAuth {
        match &self.auth {
            AuthConfig::Basic { username, password } => SessionAuth::Basic {
                username: username.clone(),
                password: password.clone(),
            },
            AuthConfig::Bearer { token } => SessionAuth::Bearer(token.clone()),
            AuthConfig::Oidc(oidc) => {
                let settings = self.oidc_refresh_settings(oidc, http);
                SessionAuth::Oidc(
                    registry
                        .coordinator(settings, self.credential_store())
                        .await,
                )
            }
        }
    }
}

fn var_name(suffix: &str) -> String {
    format!("{ENV_PREFIX}{suffix}")
}

struct Env<'a, F: Fn(&str) -> Option<String>> {
    lookup: &'a F,
}

impl<F: Fn(&str) -> Option<String>> Env<'_, F> {
    /// Trimmed value; blank counts as unset.
    fn optional(&self, suffix: &str) -> Option<String> {
        (self.lookup)(&var_name(suffix))
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn required(&self, suffix: &str) -> ConfigResult<String> {
        self.optional(suffix)
            .ok_or_else(|| ConfigError::Missing(var_name(suffix)))
    }

    fn secret(&self, suffix: &str) -> ConfigResult<SecretString> {
        self.required(suffix).map(SecretString::from)
    }

    fn url(&self, suffix: &str) -> ConfigResult<Url> {
        parse_url(suffix, &self.required(suffix)?)
    }

    fn url_or(&self, suffix: &str, default: &str) -> ConfigResult<Url> {
        match self.optional(suffix) {
            Some(value) => parse_url(suffix, &value),
            None => parse_url(suffix, default),
        }
    }

    fn seconds(&self, suffix: &str, default: u64) -> ConfigResult<Duration> {
        let Some(value) = self.optional(suffix) else {
            return Ok(Duration::from_secs(default));
        };
        match value.parse::<u64>() {
            Ok(secs) if secs > 0 => Ok(Duration::from_secs(secs)),
            _ => Err(ConfigError::Invalid {
                var: var_name(suffix),
                reason: format!("expected a positive number of seconds, got '{value}'"),
            }),
        }
    }
}

fn parse_url(suffix: &str, value: &str) -> ConfigResult<Url> {
    Url::parse(value).map_err(|e| ConfigError::Invalid {
        var: var_name(suffix),
        reason: format!("'{value}' is not a valid URL: {e}"),
    })
}
