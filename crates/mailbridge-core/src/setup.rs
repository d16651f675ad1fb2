//! Adapter setup: endpoint discovery, then a ready-to-use session.

use mailbridge_discovery::{DiscoveryResult, NetworkBackend};
use tracing::info;

use crate::auth::{BrowserLauncher, CoordinatorRegistry, SessionAuth, perform_authorization_flow};
use crate::config::Config;
use crate::error::Result;

/// Locates the mail endpoint and its authorization server for `email`,
/// using the configured probe timeout.
///
/// # Errors
///
/// Returns [`Error::Discovery`](crate::Error::Discovery) if the address is
/// invalid or no endpoint can be found.
pub async fn discover_endpoint(config: &Config, email: &str) -> Result<DiscoveryResult> {
    let backend = NetworkBackend::new(config.discovery_config())?;
    Ok(backend.discover_from_email(email).await?)
}

/// Builds the session authentication for `config` and makes sure it can
/// produce a header.
///
/// In OIDC mode, when no usable credentials are stored, the browser login
/// runs once through `browser`. Transient refresh failures are returned
/// as-is and never trigger a login.
///
/// # Errors
///
/// Returns [`Error::Flow`](crate::Error::Flow) if the login fails and
/// [`Error::Token`](crate::Error::Token) if credentials still cannot be
/// produced.
pub async fn prepare_session(
    config: &Config,
    registry: &CoordinatorRegistry,
    browser: &dyn BrowserLauncher,
) -> Result<SessionAuth> {
    let http = config.http_client()?;
    let auth = config.session_auth(registry, http.clone()).await;

    match auth.header_value().await {
        Ok(_) => {}
        Err(e) if e.requires_reauthentication() => {
            let Some(options) = config.flow_options(http) else {
                return Err(e.into());
            };
            info!("{e}; starting browser login");
            perform_authorization_flow(&options, &config.credential_store(), browser).await?;
            auth.header_value().await?;
        }
        Err(e) => return Err(e.into()),
    }

    info!(mode = auth.mode(), "Session credentials ready");
    Ok(auth)
}
