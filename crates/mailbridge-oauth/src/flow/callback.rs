//! Short-lived loopback HTTP listener that captures the authorization redirect.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::Html;
use axum::routing::get;
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio::sync::{Mutex, oneshot};
use tracing::{debug, warn};
use url::{Host, Url};

use crate::error::{Error, Result};

const SUCCESS_PAGE: &str = r"<!DOCTYPE html>
<html>
<head><title>mailbridge</title></head>
<body style='font-family: system-ui; text-align: center; padding-top: 80px;'>
<h2>Authorization received</h2>
<p>You can close this tab and return to the terminal.</p>
</body>
</html>";

const MISSING_PARAMS_PAGE: &str = r"<!DOCTYPE html>
<html>
<body><p>Missing authorization response parameters.</p></body>
</html>";

type SenderSlot = Arc<Mutex<Option<oneshot::Sender<CallbackParams>>>>;

/// Query parameters delivered to the redirect URI.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct CallbackParams {
    /// Authorization code.
    pub code: Option<String>,
    /// Echoed anti-CSRF state.
    pub state: Option<String>,
    /// Error code, when the server refused the request.
    pub error: Option<String>,
    /// Human readable error description.
    pub error_description: Option<String>,
}

impl CallbackParams {
    /// Returns the provider-reported error, if any.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AccessDenied`] for `access_denied` and
    /// [`Error::OAuth`] for any other error code.
    pub fn check_error(&self) -> Result<()> {
        match self.error.as_deref() {
            None => Ok(()),
            Some("access_denied") => Err(Error::AccessDenied),
            Some(code) => Err(Error::oauth_error(
                code,
                self.error_description.clone().unwrap_or_default(),
            )),
        }
    }

    /// Returns the authorization code.
    ///
    /// # Errors
    ///
    /// Returns an error if the redirect carried no code.
    pub fn authorization_code(&self) -> Result<&str> {
        self.code
            .as_deref()
            .filter(|c| !c.is_empty())
            .ok_or_else(|| Error::InvalidResponse("callback has no authorization code".to_string()))
    }

    fn is_complete(&self) -> bool {
        self.code.is_some() || self.error.is_some()
    }
}

/// Loopback listener bound to the host, port and path of a redirect URI.
///
/// The server stops when the listener is dropped.
#[derive(Debug)]
pub struct CallbackListener {
    redirect_uri: Url,
    receiver: oneshot::Receiver<CallbackParams>,
    shutdown: Option<oneshot::Sender<()>>,
}

impl CallbackListener {
    /// Binds the listener described by `redirect_uri`.
    ///
    /// Port `0` picks a free port; [`Self::redirect_uri`] then reports the
    /// effective URI to send to the authorization server.
    ///
    /// # Errors
    ///
    /// Returns an error if the URI is not a plain `http` loopback address or
    /// the port cannot be bound.
    pub async fn bind(redirect_uri: &Url) -> Result<Self> {
        let ip = loopback_ip(redirect_uri).ok_or_else(|| {
            Error::InvalidConfig(format!(
                "redirect URI {redirect_uri} must be http on a loopback host"
            ))
        })?;
        let port = redirect_uri.port().unwrap_or(80);

        let listener = TcpListener::bind(SocketAddr::new(ip, port)).await?;
        let local_addr = listener.local_addr()?;

        let mut effective = redirect_uri.clone();
        effective
            .set_port(Some(local_addr.port()))
            .map_err(|()| Error::InvalidConfig(format!("cannot set port on {redirect_uri}")))?;

        let (sender, receiver) = oneshot::channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let slot: SenderSlot = Arc::new(Mutex::new(Some(sender)));

        let app = Router::new()
            .route(callback_path(redirect_uri), get(handle_callback))
            .with_state(slot);

        debug!(%local_addr, "Authorization callback listener started");
        tokio::spawn(async move {
            let server = axum::serve(listener, app).with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            });
            if let Err(e) = server.await {
                warn!("Authorization callback listener failed: {e}");
            }
        });

        Ok(Self {
            redirect_uri: effective,
            receiver,
            shutdown: Some(shutdown_tx),
        })
    }

    /// The redirect URI this listener answers on, with the bound port.
    #[must_use]
    pub const fn redirect_uri(&self) -> &Url {
        &self.redirect_uri
    }

    /// Waits for the redirect, giving up after `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Timeout`] if no redirect arrives in time.
    pub async fn wait(mut self, timeout: Duration) -> Result<CallbackParams> {
        match tokio::time::timeout(timeout, &mut self.receiver).await {
            Ok(Ok(params)) => Ok(params),
            Ok(Err(_)) => Err(Error::InvalidResponse(
                "callback listener stopped before a redirect arrived".to_string(),
            )),
            Err(_) => Err(Error::Timeout(timeout)),
        }
    }
}

impl Drop for CallbackListener {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
    }
}

async fn handle_callback(
    State(slot): State<SenderSlot>,
    Query(params): Query<CallbackParams>,
) -> (StatusCode, Html<&'static str>) {
    if !params.is_complete() {
        return (StatusCode::BAD_REQUEST, Html(MISSING_PARAMS_PAGE));
    }

    if let Some(sender) = slot.lock().await.take() {
        let _ = sender.send(params);
    }

    (StatusCode::OK, Html(SUCCESS_PAGE))
}

fn loopback_ip(uri: &Url) -> Option<IpAddr> {
    if uri.scheme() != "http" {
        return None;
    }
    match uri.host()? {
        Host::Domain(domain) if domain.eq_ignore_ascii_case("localhost") => {
            Some(IpAddr::V4(Ipv4Addr::LOCALHOST))
        }
        Host::Ipv4(ip) if ip.is_loopback() => Some(IpAddr::V4(ip)),
        Host::Ipv6(ip) if ip.is_loopback() => Some(IpAddr::V6(ip)),
        _ => None,
    }
}

fn callback_path(uri: &Url) -> &str {
    match uri.path() {
        "" => "/",
        path => path,
    }
}
