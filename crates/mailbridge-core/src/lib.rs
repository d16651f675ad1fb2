//! # mailbridge-core
//!
//! Authentication core of the mailbridge JMAP adapter.
//!
//! This crate provides:
//! - **Credential Store** - one owner-only JSON file per user
//! - **Login Flow** - authorization code with PKCE, loopback callback, browser hand-off
//! - **Refresh Coordinator** - single-flight token refresh with a 60 second expiry buffer
//! - **Session Auth** - `Authorization` header values for basic, bearer and OIDC modes
//! - **Configuration** - `MAILBRIDGE_*` environment variables
//! - **Setup** - [`discover_endpoint`] and [`prepare_session`], both returning [`Result`]
//!
//! Endpoint discovery lives in `mailbridge-discovery` and is re-exported as
//! [`discovery`].

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod auth;
pub mod config;
pub mod credentials;
mod error;
pub mod setup;

pub use mailbridge_discovery as discovery;
pub use mailbridge_oauth::CredentialSet;

pub use auth::{
    AuthorizationFlowOptions, BrowserLauncher, CoordinatorRegistry, FlowError, FlowStage,
    RefreshCoordinator, RefreshSettings, SessionAuth, SystemBrowser, TokenError, TokenErrorKind,
    perform_authorization_flow,
};
pub use config::{AuthConfig, AuthMode, Config, ConfigError, OidcConfig};
pub use credentials::{CredentialStore, StoreError};
pub use error::{Error, Result};
pub use setup::{discover_endpoint, prepare_session};
