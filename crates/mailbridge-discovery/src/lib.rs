//! # mailbridge-discovery
//!
//! Locates a JMAP session endpoint and the authorization server protecting it,
//! starting from nothing but an email address.
//!
//! ## Chain
//!
//! 1. `_jmap._tcp.<domain>` SRV record, confirmed at `/.well-known/jmap`
//! 2. `https://<domain>/.well-known/jmap`
//! 3. on the confirmed endpoint: protected resource metadata, then the
//!    `WWW-Authenticate` challenge, then OIDC discovery on conventional
//!    subdomains
//!
//! Every probe is bounded by its own timeout. Absence, timeouts and transport
//! failures all count as "not found" and move the chain along; only an invalid
//! address or an exhausted chain is an error.
//!
//! ## Quick Start
//!
//! ```ignore
//! use mailbridge_discovery::{DiscoveryConfig, NetworkBackend};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let backend = NetworkBackend::new(DiscoveryConfig::default())?;
//!     let result = backend.discover_from_email("user@example.com").await?;
//!     println!("endpoint: {}", result.endpoint);
//!     if let Some(auth) = result.auth_server {
//!         println!("issuer: {}", auth.issuer);
//!     }
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod auth_probe;
pub mod dns;
mod error;
mod orchestrator;
mod types;
pub mod well_known;

pub use error::{DiscoveryStage, Error, Result};
pub use orchestrator::{DiscoveryBackend, NetworkBackend, discover_from_email, extract_domain};
pub use types::{
    AuthServer, AuthServerMethod, DEFAULT_SERVICE, DiscoveryConfig, DiscoveryResult,
    EndpointMethod, SrvRecord,
};
