//! # mailbridge-oauth
//!
//! `OAuth2`/OIDC building blocks for authenticating against a mail-access API.
//!
//! ## Features
//!
//! - **Issuer metadata**: OIDC discovery with RFC 8414 fallback, validated
//! - **Authorization Code Flow**: always with `S256` PKCE and an anti-CSRF state
//! - **Loopback callback**: captures the authorization redirect locally
//! - **Tokens**: credential sets with expiry arithmetic and refresh grants
//!
//! ## Quick Start
//!
//! ```ignore
//! use std::time::Duration;
//! use mailbridge_oauth::{metadata, AuthorizationCodeFlow, CallbackListener, OAuthClient};
//! use url::Url;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let http = reqwest::Client::new();
//!     let issuer = Url::parse("https://auth.example.com")?;
//!     let metadata = metadata::discover(&http, &issuer, Duration::from_secs(10)).await?;
//!
//!     let redirect = Url::parse("http://127.0.0.1:8976/callback")?;
//!     let listener = CallbackListener::bind(&redirect).await?;
//!     let client = OAuthClient::new("my-client", metadata)
//!         .with_redirect_uri(listener.redirect_uri().as_str());
//!
//!     let flow = AuthorizationCodeFlow::new(client);
//!     println!("Visit: {}", flow.authorization_url("openid email offline_access")?);
//!
//!     let params = listener.wait(Duration::from_secs(300)).await?;
//!     params.check_error()?;
//!     flow.verify_state(params.state.as_deref())?;
//!     let credentials = flow.exchange_code(params.authorization_code()?).await?;
//!     println!("Expires at: {:?}", credentials.expires_at);
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

mod error;
pub mod flow;
pub mod metadata;
pub mod token;

pub use error::{Error, Result};
pub use flow::{
    AuthorizationCodeFlow, CODE_CHALLENGE_METHOD, CallbackListener, CallbackParams, OAuthClient,
    PkceChallenge,
};
pub use metadata::IssuerMetadata;
pub use token::{CredentialSet, EXPIRY_BUFFER_SECS, TokenResponse};
