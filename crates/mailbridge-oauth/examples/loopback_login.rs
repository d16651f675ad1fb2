//! Example: authorization code login against any OIDC issuer.
//!
//! This example demonstrates how to:
//! 1. Discover the issuer's endpoints
//! 2. Capture the redirect on a loopback listener
//! 3. Verify the returned state and exchange the code with the PKCE verifier
//! 4. Refresh the resulting access token
//!
//! ## Running
//!
//! ```bash
//! export OIDC_ISSUER="https://auth.example.com"
//! export OIDC_CLIENT_ID="your-client-id"
//! cargo run --package mailbridge-oauth --example loopback_login
//! ```
//!
//! Register `http://127.0.0.1:8976/callback` as a redirect URI first.

use std::env;
use std::time::Duration;

use mailbridge_oauth::{AuthorizationCodeFlow, CallbackListener, OAuthClient, metadata};
use url::Url;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let issuer = Url::parse(&env::var("OIDC_ISSUER")?)?;
    let client_id = env::var("OIDC_CLIENT_ID")?;

    println!("Step 1: Discovering {issuer}...");
    let http = reqwest::Client::new();
    let metadata = metadata::discover(&http, &issuer, Duration::from_secs(10)).await?;
    println!("  Authorize: {}", metadata.authorization_endpoint);
    println!("  Token:     {}\n", metadata.token_endpoint);

    println!("Step 2: Starting loopback listener...");
    let listener = CallbackListener::bind(&Url::parse("http://127.0.0.1:8976/callback")?).await?;
    let client = OAuthClient::new(client_id, metadata)
        .with_redirect_uri(listener.redirect_uri().as_str())
        .with_http_client(http);
    let flow = AuthorizationCodeFlow::new(client.clone());
    println!("  Listening on {}\n", listener.redirect_uri());

    println!("Step 3: Open this URL in your browser:");
    println!("  {}\n", flow.authorization_url("openid email offline_access")?);

    let params = listener.wait(Duration::from_secs(300)).await?;
    flow.verify_state(params.state.as_deref())?;
    params.check_error()?;

    println!("Step 4: Exchanging code...");
    let credentials = flow.exchange_code(params.authorization_code()?).await?;
    println!("  Expires at: {:?}", credentials.expires_at);
    println!("  Refresh token: {}\n", credentials.refresh_token.is_some());

    if credentials.refresh_token.is_some() {
        println!("Step 5: Refreshing...");
        let refreshed = client.refresh(&credentials).await?;
        println!("  New expiry: {:?}", refreshed.expires_at);
    }

    Ok(())
}
