//! Example: discover a mail endpoint, then make sure a usable token exists.
//!
//! Both modes load `MAILBRIDGE_*` settings. With an email argument, runs
//! endpoint discovery and prints the result:
//!
//! ```bash
//! cargo run --package mailbridge-core --example login -- user@example.com
//! ```
//!
//! Without one, and in OIDC mode, runs the browser login when no valid token
//! is stored:
//!
//! ```bash
//! export MAILBRIDGE_AUTH_MODE=oidc
//! export MAILBRIDGE_SESSION_URL=https://jmap.example.com/.well-known/jmap
//! export MAILBRIDGE_OIDC_ISSUER=https://auth.example.com
//! export MAILBRIDGE_OIDC_CLIENT_ID=mailbridge
//! cargo run --package mailbridge-core --example login
//! ```

use std::env;

use anyhow::Context;
use mailbridge_core::{
    Config, CoordinatorRegistry, SystemBrowser, discover_endpoint, prepare_session,
};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "mailbridge_core=info,mailbridge_discovery=debug,mailbridge_oauth=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env().context("loading MAILBRIDGE_* configuration")?;

    if let Some(email) = env::args().nth(1) {
        let result = discover_endpoint(&config, &email).await?;
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }

    let registry = CoordinatorRegistry::new();
    let auth = prepare_session(&config, &registry, &SystemBrowser).await?;
    println!("Ready ({} mode)", auth.mode());

    Ok(())
}
