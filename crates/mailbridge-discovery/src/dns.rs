//! DNS SRV probe.

use std::time::Duration;

use hickory_resolver::TokioAsyncResolver;
use hickory_resolver::config::{ResolverConfig, ResolverOpts};
use hickory_resolver::error::{ResolveError, ResolveErrorKind};
use tracing::{debug, warn};

use crate::types::SrvRecord;

/// Query name for `service` on `domain`: `_<service>._tcp.<domain>`.
#[must_use]
pub fn srv_name(service: &str, domain: &str) -> String {
    format!("_{service}._tcp.{domain}")
}

/// Picks the preferred record: lowest priority, then highest weight.
///
/// Only the single best candidate is returned; callers wanting failover
/// have to probe again.
#[must_use]
pub fn select_best(mut records: Vec<SrvRecord>) -> Option<SrvRecord> {
    records.sort_by(|a, b| a.priority.cmp(&b.priority).then(b.weight.cmp(&a.weight)));
    records.into_iter().next()
}

/// SRV resolver backed by the system DNS configuration.
#[derive(Clone)]
pub struct SrvResolver {
    resolver: TokioAsyncResolver,
}

impl std::fmt::Debug for SrvResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SrvResolver").finish_non_exhaustive()
    }
}

impl SrvResolver {
    /// Creates a resolver from the system configuration, falling back to
    /// public defaults when none is readable.
    #[must_use]
    pub fn from_system() -> Self {
        let resolver = TokioAsyncResolver::tokio_from_system_conf().unwrap_or_else(|e| {
            warn!("System DNS configuration unavailable ({e}), using defaults");
            TokioAsyncResolver::tokio(ResolverConfig::default(), ResolverOpts::default())
        });
        Self { resolver }
    }

    /// Creates a resolver querying the name servers in `config`.
    #[must_use]
    pub fn new(config: ResolverConfig, opts: ResolverOpts) -> Self {
        Self {
            resolver: TokioAsyncResolver::tokio(config, opts),
        }
    }

    /// Looks up the best SRV record for `service` on `domain`.
    ///
    /// NXDOMAIN, empty answers, resolver failures and timeouts all yield
    /// `None`. Only unexpected failures are logged above debug level.
    pub async fn probe(&self, service: &str, domain: &str, timeout: Duration) -> Option<SrvRecord> {
        let name = srv_name(service, domain);
        debug!(%name, "Querying SRV record");

        let lookup = match tokio::time::timeout(timeout, self.resolver.srv_lookup(name.as_str()))
            .await
        {
            Ok(Ok(lookup)) => lookup,
            Ok(Err(e)) => {
                log_failure(&name, &e);
                return None;
            }
            Err(_) => {
                debug!(%name, ?timeout, "SRV query timed out");
                return None;
            }
        };

        let records: Vec<SrvRecord> = lookup
            .iter()
            .filter_map(|srv| {
                let host = srv.target().to_utf8();
                let host = host.trim_end_matches('.');
                // A target of "." means the service is explicitly unavailable.
                (!host.is_empty()).then(|| SrvRecord {
                    host: host.to_string(),
                    port: srv.port(),
                    priority: srv.priority(),
                    weight: srv.weight(),
                })
            })
            .collect();

        let best = select_best(records);
        match &best {
            Some(record) => {
                debug!(%name, host = %record.host, port = record.port, "SRV record found");
            }
            None => debug!(%name, "SRV answer had no usable targets"),
        }
        best
    }
}

fn log_failure(name: &str, error: &ResolveError) {
    match error.kind() {
        ResolveErrorKind::NoRecordsFound { .. } => {
            debug!(%name, "No SRV record published");
        }
        _ => {
            warn!(%name, "SRV lookup failed: {error}");
        }
    }
}
