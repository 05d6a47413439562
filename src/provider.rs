use std::net::IpAddr;
use std::sync::{Arc, LazyLock, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use hickory_resolver::TokioAsyncResolver;
use hickory_resolver::config::{ResolverConfig, ResolverOpts};
use hickory_resolver::error::{ResolveError as HickoryError, ResolveErrorKind};
use hickory_resolver::system_conf::read_system_conf;
use tracing::{debug, warn};

use crate::context::ProviderContext;
use crate::error::ProviderError;

/// The name-resolution capability the cache sits in front of.
#[async_trait]
pub trait LookupProvider: Send + Sync {
    /// Resolves `host` to its addresses in canonical text form.
    async fn lookup_host(&self, ctx: &ProviderContext, host: &str)
    -> Result<Vec<String>, ProviderError>;

    /// Resolves `addr` to the names pointing at it.
    async fn lookup_addr(&self, ctx: &ProviderContext, addr: &str)
    -> Result<Vec<String>, ProviderError>;
}

static SYSTEM_PROVIDER: LazyLock<Arc<SystemProvider>> =
    LazyLock::new(|| Arc::new(SystemProvider::new()));

/// Default provider backed by hickory's tokio resolver.
///
/// Host lookups go through `lookup_ip` and are wrapped in the start/done trace
/// hooks, so the hooks fire for every host lookup regardless of the record
/// types hickory queries underneath.
pub struct SystemProvider {
    resolver: OnceLock<TokioAsyncResolver>,
}

impl SystemProvider {
    pub fn new() -> Self {
        Self {
            resolver: OnceLock::new(),
        }
    }

    /// Process-wide instance shared by resolvers without an explicit provider.
    pub fn shared() -> Arc<SystemProvider> {
        Arc::clone(&SYSTEM_PROVIDER)
    }

    // Built on first use so a provider can be created outside a runtime.
    fn resolver(&self) -> &TokioAsyncResolver {
        self.resolver.get_or_init(|| {
            let (config, opts) = match read_system_conf() {
                Ok(conf) => conf,
                Err(err) => {
                    warn!(error = %err, "system resolver config unavailable, using defaults");
                    (ResolverConfig::default(), ResolverOpts::default())
                }
            };
            TokioAsyncResolver::tokio(config, uncached(opts))
        })
    }
}

/// Disables hickory's TTL response cache: every call must reach the
/// nameservers, since refresh relies on re-fetching.
pub(crate) fn uncached(mut opts: ResolverOpts) -> ResolverOpts {
    opts.cache_size = 0;
    opts.positive_max_ttl = Some(Duration::ZERO);
    opts.negative_max_ttl = Some(Duration::ZERO);
    opts
}

impl Default for SystemProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LookupProvider for SystemProvider {
    async fn lookup_host(
        &self,
        ctx: &ProviderContext,
        host: &str,
    ) -> Result<Vec<String>, ProviderError> {
        ctx.traced(host, async {
            let lookup = self
                .resolver()
                .lookup_ip(host)
                .await
                .map_err(|err| map_error(host, err))?;
            let addrs = ip_strings(lookup.iter());
            debug!(host = %host, count = addrs.len(), "system lookup_ip done");
            Ok(addrs)
        })
        .await
    }

    async fn lookup_addr(
        &self,
        _ctx: &ProviderContext,
        addr: &str,
    ) -> Result<Vec<String>, ProviderError> {
        let ip: IpAddr = addr
            .parse()
            .map_err(|_| ProviderError::InvalidAddress(addr.to_string()))?;
        let lookup = self
            .resolver()
            .reverse_lookup(ip)
            .await
            .map_err(|err| map_error(addr, err))?;
        Ok(lookup.iter().map(|name| name.to_string()).collect())
    }
}

/// Canonical text form of resolved addresses, in resolver order.
pub(crate) fn ip_strings(ips: impl Iterator<Item = IpAddr>) -> Vec<String> {
    ips.map(|ip| ip.to_string()).collect()
}

fn map_error(subject: &str, err: HickoryError) -> ProviderError {
    match err.kind() {
        ResolveErrorKind::NoRecordsFound { .. } => ProviderError::NotFound(subject.to_string()),
        _ => ProviderError::Resolver(err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, Ipv6Addr};

    #[test]
    fn ip_strings_keeps_order_and_formats_v6() {
        let ips = [
            IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)),
            IpAddr::V6(Ipv6Addr::LOCALHOST),
        ];
        assert_eq!(
            ip_strings(ips.into_iter()),
            vec!["10.0.0.1".to_string(), "::1".to_string()]
        );
    }

    #[tokio::test]
    async fn reverse_lookup_rejects_non_ip() {
        let provider = SystemProvider::new();
        let err = provider
            .lookup_addr(&ProviderContext::new(), "not-an-ip")
            .await
            .unwrap_err();
        assert_eq!(err, ProviderError::InvalidAddress("not-an-ip".to_string()));
    }

    #[test]
    fn system_provider_opts_disable_response_cache() {
        let opts = uncached(ResolverOpts::default());
        assert_eq!(opts.cache_size, 0);
        assert_eq!(opts.positive_max_ttl, Some(Duration::ZERO));
        assert_eq!(opts.negative_max_ttl, Some(Duration::ZERO));
        // Unrelated settings are left alone.
        assert_eq!(opts.timeout, ResolverOpts::default().timeout);
    }

    #[test]
    fn shared_provider_is_a_singleton() {
        assert!(Arc::ptr_eq(&SystemProvider::shared(), &SystemProvider::shared()));
    }
}
