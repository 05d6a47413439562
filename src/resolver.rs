use std::fmt;
use std::future::Future;
use std::sync::{Arc, LazyLock};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::cache::{CacheStore, Records};
use crate::context::LookupContext;
use crate::error::{ProviderError, ResolveError};
use crate::group::{LookupGroup, Shared};
use crate::key::CacheKey;
use crate::provider::{LookupProvider, SystemProvider};
use crate::stats::{ResolverStats, StatsSnapshot};

/// What a coalesced provider call hands to every waiter.
pub type LookupOutcome = Result<Records, ProviderError>;

pub type ResolverGroup = LookupGroup<CacheKey, LookupOutcome>;

static GLOBAL_GROUP: LazyLock<Arc<ResolverGroup>> = LazyLock::new(|| Arc::new(ResolverGroup::new()));

impl LookupGroup<CacheKey, LookupOutcome> {
    /// Process-wide dedupe table. Resolvers built with it coalesce identical
    /// lookups with each other, keyed by the lookup key alone.
    pub fn global() -> Arc<ResolverGroup> {
        Arc::clone(&GLOBAL_GROUP)
    }
}

/// Construction-time settings; immutable afterwards.
#[derive(Clone, Default)]
pub struct ResolverConfig {
    /// Bound on each provider call. Zero means unbounded.
    pub timeout: Duration,
    /// Overrides the system provider.
    pub provider: Option<Arc<dyn LookupProvider>>,
}

impl fmt::Debug for ResolverConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolverConfig")
            .field("timeout", &self.timeout)
            .field("provider", &self.provider.as_ref().map(|_| "custom").unwrap_or("system"))
            .finish()
    }
}

#[derive(Default)]
pub struct ResolverBuilder {
    timeout: Duration,
    provider: Option<Arc<dyn LookupProvider>>,
    group: Option<Arc<ResolverGroup>>,
}

impl ResolverBuilder {
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LookupProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Shares a dedupe table with other resolvers, e.g. `ResolverGroup::global()`.
    pub fn group(mut self, group: Arc<ResolverGroup>) -> Self {
        self.group = Some(group);
        self
    }

    pub fn build(self) -> Resolver {
        let provider: Arc<dyn LookupProvider> = match self.provider {
            Some(provider) => provider,
            None => SystemProvider::shared(),
        };
        Resolver {
            timeout: self.timeout,
            provider,
            store: Arc::new(CacheStore::new()),
            group: self.group.unwrap_or_else(|| Arc::new(ResolverGroup::new())),
            stats: Arc::new(ResolverStats::default()),
        }
    }
}

/// Caching resolver in front of a `LookupProvider`.
///
/// Entries have no TTL. They live until `remove`, or until a `refresh` finds
/// them unread since the previous one.
#[derive(Clone)]
pub struct Resolver {
    timeout: Duration,
    provider: Arc<dyn LookupProvider>,
    store: Arc<CacheStore>,
    group: Arc<ResolverGroup>,
    stats: Arc<ResolverStats>,
}

impl Resolver {
    pub fn new(config: ResolverConfig) -> Self {
        let mut builder = Self::builder().timeout(config.timeout);
        if let Some(provider) = config.provider {
            builder = builder.provider(provider);
        }
        builder.build()
    }

    pub fn builder() -> ResolverBuilder {
        ResolverBuilder::default()
    }

    /// Looks up the addresses of `host`.
    pub async fn lookup_host(&self, ctx: &LookupContext, host: &str) -> Result<Records, ResolveError> {
        self.lookup(ctx, CacheKey::host(host)).await
    }

    /// Looks up the names pointing at `addr`.
    pub async fn lookup_addr(&self, ctx: &LookupContext, addr: &str) -> Result<Records, ResolveError> {
        self.lookup(ctx, CacheKey::addr(addr)).await
    }

    /// Drops the cached addresses of `host`.
    ///
    /// Best effort: a lookup of `host` already in flight may still complete
    /// afterwards and repopulate the entry.
    pub fn remove(&self, host: &str) {
        self.store.remove(&CacheKey::host(host));
    }

    /// Evicts entries not read since the previous refresh and re-resolves the
    /// rest, marking them unread. Per-entry failures are not reported; an
    /// entry whose re-resolution fails keeps its previous records.
    pub async fn refresh(&self) {
        let started = Instant::now();
        let (used, unused) = self.store.snapshot_used_and_unused();

        let evicted = if unused.is_empty() {
            0
        } else {
            self.store.remove_unused(&unused)
        };
        self.stats.evicted(evicted);

        let ctx = LookupContext::background();
        let mut failed = 0usize;
        for key in used.iter() {
            match self.update(&ctx, key.clone(), false).await {
                Ok(_) => self.stats.refreshed(),
                Err(err) => {
                    failed += 1;
                    debug!(key = %key, error = %err, "refresh left entry uncached");
                }
            }
        }

        info!(
            event = "cache_refresh",
            evicted,
            refreshed = used.len() - failed,
            failed,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "cache refreshed"
        );
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Number of cached entries, forward and reverse.
    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    async fn lookup(&self, ctx: &LookupContext, key: CacheKey) -> Result<Records, ResolveError> {
        if let Some(records) = self.store.get(&key) {
            self.stats.hit();
            debug!(key = %key, "cache hit");
            return Ok(records);
        }
        self.stats.miss();
        debug!(key = %key, "cache miss");
        self.update(ctx, key, true).await
    }

    /// Resolves `key` through the dedupe group and stores the outcome with
    /// the given used flag.
    async fn update(&self, ctx: &LookupContext, key: CacheKey, used: bool) -> Result<Records, ResolveError> {
        let rx = self.group.run(key.clone(), self.lookup_work(ctx, &key));

        let delivered = tokio::select! {
            biased;
            res = rx => res,
            reason = ctx.done() => {
                if reason == ResolveError::DeadlineExceeded {
                    // A hung provider call must not hold every later lookup of this key.
                    self.group.forget(&key);
                    self.stats.forgotten();
                    warn!(key = %key, "lookup deadline exceeded, in-flight call forgotten");
                }
                return Err(reason);
            }
        };
        let Shared { value, shared } = delivered.unwrap_or(Shared {
            value: Err(ProviderError::Aborted),
            shared: false,
        });

        if shared {
            self.stats.coalesced();
            // Another waiter on the same call may have stored it already.
            if let Some(records) = self.store.get(&key) {
                return Ok(records);
            }
        }

        match value {
            Ok(records) => {
                self.store.put(key, Arc::clone(&records), used);
                Ok(records)
            }
            Err(err) => {
                self.stats.provider_error();
                if let Some(records) = self.store.get(&key) {
                    self.stats.stale_served();
                    warn!(key = %key, error = %err, "lookup failed, serving cached records");
                    return Ok(records);
                }
                Err(err.into())
            }
        }
    }

    /// Provider call for `key`. Carries the caller's trace hooks but not its
    /// deadline, so the call outlives any single waiter.
    fn lookup_work(
        &self,
        ctx: &LookupContext,
        key: &CacheKey,
    ) -> impl Future<Output = LookupOutcome> + Send + use<> {
        let provider = Arc::clone(&self.provider);
        let pctx = ctx.derive(self.timeout);
        let key = key.clone();
        async move {
            let started = Instant::now();
            let lookup = async {
                match &key {
                    CacheKey::Host(host) => provider.lookup_host(&pctx, host).await,
                    CacheKey::Addr(addr) => provider.lookup_addr(&pctx, addr).await,
                }
            };
            let res = match pctx.timeout() {
                Some(limit) => tokio::time::timeout(limit, lookup)
                    .await
                    .unwrap_or_else(|_| Err(ProviderError::Timeout(limit))),
                None => lookup.await,
            };
            let elapsed_ms = started.elapsed().as_millis() as u64;
            match &res {
                Ok(records) => {
                    debug!(key = %key, count = records.len(), elapsed_ms, "provider lookup done")
                }
                Err(err) => warn!(key = %key, error = %err, elapsed_ms, "provider lookup failed"),
            }
            res.map(Records::from)
        }
    }
}

impl Default for Resolver {
    fn default() -> Self {
        Self::new(ResolverConfig::default())
    }
}
