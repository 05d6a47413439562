use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::resolver::Resolver;

/// Drives `Resolver::refresh` every `period` until `shutdown` fires.
/// The first sweep runs one full period after start.
pub fn spawn_refresher(
    resolver: Resolver,
    period: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(interval_secs = period.as_secs(), "cache refresher started");
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // interval fires immediately; skip that tick.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    debug!("starting cache refresh cycle");
                    resolver.refresh().await;
                }
            }
        }
        info!("cache refresher stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{LookupContext, ProviderContext};
    use crate::error::ProviderError;
    use crate::provider::LookupProvider;
    use async_trait::async_trait;
    use std::sync::Arc;
    use tokio::time::timeout;

    struct StaticProvider;

    #[async_trait]
    impl LookupProvider for StaticProvider {
        async fn lookup_host(
            &self,
            _ctx: &ProviderContext,
            _host: &str,
        ) -> Result<Vec<String>, ProviderError> {
            Ok(vec!["192.0.2.1".to_string()])
        }

        async fn lookup_addr(
            &self,
            _ctx: &ProviderContext,
            addr: &str,
        ) -> Result<Vec<String>, ProviderError> {
            Err(ProviderError::NotFound(addr.to_string()))
        }
    }

    #[tokio::test]
    async fn refresher_evicts_idle_entries_and_stops_on_shutdown() {
        let resolver = Resolver::builder().provider(Arc::new(StaticProvider)).build();
        resolver
            .lookup_host(&LookupContext::background(), "idle.example")
            .await
            .expect("lookup");

        let shutdown = CancellationToken::new();
        let handle = spawn_refresher(resolver.clone(), Duration::from_millis(20), shutdown.clone());

        // Two sweeps demote then evict the untouched entry.
        timeout(Duration::from_secs(2), async {
            while !resolver.is_empty() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("entry never evicted");
        assert!(resolver.stats().evicted >= 1);

        shutdown.cancel();
        timeout(Duration::from_secs(1), handle)
            .await
            .expect("refresher ignored shutdown")
            .expect("refresher panicked");
    }
}
