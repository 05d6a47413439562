//! In-process DNS lookup cache.
//!
//! A [`Resolver`] sits in front of a [`LookupProvider`] and caches forward
//! (host -> addresses) and reverse (address -> names) lookups. Concurrent
//! misses for the same key share one provider call. Entries carry no TTL:
//! [`Resolver::refresh`] evicts entries unread since the previous refresh and
//! re-resolves the rest.

pub mod cache;
pub mod config;
pub mod context;
pub mod error;
pub mod group;
pub mod key;
pub mod provider;
pub mod refresher;
pub mod resolver;
pub mod stats;
pub mod watcher;

pub use cache::Records;
pub use context::{LookupContext, LookupDone, LookupStart, LookupTrace, ProviderContext};
pub use error::{ProviderError, ResolveError};
pub use key::CacheKey;
pub use provider::{LookupProvider, SystemProvider};
pub use refresher::spawn_refresher;
pub use resolver::{Resolver, ResolverBuilder, ResolverConfig, ResolverGroup};
pub use stats::StatsSnapshot;
