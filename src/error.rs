use std::time::Duration;

use thiserror::Error;

/// Failure reported by the underlying lookup provider.
///
/// Cloneable so a single outcome can be handed to every caller that joined
/// the same in-flight lookup.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    #[error("no records found for {0}")]
    NotFound(String),

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("lookup timed out after {0:?}")]
    Timeout(Duration),

    #[error("resolver error: {0}")]
    Resolver(String),

    #[error("lookup task ended without a result")]
    Aborted,
}

/// Error returned to callers of `Resolver::lookup_host` / `lookup_addr`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("lookup deadline exceeded")]
    DeadlineExceeded,

    #[error("lookup cancelled")]
    Cancelled,
}
