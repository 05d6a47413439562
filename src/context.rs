use std::fmt;
use std::future::{Future, pending};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;

use crate::error::{ProviderError, ResolveError};

/// Passed to the start hook when the provider begins a host lookup.
#[derive(Debug, Clone)]
pub struct LookupStart {
    pub host: String,
}

/// Passed to the done hook once the provider has an outcome.
#[derive(Debug, Clone)]
pub struct LookupDone {
    pub addrs: Vec<String>,
    pub error: Option<ProviderError>,
    pub elapsed: Duration,
}

pub type StartHook = Arc<dyn Fn(&LookupStart) + Send + Sync>;
pub type DoneHook = Arc<dyn Fn(&LookupDone) + Send + Sync>;

/// Start/done observability hooks. Clones share the same callbacks.
#[derive(Clone, Default)]
pub struct LookupTrace {
    pub on_start: Option<StartHook>,
    pub on_done: Option<DoneHook>,
}

impl LookupTrace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_start(mut self, hook: impl Fn(&LookupStart) + Send + Sync + 'static) -> Self {
        self.on_start = Some(Arc::new(hook));
        self
    }

    pub fn on_done(mut self, hook: impl Fn(&LookupDone) + Send + Sync + 'static) -> Self {
        self.on_done = Some(Arc::new(hook));
        self
    }
}

impl fmt::Debug for LookupTrace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LookupTrace")
            .field("on_start", &self.on_start.is_some())
            .field("on_done", &self.on_done.is_some())
            .finish()
    }
}

/// Per-call context of a lookup: when the caller stops waiting, and which
/// trace hooks the underlying provider call should fire.
///
/// Cancelling only stops this caller from waiting; a lookup shared with other
/// callers keeps running for them.
#[derive(Debug, Clone, Default)]
pub struct LookupContext {
    deadline: Option<Instant>,
    cancel: Option<CancellationToken>,
    trace: Option<LookupTrace>,
}

impl LookupContext {
    /// Context that never expires.
    pub fn background() -> Self {
        Self::default()
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(current) => current.min(deadline),
            None => deadline,
        });
        self
    }

    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn with_trace(mut self, trace: LookupTrace) -> Self {
        self.trace = Some(trace);
        self
    }

    /// Resolves with the reason once the caller should stop waiting.
    /// Pending forever for a background context.
    pub async fn done(&self) -> ResolveError {
        let deadline = async {
            match self.deadline {
                Some(at) => sleep_until(at).await,
                None => pending::<()>().await,
            }
        };
        let cancelled = async {
            match &self.cancel {
                Some(token) => token.cancelled().await,
                None => pending::<()>().await,
            }
        };
        tokio::select! {
            _ = deadline => ResolveError::DeadlineExceeded,
            _ = cancelled => ResolveError::Cancelled,
        }
    }

    /// Derives the context for the provider call. Only the trace hooks carry
    /// over; the caller's deadline and token never reach the shared lookup.
    pub(crate) fn derive(&self, timeout: Duration) -> ProviderContext {
        ProviderContext {
            timeout: (!timeout.is_zero()).then_some(timeout),
            trace: self.trace.clone(),
        }
    }
}

/// Context handed to a `LookupProvider`.
#[derive(Debug, Clone, Default)]
pub struct ProviderContext {
    timeout: Option<Duration>,
    trace: Option<LookupTrace>,
}

impl ProviderContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_trace(mut self, trace: LookupTrace) -> Self {
        self.trace = Some(trace);
        self
    }

    /// Timeout the resolver applies around this call, if any.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn trace(&self) -> Option<&LookupTrace> {
        self.trace.as_ref()
    }

    /// Runs a host lookup between the start and done hooks.
    pub async fn traced<F>(&self, host: &str, lookup: F) -> Result<Vec<String>, ProviderError>
    where
        F: Future<Output = Result<Vec<String>, ProviderError>>,
    {
        let hooks = self.trace.as_ref();
        if let Some(hook) = hooks.and_then(|t| t.on_start.as_ref()) {
            hook(&LookupStart {
                host: host.to_string(),
            });
        }
        let start = std::time::Instant::now();
        let res = lookup.await;
        if let Some(hook) = hooks.and_then(|t| t.on_done.as_ref()) {
            let (addrs, error) = match &res {
                Ok(addrs) => (addrs.clone(), None),
                Err(err) => (Vec::new(), Some(err.clone())),
            };
            hook(&LookupDone {
                addrs,
                error,
                elapsed: start.elapsed(),
            });
        }
        res
    }
}
