use std::future::Future;
use std::hash::Hash;
use std::sync::{Arc, Mutex, PoisonError};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use rustc_hash::FxBuildHasher;
use tokio::sync::oneshot;

/// Outcome of a coalesced call as seen by one waiter.
#[derive(Debug, Clone)]
pub struct Shared<V> {
    pub value: V,
    /// More than one caller waited on this call.
    pub shared: bool,
}

struct Call<V> {
    waiters: Mutex<Vec<oneshot::Sender<Shared<V>>>>,
}

impl<V> Call<V> {
    fn take_waiters(&self) -> Vec<oneshot::Sender<Shared<V>>> {
        std::mem::take(&mut *self.waiters.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

type Calls<K, V> = Arc<DashMap<K, Arc<Call<V>>, FxBuildHasher>>;

/// Single-flight table: at most one execution of the work for a key is
/// registered at a time, and callers arriving meanwhile join it.
pub struct LookupGroup<K, V>
where
    K: Eq + Hash,
{
    calls: Calls<K, V>,
}

impl<K, V> LookupGroup<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + 'static,
{
    pub fn new() -> Self {
        Self {
            calls: Arc::new(DashMap::with_hasher(FxBuildHasher::default())),
        }
    }

    /// Runs `work` for `key` unless a call for it is already in flight, in
    /// which case the returned receiver joins that call.
    ///
    /// The work is spawned on the tokio runtime, so it completes for the
    /// remaining waiters even if the caller that started it stops waiting.
    /// The receiver fails only if the work panicked.
    pub fn run<F>(&self, key: K, work: F) -> oneshot::Receiver<Shared<V>>
    where
        F: Future<Output = V> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let call = match self.calls.entry(key.clone()) {
            Entry::Occupied(entry) => {
                // Pushed under the shard lock: completion unregisters the
                // call before draining, so this waiter is always drained.
                entry
                    .get()
                    .waiters
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push(tx);
                return rx;
            }
            Entry::Vacant(entry) => {
                let call = Arc::new(Call {
                    waiters: Mutex::new(vec![tx]),
                });
                entry.insert(Arc::clone(&call));
                call
            }
        };

        let guard = CallGuard {
            calls: Arc::clone(&self.calls),
            key,
            call: Arc::clone(&call),
        };
        tokio::spawn(async move {
            let value = work.await;
            drop(guard);
            let waiters = call.take_waiters();
            let shared = waiters.len() > 1;
            for tx in waiters {
                let _ = tx.send(Shared {
                    value: value.clone(),
                    shared,
                });
            }
        });
        rx
    }

    /// Unregisters the in-flight call for `key`, if any. The next `run` starts
    /// a fresh execution; callers already waiting on the old one still get
    /// its outcome.
    pub fn forget(&self, key: &K) {
        self.calls.remove(key);
    }

    /// Number of keys with a registered call.
    pub fn in_flight(&self) -> usize {
        self.calls.len()
    }
}

impl<K, V> Default for LookupGroup<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

/// Unregisters a call when its work finishes or unwinds. Only removes the
/// entry if it still points at this call; after a `forget` the key may
/// belong to a newer one.
struct CallGuard<K, V>
where
    K: Eq + Hash,
{
    calls: Calls<K, V>,
    key: K,
    call: Arc<Call<V>>,
}

impl<K, V> Drop for CallGuard<K, V>
where
    K: Eq + Hash,
{
    fn drop(&mut self) {
        let call = &self.call;
        self.calls
            .remove_if(&self.key, |_, current| Arc::ptr_eq(current, call));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::future::join_all;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Notify;
    use tokio::time::{Duration, timeout};

    #[tokio::test]
    async fn concurrent_runs_share_one_execution() {
        let group: LookupGroup<String, u32> = LookupGroup::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let gate = Arc::new(Notify::new());

        let receivers: Vec<_> = (0..16)
            .map(|_| {
                let calls = calls.clone();
                let gate = gate.clone();
                group.run("k".to_string(), async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    gate.notified().await;
                    7
                })
            })
            .collect();
        assert_eq!(group.in_flight(), 1);
        gate.notify_one();

        let results = timeout(Duration::from_secs(1), join_all(receivers))
            .await
            .expect("coalesced call stalled");
        for res in results {
            let shared = res.expect("delivered");
            assert_eq!(shared.value, 7);
            assert!(shared.shared);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(group.in_flight(), 0);
    }

    #[tokio::test]
    async fn lone_caller_is_not_shared() {
        let group: LookupGroup<&'static str, &'static str> = LookupGroup::new();
        let res = group.run("k", async { "v" }).await.expect("delivered");
        assert_eq!(res.value, "v");
        assert!(!res.shared);
    }

    #[tokio::test]
    async fn sequential_runs_execute_independently() {
        let group: LookupGroup<&'static str, usize> = LookupGroup::new();
        let calls = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let calls = calls.clone();
            group
                .run("k", async move { calls.fetch_add(1, Ordering::SeqCst) })
                .await
                .expect("delivered");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn forget_starts_fresh_call_and_old_waiters_still_complete() {
        let group: LookupGroup<&'static str, &'static str> = LookupGroup::new();
        let gate = Arc::new(Notify::new());

        let hung_gate = gate.clone();
        let old = group.run("k", async move {
            hung_gate.notified().await;
            "old"
        });
        group.forget(&"k");
        assert_eq!(group.in_flight(), 0);

        let fresh = timeout(Duration::from_secs(1), group.run("k", async { "new" }))
            .await
            .expect("fresh call blocked behind forgotten one")
            .expect("delivered");
        assert_eq!(fresh.value, "new");

        gate.notify_one();
        let old = old.await.expect("forgotten call still delivers");
        assert_eq!(old.value, "old");
    }

    #[tokio::test]
    async fn forgotten_call_does_not_unregister_newer_call() {
        let group: LookupGroup<&'static str, u8> = LookupGroup::new();
        let first_gate = Arc::new(Notify::new());
        let second_gate = Arc::new(Notify::new());

        let g = first_gate.clone();
        let first = group.run("k", async move {
            g.notified().await;
            1
        });
        group.forget(&"k");
        let g = second_gate.clone();
        let second = group.run("k", async move {
            g.notified().await;
            2
        });

        first_gate.notify_one();
        assert_eq!(first.await.expect("delivered").value, 1);
        assert_eq!(group.in_flight(), 1);

        second_gate.notify_one();
        assert_eq!(second.await.expect("delivered").value, 2);
        assert_eq!(group.in_flight(), 0);
    }

    #[tokio::test]
    async fn panicking_work_unregisters_and_closes_receivers() {
        let group: LookupGroup<&'static str, u8> = LookupGroup::new();
        let rx = group.run("k", async {
            let missing: Option<u8> = None;
            missing.expect("lookup blew up")
        });
        assert!(rx.await.is_err());
        assert_eq!(group.in_flight(), 0);

        let res = group.run("k", async { 3 }).await.expect("delivered");
        assert_eq!(res.value, 3);
    }
}
