//! # Request Coalescing Module
//!
//! Deduplicates concurrent identical reads. When several callers ask for the same key while
//! a computation for that key is in flight, only the first caller's computation runs and
//! every caller receives a clone of its result or error.
//!
//! This is coalescing, not caching: the registration for a key is removed the moment its
//! computation finishes, and a caller arriving afterwards starts a fresh computation.
//!
//! ## How it works
//!
//! - The in-flight map sits behind a `parking_lot::Mutex`, and looking up an existing entry
//!   and registering a new one happen under a single lock acquisition.
//! - The computation is spawned onto the tokio runtime and wrapped in a
//!   `futures::future::Shared`, so every caller awaits the same output. Dropping a caller
//!   (including the one that started the computation) does not cancel it for the others.
//! - The spawned task removes its own registration when it ends, whether it returned,
//!   timed out or panicked.
//!
//! ## Example
//! ```rust,no_run
//! use service_router::caching::CoalescingGroup;
//!
//! # async fn example() {
//! let group: CoalescingGroup<Vec<String>, String> = CoalescingGroup::new("books");
//! let outcome = group
//!     .execute("get-all", || async { Ok(vec!["Dune".to_string()]) })
//!     .await;
//! assert!(!outcome.shared);
//! # }
//! ```

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::AbortHandle;
use tracing::{debug, warn};

use crate::core::config::CoalescingConfig;
use crate::core::error::CoalesceError;

type SharedCall<T, E> = Shared<BoxFuture<'static, Result<T, CoalesceError<E>>>>;

struct InFlight<T, E> {
    id: u64,
    call: SharedCall<T, E>,
    task: AbortHandle,
}

type CallMap<T, E> = Arc<Mutex<HashMap<String, InFlight<T, E>>>>;

/// Result of [`CoalescingGroup::execute`]
#[derive(Debug, Clone)]
pub struct Coalesced<T, E> {
    /// Value or error produced by the shared computation
    pub result: Result<T, CoalesceError<E>>,

    /// `true` when this caller joined a computation started by another caller
    pub shared: bool,
}

impl<T, E> Coalesced<T, E> {
    /// Drop the sharing flag and keep the result
    pub fn into_result(self) -> Result<T, CoalesceError<E>> {
        self.result
    }

    /// Whether this caller rode another caller's computation
    pub fn is_shared(&self) -> bool {
        self.shared
    }
}

/// Group of in-flight computations keyed by string
///
/// Create one group per controller or resource. Clones share the same in-flight map.
pub struct CoalescingGroup<T, E> {
    name: Arc<str>,
    timeout: Option<Duration>,
    calls: CallMap<T, E>,
    next_id: Arc<AtomicU64>,
}

impl<T, E> Clone for CoalescingGroup<T, E> {
    fn clone(&self) -> Self {
        Self {
            name: Arc::clone(&self.name),
            timeout: self.timeout,
            calls: Arc::clone(&self.calls),
            next_id: Arc::clone(&self.next_id),
        }
    }
}

impl<T, E> fmt::Debug for CoalescingGroup<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CoalescingGroup")
            .field("name", &self.name)
            .field("timeout", &self.timeout)
            .field("in_flight", &self.calls.lock().len())
            .finish()
    }
}

impl<T, E> CoalescingGroup<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    /// Create a group without a timeout
    pub fn new(name: impl Into<String>) -> Self {
        let name: String = name.into();
        Self {
            name: Arc::from(name),
            timeout: None,
            calls: Arc::new(Mutex::new(HashMap::new())),
            next_id: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Create a group using the configured timeout
    pub fn from_config(name: impl Into<String>, config: &CoalescingConfig) -> Self {
        let group = Self::new(name);
        match config.timeout {
            Some(timeout) => group.with_timeout(timeout),
            None => group,
        }
    }

    /// Bound each computation by `timeout`; on expiry every waiter gets
    /// [`CoalesceError::Timeout`]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Group name, used as a metrics label
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run `compute` for `key`, or join the computation already in flight for it
    ///
    /// `compute` is only invoked when this caller starts the computation.
    pub async fn execute<F, Fut>(&self, key: impl Into<String>, compute: F) -> Coalesced<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let key: String = key.into();

        let (call, shared) = {
            let mut calls = self.calls.lock();
            // A finished task still registered never ran to completion (its runtime went
            // away before the first poll), so the entry is replaced.
            match calls.get(&key).filter(|in_flight| !in_flight.task.is_finished()) {
                Some(in_flight) => (in_flight.call.clone(), true),
                None => {
                    let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                    let (call, task) = self.spawn(key.clone(), id, compute());
                    calls.insert(
                        key.clone(),
                        InFlight {
                            id,
                            call: call.clone(),
                            task,
                        },
                    );
                    (call, false)
                }
            }
        };

        if shared {
            debug!(group = %self.name, key = %key, "Joined in-flight computation");
            metrics::counter!("coalescing_shared_total", "group" => self.name.to_string())
                .increment(1);
        } else {
            debug!(group = %self.name, key = %key, "Started computation");
            metrics::counter!("coalescing_executions_total", "group" => self.name.to_string())
                .increment(1);
        }

        Coalesced {
            result: call.await,
            shared,
        }
    }

    /// Forget the in-flight computation for `key`
    ///
    /// Callers already waiting still receive its result; the next caller starts a new
    /// computation. Returns whether a registration was removed.
    pub fn forget(&self, key: &str) -> bool {
        self.calls.lock().remove(key).is_some()
    }

    /// Number of keys with a computation in flight
    pub fn in_flight(&self) -> usize {
        self.calls.lock().len()
    }

    /// Whether a computation for `key` is in flight
    pub fn is_in_flight(&self, key: &str) -> bool {
        self.calls.lock().contains_key(key)
    }

    fn spawn<Fut>(
        &self,
        key: String,
        id: u64,
        computation: Fut,
    ) -> (SharedCall<T, E>, AbortHandle)
    where
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let calls = Arc::clone(&self.calls);
        let waiter_calls = Arc::clone(&self.calls);
        let timeout = self.timeout;
        let task_key = key.clone();

        let handle = tokio::spawn(async move {
            // Built on first poll: the caller still holds the map lock while spawning.
            let _guard = Deregister {
                calls,
                key: task_key.clone(),
                id,
            };

            match timeout {
                Some(limit) => match tokio::time::timeout(limit, computation).await {
                    Ok(result) => result.map_err(CoalesceError::Compute),
                    Err(_) => {
                        warn!(key = %task_key, timeout_ms = limit.as_millis() as u64, "Coalesced computation timed out");
                        Err(CoalesceError::Timeout {
                            key: task_key,
                            timeout_ms: limit.as_millis() as u64,
                        })
                    }
                },
                None => computation.await.map_err(CoalesceError::Compute),
            }
        });

        let task = handle.abort_handle();

        let call = async move {
            match handle.await {
                Ok(result) => result,
                Err(err) if err.is_panic() => {
                    warn!(key = %key, "Coalesced computation panicked");
                    Err(CoalesceError::Panicked { key })
                }
                Err(_) => {
                    // A task dropped before its first poll never built its guard.
                    release(&waiter_calls, &key, id);
                    Err(CoalesceError::Cancelled { key })
                }
            }
        }
        .boxed()
        .shared();

        (call, task)
    }
}

impl<T, E> Default for CoalescingGroup<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new("default")
    }
}

struct Deregister<T, E> {
    calls: CallMap<T, E>,
    key: String,
    id: u64,
}

impl<T, E> Drop for Deregister<T, E> {
    fn drop(&mut self) {
        release(&self.calls, &self.key, self.id);
    }
}

/// Remove the registration for `key` if it still belongs to computation `id`
fn release<T, E>(calls: &CallMap<T, E>, key: &str, id: u64) {
    let mut calls = calls.lock();
    // The key may have been forgotten and re-registered by a newer computation.
    if calls.get(key).map(|in_flight| in_flight.id) == Some(id) {
        calls.remove(key);
    }
}

/// Join key parts with `_`, e.g. `key(["get_id", "42"])` is `"get_id_42"`
pub fn key<I, S>(parts: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut joined = String::new();
    for (index, part) in parts.into_iter().enumerate() {
        if index > 0 {
            joined.push('_');
        }
        joined.push_str(part.as_ref());
    }
    joined
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::Semaphore;

    #[test]
    fn test_key_helper() {
        assert_eq!(key(["get_id", "42"]), "get_id_42");
        assert_eq!(key(["get_id", "3", "9"]), "get_id_3_9");
        assert_eq!(key(["get-all"]), "get-all");
    }

    #[tokio::test]
    async fn test_single_caller_is_not_shared() {
        let group: CoalescingGroup<u32, String> = CoalescingGroup::new("test");
        let outcome = group.execute("k", || async { Ok(7) }).await;

        assert!(!outcome.shared);
        assert_eq!(outcome.result, Ok(7));
        assert_eq!(group.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_computation() {
        let group: CoalescingGroup<Vec<u32>, String> = CoalescingGroup::new("test");
        let calls = Arc::new(AtomicUsize::new(0));
        let gate = Arc::new(Semaphore::new(0));

        let callers = (0..5).map(|_| {
            let calls = Arc::clone(&calls);
            let gate = Arc::clone(&gate);
            group.execute("get-all", move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                let _permit = gate.acquire().await;
                Ok(vec![1, 2, 3])
            })
        });

        let opener = Arc::clone(&gate);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            opener.add_permits(1);
        });

        let outcomes = futures::future::join_all(callers).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(outcomes.iter().filter(|o| !o.shared).count(), 1);
        for outcome in &outcomes {
            assert_eq!(outcome.result, Ok(vec![1, 2, 3]));
        }
        assert_eq!(group.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_errors_are_delivered_verbatim() {
        let group: CoalescingGroup<u32, String> = CoalescingGroup::new("test");
        let outcome = group
            .execute("k", || async { Err("record not found".to_string()) })
            .await;

        assert_eq!(
            outcome.result,
            Err(CoalesceError::Compute("record not found".to_string()))
        );
    }

    #[tokio::test]
    async fn test_completed_key_recomputes() {
        let group: CoalescingGroup<usize, String> = CoalescingGroup::new("test");
        let calls = Arc::new(AtomicUsize::new(0));

        for expected in 1..=2 {
            let counter = Arc::clone(&calls);
            let outcome = group
                .execute("k", move || async move {
                    Ok(counter.fetch_add(1, Ordering::SeqCst) + 1)
                })
                .await;
            assert_eq!(outcome.result, Ok(expected));
            assert!(!outcome.shared);
        }
    }

    #[tokio::test]
    async fn test_timeout_reaches_every_waiter() {
        let group: CoalescingGroup<u32, String> =
            CoalescingGroup::new("test").with_timeout(Duration::from_millis(20));

        let slow = || async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(1)
        };
        let (first, second) = tokio::join!(group.execute("k", slow), group.execute("k", slow));

        for outcome in [&first, &second] {
            assert!(matches!(
                outcome.result,
                Err(CoalesceError::Timeout { timeout_ms: 20, .. })
            ));
        }
        assert!(second.shared);
        assert_eq!(group.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_panic_is_reported_and_deregistered() {
        let group: CoalescingGroup<u32, String> = CoalescingGroup::new("test");
        let outcome = group
            .execute("k", || async {
                if true {
                    panic!("repository exploded");
                }
                Ok(0)
            })
            .await;

        assert_eq!(
            outcome.result,
            Err(CoalesceError::Panicked {
                key: "k".to_string()
            })
        );
        assert!(!group.is_in_flight("k"));
    }

    #[tokio::test]
    async fn test_forget_starts_fresh_computation() {
        let group: CoalescingGroup<&'static str, String> = CoalescingGroup::new("test");
        let gate = Arc::new(Semaphore::new(0));

        let first = tokio::spawn({
            let group = group.clone();
            let gate = Arc::clone(&gate);
            async move {
                group
                    .execute("k", move || async move {
                        let _permit = gate.acquire().await;
                        Ok("old")
                    })
                    .await
            }
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(group.is_in_flight("k"));
        assert!(group.forget("k"));
        assert!(!group.forget("k"));

        let second = group.execute("k", || async { Ok("new") }).await;
        assert!(!second.shared);
        assert_eq!(second.result, Ok("new"));

        gate.add_permits(1);
        let first = first.await.unwrap();
        assert_eq!(first.result, Ok("old"));
        assert_eq!(group.in_flight(), 0);
    }

    #[test]
    fn test_computation_dropped_with_its_runtime_releases_key() {
        let group: CoalescingGroup<u32, String> = CoalescingGroup::new("test");

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let starter = group.clone();
        runtime.block_on(async move {
            let mut call = Box::pin(starter.execute("k", || async { Ok(1) }));
            // The spawned task cannot run before this block yields back to the runtime.
            assert!(futures::poll!(call.as_mut()).is_pending());
        });
        assert_eq!(group.in_flight(), 1);
        drop(runtime);

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let computations = Arc::new(AtomicUsize::new(0));
        for _ in 0..2 {
            let counter = Arc::clone(&computations);
            let outcome = runtime.block_on(group.execute("k", move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(2)
            }));
            assert!(!outcome.shared);
            assert_eq!(outcome.result, Ok(2));
        }
        assert_eq!(computations.load(Ordering::SeqCst), 2);
        assert_eq!(group.in_flight(), 0);
    }
}
