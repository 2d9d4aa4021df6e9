//! Query execution: staleness checks, single-flight deduplication and
//! sequence-gated application of results.
//!
//! The executor owns no entry state; everything it learns is written back
//! through [`QueryCache`] methods. Its one piece of bookkeeping is the
//! in-flight map: key -> shared future handle, so concurrent callers of
//! the same key share one network call.

use std::future::Future;
use std::sync::Arc;

use chrono::Duration;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt, Shared};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::cache::QueryCache;
use crate::error::FetchError;
use crate::key::QueryKey;

/// Per-call options for [`QueryExecutor::run`].
#[derive(Debug, Clone)]
pub struct QueryOptions {
    /// How long a successful entry may serve reads without refetching.
    pub stale_time: Duration,
    /// When false, `run` leaves the entry untouched and fetches nothing.
    pub enabled: bool,
}

impl QueryOptions {
    pub fn new(stale_time: Duration) -> Self {
        Self {
            stale_time,
            enabled: true,
        }
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

impl Default for QueryOptions {
    /// Zero stale time: cached data is served only by an explicit
    /// `stale_time`, never by default.
    fn default() -> Self {
        Self::new(Duration::zero())
    }
}

type SharedFetch = Shared<BoxFuture<'static, Result<Value, FetchError>>>;

struct InFlight {
    sequence: u64,
    future: SharedFetch,
}

/// Result of claiming the in-flight slot for a key.
enum FlightSlot {
    /// This call dispatched the fetch; it owns cleanup of the slot.
    Leader(u64, SharedFetch),
    /// Another call's fetch is in flight; share its settlement.
    Follower(SharedFetch),
}

/// Runs fetches against a [`QueryCache`], deduplicating concurrent
/// requests per key and discarding superseded results.
///
/// Errors are not retried here; retry policy, if any, belongs to the
/// transport or the caller.
pub struct QueryExecutor {
    cache: Arc<QueryCache>,
    in_flight: DashMap<QueryKey, InFlight>,
}

impl QueryExecutor {
    pub fn new(cache: Arc<QueryCache>) -> Self {
        Self {
            cache,
            in_flight: DashMap::new(),
        }
    }

    pub fn cache(&self) -> &Arc<QueryCache> {
        &self.cache
    }

    /// Resolve `key`, fetching through `fetcher` when the cached entry is
    /// missing, stale, errored or invalidated.
    ///
    /// Returns `Ok(None)` only when `options.enabled` is false. Concurrent
    /// calls for the same key share a single fetch; a call that arrives
    /// after the entry was invalidated dispatches a superseding fetch
    /// instead, and the older settlement is dropped by the sequence check.
    pub async fn run<T, F, Fut>(
        &self,
        key: QueryKey,
        fetcher: F,
        options: QueryOptions,
    ) -> Result<Option<T>, FetchError>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, FetchError>> + Send + 'static,
    {
        if !options.enabled {
            return Ok(None);
        }

        if let Some(value) = self.cache.fresh_success(&key, options.stale_time) {
            return decode(value).map(Some);
        }

        // Atomic check-and-claim of the in-flight slot. An invalidated
        // entry must not join the already-running fetch: its result may
        // predate whatever invalidated it, so a superseding fetch is
        // dispatched and replaces the slot.
        let supersede = self.cache.is_invalidated(&key);
        let slot = match self.in_flight.entry(key.clone()) {
            Entry::Occupied(mut occupied) if supersede => {
                let (sequence, future) = self.dispatch(&key, fetcher);
                occupied.insert(InFlight {
                    sequence,
                    future: future.clone(),
                });
                FlightSlot::Leader(sequence, future)
            }
            Entry::Occupied(occupied) => FlightSlot::Follower(occupied.get().future.clone()),
            Entry::Vacant(vacant) => {
                let (sequence, future) = self.dispatch(&key, fetcher);
                vacant.insert(InFlight {
                    sequence,
                    future: future.clone(),
                });
                FlightSlot::Leader(sequence, future)
            }
        };

        match slot {
            FlightSlot::Follower(future) => {
                debug!(key = %key, "joined in-flight fetch");
                decode(future.await?).map(Some)
            }
            FlightSlot::Leader(sequence, future) => {
                let outcome = future.await;
                // Drop the slot once settled, but only if a superseding
                // dispatch has not replaced it in the meantime.
                self.in_flight
                    .remove_if(&key, |_, flight| flight.sequence == sequence);
                decode(outcome?).map(Some)
            }
        }
    }

    /// Mark the entry pending, assign its sequence and build the shared
    /// settlement future. The future itself writes the outcome back to the
    /// cache (sequence-gated), so it lands even if every caller stops
    /// polling after the first one completes.
    fn dispatch<T, F, Fut>(&self, key: &QueryKey, fetcher: F) -> (u64, SharedFetch)
    where
        T: Serialize + Send + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, FetchError>> + Send + 'static,
    {
        let sequence = self.cache.begin_fetch(key);
        let cache = Arc::clone(&self.cache);
        let settle_key = key.clone();
        let fut = fetcher();
        let shared = async move {
            let result = fut.await.and_then(encode);
            cache.complete_fetch(&settle_key, sequence, &result);
            result
        }
        .boxed()
        .shared();
        (sequence, shared)
    }
}

fn encode<T: Serialize>(value: T) -> Result<Value, FetchError> {
    serde_json::to_value(value).map_err(|e| FetchError::Encode(e.to_string()))
}

fn decode<T: DeserializeOwned>(value: Value) -> Result<T, FetchError> {
    serde_json::from_value(value).map_err(|e| FetchError::Decode(e.to_string()))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::QueryStatus;
    use serde::Deserialize;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration as StdDuration;
    use tokio::sync::{oneshot, Notify};

    fn key() -> QueryKey {
        QueryKey::Profile {
            address: "realm1qaddr".to_string(),
        }
    }

    fn setup() -> (Arc<QueryCache>, Arc<QueryExecutor>) {
        let cache = Arc::new(QueryCache::new());
        let executor = Arc::new(QueryExecutor::new(Arc::clone(&cache)));
        (cache, executor)
    }

    #[tokio::test]
    async fn test_concurrent_runs_share_one_fetch() {
        let (_cache, executor) = setup();
        let calls = Arc::new(AtomicUsize::new(0));
        let gate = Arc::new(Notify::new());

        let mut handles = Vec::new();
        for _ in 0..5 {
            let executor = Arc::clone(&executor);
            let calls = Arc::clone(&calls);
            let gate = Arc::clone(&gate);
            handles.push(tokio::spawn(async move {
                executor
                    .run::<String, _, _>(
                        key(),
                        move || async move {
                            calls.fetch_add(1, Ordering::SeqCst);
                            gate.notified().await;
                            Ok("alice".to_string())
                        },
                        QueryOptions::default(),
                    )
                    .await
            }));
        }

        // Let every task reach the in-flight slot, then release the leader.
        tokio::time::sleep(StdDuration::from_millis(20)).await;
        gate.notify_waiters();

        for handle in handles {
            let value = handle.await.expect("join").expect("fetch");
            assert_eq!(value, Some("alice".to_string()));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_fresh_entry_is_served_without_refetch() {
        let (cache, executor) = setup();
        let calls = Arc::new(AtomicUsize::new(0));

        for _ in 0..2 {
            let calls = Arc::clone(&calls);
            let value = executor
                .run::<String, _, _>(
                    key(),
                    move || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Ok("v1".to_string())
                    },
                    QueryOptions::new(Duration::seconds(60)),
                )
                .await
                .expect("fetch");
            assert_eq!(value, Some("v1".to_string()));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // Once the entry ages past stale_time the next run refetches.
        cache.backdate(&key(), Duration::seconds(61));
        let calls_again = Arc::clone(&calls);
        executor
            .run::<String, _, _>(
                key(),
                move || async move {
                    calls_again.fetch_add(1, Ordering::SeqCst);
                    Ok("v2".to_string())
                },
                QueryOptions::new(Duration::seconds(60)),
            )
            .await
            .expect("fetch");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    /// Dispatch A, invalidate, dispatch B, then settle in the given order;
    /// the later-dispatched fetch must win either way.
    async fn superseded_fetch_scenario(resolve_b_first: bool) {
        let (cache, executor) = setup();

        let (tx_a, rx_a) = oneshot::channel::<()>();
        let exec_a = Arc::clone(&executor);
        let handle_a = tokio::spawn(async move {
            exec_a
                .run::<String, _, _>(
                    key(),
                    move || async move {
                        let _ = rx_a.await;
                        Ok("a".to_string())
                    },
                    QueryOptions::default(),
                )
                .await
        });
        tokio::time::sleep(StdDuration::from_millis(10)).await;

        // Invalidation after dispatch: the next run supersedes A instead
        // of joining it.
        cache.invalidate_key(&key());

        let (tx_b, rx_b) = oneshot::channel::<()>();
        let exec_b = Arc::clone(&executor);
        let handle_b = tokio::spawn(async move {
            exec_b
                .run::<String, _, _>(
                    key(),
                    move || async move {
                        let _ = rx_b.await;
                        Ok("b".to_string())
                    },
                    QueryOptions::default(),
                )
                .await
        });
        tokio::time::sleep(StdDuration::from_millis(10)).await;

        if resolve_b_first {
            let _ = tx_b.send(());
            tokio::time::sleep(StdDuration::from_millis(10)).await;
            let _ = tx_a.send(());
        } else {
            let _ = tx_a.send(());
            tokio::time::sleep(StdDuration::from_millis(10)).await;
            let _ = tx_b.send(());
        }

        // Each caller still receives its own fetch's value...
        assert_eq!(
            handle_a.await.expect("join").expect("fetch"),
            Some("a".to_string())
        );
        assert_eq!(
            handle_b.await.expect("join").expect("fetch"),
            Some("b".to_string())
        );
        // ...but the cache holds the later-dispatched result.
        let entry = cache.get(&key()).expect("entry");
        assert_eq!(entry.data, Some(serde_json::json!("b")));
        assert_eq!(entry.status, QueryStatus::Success);
    }

    #[tokio::test]
    async fn test_later_dispatch_wins_when_it_settles_first() {
        superseded_fetch_scenario(true).await;
    }

    #[tokio::test]
    async fn test_later_dispatch_wins_when_it_settles_last() {
        superseded_fetch_scenario(false).await;
    }

    #[tokio::test]
    async fn test_invalidate_forces_refetch_within_stale_time() {
        let (cache, executor) = setup();
        let calls = Arc::new(AtomicUsize::new(0));

        let run_once = |executor: Arc<QueryExecutor>, calls: Arc<AtomicUsize>| async move {
            executor
                .run::<String, _, _>(
                    key(),
                    move || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Ok("v".to_string())
                    },
                    QueryOptions::new(Duration::seconds(600)),
                )
                .await
                .expect("fetch");
        };

        run_once(Arc::clone(&executor), Arc::clone(&calls)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // Well within stale_time: served from cache.
        run_once(Arc::clone(&executor), Arc::clone(&calls)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // Invalidation overrides the young entry's freshness.
        cache.invalidate_key(&key());
        run_once(Arc::clone(&executor), Arc::clone(&calls)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_disabled_run_touches_nothing() {
        let (cache, executor) = setup();
        let value = executor
            .run::<String, _, _>(
                key(),
                || async { Ok("never".to_string()) },
                QueryOptions::default().with_enabled(false),
            )
            .await
            .expect("run");
        assert_eq!(value, None);
        assert!(cache.get(&key()).is_none());
    }

    #[tokio::test]
    async fn test_fetch_error_is_recorded_and_returned() {
        let (cache, executor) = setup();
        let result = executor
            .run::<String, _, _>(
                key(),
                || async { Err(FetchError::Remote("503".to_string())) },
                QueryOptions::default(),
            )
            .await;
        assert_eq!(result, Err(FetchError::Remote("503".to_string())));

        let entry = cache.get(&key()).expect("entry");
        assert_eq!(entry.status, QueryStatus::Error);
        assert_eq!(entry.error.as_deref(), Some("remote fetch failed: 503"));
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct TestProfile {
        #[serde(rename = "displayName")]
        display_name: String,
    }

    #[tokio::test]
    async fn test_profile_fetch_end_to_end() {
        let (cache, executor) = setup();
        let calls = Arc::new(AtomicUsize::new(0));

        let calls_first = Arc::clone(&calls);
        let profile = executor
            .run::<TestProfile, _, _>(
                key(),
                move || async move {
                    calls_first.fetch_add(1, Ordering::SeqCst);
                    Ok(TestProfile {
                        display_name: "Alice".to_string(),
                    })
                },
                QueryOptions::new(Duration::milliseconds(60_000)),
            )
            .await
            .expect("fetch")
            .expect("enabled");
        assert_eq!(profile.display_name, "Alice");
        assert_eq!(cache.get(&key()).expect("entry").status, QueryStatus::Success);

        // Immediate re-run within stale_time: served from cache.
        let calls_second = Arc::clone(&calls);
        let cached = executor
            .run::<TestProfile, _, _>(
                key(),
                move || async move {
                    calls_second.fetch_add(1, Ordering::SeqCst);
                    Ok(TestProfile {
                        display_name: "not used".to_string(),
                    })
                },
                QueryOptions::new(Duration::milliseconds(60_000)),
            )
            .await
            .expect("fetch")
            .expect("enabled");
        assert_eq!(cached, profile);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
