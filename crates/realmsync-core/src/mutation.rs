//! Optimistic mutations: snapshot, speculative write, network write,
//! invalidate or roll back.
//!
//! The hook ordering is the correctness contract of this module. The
//! `on_mutate` hook captures a [`MutationSnapshot`] and applies its
//! optimistic writes in one synchronous turn, so no settling fetch can be
//! observed between capture and write. After the network write settles,
//! the affected keys are either invalidated to fresh server truth
//! (`on_success`) or restored to the exact snapshot. A write the UI saw
//! optimistically never silently disappears.

use std::future::Future;
use std::sync::{Arc, Mutex};

use tracing::{debug, warn};

use crate::cache::{MutationSnapshot, QueryCache};
use crate::error::MutationError;

/// State of the most recent `mutate` call on a coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationStatus {
    Idle,
    Pending,
    Success,
    Error,
}

type OnMutate<I> = Box<dyn FnOnce(&QueryCache, &I) -> MutationSnapshot + Send>;
type OnSuccess<I, R> = Box<dyn FnOnce(&QueryCache, &R, &I) + Send>;
type OnError<I> = Box<dyn FnOnce(&QueryCache, &MutationError, &I, Option<&MutationSnapshot>) + Send>;

/// Hooks for one `mutate` call. All hooks are synchronous; the only
/// suspension point of a mutation is the network write itself.
pub struct MutationOptions<I, R> {
    on_mutate: Option<OnMutate<I>>,
    on_success: Option<OnSuccess<I, R>>,
    on_error: Option<OnError<I>>,
}

impl<I, R> Default for MutationOptions<I, R> {
    fn default() -> Self {
        Self {
            on_mutate: None,
            on_success: None,
            on_error: None,
        }
    }
}

impl<I, R> MutationOptions<I, R> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Capture the snapshot and apply optimistic writes. The hook should
    /// call [`QueryCache::snapshot`] for every key it is about to touch,
    /// then write through [`QueryCache::set_data`], and return the
    /// snapshot.
    pub fn on_mutate<F>(mut self, hook: F) -> Self
    where
        F: FnOnce(&QueryCache, &I) -> MutationSnapshot + Send + 'static,
    {
        self.on_mutate = Some(Box::new(hook));
        self
    }

    /// Runs after a confirmed write; typically invalidates every key whose
    /// server-side truth may have changed.
    pub fn on_success<F>(mut self, hook: F) -> Self
    where
        F: FnOnce(&QueryCache, &R, &I) + Send + 'static,
    {
        self.on_success = Some(Box::new(hook));
        self
    }

    /// Runs after a failed write, once rollback has already restored the
    /// snapshot. For caller-side notification, not for cache repair.
    pub fn on_error<F>(mut self, hook: F) -> Self
    where
        F: FnOnce(&QueryCache, &MutationError, &I, Option<&MutationSnapshot>) + Send + 'static,
    {
        self.on_error = Some(Box::new(hook));
        self
    }
}

/// Executes writes against the backend with optimistic cache updates.
///
/// One coordinator models one logical mutation operation (the seam a
/// `use_mutation` style hook sits on); its status tracks the most recent
/// call.
pub struct MutationCoordinator {
    cache: Arc<QueryCache>,
    status: Mutex<MutationStatus>,
}

impl MutationCoordinator {
    pub fn new(cache: Arc<QueryCache>) -> Self {
        Self {
            cache,
            status: Mutex::new(MutationStatus::Idle),
        }
    }

    pub fn cache(&self) -> &Arc<QueryCache> {
        &self.cache
    }

    pub fn status(&self) -> MutationStatus {
        match self.status.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status() == MutationStatus::Pending
    }

    fn set_status(&self, status: MutationStatus) {
        match self.status.lock() {
            Ok(mut guard) => *guard = status,
            Err(poisoned) => *poisoned.into_inner() = status,
        }
    }

    /// Run one mutation: snapshot + optimistic write, network write, then
    /// invalidate (via `on_success`) or roll back.
    ///
    /// Rollback is performed by the coordinator itself before `on_error`
    /// runs, so the exact restore happens even without an error hook. The
    /// error is returned to the caller after rollback; it is never
    /// swallowed.
    pub async fn mutate<I, R, F, Fut>(
        &self,
        input: I,
        mutation_fn: F,
        options: MutationOptions<I, R>,
    ) -> Result<R, MutationError>
    where
        I: Clone,
        F: FnOnce(I) -> Fut,
        Fut: Future<Output = Result<R, MutationError>>,
    {
        self.set_status(MutationStatus::Pending);

        // Synchronous turn: capture + optimistic write, with no await in
        // between.
        let snapshot = options
            .on_mutate
            .map(|hook| hook(self.cache.as_ref(), &input));

        match mutation_fn(input.clone()).await {
            Ok(result) => {
                if let Some(hook) = options.on_success {
                    hook(self.cache.as_ref(), &result, &input);
                }
                self.set_status(MutationStatus::Success);
                debug!("mutation confirmed");
                Ok(result)
            }
            Err(err) => {
                if let Some(snapshot) = snapshot.as_ref() {
                    self.cache.restore(snapshot);
                    warn!(error = %err, restored = snapshot.len(), "mutation failed, rolled back optimistic writes");
                } else {
                    warn!(error = %err, "mutation failed");
                }
                if let Some(hook) = options.on_error {
                    hook(self.cache.as_ref(), &err, &input, snapshot.as_ref());
                }
                self.set_status(MutationStatus::Error);
                Err(err)
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::QueryKey;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn rsvp_key() -> QueryKey {
        QueryKey::EventAttendees { event_id: 7 }
    }

    fn setup() -> (Arc<QueryCache>, MutationCoordinator) {
        let cache = Arc::new(QueryCache::new());
        let coordinator = MutationCoordinator::new(Arc::clone(&cache));
        (cache, coordinator)
    }

    #[tokio::test]
    async fn test_failed_mutation_rolls_back_to_exact_snapshot() {
        let (cache, coordinator) = setup();
        cache.set_data(&rsvp_key(), json!({"going": 4}));

        let options = MutationOptions::<u64, ()>::new().on_mutate(|cache, _event_id| {
            let snapshot = cache.snapshot(&[rsvp_key()]);
            cache.set_data(&rsvp_key(), json!({"going": 5}));
            snapshot
        });

        let result = coordinator
            .mutate(
                7u64,
                |_event_id| async { Err(MutationError::Network("timeout".to_string())) },
                options,
            )
            .await;

        assert!(result.is_err());
        assert_eq!(coordinator.status(), MutationStatus::Error);
        // Exactly the pre-mutation value: not the optimistic one, not empty.
        assert_eq!(
            cache.get(&rsvp_key()).expect("entry").data,
            Some(json!({"going": 4}))
        );
    }

    #[tokio::test]
    async fn test_successful_mutation_invalidates_via_hook() {
        let (cache, coordinator) = setup();
        cache.set_data(&rsvp_key(), json!({"going": 4}));

        let options = MutationOptions::<u64, String>::new()
            .on_mutate(|cache, _| {
                let snapshot = cache.snapshot(&[rsvp_key()]);
                cache.set_data(&rsvp_key(), json!({"going": 5}));
                snapshot
            })
            .on_success(|cache, _result, _input| {
                cache.invalidate_key(&rsvp_key());
            });

        let result = coordinator
            .mutate(
                7u64,
                |_| async { Ok("confirmed".to_string()) },
                options,
            )
            .await
            .expect("mutation");
        assert_eq!(result, "confirmed");
        assert_eq!(coordinator.status(), MutationStatus::Success);

        let entry = cache.get(&rsvp_key()).expect("entry");
        // Optimistic value stands, but the key is marked for refetch.
        assert_eq!(entry.data, Some(json!({"going": 5})));
        assert!(entry.invalidated);
    }

    #[tokio::test]
    async fn test_error_hook_sees_error_after_rollback() {
        let (cache, coordinator) = setup();
        cache.set_data(&rsvp_key(), json!("before"));

        let observed_rollback = Arc::new(AtomicBool::new(false));
        let observed = Arc::clone(&observed_rollback);
        let options = MutationOptions::<(), ()>::new()
            .on_mutate(|cache, _| {
                let snapshot = cache.snapshot(&[rsvp_key()]);
                cache.set_data(&rsvp_key(), json!("optimistic"));
                snapshot
            })
            .on_error(move |cache, err, _input, snapshot| {
                // Rollback has already run by the time this hook fires.
                let data = cache.get(&rsvp_key()).and_then(|e| e.data);
                observed.store(
                    data == Some(json!("before"))
                        && snapshot.is_some()
                        && matches!(err, MutationError::Rejected(_)),
                    Ordering::SeqCst,
                );
            });

        let result = coordinator
            .mutate(
                (),
                |_| async { Err(MutationError::Rejected("event is full".to_string())) },
                options,
            )
            .await;

        assert_eq!(
            result,
            Err(MutationError::Rejected("event is full".to_string()))
        );
        assert!(observed_rollback.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_mutation_without_hooks_is_a_plain_write() {
        let (cache, coordinator) = setup();
        let result = coordinator
            .mutate(
                1u64,
                |id| async move { Ok(id * 2) },
                MutationOptions::<u64, u64>::new(),
            )
            .await
            .expect("mutation");
        assert_eq!(result, 2);
        assert_eq!(coordinator.status(), MutationStatus::Success);
        assert!(cache.is_empty());
    }
}
