//! Request batching: coalesce per-ID lookups into one round trip.
//!
//! Rendering a burst of avatars issues dozens of independent "get profile
//! for address X" calls within a few milliseconds. A [`Batcher`]
//! accumulates the IDs arriving inside a short debounce window, issues one
//! multi-item request, and demultiplexes the response back to each caller.
//! Callers never know batching happened.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::error::FetchError;

/// Debounce window before a batch is flushed.
/// Long enough to capture one rendering burst, short enough to be
/// imperceptible next to network latency.
pub const DEFAULT_BATCH_WINDOW: Duration = Duration::from_millis(10);

/// A window holding more IDs than this is flushed immediately rather than
/// waiting out the timer.
pub const DEFAULT_MAX_BATCH_SIZE: usize = 50;

type BatchFetcher<I, T> =
    Arc<dyn Fn(Vec<I>) -> BoxFuture<'static, Result<Vec<T>, FetchError>> + Send + Sync>;
type KeyOf<I, T> = Arc<dyn Fn(&T) -> I + Send + Sync>;
type Waiter<T> = oneshot::Sender<Result<Option<T>, FetchError>>;

struct BatchWindow<I, T> {
    generation: u64,
    /// Insertion-ordered, duplicate-free: the IDs sent to the fetcher.
    ids: Vec<I>,
    waiters: HashMap<I, Vec<Waiter<T>>>,
}

impl<I: Eq + Hash, T> BatchWindow<I, T> {
    fn new(generation: u64) -> Self {
        Self {
            generation,
            ids: Vec::new(),
            waiters: HashMap::new(),
        }
    }
}

struct BatcherState<I, T> {
    current: Option<BatchWindow<I, T>>,
    next_generation: u64,
}

/// Coalesces individual `fetch(id)` calls into multi-item requests.
///
/// Cheap to clone; clones share the same window. Every ID submitted
/// within one window receives exactly one resolution: its item from the
/// batched response, `None` if the response omitted it, or the batch's
/// error. A missing ID never fails the other IDs in the batch.
pub struct Batcher<I, T> {
    /// Resource label for log lines ("profile", "poll", ...).
    resource: &'static str,
    fetcher: BatchFetcher<I, T>,
    key_of: KeyOf<I, T>,
    window: Duration,
    max_batch_size: usize,
    state: Arc<Mutex<BatcherState<I, T>>>,
}

impl<I, T> Clone for Batcher<I, T> {
    fn clone(&self) -> Self {
        Self {
            resource: self.resource,
            fetcher: Arc::clone(&self.fetcher),
            key_of: Arc::clone(&self.key_of),
            window: self.window,
            max_batch_size: self.max_batch_size,
            state: Arc::clone(&self.state),
        }
    }
}

impl<I, T> Batcher<I, T>
where
    I: Eq + Hash + Clone + Send + Sync + 'static,
    T: Clone + Send + 'static,
{
    pub fn new<F, K>(resource: &'static str, fetcher: F, key_of: K) -> Self
    where
        F: Fn(Vec<I>) -> BoxFuture<'static, Result<Vec<T>, FetchError>> + Send + Sync + 'static,
        K: Fn(&T) -> I + Send + Sync + 'static,
    {
        Self {
            resource,
            fetcher: Arc::new(fetcher),
            key_of: Arc::new(key_of),
            window: DEFAULT_BATCH_WINDOW,
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
            state: Arc::new(Mutex::new(BatcherState {
                current: None,
                next_generation: 0,
            })),
        }
    }

    pub fn with_window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    pub fn with_max_batch_size(mut self, max_batch_size: usize) -> Self {
        self.max_batch_size = max_batch_size;
        self
    }

    /// Request one item by ID. Resolves once the window it joined is
    /// flushed; `Ok(None)` when the batched response does not contain the
    /// ID.
    pub async fn fetch(&self, id: I) -> Result<Option<T>, FetchError> {
        let (tx, rx) = oneshot::channel();
        let full = {
            let mut state = self.lock();
            if state.current.is_none() {
                let generation = state.next_generation;
                state.next_generation += 1;
                state.current = Some(BatchWindow::new(generation));
                self.spawn_flush_timer(generation);
            }
            let mut full = None;
            if let Some(window) = state.current.as_mut() {
                if !window.waiters.contains_key(&id) {
                    window.ids.push(id.clone());
                }
                window.waiters.entry(id).or_default().push(tx);
                if window.ids.len() >= self.max_batch_size {
                    full = state.current.take();
                }
            }
            full
        };
        if let Some(window) = full {
            self.spawn_flush(window);
        }

        match rx.await {
            Ok(result) => result,
            // The flush task was dropped before resolving; treat it as a
            // failed round trip.
            Err(_) => Err(FetchError::Remote(format!(
                "{} batch was dropped before it resolved",
                self.resource
            ))),
        }
    }

    /// Number of IDs waiting in the open window.
    pub fn pending(&self) -> usize {
        self.lock()
            .current
            .as_ref()
            .map(|w| w.ids.len())
            .unwrap_or(0)
    }

    fn lock(&self) -> MutexGuard<'_, BatcherState<I, T>> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn spawn_flush_timer(&self, generation: u64) {
        let batcher = self.clone();
        let window = self.window;
        tokio::spawn(async move {
            tokio::time::sleep(window).await;
            let expired = {
                let mut state = batcher.lock();
                let timed_out =
                    matches!(&state.current, Some(w) if w.generation == generation);
                if timed_out {
                    state.current.take()
                } else {
                    // Already flushed by the size threshold.
                    None
                }
            };
            if let Some(window) = expired {
                batcher.flush(window).await;
            }
        });
    }

    fn spawn_flush(&self, window: BatchWindow<I, T>) {
        let batcher = self.clone();
        tokio::spawn(async move {
            batcher.flush(window).await;
        });
    }

    /// Issue the batched request and resolve every waiter exactly once.
    async fn flush(&self, window: BatchWindow<I, T>) {
        let BatchWindow { ids, waiters, .. } = window;
        if ids.is_empty() {
            return;
        }
        debug!(resource = self.resource, count = ids.len(), "flushing batch");

        match (self.fetcher)(ids).await {
            Ok(items) => {
                let mut by_id: HashMap<I, T> = HashMap::with_capacity(items.len());
                for item in items {
                    by_id.insert((self.key_of)(&item), item);
                }
                for (id, senders) in waiters {
                    // Absent from the response is an empty value, not an
                    // error.
                    let value = by_id.get(&id).cloned();
                    for tx in senders {
                        let _ = tx.send(Ok(value.clone()));
                    }
                }
            }
            Err(err) => {
                warn!(resource = self.resource, error = %err, "batch fetch failed");
                for (_, senders) in waiters {
                    for tx in senders {
                        let _ = tx.send(Err(err.clone()));
                    }
                }
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
