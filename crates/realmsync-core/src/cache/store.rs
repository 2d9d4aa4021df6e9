use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use tracing::debug;

use crate::cache::snapshot::{CacheSnapshot, DehydratedEntry, MutationSnapshot};
use crate::error::FetchError;
use crate::key::{QueryKey, ResourceKind};

/// Fetch status of a cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryStatus {
    /// Entry exists (e.g. a subscriber registered) but nothing was fetched.
    Idle,
    /// A fetch is in flight. Previous data, if any, is retained.
    Pending,
    /// Last fetch resolved; `data` holds the result.
    Success,
    /// Last fetch rejected; `error` holds the message, stale data is retained.
    Error,
}

/// A single cached query result.
#[derive(Debug, Clone)]
pub struct QueryEntry {
    pub key: QueryKey,
    pub data: Option<Value>,
    pub error: Option<String>,
    pub status: QueryStatus,
    pub updated_at: DateTime<Utc>,
    /// Marked by `invalidate`: the next read must refetch even if the entry
    /// is within its stale time. Data is kept so callers can render it
    /// while revalidating.
    pub invalidated: bool,
    /// Bumped once per dispatched fetch for this key. A settling fetch is
    /// applied only while its sequence is still the latest.
    pub sequence: u64,
}

impl QueryEntry {
    fn idle(key: QueryKey) -> Self {
        Self {
            key,
            data: None,
            error: None,
            status: QueryStatus::Idle,
            updated_at: Utc::now(),
            invalidated: false,
            sequence: 0,
        }
    }

    /// Age of the entry relative to `now`.
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now - self.updated_at
    }
}

/// Listener registered against a key. Invoked with the entry after every
/// transition, outside the cache lock.
pub type Listener = Arc<dyn Fn(&QueryEntry) + Send + Sync>;

struct CacheState {
    entries: HashMap<QueryKey, QueryEntry>,
    subscribers: HashMap<QueryKey, Vec<(u64, Listener)>>,
    next_subscriber_id: u64,
}

/// In-memory store mapping query keys to entries, with per-key
/// subscriptions.
///
/// Create one instance per request lifecycle owner (one per client
/// process, one per server-rendered pass) and share it by `Arc`. All state
/// lives behind a single mutex; critical sections are short and never held
/// across an await point. Listener callbacks run after the lock is
/// released, so a listener may re-enter the cache.
pub struct QueryCache {
    state: Mutex<CacheState>,
}

impl QueryCache {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(CacheState {
                entries: HashMap::new(),
                subscribers: HashMap::new(),
                next_subscriber_id: 0,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        // A poisoned lock means a writer panicked; entries are plain values
        // so the state is still coherent.
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Current entry for `key`, if one exists.
    pub fn get(&self, key: &QueryKey) -> Option<QueryEntry> {
        self.lock().entries.get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }

    /// Write `data` for `key`, creating the entry if needed.
    ///
    /// This is the optimistic-write entry point: status becomes `Success`,
    /// `updated_at` is bumped, and subscribers are notified.
    pub fn set_data(&self, key: &QueryKey, data: Value) {
        let notify = {
            let mut state = self.lock();
            let entry = state
                .entries
                .entry(key.clone())
                .or_insert_with(|| QueryEntry::idle(key.clone()));
            entry.data = Some(data);
            entry.error = None;
            entry.status = QueryStatus::Success;
            entry.updated_at = Utc::now();
            Self::pending_notification(&state, key)
        };
        Self::deliver(notify);
    }

    /// Register a listener for `key`. Subscribing never triggers a fetch;
    /// an `Idle` entry is created if none exists so the key participates
    /// in sweep accounting. Dropping the returned guard unsubscribes.
    pub fn subscribe(self: &Arc<Self>, key: &QueryKey, listener: Listener) -> SubscriptionGuard {
        let id = {
            let mut state = self.lock();
            state
                .entries
                .entry(key.clone())
                .or_insert_with(|| QueryEntry::idle(key.clone()));
            let id = state.next_subscriber_id;
            state.next_subscriber_id += 1;
            state
                .subscribers
                .entry(key.clone())
                .or_default()
                .push((id, listener));
            id
        };
        SubscriptionGuard {
            cache: Arc::downgrade(self),
            key: key.clone(),
            id,
        }
    }

    /// Mark every entry matching `predicate` as invalidated. Data is kept;
    /// the next read through the executor refetches.
    pub fn invalidate<P>(&self, predicate: P)
    where
        P: Fn(&QueryKey) -> bool,
    {
        let notifications = {
            let mut state = self.lock();
            let matched: Vec<QueryKey> = state
                .entries
                .keys()
                .filter(|k| predicate(k))
                .cloned()
                .collect();
            for key in &matched {
                if let Some(entry) = state.entries.get_mut(key) {
                    entry.invalidated = true;
                }
            }
            if !matched.is_empty() {
                debug!(count = matched.len(), "invalidated cache entries");
            }
            matched
                .iter()
                .map(|key| Self::pending_notification(&state, key))
                .collect::<Vec<_>>()
        };
        for notify in notifications {
            Self::deliver(notify);
        }
    }

    /// Invalidate a single key.
    pub fn invalidate_key(&self, key: &QueryKey) {
        self.invalidate(|k| k == key);
    }

    /// Invalidate every entry of a resource kind, pages included.
    pub fn invalidate_kind(&self, kind: ResourceKind) {
        self.invalidate(|k| k.kind() == kind);
    }

    /// Capture the current data of `keys` for mutation rollback.
    ///
    /// Runs in one critical section; combined with a synchronous
    /// `on_mutate` hook this makes capture and optimistic write atomic
    /// with respect to any settling fetch.
    pub fn snapshot(&self, keys: &[QueryKey]) -> MutationSnapshot {
        let state = self.lock();
        let mut snapshot = MutationSnapshot::default();
        for key in keys {
            let previous = state.entries.get(key).and_then(|e| e.data.clone());
            snapshot.record(key.clone(), previous);
        }
        snapshot
    }

    /// Restore every key in `snapshot` to its captured data, verbatim.
    ///
    /// Restores the data field only - not "whatever is currently cached" -
    /// so a rollback lands on the exact pre-mutation values.
    pub fn restore(&self, snapshot: &MutationSnapshot) {
        let notifications = {
            let mut state = self.lock();
            let mut touched = Vec::new();
            for (key, previous) in snapshot.iter() {
                let entry = state
                    .entries
                    .entry(key.clone())
                    .or_insert_with(|| QueryEntry::idle(key.clone()));
                entry.data = previous.clone();
                entry.updated_at = Utc::now();
                touched.push(key.clone());
            }
            debug!(count = touched.len(), "rolled back cache entries");
            touched
                .iter()
                .map(|key| Self::pending_notification(&state, key))
                .collect::<Vec<_>>()
        };
        for notify in notifications {
            Self::deliver(notify);
        }
    }

    /// Serialize all `Success` entries for transfer to another cache
    /// instance. `Pending` entries are not carried: the receiving side has
    /// no fetch to resume, so it refetches on first read instead.
    pub fn dehydrate(&self) -> CacheSnapshot {
        let state = self.lock();
        let entries = state
            .entries
            .values()
            .filter(|e| e.status == QueryStatus::Success)
            .filter_map(|e| {
                e.data.as_ref().map(|data| DehydratedEntry {
                    key: e.key.clone(),
                    data: data.clone(),
                    updated_at: e.updated_at,
                })
            })
            .collect();
        CacheSnapshot { entries }
    }

    /// Merge a dehydrated snapshot into this cache. An entry already
    /// present with an equal or newer `updated_at` is never overwritten.
    /// Returns the number of entries merged.
    pub fn hydrate(&self, snapshot: CacheSnapshot) -> usize {
        let (merged, notifications) = {
            let mut state = self.lock();
            let mut touched = Vec::new();
            for incoming in snapshot.entries {
                if let Some(existing) = state.entries.get(&incoming.key) {
                    if existing.updated_at >= incoming.updated_at {
                        continue;
                    }
                }
                let key = incoming.key.clone();
                state.entries.insert(
                    key.clone(),
                    QueryEntry {
                        key: incoming.key,
                        data: Some(incoming.data),
                        error: None,
                        status: QueryStatus::Success,
                        updated_at: incoming.updated_at,
                        invalidated: false,
                        sequence: 0,
                    },
                );
                touched.push(key);
            }
            debug!(count = touched.len(), "hydrated cache entries");
            let notifications = touched
                .iter()
                .map(|key| Self::pending_notification(&state, key))
                .collect::<Vec<_>>();
            (touched.len(), notifications)
        };
        for notify in notifications {
            Self::deliver(notify);
        }
        merged
    }

    /// Remove entries that have no subscribers and have not been touched
    /// for longer than `max_idle`. Pending entries are skipped - an
    /// in-flight fetch still needs its bookkeeping. Returns the number of
    /// entries removed.
    pub fn sweep(&self, max_idle: Duration) -> usize {
        let mut state = self.lock();
        let now = Utc::now();
        let removable: Vec<QueryKey> = state
            .entries
            .values()
            .filter(|e| e.status != QueryStatus::Pending)
            .filter(|e| e.age(now) > max_idle)
            .filter(|e| {
                state
                    .subscribers
                    .get(&e.key)
                    .map(|subs| subs.is_empty())
                    .unwrap_or(true)
            })
            .map(|e| e.key.clone())
            .collect();
        for key in &removable {
            state.entries.remove(key);
            state.subscribers.remove(key);
        }
        if !removable.is_empty() {
            debug!(removed = removable.len(), remaining = state.entries.len(), "swept cache");
        }
        removable.len()
    }

    // ----- fetch bookkeeping (used by the executor) -----

    /// Begin a fetch for `key`: bump the sequence, mark the entry
    /// `Pending` (retaining previous data for stale-while-revalidate) and
    /// clear the invalidated flag. Returns the sequence assigned to this
    /// fetch.
    pub(crate) fn begin_fetch(&self, key: &QueryKey) -> u64 {
        let (sequence, notify) = {
            let mut state = self.lock();
            let entry = state
                .entries
                .entry(key.clone())
                .or_insert_with(|| QueryEntry::idle(key.clone()));
            entry.sequence += 1;
            entry.status = QueryStatus::Pending;
            entry.invalidated = false;
            let sequence = entry.sequence;
            (sequence, Self::pending_notification(&state, key))
        };
        Self::deliver(notify);
        sequence
    }

    /// Apply a fetch settlement, but only if `sequence` is still the
    /// latest dispatched for `key`. A superseded result is dropped
    /// silently - that is normal operation, not a failure. Returns whether
    /// the settlement was applied.
    pub(crate) fn complete_fetch(
        &self,
        key: &QueryKey,
        sequence: u64,
        result: &Result<Value, FetchError>,
    ) -> bool {
        let notify = {
            let mut state = self.lock();
            let Some(entry) = state.entries.get_mut(key) else {
                // Swept while in flight; nothing to record.
                return false;
            };
            if entry.sequence != sequence {
                debug!(key = %key, sequence, latest = entry.sequence, "discarded superseded fetch result");
                return false;
            }
            match result {
                Ok(data) => {
                    entry.data = Some(data.clone());
                    entry.error = None;
                    entry.status = QueryStatus::Success;
                }
                Err(err) => {
                    entry.error = Some(err.to_string());
                    entry.status = QueryStatus::Error;
                }
            }
            entry.updated_at = Utc::now();
            Self::pending_notification(&state, key)
        };
        Self::deliver(notify);
        true
    }

    /// Data for `key` if the entry is a non-invalidated `Success` younger
    /// than `stale_time`.
    pub(crate) fn fresh_success(&self, key: &QueryKey, stale_time: Duration) -> Option<Value> {
        let state = self.lock();
        let entry = state.entries.get(key)?;
        if entry.status != QueryStatus::Success || entry.invalidated {
            return None;
        }
        if entry.age(Utc::now()) >= stale_time {
            return None;
        }
        entry.data.clone()
    }

    pub(crate) fn is_invalidated(&self, key: &QueryKey) -> bool {
        self.lock()
            .entries
            .get(key)
            .map(|e| e.invalidated)
            .unwrap_or(false)
    }

    fn unsubscribe(&self, key: &QueryKey, id: u64) {
        let mut state = self.lock();
        if let Some(subs) = state.subscribers.get_mut(key) {
            subs.retain(|(sub_id, _)| *sub_id != id);
            if subs.is_empty() {
                state.subscribers.remove(key);
            }
        }
    }

    /// Snapshot the listeners and entry for one key while the lock is
    /// held; delivery happens after release.
    fn pending_notification(
        state: &CacheState,
        key: &QueryKey,
    ) -> Option<(Vec<Listener>, QueryEntry)> {
        let listeners: Vec<Listener> = state
            .subscribers
            .get(key)
            .map(|subs| subs.iter().map(|(_, l)| Arc::clone(l)).collect())
            .unwrap_or_default();
        if listeners.is_empty() {
            return None;
        }
        state.entries.get(key).map(|entry| (listeners, entry.clone()))
    }

    fn deliver(notification: Option<(Vec<Listener>, QueryEntry)>) {
        if let Some((listeners, entry)) = notification {
            for listener in listeners {
                listener(&entry);
            }
        }
    }

    /// Shift an entry's `updated_at` into the past. Test hook for
    /// staleness and sweep scenarios.
    #[cfg(test)]
    pub(crate) fn backdate(&self, key: &QueryKey, by: Duration) {
        let mut state = self.lock();
        if let Some(entry) = state.entries.get_mut(key) {
            entry.updated_at = entry.updated_at - by;
        }
    }
}

impl Default for QueryCache {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII subscription handle; dropping it unsubscribes the listener.
pub struct SubscriptionGuard {
    cache: Weak<QueryCache>,
    key: QueryKey,
    id: u64,
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        if let Some(cache) = self.cache.upgrade() {
            cache.unsubscribe(&self.key, self.id);
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
