//! Keyed in-memory store of query results.
//!
//! This module provides the [`QueryCache`]: one entry per canonical
//! [`crate::key::QueryKey`], holding data, error, status and timestamps.
//! Subscribers registered against a key are notified on every transition
//! of that entry.
//!
//! The cache is the single shared mutable resource of the sync layer. It
//! is mutated only through its own methods, which the executor and the
//! mutation coordinator funnel through, so there is one point of truth for
//! all writes.

pub mod snapshot;
pub mod store;

pub use snapshot::{CacheSnapshot, DehydratedEntry, MutationSnapshot};
pub use store::{Listener, QueryCache, QueryEntry, QueryStatus, SubscriptionGuard};
