//! realmsync-core - client-side data synchronization for the realmsync
//! platform.
//!
//! This crate is the data layer a realmsync client runs on: a keyed cache
//! of asynchronous query results, a request batcher that coalesces per-ID
//! lookups into few round trips, and an optimistic-mutation protocol that
//! speculatively updates the cache and rolls back precisely on failure.
//! Profiles, events, communities, feed posts, polls and tickets all read
//! and write through it.
//!
//! The moving parts, leaf-first:
//!
//! - [`cache::QueryCache`] - entries, subscriptions, invalidation,
//!   dehydrate/hydrate
//! - [`executor::QueryExecutor`] - staleness, single-flight dedup,
//!   sequence-gated results
//! - [`batch::Batcher`] - debounce-window request coalescing
//! - [`mutation::MutationCoordinator`] - snapshot, optimistic write,
//!   invalidate-or-rollback
//! - [`paginate::PagePaginator`] - cursor pages cached per page key
//!
//! [`client::SyncClient`] ties one cache and executor together with the
//! RPC adapter in [`api`]; UI hooks are thin adapters over that handle.

pub mod api;
pub mod auth;
pub mod batch;
pub mod cache;
pub mod client;
pub mod config;
pub mod error;
pub mod executor;
pub mod key;
pub mod models;
pub mod mutation;
pub mod paginate;

pub use api::{ApiError, RpcClient};
pub use auth::AuthSession;
pub use batch::Batcher;
pub use cache::{
    CacheSnapshot, MutationSnapshot, QueryCache, QueryEntry, QueryStatus, SubscriptionGuard,
};
pub use client::SyncClient;
pub use config::SyncConfig;
pub use error::{FetchError, MutationError};
pub use executor::{QueryExecutor, QueryOptions};
pub use key::{PageParam, QueryKey, ResourceKind};
pub use mutation::{MutationCoordinator, MutationOptions, MutationStatus};
pub use paginate::{Page, PagePaginator};
