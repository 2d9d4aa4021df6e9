//! Error taxonomy for the synchronization core.
//!
//! Transport-level errors live in [`crate::api::ApiError`]; the types here
//! are what the cache layer itself records and returns. A batched lookup
//! that comes back without a requested ID is not an error (the caller gets
//! `None`), and a superseded fetch result is dropped silently - neither has
//! a variant here.

use thiserror::Error;

/// Error recorded on a cache entry when a fetch fails.
///
/// Cloneable: a single in-flight fetch may be joined by many concurrent
/// callers through a shared future, and each of them receives the same
/// settlement.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// The remote data provider rejected or failed the request.
    #[error("remote fetch failed: {0}")]
    Remote(String),

    /// A fetched value could not be serialized for the cache.
    #[error("failed to encode value for cache: {0}")]
    Encode(String),

    /// A cached value could not be deserialized into the requested type.
    #[error("failed to decode cached value: {0}")]
    Decode(String),
}

/// Error returned by a failed mutation, after rollback has run.
///
/// Always propagated to the caller - the caller typically needs to show a
/// failure notification.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MutationError {
    /// The server rejected the write (auth, validation, conflict).
    #[error("write rejected by server: {0}")]
    Rejected(String),

    /// The write did not reach the server or the response was unusable.
    #[error("network error during write: {0}")]
    Network(String),
}
