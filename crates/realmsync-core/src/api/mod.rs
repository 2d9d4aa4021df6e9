//! RPC client for the platform backend.
//!
//! This module provides the [`RpcClient`] the sync layer's fetchers and
//! mutation functions are built on: single-item reads, the multi-item
//! read the profile batcher uses, feed pages, and RSVP writes.
//!
//! The API uses JWT bearer token authentication supplied by the auth
//! provider (see [`crate::auth`]).

pub mod client;
pub mod error;

pub use client::RpcClient;
pub use error::ApiError;
