//! Top-level handle tying the sync layer together.
//!
//! A [`SyncClient`] owns one cache and one executor built from one
//! [`SyncConfig`], and hands out the coordinators and helpers call sites
//! need. UI hook layers (`use_query` and friends) sit directly on this
//! type; they are adapters, not logic.

use std::sync::Arc;

use anyhow::Result;
use futures::FutureExt;
use tracing::info;

use crate::api::RpcClient;
use crate::batch::Batcher;
use crate::cache::{CacheSnapshot, QueryCache};
use crate::config::SyncConfig;
use crate::executor::{QueryExecutor, QueryOptions};
use crate::key::{PageParam, QueryKey};
use crate::models::{Post, Profile};
use crate::mutation::MutationCoordinator;
use crate::paginate::{Page, PagePaginator};

/// One per request-lifecycle owner: a long-lived instance in a client
/// process, a fresh instance per server-rendered pass.
pub struct SyncClient {
    config: SyncConfig,
    cache: Arc<QueryCache>,
    executor: Arc<QueryExecutor>,
}

impl SyncClient {
    pub fn new(config: SyncConfig) -> Self {
        let cache = Arc::new(QueryCache::new());
        let executor = Arc::new(QueryExecutor::new(Arc::clone(&cache)));
        Self {
            config,
            cache,
            executor,
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn cache(&self) -> &Arc<QueryCache> {
        &self.cache
    }

    pub fn executor(&self) -> &Arc<QueryExecutor> {
        &self.executor
    }

    /// Query options carrying the configured default stale time.
    pub fn query_options(&self) -> QueryOptions {
        QueryOptions::new(self.config.stale_time())
    }

    /// A coordinator for one logical mutation operation.
    pub fn mutation(&self) -> MutationCoordinator {
        MutationCoordinator::new(Arc::clone(&self.cache))
    }

    /// Drop subscriber-less entries older than the configured idle
    /// threshold.
    pub fn sweep(&self) -> usize {
        self.cache.sweep(self.config.sweep_idle())
    }

    /// Profile lookups batched through `POST /profiles/batch`.
    pub fn profile_batcher(&self, rpc: Arc<RpcClient>) -> Batcher<String, Profile> {
        Batcher::new(
            "profile",
            move |addresses: Vec<String>| {
                let rpc = Arc::clone(&rpc);
                async move {
                    rpc.fetch_profiles(&addresses)
                        .await
                        .map_err(Into::into)
                }
                .boxed()
            },
            |profile: &Profile| profile.address.clone(),
        )
        .with_window(self.config.batch_window())
        .with_max_batch_size(self.config.max_batch_size)
    }

    /// A community feed paged backward by post timestamp.
    pub fn feed_paginator(
        &self,
        rpc: Arc<RpcClient>,
        community_id: u64,
        limit: usize,
    ) -> PagePaginator<Post> {
        PagePaginator::new(
            Arc::clone(&self.executor),
            QueryKey::CommunityFeed { community_id },
            limit,
            self.config.stale_time(),
            move |param| {
                let rpc = Arc::clone(&rpc);
                async move {
                    rpc.fetch_feed_page(community_id, param.as_ref(), limit)
                        .await
                        .map_err(Into::into)
                }
                .boxed()
            },
            |page: &Page<Post>| {
                page.items
                    .last()
                    .map(|oldest| PageParam::Before(oldest.created_at))
            },
        )
    }

    /// Write the dehydrated cache to the configured snapshot path.
    pub fn save_snapshot(&self) -> Result<()> {
        let snapshot = self.cache.dehydrate();
        let path = self.config.snapshot_path()?;
        snapshot.save_to(&path)?;
        info!(entries = snapshot.entries.len(), path = %path.display(), "saved cache snapshot");
        Ok(())
    }

    /// Merge a previously saved snapshot, if one exists. Returns the
    /// number of entries merged.
    pub fn load_snapshot(&self) -> Result<usize> {
        let path = self.config.snapshot_path()?;
        match CacheSnapshot::load_from(&path)? {
            Some(snapshot) => {
                let merged = self.cache.hydrate(snapshot);
                info!(merged, "loaded cache snapshot");
                Ok(merged)
            }
            None => Ok(0),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_client_wires_config_defaults() {
        let client = SyncClient::new(SyncConfig::default());
        assert_eq!(
            client.query_options().stale_time,
            client.config().stale_time()
        );
        assert!(client.cache().is_empty());
    }

    #[test]
    fn test_sweep_uses_configured_idle_threshold() {
        let mut config = SyncConfig::default();
        config.sweep_idle_minutes = 1;
        let client = SyncClient::new(config);

        let key = QueryKey::Post { post_id: 1 };
        client.cache().set_data(&key, json!({"body": "old"}));
        client.cache().backdate(&key, chrono::Duration::minutes(5));
        assert_eq!(client.sweep(), 1);
        assert!(client.cache().is_empty());
    }
}
