//! HTTP client for the platform RPC service.
//!
//! The sync core makes no assumption about the wire format beyond
//! "resolves or rejects"; this client is the one place that knows the
//! endpoints, auth header and retry etiquette.

use std::time::Duration;

use anyhow::Result;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::auth::AuthSession;
use crate::key::PageParam;
use crate::models::{EventSummary, Post, Profile};

use super::ApiError;

// ============================================================================
// Constants
// ============================================================================

/// Default base URL for the platform RPC service.
pub const DEFAULT_API_BASE_URL: &str = "https://rpc.realmsync.app";

/// HTTP request timeout in seconds.
/// 30s allows for slow API responses while failing fast enough for good UX.
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Maximum number of retries for rate-limited (429) requests.
/// 3 retries with exponential backoff usually succeeds without excessive delay.
const MAX_RATE_LIMIT_RETRIES: u32 = 3;

/// Initial backoff delay in milliseconds for rate limiting.
/// 1 second is polite to the server while not making users wait too long.
const INITIAL_BACKOFF_MS: u64 = 1000;

#[derive(Serialize)]
struct BatchProfilesRequest<'a> {
    addresses: &'a [String],
}

#[derive(Serialize)]
struct RsvpRequest {
    going: bool,
}

/// Client for the platform RPC service.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct RpcClient {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl RpcClient {
    /// Create a new client against `base_url`.
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.into(),
            token: None,
        })
    }

    /// Create a clone carrying the session's bearer token, sharing the
    /// connection pool.
    pub fn with_session(&self, session: &AuthSession) -> Self {
        Self {
            client: self.client.clone(),
            base_url: self.base_url.clone(),
            token: Some(session.token.clone()),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    // ===== Profiles =====

    pub async fn fetch_profile(&self, address: &str) -> Result<Profile, ApiError> {
        self.get_json(&format!("/profiles/{}", address)).await
    }

    /// Multi-item profile lookup; the batcher's fetch function. Addresses
    /// unknown to the server are simply absent from the response.
    pub async fn fetch_profiles(&self, addresses: &[String]) -> Result<Vec<Profile>, ApiError> {
        self.post_json(
            "/profiles/batch",
            &BatchProfilesRequest { addresses },
        )
        .await
    }

    // ===== Events =====

    pub async fn fetch_event(&self, event_id: u64) -> Result<EventSummary, ApiError> {
        self.get_json(&format!("/events/{}", event_id)).await
    }

    /// RSVP to an event; returns the updated event. A full event comes
    /// back as 409.
    pub async fn rsvp_event(&self, event_id: u64, going: bool) -> Result<EventSummary, ApiError> {
        self.post_json(&format!("/events/{}/rsvp", event_id), &RsvpRequest { going })
            .await
    }

    // ===== Feeds =====

    /// One page of a community feed, newest first.
    pub async fn fetch_feed_page(
        &self,
        community_id: u64,
        param: Option<&PageParam>,
        limit: usize,
    ) -> Result<Vec<Post>, ApiError> {
        let mut path = format!("/communities/{}/feed?limit={}", community_id, limit);
        match param {
            Some(PageParam::Cursor(cursor)) => path.push_str(&format!("&cursor={}", cursor)),
            Some(PageParam::Offset(offset)) => path.push_str(&format!("&offset={}", offset)),
            Some(PageParam::Before(ts)) => path.push_str(&format!("&before={}", ts)),
            None => {}
        }
        self.get_json(&path).await
    }

    // ===== Transport =====

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        self.request_json(|| {
            let mut request = self.client.get(format!("{}{}", self.base_url, path));
            if let Some(token) = &self.token {
                request = request.bearer_auth(token);
            }
            request
        })
        .await
    }

    async fn post_json<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        self.request_json(|| {
            let mut request = self
                .client
                .post(format!("{}{}", self.base_url, path))
                .json(body);
            if let Some(token) = &self.token {
                request = request.bearer_auth(token);
            }
            request
        })
        .await
    }

    /// Send a request with bounded retry on 429. Retry lives here at the
    /// transport, not in the executor.
    async fn request_json<T, F>(&self, build: F) -> Result<T, ApiError>
    where
        T: DeserializeOwned,
        F: Fn() -> reqwest::RequestBuilder,
    {
        let mut backoff_ms = INITIAL_BACKOFF_MS;
        let mut attempt = 0;
        loop {
            let response = build().send().await?;
            let status = response.status();

            if status == StatusCode::TOO_MANY_REQUESTS && attempt < MAX_RATE_LIMIT_RETRIES {
                attempt += 1;
                warn!(attempt, backoff_ms, "rate limited, backing off");
                tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                backoff_ms *= 2;
                continue;
            }

            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(ApiError::from_status(status, &body));
            }

            debug!(status = %status, "rpc response");
            return response
                .json()
                .await
                .map_err(|e| ApiError::InvalidResponse(e.to_string()));
        }
    }
}
