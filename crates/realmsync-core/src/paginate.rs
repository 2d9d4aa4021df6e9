//! Cursor-based pagination over cached pages.
//!
//! A [`PagePaginator`] manages the ordered page list of one logical query
//! (a community feed, an attendee roster). Each page is fetched through
//! the executor and cached as its own entry keyed by
//! `QueryKey::Page { base, param }`, so a revisit within the stale time
//! serves pages from the cache.

use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Duration;
use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::error::FetchError;
use crate::executor::{QueryExecutor, QueryOptions};
use crate::key::{PageParam, QueryKey};

/// One loaded page. `param` is `None` for the first page.
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub param: Option<PageParam>,
    pub items: Vec<T>,
}

type PageFetcher<T> =
    Arc<dyn Fn(Option<PageParam>) -> BoxFuture<'static, Result<Vec<T>, FetchError>> + Send + Sync>;
type ParamFn<T> = Box<dyn Fn(&Page<T>) -> Option<PageParam> + Send + Sync>;

/// Ordered sequence of pages for a single logical query, growing forward
/// (and optionally backward) by cursor.
pub struct PagePaginator<T> {
    executor: Arc<QueryExecutor>,
    base_key: QueryKey,
    /// Requested page size; also the basis of the `has_next_page`
    /// heuristic.
    limit: usize,
    stale_time: Duration,
    fetcher: PageFetcher<T>,
    next_param: ParamFn<T>,
    previous_param: Option<ParamFn<T>>,
    pages: Mutex<Vec<Page<T>>>,
}

impl<T> PagePaginator<T>
where
    T: Serialize + DeserializeOwned + Clone + Send + 'static,
{
    pub fn new<F, N>(
        executor: Arc<QueryExecutor>,
        base_key: QueryKey,
        limit: usize,
        stale_time: Duration,
        fetcher: F,
        next_param: N,
    ) -> Self
    where
        F: Fn(Option<PageParam>) -> BoxFuture<'static, Result<Vec<T>, FetchError>>
            + Send
            + Sync
            + 'static,
        N: Fn(&Page<T>) -> Option<PageParam> + Send + Sync + 'static,
    {
        Self {
            executor,
            base_key,
            limit,
            stale_time,
            fetcher: Arc::new(fetcher),
            next_param: Box::new(next_param),
            previous_param: None,
            pages: Mutex::new(Vec::new()),
        }
    }

    /// Enable backward growth; `previous_param` derives the cursor from
    /// the first loaded page.
    pub fn with_previous_param<P>(mut self, previous_param: P) -> Self
    where
        P: Fn(&Page<T>) -> Option<PageParam> + Send + Sync + 'static,
    {
        self.previous_param = Some(Box::new(previous_param));
        self
    }

    /// Loaded pages, in order.
    pub fn pages(&self) -> Vec<Page<T>> {
        self.lock().clone()
    }

    /// All loaded items, flattened in page order.
    pub fn items(&self) -> Vec<T> {
        self.lock().iter().flat_map(|p| p.items.clone()).collect()
    }

    /// Whether more items may exist past the last loaded page.
    ///
    /// Heuristic: a full last page implies more may exist. It can be wrong
    /// exactly once per list - when the list's length is a multiple of
    /// `limit`, the next fetch comes back empty and settles the question.
    /// Call sites rely on that confirming round trip, so it is not
    /// "fixed" here.
    pub fn has_next_page(&self) -> bool {
        match self.lock().last() {
            Some(page) => page.items.len() >= self.limit,
            // Nothing loaded yet; the first fetch is always worth issuing.
            None => true,
        }
    }

    /// Fetch and append the next page. Returns `false` without fetching
    /// when the sequence is exhausted, the computed param is already
    /// loaded, or the param function yields `None`.
    pub async fn fetch_next_page(&self) -> Result<bool, FetchError> {
        let param = {
            let pages = self.lock();
            match pages.last() {
                None => None,
                Some(last) => {
                    if last.items.len() < self.limit {
                        debug!(key = %self.base_key, "end of paginated list reached");
                        return Ok(false);
                    }
                    match (self.next_param)(last) {
                        Some(param) => Some(param),
                        None => return Ok(false),
                    }
                }
            }
        };
        if self.is_loaded(&param) {
            return Ok(false);
        }

        let items = self.fetch_page(param.clone()).await?;
        let mut pages = self.lock();
        // A concurrent call may have raced this param in; never hold two
        // pages for one cursor.
        if pages.iter().any(|p| p.param == param) {
            return Ok(false);
        }
        pages.push(Page { param, items });
        Ok(true)
    }

    /// Fetch and prepend the page before the first loaded one. Requires
    /// `with_previous_param`; returns `false` when unsupported or at the
    /// start of the list.
    pub async fn fetch_previous_page(&self) -> Result<bool, FetchError> {
        let Some(previous_param) = self.previous_param.as_ref() else {
            return Ok(false);
        };
        let param = {
            let pages = self.lock();
            match pages.first() {
                None => None,
                Some(first) => match previous_param(first) {
                    Some(param) => Some(param),
                    None => return Ok(false),
                },
            }
        };
        if self.is_loaded(&param) {
            return Ok(false);
        }

        let items = self.fetch_page(param.clone()).await?;
        let mut pages = self.lock();
        if pages.iter().any(|p| p.param == param) {
            return Ok(false);
        }
        pages.insert(0, Page { param, items });
        Ok(true)
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Page<T>>> {
        match self.pages.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn is_loaded(&self, param: &Option<PageParam>) -> bool {
        self.lock().iter().any(|p| &p.param == param)
    }

    async fn fetch_page(&self, param: Option<PageParam>) -> Result<Vec<T>, FetchError> {
        let key = self.base_key.paged(param.clone());
        let fetcher = Arc::clone(&self.fetcher);
        let items = self
            .executor
            .run::<Vec<T>, _, _>(
                key,
                move || fetcher(param),
                QueryOptions::new(self.stale_time),
            )
            .await?;
        Ok(items.unwrap_or_default())
    }
}

// ============================================================================
// Tests
// ============================================================================
