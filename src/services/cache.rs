//! Query-result cache over the fast store
//!
//! Short-lived JSON blobs keyed by request signature. Every fast-store failure
//! is logged and treated as a miss; nothing here fails a caller.

use std::future::Future;
use std::sync::Arc;

use serde::{de::DeserializeOwned, Serialize};
use uuid::Uuid;

use super::fast_store::FastStore;
use crate::error::AppResult;

/// Query-result cache key families
pub mod keys {
    use uuid::Uuid;

    use crate::models::{BookFilter, Pagination};

    pub const BOOKS_PAGES: &str = "books:page:*";
    pub const SEARCHES: &str = "search:*";
    pub const USER_BOOKS: &str = "user:*:books:*";

    /// Patterns dropped on any book mutation
    pub const BOOK_LIST_PATTERNS: [&str; 3] = [BOOKS_PAGES, SEARCHES, USER_BOOKS];

    pub fn book(id: Uuid) -> String {
        format!("book:{}", id)
    }

    /// Filtered listing page. Absent filters render as empty segments.
    pub fn books_page(filter: &BookFilter, pagination: Pagination) -> String {
        format!(
            "books:page:{}:{}:{}",
            pagination.page,
            pagination.limit,
            filter_signature(filter)
        )
    }

    pub fn user_books(owner_id: Uuid, filter: &BookFilter, pagination: Pagination) -> String {
        format!(
            "user:{}:books:{}:{}:{}",
            owner_id,
            pagination.page,
            pagination.limit,
            filter_signature(filter)
        )
    }

    fn filter_signature(filter: &BookFilter) -> String {
        format!(
            "q={}|authors={}|category={}|available={}",
            filter.q.as_deref().unwrap_or_default().to_lowercase(),
            filter.authors.as_deref().unwrap_or_default().to_lowercase(),
            filter.category.as_deref().unwrap_or_default(),
            filter.available.map(|a| a.to_string()).unwrap_or_default()
        )
    }

    pub fn search(term: &str, pagination: Pagination, sort_by: &str, sort_order: &str) -> String {
        format!(
            "search:{}:{}:{}:{}:{}",
            term.to_lowercase(),
            pagination.page,
            pagination.limit,
            sort_by,
            sort_order
        )
    }

    pub fn borrow(id: Uuid) -> String {
        format!("borrow:{}", id)
    }

    pub fn borrower(id: Uuid) -> String {
        format!("borrows:borrower:{}", id)
    }

    pub fn borrower_requests(id: Uuid) -> String {
        format!("borrows:borrower:{}:requests", id)
    }

    pub fn borrower_accepted(id: Uuid) -> String {
        format!("borrows:borrower:{}:accepted", id)
    }

    pub fn owner(id: Uuid) -> String {
        format!("borrows:owner:{}", id)
    }

    pub fn owner_pending(id: Uuid) -> String {
        format!("borrows:owner:{}:pending", id)
    }

    /// Every list key that mentions a borrow between these two users
    pub fn borrow_lists(borrower_id: Uuid, owner_id: Uuid) -> Vec<String> {
        vec![
            borrower(borrower_id),
            borrower_requests(borrower_id),
            borrower_accepted(borrower_id),
            owner(owner_id),
            owner_pending(owner_id),
        ]
    }
}

#[derive(Clone)]
pub struct QueryCache {
    store: Arc<dyn FastStore>,
    enabled: bool,
}

impl QueryCache {
    pub fn new(store: Arc<dyn FastStore>, enabled: bool) -> Self {
        Self { store, enabled }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        if !self.enabled {
            return None;
        }
        match self.store.get(key).await {
            Ok(Some(raw)) => match serde_json::from_str(&raw) {
                Ok(value) => {
                    metrics::counter!("cache_requests_total", "layer" => "query", "result" => "hit").increment(1);
                    tracing::debug!("Cache hit: {}", key);
                    Some(value)
                }
                Err(e) => {
                    tracing::warn!("Discarding undecodable cache entry {}: {}", key, e);
                    None
                }
            },
            Ok(None) => {
                metrics::counter!("cache_requests_total", "layer" => "query", "result" => "miss").increment(1);
                tracing::debug!("Cache miss: {}", key);
                None
            }
            Err(e) => {
                tracing::warn!("Cache read failed for {}: {}", key, e);
                None
            }
        }
    }

    pub async fn set_json<T: Serialize + ?Sized>(&self, key: &str, value: &T, ttl_secs: u64) {
        if !self.enabled {
            return;
        }
        let raw = match serde_json::to_string(value) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!("Failed to serialize cache entry {}: {}", key, e);
                return;
            }
        };
        if let Err(e) = self.store.set_ex(key, &raw, ttl_secs).await {
            tracing::warn!("Cache write failed for {}: {}", key, e);
        }
    }

    /// Return the cached value or compute, cache and return it.
    /// Errors from `fetch` propagate and nothing is cached.
    pub async fn get_or_set_json<T, F, Fut>(&self, key: &str, ttl_secs: u64, fetch: F) -> AppResult<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = AppResult<T>>,
    {
        if let Some(hit) = self.get_json(key).await {
            return Ok(hit);
        }
        let value = fetch().await?;
        self.set_json(key, &value, ttl_secs).await;
        Ok(value)
    }

    /// Delete exact keys. Runs even when caching is disabled so stale entries
    /// written before a config change still go away.
    pub async fn del(&self, keys: &[String]) {
        if keys.is_empty() {
            return;
        }
        if let Err(e) = self.store.del(keys).await {
            tracing::warn!("Cache delete failed for {:?}: {}", keys, e);
        }
    }

    pub async fn del_pattern(&self, pattern: &str) {
        let matched = match self.store.keys(pattern).await {
            Ok(matched) => matched,
            Err(e) => {
                tracing::warn!("Cache key scan failed for {}: {}", pattern, e);
                return;
            }
        };
        if !matched.is_empty() {
            tracing::debug!("Invalidating {} keys for {}", matched.len(), pattern);
            self.del(&matched).await;
        }
    }

    /// Drop exact keys and every key matching the patterns
    pub async fn invalidate(&self, keys: &[String], patterns: &[&str]) {
        self.del(keys).await;
        for pattern in patterns {
            self.del_pattern(pattern).await;
        }
    }

    /// Drop the entity key of a book and every list or search result
    pub async fn invalidate_book(&self, book_id: Option<Uuid>) {
        let exact: Vec<String> = book_id.map(keys::book).into_iter().collect();
        self.invalidate(&exact, &keys::BOOK_LIST_PATTERNS).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Pagination;
    use crate::services::fast_store::MemoryFastStore;

    fn cache() -> (QueryCache, MemoryFastStore) {
        let store = MemoryFastStore::new();
        (QueryCache::new(Arc::new(store.clone()), true), store)
    }

    #[tokio::test]
    async fn test_get_or_set_caches_the_fetched_value() {
        let (cache, _) = cache();
        let first: u32 = cache.get_or_set_json("k", 60, || async { Ok(7) }).await.unwrap();
        let second: u32 = cache.get_or_set_json("k", 60, || async { Ok(9) }).await.unwrap();
        assert_eq!((first, second), (7, 7));
    }

    #[tokio::test]
    async fn test_outage_degrades_to_fetch() {
        let (cache, store) = cache();
        store.set_offline(true);
        let value: u32 = cache.get_or_set_json("k", 60, || async { Ok(3) }).await.unwrap();
        assert_eq!(value, 3);
        cache.invalidate_book(Some(Uuid::new_v4())).await;
    }

    #[tokio::test]
    async fn test_invalidate_book_drops_lists_and_entity() {
        let (cache, store) = cache();
        let id = Uuid::new_v4();
        cache.set_json(&keys::book(id), &1, 60).await;
        cache.set_json("books:page:1:12", &1, 60).await;
        cache.set_json(&keys::search("dune", Pagination::new(1, 20), "created_at", "desc"), &1, 60).await;
        cache.set_json(&format!("user:{}:books:page:1", id), &1, 60).await;
        cache.set_json(&keys::borrow(id), &1, 60).await;

        cache.invalidate_book(Some(id)).await;

        let left: Vec<String> = store.snapshot().await.into_keys().collect();
        assert_eq!(left, vec![keys::borrow(id)]);
    }

    #[tokio::test]
    async fn test_disabled_cache_never_serves() {
        let store = MemoryFastStore::new();
        store.set_ex("k", "1", 60).await.unwrap();
        let cache = QueryCache::new(Arc::new(store), false);
        assert_eq!(cache.get_json::<u32>("k").await, None);
    }
}
