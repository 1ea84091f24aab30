//! Denormalized book projection in the fast store
//!
//! Layout:
//! - `readmodel:book:{id}`: owner-populated book blob (TTL)
//! - `readmodel:books:all`: sorted set of ids scored by creation time (ms)
//! - `readmodel:books:user:{owner}`: per-owner sorted set (TTL)
//! - `readmodel:books:search:{term}`: cached projection search results (short TTL)
//!
//! The projection is disposable. Every failure is logged and reported as a
//! miss so the caller falls back to the durable store.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use uuid::Uuid;

use super::fast_store::FastStore;
use crate::{
    error::AppResult,
    models::{BookFilter, BookSort, BookView, Page, Pagination},
    repository::BookStore,
};

const BOOK_PREFIX: &str = "readmodel:book:";
const ALL_INDEX: &str = "readmodel:books:all";
const OWNER_INDEX_PREFIX: &str = "readmodel:books:user:";
const SEARCH_PREFIX: &str = "readmodel:books:search:";
const PROJECTION_PATTERN: &str = "readmodel:*";

pub fn book_key(id: Uuid) -> String {
    format!("{}{}", BOOK_PREFIX, id)
}

pub fn owner_index_key(owner_id: Uuid) -> String {
    format!("{}{}", OWNER_INDEX_PREFIX, owner_id)
}

fn search_key(term: &str) -> String {
    format!("{}{}", SEARCH_PREFIX, term.trim().to_lowercase())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OwnerIndex {
    /// Add to the owner index only if it is already populated
    Extend,
    /// Populate the owner index; the caller holds the owner's full book list
    Create,
}

#[derive(Clone)]
pub struct BookReadModel {
    store: Arc<dyn FastStore>,
    ttl_secs: u64,
    search_ttl_secs: u64,
    rebuilding: Arc<AtomicBool>,
}

impl BookReadModel {
    pub fn new(store: Arc<dyn FastStore>, ttl_secs: u64, search_ttl_secs: u64) -> Self {
        Self {
            store,
            ttl_secs,
            search_ttl_secs,
            rebuilding: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Write (or overwrite) the projection of one book.
    ///
    /// The owner index is only extended when it already exists; it is created
    /// by `index_owner` and by full rebuilds.
    pub async fn save_book(&self, book: &BookView) {
        if let Err(e) = self.try_save_book(book, OwnerIndex::Extend).await {
            tracing::warn!("Failed to project book {}: {}", book.id, e);
        }
    }

    /// Replace one owner's projection with the complete list of their books
    pub async fn index_owner(&self, owner_id: Uuid, books: &[BookView]) -> usize {
        let owner_key = owner_index_key(owner_id);
        if let Err(e) = self.store.del(&[owner_key]).await {
            tracing::warn!("Failed to clear owner index {}: {}", owner_id, e);
            return 0;
        }

        let mut saved = 0;
        for book in books.iter().filter(|b| b.owner_id() == owner_id) {
            match self.try_save_book(book, OwnerIndex::Create).await {
                Ok(()) => saved += 1,
                Err(e) => tracing::warn!("Failed to index book {} of owner {}: {}", book.id, owner_id, e),
            }
        }
        saved
    }

    async fn try_save_book(&self, book: &BookView, owner_index: OwnerIndex) -> AppResult<()> {
        let raw = serde_json::to_string(book)?;
        let member = book.id.to_string();
        let owner_key = owner_index_key(book.owner_id());

        self.store.set_ex(&book_key(book.id), &raw, self.ttl_secs).await?;
        self.store.zadd(ALL_INDEX, &member, book.score()).await?;

        let index_exists = self.store.zcard(&owner_key).await? > 0;
        if owner_index == OwnerIndex::Create || index_exists {
            self.store.zadd(&owner_key, &member, book.score()).await?;
            self.store.expire(&owner_key, self.ttl_secs).await?;
        }
        Ok(())
    }

    pub async fn get_book_by_id(&self, id: Uuid) -> Option<BookView> {
        match self.store.get(&book_key(id)).await {
            Ok(Some(raw)) => match serde_json::from_str(&raw) {
                Ok(book) => {
                    tracing::debug!("Read model hit: book {}", id);
                    Some(book)
                }
                Err(e) => {
                    tracing::warn!("Undecodable projection for book {}: {}", id, e);
                    None
                }
            },
            Ok(None) => {
                tracing::debug!("Read model miss: book {}", id);
                None
            }
            Err(e) => {
                tracing::warn!("Read model lookup failed for book {}: {}", id, e);
                None
            }
        }
    }

    /// Newest-first page over every projected book; `None` on miss
    pub async fn get_all_books(&self, pagination: Pagination) -> Option<Page<BookView>> {
        self.window(ALL_INDEX, pagination).await
    }

    /// Newest-first page over one owner's books; `None` on miss
    pub async fn get_books_by_owner(&self, owner_id: Uuid, pagination: Pagination) -> Option<Page<BookView>> {
        self.window(&owner_index_key(owner_id), pagination).await
    }

    async fn window(&self, index: &str, pagination: Pagination) -> Option<Page<BookView>> {
        match self.try_window(index, pagination).await {
            Ok(page) => {
                let result = if page.is_some() { "hit" } else { "miss" };
                metrics::counter!("cache_requests_total", "layer" => "read_model", "result" => result)
                    .increment(1);
                page
            }
            Err(e) => {
                tracing::warn!("Read model window failed for {}: {}", index, e);
                None
            }
        }
    }

    async fn try_window(&self, index: &str, pagination: Pagination) -> AppResult<Option<Page<BookView>>> {
        let total = self.store.zcard(index).await?;
        if total == 0 {
            return Ok(None);
        }

        let (start, stop) = pagination.range();
        let ids = self.store.zrevrange(index, start, stop).await?;
        let Some(books) = self.load(&ids).await? else {
            tracing::debug!("Read model window for {} has expired entries", index);
            return Ok(None);
        };

        Ok(Some(Page::new(books, total, pagination)))
    }

    /// Batch-load blobs in index order. `None` if any one is missing.
    async fn load(&self, ids: &[String]) -> AppResult<Option<Vec<BookView>>> {
        if ids.is_empty() {
            return Ok(Some(Vec::new()));
        }
        let keys: Vec<String> = ids.iter().map(|id| format!("{}{}", BOOK_PREFIX, id)).collect();
        let raws = self.store.mget(&keys).await?;

        let mut books = Vec::with_capacity(raws.len());
        for raw in raws {
            let Some(raw) = raw else {
                return Ok(None);
            };
            books.push(serde_json::from_str::<BookView>(&raw)?);
        }
        Ok(Some(books))
    }

    /// Remove a book's blob and both index memberships
    pub async fn delete_book(&self, id: Uuid) {
        if let Err(e) = self.try_delete_book(id).await {
            tracing::warn!("Failed to remove projection of book {}: {}", id, e);
        }
    }

    async fn try_delete_book(&self, id: Uuid) -> AppResult<()> {
        let member = id.to_string();

        let owner_indexes = match self.get_book_by_id(id).await {
            Some(book) => vec![owner_index_key(book.owner_id())],
            None => self.store.keys(&format!("{}*", OWNER_INDEX_PREFIX)).await?,
        };

        self.store.del(&[book_key(id)]).await?;
        self.store.zrem(ALL_INDEX, &member).await?;
        for index in owner_indexes {
            self.store.zrem(&index, &member).await?;
        }
        Ok(())
    }

    /// Destructive rebuild: drop every projection key, then re-insert.
    /// Not atomic; readers in between see a partial projection and fall back.
    pub async fn rebuild_from_source(&self, books: &[BookView]) -> usize {
        match self.store.keys(PROJECTION_PATTERN).await {
            Ok(keys) => {
                if let Err(e) = self.store.del(&keys).await {
                    tracing::warn!("Failed to clear read model before rebuild: {}", e);
                }
            }
            Err(e) => tracing::warn!("Failed to list read model keys before rebuild: {}", e),
        }

        let mut saved = 0;
        for book in books {
            match self.try_save_book(book, OwnerIndex::Create).await {
                Ok(()) => saved += 1,
                Err(e) => tracing::warn!("Failed to project book {} during rebuild: {}", book.id, e),
            }
        }
        tracing::info!("Read model rebuilt: {}/{} books", saved, books.len());
        saved
    }

    /// Full rebuild from the durable store. Durable read errors propagate.
    pub async fn rebuild_from_store(&self, books: &dyn BookStore) -> AppResult<usize> {
        let all = books.find(&BookFilter::default(), BookSort::default(), None).await?;
        Ok(self.rebuild_from_source(&all).await)
    }

    /// Start a detached full rebuild unless one is already running
    pub fn spawn_rebuild(&self, books: Arc<dyn BookStore>) -> bool {
        if self.rebuilding.swap(true, Ordering::SeqCst) {
            tracing::debug!("Read model rebuild already running");
            return false;
        }
        let read_model = self.clone();
        tokio::spawn(async move {
            if let Err(e) = read_model.rebuild_from_store(books.as_ref()).await {
                tracing::error!("Read model rebuild failed: {}", e);
            }
            read_model.rebuilding.store(false, Ordering::SeqCst);
        });
        true
    }

    pub fn is_rebuilding(&self) -> bool {
        self.rebuilding.load(Ordering::SeqCst)
    }

    /// Case-insensitive title/author/description match over the projection, cached briefly.
    /// `None` when the projection is empty, partial or unreachable.
    pub async fn search_books(&self, term: &str) -> Option<Vec<BookView>> {
        match self.try_search_books(term).await {
            Ok(found) => found,
            Err(e) => {
                tracing::warn!("Read model search failed for {}: {}", term, e);
                None
            }
        }
    }

    async fn try_search_books(&self, term: &str) -> AppResult<Option<Vec<BookView>>> {
        let key = search_key(term);
        if let Some(raw) = self.store.get(&key).await? {
            return Ok(Some(serde_json::from_str(&raw)?));
        }

        let ids = self.store.zrevrange(ALL_INDEX, 0, -1).await?;
        if ids.is_empty() {
            return Ok(None);
        }
        let Some(books) = self.load(&ids).await? else {
            return Ok(None);
        };

        let matches: Vec<BookView> = books.into_iter().filter(|b| b.matches_text(term)).collect();

        self.store
            .set_ex(&key, &serde_json::to_string(&matches)?, self.search_ttl_secs)
            .await?;
        Ok(Some(matches))
    }

    pub async fn invalidate_search_cache(&self) {
        let pattern = format!("{}*", SEARCH_PREFIX);
        let result = async {
            let keys = self.store.keys(&pattern).await?;
            self.store.del(&keys).await
        }
        .await;
        if let Err(e) = result {
            tracing::warn!("Failed to invalidate read model search cache: {}", e);
        }
    }
}
