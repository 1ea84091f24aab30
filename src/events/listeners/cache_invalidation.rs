//! Drops query-result cache entries made stale by mutations.
//! Independent of the projection.

use std::sync::Arc;

use async_trait::async_trait;

use super::subscribe;
use crate::{
    error::AppResult,
    events::{DomainEvent, EventBus, EventHandler, Topic},
    services::cache::{keys, QueryCache},
};

pub struct CacheInvalidationListener {
    cache: QueryCache,
}

impl CacheInvalidationListener {
    pub const TOPICS: [Topic; 10] = [
        Topic::BookCreated,
        Topic::BookUpdated,
        Topic::BookDeleted,
        Topic::BookBorrowed,
        Topic::BookReturned,
        Topic::BorrowCreated,
        Topic::BorrowApproved,
        Topic::BorrowRejected,
        Topic::BorrowReturned,
        Topic::BorrowCancelled,
    ];

    pub fn new(cache: QueryCache) -> Self {
        Self { cache }
    }

    pub fn subscribe(self: Arc<Self>, bus: &EventBus) {
        subscribe(bus, self, &Self::TOPICS);
    }
}

#[async_trait]
impl EventHandler for CacheInvalidationListener {
    fn name(&self) -> &'static str {
        "cache_invalidation"
    }

    async fn handle(&self, event: &DomainEvent) -> AppResult<()> {
        if let Some(book_id) = event.book_id() {
            self.cache.invalidate_book(Some(book_id)).await;
        }

        if let Some(borrow) = event.borrow() {
            let mut stale = keys::borrow_lists(borrow.borrower_id, borrow.owner_id);
            stale.push(keys::borrow(borrow.id));
            self.cache.del(&stale).await;
        }
        Ok(())
    }
}
