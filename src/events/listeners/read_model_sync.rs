//! Keeps the book projection in step with book events

use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use super::subscribe;
use crate::{
    error::AppResult,
    events::{DomainEvent, EventBus, EventHandler, Topic},
    repository::BookStore,
    services::read_model::BookReadModel,
};

pub struct ReadModelSyncListener {
    read_model: BookReadModel,
    books: Arc<dyn BookStore>,
}

impl ReadModelSyncListener {
    pub const TOPICS: [Topic; 5] = [
        Topic::BookCreated,
        Topic::BookUpdated,
        Topic::BookDeleted,
        Topic::BookBorrowed,
        Topic::BookReturned,
    ];

    pub fn new(read_model: BookReadModel, books: Arc<dyn BookStore>) -> Self {
        Self { read_model, books }
    }

    pub fn subscribe(self: Arc<Self>, bus: &EventBus) {
        subscribe(bus, self, &Self::TOPICS);
    }

    /// Re-read a book from the durable store; drop its projection if it is gone
    pub async fn refresh(&self, book_id: Uuid) -> AppResult<()> {
        match self.books.find_view(book_id).await? {
            Some(book) => self.read_model.save_book(&book).await,
            None => {
                tracing::debug!("Book {} no longer exists, dropping projection", book_id);
                self.read_model.delete_book(book_id).await;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl EventHandler for ReadModelSyncListener {
    fn name(&self) -> &'static str {
        "read_model_sync"
    }

    async fn handle(&self, event: &DomainEvent) -> AppResult<()> {
        match event {
            DomainEvent::BookCreated { book } => {
                self.read_model.save_book(book).await;
                self.read_model.invalidate_search_cache().await;
            }
            // Cached search results carry whole views, availability included
            DomainEvent::BookUpdated { book, .. } => {
                self.read_model.save_book(book).await;
                self.read_model.invalidate_search_cache().await;
            }
            DomainEvent::BookBorrowed { book_id, book, .. }
            | DomainEvent::BookReturned { book_id, book, .. } => {
                match book {
                    Some(book) => self.read_model.save_book(book).await,
                    None => self.refresh(*book_id).await?,
                }
                self.read_model.invalidate_search_cache().await;
            }
            DomainEvent::BookDeleted { book_id, .. } => {
                self.read_model.delete_book(*book_id).await;
                self.read_model.invalidate_search_cache().await;
            }
            _ => {}
        }
        Ok(())
    }
}
