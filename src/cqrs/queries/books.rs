//! Book read handlers
//!
//! Projection first, durable store on a miss. A miss schedules a detached
//! repair of the projection and never waits for it.

use async_trait::async_trait;
use uuid::Uuid;
use validator::Validate;

use super::{GetAllBooks, GetBookById, GetMyBooks, SearchBooks};
use crate::{
    config::CacheConfig,
    cqrs::{misrouted, Query, QueryHandler, QueryOutcome},
    error::{AppError, AppResult},
    models::{BookFilter, BookSort, BookView, Page, Pagination},
    repository::Repository,
    services::{
        cache::{keys, QueryCache},
        read_model::BookReadModel,
    },
};

pub struct BookQueryHandler {
    repository: Repository,
    read_model: BookReadModel,
    cache: QueryCache,
    config: CacheConfig,
}

impl BookQueryHandler {
    pub fn new(repository: Repository, read_model: BookReadModel, cache: QueryCache, config: CacheConfig) -> Self {
        Self {
            repository,
            read_model,
            cache,
            config,
        }
    }

    async fn durable_page(&self, filter: &BookFilter, sort: BookSort, pagination: Pagination) -> AppResult<Page<BookView>> {
        let books = self.repository.books.find(filter, sort, Some(pagination)).await?;
        let total = self.repository.books.count(filter).await?;
        Ok(Page::new(books, total, pagination))
    }

    async fn get_all_books(&self, query: GetAllBooks) -> AppResult<Page<BookView>> {
        query.validate()?;
        let filter = query.filter();
        let pagination = query.pagination();

        if filter != BookFilter::default() {
            let key = keys::books_page(&filter, pagination);
            return self
                .cache
                .get_or_set_json(&key, self.config.list_ttl_secs, || {
                    self.durable_page(&filter, BookSort::default(), pagination)
                })
                .await;
        }

        if let Some(page) = self.read_model.get_all_books(pagination).await {
            return Ok(page);
        }

        tracing::debug!("Read model miss for page {}, reading durable store", pagination.page);
        let page = self.durable_page(&filter, BookSort::default(), pagination).await?;
        if !page.is_empty() {
            self.read_model.spawn_rebuild(self.repository.books.clone());
        }
        Ok(page)
    }

    async fn get_book_by_id(&self, query: GetBookById) -> AppResult<BookView> {
        query.validate()?;

        if let Some(book) = self.read_model.get_book_by_id(query.book_id).await {
            return Ok(book);
        }

        let key = keys::book(query.book_id);
        if let Some(book) = self.cache.get_json::<BookView>(&key).await {
            self.spawn_save(book.clone());
            return Ok(book);
        }

        let book = self
            .repository
            .books
            .find_view(query.book_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Book {} not found", query.book_id)))?;

        self.cache.set_json(&key, &book, self.config.list_ttl_secs).await;
        self.spawn_save(book.clone());
        Ok(book)
    }

    fn spawn_save(&self, book: BookView) {
        let read_model = self.read_model.clone();
        tokio::spawn(async move {
            read_model.save_book(&book).await;
        });
    }

    async fn get_my_books(&self, query: GetMyBooks) -> AppResult<Page<BookView>> {
        query.validate()?;
        let filter = query.filter();
        let pagination = query.pagination();

        if query.available.is_some() {
            let key = keys::user_books(query.actor_id, &filter, pagination);
            return self
                .cache
                .get_or_set_json(&key, self.config.list_ttl_secs, || {
                    self.durable_page(&filter, BookSort::default(), pagination)
                })
                .await;
        }

        if let Some(page) = self.read_model.get_books_by_owner(query.actor_id, pagination).await {
            return Ok(page);
        }

        let page = self.durable_page(&filter, BookSort::default(), pagination).await?;
        if !page.is_empty() {
            self.spawn_owner_reindex(query.actor_id);
        }
        Ok(page)
    }

    /// Re-project every book of one owner so the owner index is complete
    fn spawn_owner_reindex(&self, owner_id: Uuid) {
        let read_model = self.read_model.clone();
        let books = self.repository.books.clone();
        tokio::spawn(async move {
            match books.find(&BookFilter::by_owner(owner_id), BookSort::default(), None).await {
                Ok(all) => {
                    let indexed = read_model.index_owner(owner_id, &all).await;
                    tracing::debug!("Re-indexed {}/{} books of owner {}", indexed, all.len(), owner_id);
                }
                Err(e) => tracing::warn!("Owner re-index failed for {}: {}", owner_id, e),
            }
        });
    }

    async fn search_books(&self, query: SearchBooks) -> AppResult<Page<BookView>> {
        let query = query.normalized();
        query.validate()?;
        let pagination = query.pagination();

        let key = keys::search(
            &query.term,
            pagination,
            query.sort.field.as_str(),
            query.sort.order_label(),
        );
        if let Some(page) = self.cache.get_json::<Page<BookView>>(&key).await {
            return Ok(page);
        }

        let page = match self.read_model.search_books(&query.term).await {
            Some(mut found) => {
                query.sort.sort(&mut found);
                let total = found.len() as u64;
                Page::new(pagination.slice(&found), total, pagination)
            }
            None => {
                let filter = BookFilter {
                    q: Some(query.term.clone()),
                    ..Default::default()
                };
                self.durable_page(&filter, query.sort, pagination).await?
            }
        };

        self.cache.set_json(&key, &page, self.config.search_ttl_secs).await;
        Ok(page)
    }
}

#[async_trait]
impl QueryHandler for BookQueryHandler {
    async fn handle(&self, query: Query) -> AppResult<QueryOutcome> {
        match query {
            Query::GetAllBooks(q) => self.get_all_books(q).await.map(QueryOutcome::Books),
            Query::GetBookById(q) => self.get_book_by_id(q).await.map(QueryOutcome::Book),
            Query::GetMyBooks(q) => self.get_my_books(q).await.map(QueryOutcome::Books),
            Query::SearchBooks(q) => self.search_books(q).await.map(QueryOutcome::Books),
            other => Err(misrouted("BookQueryHandler", other.kind().as_str())),
        }
    }
}
