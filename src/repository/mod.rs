//! Repository layer: the durable store behind narrow async traits

pub mod books;
pub mod borrows;
pub mod memory;
pub mod notifications;
pub mod users;

use std::sync::Arc;

use async_trait::async_trait;
use sqlx::{Pool, Postgres};
use uuid::Uuid;

use crate::{
    error::AppResult,
    models::{
        Book, BookFilter, BookPatch, BookSort, BookView, Borrow, BorrowFilter, BorrowStatus,
        BorrowTransition, NewBook, NewBorrow, NewNotification, Notification, Pagination,
        RelatedModel, UserShort,
    },
};

pub use memory::MemoryStore;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BookStore: Send + Sync {
    async fn find_by_id(&self, id: Uuid) -> AppResult<Option<Book>>;

    /// Book with its owner populated
    async fn find_view(&self, id: Uuid) -> AppResult<Option<BookView>>;

    /// Owner-populated listing. `None` pagination returns every match.
    async fn find(
        &self,
        filter: &BookFilter,
        sort: BookSort,
        pagination: Option<Pagination>,
    ) -> AppResult<Vec<BookView>>;

    async fn count(&self, filter: &BookFilter) -> AppResult<u64>;

    async fn create(&self, book: NewBook) -> AppResult<Book>;

    /// Apply the provided fields; `None` when the book does not exist
    async fn update(&self, id: Uuid, patch: &BookPatch) -> AppResult<Option<Book>>;

    /// Set `available` only if it currently equals `expected`.
    /// `None` when the book is missing or the precondition failed.
    async fn set_available_if(&self, id: Uuid, expected: bool, available: bool) -> AppResult<Option<Book>>;

    async fn delete(&self, id: Uuid) -> AppResult<bool>;
}

#[async_trait]
pub trait BorrowStore: Send + Sync {
    async fn find_by_id(&self, id: Uuid) -> AppResult<Option<Borrow>>;

    /// Matching borrows, newest request first
    async fn find(&self, filter: &BorrowFilter) -> AppResult<Vec<Borrow>>;

    async fn count(&self, filter: &BorrowFilter) -> AppResult<u64>;

    /// Insert a pending borrow. A second pending row for the same
    /// (book, borrower) fails with `AppError::Duplicate`.
    async fn create(&self, borrow: NewBorrow) -> AppResult<Borrow>;

    /// Compare-and-set on status. `None` when the borrow is missing or is no
    /// longer in `transition.from_status()`.
    async fn transition(&self, id: Uuid, transition: BorrowTransition) -> AppResult<Option<Borrow>>;

    /// Delete only while the borrow is in `status`
    async fn delete_if_status(&self, id: Uuid, status: BorrowStatus) -> AppResult<Option<Borrow>>;

    async fn delete_many(&self, filter: &BorrowFilter) -> AppResult<u64>;
}

#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_by_id(&self, id: Uuid) -> AppResult<Option<UserShort>>;
}

#[async_trait]
pub trait NotificationStore: Send + Sync {
    async fn create(&self, notification: NewNotification) -> AppResult<Notification>;

    /// Newest first
    async fn find_for_user(&self, user_id: Uuid) -> AppResult<Vec<Notification>>;

    async fn delete_related(&self, related_id: Uuid, model: RelatedModel) -> AppResult<u64>;
}

/// Main repository struct holding one handle per durable collection
#[derive(Clone)]
pub struct Repository {
    pub books: Arc<dyn BookStore>,
    pub borrows: Arc<dyn BorrowStore>,
    pub users: Arc<dyn UserStore>,
    pub notifications: Arc<dyn NotificationStore>,
}

impl Repository {
    /// Create a repository backed by PostgreSQL
    pub fn postgres(pool: Pool<Postgres>) -> Self {
        Self {
            books: Arc::new(books::BooksRepository::new(pool.clone())),
            borrows: Arc::new(borrows::BorrowsRepository::new(pool.clone())),
            users: Arc::new(users::UsersRepository::new(pool.clone())),
            notifications: Arc::new(notifications::NotificationsRepository::new(pool)),
        }
    }

    /// Create a repository where every collection lives in `store`
    pub fn in_memory(store: MemoryStore) -> Self {
        let store = Arc::new(store);
        Self {
            books: store.clone(),
            borrows: store.clone(),
            users: store.clone(),
            notifications: store,
        }
    }
}
