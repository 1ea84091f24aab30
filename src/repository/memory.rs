//! In-memory durable store
//!
//! Implements every store trait over plain maps behind one lock, with the same
//! constraints as the PostgreSQL schema: the pending-borrow unique index and
//! the borrow cascade on book deletion. Used by tests and local runs.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{BookStore, BorrowStore, NotificationStore, UserStore};
use crate::{
    error::{AppError, AppResult},
    models::{
        book::normalize_list, Book, BookFilter, BookPatch, BookSort, BookView, Borrow, BorrowFilter,
        BorrowStatus, BorrowTransition, NewBook, NewBorrow, NewNotification, Notification,
        Pagination, RelatedModel, UserShort,
    },
};

#[derive(Debug, Default)]
struct MemoryState {
    users: HashMap<Uuid, UserShort>,
    books: HashMap<Uuid, Book>,
    borrows: HashMap<Uuid, Borrow>,
    notifications: Vec<Notification>,
}

impl MemoryState {
    fn view(&self, book: &Book) -> BookView {
        BookView::from_parts(book.clone(), self.users.get(&book.owner_id).cloned())
    }
}

#[derive(Clone, Debug, Default)]
pub struct MemoryStore {
    state: Arc<RwLock<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a user; users are read-only for the engine
    pub async fn insert_user(&self, name: &str, email: &str) -> UserShort {
        let user = UserShort {
            id: Uuid::new_v4(),
            name: name.to_string(),
            email: email.to_string(),
        };
        self.state.write().await.users.insert(user.id, user.clone());
        user
    }

    /// Snapshot of every borrow, in no particular order
    pub async fn all_borrows(&self) -> Vec<Borrow> {
        self.state.read().await.borrows.values().cloned().collect()
    }

    /// Snapshot of every book, in no particular order
    pub async fn all_books(&self) -> Vec<Book> {
        self.state.read().await.books.values().cloned().collect()
    }
}

#[async_trait]
impl BookStore for MemoryStore {
    async fn find_by_id(&self, id: Uuid) -> AppResult<Option<Book>> {
        Ok(self.state.read().await.books.get(&id).cloned())
    }

    async fn find_view(&self, id: Uuid) -> AppResult<Option<BookView>> {
        let state = self.state.read().await;
        Ok(state.books.get(&id).map(|b| state.view(b)))
    }

    async fn find(
        &self,
        filter: &BookFilter,
        sort: BookSort,
        pagination: Option<Pagination>,
    ) -> AppResult<Vec<BookView>> {
        let state = self.state.read().await;
        let mut views: Vec<BookView> = state
            .books
            .values()
            .filter(|b| filter.matches(b))
            .map(|b| state.view(b))
            .collect();
        sort.sort(&mut views);

        Ok(match pagination {
            Some(p) => p.slice(&views),
            None => views,
        })
    }

    async fn count(&self, filter: &BookFilter) -> AppResult<u64> {
        let state = self.state.read().await;
        Ok(state.books.values().filter(|b| filter.matches(b)).count() as u64)
    }

    async fn create(&self, book: NewBook) -> AppResult<Book> {
        let now = Utc::now();
        let created = Book {
            id: Uuid::new_v4(),
            title: book.title,
            authors: book.authors,
            description: book.description,
            thumbnail: book.thumbnail,
            owner_id: book.owner_id,
            available: book.available,
            categories: normalize_list(&book.categories),
            google_book_id: book.google_book_id,
            created_at: now,
            updated_at: now,
        };
        self.state.write().await.books.insert(created.id, created.clone());
        Ok(created)
    }

    async fn update(&self, id: Uuid, patch: &BookPatch) -> AppResult<Option<Book>> {
        let mut state = self.state.write().await;
        let Some(book) = state.books.get_mut(&id) else {
            return Ok(None);
        };
        patch.apply(book);
        book.updated_at = Utc::now();
        Ok(Some(book.clone()))
    }

    async fn set_available_if(&self, id: Uuid, expected: bool, available: bool) -> AppResult<Option<Book>> {
        let mut state = self.state.write().await;
        match state.books.get_mut(&id) {
            Some(book) if book.available == expected => {
                book.available = available;
                book.updated_at = Utc::now();
                Ok(Some(book.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn delete(&self, id: Uuid) -> AppResult<bool> {
        let mut state = self.state.write().await;
        if state.books.remove(&id).is_none() {
            return Ok(false);
        }
        state.borrows.retain(|_, b| b.book_id != id);
        Ok(true)
    }
}

#[async_trait]
impl BorrowStore for MemoryStore {
    async fn find_by_id(&self, id: Uuid) -> AppResult<Option<Borrow>> {
        Ok(self.state.read().await.borrows.get(&id).cloned())
    }

    async fn find(&self, filter: &BorrowFilter) -> AppResult<Vec<Borrow>> {
        let state = self.state.read().await;
        let mut borrows: Vec<Borrow> = state
            .borrows
            .values()
            .filter(|b| filter.matches(b))
            .cloned()
            .collect();
        borrows.sort_by(|a, b| b.requested_at.cmp(&a.requested_at).then(a.id.cmp(&b.id)));
        Ok(borrows)
    }

    async fn count(&self, filter: &BorrowFilter) -> AppResult<u64> {
        let state = self.state.read().await;
        Ok(state.borrows.values().filter(|b| filter.matches(b)).count() as u64)
    }

    async fn create(&self, borrow: NewBorrow) -> AppResult<Borrow> {
        let mut state = self.state.write().await;

        let duplicate = state.borrows.values().any(|b| {
            b.book_id == borrow.book_id
                && b.borrower_id == borrow.borrower_id
                && b.status == BorrowStatus::Pending
        });
        if duplicate {
            return Err(AppError::Duplicate(format!(
                "Pending borrow already exists for book {} and borrower {}",
                borrow.book_id, borrow.borrower_id
            )));
        }

        let now = Utc::now();
        let created = Borrow {
            id: Uuid::new_v4(),
            book_id: borrow.book_id,
            borrower_id: borrow.borrower_id,
            owner_id: borrow.owner_id,
            status: BorrowStatus::Pending,
            requested_at: now,
            due_date: borrow.due_date,
            return_date: None,
            created_at: now,
            updated_at: now,
        };
        state.borrows.insert(created.id, created.clone());
        Ok(created)
    }

    async fn transition(&self, id: Uuid, transition: BorrowTransition) -> AppResult<Option<Borrow>> {
        let mut state = self.state.write().await;
        match state.borrows.get_mut(&id) {
            Some(borrow) if borrow.status == transition.from_status() => {
                transition.apply(borrow, Utc::now());
                Ok(Some(borrow.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn delete_if_status(&self, id: Uuid, status: BorrowStatus) -> AppResult<Option<Borrow>> {
        let mut state = self.state.write().await;
        let matches = state.borrows.get(&id).is_some_and(|b| b.status == status);
        if !matches {
            return Ok(None);
        }
        Ok(state.borrows.remove(&id))
    }

    async fn delete_many(&self, filter: &BorrowFilter) -> AppResult<u64> {
        let mut state = self.state.write().await;
        let before = state.borrows.len();
        state.borrows.retain(|_, b| !filter.matches(b));
        Ok((before - state.borrows.len()) as u64)
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn find_by_id(&self, id: Uuid) -> AppResult<Option<UserShort>> {
        Ok(self.state.read().await.users.get(&id).cloned())
    }
}

#[async_trait]
impl NotificationStore for MemoryStore {
    async fn create(&self, notification: NewNotification) -> AppResult<Notification> {
        let created = Notification {
            id: Uuid::new_v4(),
            user_id: notification.user_id,
            kind: notification.kind,
            title: notification.title,
            message: notification.message,
            read: false,
            related_id: notification.related_id,
            related_model: notification.related_model,
            book_title: notification.book_title,
            sender_name: notification.sender_name,
            created_at: Utc::now(),
        };
        self.state.write().await.notifications.push(created.clone());
        Ok(created)
    }

    async fn find_for_user(&self, user_id: Uuid) -> AppResult<Vec<Notification>> {
        let state = self.state.read().await;
        let mut found: Vec<Notification> = state
            .notifications
            .iter()
            .filter(|n| n.user_id == user_id)
            .cloned()
            .collect();
        found.reverse();
        Ok(found)
    }

    async fn delete_related(&self, related_id: Uuid, model: RelatedModel) -> AppResult<u64> {
        let mut state = self.state.write().await;
        let before = state.notifications.len();
        state
            .notifications
            .retain(|n| !(n.related_id == Some(related_id) && n.related_model == model));
        Ok((before - state.notifications.len()) as u64)
    }
}
