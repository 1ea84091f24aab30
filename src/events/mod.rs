//! Domain events and the in-process event bus

pub mod bus;
pub mod listeners;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    error::AppResult,
    models::{BookView, Borrow},
};

pub use bus::EventBus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Topic {
    BookCreated,
    BookUpdated,
    BookDeleted,
    BookBorrowed,
    BookReturned,
    BorrowCreated,
    BorrowApproved,
    BorrowRejected,
    BorrowReturned,
    BorrowCancelled,
    BorrowCheckActiveRequest,
    BorrowCheckActiveResponse,
}

impl Topic {
    pub fn as_str(&self) -> &'static str {
        match self {
            Topic::BookCreated => "book.created",
            Topic::BookUpdated => "book.updated",
            Topic::BookDeleted => "book.deleted",
            Topic::BookBorrowed => "book.borrowed",
            Topic::BookReturned => "book.returned",
            Topic::BorrowCreated => "borrow.created",
            Topic::BorrowApproved => "borrow.approved",
            Topic::BorrowRejected => "borrow.rejected",
            Topic::BorrowReturned => "borrow.returned",
            Topic::BorrowCancelled => "borrow.cancelled",
            Topic::BorrowCheckActiveRequest => "borrow.check_active.request",
            Topic::BorrowCheckActiveResponse => "borrow.check_active.response",
        }
    }
}

impl std::fmt::Display for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything published on the bus.
///
/// Book creation, update and availability events carry the owner-populated
/// entity so listeners can project it without another durable read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DomainEvent {
    BookCreated {
        book: BookView,
    },
    BookUpdated {
        book: BookView,
        /// False when only availability changed
        content_changed: bool,
    },
    BookDeleted {
        book_id: Uuid,
        owner_id: Uuid,
        title: String,
    },
    /// `book` is `None` when the owner-populated view could not be read back
    BookBorrowed {
        book_id: Uuid,
        book: Option<BookView>,
        borrow_id: Uuid,
        borrower_id: Uuid,
    },
    BookReturned {
        book_id: Uuid,
        book: Option<BookView>,
        borrow_id: Uuid,
        borrower_id: Uuid,
    },
    BorrowCreated {
        borrow: Borrow,
        book_title: String,
    },
    BorrowApproved {
        borrow: Borrow,
        book_title: String,
    },
    BorrowRejected {
        borrow: Borrow,
        book_title: String,
        reason: Option<String>,
    },
    BorrowReturned {
        borrow: Borrow,
        book_title: String,
    },
    BorrowCancelled {
        borrow: Borrow,
        book_title: String,
    },
    CheckActiveRequest {
        correlation_id: Uuid,
        book_id: Uuid,
    },
    CheckActiveResponse {
        correlation_id: Uuid,
        book_id: Uuid,
        active: u64,
        error: Option<String>,
    },
}

impl DomainEvent {
    pub fn topic(&self) -> Topic {
        match self {
            DomainEvent::BookCreated { .. } => Topic::BookCreated,
            DomainEvent::BookUpdated { .. } => Topic::BookUpdated,
            DomainEvent::BookDeleted { .. } => Topic::BookDeleted,
            DomainEvent::BookBorrowed { .. } => Topic::BookBorrowed,
            DomainEvent::BookReturned { .. } => Topic::BookReturned,
            DomainEvent::BorrowCreated { .. } => Topic::BorrowCreated,
            DomainEvent::BorrowApproved { .. } => Topic::BorrowApproved,
            DomainEvent::BorrowRejected { .. } => Topic::BorrowRejected,
            DomainEvent::BorrowReturned { .. } => Topic::BorrowReturned,
            DomainEvent::BorrowCancelled { .. } => Topic::BorrowCancelled,
            DomainEvent::CheckActiveRequest { .. } => Topic::BorrowCheckActiveRequest,
            DomainEvent::CheckActiveResponse { .. } => Topic::BorrowCheckActiveResponse,
        }
    }

    pub fn correlation_id(&self) -> Option<Uuid> {
        match self {
            DomainEvent::CheckActiveRequest { correlation_id, .. }
            | DomainEvent::CheckActiveResponse { correlation_id, .. } => Some(*correlation_id),
            _ => None,
        }
    }

    /// Book touched by a book event
    pub fn book_id(&self) -> Option<Uuid> {
        match self {
            DomainEvent::BookCreated { book } | DomainEvent::BookUpdated { book, .. } => Some(book.id),
            DomainEvent::BookDeleted { book_id, .. }
            | DomainEvent::BookBorrowed { book_id, .. }
            | DomainEvent::BookReturned { book_id, .. } => Some(*book_id),
            _ => None,
        }
    }

    /// The borrow carried by a borrow lifecycle event
    pub fn borrow(&self) -> Option<&Borrow> {
        match self {
            DomainEvent::BorrowCreated { borrow, .. }
            | DomainEvent::BorrowApproved { borrow, .. }
            | DomainEvent::BorrowRejected { borrow, .. }
            | DomainEvent::BorrowReturned { borrow, .. }
            | DomainEvent::BorrowCancelled { borrow, .. } => Some(borrow),
            _ => None,
        }
    }
}

/// A listener subscribed to one or more topics
#[async_trait]
pub trait EventHandler: Send + Sync {
    fn name(&self) -> &'static str;

    async fn handle(&self, event: &DomainEvent) -> AppResult<()>;
}
