//! Write-side commands and their handlers

pub mod books;
pub mod borrows;

use serde::Deserialize;
use uuid::Uuid;
use validator::Validate;

use crate::models::{book::normalize_list, BookPatch};

pub use books::BookCommandHandler;
pub use borrows::BorrowCommandHandler;

pub const DEFAULT_LOAN_DAYS: u32 = 14;

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateBook {
    pub actor_id: Uuid,
    #[validate(length(min = 1, max = 300, message = "Title is required (max 300 characters)"))]
    pub title: String,
    #[validate(length(min = 1, message = "At least one author is required"))]
    pub authors: Vec<String>,
    #[serde(default)]
    #[validate(length(max = 5000, message = "Description is too long"))]
    pub description: String,
    #[serde(default)]
    pub thumbnail: String,
    #[serde(default)]
    pub categories: Vec<String>,
    pub google_book_id: Option<String>,
}

impl CreateBook {
    /// Trim text and drop blank list entries before validation
    pub fn normalized(mut self) -> Self {
        self.title = self.title.trim().to_string();
        self.authors = normalize_list(&self.authors);
        self.categories = normalize_list(&self.categories);
        self.thumbnail = self.thumbnail.trim().to_string();
        self
    }
}

/// Partial update; fields left `None` are untouched.
///
/// Content fields are owner-only. An update that touches nothing but
/// `available` is accepted from any actor: it is the hook through which the
/// borrow subsystem may flip availability, and callers exposing this command
/// to end users must restrict it themselves. The borrow handlers in this crate
/// use the conditional `set_available_if` instead, which keeps availability
/// tied to the accepted borrow.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct UpdateBook {
    pub actor_id: Uuid,
    pub book_id: Uuid,
    #[validate(length(min = 1, max = 300, message = "Title cannot be blank (max 300 characters)"))]
    pub title: Option<String>,
    #[validate(length(min = 1, message = "At least one author is required"))]
    pub authors: Option<Vec<String>>,
    #[validate(length(max = 5000, message = "Description is too long"))]
    pub description: Option<String>,
    pub thumbnail: Option<String>,
    pub categories: Option<Vec<String>>,
    pub google_book_id: Option<String>,
    pub available: Option<bool>,
}

impl UpdateBook {
    pub fn normalized(mut self) -> Self {
        self.title = self.title.map(|t| t.trim().to_string());
        self.authors = self.authors.map(|a| normalize_list(&a));
        self.categories = self.categories.map(|c| normalize_list(&c));
        self
    }

    pub fn patch(&self) -> BookPatch {
        BookPatch {
            title: self.title.clone(),
            authors: self.authors.clone(),
            description: self.description.clone(),
            thumbnail: self.thumbnail.clone(),
            categories: self.categories.clone(),
            google_book_id: self.google_book_id.clone(),
            available: self.available,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct DeleteBook {
    pub actor_id: Uuid,
    pub book_id: Uuid,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct RequestBorrow {
    pub actor_id: Uuid,
    pub book_id: Uuid,
    #[validate(range(min = 1, max = 90, message = "Loan must last between 1 and 90 days"))]
    pub loan_days: u32,
}

impl RequestBorrow {
    pub fn new(actor_id: Uuid, book_id: Uuid) -> Self {
        Self {
            actor_id,
            book_id,
            loan_days: DEFAULT_LOAN_DAYS,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct AcceptBorrow {
    pub actor_id: Uuid,
    pub borrow_id: Uuid,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct RejectBorrow {
    pub actor_id: Uuid,
    pub borrow_id: Uuid,
    #[validate(length(max = 500, message = "Reason is too long"))]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct ReturnBorrow {
    pub actor_id: Uuid,
    pub borrow_id: Uuid,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CancelBorrow {
    pub actor_id: Uuid,
    pub borrow_id: Uuid,
}
