//! Read-side queries and their handlers

pub mod books;
pub mod borrows;

use serde::Deserialize;
use uuid::Uuid;
use validator::Validate;

use crate::models::{BookFilter, BookSort, Pagination};

pub use books::BookQueryHandler;
pub use borrows::BorrowQueryHandler;

pub const DEFAULT_PAGE: u32 = 1;
pub const DEFAULT_LIMIT: u32 = 20;

fn default_page() -> u32 {
    DEFAULT_PAGE
}

fn default_limit() -> u32 {
    DEFAULT_LIMIT
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct GetAllBooks {
    pub q: Option<String>,
    pub authors: Option<String>,
    pub category: Option<String>,
    pub available: Option<bool>,
    #[serde(default = "default_page")]
    #[validate(range(min = 1, message = "Page must be at least 1"))]
    pub page: u32,
    #[serde(default = "default_limit")]
    #[validate(range(min = 1, max = 100, message = "Limit must be between 1 and 100"))]
    pub limit: u32,
}

impl Default for GetAllBooks {
    fn default() -> Self {
        Self {
            q: None,
            authors: None,
            category: None,
            available: None,
            page: DEFAULT_PAGE,
            limit: DEFAULT_LIMIT,
        }
    }
}

impl GetAllBooks {
    pub fn filter(&self) -> BookFilter {
        BookFilter {
            q: non_blank(&self.q),
            authors: non_blank(&self.authors),
            category: non_blank(&self.category),
            available: self.available,
            owner_id: None,
        }
    }

    pub fn pagination(&self) -> Pagination {
        Pagination::new(self.page, self.limit)
    }
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct GetBookById {
    pub book_id: Uuid,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct GetMyBooks {
    pub actor_id: Uuid,
    pub available: Option<bool>,
    #[serde(default = "default_page")]
    #[validate(range(min = 1, message = "Page must be at least 1"))]
    pub page: u32,
    #[serde(default = "default_limit")]
    #[validate(range(min = 1, max = 100, message = "Limit must be between 1 and 100"))]
    pub limit: u32,
}

impl GetMyBooks {
    pub fn new(actor_id: Uuid) -> Self {
        Self {
            actor_id,
            available: None,
            page: DEFAULT_PAGE,
            limit: DEFAULT_LIMIT,
        }
    }

    pub fn filter(&self) -> BookFilter {
        BookFilter {
            available: self.available,
            ..BookFilter::by_owner(self.actor_id)
        }
    }

    pub fn pagination(&self) -> Pagination {
        Pagination::new(self.page, self.limit)
    }
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct SearchBooks {
    #[validate(length(min = 1, max = 200, message = "Search term is required"))]
    pub term: String,
    #[serde(default = "default_page")]
    #[validate(range(min = 1, message = "Page must be at least 1"))]
    pub page: u32,
    #[serde(default = "default_limit")]
    #[validate(range(min = 1, max = 100, message = "Limit must be between 1 and 100"))]
    pub limit: u32,
    #[serde(default)]
    pub sort: BookSort,
}

impl SearchBooks {
    pub fn new(term: impl Into<String>) -> Self {
        Self {
            term: term.into(),
            page: DEFAULT_PAGE,
            limit: DEFAULT_LIMIT,
            sort: BookSort::default(),
        }
    }

    pub fn normalized(mut self) -> Self {
        self.term = self.term.trim().to_string();
        self
    }

    pub fn pagination(&self) -> Pagination {
        Pagination::new(self.page, self.limit)
    }
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct GetBorrowById {
    pub actor_id: Uuid,
    pub borrow_id: Uuid,
}

/// Every request the actor has sent, any status
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct GetBorrowerRequests {
    pub actor_id: Uuid,
}

/// Books the actor currently has on loan
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct GetActiveBorrows {
    pub actor_id: Uuid,
}

/// Requests waiting on the actor's decision as owner
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct GetPendingRequests {
    pub actor_id: Uuid,
}

fn non_blank(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}
