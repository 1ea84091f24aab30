//! Book model, its denormalized view and related types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::user::UserShort;

/// Book record from the durable store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Book {
    pub id: Uuid,
    pub title: String,
    pub authors: Vec<String>,
    pub description: String,
    pub thumbnail: String,
    pub owner_id: Uuid,
    pub available: bool,
    pub categories: Vec<String>,
    pub google_book_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Owner details inlined into a book view
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnerInfo {
    pub id: Uuid,
    pub name: String,
    pub email: String,
}

impl OwnerInfo {
    pub fn unknown(id: Uuid) -> Self {
        Self {
            id,
            name: "Unknown".to_string(),
            email: String::new(),
        }
    }
}

impl From<UserShort> for OwnerInfo {
    fn from(user: UserShort) -> Self {
        Self {
            id: user.id,
            name: user.name,
            email: user.email,
        }
    }
}

/// Book with its owner populated.
///
/// This is the shape stored in the read model and returned by every book query,
/// whether it came from the projection or from the durable store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookView {
    pub id: Uuid,
    pub title: String,
    pub authors: Vec<String>,
    pub description: String,
    pub thumbnail: String,
    pub owner: OwnerInfo,
    pub available: bool,
    pub categories: Vec<String>,
    pub google_book_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl BookView {
    /// Build a view from a book and its (possibly missing) owner
    pub fn from_parts(book: Book, owner: Option<UserShort>) -> Self {
        let owner = match owner {
            Some(user) if user.id == book.owner_id => OwnerInfo::from(user),
            _ => OwnerInfo::unknown(book.owner_id),
        };
        Self {
            id: book.id,
            title: book.title,
            authors: book.authors,
            description: book.description,
            thumbnail: book.thumbnail,
            owner,
            available: book.available,
            categories: book.categories,
            google_book_id: book.google_book_id,
            created_at: book.created_at,
            updated_at: book.updated_at,
        }
    }

    pub fn owner_id(&self) -> Uuid {
        self.owner.id
    }

    pub fn matches_text(&self, term: &str) -> bool {
        matches_text(term, &self.title, &self.authors, &self.description)
    }

    /// Creation time in milliseconds, used as sorted-set score
    pub fn score(&self) -> f64 {
        self.created_at.timestamp_millis() as f64
    }
}

/// Data for inserting a book
#[derive(Debug, Clone)]
pub struct NewBook {
    pub title: String,
    pub authors: Vec<String>,
    pub description: String,
    pub thumbnail: String,
    pub owner_id: Uuid,
    pub available: bool,
    pub categories: Vec<String>,
    pub google_book_id: Option<String>,
}

/// Field-level partial update; `None` leaves the field untouched
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BookPatch {
    pub title: Option<String>,
    pub authors: Option<Vec<String>>,
    pub description: Option<String>,
    pub thumbnail: Option<String>,
    pub categories: Option<Vec<String>>,
    pub google_book_id: Option<String>,
    pub available: Option<bool>,
}

impl BookPatch {
    pub fn availability(available: bool) -> Self {
        Self {
            available: Some(available),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// True when at least one field other than `available` is set
    pub fn touches_content(&self) -> bool {
        self.title.is_some()
            || self.authors.is_some()
            || self.description.is_some()
            || self.thumbnail.is_some()
            || self.categories.is_some()
            || self.google_book_id.is_some()
    }

    pub fn apply(&self, book: &mut Book) {
        if let Some(ref title) = self.title {
            book.title = title.trim().to_string();
        }
        if let Some(ref authors) = self.authors {
            book.authors = normalize_list(authors);
        }
        if let Some(ref description) = self.description {
            book.description = description.clone();
        }
        if let Some(ref thumbnail) = self.thumbnail {
            book.thumbnail = thumbnail.clone();
        }
        if let Some(ref categories) = self.categories {
            book.categories = normalize_list(categories);
        }
        if let Some(ref google_book_id) = self.google_book_id {
            book.google_book_id = Some(google_book_id.clone());
        }
        if let Some(available) = self.available {
            book.available = available;
        }
    }
}

/// Trim entries and drop blank ones
pub fn normalize_list(values: &[String]) -> Vec<String> {
    values
        .iter()
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .collect()
}

/// Free-text predicate shared by the durable filter and projection search:
/// case-insensitive substring over title, authors and description.
pub fn matches_text(term: &str, title: &str, authors: &[String], description: &str) -> bool {
    let needle = term.trim().to_lowercase();
    title.to_lowercase().contains(&needle)
        || description.to_lowercase().contains(&needle)
        || authors.iter().any(|a| a.to_lowercase().contains(&needle))
}

/// Filters understood by the durable store's book listing
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BookFilter {
    /// Case-insensitive substring over title, authors and description
    pub q: Option<String>,
    pub authors: Option<String>,
    pub category: Option<String>,
    pub available: Option<bool>,
    pub owner_id: Option<Uuid>,
}

impl BookFilter {
    pub fn by_owner(owner_id: Uuid) -> Self {
        Self {
            owner_id: Some(owner_id),
            ..Default::default()
        }
    }

    pub fn matches(&self, book: &Book) -> bool {
        if let Some(ref q) = self.q {
            if !matches_text(q, &book.title, &book.authors, &book.description) {
                return false;
            }
        }
        if let Some(ref authors) = self.authors {
            let needle = authors.to_lowercase();
            if !book.authors.iter().any(|a| a.to_lowercase().contains(&needle)) {
                return false;
            }
        }
        if let Some(ref category) = self.category {
            if !book.categories.iter().any(|c| c == category) {
                return false;
            }
        }
        if let Some(available) = self.available {
            if book.available != available {
                return false;
            }
        }
        if let Some(owner_id) = self.owner_id {
            if book.owner_id != owner_id {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookSortField {
    #[default]
    CreatedAt,
    Title,
}

impl BookSortField {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookSortField::CreatedAt => "created_at",
            BookSortField::Title => "title",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookSort {
    pub field: BookSortField,
    pub descending: bool,
}

impl Default for BookSort {
    fn default() -> Self {
        Self {
            field: BookSortField::CreatedAt,
            descending: true,
        }
    }
}

impl BookSort {
    pub fn sort(&self, books: &mut [BookView]) {
        match self.field {
            BookSortField::CreatedAt => books.sort_by(|a, b| a.created_at.cmp(&b.created_at)),
            BookSortField::Title => {
                books.sort_by(|a, b| a.title.to_lowercase().cmp(&b.title.to_lowercase()))
            }
        }
        if self.descending {
            books.reverse();
        }
    }

    pub fn order_label(&self) -> &'static str {
        if self.descending {
            "desc"
        } else {
            "asc"
        }
    }
}

/// Offset/limit window, 1-based page
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    pub page: u32,
    pub limit: u32,
}

impl Pagination {
    pub fn new(page: u32, limit: u32) -> Self {
        Self { page, limit }
    }

    pub fn skip(&self) -> u64 {
        u64::from(self.page.saturating_sub(1)) * u64::from(self.limit)
    }

    /// Inclusive `(start, end)` indexes for a sorted-set range
    pub fn range(&self) -> (isize, isize) {
        let start = self.skip() as isize;
        (start, start + self.limit as isize - 1)
    }

    /// Slice an in-memory list the same way the store would
    pub fn slice<T: Clone>(&self, items: &[T]) -> Vec<T> {
        items
            .iter()
            .skip(self.skip() as usize)
            .take(self.limit as usize)
            .cloned()
            .collect()
    }
}

/// A page of results
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub current_page: u32,
    pub total_pages: u32,
    pub has_next_page: bool,
    pub has_prev_page: bool,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, total: u64, pagination: Pagination) -> Self {
        let limit = u64::from(pagination.limit.max(1));
        let total_pages = total.div_ceil(limit) as u32;
        Self {
            items,
            total,
            current_page: pagination.page,
            total_pages,
            has_next_page: pagination.page < total_pages,
            has_prev_page: pagination.page > 1,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
