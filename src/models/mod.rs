//! Data models for Shelfshare

pub mod book;
pub mod borrow;
pub mod notification;
pub mod user;

// Re-export commonly used types
pub use book::{Book, BookFilter, BookPatch, BookSort, BookView, NewBook, OwnerInfo, Page, Pagination};
pub use borrow::{Borrow, BorrowFilter, BorrowStatus, BorrowTransition, NewBorrow};
pub use notification::{NewNotification, Notification, NotificationKind, RelatedModel};
pub use user::UserShort;
