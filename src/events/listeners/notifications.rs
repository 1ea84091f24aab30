//! Persists in-app notifications for borrow lifecycle events

use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use super::subscribe;
use crate::{
    error::AppResult,
    events::{DomainEvent, EventBus, EventHandler, Topic},
    models::{NewNotification, NotificationKind, RelatedModel},
    repository::{NotificationStore, UserStore},
};

pub struct NotificationListener {
    notifications: Arc<dyn NotificationStore>,
    users: Arc<dyn UserStore>,
}

impl NotificationListener {
    pub const TOPICS: [Topic; 5] = [
        Topic::BorrowCreated,
        Topic::BorrowApproved,
        Topic::BorrowRejected,
        Topic::BorrowReturned,
        Topic::BorrowCancelled,
    ];

    pub fn new(notifications: Arc<dyn NotificationStore>, users: Arc<dyn UserStore>) -> Self {
        Self { notifications, users }
    }

    pub fn subscribe(self: Arc<Self>, bus: &EventBus) {
        subscribe(bus, self, &Self::TOPICS);
    }

    async fn user_name(&self, id: Uuid) -> AppResult<Option<String>> {
        Ok(self.users.find_by_id(id).await?.map(|u| u.name))
    }

    /// Build the notification for an event; `None` for events that notify nobody
    async fn compose(&self, event: &DomainEvent) -> AppResult<Option<NewNotification>> {
        let notification = match event {
            DomainEvent::BorrowCreated { borrow, book_title } => {
                let borrower = self.user_name(borrow.borrower_id).await?;
                let who = borrower.as_deref().unwrap_or("Someone");
                NewNotification::for_borrow(
                    borrow.owner_id,
                    NotificationKind::BorrowRequestNew,
                    borrow.id,
                    format!("{} wants to borrow \"{}\"", who, book_title),
                )
                .with_sender(borrower)
            }
            DomainEvent::BorrowApproved { borrow, book_title } => NewNotification::for_borrow(
                borrow.borrower_id,
                NotificationKind::BorrowRequestAccepted,
                borrow.id,
                format!(
                    "Your request to borrow \"{}\" was accepted. Due back {}",
                    book_title,
                    borrow.due_date.format("%Y-%m-%d")
                ),
            )
            .with_sender(self.user_name(borrow.owner_id).await?),
            DomainEvent::BorrowRejected { borrow, book_title, reason } => {
                let mut message = format!("Your request to borrow \"{}\" was rejected", book_title);
                if let Some(reason) = reason.as_deref().filter(|r| !r.trim().is_empty()) {
                    message.push_str(": ");
                    message.push_str(reason.trim());
                }
                NewNotification::for_borrow(
                    borrow.borrower_id,
                    NotificationKind::BorrowRequestRejected,
                    borrow.id,
                    message,
                )
                .with_sender(self.user_name(borrow.owner_id).await?)
            }
            DomainEvent::BorrowReturned { borrow, book_title } => {
                let borrower = self.user_name(borrow.borrower_id).await?;
                let who = borrower.as_deref().unwrap_or("The borrower");
                NewNotification::for_borrow(
                    borrow.owner_id,
                    NotificationKind::BookReturned,
                    borrow.id,
                    format!("{} returned \"{}\"", who, book_title),
                )
                .with_sender(borrower)
            }
            DomainEvent::BorrowCancelled { borrow, book_title } => {
                let borrower = self.user_name(borrow.borrower_id).await?;
                let who = borrower.as_deref().unwrap_or("The borrower");
                // The borrow record is gone, so this one points at the book
                let mut notification = NewNotification::for_borrow(
                    borrow.owner_id,
                    NotificationKind::BorrowRequestCancelled,
                    borrow.book_id,
                    format!("{} cancelled their request for \"{}\"", who, book_title),
                )
                .with_sender(borrower);
                notification.related_model = RelatedModel::Book;
                notification
            }
            _ => return Ok(None),
        };

        let book_title = match event {
            DomainEvent::BorrowCreated { book_title, .. }
            | DomainEvent::BorrowApproved { book_title, .. }
            | DomainEvent::BorrowRejected { book_title, .. }
            | DomainEvent::BorrowReturned { book_title, .. }
            | DomainEvent::BorrowCancelled { book_title, .. } => Some(book_title.clone()),
            _ => None,
        };
        Ok(Some(notification.with_book_title(book_title)))
    }
}

#[async_trait]
impl EventHandler for NotificationListener {
    fn name(&self) -> &'static str {
        "notifications"
    }

    async fn handle(&self, event: &DomainEvent) -> AppResult<()> {
        if let Some(notification) = self.compose(event).await? {
            let created = self.notifications.create(notification).await?;
            tracing::debug!("Notification {} ({}) for user {}", created.id, created.kind.as_str(), created.user_id);
        }
        Ok(())
    }
}
