//! Removes records left behind by deleted books and cancelled borrows

use std::sync::Arc;

use async_trait::async_trait;

use super::subscribe;
use crate::{
    error::AppResult,
    events::{DomainEvent, EventBus, EventHandler, Topic},
    models::{BorrowFilter, BorrowStatus, RelatedModel},
    repository::{BorrowStore, NotificationStore},
};

pub struct CascadeCleanupListener {
    borrows: Arc<dyn BorrowStore>,
    notifications: Arc<dyn NotificationStore>,
}

impl CascadeCleanupListener {
    pub const TOPICS: [Topic; 2] = [Topic::BookDeleted, Topic::BorrowCancelled];

    pub fn new(borrows: Arc<dyn BorrowStore>, notifications: Arc<dyn NotificationStore>) -> Self {
        Self { borrows, notifications }
    }

    pub fn subscribe(self: Arc<Self>, bus: &EventBus) {
        subscribe(bus, self, &Self::TOPICS);
    }
}

#[async_trait]
impl EventHandler for CascadeCleanupListener {
    fn name(&self) -> &'static str {
        "cascade_cleanup"
    }

    async fn handle(&self, event: &DomainEvent) -> AppResult<()> {
        match event {
            DomainEvent::BookDeleted { book_id, .. } => {
                let history = BorrowFilter {
                    book_id: Some(*book_id),
                    statuses: vec![BorrowStatus::Rejected, BorrowStatus::Returned],
                    ..Default::default()
                };
                let borrows = self.borrows.delete_many(&history).await?;
                let notifications = self.notifications.delete_related(*book_id, RelatedModel::Book).await?;
                tracing::info!(
                    "Cleaned up book {}: {} borrows, {} notifications",
                    book_id,
                    borrows,
                    notifications
                );
            }
            DomainEvent::BorrowCancelled { borrow, .. } => {
                let removed = self.notifications.delete_related(borrow.id, RelatedModel::Borrow).await?;
                tracing::debug!("Removed {} notifications of cancelled borrow {}", removed, borrow.id);
            }
            _ => {}
        }
        Ok(())
    }
}
