//! Answers the active-borrow check issued before a book is deleted

use std::sync::Arc;

use async_trait::async_trait;

use crate::{
    error::AppResult,
    events::{DomainEvent, EventBus, EventHandler, Topic},
    models::{BorrowFilter, BorrowStatus},
    repository::BorrowStore,
};

pub struct BorrowingResponder {
    borrows: Arc<dyn BorrowStore>,
    bus: EventBus,
}

impl BorrowingResponder {
    pub fn new(borrows: Arc<dyn BorrowStore>, bus: EventBus) -> Self {
        Self { borrows, bus }
    }

    pub fn subscribe(self: Arc<Self>, bus: &EventBus) {
        bus.on(Topic::BorrowCheckActiveRequest, self);
    }
}

#[async_trait]
impl EventHandler for BorrowingResponder {
    fn name(&self) -> &'static str {
        "borrowing_responder"
    }

    async fn handle(&self, event: &DomainEvent) -> AppResult<()> {
        let DomainEvent::CheckActiveRequest { correlation_id, book_id } = event else {
            return Ok(());
        };

        let filter = BorrowFilter {
            book_id: Some(*book_id),
            statuses: vec![BorrowStatus::Pending, BorrowStatus::Accepted],
            ..Default::default()
        };

        // A failed count is reported to the requester instead of staying silent
        let (active, error) = match self.borrows.count(&filter).await {
            Ok(active) => (active, None),
            Err(e) => {
                tracing::error!("Active borrow check failed for book {}: {}", book_id, e);
                (0, Some(e.to_string()))
            }
        };

        self.bus
            .emit(DomainEvent::CheckActiveResponse {
                correlation_id: *correlation_id,
                book_id: *book_id,
                active,
                error,
            })
            .await;
        Ok(())
    }
}
