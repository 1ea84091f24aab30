//! Sends notification emails for new and accepted borrow requests

use std::sync::Arc;

use async_trait::async_trait;

use super::subscribe;
use crate::{
    error::AppResult,
    events::{DomainEvent, EventBus, EventHandler, Topic},
    repository::UserStore,
    services::email::Mailer,
};

pub struct EmailListener {
    mailer: Arc<dyn Mailer>,
    users: Arc<dyn UserStore>,
}

impl EmailListener {
    pub const TOPICS: [Topic; 2] = [Topic::BorrowCreated, Topic::BorrowApproved];

    pub fn new(mailer: Arc<dyn Mailer>, users: Arc<dyn UserStore>) -> Self {
        Self { mailer, users }
    }

    pub fn subscribe(self: Arc<Self>, bus: &EventBus) {
        subscribe(bus, self, &Self::TOPICS);
    }
}

#[async_trait]
impl EventHandler for EmailListener {
    fn name(&self) -> &'static str {
        "email"
    }

    async fn handle(&self, event: &DomainEvent) -> AppResult<()> {
        match event {
            DomainEvent::BorrowCreated { borrow, book_title } => {
                let Some(owner) = self.users.find_by_id(borrow.owner_id).await? else {
                    tracing::warn!("Owner {} not found, skipping email", borrow.owner_id);
                    return Ok(());
                };
                let borrower = self.users.find_by_id(borrow.borrower_id).await?;
                let who = borrower.as_ref().map_or("Someone", |u| u.name.as_str());

                let body = format!(
                    "Hello {},\n\n{} would like to borrow \"{}\".\n\nOpen Shelfshare to accept or reject the request.\n",
                    owner.name, who, book_title
                );
                self.mailer
                    .send(&owner.email, &format!("New borrow request for \"{}\"", book_title), &body)
                    .await
            }
            DomainEvent::BorrowApproved { borrow, book_title } => {
                let Some(borrower) = self.users.find_by_id(borrow.borrower_id).await? else {
                    tracing::warn!("Borrower {} not found, skipping email", borrow.borrower_id);
                    return Ok(());
                };

                let body = format!(
                    "Hello {},\n\nYour request to borrow \"{}\" was accepted.\nPlease return it by {}.\n",
                    borrower.name,
                    book_title,
                    borrow.due_date.format("%Y-%m-%d")
                );
                self.mailer
                    .send(&borrower.email, &format!("Borrow request accepted: \"{}\"", book_title), &body)
                    .await
            }
            _ => Ok(()),
        }
    }
}
