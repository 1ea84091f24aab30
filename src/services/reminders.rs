//! Periodic due-date reminders for accepted borrows

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use tokio::task::JoinHandle;

use crate::{
    error::AppResult,
    models::{Borrow, BorrowFilter, BorrowStatus, NewNotification, NotificationKind},
    repository::Repository,
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub overdue: u32,
    pub due_soon: u32,
}

#[derive(Clone)]
pub struct ReminderService {
    repository: Repository,
    due_soon_days: i64,
}

impl ReminderService {
    pub fn new(repository: Repository, due_soon_days: i64) -> Self {
        Self { repository, due_soon_days }
    }

    /// One pass over accepted borrows. Runs to completion; a failed
    /// notification is logged and the sweep moves on.
    pub async fn sweep(&self, now: DateTime<Utc>) -> AppResult<SweepReport> {
        let accepted = BorrowFilter {
            statuses: vec![BorrowStatus::Accepted],
            ..Default::default()
        };
        let borrows = self.repository.borrows.find(&accepted).await?;
        let horizon = now + Duration::days(self.due_soon_days);

        let mut report = SweepReport::default();
        for borrow in borrows {
            let kind = if borrow.due_date < now {
                NotificationKind::BorrowOverdue
            } else if borrow.due_date <= horizon {
                NotificationKind::BorrowDueSoon
            } else {
                continue;
            };

            match self.notify(&borrow, kind, now).await {
                Ok(()) if kind == NotificationKind::BorrowOverdue => report.overdue += 1,
                Ok(()) => report.due_soon += 1,
                Err(e) => tracing::warn!("Reminder for borrow {} failed: {}", borrow.id, e),
            }
        }

        tracing::info!(
            "Due date sweep: {} overdue, {} due soon",
            report.overdue,
            report.due_soon
        );
        Ok(report)
    }

    async fn notify(&self, borrow: &Borrow, kind: NotificationKind, now: DateTime<Utc>) -> AppResult<()> {
        let title = self
            .repository
            .books
            .find_by_id(borrow.book_id)
            .await?
            .map(|b| b.title);
        let name = title.as_deref().unwrap_or("a borrowed book");

        let message = match kind {
            NotificationKind::BorrowOverdue => format!(
                "\"{}\" was due on {}. Please return it as soon as possible",
                name,
                borrow.due_date.format("%Y-%m-%d")
            ),
            _ => {
                let hours = (borrow.due_date - now).num_hours().max(0);
                let days_left = (hours + 23) / 24;
                format!("\"{}\" is due in {} day(s), on {}", name, days_left, borrow.due_date.format("%Y-%m-%d"))
            }
        };

        let notification =
            NewNotification::for_borrow(borrow.borrower_id, kind, borrow.id, message).with_book_title(title);
        self.repository.notifications.create(notification).await?;
        Ok(())
    }

    /// Run `sweep` every `interval`, starting one interval from now
    pub fn spawn(self, interval: StdDuration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
            loop {
                ticker.tick().await;
                if let Err(e) = self.sweep(Utc::now()).await {
                    tracing::error!("Due date sweep failed: {}", e);
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BorrowTransition, NewBook, NewBorrow};
    use crate::repository::{BookStore, BorrowStore, MemoryStore, NotificationStore};

    async fn accepted_borrow(store: &MemoryStore, due_in_days: i64) -> Borrow {
        let owner = store.insert_user("Olive", "olive@example.com").await;
        let book = BookStore::create(
            store,
            NewBook {
                title: "Dune".to_string(),
                authors: vec!["Frank Herbert".to_string()],
                description: String::new(),
                thumbnail: String::new(),
                owner_id: owner.id,
                available: true,
                categories: vec![],
                google_book_id: None,
            },
        )
        .await
        .unwrap();
        let borrow = BorrowStore::create(
            store,
            NewBorrow {
                book_id: book.id,
                borrower_id: uuid::Uuid::new_v4(),
                owner_id: owner.id,
                due_date: Utc::now() + Duration::days(due_in_days),
            },
        )
        .await
        .unwrap();
        store.transition(borrow.id, BorrowTransition::Accept).await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn test_sweep_classifies_due_dates() {
        let store = MemoryStore::new();
        let overdue = accepted_borrow(&store, -1).await;
        let soon = accepted_borrow(&store, 2).await;
        accepted_borrow(&store, 10).await;

        let service = ReminderService::new(Repository::in_memory(store.clone()), 3);
        let report = service.sweep(Utc::now()).await.unwrap();
        assert_eq!(report, SweepReport { overdue: 1, due_soon: 1 });

        let late = store.find_for_user(overdue.borrower_id).await.unwrap();
        assert_eq!(late[0].kind, NotificationKind::BorrowOverdue);
        assert_eq!(late[0].book_title.as_deref(), Some("Dune"));
        let due = store.find_for_user(soon.borrower_id).await.unwrap();
        assert_eq!(due[0].kind, NotificationKind::BorrowDueSoon);
    }
}
