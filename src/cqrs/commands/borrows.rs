//! Borrow lifecycle handlers
//!
//! `pending -> accepted | rejected`, `accepted -> returned`. Every transition
//! is written with its expected status as a precondition, so the loser of a
//! race sees nothing updated and gets a conflict.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use uuid::Uuid;
use validator::Validate;

use super::{AcceptBorrow, CancelBorrow, RejectBorrow, RequestBorrow, ReturnBorrow};
use crate::{
    cqrs::{misrouted, Command, CommandHandler, CommandOutcome},
    error::{AppError, AppResult},
    events::{DomainEvent, EventBus},
    models::{BookView, Borrow, BorrowFilter, BorrowStatus, BorrowTransition, NewBorrow},
    repository::Repository,
    services::cache::{keys, QueryCache},
};

const ALREADY_PENDING: &str = "A borrow request for this book is already pending";

pub struct BorrowCommandHandler {
    repository: Repository,
    bus: EventBus,
    cache: QueryCache,
}

impl BorrowCommandHandler {
    pub fn new(repository: Repository, bus: EventBus, cache: QueryCache) -> Self {
        Self { repository, bus, cache }
    }

    async fn load(&self, id: Uuid) -> AppResult<Borrow> {
        self.repository
            .borrows
            .find_by_id(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Borrow {} not found", id)))
    }

    async fn book_title(&self, book_id: Uuid) -> String {
        match self.repository.books.find_by_id(book_id).await {
            Ok(Some(book)) => book.title,
            Ok(None) => "Unknown book".to_string(),
            Err(e) => {
                tracing::warn!("Could not read title of book {}: {}", book_id, e);
                "Unknown book".to_string()
            }
        }
    }

    async fn invalidate(&self, borrow: &Borrow) {
        let mut stale = keys::borrow_lists(borrow.borrower_id, borrow.owner_id);
        stale.push(keys::borrow(borrow.id));
        self.cache.del(&stale).await;
    }

    fn require_owner(borrow: &Borrow, actor_id: Uuid, action: &str) -> AppResult<()> {
        if borrow.owner_id != actor_id {
            return Err(AppError::Authorization(format!(
                "Only the book owner can {} this request",
                action
            )));
        }
        Ok(())
    }

    fn require_borrower(borrow: &Borrow, actor_id: Uuid, action: &str) -> AppResult<()> {
        if borrow.borrower_id != actor_id {
            return Err(AppError::Authorization(format!(
                "Only the borrower can {} this borrow",
                action
            )));
        }
        Ok(())
    }

    fn require_status(borrow: &Borrow, expected: BorrowStatus, action: &str) -> AppResult<()> {
        if borrow.status != expected {
            return Err(AppError::Conflict(format!(
                "Cannot {} a borrow that is {}",
                action, borrow.status
            )));
        }
        Ok(())
    }

    async fn request(&self, command: RequestBorrow) -> AppResult<Borrow> {
        command.validate()?;

        let book = self
            .repository
            .books
            .find_by_id(command.book_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Book {} not found", command.book_id)))?;

        if book.owner_id == command.actor_id {
            return Err(AppError::Authorization("You cannot borrow your own book".to_string()));
        }
        if !book.available {
            return Err(AppError::Conflict(format!("Book {} is not available", book.id)));
        }

        let pending = BorrowFilter {
            book_id: Some(book.id),
            borrower_id: Some(command.actor_id),
            statuses: vec![BorrowStatus::Pending],
            ..Default::default()
        };
        if self.repository.borrows.count(&pending).await? > 0 {
            return Err(AppError::Conflict(ALREADY_PENDING.to_string()));
        }

        // The partial unique index catches the request that slipped past the check
        let borrow = self
            .repository
            .borrows
            .create(NewBorrow {
                book_id: book.id,
                borrower_id: command.actor_id,
                owner_id: book.owner_id,
                due_date: Utc::now() + Duration::days(i64::from(command.loan_days)),
            })
            .await
            .map_err(|e| match e {
                AppError::Duplicate(_) => AppError::Conflict(ALREADY_PENDING.to_string()),
                other => other,
            })?;
        tracing::info!("Borrow requested: {} for book {}", borrow.id, book.id);

        self.bus
            .emit(DomainEvent::BorrowCreated {
                borrow: borrow.clone(),
                book_title: book.title,
            })
            .await;
        self.invalidate(&borrow).await;
        Ok(borrow)
    }

    async fn accept(&self, command: AcceptBorrow) -> AppResult<Borrow> {
        command.validate()?;

        let borrow = self.load(command.borrow_id).await?;
        Self::require_owner(&borrow, command.actor_id, "accept")?;
        Self::require_status(&borrow, BorrowStatus::Pending, "accept")?;

        // Claim the book first so two accepts for the same copy cannot both win
        let Some(book) = self
            .repository
            .books
            .set_available_if(borrow.book_id, true, false)
            .await?
        else {
            return match self.repository.books.find_by_id(borrow.book_id).await? {
                Some(_) => Err(AppError::Conflict(format!(
                    "Book {} is already lent out",
                    borrow.book_id
                ))),
                None => Err(AppError::NotFound(format!("Book {} not found", borrow.book_id))),
            };
        };

        let accepted = match self.repository.borrows.transition(borrow.id, BorrowTransition::Accept).await {
            Ok(Some(accepted)) => accepted,
            Ok(None) => {
                self.release_book(book.id).await;
                return Err(AppError::Conflict(format!("Borrow {} is no longer pending", borrow.id)));
            }
            Err(e) => {
                self.release_book(book.id).await;
                return Err(e);
            }
        };
        tracing::info!("Borrow accepted: {} for book {}", accepted.id, book.id);

        let view = self.book_view(book.id).await;
        self.bus
            .emit(DomainEvent::BorrowApproved {
                borrow: accepted.clone(),
                book_title: book.title,
            })
            .await;
        self.bus
            .emit(DomainEvent::BookBorrowed {
                book_id: book.id,
                book: view,
                borrow_id: accepted.id,
                borrower_id: accepted.borrower_id,
            })
            .await;

        self.invalidate(&accepted).await;
        self.cache.invalidate_book(Some(book.id)).await;
        Ok(accepted)
    }

    /// Undo a claim after the borrow transition lost
    async fn release_book(&self, book_id: Uuid) {
        if let Err(e) = self.repository.books.set_available_if(book_id, false, true).await {
            tracing::error!("Failed to release book {} after a lost accept: {}", book_id, e);
        }
    }

    /// Owner-populated view for availability events; `None` lets the
    /// projection listener re-read it
    async fn book_view(&self, book_id: Uuid) -> Option<BookView> {
        match self.repository.books.find_view(book_id).await {
            Ok(view) => view,
            Err(e) => {
                tracing::warn!("Could not read back book {}: {}", book_id, e);
                None
            }
        }
    }

    async fn reject(&self, command: RejectBorrow) -> AppResult<Borrow> {
        command.validate()?;

        let borrow = self.load(command.borrow_id).await?;
        Self::require_owner(&borrow, command.actor_id, "reject")?;
        Self::require_status(&borrow, BorrowStatus::Pending, "reject")?;

        let rejected = self
            .repository
            .borrows
            .transition(borrow.id, BorrowTransition::Reject)
            .await?
            .ok_or_else(|| AppError::Conflict(format!("Borrow {} is no longer pending", borrow.id)))?;
        tracing::info!("Borrow rejected: {}", rejected.id);

        self.bus
            .emit(DomainEvent::BorrowRejected {
                borrow: rejected.clone(),
                book_title: self.book_title(rejected.book_id).await,
                reason: command.reason,
            })
            .await;
        self.invalidate(&rejected).await;
        Ok(rejected)
    }

    async fn return_book(&self, command: ReturnBorrow) -> AppResult<Borrow> {
        command.validate()?;

        let borrow = self.load(command.borrow_id).await?;
        Self::require_borrower(&borrow, command.actor_id, "return")?;
        Self::require_status(&borrow, BorrowStatus::Accepted, "return")?;

        let returned = self
            .repository
            .borrows
            .transition(borrow.id, BorrowTransition::Return { at: Utc::now() })
            .await?
            .ok_or_else(|| AppError::Conflict(format!("Borrow {} is no longer accepted", borrow.id)))?;

        // The return is durable from here on; events go out even if the release fails
        let released = match self.repository.books.set_available_if(returned.book_id, false, true).await {
            Ok(Some(_)) => Ok(()),
            Ok(None) => {
                tracing::warn!("Book {} was not marked lent when borrow {} returned", returned.book_id, returned.id);
                Ok(())
            }
            Err(e) => {
                tracing::error!(
                    "Borrow {} returned but book {} is still marked lent: {}",
                    returned.id,
                    returned.book_id,
                    e
                );
                Err(e)
            }
        };
        tracing::info!("Borrow returned: {} for book {}", returned.id, returned.book_id);

        let view = self.book_view(returned.book_id).await;
        let book_title = match view {
            Some(ref v) => v.title.clone(),
            None => self.book_title(returned.book_id).await,
        };
        self.bus
            .emit(DomainEvent::BorrowReturned {
                borrow: returned.clone(),
                book_title,
            })
            .await;
        self.bus
            .emit(DomainEvent::BookReturned {
                book_id: returned.book_id,
                book: view,
                borrow_id: returned.id,
                borrower_id: returned.borrower_id,
            })
            .await;

        self.invalidate(&returned).await;
        self.cache.invalidate_book(Some(returned.book_id)).await;
        released?;
        Ok(returned)
    }

    async fn cancel(&self, command: CancelBorrow) -> AppResult<Uuid> {
        command.validate()?;

        let borrow = self.load(command.borrow_id).await?;
        Self::require_borrower(&borrow, command.actor_id, "cancel")?;
        Self::require_status(&borrow, BorrowStatus::Pending, "cancel")?;

        let cancelled = self
            .repository
            .borrows
            .delete_if_status(borrow.id, BorrowStatus::Pending)
            .await?
            .ok_or_else(|| AppError::Conflict(format!("Borrow {} is no longer pending", borrow.id)))?;
        tracing::info!("Borrow cancelled: {}", cancelled.id);

        self.bus
            .emit(DomainEvent::BorrowCancelled {
                borrow: cancelled.clone(),
                book_title: self.book_title(cancelled.book_id).await,
            })
            .await;
        self.invalidate(&cancelled).await;
        Ok(cancelled.id)
    }
}

#[async_trait]
impl CommandHandler for BorrowCommandHandler {
    async fn handle(&self, command: Command) -> AppResult<CommandOutcome> {
        match command {
            Command::RequestBorrow(c) => self.request(c).await.map(CommandOutcome::Borrow),
            Command::AcceptBorrow(c) => self.accept(c).await.map(CommandOutcome::Borrow),
            Command::RejectBorrow(c) => self.reject(c).await.map(CommandOutcome::Borrow),
            Command::ReturnBorrow(c) => self.return_book(c).await.map(CommandOutcome::Borrow),
            Command::CancelBorrow(c) => self.cancel(c).await.map(CommandOutcome::Deleted),
            other => Err(misrouted("BorrowCommandHandler", other.kind().as_str())),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;
    use crate::events::{EventHandler, Topic};
    use crate::repository::{BorrowStore, MemoryStore, MockBookStore};
    use crate::services::fast_store::MemoryFastStore;

    #[derive(Default)]
    struct Counter(AtomicUsize);

    #[async_trait]
    impl EventHandler for Counter {
        fn name(&self) -> &'static str {
            "counter"
        }

        async fn handle(&self, _event: &DomainEvent) -> AppResult<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_failed_release_on_return_still_publishes_and_reports() {
        let store = MemoryStore::new();
        let borrow = BorrowStore::create(
            &store,
            NewBorrow {
                book_id: Uuid::new_v4(),
                borrower_id: Uuid::new_v4(),
                owner_id: Uuid::new_v4(),
                due_date: Utc::now() + Duration::days(7),
            },
        )
        .await
        .unwrap();
        BorrowStore::transition(&store, borrow.id, BorrowTransition::Accept).await.unwrap();

        let mut books = MockBookStore::new();
        books
            .expect_set_available_if()
            .times(1)
            .returning(|_, _, _| Err(AppError::Database(sqlx::Error::PoolTimedOut)));
        books.expect_find_view().returning(|_| Ok(None));
        books.expect_find_by_id().returning(|_| Ok(None));

        let store = Arc::new(store);
        let repository = Repository {
            books: Arc::new(books),
            borrows: store.clone(),
            users: store.clone(),
            notifications: store.clone(),
        };
        let bus = EventBus::new(true);
        let returned_events = Arc::new(Counter::default());
        bus.on(Topic::BorrowReturned, returned_events.clone());
        let handler = BorrowCommandHandler::new(
            repository,
            bus,
            QueryCache::new(Arc::new(MemoryFastStore::new()), true),
        );

        let err = handler
            .return_book(ReturnBorrow {
                actor_id: borrow.borrower_id,
                borrow_id: borrow.id,
            })
            .await
            .unwrap_err();

        assert!(err.is_infrastructure());
        assert_eq!(returned_events.0.load(Ordering::SeqCst), 1);
        let stored = BorrowStore::find_by_id(store.as_ref(), borrow.id).await.unwrap().unwrap();
        assert_eq!(stored.status, BorrowStatus::Returned);
    }
}
