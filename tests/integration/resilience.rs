//! Failure isolation: listeners, missing handlers, fast-store outages

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};

use shelfshare_server::{
    config::AppConfig,
    cqrs::{CommandBus, CommandKind, GetAllBooks, GetBookById, GetMyBooks, QueryBus, QueryKind, SearchBooks},
    error::{AppError, AppResult},
    events::{DomainEvent, EventHandler, Topic},
    models::{BorrowStatus, Pagination},
};

use crate::common::Harness;

struct Exploding;

#[async_trait]
impl EventHandler for Exploding {
    fn name(&self) -> &'static str {
        "exploding"
    }

    async fn handle(&self, _event: &DomainEvent) -> AppResult<()> {
        panic!("listener blew up");
    }
}

struct Failing;

#[async_trait]
impl EventHandler for Failing {
    fn name(&self) -> &'static str {
        "failing"
    }

    async fn handle(&self, _event: &DomainEvent) -> AppResult<()> {
        Err(AppError::Internal("listener failed".to_string()))
    }
}

#[tokio::test]
async fn test_panicking_listener_does_not_break_the_write() {
    let h = Harness::new();
    // Registered last, so the built-in listeners run first
    h.services.events.on(Topic::BookCreated, Arc::new(Exploding));
    h.services.events.on(Topic::BookCreated, Arc::new(Failing));
    let owner = h.user("Uma").await;

    let book = h.create_book(owner.id, "Mind of My Mind").await;

    assert!(h.durable_book(book.id).await.is_some());
    assert!(h.services.read_model.get_book_by_id(book.id).await.is_some());

    // The bus keeps delivering afterwards
    let second = h.create_book(owner.id, "Patternmaster").await;
    assert!(h.services.read_model.get_book_by_id(second.id).await.is_some());
}

#[tokio::test]
async fn test_missing_handler_is_a_configuration_error() {
    let commands = CommandBus::new();
    let err = commands
        .execute(shelfshare_server::cqrs::DeleteBook {
            actor_id: uuid::Uuid::new_v4(),
            book_id: uuid::Uuid::new_v4(),
        })
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Configuration(_)));
    assert!(matches!(commands.verify(), Err(AppError::Configuration(_))));

    let queries = QueryBus::new();
    let err = queries
        .execute(GetBookById {
            book_id: uuid::Uuid::new_v4(),
        })
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Configuration(_)));
}

#[tokio::test]
async fn test_wired_services_cover_every_kind() {
    let h = Harness::new();
    for kind in CommandKind::ALL {
        assert!(h.services.commands.has_handler(kind), "{}", kind.as_str());
    }
    for kind in QueryKind::ALL {
        assert!(h.services.queries.has_handler(kind), "{}", kind.as_str());
    }
}

#[tokio::test]
async fn test_fast_store_outage_degrades_to_durable() {
    let h = Harness::new();
    let owner = h.user("Uma").await;
    let borrower = h.user("Ugo").await;
    h.fast.set_offline(true);

    let book = h.create_book(owner.id, "Bloodchild").await;
    let borrow = h.request(borrower.id, book.id, 7).await.unwrap();
    let accepted = h.accept(owner.id, borrow.id).await.unwrap();
    assert_eq!(accepted.status, BorrowStatus::Accepted);

    let found = h
        .services
        .queries
        .execute(GetBookById { book_id: book.id })
        .await
        .unwrap()
        .into_book()
        .unwrap();
    assert!(!found.available);

    let all = h
        .services
        .queries
        .execute(GetAllBooks::default())
        .await
        .unwrap()
        .into_books()
        .unwrap();
    assert_eq!(all.total, 1);

    let mine = h
        .services
        .queries
        .execute(GetMyBooks::new(owner.id))
        .await
        .unwrap()
        .into_books()
        .unwrap();
    assert_eq!(mine.total, 1);

    let hits = h
        .services
        .queries
        .execute(SearchBooks::new("blood"))
        .await
        .unwrap()
        .into_books()
        .unwrap();
    assert_eq!(hits.total, 1);

    while h.services.read_model.is_rebuilding() {
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }

    // Back online: the projection was never written, so a rebuild fills it
    h.fast.set_offline(false);
    assert_eq!(h.services.initial_sync().await.unwrap(), 1);
    let projected = h.services.read_model.get_all_books(Pagination::new(1, 10)).await.unwrap();
    assert!(!projected.items[0].available);
}

#[tokio::test]
async fn test_detached_delivery_catches_up_after_settle() {
    let h = Harness::with_config(AppConfig::default());
    assert!(!h.services.events.awaits_listeners());
    let owner = h.user("Uma").await;
    let borrower = h.user("Ugo").await;

    let book = h.create_book(owner.id, "Dawn").await;
    h.services.events.settle().await;
    assert!(h.services.read_model.get_book_by_id(book.id).await.is_some());

    // Delete validation still gets its answer in detached mode
    let borrow = h.request(borrower.id, book.id, 7).await.unwrap();
    let err = h
        .services
        .commands
        .execute(shelfshare_server::cqrs::DeleteBook {
            actor_id: owner.id,
            book_id: book.id,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));

    h.accept(owner.id, borrow.id).await.unwrap();
    h.services.events.settle().await;
    assert_eq!(h.services.events.in_flight(), 0);
    let projected = h.services.read_model.get_book_by_id(book.id).await.unwrap();
    assert!(!projected.available);
}

#[tokio::test]
async fn test_reminder_sweep_notifies_borrowers() {
    let h = Harness::new();
    let owner = h.user("Uma").await;
    let borrower = h.user("Ugo").await;
    let book = h.create_book(owner.id, "Imago").await;
    let borrow = h.request(borrower.id, book.id, 2).await.unwrap();
    h.accept(owner.id, borrow.id).await.unwrap();

    let report = h.services.reminders.sweep(Utc::now()).await.unwrap();
    assert_eq!((report.overdue, report.due_soon), (0, 1));

    let later = h.services.reminders.sweep(Utc::now() + Duration::days(3)).await.unwrap();
    assert_eq!((later.overdue, later.due_soon), (1, 0));
}
