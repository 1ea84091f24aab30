//! Borrow lifecycle scenarios through the command bus

use std::sync::Arc;

use shelfshare_server::{
    cqrs::{CancelBorrow, GetBookById, GetPendingRequests, RejectBorrow, SearchBooks},
    error::AppError,
    models::{BorrowStatus, NotificationKind},
    repository::NotificationStore,
};

use crate::common::Harness;

#[tokio::test]
async fn test_request_accept_return() {
    let h = Harness::new();
    let owner = h.user("Uma").await;
    let borrower = h.user("Ugo").await;
    let book = h.create_book(owner.id, "The Fifth Season").await;

    let pending = h.request(borrower.id, book.id, 7).await.unwrap();
    assert_eq!(pending.status, BorrowStatus::Pending);
    assert!(h.durable_book(book.id).await.unwrap().available);

    let accepted = h.accept(owner.id, pending.id).await.unwrap();
    assert_eq!(accepted.status, BorrowStatus::Accepted);
    assert!(!h.durable_book(book.id).await.unwrap().available);

    // Projection follows the availability change
    let projected = h.services.read_model.get_book_by_id(book.id).await.unwrap();
    assert!(!projected.available);

    let returned = h.return_borrow(borrower.id, pending.id).await.unwrap();
    assert_eq!(returned.status, BorrowStatus::Returned);
    assert!(returned.return_date.is_some());
    assert!(h.durable_book(book.id).await.unwrap().available);

    let projected = h.services.read_model.get_book_by_id(book.id).await.unwrap();
    assert!(projected.available);

    let to_owner = h.store.find_for_user(owner.id).await.unwrap();
    assert!(to_owner.iter().any(|n| n.kind == NotificationKind::BorrowRequestNew));
    assert!(to_owner.iter().any(|n| n.kind == NotificationKind::BookReturned));
    let to_borrower = h.store.find_for_user(borrower.id).await.unwrap();
    assert!(to_borrower.iter().any(|n| n.kind == NotificationKind::BorrowRequestAccepted));

    assert_eq!(
        h.mailer.recipients(),
        vec!["uma@example.com".to_string(), "ugo@example.com".to_string()]
    );
}

#[tokio::test]
async fn test_second_pending_request_conflicts() {
    let h = Harness::new();
    let owner = h.user("Uma").await;
    let borrower = h.user("Ugo").await;
    let book = h.create_book(owner.id, "The Obelisk Gate").await;

    h.request(borrower.id, book.id, 7).await.unwrap();
    let err = h.request(borrower.id, book.id, 7).await.unwrap_err();
    assert!(matches!(err, AppError::Conflict(ref m) if m.contains("already pending")));
    assert_eq!(h.store.all_borrows().await.len(), 1);
}

#[tokio::test]
async fn test_concurrent_requests_create_one_pending() {
    let h = Arc::new(Harness::new());
    let owner = h.user("Uma").await;
    let borrower = h.user("Ugo").await;
    let book = h.create_book(owner.id, "The Stone Sky").await;

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let h = h.clone();
        tasks.push(tokio::spawn(async move { h.request(borrower.id, book.id, 7).await }));
    }
    let mut created = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(_) => created += 1,
            Err(AppError::Conflict(_)) => {}
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    assert_eq!(created, 1);
    let pending: Vec<_> = h
        .store
        .all_borrows()
        .await
        .into_iter()
        .filter(|b| b.status == BorrowStatus::Pending)
        .collect();
    assert_eq!(pending.len(), 1);
}

#[tokio::test]
async fn test_non_owner_accept_is_refused() {
    let h = Harness::new();
    let owner = h.user("Uma").await;
    let borrower = h.user("Ugo").await;
    let stranger = h.user("Ula").await;
    let book = h.create_book(owner.id, "Broken Earth").await;
    let pending = h.request(borrower.id, book.id, 7).await.unwrap();

    let err = h.accept(stranger.id, pending.id).await.unwrap_err();
    assert!(matches!(err, AppError::Authorization(_)));

    let stored = h.store.all_borrows().await;
    assert_eq!(stored[0].status, BorrowStatus::Pending);
    assert!(h.durable_book(book.id).await.unwrap().available);
}

#[tokio::test]
async fn test_second_accept_for_same_book_conflicts() {
    let h = Harness::new();
    let owner = h.user("Uma").await;
    let first = h.user("Ugo").await;
    let second = h.user("Uri").await;
    let book = h.create_book(owner.id, "Dawn").await;

    let a = h.request(first.id, book.id, 7).await.unwrap();
    let b = h.request(second.id, book.id, 7).await.unwrap();

    h.accept(owner.id, a.id).await.unwrap();
    let err = h.accept(owner.id, b.id).await.unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));

    let borrows = h.store.all_borrows().await;
    let accepted = borrows.iter().filter(|x| x.status == BorrowStatus::Accepted).count();
    assert_eq!(accepted, 1);
    let still_pending = borrows.iter().find(|x| x.id == b.id).unwrap();
    assert_eq!(still_pending.status, BorrowStatus::Pending);
}

#[tokio::test]
async fn test_illegal_transitions_leave_state_unchanged() {
    let h = Harness::new();
    let owner = h.user("Uma").await;
    let borrower = h.user("Ugo").await;
    let book = h.create_book(owner.id, "Imago").await;
    let pending = h.request(borrower.id, book.id, 7).await.unwrap();

    // Return before acceptance
    let err = h.return_borrow(borrower.id, pending.id).await.unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));

    h.services
        .commands
        .execute(RejectBorrow {
            actor_id: owner.id,
            borrow_id: pending.id,
            reason: Some("Lent to a friend".to_string()),
        })
        .await
        .unwrap();

    // Accept after rejection
    let err = h.accept(owner.id, pending.id).await.unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));
    assert_eq!(h.store.all_borrows().await[0].status, BorrowStatus::Rejected);
    assert!(h.durable_book(book.id).await.unwrap().available);
}

#[tokio::test]
async fn test_cancel_removes_request_and_notifies_owner() {
    let h = Harness::new();
    let owner = h.user("Uma").await;
    let borrower = h.user("Ugo").await;
    let book = h.create_book(owner.id, "Adulthood Rites").await;
    let pending = h.request(borrower.id, book.id, 7).await.unwrap();

    // Warm the owner's pending list so cancellation has something to invalidate
    let listed = h
        .services
        .queries
        .execute(GetPendingRequests { actor_id: owner.id })
        .await
        .unwrap()
        .into_borrows()
        .unwrap();
    assert_eq!(listed.len(), 1);

    let err = h
        .services
        .commands
        .execute(CancelBorrow {
            actor_id: owner.id,
            borrow_id: pending.id,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Authorization(_)));

    let cancelled = h
        .services
        .commands
        .execute(CancelBorrow {
            actor_id: borrower.id,
            borrow_id: pending.id,
        })
        .await
        .unwrap()
        .into_deleted()
        .unwrap();
    assert_eq!(cancelled, pending.id);
    assert!(h.store.all_borrows().await.is_empty());

    let to_owner = h.store.find_for_user(owner.id).await.unwrap();
    assert!(to_owner.iter().any(|n| n.kind == NotificationKind::BorrowRequestCancelled));
    // The "new request" notice pointed at the borrow and goes with it
    assert!(!to_owner.iter().any(|n| n.kind == NotificationKind::BorrowRequestNew));

    let listed = h
        .services
        .queries
        .execute(GetPendingRequests { actor_id: owner.id })
        .await
        .unwrap()
        .into_borrows()
        .unwrap();
    assert!(listed.is_empty());

    let still_there = h
        .services
        .queries
        .execute(GetBookById { book_id: book.id })
        .await
        .unwrap()
        .into_book()
        .unwrap();
    assert!(still_there.available);
}

#[tokio::test]
async fn test_own_book_cannot_be_borrowed() {
    let h = Harness::new();
    let owner = h.user("Uma").await;
    let book = h.create_book(owner.id, "Wild Seed").await;

    let err = h.request(owner.id, book.id, 7).await.unwrap_err();
    assert!(matches!(err, AppError::Authorization(_)));
}

#[tokio::test]
async fn test_non_owner_reject_is_refused() {
    let h = Harness::new();
    let owner = h.user("Uma").await;
    let borrower = h.user("Ugo").await;
    let book = h.create_book(owner.id, "Parable of the Sower").await;
    let pending = h.request(borrower.id, book.id, 7).await.unwrap();

    let err = h
        .services
        .commands
        .execute(RejectBorrow {
            actor_id: borrower.id,
            borrow_id: pending.id,
            reason: None,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Authorization(_)));
    assert_eq!(h.store.all_borrows().await[0].status, BorrowStatus::Pending);
}

#[tokio::test]
async fn test_non_borrower_return_is_refused() {
    let h = Harness::new();
    let owner = h.user("Uma").await;
    let borrower = h.user("Ugo").await;
    let book = h.create_book(owner.id, "Parable of the Talents").await;
    let pending = h.request(borrower.id, book.id, 7).await.unwrap();
    h.accept(owner.id, pending.id).await.unwrap();

    let err = h.return_borrow(owner.id, pending.id).await.unwrap_err();
    assert!(matches!(err, AppError::Authorization(_)));

    let stored = h.store.all_borrows().await;
    assert_eq!(stored[0].status, BorrowStatus::Accepted);
    assert!(stored[0].return_date.is_none());
    assert!(!h.durable_book(book.id).await.unwrap().available);
}

#[tokio::test]
async fn test_accepted_borrow_cannot_be_cancelled_or_rejected() {
    let h = Harness::new();
    let owner = h.user("Uma").await;
    let borrower = h.user("Ugo").await;
    let book = h.create_book(owner.id, "Fledgling").await;
    let pending = h.request(borrower.id, book.id, 7).await.unwrap();
    h.accept(owner.id, pending.id).await.unwrap();

    let err = h
        .services
        .commands
        .execute(CancelBorrow {
            actor_id: borrower.id,
            borrow_id: pending.id,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));

    let err = h
        .services
        .commands
        .execute(RejectBorrow {
            actor_id: owner.id,
            borrow_id: pending.id,
            reason: None,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));

    let stored = h.store.all_borrows().await;
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].status, BorrowStatus::Accepted);
    assert!(!h.durable_book(book.id).await.unwrap().available);
}

#[tokio::test]
async fn test_search_reflects_availability_after_accept() {
    let h = Harness::new();
    let owner = h.user("Uma").await;
    let borrower = h.user("Ugo").await;
    let book = h.create_book(owner.id, "Kindred").await;

    let before = h
        .services
        .queries
        .execute(SearchBooks::new("kindred"))
        .await
        .unwrap()
        .into_books()
        .unwrap();
    assert!(before.items[0].available);

    let pending = h.request(borrower.id, book.id, 7).await.unwrap();
    h.accept(owner.id, pending.id).await.unwrap();

    let by_id = h
        .services
        .queries
        .execute(GetBookById { book_id: book.id })
        .await
        .unwrap()
        .into_book()
        .unwrap();
    let found = h
        .services
        .queries
        .execute(SearchBooks::new("kindred"))
        .await
        .unwrap()
        .into_books()
        .unwrap();
    assert!(!by_id.available);
    assert_eq!(found.items.len(), 1);
    assert_eq!(found.items[0].available, by_id.available);
}
