//! Book writes, delete validation and projection upkeep

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use shelfshare_server::{
    config::{AppConfig, DeleteValidationPolicy},
    cqrs::{
        commands::BookCommandHandler, Command, CommandHandler, DeleteBook, GetAllBooks, GetMyBooks,
        SearchBooks, UpdateBook,
    },
    error::{AppError, AppResult},
    events::EventBus,
    models::{BorrowStatus, NewBook, NewBorrow, Pagination},
    repository::{BookStore, BorrowStore, MemoryStore, Repository},
    services::{
        assets::AssetStore,
        cache::{keys, QueryCache},
        fast_store::MemoryFastStore,
        read_model::book_key,
    },
};

use crate::common::Harness;

#[derive(Default)]
struct RecordingAssets {
    deleted: Mutex<Vec<String>>,
}

#[async_trait]
impl AssetStore for RecordingAssets {
    async fn delete(&self, reference: &str) -> AppResult<()> {
        self.deleted.lock().unwrap().push(reference.to_string());
        Ok(())
    }
}

async fn delete(h: &Harness, actor: Uuid, book: Uuid) -> AppResult<Uuid> {
    h.services
        .commands
        .execute(DeleteBook {
            actor_id: actor,
            book_id: book,
        })
        .await?
        .into_deleted()
}

#[tokio::test]
async fn test_delete_blocked_by_accepted_borrow_until_returned() {
    let h = Harness::new();
    let owner = h.user("Uma").await;
    let borrower = h.user("Ugo").await;
    let book = h.create_book(owner.id, "Lilith's Brood").await;
    let borrow = h.request(borrower.id, book.id, 7).await.unwrap();
    h.accept(owner.id, borrow.id).await.unwrap();

    let err = delete(&h, owner.id, book.id).await.unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));
    assert!(h.durable_book(book.id).await.is_some());

    h.return_borrow(borrower.id, borrow.id).await.unwrap();
    assert_eq!(delete(&h, owner.id, book.id).await.unwrap(), book.id);

    assert!(h.durable_book(book.id).await.is_none());
    assert!(h.services.read_model.get_book_by_id(book.id).await.is_none());
    assert!(h.store.all_borrows().await.is_empty());
}

#[tokio::test]
async fn test_pending_borrow_also_blocks_delete() {
    let h = Harness::new();
    let owner = h.user("Uma").await;
    let borrower = h.user("Ugo").await;
    let book = h.create_book(owner.id, "Clay's Ark").await;
    h.request(borrower.id, book.id, 7).await.unwrap();

    let err = delete(&h, owner.id, book.id).await.unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));
}

#[tokio::test]
async fn test_only_owner_may_delete() {
    let h = Harness::new();
    let owner = h.user("Uma").await;
    let other = h.user("Ugo").await;
    let book = h.create_book(owner.id, "Survivor").await;

    let err = delete(&h, other.id, book.id).await.unwrap_err();
    assert!(matches!(err, AppError::Authorization(_)));
}

#[tokio::test]
async fn test_delete_removes_thumbnail() {
    let mut config = AppConfig::default();
    config.events.await_listeners = true;
    let assets = Arc::new(RecordingAssets::default());
    let h = Harness::with_assets(config, assets.clone());
    let owner = h.user("Uma").await;

    let url = "https://res.cloudinary.com/demo/image/upload/v1712/books/cover.jpg";
    let book = h
        .services
        .commands
        .execute(shelfshare_server::cqrs::CreateBook {
            actor_id: owner.id,
            title: "Patternmaster".to_string(),
            authors: vec!["Octavia E. Butler".to_string()],
            description: String::new(),
            thumbnail: url.to_string(),
            categories: vec![],
            google_book_id: None,
        })
        .await
        .unwrap()
        .into_book()
        .unwrap();

    delete(&h, owner.id, book.id).await.unwrap();
    assert_eq!(*assets.deleted.lock().unwrap(), vec![url.to_string()]);
}

/// Book handler on a bus with nobody answering the active-borrow check
async fn unanswered(policy: DeleteValidationPolicy) -> (BookCommandHandler, MemoryStore, Uuid, Uuid) {
    let store = MemoryStore::new();
    let owner = store.insert_user("Uma", "uma@example.com").await;
    let book = BookStore::create(
        &store,
        NewBook {
            title: "Mind of My Mind".to_string(),
            authors: vec!["Octavia E. Butler".to_string()],
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

    let fast = MemoryFastStore::new();
    let handler = BookCommandHandler::new(
        Repository::in_memory(store.clone()),
        EventBus::new(true),
        QueryCache::new(Arc::new(fast), true),
        Arc::new(shelfshare_server::services::assets::NoAssets),
        Duration::from_millis(30),
        policy,
    );
    (handler, store, owner.id, book.id)
}

#[tokio::test]
async fn test_delete_fails_open_when_check_times_out() {
    let (handler, store, owner, book) = unanswered(DeleteValidationPolicy::FailOpen).await;

    // An active borrow the unanswered check never learns about
    BorrowStore::create(
        &store,
        NewBorrow {
            book_id: book,
            borrower_id: Uuid::new_v4(),
            owner_id: owner,
            due_date: chrono::Utc::now() + chrono::Duration::days(7),
        },
    )
    .await
    .unwrap();

    let deleted = handler
        .handle(Command::DeleteBook(DeleteBook {
            actor_id: owner,
            book_id: book,
        }))
        .await
        .unwrap()
        .into_deleted()
        .unwrap();
    assert_eq!(deleted, book);
    assert!(store.all_books().await.is_empty());
}

#[tokio::test]
async fn test_delete_fails_closed_when_check_times_out() {
    let (handler, store, owner, book) = unanswered(DeleteValidationPolicy::FailClosed).await;

    let err = handler
        .handle(Command::DeleteBook(DeleteBook {
            actor_id: owner,
            book_id: book,
        }))
        .await
        .unwrap_err();
    assert!(err.is_infrastructure());
    assert_eq!(store.all_books().await.len(), 1);
}

#[tokio::test]
async fn test_update_refreshes_projection_and_caches() {
    let h = Harness::new();
    let owner = h.user("Uma").await;
    let book = h.create_book(owner.id, "Kindred").await;

    // Warm a filtered listing and a search
    let filtered = GetAllBooks {
        category: Some("Fantasy".to_string()),
        ..Default::default()
    };
    h.services.queries.execute(filtered.clone()).await.unwrap();
    h.services.queries.execute(SearchBooks::new("kindred")).await.unwrap();
    assert!(h.fast.snapshot().await.keys().any(|k| k.starts_with("books:page:")));

    h.services
        .commands
        .execute(UpdateBook {
            actor_id: owner.id,
            book_id: book.id,
            title: Some("Kindred (Graphic Novel)".to_string()),
            ..Default::default()
        })
        .await
        .unwrap();

    let snapshot = h.fast.snapshot().await;
    assert!(!snapshot.keys().any(|k| k.starts_with("books:page:") || k.starts_with("search:")));
    let projected = h.services.read_model.get_book_by_id(book.id).await.unwrap();
    assert_eq!(projected.title, "Kindred (Graphic Novel)");

    let page = h
        .services
        .queries
        .execute(filtered)
        .await
        .unwrap()
        .into_books()
        .unwrap();
    assert_eq!(page.items[0].title, "Kindred (Graphic Novel)");
}

#[tokio::test]
async fn test_content_update_by_non_owner_is_refused() {
    let h = Harness::new();
    let owner = h.user("Uma").await;
    let other = h.user("Ugo").await;
    let book = h.create_book(owner.id, "Fledgling").await;

    let err = h
        .services
        .commands
        .execute(UpdateBook {
            actor_id: other.id,
            book_id: book.id,
            description: Some("Vandalized".to_string()),
            ..Default::default()
        })
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Authorization(_)));
}

#[tokio::test]
async fn test_listing_falls_back_then_projection_is_rebuilt() {
    let h = Harness::new();
    let owner = h.user("Uma").await;
    let first = h.create_book(owner.id, "Bloodchild").await;
    tokio::time::sleep(Duration::from_millis(5)).await;
    let second = h.create_book(owner.id, "Unexpected Stories").await;

    // Lose the projection entirely
    for key in h.fast.snapshot().await.into_keys() {
        h.fast.evict(&key).await;
    }
    assert!(h.services.read_model.get_all_books(Pagination::new(1, 20)).await.is_none());

    let page = h
        .services
        .queries
        .execute(GetAllBooks::default())
        .await
        .unwrap()
        .into_books()
        .unwrap();
    assert_eq!(page.total, 2);
    assert_eq!(page.items[0].id, second.id);

    for _ in 0..100 {
        if !h.services.read_model.is_rebuilding() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    let rebuilt = h.services.read_model.get_all_books(Pagination::new(1, 20)).await.unwrap();
    let ids: Vec<Uuid> = rebuilt.items.iter().map(|b| b.id).collect();
    assert_eq!(ids, vec![second.id, first.id]);
}

#[tokio::test]
async fn test_my_books_reindexes_owner_after_miss() {
    let h = Harness::new();
    let owner = h.user("Uma").await;
    let book = h.create_book(owner.id, "Parable of the Talents").await;
    h.fast.evict(&book_key(book.id)).await;

    let page = h
        .services
        .queries
        .execute(GetMyBooks::new(owner.id))
        .await
        .unwrap()
        .into_books()
        .unwrap();
    assert_eq!(page.items.len(), 1);

    for _ in 0..100 {
        if h.services.read_model.get_book_by_id(book.id).await.is_some() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("owner books were not re-indexed");
}

#[tokio::test]
async fn test_rebuild_twice_gives_identical_projection() {
    let h = Harness::new();
    let owner = h.user("Uma").await;
    h.create_book(owner.id, "Xenogenesis").await;
    h.create_book(owner.id, "Seed to Harvest").await;

    assert_eq!(h.services.initial_sync().await.unwrap(), 2);
    let once = h.fast.snapshot().await;
    assert_eq!(h.services.initial_sync().await.unwrap(), 2);
    let twice = h.fast.snapshot().await;

    let projection = |s: &std::collections::BTreeMap<String, String>| {
        s.iter()
            .filter(|(k, _)| k.starts_with("readmodel:"))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect::<Vec<_>>()
    };
    assert_eq!(projection(&once), projection(&twice));
    assert!(once.contains_key("readmodel:books:all"));
}

#[tokio::test]
async fn test_book_deletion_drops_history_and_cached_entity() {
    let h = Harness::new();
    let owner = h.user("Uma").await;
    let borrower = h.user("Ugo").await;
    let book = h.create_book(owner.id, "Wild Seed").await;
    let borrow = h.request(borrower.id, book.id, 7).await.unwrap();
    h.accept(owner.id, borrow.id).await.unwrap();
    h.return_borrow(borrower.id, borrow.id).await.unwrap();

    h.services
        .cache
        .set_json(&keys::book(book.id), &book, 60)
        .await;

    delete(&h, owner.id, book.id).await.unwrap();

    assert!(!h.fast.snapshot().await.contains_key(&keys::book(book.id)));
    let left: Vec<_> = h
        .store
        .all_borrows()
        .await
        .into_iter()
        .filter(|b| b.status == BorrowStatus::Returned)
        .collect();
    assert!(left.is_empty());
}

#[tokio::test]
async fn test_availability_only_update_is_open_to_any_actor() {
    let h = Harness::new();
    let owner = h.user("Uma").await;
    let other = h.user("Ugo").await;
    let book = h.create_book(owner.id, "Seed to Harvest").await;

    let updated = h
        .services
        .commands
        .execute(UpdateBook {
            actor_id: other.id,
            book_id: book.id,
            available: Some(false),
            ..Default::default()
        })
        .await
        .unwrap()
        .into_book()
        .unwrap();
    assert!(!updated.available);
    assert_eq!(updated.title, "Seed to Harvest");
    assert!(!h.durable_book(book.id).await.unwrap().available);
}
