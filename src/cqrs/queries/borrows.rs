//! Borrow read handlers, served through the query-result cache

use async_trait::async_trait;
use validator::Validate;

use super::{GetActiveBorrows, GetBorrowById, GetBorrowerRequests, GetPendingRequests};
use crate::{
    config::CacheConfig,
    cqrs::{misrouted, Query, QueryHandler, QueryOutcome},
    error::{AppError, AppResult},
    models::{Borrow, BorrowFilter, BorrowStatus},
    repository::Repository,
    services::cache::{keys, QueryCache},
};

pub struct BorrowQueryHandler {
    repository: Repository,
    cache: QueryCache,
    config: CacheConfig,
}

impl BorrowQueryHandler {
    pub fn new(repository: Repository, cache: QueryCache, config: CacheConfig) -> Self {
        Self {
            repository,
            cache,
            config,
        }
    }

    async fn get_borrow_by_id(&self, query: GetBorrowById) -> AppResult<Borrow> {
        query.validate()?;

        let borrow = self
            .cache
            .get_or_set_json(&keys::borrow(query.borrow_id), self.config.borrow_ttl_secs, || async {
                self.repository
                    .borrows
                    .find_by_id(query.borrow_id)
                    .await?
                    .ok_or_else(|| AppError::NotFound(format!("Borrow {} not found", query.borrow_id)))
            })
            .await?;

        if !borrow.involves(query.actor_id) {
            return Err(AppError::Authorization(
                "Only the borrower or the owner can view this borrow".to_string(),
            ));
        }
        Ok(borrow)
    }

    async fn list(&self, key: String, filter: BorrowFilter) -> AppResult<Vec<Borrow>> {
        self.cache
            .get_or_set_json(&key, self.config.borrow_list_ttl_secs, || {
                self.repository.borrows.find(&filter)
            })
            .await
    }

    async fn get_borrower_requests(&self, query: GetBorrowerRequests) -> AppResult<Vec<Borrow>> {
        query.validate()?;
        let filter = BorrowFilter {
            borrower_id: Some(query.actor_id),
            ..Default::default()
        };
        self.list(keys::borrower_requests(query.actor_id), filter).await
    }

    async fn get_active_borrows(&self, query: GetActiveBorrows) -> AppResult<Vec<Borrow>> {
        query.validate()?;
        let filter = BorrowFilter {
            borrower_id: Some(query.actor_id),
            statuses: vec![BorrowStatus::Accepted],
            ..Default::default()
        };
        self.list(keys::borrower_accepted(query.actor_id), filter).await
    }

    async fn get_pending_requests(&self, query: GetPendingRequests) -> AppResult<Vec<Borrow>> {
        query.validate()?;
        let filter = BorrowFilter {
            owner_id: Some(query.actor_id),
            statuses: vec![BorrowStatus::Pending],
            ..Default::default()
        };
        self.list(keys::owner_pending(query.actor_id), filter).await
    }
}

#[async_trait]
impl QueryHandler for BorrowQueryHandler {
    async fn handle(&self, query: Query) -> AppResult<QueryOutcome> {
        match query {
            Query::GetBorrowById(q) => self.get_borrow_by_id(q).await.map(QueryOutcome::Borrow),
            Query::GetBorrowerRequests(q) => self.get_borrower_requests(q).await.map(QueryOutcome::Borrows),
            Query::GetActiveBorrows(q) => self.get_active_borrows(q).await.map(QueryOutcome::Borrows),
            Query::GetPendingRequests(q) => self.get_pending_requests(q).await.map(QueryOutcome::Borrows),
            other => Err(misrouted("BorrowQueryHandler", other.kind().as_str())),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{Duration, Utc};
    use uuid::Uuid;

    use super::*;
    use crate::models::{NewBook, NewBorrow};
    use crate::repository::{BookStore, BorrowStore, MemoryStore};
    use crate::services::fast_store::MemoryFastStore;

    async fn pending_borrow(store: &MemoryStore) -> Borrow {
        let owner = store.insert_user("Olive", "olive@example.com").await;
        let borrower = store.insert_user("Bram", "bram@example.com").await;
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
        BorrowStore::create(
            store,
            NewBorrow {
                book_id: book.id,
                borrower_id: borrower.id,
                owner_id: owner.id,
                due_date: Utc::now() + Duration::days(14),
            },
        )
        .await
        .unwrap()
    }

    fn handler(store: &MemoryStore, fast: &MemoryFastStore) -> BorrowQueryHandler {
        BorrowQueryHandler::new(
            Repository::in_memory(store.clone()),
            QueryCache::new(Arc::new(fast.clone()), true),
            CacheConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_borrow_visible_only_to_participants() {
        let store = MemoryStore::new();
        let fast = MemoryFastStore::new();
        let borrow = pending_borrow(&store).await;
        let handler = handler(&store, &fast);

        let seen = handler
            .get_borrow_by_id(GetBorrowById {
                actor_id: borrow.owner_id,
                borrow_id: borrow.id,
            })
            .await
            .unwrap();
        assert_eq!(seen.id, borrow.id);

        let err = handler
            .get_borrow_by_id(GetBorrowById {
                actor_id: Uuid::new_v4(),
                borrow_id: borrow.id,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Authorization(_)));
    }

    #[tokio::test]
    async fn test_pending_list_is_cached() {
        let store = MemoryStore::new();
        let fast = MemoryFastStore::new();
        let borrow = pending_borrow(&store).await;
        let handler = handler(&store, &fast);

        let pending = handler
            .get_pending_requests(GetPendingRequests { actor_id: borrow.owner_id })
            .await
            .unwrap();
        assert_eq!(pending, vec![borrow.clone()]);
        assert!(fast.snapshot().await.contains_key(&keys::owner_pending(borrow.owner_id)));

        let active = handler
            .get_active_borrows(GetActiveBorrows { actor_id: borrow.borrower_id })
            .await
            .unwrap();
        assert!(active.is_empty());
    }

    #[tokio::test]
    async fn test_missing_borrow_is_not_cached() {
        let store = MemoryStore::new();
        let fast = MemoryFastStore::new();
        let handler = handler(&store, &fast);
        let id = Uuid::new_v4();

        let err = handler
            .get_borrow_by_id(GetBorrowById {
                actor_id: Uuid::new_v4(),
                borrow_id: id,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
        assert!(fast.snapshot().await.is_empty());
    }
}
