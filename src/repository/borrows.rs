//! Borrows repository for database operations

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Pool, Postgres, QueryBuilder};
use uuid::Uuid;

use super::BorrowStore;
use crate::{
    error::{AppError, AppResult},
    models::{Borrow, BorrowFilter, BorrowStatus, BorrowTransition, NewBorrow},
};

#[derive(Clone)]
pub struct BorrowsRepository {
    pool: Pool<Postgres>,
}

impl BorrowsRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    fn push_filter(builder: &mut QueryBuilder<'_, Postgres>, filter: &BorrowFilter) {
        builder.push(" WHERE 1=1");

        if let Some(book_id) = filter.book_id {
            builder.push(" AND book_id = ").push_bind(book_id);
        }
        if let Some(borrower_id) = filter.borrower_id {
            builder.push(" AND borrower_id = ").push_bind(borrower_id);
        }
        if let Some(owner_id) = filter.owner_id {
            builder.push(" AND owner_id = ").push_bind(owner_id);
        }
        if !filter.statuses.is_empty() {
            builder
                .push(" AND status = ANY(")
                .push_bind(filter.status_strings())
                .push(")");
        }
    }
}

#[async_trait]
impl BorrowStore for BorrowsRepository {
    async fn find_by_id(&self, id: Uuid) -> AppResult<Option<Borrow>> {
        let borrow = sqlx::query_as::<_, Borrow>("SELECT * FROM borrows WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(borrow)
    }

    async fn find(&self, filter: &BorrowFilter) -> AppResult<Vec<Borrow>> {
        let mut builder = QueryBuilder::<Postgres>::new("SELECT * FROM borrows");
        Self::push_filter(&mut builder, filter);
        builder.push(" ORDER BY requested_at DESC, id");

        let borrows = builder
            .build_query_as::<Borrow>()
            .fetch_all(&self.pool)
            .await?;

        Ok(borrows)
    }

    async fn count(&self, filter: &BorrowFilter) -> AppResult<u64> {
        let mut builder = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM borrows");
        Self::push_filter(&mut builder, filter);

        let total: i64 = builder.build_query_scalar().fetch_one(&self.pool).await?;
        Ok(total.max(0) as u64)
    }

    async fn create(&self, borrow: NewBorrow) -> AppResult<Borrow> {
        let now = Utc::now();

        let created = sqlx::query_as::<_, Borrow>(
            r#"
            INSERT INTO borrows (
                id, book_id, borrower_id, owner_id, status,
                requested_at, due_date, return_date, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, NULL, $6, $6)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(borrow.book_id)
        .bind(borrow.borrower_id)
        .bind(borrow.owner_id)
        .bind(BorrowStatus::Pending)
        .bind(now)
        .bind(borrow.due_date)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db) if db.is_unique_violation() => AppError::Duplicate(format!(
                "Pending borrow already exists for book {} and borrower {}",
                borrow.book_id, borrow.borrower_id
            )),
            other => AppError::Database(other),
        })?;

        Ok(created)
    }

    async fn transition(&self, id: Uuid, transition: BorrowTransition) -> AppResult<Option<Borrow>> {
        let (stamp, at) = match transition {
            BorrowTransition::Accept => (true, None),
            BorrowTransition::Reject => (false, None),
            BorrowTransition::Return { at } => (true, Some(at)),
        };

        // Status precondition lives in the WHERE clause so a lost race updates nothing
        let updated = sqlx::query_as::<_, Borrow>(
            r#"
            UPDATE borrows SET
                status = $2,
                return_date = CASE WHEN $4::boolean THEN $5::timestamptz ELSE return_date END,
                updated_at = NOW()
            WHERE id = $1 AND status = $3
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(transition.to_status())
        .bind(transition.from_status())
        .bind(stamp)
        .bind(at)
        .fetch_optional(&self.pool)
        .await?;

        Ok(updated)
    }

    async fn delete_if_status(&self, id: Uuid, status: BorrowStatus) -> AppResult<Option<Borrow>> {
        let deleted = sqlx::query_as::<_, Borrow>(
            "DELETE FROM borrows WHERE id = $1 AND status = $2 RETURNING *",
        )
        .bind(id)
        .bind(status)
        .fetch_optional(&self.pool)
        .await?;

        Ok(deleted)
    }

    async fn delete_many(&self, filter: &BorrowFilter) -> AppResult<u64> {
        let mut builder = QueryBuilder::<Postgres>::new("DELETE FROM borrows");
        Self::push_filter(&mut builder, filter);

        let result = builder.build().execute(&self.pool).await?;
        Ok(result.rows_affected())
    }
}
