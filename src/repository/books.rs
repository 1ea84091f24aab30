//! Books repository for database operations

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{FromRow, Pool, Postgres, QueryBuilder};
use uuid::Uuid;

use super::BookStore;
use crate::{
    error::AppResult,
    models::{
        book::BookSortField, Book, BookFilter, BookPatch, BookSort, BookView, NewBook, OwnerInfo,
        Pagination,
    },
};

const VIEW_SELECT: &str = r#"
    SELECT b.*, u.name AS owner_name, u.email AS owner_email
    FROM books b
    LEFT JOIN users u ON u.id = b.owner_id
"#;

/// Book row joined with its owner's name and email
#[derive(FromRow)]
struct BookViewRow {
    #[sqlx(flatten)]
    book: Book,
    owner_name: Option<String>,
    owner_email: Option<String>,
}

impl From<BookViewRow> for BookView {
    fn from(row: BookViewRow) -> Self {
        let owner_id = row.book.owner_id;
        let mut view = BookView::from_parts(row.book, None);
        if let (Some(name), Some(email)) = (row.owner_name, row.owner_email) {
            view.owner = OwnerInfo { id: owner_id, name, email };
        }
        view
    }
}

#[derive(Clone)]
pub struct BooksRepository {
    pool: Pool<Postgres>,
}

impl BooksRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    fn push_filter<'a>(builder: &mut QueryBuilder<'a, Postgres>, filter: &'a BookFilter) {
        builder.push(" WHERE 1=1");

        if let Some(ref q) = filter.q {
            let pattern = format!("%{}%", q.to_lowercase());
            builder
                .push(" AND (LOWER(b.title) LIKE ")
                .push_bind(pattern.clone())
                .push(" OR LOWER(b.description) LIKE ")
                .push_bind(pattern.clone())
                .push(" OR EXISTS (SELECT 1 FROM unnest(b.authors) a WHERE LOWER(a) LIKE ")
                .push_bind(pattern)
                .push("))");
        }

        if let Some(ref authors) = filter.authors {
            builder
                .push(" AND EXISTS (SELECT 1 FROM unnest(b.authors) a WHERE LOWER(a) LIKE ")
                .push_bind(format!("%{}%", authors.to_lowercase()))
                .push(")");
        }

        if let Some(ref category) = filter.category {
            builder.push(" AND ").push_bind(category).push(" = ANY(b.categories)");
        }

        if let Some(available) = filter.available {
            builder.push(" AND b.available = ").push_bind(available);
        }

        if let Some(owner_id) = filter.owner_id {
            builder.push(" AND b.owner_id = ").push_bind(owner_id);
        }
    }
}

#[async_trait]
impl BookStore for BooksRepository {
    async fn find_by_id(&self, id: Uuid) -> AppResult<Option<Book>> {
        let book = sqlx::query_as::<_, Book>("SELECT * FROM books WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(book)
    }

    async fn find_view(&self, id: Uuid) -> AppResult<Option<BookView>> {
        let row = sqlx::query_as::<_, BookViewRow>(&format!("{} WHERE b.id = $1", VIEW_SELECT))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(BookView::from))
    }

    async fn find(
        &self,
        filter: &BookFilter,
        sort: BookSort,
        pagination: Option<Pagination>,
    ) -> AppResult<Vec<BookView>> {
        let mut builder = QueryBuilder::<Postgres>::new(VIEW_SELECT);
        Self::push_filter(&mut builder, filter);

        let column = match sort.field {
            BookSortField::CreatedAt => "b.created_at",
            BookSortField::Title => "LOWER(b.title)",
        };
        builder.push(format!(" ORDER BY {} {}, b.id", column, sort.order_label().to_uppercase()));

        if let Some(pagination) = pagination {
            builder
                .push(" LIMIT ")
                .push_bind(i64::from(pagination.limit))
                .push(" OFFSET ")
                .push_bind(pagination.skip() as i64);
        }

        let rows = builder
            .build_query_as::<BookViewRow>()
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.into_iter().map(BookView::from).collect())
    }

    async fn count(&self, filter: &BookFilter) -> AppResult<u64> {
        let mut builder = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM books b");
        Self::push_filter(&mut builder, filter);

        let total: i64 = builder.build_query_scalar().fetch_one(&self.pool).await?;
        Ok(total.max(0) as u64)
    }

    async fn create(&self, book: NewBook) -> AppResult<Book> {
        let now = Utc::now();

        let created = sqlx::query_as::<_, Book>(
            r#"
            INSERT INTO books (
                id, title, authors, description, thumbnail, owner_id,
                available, categories, google_book_id, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $10)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&book.title)
        .bind(&book.authors)
        .bind(&book.description)
        .bind(&book.thumbnail)
        .bind(book.owner_id)
        .bind(book.available)
        .bind(&book.categories)
        .bind(&book.google_book_id)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        Ok(created)
    }

    async fn update(&self, id: Uuid, patch: &BookPatch) -> AppResult<Option<Book>> {
        let title = patch.title.as_ref().map(|t| t.trim().to_string());
        let authors = patch.authors.as_deref().map(crate::models::book::normalize_list);
        let categories = patch.categories.as_deref().map(crate::models::book::normalize_list);

        let updated = sqlx::query_as::<_, Book>(
            r#"
            UPDATE books SET
                title = COALESCE($2, title),
                authors = COALESCE($3, authors),
                description = COALESCE($4, description),
                thumbnail = COALESCE($5, thumbnail),
                categories = COALESCE($6, categories),
                google_book_id = COALESCE($7, google_book_id),
                available = COALESCE($8, available),
                updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(title)
        .bind(authors)
        .bind(&patch.description)
        .bind(&patch.thumbnail)
        .bind(categories)
        .bind(&patch.google_book_id)
        .bind(patch.available)
        .fetch_optional(&self.pool)
        .await?;

        Ok(updated)
    }

    async fn set_available_if(&self, id: Uuid, expected: bool, available: bool) -> AppResult<Option<Book>> {
        let updated = sqlx::query_as::<_, Book>(
            r#"
            UPDATE books SET available = $3, updated_at = NOW()
            WHERE id = $1 AND available = $2
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(expected)
        .bind(available)
        .fetch_optional(&self.pool)
        .await?;

        Ok(updated)
    }

    async fn delete(&self, id: Uuid) -> AppResult<bool> {
        let result = sqlx::query("DELETE FROM books WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}
