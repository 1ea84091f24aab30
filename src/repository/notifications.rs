//! Notifications repository for database operations

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Pool, Postgres};
use uuid::Uuid;

use super::NotificationStore;
use crate::{
    error::AppResult,
    models::{NewNotification, Notification, RelatedModel},
};

#[derive(Clone)]
pub struct NotificationsRepository {
    pool: Pool<Postgres>,
}

impl NotificationsRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl NotificationStore for NotificationsRepository {
    async fn create(&self, notification: NewNotification) -> AppResult<Notification> {
        let created = sqlx::query_as::<_, Notification>(
            r#"
            INSERT INTO notifications (
                id, user_id, kind, title, message, read,
                related_id, related_model, book_title, sender_name, created_at
            )
            VALUES ($1, $2, $3, $4, $5, FALSE, $6, $7, $8, $9, $10)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(notification.user_id)
        .bind(notification.kind)
        .bind(&notification.title)
        .bind(&notification.message)
        .bind(notification.related_id)
        .bind(notification.related_model)
        .bind(&notification.book_title)
        .bind(&notification.sender_name)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await?;

        Ok(created)
    }

    async fn find_for_user(&self, user_id: Uuid) -> AppResult<Vec<Notification>> {
        let notifications = sqlx::query_as::<_, Notification>(
            "SELECT * FROM notifications WHERE user_id = $1 ORDER BY created_at DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(notifications)
    }

    async fn delete_related(&self, related_id: Uuid, model: RelatedModel) -> AppResult<u64> {
        let result = sqlx::query("DELETE FROM notifications WHERE related_id = $1 AND related_model = $2")
            .bind(related_id)
            .bind(model)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}
