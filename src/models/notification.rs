//! In-app notification model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Decode, Encode, FromRow, Postgres};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    BorrowRequestNew,
    BorrowRequestAccepted,
    BorrowRequestRejected,
    BorrowRequestCancelled,
    BorrowDueSoon,
    BorrowOverdue,
    BookReturned,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::BorrowRequestNew => "borrow_request_new",
            NotificationKind::BorrowRequestAccepted => "borrow_request_accepted",
            NotificationKind::BorrowRequestRejected => "borrow_request_rejected",
            NotificationKind::BorrowRequestCancelled => "borrow_request_cancelled",
            NotificationKind::BorrowDueSoon => "borrow_due_soon",
            NotificationKind::BorrowOverdue => "borrow_overdue",
            NotificationKind::BookReturned => "book_returned",
        }
    }

    /// Default title shown when the producer did not supply one
    pub fn title(&self) -> &'static str {
        match self {
            NotificationKind::BorrowRequestNew => "New borrow request",
            NotificationKind::BorrowRequestAccepted => "Borrow request accepted",
            NotificationKind::BorrowRequestRejected => "Borrow request rejected",
            NotificationKind::BorrowRequestCancelled => "Borrow request cancelled",
            NotificationKind::BorrowDueSoon => "Book due soon",
            NotificationKind::BorrowOverdue => "Book overdue",
            NotificationKind::BookReturned => "Book returned",
        }
    }
}

impl std::str::FromStr for NotificationKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "borrow_request_new" => Ok(NotificationKind::BorrowRequestNew),
            "borrow_request_accepted" => Ok(NotificationKind::BorrowRequestAccepted),
            "borrow_request_rejected" => Ok(NotificationKind::BorrowRequestRejected),
            "borrow_request_cancelled" => Ok(NotificationKind::BorrowRequestCancelled),
            "borrow_due_soon" => Ok(NotificationKind::BorrowDueSoon),
            "borrow_overdue" => Ok(NotificationKind::BorrowOverdue),
            "book_returned" => Ok(NotificationKind::BookReturned),
            _ => Err(format!("Invalid notification kind: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelatedModel {
    Borrow,
    Book,
}

impl RelatedModel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelatedModel::Borrow => "borrow",
            RelatedModel::Book => "book",
        }
    }
}

impl std::str::FromStr for RelatedModel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "borrow" => Ok(RelatedModel::Borrow),
            "book" => Ok(RelatedModel::Book),
            _ => Err(format!("Invalid related model: {}", s)),
        }
    }
}

macro_rules! text_column {
    ($ty:ty) => {
        impl sqlx::Type<Postgres> for $ty {
            fn type_info() -> sqlx::postgres::PgTypeInfo {
                <String as sqlx::Type<Postgres>>::type_info()
            }
        }

        impl<'r> Decode<'r, Postgres> for $ty {
            fn decode(
                value: sqlx::postgres::PgValueRef<'r>,
            ) -> Result<Self, sqlx::error::BoxDynError> {
                let s: String = Decode::<Postgres>::decode(value)?;
                s.parse().map_err(|e: String| e.into())
            }
        }

        impl Encode<'_, Postgres> for $ty {
            fn encode_by_ref(
                &self,
                buf: &mut sqlx::postgres::PgArgumentBuffer,
            ) -> sqlx::encode::IsNull {
                <&str as Encode<Postgres>>::encode(self.as_str(), buf)
            }
        }
    };
}

text_column!(NotificationKind);
text_column!(RelatedModel);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Notification {
    pub id: Uuid,
    pub user_id: Uuid,
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    pub read: bool,
    pub related_id: Option<Uuid>,
    pub related_model: RelatedModel,
    pub book_title: Option<String>,
    pub sender_name: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewNotification {
    pub user_id: Uuid,
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    pub related_id: Option<Uuid>,
    pub related_model: RelatedModel,
    pub book_title: Option<String>,
    pub sender_name: Option<String>,
}

impl NewNotification {
    /// Notification about a borrow, titled after its kind
    pub fn for_borrow(user_id: Uuid, kind: NotificationKind, borrow_id: Uuid, message: impl Into<String>) -> Self {
        Self {
            user_id,
            kind,
            title: kind.title().to_string(),
            message: message.into(),
            related_id: Some(borrow_id),
            related_model: RelatedModel::Borrow,
            book_title: None,
            sender_name: None,
        }
    }

    pub fn with_book_title(mut self, title: Option<String>) -> Self {
        self.book_title = title;
        self
    }

    pub fn with_sender(mut self, name: Option<String>) -> Self {
        self.sender_name = name;
        self
    }
}
