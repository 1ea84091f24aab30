//! Borrow (loan request) model and the lifecycle it follows

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Decode, Encode, FromRow, Postgres};
use uuid::Uuid;

/// Borrow lifecycle status.
///
/// `Pending -> Accepted | Rejected`, `Accepted -> Returned`. `Rejected` and
/// `Returned` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BorrowStatus {
    Pending,
    Accepted,
    Rejected,
    Returned,
}

impl BorrowStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BorrowStatus::Pending => "pending",
            BorrowStatus::Accepted => "accepted",
            BorrowStatus::Rejected => "rejected",
            BorrowStatus::Returned => "returned",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, BorrowStatus::Rejected | BorrowStatus::Returned)
    }

    /// Statuses that block deleting the book
    pub fn is_active(&self) -> bool {
        matches!(self, BorrowStatus::Pending | BorrowStatus::Accepted)
    }

    pub fn can_transition_to(&self, next: BorrowStatus) -> bool {
        matches!(
            (self, next),
            (BorrowStatus::Pending, BorrowStatus::Accepted)
                | (BorrowStatus::Pending, BorrowStatus::Rejected)
                | (BorrowStatus::Accepted, BorrowStatus::Returned)
        )
    }
}

impl std::fmt::Display for BorrowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for BorrowStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(BorrowStatus::Pending),
            "accepted" => Ok(BorrowStatus::Accepted),
            "rejected" => Ok(BorrowStatus::Rejected),
            "returned" => Ok(BorrowStatus::Returned),
            _ => Err(format!("Invalid borrow status: {}", s)),
        }
    }
}

// SQLx conversion for BorrowStatus (stored as TEXT)
impl sqlx::Type<Postgres> for BorrowStatus {
    fn type_info() -> sqlx::postgres::PgTypeInfo {
        <String as sqlx::Type<Postgres>>::type_info()
    }
}

impl<'r> Decode<'r, Postgres> for BorrowStatus {
    fn decode(value: sqlx::postgres::PgValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s: String = Decode::<Postgres>::decode(value)?;
        s.parse().map_err(|e: String| e.into())
    }
}

impl Encode<'_, Postgres> for BorrowStatus {
    fn encode_by_ref(&self, buf: &mut sqlx::postgres::PgArgumentBuffer) -> sqlx::encode::IsNull {
        <&str as Encode<Postgres>>::encode(self.as_str(), buf)
    }
}

/// Borrow record from the durable store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Borrow {
    pub id: Uuid,
    pub book_id: Uuid,
    pub borrower_id: Uuid,
    pub owner_id: Uuid,
    pub status: BorrowStatus,
    pub requested_at: DateTime<Utc>,
    pub due_date: DateTime<Utc>,
    pub return_date: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Borrow {
    pub fn involves(&self, user_id: Uuid) -> bool {
        self.borrower_id == user_id || self.owner_id == user_id
    }

    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        self.status == BorrowStatus::Accepted && self.due_date < now
    }
}

/// Data for inserting a pending borrow
#[derive(Debug, Clone)]
pub struct NewBorrow {
    pub book_id: Uuid,
    pub borrower_id: Uuid,
    pub owner_id: Uuid,
    pub due_date: DateTime<Utc>,
}

/// A status change applied with the expected current status as precondition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BorrowTransition {
    Accept,
    Reject,
    Return { at: DateTime<Utc> },
}

impl BorrowTransition {
    pub fn from_status(&self) -> BorrowStatus {
        match self {
            BorrowTransition::Accept | BorrowTransition::Reject => BorrowStatus::Pending,
            BorrowTransition::Return { .. } => BorrowStatus::Accepted,
        }
    }

    pub fn to_status(&self) -> BorrowStatus {
        match self {
            BorrowTransition::Accept => BorrowStatus::Accepted,
            BorrowTransition::Reject => BorrowStatus::Rejected,
            BorrowTransition::Return { .. } => BorrowStatus::Returned,
        }
    }

    /// Return timestamp written by this transition. Accept clears any stale one.
    pub fn return_date(&self, current: Option<DateTime<Utc>>) -> Option<DateTime<Utc>> {
        match self {
            BorrowTransition::Accept => None,
            BorrowTransition::Reject => current,
            BorrowTransition::Return { at } => Some(*at),
        }
    }

    /// Apply to an in-memory record. Caller has checked the precondition.
    pub fn apply(&self, borrow: &mut Borrow, now: DateTime<Utc>) {
        borrow.status = self.to_status();
        borrow.return_date = self.return_date(borrow.return_date);
        borrow.updated_at = now;
    }
}

/// Filters for borrow listings; empty `statuses` means any status
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BorrowFilter {
    pub book_id: Option<Uuid>,
    pub borrower_id: Option<Uuid>,
    pub owner_id: Option<Uuid>,
    pub statuses: Vec<BorrowStatus>,
}

impl BorrowFilter {
    pub fn matches(&self, borrow: &Borrow) -> bool {
        self.book_id.map_or(true, |id| borrow.book_id == id)
            && self.borrower_id.map_or(true, |id| borrow.borrower_id == id)
            && self.owner_id.map_or(true, |id| borrow.owner_id == id)
            && (self.statuses.is_empty() || self.statuses.contains(&borrow.status))
    }

    pub fn status_strings(&self) -> Vec<String> {
        self.statuses.iter().map(|s| s.as_str().to_string()).collect()
    }
}
