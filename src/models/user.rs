//! User model (read-only from the engine's point of view)

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Short user representation used to populate owners and address emails
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct UserShort {
    pub id: Uuid,
    pub name: String,
    pub email: String,
}
