use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::domain::user::UserSummary;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Post {
    pub id: Uuid,
    pub author_id: Uuid,
    pub title: String,
    pub content: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
    pub author: UserSummary,
}

impl Post {
    /// A post counts as edited once any update touched it.
    /// Invariant from the schema: `updated_at >= created_at`.
    pub fn edited(&self) -> bool {
        self.updated_at != self.created_at
    }
}
