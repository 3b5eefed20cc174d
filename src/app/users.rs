use anyhow::Result;
use sqlx::postgres::PgRow;
use sqlx::Row;
use uuid::Uuid;

use crate::domain::user::User;
use crate::infra::db::Db;

#[derive(Clone)]
pub struct UserService {
    db: Db,
}

impl UserService {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    pub async fn get_user(&self, user_id: Uuid) -> Result<Option<User>> {
        let row = sqlx::query(
            "SELECT id, email, name, avatar_url, created_at \
             FROM users WHERE id = $1",
        )
        .bind(user_id)
        .fetch_optional(self.db.pool())
        .await?;

        Ok(row.as_ref().map(read_user))
    }

    /// Partial update. `name` is keep-or-set; `avatar_url` is three-valued:
    /// outer None keeps the current value, `Some(None)` clears it.
    pub async fn update_profile(
        &self,
        user_id: Uuid,
        name: Option<String>,
        avatar_url: Option<Option<String>>,
    ) -> Result<Option<User>> {
        let set_avatar = avatar_url.is_some();
        let row = sqlx::query(
            "UPDATE users \
             SET name = COALESCE($2, name), \
                 avatar_url = CASE WHEN $3 THEN $4 ELSE avatar_url END \
             WHERE id = $1 \
             RETURNING id, email, name, avatar_url, created_at",
        )
        .bind(user_id)
        .bind(name)
        .bind(set_avatar)
        .bind(avatar_url.flatten())
        .fetch_optional(self.db.pool())
        .await?;

        Ok(row.as_ref().map(read_user))
    }
}

fn read_user(row: &PgRow) -> User {
    User {
        id: row.get("id"),
        email: row.get("email"),
        name: row.get("name"),
        avatar_url: row.get("avatar_url"),
        created_at: row.get("created_at"),
    }
}
