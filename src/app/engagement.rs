use anyhow::Result;
use sqlx::Row;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::domain::engagement::{Comment, Like, PostStats};
use crate::domain::user::UserSummary;
use crate::infra::db::Db;

#[derive(Clone)]
pub struct EngagementService {
    db: Db,
}

impl EngagementService {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    /// At most one like per user per post; a repeat like returns None
    /// instead of erroring.
    pub async fn like_post(&self, user_id: Uuid, post_id: Uuid) -> Result<Option<Like>> {
        let row = sqlx::query(
            "INSERT INTO likes (user_id, post_id) VALUES ($1, $2) \
             ON CONFLICT DO NOTHING \
             RETURNING id, user_id, post_id, created_at",
        )
        .bind(user_id)
        .bind(post_id)
        .fetch_optional(self.db.pool())
        .await?;

        let like = row.map(|row| Like {
            id: row.get("id"),
            user_id: row.get("user_id"),
            post_id: row.get("post_id"),
            created_at: row.get("created_at"),
        });

        Ok(like)
    }

    pub async fn unlike_post(&self, user_id: Uuid, post_id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM likes WHERE user_id = $1 AND post_id = $2")
            .bind(user_id)
            .bind(post_id)
            .execute(self.db.pool())
            .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn count_likes(&self, post_id: Uuid) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM likes WHERE post_id = $1")
            .bind(post_id)
            .fetch_one(self.db.pool())
            .await?;
        Ok(count)
    }

    pub async fn count_comments(&self, post_id: Uuid) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM comments WHERE post_id = $1")
            .bind(post_id)
            .fetch_one(self.db.pool())
            .await?;
        Ok(count)
    }

    pub async fn viewer_has_liked(&self, post_id: Uuid, user_id: Uuid) -> Result<bool> {
        let liked: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM likes WHERE post_id = $1 AND user_id = $2)",
        )
        .bind(post_id)
        .bind(user_id)
        .fetch_one(self.db.pool())
        .await?;
        Ok(liked)
    }

    /// Counts are deliberately separate queries fetched per displayed post;
    /// they are outside the feed's consistency domain and not kept live.
    pub async fn post_stats(&self, post_id: Uuid, viewer_id: Option<Uuid>) -> Result<PostStats> {
        let like_count = self.count_likes(post_id).await?;
        let comment_count = self.count_comments(post_id).await?;
        let viewer_has_liked = match viewer_id {
            Some(user_id) => self.viewer_has_liked(post_id, user_id).await?,
            None => false,
        };

        Ok(PostStats {
            like_count,
            comment_count,
            viewer_has_liked,
        })
    }

    pub async fn comment_post(&self, user_id: Uuid, post_id: Uuid, text: String) -> Result<Comment> {
        let row = sqlx::query(
            "WITH inserted_comment AS ( \
                INSERT INTO comments (user_id, post_id, text) VALUES ($1, $2, $3) \
                RETURNING id, user_id, post_id, text, created_at \
             ) \
             SELECT c.id, c.user_id, c.post_id, c.text, c.created_at, \
                    u.name AS user_name, u.avatar_url AS user_avatar_url \
             FROM inserted_comment c \
             JOIN users u ON c.user_id = u.id",
        )
        .bind(user_id)
        .bind(post_id)
        .bind(text)
        .fetch_one(self.db.pool())
        .await?;

        Ok(read_comment(&row))
    }

    pub async fn list_comments(
        &self,
        post_id: Uuid,
        cursor: Option<(OffsetDateTime, Uuid)>,
        limit: i64,
    ) -> Result<Vec<Comment>> {
        let rows = match cursor {
            Some((created_at, comment_id)) => {
                sqlx::query(
                    "SELECT c.id, c.user_id, c.post_id, c.text, c.created_at, \
                            u.name AS user_name, u.avatar_url AS user_avatar_url \
                     FROM comments c \
                     JOIN users u ON c.user_id = u.id \
                     WHERE c.post_id = $1 \
                       AND (c.created_at < $2 OR (c.created_at = $2 AND c.id < $3)) \
                     ORDER BY c.created_at DESC, c.id DESC \
                     LIMIT $4",
                )
                .bind(post_id)
                .bind(created_at)
                .bind(comment_id)
                .bind(limit)
                .fetch_all(self.db.pool())
                .await?
            }
            None => {
                sqlx::query(
                    "SELECT c.id, c.user_id, c.post_id, c.text, c.created_at, \
                            u.name AS user_name, u.avatar_url AS user_avatar_url \
                     FROM comments c \
                     JOIN users u ON c.user_id = u.id \
                     WHERE c.post_id = $1 \
                     ORDER BY c.created_at DESC, c.id DESC \
                     LIMIT $2",
                )
                .bind(post_id)
                .bind(limit)
                .fetch_all(self.db.pool())
                .await?
            }
        };

        Ok(rows.iter().map(read_comment).collect())
    }

    pub async fn delete_comment(
        &self,
        comment_id: Uuid,
        post_id: Uuid,
        user_id: Uuid,
    ) -> Result<bool> {
        let result = sqlx::query(
            "DELETE FROM comments WHERE id = $1 AND post_id = $2 AND user_id = $3",
        )
        .bind(comment_id)
        .bind(post_id)
        .bind(user_id)
        .execute(self.db.pool())
        .await?;

        Ok(result.rows_affected() > 0)
    }
}

fn read_comment(row: &sqlx::postgres::PgRow) -> Comment {
    Comment {
        id: row.get("id"),
        user_id: row.get("user_id"),
        post_id: row.get("post_id"),
        text: row.get("text"),
        created_at: row.get("created_at"),
        user: UserSummary {
            id: row.get("user_id"),
            name: row.get("user_name"),
            avatar_url: row.get("user_avatar_url"),
        },
    }
}
