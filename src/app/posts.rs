use anyhow::Result;
use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::Row;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::domain::post::Post;
use crate::domain::user::UserSummary;
use crate::feed::reconciler::{PostSource, POSTS_TABLE};
use crate::infra::changes::{self, ChangeEvent, ChangeOp};
use crate::infra::db::Db;

const POST_COLUMNS: &str = "p.id, p.author_id, p.title, p.content, p.created_at, p.updated_at, \
     u.name AS author_name, u.avatar_url AS author_avatar_url";

fn read_post(row: &PgRow) -> Post {
    Post {
        id: row.get("id"),
        author_id: row.get("author_id"),
        title: row.get("title"),
        content: row.get("content"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
        author: UserSummary {
            id: row.get("author_id"),
            name: row.get("author_name"),
            avatar_url: row.get("author_avatar_url"),
        },
    }
}

#[derive(Clone)]
pub struct PostService {
    db: Db,
}

impl PostService {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    /// Insert a post and notify the change stream in the same transaction.
    pub async fn create_post(&self, author_id: Uuid, title: String, content: String) -> Result<Post> {
        let mut tx = self.db.pool().begin().await?;

        let row = sqlx::query(&format!(
            "WITH inserted_post AS ( \
                INSERT INTO posts (author_id, title, content) \
                VALUES ($1, $2, $3) \
                RETURNING id, author_id, title, content, created_at, updated_at \
             ) \
             SELECT {} \
             FROM inserted_post p \
             JOIN users u ON p.author_id = u.id",
            POST_COLUMNS
        ))
        .bind(author_id)
        .bind(title)
        .bind(content)
        .fetch_one(&mut *tx)
        .await?;

        let post = read_post(&row);
        changes::publish(
            &mut *tx,
            &ChangeEvent::new(POSTS_TABLE, ChangeOp::Insert, post.id),
        )
        .await?;
        tx.commit().await?;

        Ok(post)
    }

    pub async fn get_post(&self, post_id: Uuid) -> Result<Option<Post>> {
        let row = sqlx::query(&format!(
            "SELECT {} \
             FROM posts p \
             JOIN users u ON p.author_id = u.id \
             WHERE p.id = $1",
            POST_COLUMNS
        ))
        .bind(post_id)
        .fetch_optional(self.db.pool())
        .await?;

        Ok(row.as_ref().map(read_post))
    }

    /// Replace title and content; only the author may edit. Bumps
    /// `updated_at`, which is what marks the post as edited and what the
    /// feed uses to reject stale update notifications.
    pub async fn update_post(
        &self,
        post_id: Uuid,
        author_id: Uuid,
        title: String,
        content: String,
    ) -> Result<Option<Post>> {
        let mut tx = self.db.pool().begin().await?;

        let row = sqlx::query(&format!(
            "WITH updated_post AS ( \
                UPDATE posts \
                SET title = $3, content = $4, updated_at = now() \
                WHERE id = $1 AND author_id = $2 \
                RETURNING id, author_id, title, content, created_at, updated_at \
             ) \
             SELECT {} \
             FROM updated_post p \
             JOIN users u ON p.author_id = u.id",
            POST_COLUMNS
        ))
        .bind(post_id)
        .bind(author_id)
        .bind(title)
        .bind(content)
        .fetch_optional(&mut *tx)
        .await?;

        let post = match row {
            Some(row) => {
                let post = read_post(&row);
                changes::publish(
                    &mut *tx,
                    &ChangeEvent::new(POSTS_TABLE, ChangeOp::Update, post.id),
                )
                .await?;
                Some(post)
            }
            None => None,
        };

        tx.commit().await?;
        Ok(post)
    }

    pub async fn delete_post(&self, post_id: Uuid, author_id: Uuid) -> Result<bool> {
        let mut tx = self.db.pool().begin().await?;

        let result = sqlx::query("DELETE FROM posts WHERE id = $1 AND author_id = $2")
            .bind(post_id)
            .bind(author_id)
            .execute(&mut *tx)
            .await?;

        let deleted = result.rows_affected() > 0;
        if deleted {
            changes::publish(
                &mut *tx,
                &ChangeEvent::new(POSTS_TABLE, ChangeOp::Delete, post_id),
            )
            .await?;
        }
        tx.commit().await?;

        Ok(deleted)
    }

    pub async fn list_posts(
        &self,
        cursor: Option<(OffsetDateTime, Uuid)>,
        limit: i64,
    ) -> Result<Vec<Post>> {
        let rows = match cursor {
            Some((created_at, post_id)) => {
                sqlx::query(&format!(
                    "SELECT {} \
                     FROM posts p \
                     JOIN users u ON p.author_id = u.id \
                     WHERE (p.created_at < $1 OR (p.created_at = $1 AND p.id < $2)) \
                     ORDER BY p.created_at DESC, p.id DESC \
                     LIMIT $3",
                    POST_COLUMNS
                ))
                .bind(created_at)
                .bind(post_id)
                .bind(limit)
                .fetch_all(self.db.pool())
                .await?
            }
            None => {
                sqlx::query(&format!(
                    "SELECT {} \
                     FROM posts p \
                     JOIN users u ON p.author_id = u.id \
                     ORDER BY p.created_at DESC, p.id DESC \
                     LIMIT $1",
                    POST_COLUMNS
                ))
                .bind(limit)
                .fetch_all(self.db.pool())
                .await?
            }
        };

        Ok(rows.iter().map(read_post).collect())
    }

    /// Posts by one author, newest first, same keyset cursor as the global
    /// listing. Backs the profile page.
    pub async fn list_posts_by_author(
        &self,
        author_id: Uuid,
        cursor: Option<(OffsetDateTime, Uuid)>,
        limit: i64,
    ) -> Result<Vec<Post>> {
        let rows = match cursor {
            Some((created_at, post_id)) => {
                sqlx::query(&format!(
                    "SELECT {} \
                     FROM posts p \
                     JOIN users u ON p.author_id = u.id \
                     WHERE p.author_id = $1 \
                       AND (p.created_at < $2 OR (p.created_at = $2 AND p.id < $3)) \
                     ORDER BY p.created_at DESC, p.id DESC \
                     LIMIT $4",
                    POST_COLUMNS
                ))
                .bind(author_id)
                .bind(created_at)
                .bind(post_id)
                .bind(limit)
                .fetch_all(self.db.pool())
                .await?
            }
            None => {
                sqlx::query(&format!(
                    "SELECT {} \
                     FROM posts p \
                     JOIN users u ON p.author_id = u.id \
                     WHERE p.author_id = $1 \
                     ORDER BY p.created_at DESC, p.id DESC \
                     LIMIT $2",
                    POST_COLUMNS
                ))
                .bind(author_id)
                .bind(limit)
                .fetch_all(self.db.pool())
                .await?
            }
        };

        Ok(rows.iter().map(read_post).collect())
    }

    /// One bulk fetch of every post, newest first. Seeds the feed; after
    /// that the feed stays current through change events alone.
    pub async fn fetch_all_posts(&self) -> Result<Vec<Post>> {
        let rows = sqlx::query(&format!(
            "SELECT {} \
             FROM posts p \
             JOIN users u ON p.author_id = u.id \
             ORDER BY p.created_at DESC, p.id DESC",
            POST_COLUMNS
        ))
        .fetch_all(self.db.pool())
        .await?;

        Ok(rows.iter().map(read_post).collect())
    }
}

#[async_trait]
impl PostSource for PostService {
    async fn fetch_feed(&self) -> Result<Vec<Post>> {
        self.fetch_all_posts().await
    }

    async fn fetch_post(&self, id: Uuid) -> Result<Option<Post>> {
        self.get_post(id).await
    }
}
