// Row-level persistence for posts; ownership is enforced in every mutating
// statement, not only by callers.
use async_trait::async_trait;
use chrono::{Duration, Utc};
use rusqlite::{params, OptionalExtension, TransactionBehavior};
use thiserror::Error;

use crate::db::{self, models::Post, models::PostView};
use crate::state::DbPool;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Pool error: {0}")]
    Pool(#[from] r2d2::Error),
}

#[derive(Debug, Clone)]
pub struct NewPost {
    pub user_id: String,
    pub title: String,
    pub content: String,
    pub image: Option<String>,
}

/// What an update does to the image column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageChange {
    /// Leave whatever the row holds at commit time.
    Keep,
    Clear,
    Set(String),
}

#[derive(Debug, Clone)]
pub struct UpdatedPost {
    pub post: Post,
    /// The image the row referenced immediately before this write.
    pub previous_image: Option<String>,
}

#[async_trait]
pub trait PostStore: Send + Sync {
    async fn insert(&self, post: NewPost) -> Result<Post, StoreError>;

    async fn find(&self, id: i64) -> Result<Option<PostView>, StoreError>;

    /// Newest first; equal timestamps fall back to insertion order.
    async fn list(&self) -> Result<Vec<PostView>, StoreError>;

    /// Atomically rewrite a post owned by `owner_id`. `None` when no such
    /// post exists for that owner.
    async fn update(
        &self,
        id: i64,
        owner_id: &str,
        title: &str,
        content: &str,
        image: ImageChange,
    ) -> Result<Option<UpdatedPost>, StoreError>;

    /// Delete a post owned by `owner_id`, returning the removed row only if a
    /// row was actually deleted.
    async fn delete(&self, id: i64, owner_id: &str) -> Result<Option<Post>, StoreError>;
}

/// SQLite implementation
pub struct SqlitePostStore {
    pool: DbPool,
}

impl SqlitePostStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

const POST_VIEW_SELECT: &str = "SELECT p.id, p.user_id, p.title, p.content, p.image,
            p.created_at, p.updated_at, u.username
     FROM posts p
     JOIN users u ON u.id = p.user_id";

fn post_view_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<PostView> {
    Ok(PostView {
        post: Post::from_row(row)?,
        author: row.get("username")?,
    })
}

/// `now`, nudged forward if needed so `updated_at` strictly advances.
fn next_timestamp(previous: &str) -> String {
    let now = Utc::now();
    match db::parse_timestamp(previous) {
        Some(prev) if prev >= now => db::format_timestamp(prev + Duration::microseconds(1)),
        _ => db::format_timestamp(now),
    }
}

#[async_trait]
impl PostStore for SqlitePostStore {
    async fn insert(&self, post: NewPost) -> Result<Post, StoreError> {
        let conn = self.pool.get()?;
        let now = db::now_timestamp();

        conn.execute(
            "INSERT INTO posts (user_id, title, content, image, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
            params![post.user_id, post.title, post.content, post.image, now],
        )?;

        Ok(Post {
            id: conn.last_insert_rowid(),
            user_id: post.user_id,
            title: post.title,
            content: post.content,
            image: post.image,
            created_at: now.clone(),
            updated_at: now,
        })
    }

    async fn find(&self, id: i64) -> Result<Option<PostView>, StoreError> {
        let conn = self.pool.get()?;
        let view = conn
            .query_row(
                &format!("{POST_VIEW_SELECT} WHERE p.id = ?1"),
                params![id],
                post_view_from_row,
            )
            .optional()?;
        Ok(view)
    }

    async fn list(&self) -> Result<Vec<PostView>, StoreError> {
        let conn = self.pool.get()?;
        let mut stmt =
            conn.prepare(&format!("{POST_VIEW_SELECT} ORDER BY p.created_at DESC, p.id DESC"))?;
        let posts = stmt
            .query_map([], post_view_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(posts)
    }

    async fn update(
        &self,
        id: i64,
        owner_id: &str,
        title: &str,
        content: &str,
        image: ImageChange,
    ) -> Result<Option<UpdatedPost>, StoreError> {
        let mut conn = self.pool.get()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let Some(current) = tx
            .query_row(
                "SELECT id, user_id, title, content, image, created_at, updated_at
                 FROM posts WHERE id = ?1 AND user_id = ?2",
                params![id, owner_id],
                Post::from_row,
            )
            .optional()?
        else {
            return Ok(None);
        };

        let new_image = match image {
            ImageChange::Keep => current.image.clone(),
            ImageChange::Clear => None,
            ImageChange::Set(key) => Some(key),
        };
        let updated_at = next_timestamp(&current.updated_at);

        tx.execute(
            "UPDATE posts SET title = ?1, content = ?2, image = ?3, updated_at = ?4
             WHERE id = ?5 AND user_id = ?6",
            params![title, content, new_image, updated_at, id, owner_id],
        )?;
        tx.commit()?;

        Ok(Some(UpdatedPost {
            post: Post {
                title: title.to_string(),
                content: content.to_string(),
                image: new_image,
                updated_at,
                ..current.clone()
            },
            previous_image: current.image,
        }))
    }

    async fn delete(&self, id: i64, owner_id: &str) -> Result<Option<Post>, StoreError> {
        let mut conn = self.pool.get()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let existing = tx
            .query_row(
                "SELECT id, user_id, title, content, image, created_at, updated_at
                 FROM posts WHERE id = ?1 AND user_id = ?2",
                params![id, owner_id],
                Post::from_row,
            )
            .optional()?;

        let Some(post) = existing else {
            return Ok(None);
        };

        let affected = tx.execute(
            "DELETE FROM posts WHERE id = ?1 AND user_id = ?2",
            params![id, owner_id],
        )?;
        tx.commit()?;

        Ok((affected > 0).then_some(post))
    }
}
