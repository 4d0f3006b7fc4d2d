mod service;
mod store;

use thiserror::Error;

use crate::auth::credentials::CredentialError;
use crate::media::UploadError;

pub use self::service::PostService;
pub use self::store::{ImageChange, NewPost, PostStore, SqlitePostStore, StoreError, UpdatedPost};

pub const TITLE_MIN_CHARS: usize = 5;
pub const TITLE_MAX_CHARS: usize = 255;
pub const CONTENT_MIN_CHARS: usize = 20;

#[derive(Debug, Error)]
pub enum PostError {
    #[error("{0}")]
    Validation(String),

    /// Missing, or owned by someone else. The two are never distinguished.
    #[error("Post not found")]
    NotFound,

    /// The session outlived its user.
    #[error("User not found. Please log in again.")]
    AuthorMissing,

    #[error(transparent)]
    Upload(#[from] UploadError),

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    #[error("Credential lookup failed: {0}")]
    Credential(#[from] CredentialError),
}

/// Post fields after trimming and line-ending normalization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostInput {
    pub title: String,
    pub content: String,
}

impl PostInput {
    pub fn parse(title: &str, content: &str) -> Result<Self, PostError> {
        let title = title.trim().to_string();
        let content = crate::content::normalize_line_endings(content.trim())
            .trim()
            .to_string();

        if title.is_empty() || content.is_empty() {
            return Err(PostError::Validation(
                "Title and content are required.".into(),
            ));
        }

        let title_len = title.chars().count();
        if title_len < TITLE_MIN_CHARS {
            return Err(PostError::Validation(format!(
                "Title must be at least {} characters.",
                TITLE_MIN_CHARS
            )));
        }
        if title_len > TITLE_MAX_CHARS {
            return Err(PostError::Validation(format!(
                "Title must be {} characters or less.",
                TITLE_MAX_CHARS
            )));
        }
        if content.chars().count() < CONTENT_MIN_CHARS {
            return Err(PostError::Validation(format!(
                "Content must be at least {} characters.",
                CONTENT_MIN_CHARS
            )));
        }

        Ok(Self { title, content })
    }
}
