use std::sync::Arc;

use crate::auth::credentials::CredentialStore;
use crate::auth::session::Identity;
use crate::db::models::{Post, PostView};
use crate::media::{MediaAsset, MediaStore, UploadCandidate, UploadError};
use crate::posts::store::{ImageChange, NewPost, PostStore};
use crate::posts::{PostError, PostInput};

/// Post lifecycle with its image kept in step: every file written during a
/// failed mutation is removed again, and files a committed mutation no
/// longer references are removed after the commit.
#[derive(Clone)]
pub struct PostService {
    store: Arc<dyn PostStore>,
    media: MediaStore,
    credentials: CredentialStore,
}

impl PostService {
    pub fn new(store: Arc<dyn PostStore>, media: MediaStore, credentials: CredentialStore) -> Self {
        Self {
            store,
            media,
            credentials,
        }
    }

    pub fn media(&self) -> &MediaStore {
        &self.media
    }

    pub async fn create(
        &self,
        author: &Identity,
        title: &str,
        content: &str,
        upload: UploadCandidate,
    ) -> Result<Post, PostError> {
        let input = PostInput::parse(title, content)?;

        if self.credentials.find_by_id(&author.id)?.is_none() {
            return Err(PostError::AuthorMissing);
        }

        let asset = self.store_upload(upload).await?;
        let image = asset.map(|a| a.key);

        let inserted = self
            .store
            .insert(NewPost {
                user_id: author.id.clone(),
                title: input.title,
                content: input.content,
                image: image.clone(),
            })
            .await;

        match inserted {
            Ok(post) => {
                tracing::info!(post_id = post.id, user_id = %author.id, "Created post");
                Ok(post)
            }
            Err(e) => {
                if let Some(key) = &image {
                    self.media.delete_logged(key);
                }
                tracing::error!(user_id = %author.id, "Failed to insert post: {}", e);
                Err(e.into())
            }
        }
    }

    /// Decode and write the upload on the blocking pool.
    async fn store_upload(&self, upload: UploadCandidate) -> Result<Option<MediaAsset>, PostError> {
        if matches!(upload, UploadCandidate::Missing) {
            return Ok(None);
        }
        let media = self.media.clone();
        let stored = tokio::task::spawn_blocking(move || media.validate_and_store(&upload))
            .await
            .map_err(|e| UploadError::StorageFailure(std::io::Error::other(e)))?;
        Ok(stored?)
    }

    pub async fn read(&self, id: i64) -> Result<PostView, PostError> {
        self.store.find(id).await?.ok_or(PostError::NotFound)
    }

    pub async fn list(&self) -> Result<Vec<PostView>, PostError> {
        Ok(self.store.list().await?)
    }

    /// Load a post for its owner. Someone else's post is `NotFound`.
    pub async fn read_owned(&self, id: i64, requester: &Identity) -> Result<PostView, PostError> {
        match self.store.find(id).await? {
            Some(view) if view.post.user_id == requester.id => Ok(view),
            _ => Err(PostError::NotFound),
        }
    }

    /// Edit title, content and image. A removal request and a new upload may
    /// both be present; the upload wins. Old files are deleted only after the
    /// row commit, and a freshly stored file is deleted if the commit fails.
    pub async fn update(
        &self,
        id: i64,
        requester: &Identity,
        title: &str,
        content: &str,
        remove_image: bool,
        upload: UploadCandidate,
    ) -> Result<Post, PostError> {
        let existing = self.read_owned(id, requester).await?;
        let input = PostInput::parse(title, content)?;

        let mut change = if remove_image && existing.post.image.is_some() {
            ImageChange::Clear
        } else {
            ImageChange::Keep
        };

        let new_asset = self.store_upload(upload).await?;
        if let Some(asset) = &new_asset {
            change = ImageChange::Set(asset.key.clone());
        }

        let updated = self
            .store
            .update(id, &requester.id, &input.title, &input.content, change)
            .await;

        let rollback = || {
            if let Some(asset) = &new_asset {
                self.media.delete_logged(&asset.key);
            }
        };

        let updated = match updated {
            Ok(Some(updated)) => updated,
            Ok(None) => {
                rollback();
                return Err(PostError::NotFound);
            }
            Err(e) => {
                rollback();
                tracing::error!(post_id = id, "Failed to update post: {}", e);
                return Err(e.into());
            }
        };

        if let Some(previous) = &updated.previous_image {
            if updated.post.image.as_ref() != Some(previous) {
                self.media.delete_logged(previous);
            }
        }

        tracing::info!(post_id = id, user_id = %requester.id, "Updated post");
        Ok(updated.post)
    }

    /// Delete a post and then its image. Image cleanup failure is logged
    /// only; the post is gone either way.
    pub async fn delete(&self, id: i64, requester: &Identity) -> Result<(), PostError> {
        let deleted = self
            .store
            .delete(id, &requester.id)
            .await?
            .ok_or(PostError::NotFound)?;

        if let Some(key) = &deleted.image {
            self.media.delete_logged(key);
        }

        tracing::info!(post_id = id, user_id = %requester.id, "Deleted post");
        Ok(())
    }
}
