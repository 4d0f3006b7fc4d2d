//! Uploaded image storage.
//!
//! Files live flat under a single upload root, named by generated keys. A
//! key is only ever produced by [`MediaStore::validate_and_store`]; client
//! file names never reach the filesystem.

mod sniff;

use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub use self::sniff::{sniff_image, ImageKind, MAX_IMAGE_DIMENSION};

#[cfg(test)]
pub(crate) use self::sniff::fixtures;

/// Public URL prefix stored assets are served under.
pub const URL_PREFIX: &str = "/uploads/";

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("The image upload did not complete. Please try again.")]
    Transport(String),

    #[error("Image is too large (max {}).", human_size(.max_bytes))]
    TooLarge { max_bytes: u64 },

    #[error("File is not a valid image. Allowed formats: JPG, PNG, GIF, WebP.")]
    InvalidImage,

    #[error("Could not save the image. Please try again.")]
    StorageFailure(#[source] io::Error),
}

/// What arrived in the image field of a form.
#[derive(Debug, Clone)]
pub enum UploadCandidate {
    /// No file chosen; images are optional.
    Missing,
    /// The body broke off or could not be read.
    Failed(String),
    File(UploadedFile),
}

#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub file_name: String,
    /// Bytes observed on the wire; may exceed `bytes.len()` when the reader
    /// stopped buffering an oversized file.
    pub size: u64,
    pub bytes: Vec<u8>,
}

impl UploadedFile {
    pub fn new(file_name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            file_name: file_name.into(),
            size: bytes.len() as u64,
            bytes,
        }
    }
}

/// A stored, validated image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaAsset {
    pub key: String,
    pub kind: ImageKind,
    pub size: u64,
}

#[derive(Debug, Clone)]
pub struct MediaStore {
    root: PathBuf,
    max_bytes: u64,
}

impl MediaStore {
    pub fn new(root: impl Into<PathBuf>, max_bytes: u64) -> Self {
        Self {
            root: root.into(),
            max_bytes,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn max_bytes(&self) -> u64 {
        self.max_bytes
    }

    /// Validate a candidate and, if it is an acceptable image, store it under
    /// a fresh key. `Ok(None)` means no file was submitted.
    pub fn validate_and_store(
        &self,
        candidate: &UploadCandidate,
    ) -> Result<Option<MediaAsset>, UploadError> {
        let file = match candidate {
            UploadCandidate::Missing => return Ok(None),
            UploadCandidate::Failed(reason) => {
                return Err(UploadError::Transport(reason.clone()));
            }
            UploadCandidate::File(file) => file,
        };

        if file.size > self.max_bytes || file.bytes.len() as u64 > self.max_bytes {
            return Err(UploadError::TooLarge {
                max_bytes: self.max_bytes,
            });
        }

        let kind = sniff_image(&file.bytes).ok_or(UploadError::InvalidImage)?;
        let key = generate_key(kind, &file.file_name);

        self.persist(&key, &file.bytes).map_err(|e| {
            tracing::error!(root = %self.root.display(), "Failed to store upload: {}", e);
            UploadError::StorageFailure(e)
        })?;

        tracing::info!(key = %key, size = file.bytes.len(), "Stored upload");
        Ok(Some(MediaAsset {
            key,
            kind,
            size: file.bytes.len() as u64,
        }))
    }

    /// Store the new candidate, then drop `old_key`. The old file is only
    /// touched once the new one is safely on disk; with no new file the old
    /// one is kept.
    pub fn replace(
        &self,
        old_key: Option<&str>,
        candidate: &UploadCandidate,
    ) -> Result<Option<MediaAsset>, UploadError> {
        let asset = self.validate_and_store(candidate)?;
        if let (Some(_), Some(old)) = (&asset, old_key) {
            self.delete_logged(old);
        }
        Ok(asset)
    }

    /// Remove an asset. Missing files and malformed keys are no-ops.
    pub fn delete(&self, key: &str) -> io::Result<()> {
        let Some(path) = self.path_for(key) else {
            return Ok(());
        };
        match std::fs::remove_file(&path) {
            Ok(()) => {
                tracing::info!(key = %key, "Deleted upload");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Delete, logging rather than returning failure. Used for cleanup steps
    /// whose failure must not fail the surrounding operation.
    pub fn delete_logged(&self, key: &str) {
        if let Err(e) = self.delete(key) {
            tracing::warn!(key = %key, "Failed to delete upload: {}", e);
        }
    }

    /// Deterministic public location of an asset; empty for no asset.
    pub fn url_for(&self, key: Option<&str>) -> String {
        match key {
            Some(k) if !k.is_empty() => format!("{}{}", URL_PREFIX, k),
            _ => String::new(),
        }
    }

    pub fn path_for(&self, key: &str) -> Option<PathBuf> {
        is_valid_key(key).then(|| self.root.join(key))
    }

    pub fn exists(&self, key: &str) -> bool {
        self.path_for(key).is_some_and(|p| p.is_file())
    }

    /// Write through a temp file in the same directory and rename into place,
    /// so readers never see a partial file and failures leave nothing behind.
    fn persist(&self, key: &str, bytes: &[u8]) -> io::Result<()> {
        std::fs::create_dir_all(&self.root)?;

        let mut tmp = tempfile::Builder::new()
            .prefix(".upload-")
            .tempfile_in(&self.root)?;
        tmp.write_all(bytes)?;
        tmp.as_file().sync_all()?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(tmp.path(), std::fs::Permissions::from_mode(0o644))?;
        }

        tmp.persist_noclobber(self.root.join(key))
            .map_err(|e| e.error)?;
        Ok(())
    }
}

fn human_size(bytes: &u64) -> String {
    const MIB: u64 = 1024 * 1024;
    if *bytes >= MIB && bytes % MIB == 0 {
        format!("{} MB", bytes / MIB)
    } else if *bytes >= 1024 {
        format!("{} KB", bytes / 1024)
    } else {
        format!("{} bytes", bytes)
    }
}

fn generate_key(kind: ImageKind, original_name: &str) -> String {
    format!(
        "{}.{}",
        uuid::Uuid::now_v7().simple(),
        kind.extension_for(original_name)
    )
}

/// Keys are flat generated names: no separators, no dot-prefixed names.
pub fn is_valid_key(key: &str) -> bool {
    !key.is_empty()
        && key.len() <= 128
        && !key.starts_with('.')
        && !key.contains("..")
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_')
}
