//! Uploaded file storage under `MEDIA_ROOT`.
//!
//! Files are written below a per-object directory with a random prefix, and
//! the returned relative path is what the database stores. `/media/` serves
//! the same tree.

use std::path::{Path, PathBuf};

use thiserror::Error;
use uuid::Uuid;

use mysite_core::{ProductId, UserId};

/// Longest kept file name, prefix excluded.
const MAX_FILENAME_LENGTH: usize = 100;

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("the submitted file is empty")]
    Empty,

    #[error("could not store upload: {0}")]
    Io(#[from] std::io::Error),
}

/// Writes uploads to disk.
#[derive(Debug, Clone)]
pub struct MediaStore {
    root: PathBuf,
}

impl MediaStore {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Store an extra image of a product.
    ///
    /// # Errors
    ///
    /// Returns `MediaError::Empty` for an empty file and `MediaError::Io` if
    /// the file cannot be written.
    pub async fn save_product_image(
        &self,
        product: ProductId,
        filename: &str,
        data: &[u8],
    ) -> Result<String, MediaError> {
        self.save(&format!("products/product_{product}/images"), filename, data)
            .await
    }

    /// Store a user avatar.
    ///
    /// # Errors
    ///
    /// Same as [`Self::save_product_image`].
    pub async fn save_avatar(
        &self,
        user: UserId,
        filename: &str,
        data: &[u8],
    ) -> Result<String, MediaError> {
        self.save(&format!("users/user_{user}/avatar"), filename, data)
            .await
    }

    async fn save(&self, dir: &str, filename: &str, data: &[u8]) -> Result<String, MediaError> {
        if data.is_empty() {
            return Err(MediaError::Empty);
        }

        let relative = format!("{dir}/{}-{}", Uuid::new_v4().simple(), sanitize_filename(filename));
        let path = self.root.join(&relative);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, data).await?;

        tracing::debug!(path = %relative, bytes = data.len(), "stored upload");
        Ok(relative)
    }
}

/// Keep the last path component, limited to `[A-Za-z0-9._-]`.
fn sanitize_filename(filename: &str) -> String {
    let base = filename.rsplit(['/', '\\']).next().unwrap_or_default();
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .take(MAX_FILENAME_LENGTH)
        .collect();

    let trimmed = cleaned.trim_start_matches('.');
    if trimmed.is_empty() {
        "upload".to_owned()
    } else {
        trimmed.to_owned()
    }
}
