//! Attachment sink
//!
//! Writes received attachments under a fixed directory, creating it on first
//! use. A file with the same name is overwritten.

use crate::error::{Result, StorageError};
use std::path::{Component, Path, PathBuf};
use tracing::debug;

/// Default directory for inbound attachments, relative to the working directory
pub const DEFAULT_ATTACHMENT_DIR: &str = "received-images";

/// Stores inbound attachments on disk
#[derive(Debug, Clone)]
pub struct AttachmentSink {
    dir: PathBuf,
}

impl AttachmentSink {
    /// Create a sink writing under `dir`. The directory is created lazily.
    pub fn new<P: Into<PathBuf>>(dir: P) -> Self {
        Self { dir: dir.into() }
    }

    /// Directory attachments are written to
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write `data` as `filename` and return the full path
    ///
    /// Only the final component of `filename` is used, so a sender cannot
    /// place files outside the sink directory.
    ///
    /// # Errors
    ///
    /// - `StorageError::InvalidFilename` if no usable file name remains
    /// - `StorageError::WriteFailed` if the directory or file cannot be written
    pub async fn store(&self, filename: &str, data: &[u8]) -> Result<PathBuf> {
        let name = sanitize_filename(filename)?;
        let path = self.dir.join(name);

        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| StorageError::WriteFailed {
                path: self.dir.clone(),
                reason: e.to_string(),
            })?;

        tokio::fs::write(&path, data)
            .await
            .map_err(|e| StorageError::WriteFailed {
                path: path.clone(),
                reason: e.to_string(),
            })?;

        debug!(path = %path.display(), size = data.len(), "attachment stored");
        Ok(path)
    }
}

impl Default for AttachmentSink {
    fn default() -> Self {
        Self::new(DEFAULT_ATTACHMENT_DIR)
    }
}

/// Reduce a sender-supplied name to its final normal path component
fn sanitize_filename(filename: &str) -> std::result::Result<&str, StorageError> {
    // Senders on other platforms may use either separator.
    let last = filename.rsplit(['/', '\\']).next().unwrap_or_default();

    match Path::new(last).components().next() {
        Some(Component::Normal(_)) if !last.trim().is_empty() => Ok(last),
        _ => Err(StorageError::InvalidFilename(filename.to_string())),
    }
}
