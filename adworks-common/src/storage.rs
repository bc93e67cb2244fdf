use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::path::{PathError, VirtualPath};

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("storage quota exceeded")]
    Quota,
    #[error("storage error: HTTP {status} - {message}")]
    Remote { status: u16, message: String },
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error(transparent)]
    Path(#[from] PathError),
}

#[derive(Debug, Clone, Default)]
pub struct UploadOptions {
    pub content_type: Option<String>,
    pub cache_control: Option<String>,
}

/// Result of a successful upload. Owned by the caller; the adapter keeps no
/// reference. `file_id` is the store's permanent native id and can be handed
/// back later for id-based download or delete without a path walk.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoredBlob {
    pub path: String,
    pub file_id: String,
    pub public_url: String,
    pub size: u64,
    pub mime_type: String,
}

/// Target of a delete. Callers say explicitly whether they hold a native id
/// or a virtual path; the adapter never infers one from string shape.
#[derive(Debug, Clone, PartialEq)]
pub enum DeleteTarget {
    FileId(String),
    Path(VirtualPath),
}

impl std::fmt::Display for DeleteTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeleteTarget::FileId(id) => write!(f, "id:{}", id),
            DeleteTarget::Path(path) => write!(f, "path:{}", path),
        }
    }
}

/// Trait implemented by all storage providers.
///
/// Each provider handles the raw I/O for one remote store (hierarchical
/// drive, flat bucket). Callers own path conventions and metadata; the
/// adapter is responsible only for moving bytes and resolving locations.
/// Deleting an entity that is already gone is a success, not an error.
#[async_trait]
pub trait StorageAdapter: Send + Sync {
    /// Upload `data` at `path`, creating intermediate folders as needed.
    async fn upload(
        &self,
        data: Bytes,
        path: &VirtualPath,
        opts: &UploadOptions,
    ) -> Result<StoredBlob, StorageError>;

    /// Download a blob by virtual path. `NotFound` when absent.
    async fn download(&self, path: &VirtualPath) -> Result<Bytes, StorageError>;

    /// Download a blob by its native id, skipping path resolution.
    async fn download_by_id(&self, file_id: &str) -> Result<Bytes, StorageError>;

    /// Delete a blob. Missing targets are swallowed and logged.
    async fn delete(&self, target: &DeleteTarget) -> Result<(), StorageError>;

    /// Whether a blob exists at `path`.
    async fn exists(&self, path: &VirtualPath) -> Result<bool, StorageError>;
}
