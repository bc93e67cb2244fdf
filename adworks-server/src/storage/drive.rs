//! Hierarchical drive provider.
//!
//! Talks to a drive-style remote store where folders are first-class entities
//! with opaque native ids. Virtual paths are resolved segment by segment
//! through the [`FolderCache`]; uploads create any missing folders, while
//! downloads, existence checks and path-based deletes walk the hierarchy
//! read-only. Uploaded files are granted public read access and the returned
//! native id yields a permanent public URL; there is no signed-URL scheme.

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, warn};

use adworks_common::path::VirtualPath;
use adworks_common::storage::{
    DeleteTarget, StorageAdapter, StorageError, StoredBlob, UploadOptions,
};

use crate::config::DriveConfig;
use crate::storage::folder_cache::{FolderCache, FolderOps};

const FOLDER_KIND: &str = "folder";
const FILE_KIND: &str = "file";

#[derive(Debug, Deserialize)]
struct DriveFile {
    id: String,
    #[serde(default)]
    size: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct FileList {
    files: Vec<DriveFile>,
}

/// Raw HTTP client for the drive API. Kept separate from the adapter so the
/// folder cache can drive it through the [`FolderOps`] contract.
pub(crate) struct DriveApi {
    client: Client,
    base_url: String,
    token: String,
    public_url_base: String,
}

impl DriveApi {
    fn new(config: &DriveConfig) -> Self {
        Self {
            client: Client::builder()
                .timeout(std::time::Duration::from_secs(300))
                .build()
                .expect("Failed to build HTTP client"),
            base_url: config.api_url.trim_end_matches('/').to_string(),
            token: config.token.clone(),
            public_url_base: config.public_url_base.trim_end_matches('/').to_string(),
        }
    }

    /// Stable public URL for a native file id.
    fn public_url(&self, file_id: &str) -> String {
        format!("{}/{}", self.public_url_base, file_id)
    }

    /// Find a direct child of `parent_id` by exact name.
    async fn find_child(
        &self,
        parent_id: &str,
        name: &str,
        kind: &str,
    ) -> Result<Option<DriveFile>, StorageError> {
        let url = format!(
            "{}/files?parent={}&name={}&kind={}",
            self.base_url,
            urlencoding::encode(parent_id),
            urlencoding::encode(name),
            kind,
        );
        let resp = self
            .client
            .get(&url)
            .bearer_auth(&self.token)
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(error_for(resp).await);
        }

        let list: FileList = resp.json().await?;
        Ok(list.files.into_iter().next())
    }

    async fn upload_file(
        &self,
        parent_id: &str,
        name: &str,
        content_type: &str,
        data: Bytes,
    ) -> Result<DriveFile, StorageError> {
        let metadata = serde_json::json!({
            "name": name,
            "parent": parent_id,
            "kind": FILE_KIND,
            "content_type": content_type,
        });
        let boundary = format!("adworks-{:016x}", rand::random::<u64>());
        let body = multipart_related(&metadata, content_type, &data, &boundary);

        let resp = self
            .client
            .post(format!("{}/files?upload=multipart", self.base_url))
            .bearer_auth(&self.token)
            .header(
                "Content-Type",
                format!("multipart/related; boundary={}", boundary),
            )
            .body(body)
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(error_for(resp).await);
        }

        let file: DriveFile = resp.json().await?;
        debug!(file_id = %file.id, name, "Drive upload complete");
        Ok(file)
    }

    /// Make the file readable by anyone holding its URL.
    async fn grant_public_read(&self, file_id: &str) -> Result<(), StorageError> {
        let resp = self
            .client
            .post(format!(
                "{}/files/{}/permissions",
                self.base_url,
                urlencoding::encode(file_id),
            ))
            .bearer_auth(&self.token)
            .json(&serde_json::json!({ "role": "reader", "scope": "anyone" }))
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(error_for(resp).await);
        }
        Ok(())
    }

    async fn download(&self, file_id: &str) -> Result<Bytes, StorageError> {
        let resp = self
            .client
            .get(format!(
                "{}/files/{}/content",
                self.base_url,
                urlencoding::encode(file_id),
            ))
            .bearer_auth(&self.token)
            .send()
            .await?;

        if resp.status().as_u16() == 404 {
            return Err(StorageError::NotFound(file_id.to_string()));
        }
        if !resp.status().is_success() {
            return Err(error_for(resp).await);
        }
        Ok(resp.bytes().await?)
    }

    /// Delete by native id. A 404 means the file is already gone; that is a
    /// success for callers.
    async fn delete(&self, file_id: &str) -> Result<(), StorageError> {
        let resp = self
            .client
            .delete(format!(
                "{}/files/{}",
                self.base_url,
                urlencoding::encode(file_id),
            ))
            .bearer_auth(&self.token)
            .send()
            .await?;

        if resp.status().as_u16() == 404 {
            debug!(file_id, "Drive file already deleted");
            return Ok(());
        }
        if !resp.status().is_success() {
            return Err(error_for(resp).await);
        }
        debug!(file_id, "Drive delete complete");
        Ok(())
    }
}

#[async_trait]
impl FolderOps for DriveApi {
    async fn find_folder(
        &self,
        parent_id: &str,
        name: &str,
    ) -> Result<Option<String>, StorageError> {
        Ok(self
            .find_child(parent_id, name, FOLDER_KIND)
            .await?
            .map(|f| f.id))
    }

    async fn create_folder(&self, parent_id: &str, name: &str) -> Result<String, StorageError> {
        let resp = self
            .client
            .post(format!("{}/files", self.base_url))
            .bearer_auth(&self.token)
            .json(&serde_json::json!({
                "name": name,
                "parent": parent_id,
                "kind": FOLDER_KIND,
            }))
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(error_for(resp).await);
        }

        let folder: DriveFile = resp.json().await?;
        debug!(folder_id = %folder.id, name, "Drive folder created");
        Ok(folder.id)
    }
}

pub struct DriveAdapter {
    api: DriveApi,
    root_folder_id: String,
    folders: FolderCache,
}

impl DriveAdapter {
    pub fn new(config: &DriveConfig) -> Self {
        Self {
            api: DriveApi::new(config),
            root_folder_id: config.root_folder_id.clone(),
            folders: FolderCache::new(),
        }
    }

    /// Resolve the folder chain of `path`, creating missing folders.
    async fn resolve_parent(&self, path: &VirtualPath) -> Result<String, StorageError> {
        let mut parent = self.root_folder_id.clone();
        for name in path.folders() {
            parent = self.folders.resolve(&self.api, &parent, name).await?;
        }
        Ok(parent)
    }

    /// Read-only walk to the file at `path`. Never creates folders; `None`
    /// when any segment (or the file itself) is missing.
    async fn locate(&self, path: &VirtualPath) -> Result<Option<DriveFile>, StorageError> {
        let mut parent = self.root_folder_id.clone();
        for name in path.folders() {
            let folder_id = match self.folders.peek(&parent, name) {
                Some(id) => id,
                None => match self.api.find_folder(&parent, name).await? {
                    Some(id) => {
                        self.folders.store(&parent, name, &id);
                        id
                    }
                    None => return Ok(None),
                },
            };
            parent = folder_id;
        }
        self.api.find_child(&parent, path.file_name(), FILE_KIND).await
    }
}

#[async_trait]
impl StorageAdapter for DriveAdapter {
    async fn upload(
        &self,
        data: Bytes,
        path: &VirtualPath,
        opts: &UploadOptions,
    ) -> Result<StoredBlob, StorageError> {
        let parent = self.resolve_parent(path).await?;
        let content_type = opts
            .content_type
            .clone()
            .unwrap_or_else(|| "application/octet-stream".to_string());
        let byte_count = data.len() as u64;

        let file = self
            .api
            .upload_file(&parent, path.file_name(), &content_type, data)
            .await?;
        self.api.grant_public_read(&file.id).await?;

        Ok(StoredBlob {
            path: path.to_string(),
            public_url: self.api.public_url(&file.id),
            size: file.size.unwrap_or(byte_count),
            mime_type: content_type,
            file_id: file.id,
        })
    }

    async fn download(&self, path: &VirtualPath) -> Result<Bytes, StorageError> {
        match self.locate(path).await? {
            Some(file) => self.api.download(&file.id).await,
            None => Err(StorageError::NotFound(path.to_string())),
        }
    }

    async fn download_by_id(&self, file_id: &str) -> Result<Bytes, StorageError> {
        self.api.download(file_id).await
    }

    async fn delete(&self, target: &DeleteTarget) -> Result<(), StorageError> {
        let file_id = match target {
            DeleteTarget::FileId(id) => Some(id.clone()),
            DeleteTarget::Path(path) => self.locate(path).await?.map(|f| f.id),
        };
        match file_id {
            Some(id) => self.api.delete(&id).await,
            None => {
                warn!(target = %target, "Blob not found for deletion, nothing to do");
                Ok(())
            }
        }
    }

    async fn exists(&self, path: &VirtualPath) -> Result<bool, StorageError> {
        Ok(self.locate(path).await?.is_some())
    }
}

/// Map an unsuccessful drive response onto the storage error taxonomy.
async fn error_for(resp: reqwest::Response) -> StorageError {
    let status = resp.status().as_u16();
    let message = resp.text().await.unwrap_or_default();
    match status {
        404 => StorageError::NotFound(message),
        429 => StorageError::Quota,
        _ => StorageError::Remote { status, message },
    }
}

/// Assemble a `multipart/related` body: a JSON metadata part followed by the
/// media part.
fn multipart_related(
    metadata: &serde_json::Value,
    content_type: &str,
    data: &[u8],
    boundary: &str,
) -> Vec<u8> {
    let mut body = Vec::with_capacity(data.len() + 512);
    body.extend_from_slice(format!("--{}\r\n", boundary).as_bytes());
    body.extend_from_slice(b"Content-Type: application/json; charset=UTF-8\r\n\r\n");
    body.extend_from_slice(metadata.to_string().as_bytes());
    body.extend_from_slice(format!("\r\n--{}\r\n", boundary).as_bytes());
    body.extend_from_slice(format!("Content-Type: {}\r\n\r\n", content_type).as_bytes());
    body.extend_from_slice(data);
    body.extend_from_slice(format!("\r\n--{}--\r\n", boundary).as_bytes());
    body
}
