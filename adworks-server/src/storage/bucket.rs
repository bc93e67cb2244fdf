//! Flat bucket provider.
//!
//! Object stores without real folders: the joined virtual path is the object
//! key, which doubles as the native id. No folder cache is involved.

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Client;
use tracing::debug;

use adworks_common::path::VirtualPath;
use adworks_common::storage::{
    DeleteTarget, StorageAdapter, StorageError, StoredBlob, UploadOptions,
};

use crate::config::BucketConfig;

pub struct BucketAdapter {
    client: Client,
    base_url: String,
    api_key: String,
    bucket: String,
}

impl BucketAdapter {
    pub fn new(config: &BucketConfig) -> Self {
        Self {
            client: Client::builder()
                .timeout(std::time::Duration::from_secs(300))
                .build()
                .expect("Failed to build HTTP client"),
            base_url: config.api_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            bucket: config.bucket.clone(),
        }
    }

    fn object_url(&self, key: &str) -> String {
        format!("{}/object/{}/{}", self.base_url, self.bucket, key)
    }

    fn public_url(&self, key: &str) -> String {
        format!("{}/object/public/{}/{}", self.base_url, self.bucket, key)
    }

    async fn delete_key(&self, key: &str) -> Result<(), StorageError> {
        let resp = self
            .client
            .delete(self.object_url(key))
            .bearer_auth(&self.api_key)
            .send()
            .await?;

        if resp.status().as_u16() == 404 {
            debug!(key, "Bucket object already deleted");
            return Ok(());
        }
        if !resp.status().is_success() {
            return Err(error_for(resp).await);
        }
        debug!(key, "Bucket delete complete");
        Ok(())
    }

    async fn fetch(&self, key: &str) -> Result<Bytes, StorageError> {
        let resp = self
            .client
            .get(self.object_url(key))
            .bearer_auth(&self.api_key)
            .send()
            .await?;

        if resp.status().as_u16() == 404 {
            return Err(StorageError::NotFound(key.to_string()));
        }
        if !resp.status().is_success() {
            return Err(error_for(resp).await);
        }
        Ok(resp.bytes().await?)
    }
}

#[async_trait]
impl StorageAdapter for BucketAdapter {
    async fn upload(
        &self,
        data: Bytes,
        path: &VirtualPath,
        opts: &UploadOptions,
    ) -> Result<StoredBlob, StorageError> {
        let key = path.to_string();
        let content_type = opts
            .content_type
            .clone()
            .unwrap_or_else(|| "application/octet-stream".to_string());
        let size = data.len() as u64;

        let mut req = self
            .client
            .post(self.object_url(&key))
            .bearer_auth(&self.api_key)
            .header("Content-Type", &content_type);
        if let Some(ref cache_control) = opts.cache_control {
            req = req.header("Cache-Control", cache_control);
        }

        let resp = req.body(data).send().await?;
        if !resp.status().is_success() {
            return Err(error_for(resp).await);
        }
        debug!(key = %key, size, "Bucket upload complete");

        Ok(StoredBlob {
            public_url: self.public_url(&key),
            // A flat store has no separate native id; the key is the id.
            file_id: key.clone(),
            path: key,
            size,
            mime_type: content_type,
        })
    }

    async fn download(&self, path: &VirtualPath) -> Result<Bytes, StorageError> {
        self.fetch(&path.to_string()).await
    }

    async fn download_by_id(&self, file_id: &str) -> Result<Bytes, StorageError> {
        self.fetch(file_id).await
    }

    async fn delete(&self, target: &DeleteTarget) -> Result<(), StorageError> {
        match target {
            DeleteTarget::FileId(key) => self.delete_key(key).await,
            DeleteTarget::Path(path) => self.delete_key(&path.to_string()).await,
        }
    }

    async fn exists(&self, path: &VirtualPath) -> Result<bool, StorageError> {
        let resp = self
            .client
            .get(format!(
                "{}/object/info/{}/{}",
                self.base_url, self.bucket, path
            ))
            .bearer_auth(&self.api_key)
            .send()
            .await?;

        match resp.status().as_u16() {
            200 => Ok(true),
            404 => Ok(false),
            _ => Err(error_for(resp).await),
        }
    }
}

async fn error_for(resp: reqwest::Response) -> StorageError {
    let status = resp.status().as_u16();
    let message = resp.text().await.unwrap_or_default();
    match status {
        404 => StorageError::NotFound(message),
        429 => StorageError::Quota,
        _ => StorageError::Remote { status, message },
    }
}
