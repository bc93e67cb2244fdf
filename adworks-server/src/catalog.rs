//! Client for the external catalog service.
//!
//! The catalog is the relational index of categories, source artifacts and
//! generated composites. This client only touches the endpoints the
//! generation core needs; the catalog owns its schema.

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;

use adworks_common::records::{CategoryRecord, CompositeRecord, SourceImage};

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("catalog record not found: {0}")]
    NotFound(String),
    #[error("catalog error: HTTP {status} - {message}")]
    Service { status: u16, message: String },
}

#[derive(Debug, Deserialize)]
struct ItemsResponse {
    items: Vec<SourceImage>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: Option<String>,
    message: Option<String>,
}

/// Read/write surface the pipeline consumes. `CatalogClient` is the HTTP
/// implementation; tests substitute an in-memory catalog.
#[async_trait]
pub trait SourceCatalog: Send + Sync {
    async fn category(&self, id: &str) -> Result<CategoryRecord, CatalogError>;
    async fn list_shots(&self, category_id: &str) -> Result<Vec<SourceImage>, CatalogError>;
    async fn list_backgrounds(&self, category_id: &str) -> Result<Vec<SourceImage>, CatalogError>;
    async fn shot(&self, id: &str) -> Result<SourceImage, CatalogError>;
    async fn background(&self, id: &str) -> Result<SourceImage, CatalogError>;
    async fn insert_composite(&self, record: &CompositeRecord) -> Result<(), CatalogError>;
}

#[derive(Clone)]
pub struct CatalogClient {
    client: Client,
    base_url: String,
    api_key: String,
}

impl CatalogClient {
    pub fn new(base_url: &str, api_key: &str) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str, what: &str) -> Result<T, CatalogError> {
        let resp = self
            .client
            .get(format!("{}{}", self.base_url, path))
            .bearer_auth(&self.api_key)
            .send()
            .await?;

        match resp.status().as_u16() {
            200 => Ok(resp.json().await?),
            404 => Err(CatalogError::NotFound(what.to_string())),
            status => Err(CatalogError::Service {
                status,
                message: read_error(resp).await,
            }),
        }
    }
}

/// Pull a message out of a catalog error body, falling back to raw text.
async fn read_error(resp: reqwest::Response) -> String {
    let text = resp.text().await.unwrap_or_default();
    if let Ok(body) = serde_json::from_str::<ErrorBody>(&text) {
        if let Some(msg) = body.message.or(body.error) {
            return msg;
        }
    }
    text
}

#[async_trait]
impl SourceCatalog for CatalogClient {
    async fn category(&self, id: &str) -> Result<CategoryRecord, CatalogError> {
        self.get_json(
            &format!("/categories/{}", urlencoding::encode(id)),
            &format!("category {}", id),
        )
        .await
    }

    async fn list_shots(&self, category_id: &str) -> Result<Vec<SourceImage>, CatalogError> {
        let resp: ItemsResponse = self
            .get_json(
                &format!("/categories/{}/angled-shots", urlencoding::encode(category_id)),
                &format!("angled shots of category {}", category_id),
            )
            .await?;
        Ok(resp.items)
    }

    async fn list_backgrounds(&self, category_id: &str) -> Result<Vec<SourceImage>, CatalogError> {
        let resp: ItemsResponse = self
            .get_json(
                &format!("/categories/{}/backgrounds", urlencoding::encode(category_id)),
                &format!("backgrounds of category {}", category_id),
            )
            .await?;
        Ok(resp.items)
    }

    async fn shot(&self, id: &str) -> Result<SourceImage, CatalogError> {
        self.get_json(
            &format!("/angled-shots/{}", urlencoding::encode(id)),
            &format!("angled shot {}", id),
        )
        .await
    }

    async fn background(&self, id: &str) -> Result<SourceImage, CatalogError> {
        self.get_json(
            &format!("/backgrounds/{}", urlencoding::encode(id)),
            &format!("background {}", id),
        )
        .await
    }

    async fn insert_composite(&self, record: &CompositeRecord) -> Result<(), CatalogError> {
        let resp = self
            .client
            .post(format!("{}/composites", self.base_url))
            .bearer_auth(&self.api_key)
            .json(record)
            .send()
            .await?;

        match resp.status().as_u16() {
            200 | 201 => Ok(()),
            status => Err(CatalogError::Service {
                status,
                message: read_error(resp).await,
            }),
        }
    }
}
