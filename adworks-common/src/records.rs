//! Record shapes exchanged with the external catalog service.
//!
//! The catalog owns the schema; these are only the fields the generation
//! core reads and writes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A category groups products and their generated artifacts. The `slug` is
/// the root segment of every virtual path in the category's storage tree.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CategoryRecord {
    pub id: String,
    pub name: String,
    pub slug: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub look_and_feel: Option<String>,
}

/// A source artifact (angled shot or background) as read from the catalog.
/// At least one of `file_id` / `storage_path` locates the bytes; records
/// that carry the native id allow the fast id-based download path.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SourceImage {
    pub id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

impl SourceImage {
    pub fn has_location(&self) -> bool {
        self.file_id.is_some() || self.storage_path.is_some()
    }
}

/// One generated composite, inserted into the catalog after its payload is
/// stored. `fallback` marks a degraded stand-in (the original shot bytes)
/// rather than a true render.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CompositeRecord {
    pub id: String,
    pub category_id: String,
    pub shot_id: String,
    pub background_id: String,
    pub storage_path: String,
    pub storage_url: String,
    pub file_id: String,
    pub mime_type: String,
    pub size: u64,
    pub checksum: String,
    pub fallback: bool,
    pub created_at: DateTime<Utc>,
}

impl CompositeRecord {
    pub fn new_id() -> String {
        format!("composite::{}", Uuid::new_v4())
    }

    pub fn uuid_from_id(id: &str) -> Option<&str> {
        id.strip_prefix("composite::")
    }
}
