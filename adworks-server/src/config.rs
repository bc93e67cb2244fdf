use serde::Deserialize;
use std::path::Path;

const DEFAULT_PORT: u16 = 8080;
const DEFAULT_MAX_ATTEMPTS: u32 = 2;
const DEFAULT_BASE_DELAY_MS: u64 = 500;
const DEFAULT_MAX_ITEMS: usize = 50;
const DEFAULT_WORKERS: usize = 4;

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    pub catalog: CatalogConfig,
    pub storage: StorageConfig,
    pub render: RenderConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CatalogConfig {
    pub url: String,
    pub api_key: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// "drive" (hierarchical folders) or "bucket" (flat keys).
    pub provider: String,
    #[serde(default)]
    pub drive: Option<DriveConfig>,
    #[serde(default)]
    pub bucket: Option<BucketConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DriveConfig {
    pub api_url: String,
    pub token: String,
    /// Folder every virtual path resolves under.
    pub root_folder_id: String,
    /// Base for derived public URLs; the native file id is appended.
    pub public_url_base: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BucketConfig {
    pub api_url: String,
    pub api_key: String,
    pub bucket: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RenderConfig {
    pub api_url: String,
    pub api_key: String,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    /// Hard ceiling on items per batch, enforced before any fan-out.
    #[serde(default = "default_max_items")]
    pub max_items: usize,
    #[serde(default = "default_workers")]
    pub workers: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_items: DEFAULT_MAX_ITEMS,
            workers: DEFAULT_WORKERS,
        }
    }
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

fn default_base_delay_ms() -> u64 {
    DEFAULT_BASE_DELAY_MS
}

fn default_max_items() -> usize {
    DEFAULT_MAX_ITEMS
}

fn default_workers() -> usize {
    DEFAULT_WORKERS
}

impl ServerConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read {}: {}", path.display(), e))?;
        let config: ServerConfig = toml::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Failed to parse {}: {}", path.display(), e))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.catalog.url.is_empty() {
            anyhow::bail!("catalog.url must not be empty");
        }
        if self.catalog.api_key.is_empty() {
            anyhow::bail!("catalog.api_key must not be empty");
        }
        match self.storage.provider.as_str() {
            "drive" => {
                let Some(ref drive) = self.storage.drive else {
                    anyhow::bail!("storage.provider is \"drive\" but [storage.drive] is missing");
                };
                if drive.api_url.is_empty() {
                    anyhow::bail!("storage.drive.api_url must not be empty");
                }
                if drive.token.is_empty() {
                    anyhow::bail!("storage.drive.token must not be empty");
                }
                if drive.root_folder_id.is_empty() {
                    anyhow::bail!("storage.drive.root_folder_id must not be empty");
                }
                if drive.public_url_base.is_empty() {
                    anyhow::bail!("storage.drive.public_url_base must not be empty");
                }
            }
            "bucket" => {
                let Some(ref bucket) = self.storage.bucket else {
                    anyhow::bail!("storage.provider is \"bucket\" but [storage.bucket] is missing");
                };
                if bucket.api_url.is_empty() {
                    anyhow::bail!("storage.bucket.api_url must not be empty");
                }
                if bucket.api_key.is_empty() {
                    anyhow::bail!("storage.bucket.api_key must not be empty");
                }
                if bucket.bucket.is_empty() {
                    anyhow::bail!("storage.bucket.bucket must not be empty");
                }
            }
            other => anyhow::bail!("Unknown storage provider: {}", other),
        }
        if self.render.api_url.is_empty() {
            anyhow::bail!("render.api_url must not be empty");
        }
        if self.render.max_attempts == 0 {
            anyhow::bail!("render.max_attempts must be at least 1");
        }
        if self.pipeline.max_items == 0 {
            anyhow::bail!("pipeline.max_items must be at least 1");
        }
        if self.pipeline.workers == 0 {
            anyhow::bail!("pipeline.workers must be at least 1");
        }
        Ok(())
    }
}
