use std::sync::Arc;
use std::time::Instant;

use adworks_common::storage::StorageAdapter;

use crate::catalog::SourceCatalog;
use crate::config::ServerConfig;
use crate::genai::GenerationClient;
use crate::pipeline::BatchPipeline;

/// Shared application state
pub struct AppState {
    pub catalog: Arc<dyn SourceCatalog>,
    pub storage: Arc<dyn StorageAdapter>,
    pub pipeline: BatchPipeline,
    /// Server startup time for uptime calculation
    pub started_at: Instant,
}

impl AppState {
    pub fn new(
        catalog: Arc<dyn SourceCatalog>,
        storage: Arc<dyn StorageAdapter>,
        generator: Arc<GenerationClient>,
        config: &ServerConfig,
    ) -> Self {
        let pipeline = BatchPipeline::new(
            Arc::clone(&catalog),
            Arc::clone(&storage),
            generator,
            config.pipeline.max_items,
            config.pipeline.workers,
        );
        Self {
            catalog,
            storage,
            pipeline,
            started_at: Instant::now(),
        }
    }
}
