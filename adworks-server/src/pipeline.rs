//! Batch composite generation pipeline.
//!
//! Expands a batch request into (shot, background) work items, validates the
//! working-set size against a hard ceiling before any fan-out, then runs the
//! items on a bounded worker pool. Every item is isolated: its failures fold
//! into the report instead of aborting the batch, and side effects of items
//! that already completed (uploaded blobs, catalog rows) are never rolled
//! back.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio::sync::Semaphore;
use tracing::{info, warn};
use uuid::Uuid;

use adworks_common::path::{PathError, VirtualPath};
use adworks_common::records::{CategoryRecord, CompositeRecord, SourceImage};
use adworks_common::storage::{StorageAdapter, StorageError, UploadOptions};

use crate::catalog::{CatalogError, SourceCatalog};
use crate::genai::{FallbackMode, GenerationClient, GenerationError, RenderSource};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourcePair {
    pub shot_id: String,
    pub background_id: String,
}

#[derive(Debug, Clone)]
pub enum BatchMode {
    /// Full cartesian product of the category's shots and backgrounds.
    AllCombinations,
    /// Exactly the caller-supplied pairs.
    Selected(Vec<SourcePair>),
}

#[derive(Debug, Clone)]
pub struct BatchSpec {
    pub mode: BatchMode,
    pub instructions: Option<String>,
    pub fallback: FallbackMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStage {
    Fetch,
    Generate,
    Upload,
    Persist,
}

/// Terminal state of one item. `FallenBack` is a success whose payload is
/// the original shot image rather than a true render.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum ItemStatus {
    Succeeded,
    FallenBack,
    Failed { stage: ItemStage, reason: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct ItemResult {
    pub shot_id: String,
    pub background_id: String,
    #[serde(flatten)]
    pub status: ItemStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload_ref: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_id: Option<String>,
}

impl ItemResult {
    pub fn is_success(&self) -> bool {
        matches!(self.status, ItemStatus::Succeeded | ItemStatus::FallenBack)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub results: Vec<ItemResult>,
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("{0}")]
    Validation(String),
    #[error("category not found: {0}")]
    CategoryNotFound(String),
    #[error(transparent)]
    Catalog(#[from] CatalogError),
}

pub struct BatchPipeline {
    catalog: Arc<dyn SourceCatalog>,
    storage: Arc<dyn StorageAdapter>,
    generator: Arc<GenerationClient>,
    max_items: usize,
    workers: usize,
}

/// Everything an item worker needs, shared across the batch.
struct ItemContext {
    catalog: Arc<dyn SourceCatalog>,
    storage: Arc<dyn StorageAdapter>,
    generator: Arc<GenerationClient>,
    category: CategoryRecord,
    instructions: String,
    fallback: FallbackMode,
    /// Set by the first item to hit a quota error; items that have not
    /// started yet fail fast instead of burning further calls.
    quota_hit: AtomicBool,
}

impl BatchPipeline {
    pub fn new(
        catalog: Arc<dyn SourceCatalog>,
        storage: Arc<dyn StorageAdapter>,
        generator: Arc<GenerationClient>,
        max_items: usize,
        workers: usize,
    ) -> Self {
        Self {
            catalog,
            storage,
            generator,
            max_items,
            workers: workers.max(1),
        }
    }

    pub async fn run(
        &self,
        category_id: &str,
        spec: BatchSpec,
    ) -> Result<BatchReport, PipelineError> {
        // Selected-mode size checks come first so an oversized or empty
        // request is rejected before any network activity.
        if let BatchMode::Selected(ref pairs) = spec.mode {
            if pairs.is_empty() {
                return Err(PipelineError::Validation(
                    "no source pairs requested".to_string(),
                ));
            }
            if pairs.len() > self.max_items {
                return Err(PipelineError::Validation(format!(
                    "batch of {} items exceeds the {} item ceiling",
                    pairs.len(),
                    self.max_items,
                )));
            }
        }

        let category = match self.catalog.category(category_id).await {
            Ok(c) => c,
            Err(CatalogError::NotFound(_)) => {
                return Err(PipelineError::CategoryNotFound(category_id.to_string()));
            }
            Err(e) => return Err(e.into()),
        };

        let pairs = match spec.mode {
            BatchMode::Selected(pairs) => pairs,
            BatchMode::AllCombinations => {
                let shots = self.catalog.list_shots(category_id).await?;
                let backgrounds = self.catalog.list_backgrounds(category_id).await?;
                if shots.is_empty() {
                    return Err(PipelineError::Validation(
                        "category has no angled shots".to_string(),
                    ));
                }
                if backgrounds.is_empty() {
                    return Err(PipelineError::Validation(
                        "category has no backgrounds".to_string(),
                    ));
                }
                let mut pairs = Vec::with_capacity(shots.len() * backgrounds.len());
                for shot in &shots {
                    for background in &backgrounds {
                        pairs.push(SourcePair {
                            shot_id: shot.id.clone(),
                            background_id: background.id.clone(),
                        });
                    }
                }
                info!(
                    category = %category.slug,
                    shots = shots.len(),
                    backgrounds = backgrounds.len(),
                    total = pairs.len(),
                    "Expanded all-combinations batch"
                );
                pairs
            }
        };

        if pairs.len() > self.max_items {
            return Err(PipelineError::Validation(format!(
                "batch of {} items exceeds the {} item ceiling",
                pairs.len(),
                self.max_items,
            )));
        }

        let attempted = pairs.len();
        let context = Arc::new(ItemContext {
            catalog: Arc::clone(&self.catalog),
            storage: Arc::clone(&self.storage),
            generator: Arc::clone(&self.generator),
            category,
            instructions: spec.instructions.unwrap_or_default(),
            fallback: spec.fallback,
            quota_hit: AtomicBool::new(false),
        });
        let semaphore = Arc::new(Semaphore::new(self.workers));

        let mut handles = Vec::with_capacity(attempted);
        for pair in &pairs {
            let pair = pair.clone();
            let context = Arc::clone(&context);
            let semaphore = Arc::clone(&semaphore);
            handles.push(tokio::spawn(async move {
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => return failed(&pair, ItemStage::Fetch, "worker pool closed"),
                };
                run_item(&context, &pair).await
            }));
        }

        let mut results = Vec::with_capacity(attempted);
        for (handle, pair) in handles.into_iter().zip(pairs) {
            match handle.await {
                Ok(result) => results.push(result),
                Err(e) => {
                    warn!(error = %e, "Batch item worker aborted");
                    results.push(failed(&pair, ItemStage::Fetch, "item worker aborted"));
                }
            }
        }

        let succeeded = results.iter().filter(|r| r.is_success()).count();
        let report = BatchReport {
            attempted,
            succeeded,
            failed: attempted - succeeded,
            results,
        };
        info!(
            attempted = report.attempted,
            succeeded = report.succeeded,
            failed = report.failed,
            "Batch complete"
        );
        Ok(report)
    }
}

/// Run one item to a terminal state: fetch both sources, render, store the
/// payload, record it in the catalog. Errors never escape; they become
/// `Failed` results tagged with the stage that broke.
async fn run_item(context: &ItemContext, pair: &SourcePair) -> ItemResult {
    if context.quota_hit.load(Ordering::SeqCst) {
        return failed(
            pair,
            ItemStage::Generate,
            "render quota exhausted earlier in this batch",
        );
    }

    let shot = match context.catalog.shot(&pair.shot_id).await {
        Ok(record) => record,
        Err(e) => return failed(pair, ItemStage::Fetch, e.to_string()),
    };
    let background = match context.catalog.background(&pair.background_id).await {
        Ok(record) => record,
        Err(e) => return failed(pair, ItemStage::Fetch, e.to_string()),
    };

    let shot_bytes = match fetch_source(context.storage.as_ref(), &shot).await {
        Ok(bytes) => bytes,
        Err(e) => {
            return failed(
                pair,
                ItemStage::Fetch,
                format!("angled shot {}: {}", shot.id, e),
            );
        }
    };
    let background_bytes = match fetch_source(context.storage.as_ref(), &background).await {
        Ok(bytes) => bytes,
        Err(e) => {
            return failed(
                pair,
                ItemStage::Fetch,
                format!("background {}: {}", background.id, e),
            );
        }
    };

    let sources = [
        RenderSource {
            data: shot_bytes,
            mime_type: source_mime(&shot),
        },
        RenderSource {
            data: background_bytes,
            mime_type: source_mime(&background),
        },
    ];
    let output = match context
        .generator
        .generate(&sources, &context.instructions, context.fallback)
        .await
    {
        Ok(output) => output,
        Err(e) => {
            if matches!(e, GenerationError::Quota) {
                context.quota_hit.store(true, Ordering::SeqCst);
            }
            return failed(pair, ItemStage::Generate, e.to_string());
        }
    };

    let path = match composite_path(&context.category.slug, pair, &output.mime_type) {
        Ok(path) => path,
        Err(e) => return failed(pair, ItemStage::Upload, e.to_string()),
    };
    let checksum = hex::encode(Sha256::digest(&output.data));
    let size = output.data.len() as u64;
    let opts = UploadOptions {
        content_type: Some(output.mime_type.clone()),
        cache_control: None,
    };
    let blob = match context.storage.upload(output.data.clone(), &path, &opts).await {
        Ok(blob) => blob,
        Err(e) => return failed(pair, ItemStage::Upload, e.to_string()),
    };

    let record = CompositeRecord {
        id: CompositeRecord::new_id(),
        category_id: context.category.id.clone(),
        shot_id: pair.shot_id.clone(),
        background_id: pair.background_id.clone(),
        storage_path: blob.path.clone(),
        storage_url: blob.public_url.clone(),
        file_id: blob.file_id.clone(),
        mime_type: output.mime_type.clone(),
        size,
        checksum,
        fallback: output.used_fallback,
        created_at: chrono::Utc::now(),
    };
    if let Err(e) = context.catalog.insert_composite(&record).await {
        return failed(pair, ItemStage::Persist, e.to_string());
    }

    info!(
        shot = %pair.shot_id,
        background = %pair.background_id,
        file_id = %blob.file_id,
        fallback = output.used_fallback,
        "Composite stored"
    );
    ItemResult {
        shot_id: pair.shot_id.clone(),
        background_id: pair.background_id.clone(),
        status: if output.used_fallback {
            ItemStatus::FallenBack
        } else {
            ItemStatus::Succeeded
        },
        payload_ref: Some(blob.public_url),
        file_id: Some(blob.file_id),
    }
}

/// Download a source's bytes, preferring the id-based fast path when the
/// record carries a native file id.
async fn fetch_source(
    storage: &dyn StorageAdapter,
    source: &SourceImage,
) -> Result<Bytes, StorageError> {
    if let Some(ref file_id) = source.file_id {
        return storage.download_by_id(file_id).await;
    }
    if let Some(ref raw) = source.storage_path {
        let path = VirtualPath::parse(raw)?;
        return storage.download(&path).await;
    }
    Err(StorageError::NotFound(format!(
        "source {} has no storage location",
        source.id,
    )))
}

fn source_mime(source: &SourceImage) -> String {
    source
        .mime_type
        .clone()
        .unwrap_or_else(|| "image/jpeg".to_string())
}

/// Storage path for a generated composite:
/// `{category-slug}/composites/{shot}x{background}-{suffix}.{ext}`.
fn composite_path(
    slug: &str,
    pair: &SourcePair,
    mime_type: &str,
) -> Result<VirtualPath, PathError> {
    let suffix = Uuid::new_v4().simple().to_string();
    let name = format!(
        "{}x{}-{}.{}",
        pair.shot_id,
        pair.background_id,
        &suffix[..8],
        extension_for(mime_type),
    );
    VirtualPath::parse(&format!("{}/composites/{}", slug, name))
}

fn extension_for(mime_type: &str) -> &'static str {
    match mime_type {
        "image/png" => "png",
        "image/webp" => "webp",
        "image/gif" => "gif",
        _ => "jpg",
    }
}

fn failed(pair: &SourcePair, stage: ItemStage, reason: impl Into<String>) -> ItemResult {
    let reason = reason.into();
    warn!(
        shot = %pair.shot_id,
        background = %pair.background_id,
        stage = ?stage,
        %reason,
        "Batch item failed"
    );
    ItemResult {
        shot_id: pair.shot_id.clone(),
        background_id: pair.background_id.clone(),
        status: ItemStatus::Failed { stage, reason },
        payload_ref: None,
        file_id: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;

    use adworks_common::storage::{DeleteTarget, StoredBlob};

    use crate::genai::{GenerationError, RenderBackend, RenderedImage};

    struct MockCatalog {
        category: CategoryRecord,
        shots: Vec<SourceImage>,
        backgrounds: Vec<SourceImage>,
        inserted: Mutex<Vec<CompositeRecord>>,
        calls: AtomicUsize,
    }

    impl MockCatalog {
        fn new(shots: Vec<SourceImage>, backgrounds: Vec<SourceImage>) -> Self {
            Self {
                category: CategoryRecord {
                    id: "cat-1".to_string(),
                    name: "Acme".to_string(),
                    slug: "acme".to_string(),
                    look_and_feel: None,
                },
                shots,
                backgrounds,
                inserted: Mutex::new(Vec::new()),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl SourceCatalog for MockCatalog {
        async fn category(&self, id: &str) -> Result<CategoryRecord, CatalogError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if id == self.category.id {
                Ok(self.category.clone())
            } else {
                Err(CatalogError::NotFound(id.to_string()))
            }
        }

        async fn list_shots(&self, _category_id: &str) -> Result<Vec<SourceImage>, CatalogError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.shots.clone())
        }

        async fn list_backgrounds(
            &self,
            _category_id: &str,
        ) -> Result<Vec<SourceImage>, CatalogError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.backgrounds.clone())
        }

        async fn shot(&self, id: &str) -> Result<SourceImage, CatalogError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.shots
                .iter()
                .find(|s| s.id == id)
                .cloned()
                .ok_or_else(|| CatalogError::NotFound(id.to_string()))
        }

        async fn background(&self, id: &str) -> Result<SourceImage, CatalogError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.backgrounds
                .iter()
                .find(|s| s.id == id)
                .cloned()
                .ok_or_else(|| CatalogError::NotFound(id.to_string()))
        }

        async fn insert_composite(&self, record: &CompositeRecord) -> Result<(), CatalogError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inserted.lock().unwrap().push(record.clone());
            Ok(())
        }
    }

    struct MockStorage {
        blobs: Mutex<HashMap<String, Bytes>>,
        uploads: AtomicUsize,
    }

    impl MockStorage {
        fn with_sources(sources: &[(&str, &'static [u8])]) -> Self {
            let blobs = sources
                .iter()
                .map(|(id, data)| (id.to_string(), Bytes::from_static(data)))
                .collect();
            Self {
                blobs: Mutex::new(blobs),
                uploads: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl StorageAdapter for MockStorage {
        async fn upload(
            &self,
            data: Bytes,
            path: &VirtualPath,
            opts: &UploadOptions,
        ) -> Result<StoredBlob, StorageError> {
            let n = self.uploads.fetch_add(1, Ordering::SeqCst);
            let file_id = format!("stored-{}", n + 1);
            let size = data.len() as u64;
            self.blobs.lock().unwrap().insert(file_id.clone(), data);
            Ok(StoredBlob {
                path: path.to_string(),
                public_url: format!("https://cdn.test/{}", file_id),
                file_id,
                size,
                mime_type: opts
                    .content_type
                    .clone()
                    .unwrap_or_else(|| "application/octet-stream".to_string()),
            })
        }

        async fn download(&self, path: &VirtualPath) -> Result<Bytes, StorageError> {
            Err(StorageError::NotFound(path.to_string()))
        }

        async fn download_by_id(&self, file_id: &str) -> Result<Bytes, StorageError> {
            self.blobs
                .lock()
                .unwrap()
                .get(file_id)
                .cloned()
                .ok_or_else(|| StorageError::NotFound(file_id.to_string()))
        }

        async fn delete(&self, _target: &DeleteTarget) -> Result<(), StorageError> {
            Ok(())
        }

        async fn exists(&self, _path: &VirtualPath) -> Result<bool, StorageError> {
            Ok(false)
        }
    }

    /// Render backend scripted by the first source's bytes.
    struct ScriptedBackend {
        fail_for: Option<&'static [u8]>,
        always_fail: bool,
        quota: bool,
        calls: AtomicUsize,
    }

    impl ScriptedBackend {
        fn ok() -> Self {
            Self {
                fail_for: None,
                always_fail: false,
                quota: false,
                calls: AtomicUsize::new(0),
            }
        }

        fn failing_for(data: &'static [u8]) -> Self {
            Self {
                fail_for: Some(data),
                ..Self::ok()
            }
        }

        fn always_failing() -> Self {
            Self {
                always_fail: true,
                ..Self::ok()
            }
        }

        fn quota() -> Self {
            Self {
                quota: true,
                ..Self::ok()
            }
        }
    }

    #[async_trait]
    impl RenderBackend for ScriptedBackend {
        async fn render(
            &self,
            sources: &[RenderSource],
            _instructions: &str,
        ) -> Result<RenderedImage, GenerationError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.quota {
                return Err(GenerationError::Quota);
            }
            let should_fail = self.always_fail
                || self
                    .fail_for
                    .is_some_and(|data| sources[0].data.as_ref() == data);
            if should_fail {
                return Err(GenerationError::Service {
                    status: 503,
                    message: "render overloaded".to_string(),
                });
            }
            Ok(RenderedImage {
                data: Bytes::from_static(b"rendered-output"),
                mime_type: "image/png".to_string(),
            })
        }
    }

    fn source(id: &str, file_id: &str) -> SourceImage {
        SourceImage {
            id: id.to_string(),
            name: id.to_string(),
            file_id: Some(file_id.to_string()),
            storage_path: None,
            mime_type: Some("image/jpeg".to_string()),
        }
    }

    fn pipeline(
        catalog: Arc<MockCatalog>,
        storage: Arc<MockStorage>,
        backend: Arc<ScriptedBackend>,
        workers: usize,
    ) -> BatchPipeline {
        let generator = Arc::new(GenerationClient::new(
            backend,
            2,
            Duration::from_millis(1),
        ));
        BatchPipeline::new(catalog, storage, generator, 50, workers)
    }

    fn all_combinations(fallback: FallbackMode) -> BatchSpec {
        BatchSpec {
            mode: BatchMode::AllCombinations,
            instructions: None,
            fallback,
        }
    }

    #[tokio::test]
    async fn test_all_combinations_attempts_full_product() {
        let catalog = Arc::new(MockCatalog::new(
            vec![
                source("s1", "blob-s1"),
                source("s2", "blob-s2"),
                source("s3", "blob-s3"),
            ],
            vec![source("b1", "blob-b1"), source("b2", "blob-b2")],
        ));
        let storage = Arc::new(MockStorage::with_sources(&[
            ("blob-s1", b"s1"),
            ("blob-s2", b"s2"),
            ("blob-s3", b"s3"),
            ("blob-b1", b"b1"),
            ("blob-b2", b"b2"),
        ]));
        let backend = Arc::new(ScriptedBackend::ok());
        let pipeline = pipeline(Arc::clone(&catalog), storage, backend, 4);

        let report = pipeline
            .run("cat-1", all_combinations(FallbackMode::Propagate))
            .await
            .unwrap();

        assert_eq!(report.attempted, 6);
        assert_eq!(report.succeeded, 6);
        assert_eq!(report.failed, 0);
        assert_eq!(report.results.len(), 6);
        assert_eq!(catalog.inserted.lock().unwrap().len(), 6);
    }

    #[tokio::test]
    async fn test_selected_over_ceiling_rejected_before_any_network() {
        let catalog = Arc::new(MockCatalog::new(vec![], vec![]));
        let storage = Arc::new(MockStorage::with_sources(&[]));
        let backend = Arc::new(ScriptedBackend::ok());
        let pipeline = pipeline(
            Arc::clone(&catalog),
            Arc::clone(&storage),
            Arc::clone(&backend),
            4,
        );

        let pairs: Vec<SourcePair> = (0..51)
            .map(|i| SourcePair {
                shot_id: format!("s{}", i),
                background_id: "b1".to_string(),
            })
            .collect();
        let spec = BatchSpec {
            mode: BatchMode::Selected(pairs),
            instructions: None,
            fallback: FallbackMode::Propagate,
        };

        let err = pipeline.run("cat-1", spec).await.unwrap_err();
        assert!(matches!(err, PipelineError::Validation(_)));
        assert_eq!(catalog.calls.load(Ordering::SeqCst), 0);
        assert_eq!(storage.uploads.load(Ordering::SeqCst), 0);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_empty_selected_rejected() {
        let catalog = Arc::new(MockCatalog::new(vec![], vec![]));
        let storage = Arc::new(MockStorage::with_sources(&[]));
        let backend = Arc::new(ScriptedBackend::ok());
        let pipeline = pipeline(Arc::clone(&catalog), storage, backend, 4);

        let spec = BatchSpec {
            mode: BatchMode::Selected(Vec::new()),
            instructions: None,
            fallback: FallbackMode::Propagate,
        };
        let err = pipeline.run("cat-1", spec).await.unwrap_err();
        assert!(matches!(err, PipelineError::Validation(_)));
        assert_eq!(catalog.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_single_item_failure_does_not_affect_siblings() {
        let shots: Vec<SourceImage> = (1..=6)
            .map(|i| source(&format!("s{}", i), &format!("blob-s{}", i)))
            .collect();
        let catalog = Arc::new(MockCatalog::new(shots, vec![source("b1", "blob-b1")]));
        let storage = Arc::new(MockStorage::with_sources(&[
            ("blob-s1", b"s1"),
            ("blob-s2", b"s2"),
            ("blob-s3", b"s3"),
            ("blob-s4", b"s4"),
            ("blob-s5", b"s5"),
            ("blob-s6", b"s6"),
            ("blob-b1", b"b1"),
        ]));
        // Renders of shot s3 always fail; fallback disabled for the batch.
        let backend = Arc::new(ScriptedBackend::failing_for(b"s3"));
        let pipeline = pipeline(Arc::clone(&catalog), storage, backend, 4);

        let report = pipeline
            .run("cat-1", all_combinations(FallbackMode::Propagate))
            .await
            .unwrap();

        assert_eq!(report.attempted, 6);
        assert_eq!(report.succeeded, 5);
        assert_eq!(report.failed, 1);

        let failures: Vec<&ItemResult> =
            report.results.iter().filter(|r| !r.is_success()).collect();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].shot_id, "s3");
        assert!(matches!(
            failures[0].status,
            ItemStatus::Failed {
                stage: ItemStage::Generate,
                ..
            }
        ));
        assert_eq!(catalog.inserted.lock().unwrap().len(), 5);
    }

    #[tokio::test]
    async fn test_fallback_stores_original_shot_bytes() {
        let catalog = Arc::new(MockCatalog::new(
            vec![source("s1", "blob-s1")],
            vec![source("b1", "blob-b1")],
        ));
        let storage = Arc::new(MockStorage::with_sources(&[
            ("blob-s1", b"shot-pixels"),
            ("blob-b1", b"background-pixels"),
        ]));
        let backend = Arc::new(ScriptedBackend::always_failing());
        let pipeline = pipeline(
            Arc::clone(&catalog),
            Arc::clone(&storage),
            backend,
            4,
        );

        let report = pipeline
            .run("cat-1", all_combinations(FallbackMode::UseFirstSource))
            .await
            .unwrap();

        assert_eq!(report.attempted, 1);
        assert_eq!(report.succeeded, 1);
        assert_eq!(report.results[0].status, ItemStatus::FallenBack);

        let stored = storage
            .blobs
            .lock()
            .unwrap()
            .get("stored-1")
            .cloned()
            .unwrap();
        assert_eq!(stored.as_ref(), b"shot-pixels");

        let inserted = catalog.inserted.lock().unwrap();
        assert_eq!(inserted.len(), 1);
        assert!(inserted[0].fallback);
    }

    #[tokio::test]
    async fn test_quota_error_short_circuits_remaining_items() {
        let shots: Vec<SourceImage> = (1..=4)
            .map(|i| source(&format!("s{}", i), &format!("blob-s{}", i)))
            .collect();
        let catalog = Arc::new(MockCatalog::new(shots, vec![source("b1", "blob-b1")]));
        let storage = Arc::new(MockStorage::with_sources(&[
            ("blob-s1", b"s1"),
            ("blob-s2", b"s2"),
            ("blob-s3", b"s3"),
            ("blob-s4", b"s4"),
            ("blob-b1", b"b1"),
        ]));
        let backend = Arc::new(ScriptedBackend::quota());
        // One worker: the first item hits the quota error before any sibling
        // starts, so the flag short-circuits everything behind it.
        let pipeline = pipeline(Arc::clone(&catalog), storage, Arc::clone(&backend), 1);

        let report = pipeline
            .run("cat-1", all_combinations(FallbackMode::UseFirstSource))
            .await
            .unwrap();

        assert_eq!(report.attempted, 4);
        assert_eq!(report.failed, 4);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
        for result in &report.results {
            match &result.status {
                ItemStatus::Failed { reason, .. } => assert!(reason.contains("quota")),
                other => panic!("expected failure, got {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn test_missing_source_record_fails_at_fetch() {
        let catalog = Arc::new(MockCatalog::new(
            vec![source("s1", "blob-s1")],
            vec![source("b1", "blob-b1")],
        ));
        let storage = Arc::new(MockStorage::with_sources(&[
            ("blob-s1", b"s1"),
            ("blob-b1", b"b1"),
        ]));
        let backend = Arc::new(ScriptedBackend::ok());
        let pipeline = pipeline(Arc::clone(&catalog), storage, backend, 4);

        let spec = BatchSpec {
            mode: BatchMode::Selected(vec![
                SourcePair {
                    shot_id: "s1".to_string(),
                    background_id: "b1".to_string(),
                },
                SourcePair {
                    shot_id: "missing".to_string(),
                    background_id: "b1".to_string(),
                },
            ]),
            instructions: None,
            fallback: FallbackMode::Propagate,
        };
        let report = pipeline.run("cat-1", spec).await.unwrap();

        assert_eq!(report.attempted, 2);
        assert_eq!(report.succeeded, 1);
        assert_eq!(report.failed, 1);
        let failure = report.results.iter().find(|r| !r.is_success()).unwrap();
        assert!(matches!(
            failure.status,
            ItemStatus::Failed {
                stage: ItemStage::Fetch,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_unknown_category_is_not_found() {
        let catalog = Arc::new(MockCatalog::new(vec![], vec![]));
        let storage = Arc::new(MockStorage::with_sources(&[]));
        let backend = Arc::new(ScriptedBackend::ok());
        let pipeline = pipeline(Arc::clone(&catalog), storage, backend, 4);

        let err = pipeline
            .run("nope", all_combinations(FallbackMode::Propagate))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::CategoryNotFound(_)));
    }

    #[test]
    fn test_item_result_serialization() {
        let ok = ItemResult {
            shot_id: "s1".to_string(),
            background_id: "b1".to_string(),
            status: ItemStatus::FallenBack,
            payload_ref: Some("https://cdn.test/stored-1".to_string()),
            file_id: Some("stored-1".to_string()),
        };
        let json = serde_json::to_value(&ok).unwrap();
        assert_eq!(json["status"], "fallen_back");
        assert_eq!(json["payload_ref"], "https://cdn.test/stored-1");

        let bad = ItemResult {
            shot_id: "s1".to_string(),
            background_id: "b1".to_string(),
            status: ItemStatus::Failed {
                stage: ItemStage::Upload,
                reason: "boom".to_string(),
            },
            payload_ref: None,
            file_id: None,
        };
        let json = serde_json::to_value(&bad).unwrap();
        assert_eq!(json["status"], "failed");
        assert_eq!(json["stage"], "upload");
        assert_eq!(json["reason"], "boom");
        assert!(json.get("payload_ref").is_none());
    }

    #[test]
    fn test_composite_path_shape() {
        let pair = SourcePair {
            shot_id: "s1".to_string(),
            background_id: "b2".to_string(),
        };
        let path = composite_path("acme", &pair, "image/png").unwrap();
        assert_eq!(path.folders(), &["acme", "composites"]);
        assert!(path.file_name().starts_with("s1xb2-"));
        assert!(path.file_name().ends_with(".png"));
    }
}
