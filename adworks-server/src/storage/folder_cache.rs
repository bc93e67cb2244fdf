//! Folder resolution cache for hierarchical stores.
//!
//! Maps `(parent folder id, child name)` to the child's native id so a
//! virtual path is walked against the remote store at most once per process.
//! Entries are append-only for the cache's lifetime; the remote hierarchy is
//! assumed stable while the server runs, so there is no invalidation.
//!
//! Resolution is single-flight: concurrent callers for the same key queue on
//! a per-key gate and exactly one of them performs the remote find-or-create.
//! Without this, two concurrent uploads into a brand-new subfolder would race
//! to create two identically-named folders in the remote store.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use adworks_common::storage::StorageError;

/// Remote folder operations the cache resolves against.
#[async_trait]
pub trait FolderOps: Send + Sync {
    /// Look up a child folder by name under `parent_id`.
    async fn find_folder(&self, parent_id: &str, name: &str)
        -> Result<Option<String>, StorageError>;

    /// Create a child folder under `parent_id` and return its id.
    async fn create_folder(&self, parent_id: &str, name: &str) -> Result<String, StorageError>;
}

type FolderKey = (String, String);

pub struct FolderCache {
    resolved: Mutex<HashMap<FolderKey, String>>,
    inflight: tokio::sync::Mutex<HashMap<FolderKey, Arc<tokio::sync::Mutex<()>>>>,
}

impl FolderCache {
    pub fn new() -> Self {
        Self {
            resolved: Mutex::new(HashMap::new()),
            inflight: tokio::sync::Mutex::new(HashMap::new()),
        }
    }

    /// Resolve the id of the folder `name` under `parent_id`, creating it
    /// remotely if it does not exist.
    ///
    /// Map accesses hold their lock only for the O(1) operation; the remote
    /// call runs outside both locks, serialized per key by the gate. Failures
    /// drop the gate without populating the cache, so a later call retries
    /// from scratch. Unrelated keys resolve fully concurrently.
    pub async fn resolve(
        &self,
        ops: &dyn FolderOps,
        parent_id: &str,
        name: &str,
    ) -> Result<String, StorageError> {
        let key = (parent_id.to_string(), name.to_string());
        loop {
            if let Some(id) = self.peek_key(&key) {
                return Ok(id);
            }

            let gate = {
                let mut inflight = self.inflight.lock().await;
                Arc::clone(
                    inflight
                        .entry(key.clone())
                        .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(()))),
                )
            };
            let _guard = gate.lock().await;

            // Re-check after the wait: the resolver we queued behind may have
            // populated the cache while we held a clone of its gate.
            if let Some(id) = self.peek_key(&key) {
                return Ok(id);
            }

            // If the gate was dropped (previous resolver failed), ours is
            // stale; start over so retries funnel through the live gate.
            {
                let inflight = self.inflight.lock().await;
                if !inflight.get(&key).is_some_and(|g| Arc::ptr_eq(g, &gate)) {
                    continue;
                }
            }

            let outcome = match ops.find_folder(parent_id, name).await {
                Ok(Some(id)) => Ok(id),
                Ok(None) => ops.create_folder(parent_id, name).await,
                Err(e) => Err(e),
            };

            if let Ok(ref id) = outcome {
                self.resolved
                    .lock()
                    .unwrap()
                    .insert(key.clone(), id.clone());
            }
            self.inflight.lock().await.remove(&key);
            return outcome;
        }
    }

    /// Cache-only lookup; never touches the remote store.
    pub fn peek(&self, parent_id: &str, name: &str) -> Option<String> {
        self.peek_key(&(parent_id.to_string(), name.to_string()))
    }

    /// Record a mapping discovered outside `resolve` (e.g. a read-only walk).
    pub fn store(&self, parent_id: &str, name: &str, folder_id: &str) {
        self.resolved.lock().unwrap().insert(
            (parent_id.to_string(), name.to_string()),
            folder_id.to_string(),
        );
    }

    fn peek_key(&self, key: &FolderKey) -> Option<String> {
        self.resolved.lock().unwrap().get(key).cloned()
    }
}
