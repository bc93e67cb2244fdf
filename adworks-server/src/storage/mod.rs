pub mod bucket;
pub mod drive;
pub mod folder_cache;

use std::sync::Arc;

use anyhow::bail;
use adworks_common::storage::StorageAdapter;

use crate::config::StorageConfig;

use self::bucket::BucketAdapter;
use self::drive::DriveAdapter;

/// Construct the storage provider selected by the config.
pub fn from_config(config: &StorageConfig) -> anyhow::Result<Arc<dyn StorageAdapter>> {
    match config.provider.as_str() {
        "drive" => {
            let Some(ref drive) = config.drive else {
                bail!("storage.provider is \"drive\" but [storage.drive] is missing");
            };
            Ok(Arc::new(DriveAdapter::new(drive)))
        }
        "bucket" => {
            let Some(ref bucket) = config.bucket else {
                bail!("storage.provider is \"bucket\" but [storage.bucket] is missing");
            };
            Ok(Arc::new(BucketAdapter::new(bucket)))
        }
        other => bail!("Unknown storage provider: {}", other),
    }
}
