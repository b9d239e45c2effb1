//! Backend factory and the store handle threaded through request handling.

use std::sync::Arc;

use tokio::sync::OnceCell;
use tracing::{info, warn};

use crate::blobs::BlobStore;
use crate::config::{BlobBackendConfig, RecordBackendConfig, StorageConfig};
use crate::cosmos::CosmosRecordStore;
use crate::error::{StoreError, StoreResult};
use crate::memory::{MemoryBlobStore, MemoryRecordStore};
use crate::model::{Record, RecordPatch};
use crate::records::RecordStore;
use crate::s3::S3BlobStore;

/// Constructs the record store selected by `config`.
pub fn build_record_store(config: &RecordBackendConfig) -> StoreResult<Arc<dyn RecordStore>> {
    Ok(match config {
        RecordBackendConfig::Memory => Arc::new(MemoryRecordStore::new()),
        RecordBackendConfig::Cosmos(cosmos) => Arc::new(CosmosRecordStore::new(cosmos.clone())?),
    })
}

/// Constructs the blob store selected by `config`.
pub fn build_blob_store(config: &BlobBackendConfig) -> StoreResult<Arc<dyn BlobStore>> {
    Ok(match config {
        BlobBackendConfig::Memory => Arc::new(MemoryBlobStore::new()),
        BlobBackendConfig::S3(s3) => Arc::new(S3BlobStore::new(s3.clone())?),
    })
}

/// Builds each store at most once and hands out shared handles afterwards.
///
/// Owned by the process entry point; concurrent first callers wait on the
/// same construction instead of racing.
pub struct StoreResolver {
    config: StorageConfig,
    records: OnceCell<Arc<dyn RecordStore>>,
    blobs: OnceCell<Arc<dyn BlobStore>>,
}

impl StoreResolver {
    pub fn new(config: StorageConfig) -> Self {
        Self {
            config,
            records: OnceCell::new(),
            blobs: OnceCell::new(),
        }
    }

    pub fn from_env() -> StoreResult<Self> {
        Ok(Self::new(StorageConfig::from_env()?))
    }

    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    pub async fn record_store(&self) -> StoreResult<Arc<dyn RecordStore>> {
        self.records
            .get_or_try_init(|| async {
                let store = build_record_store(&self.config.records)?;
                info!(backend = store.backend(), "record store initialized");
                Ok::<_, StoreError>(store)
            })
            .await
            .map(Arc::clone)
    }

    pub async fn blob_store(&self) -> StoreResult<Arc<dyn BlobStore>> {
        self.blobs
            .get_or_try_init(|| async {
                let store = build_blob_store(&self.config.blobs)?;
                info!(backend = store.backend(), "blob store initialized");
                Ok::<_, StoreError>(store)
            })
            .await
            .map(Arc::clone)
    }

    pub async fn context(&self) -> StoreResult<StoreContext> {
        Ok(StoreContext::new(self.record_store().await?, self.blob_store().await?))
    }
}

/// Record and blob store pair handed to request handlers.
#[derive(Clone)]
pub struct StoreContext {
    pub records: Arc<dyn RecordStore>,
    pub blobs: Arc<dyn BlobStore>,
}

impl StoreContext {
    pub fn new(records: Arc<dyn RecordStore>, blobs: Arc<dyn BlobStore>) -> Self {
        Self { records, blobs }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryRecordStore::new()), Arc::new(MemoryBlobStore::new()))
    }

    /// Uploads `bytes` and points the record's `additionalData` at the new
    /// blob. A blob uploaded for a record that turns out to be missing is
    /// deleted again before the error is returned.
    ///
    /// Any blob previously referenced by the record is left in place.
    pub async fn attach_blob(&self, id: &str, bytes: Vec<u8>, content_type: &str) -> StoreResult<Record> {
        let reference = self.blobs.upload(bytes, content_type).await?;
        match self
            .records
            .update(RecordPatch::new(id).additional_data(reference.as_str()))
            .await
        {
            Ok(record) => Ok(record),
            Err(err) => {
                if let Err(cleanup) = self.blobs.delete(&reference).await {
                    warn!(%reference, error = %cleanup, "failed to remove blob after rejected attach");
                }
                Err(err)
            }
        }
    }
}
