//! In-process record and blob stores for tests and local development.

use std::collections::HashMap;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use parking_lot::RwLock;
use tracing::debug;
use uuid::Uuid;

use crate::blobs::BlobStore;
use crate::error::{StoreError, StoreResult};
use crate::model::{name_matches, paginate, NewRecord, Page, PageRequest, Record, RecordOrder, RecordPatch};
use crate::records::RecordStore;

/// Vec-backed record store. `Unordered` listing yields insertion order.
#[derive(Debug, Default)]
pub struct MemoryRecordStore {
    rows: RwLock<Vec<Record>>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.rows.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.read().is_empty()
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, id: &str) -> StoreResult<Option<Record>> {
        Ok(self.rows.read().iter().find(|row| row.id == id).cloned())
    }

    async fn query_by_name(&self, term: &str, page: &PageRequest) -> StoreResult<Page<Record>> {
        let matches: Vec<Record> = self
            .rows
            .read()
            .iter()
            .filter(|row| name_matches(&row.name, term))
            .cloned()
            .collect();
        paginate(matches, page)
    }

    async fn list(&self, order: RecordOrder, page: &PageRequest) -> StoreResult<Page<Record>> {
        let mut ordered = self.rows.read().clone();
        // stable sorts keep insertion order among ties
        match order {
            RecordOrder::NewestFirst => ordered.sort_by(|a, b| b.uploaded_at.cmp(&a.uploaded_at)),
            RecordOrder::DownloadsFirst => {
                ordered.sort_by(|a, b| b.download_count.cmp(&a.download_count))
            }
            RecordOrder::Unordered => {}
        }
        paginate(ordered, page)
    }

    async fn put(&self, record: NewRecord) -> StoreResult<Record> {
        let stored = record.into_record(Uuid::new_v4().to_string());
        self.rows.write().push(stored.clone());
        debug!(id = %stored.id, "memory record stored");
        Ok(stored)
    }

    async fn update(&self, patch: RecordPatch) -> StoreResult<Record> {
        let mut rows = self.rows.write();
        let row = rows
            .iter_mut()
            .find(|row| row.id == patch.id)
            .ok_or_else(|| StoreError::NotFound(patch.id.clone()))?;
        // merge into a copy so a rejected patch leaves the row untouched
        let mut merged = row.clone();
        patch.apply(&mut merged)?;
        *row = merged.clone();
        Ok(merged)
    }

    async fn bump_download_count(&self, id: &str) -> StoreResult<()> {
        if let Some(row) = self.rows.write().iter_mut().find(|row| row.id == id) {
            row.download_count = row.download_count.checked_add(1).ok_or_else(|| {
                StoreError::InvalidUpdate {
                    id: id.to_string(),
                    reason: "downloadCount is at its maximum".to_string(),
                }
            })?;
        }
        Ok(())
    }

    async fn delete(&self, id: &str) -> StoreResult<()> {
        self.rows.write().retain(|row| row.id != id);
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct StoredBlob {
    content_type: String,
    bytes: Vec<u8>,
}

/// HashMap-backed blob store that hands out `data:` URLs.
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    blobs: RwLock<HashMap<String, StoredBlob>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.blobs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.read().is_empty()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn upload(&self, bytes: Vec<u8>, content_type: &str) -> StoreResult<String> {
        let reference = Uuid::new_v4().to_string();
        debug!(%reference, size = bytes.len(), "memory blob stored");
        self.blobs.write().insert(
            reference.clone(),
            StoredBlob {
                content_type: content_type.to_string(),
                bytes,
            },
        );
        Ok(reference)
    }

    async fn get(&self, reference: &str) -> StoreResult<Option<String>> {
        Ok(self.blobs.read().get(reference).map(|blob| {
            format!("data:{};base64,{}", blob.content_type, STANDARD.encode(&blob.bytes))
        }))
    }

    async fn exists(&self, reference: &str) -> StoreResult<bool> {
        Ok(self.blobs.read().contains_key(reference))
    }

    async fn delete(&self, reference: &str) -> StoreResult<()> {
        self.blobs.write().remove(reference);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn rejected_update_leaves_row_untouched() {
        let store = MemoryRecordStore::new();
        let record = store
            .put(NewRecord {
                download_count: 4,
                ..NewRecord::new("notes.txt", "carol")
            })
            .await
            .unwrap();

        let err = store
            .update(RecordPatch::new(&record.id).name("other.txt").download_count(1))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidUpdate { .. }));

        let fetched = store.get(&record.id).await.unwrap().unwrap();
        assert_eq!(fetched, record);
    }

    #[tokio::test]
    async fn bump_at_maximum_count_is_rejected() {
        let store = MemoryRecordStore::new();
        let record = store.put(NewRecord::new("hot.zip", "erin")).await.unwrap();
        store
            .update(RecordPatch::new(&record.id).download_count(u64::MAX))
            .await
            .unwrap();

        let err = store.bump_download_count(&record.id).await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidUpdate { .. }));
        let fetched = store.get(&record.id).await.unwrap().unwrap();
        assert_eq!(fetched.download_count, u64::MAX);
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let store = MemoryRecordStore::new();
        let record = store.put(NewRecord::new("a", "b")).await.unwrap();
        store.delete(&record.id).await.unwrap();
        store.delete(&record.id).await.unwrap();
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn blob_data_url_carries_content_type() {
        let store = MemoryBlobStore::new();
        let reference = store.upload(b"hi".to_vec(), "text/plain").await.unwrap();
        let url = store.get(&reference).await.unwrap().unwrap();
        assert_eq!(url, "data:text/plain;base64,aGk=");
        assert!(store.exists(&reference).await.unwrap());
    }
}
