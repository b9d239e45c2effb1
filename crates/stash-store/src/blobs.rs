//! Blob store contract.

use async_trait::async_trait;

use crate::error::StoreResult;

/// Binary object persistence.
///
/// References are opaque and only redeemable against the store that issued
/// them.
#[async_trait]
pub trait BlobStore: Send + Sync {
    fn backend(&self) -> &'static str;

    /// Stores `bytes` and returns a reference unique within this store.
    async fn upload(&self, bytes: Vec<u8>, content_type: &str) -> StoreResult<String>;

    /// Returns a fetchable URL for the blob, or `Ok(None)` if it is absent.
    async fn get(&self, reference: &str) -> StoreResult<Option<String>>;

    async fn exists(&self, reference: &str) -> StoreResult<bool>;

    async fn delete(&self, reference: &str) -> StoreResult<()>;
}
