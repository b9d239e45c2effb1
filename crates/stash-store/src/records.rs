//! Record store contract.

use async_trait::async_trait;

use crate::error::StoreResult;
use crate::model::{NewRecord, Page, PageRequest, Record, RecordOrder, RecordPatch};

/// Structured record persistence with uniform pagination, ordering and name
/// search across backends.
///
/// Implementations must agree on observable behaviour:
/// - `get` answers `Ok(None)` for unknown ids, never an error.
/// - `query_by_name` is a case-insensitive substring match on `name`.
/// - `total_count` reflects the full matching set before pagination.
/// - `update` never creates; `delete` and `bump_download_count` are no-ops
///   for unknown ids.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Short backend name for logs and health output.
    fn backend(&self) -> &'static str;

    async fn get(&self, id: &str) -> StoreResult<Option<Record>>;

    async fn query_by_name(&self, term: &str, page: &PageRequest) -> StoreResult<Page<Record>>;

    async fn list(&self, order: RecordOrder, page: &PageRequest) -> StoreResult<Page<Record>>;

    /// Stores a new record under a freshly generated id.
    async fn put(&self, record: NewRecord) -> StoreResult<Record>;

    /// Merges `patch` into the record with `patch.id`, returning the result.
    ///
    /// Fails with [`crate::StoreError::NotFound`] if the id is absent.
    async fn update(&self, patch: RecordPatch) -> StoreResult<Record>;

    /// Increments `downloadCount` by exactly one. A count already at
    /// `u64::MAX` is left alone and reported as [`crate::StoreError::InvalidUpdate`].
    async fn bump_download_count(&self, id: &str) -> StoreResult<()>;

    async fn delete(&self, id: &str) -> StoreResult<()>;
}
