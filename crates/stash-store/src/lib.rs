//! Storage layer for stash: record and blob persistence behind stable
//! contracts with swappable backends.
//!
//! Records live in an in-memory reference store or a Cosmos DB container;
//! blobs live in an in-memory store (served as `data:` URLs) or an
//! S3-compatible bucket (served as presigned URLs). [`StorageConfig`] picks
//! one backend per store type from the environment and [`StoreResolver`]
//! builds each one once per process.
//!
//! ```no_run
//! # async fn demo() -> stash_store::StoreResult<()> {
//! use stash_store::{NewRecord, PageRequest, RecordOrder, StoreResolver};
//!
//! let resolver = StoreResolver::from_env()?;
//! let stores = resolver.context().await?;
//! let record = stores.records.put(NewRecord::new("report.pdf", "alice")).await?;
//! let page = stores.records.list(RecordOrder::NewestFirst, &PageRequest::first(20)).await?;
//! assert_eq!(page.items[0].id, record.id);
//! # Ok(())
//! # }
//! ```

pub mod blobs;
pub mod config;
pub mod cosmos;
pub mod error;
mod http;
pub mod memory;
pub mod model;
pub mod records;
pub mod resolver;
pub mod s3;
pub mod sigv4;

pub use blobs::BlobStore;
pub use config::{BlobBackendConfig, CosmosConfig, RecordBackendConfig, S3Config, StorageConfig};
pub use cosmos::CosmosRecordStore;
pub use error::{StoreError, StoreResult};
pub use memory::{MemoryBlobStore, MemoryRecordStore};
pub use model::{NewRecord, Page, PageRequest, Record, RecordOrder, RecordPatch};
pub use records::RecordStore;
pub use resolver::{build_blob_store, build_record_store, StoreContext, StoreResolver};
pub use s3::S3BlobStore;
pub use sigv4::{Credentials, RequestSigner, SigV4Signer, SignableRequest};
