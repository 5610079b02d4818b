//! # dog-s3storage: S3-backed file storage for DogRS applications
//!
//! `dog-s3storage` stores the file fields of multi-tenant resources in any
//! S3-compatible object store. Uploads are resumable multipart uploads whose
//! state lives in a serializable [`UploadSession`], so a client can stream a
//! large file across many requests and even across process restarts.
//!
//! ## Key Features
//!
//! - **Per-tenant buckets**: derived from a naming template, created lazily and cached
//! - **Resumable uploads**: `start` / `append` / `finish` / `abort` over a caller-owned session
//! - **Streaming reads**: chunked downloads with byte-range support
//! - **Bounded pool**: a fixed number of concurrent requests to the provider
//! - **Transient-error retry**: exponential backoff on throttling and 5xx responses
//! - **Bucket maintenance**: paginated listing, batch deletion, bucket removal
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use bytes::Bytes;
//! use dog_s3storage::prelude::*;
//!
//! # #[tokio::main]
//! # async fn main() -> StorageResult<()> {
//! // 1. One store per process, shared by every adapter
//! let store = Arc::new(S3BlobStore::connect(S3StorageConfig::from_env()?).await?);
//! let adapter = FileAdapter::new(store, "file");
//!
//! // 2. Stream the upload into a session
//! let ctx = StorageCtx::new("acme");
//! let mut session = UploadSession::new();
//! adapter
//!     .start(&ctx, &mut session, UploadMeta::new().with_filename("hello.txt"))
//!     .await?;
//! let body = futures_util::stream::iter(vec![Ok(Bytes::from_static(b"Hello, world!"))]);
//! adapter.append(&mut session, body).await?;
//! let stored = adapter.finish(&ctx, &mut session, None).await?;
//!
//! // 3. Read it back, whole or in part
//! let head = adapter.read_range(&ctx, Some(&stored), 0, 5).await?;
//! # drop(head);
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────┐
//! │     FileAdapter      │  ← one per file field
//! ├──────────────────────┤
//! │ MultipartCoordinator │  ← upload lifecycle
//! ├──────────────────────┤
//! │     S3BlobStore      │  ← buckets, listing, reads, retry
//! ├──────────────────────┤
//! │  ObjectStoreClient   │  ← bounded pool
//! ├──────────────────────┤
//! │    ObjectBackend     │  ← S3 SDK or in-memory
//! └──────────────────────┘
//! ```

pub mod adapter;
pub mod backend;
mod bucket;
mod chunking;
mod client;
mod config;
mod coordinator;
mod enumerate;
mod error;
mod reader;
mod retry;
pub mod store;
mod types;
mod upload;

pub use adapter::FileAdapter;
pub use backend::memory::MemoryBackend;
pub use backend::s3::S3Backend;
pub use backend::{DeleteObjectsOutput, ObjectBackend, ObjectBody, ObjectHead};
pub use bucket::{BucketNaming, BucketRegistry, BucketResolver};
pub use chunking::rechunk;
pub use client::{ClientHandle, ObjectStoreClient};
pub use config::{
    RetrySettings, S3StorageConfig, DEFAULT_BUCKET_NAME_FORMAT, DEFAULT_MAX_POOL_CONNECTIONS,
    DEFAULT_REGION, MIN_PART_SIZE,
};
pub use coordinator::MultipartCoordinator;
pub use enumerate::{
    BatchDeleteOutcome, ListingItem, ListingPage, ListingStream, ObjectEnumerator, DEFAULT_MAX_KEYS,
};
pub use error::{classify, ErrorKind, StorageError, StorageResult};
pub use reader::StreamReader;
pub use retry::RetryPolicy;
pub use store::S3BlobStore;
pub use types::{
    AlwaysClean, BestEffort, ByteRange, ByteStream, CleanupPolicy, DefaultKeyStrategy, KeyStrategy,
    NeverClean, StorageCtx, StoredObject,
};
pub use upload::{PartRecord, UploadMeta, UploadSession, UploadState};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::{
        ByteRange, ByteStream, FileAdapter, S3BlobStore, S3StorageConfig, StorageCtx, StorageError,
        StorageResult, StoredObject, UploadMeta, UploadSession,
    };
}
