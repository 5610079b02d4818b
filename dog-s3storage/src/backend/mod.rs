//! Wire-level object-store operations.
//!
//! [`ObjectBackend`] mirrors the provider's HTTP API one call per method.
//! It knows nothing about tenants, sessions or retries; those live in the
//! layers above and reach the backend through [`crate::ObjectStoreClient`].

pub mod memory;
pub mod s3;

use async_trait::async_trait;
use bytes::Bytes;

use crate::{ByteRange, ByteStream, ListingPage, PartRecord, StorageResult};

/// Remote object-store API
#[async_trait]
pub trait ObjectBackend: Send + Sync {
    /// HEAD a bucket; a missing bucket surfaces as a not-found error
    async fn head_bucket(&self, bucket: &str) -> StorageResult<()>;

    /// Create a bucket, with a location constraint when one is given
    async fn create_bucket(
        &self,
        bucket: &str,
        location_constraint: Option<&str>,
    ) -> StorageResult<()>;

    /// Delete a bucket and return the HTTP status the provider answered with
    async fn delete_bucket(&self, bucket: &str) -> StorageResult<u16>;

    async fn head_object(&self, bucket: &str, key: &str) -> StorageResult<ObjectHead>;

    async fn get_object(
        &self,
        bucket: &str,
        key: &str,
        range: Option<ByteRange>,
    ) -> StorageResult<ObjectBody>;

    /// Server-side copy within one bucket
    async fn copy_object(
        &self,
        bucket: &str,
        source_key: &str,
        dest_key: &str,
    ) -> StorageResult<()>;

    async fn delete_object(&self, bucket: &str, key: &str) -> StorageResult<()>;

    /// Batched delete; per-key failures are reported, not raised
    async fn delete_objects(
        &self,
        bucket: &str,
        keys: &[String],
    ) -> StorageResult<DeleteObjectsOutput>;

    /// Begin a multipart upload and return the provider's upload id
    async fn create_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        content_type: Option<&str>,
    ) -> StorageResult<String>;

    /// Upload one part and return its ETag
    async fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: u32,
        body: Bytes,
    ) -> StorageResult<String>;

    async fn complete_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: &[PartRecord],
    ) -> StorageResult<()>;

    async fn abort_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
    ) -> StorageResult<()>;

    /// One `ListObjectsV2` page
    async fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
        continuation_token: Option<&str>,
        max_keys: i32,
    ) -> StorageResult<ListingPage>;
}

/// Metadata about a stored object
#[derive(Debug, Clone)]
pub struct ObjectHead {
    pub size_bytes: u64,
    pub content_type: Option<String>,
    pub etag: Option<String>,
}

/// Response of a GET: the body is streamed, not buffered
pub struct ObjectBody {
    pub stream: ByteStream,
    pub content_length: u64,
    pub content_type: Option<String>,
}

/// Result of a batched delete
#[derive(Debug, Clone, Default)]
pub struct DeleteObjectsOutput {
    pub deleted: Vec<String>,
    pub errors: Vec<String>,
}
