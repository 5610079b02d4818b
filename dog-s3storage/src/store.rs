use std::sync::Arc;

use tracing::{instrument, warn};

use crate::backend::s3::S3Backend;
use crate::backend::ObjectBackend;
use crate::enumerate::DEFAULT_MAX_KEYS;
use crate::{
    BatchDeleteOutcome, BestEffort, BucketNaming, BucketRegistry, BucketResolver, ListingPage,
    ListingStream, ObjectEnumerator, ObjectStoreClient, RetryPolicy, S3StorageConfig, StorageCtx,
    StorageError, StorageResult, StreamReader,
};

/// Process-wide entry point to an S3-compatible store.
///
/// Owns the connection pool, retry policy and bucket cache shared by every
/// [`crate::FileAdapter`]. Build one per process and share it behind an `Arc`.
pub struct S3BlobStore {
    config: S3StorageConfig,
    client: ObjectStoreClient,
    retry: RetryPolicy,
    resolver: BucketResolver,
    enumerator: ObjectEnumerator,
    reader: StreamReader,
}

impl S3BlobStore {
    /// Connect to the configured S3 endpoint
    pub async fn connect(config: S3StorageConfig) -> StorageResult<Self> {
        config.validate()?;
        let backend = S3Backend::connect(&config).await;
        Ok(Self::with_backend(backend, config))
    }

    /// Build on any backend, e.g. [`crate::backend::memory::MemoryBackend`]
    pub fn with_backend<B: ObjectBackend + 'static>(backend: B, config: S3StorageConfig) -> Self {
        Self::with_registry(backend, config, Arc::new(BucketRegistry::new()))
    }

    /// Build on any backend with an externally owned bucket cache
    pub fn with_registry<B: ObjectBackend + 'static>(
        backend: B,
        config: S3StorageConfig,
        registry: Arc<BucketRegistry>,
    ) -> Self {
        let client = ObjectStoreClient::new(Arc::new(backend), config.max_pool_connections);
        let retry = RetryPolicy::from_settings(&config.retry);
        let resolver = BucketResolver::new(
            client.clone(),
            BucketNaming::from_config(&config),
            config.region_name.clone(),
            registry,
        );
        let enumerator = ObjectEnumerator::new(client.clone());
        let reader = StreamReader::new(client.clone(), retry, config.part_size);

        Self {
            config,
            client,
            retry,
            resolver,
            enumerator,
            reader,
        }
    }

    pub fn config(&self) -> &S3StorageConfig {
        &self.config
    }

    pub fn client(&self) -> &ObjectStoreClient {
        &self.client
    }

    pub fn retry(&self) -> &RetryPolicy {
        &self.retry
    }

    pub fn resolver(&self) -> &BucketResolver {
        &self.resolver
    }

    pub fn enumerator(&self) -> &ObjectEnumerator {
        &self.enumerator
    }

    pub fn reader(&self) -> &StreamReader {
        &self.reader
    }

    /// Bucket for the context's tenant, created on first use
    pub async fn bucket_name(&self, ctx: &StorageCtx) -> StorageResult<String> {
        self.resolver.resolve_for(ctx).await
    }

    pub async fn check_bucket_accessibility(&self, bucket: &str) -> StorageResult<bool> {
        self.resolver.check_accessibility(bucket).await
    }

    /// Default listing prefix: everything the tenant owns
    pub fn tenant_prefix(ctx: &StorageCtx) -> String {
        format!("{}/", ctx.tenant_id)
    }

    /// One page of the tenant's objects
    pub async fn get_blobs(
        &self,
        ctx: &StorageCtx,
        page_token: Option<&str>,
        prefix: Option<&str>,
        max_keys: Option<i32>,
    ) -> StorageResult<ListingPage> {
        let bucket = self.bucket_name(ctx).await?;
        let prefix = prefix.map(str::to_string).unwrap_or_else(|| Self::tenant_prefix(ctx));
        self.enumerator
            .list_page(&bucket, &prefix, page_token, max_keys.unwrap_or(DEFAULT_MAX_KEYS))
            .await
    }

    /// Every object under the tenant prefix, fetched lazily one page at a time
    pub async fn iterate_bucket(
        &self,
        ctx: &StorageCtx,
        max_keys: Option<i32>,
    ) -> StorageResult<ListingStream> {
        let bucket = self.bucket_name(ctx).await?;
        let page_size = max_keys.unwrap_or(DEFAULT_MAX_KEYS);
        Ok(self.enumerator.list_all(&bucket, &Self::tenant_prefix(ctx), page_size))
    }

    /// Batch delete in `bucket`, or in the tenant bucket when none is given
    pub async fn delete_blobs(
        &self,
        ctx: &StorageCtx,
        keys: &[String],
        bucket: Option<&str>,
    ) -> StorageResult<BatchDeleteOutcome> {
        let bucket = match bucket {
            Some(bucket) => bucket.to_string(),
            None => self.bucket_name(ctx).await?,
        };
        Ok(self.enumerator.delete_batch(&bucket, keys).await)
    }

    /// Delete `bucket`, or the tenant bucket when none is given
    pub async fn delete_bucket(&self, ctx: &StorageCtx, bucket: Option<&str>) -> StorageResult<()> {
        let bucket = match bucket {
            Some(bucket) => bucket.to_string(),
            None => self.bucket_name(ctx).await?,
        };
        self.enumerator.delete_bucket(&bucket).await
    }

    /// Delete one object, logging rather than raising remote failures.
    ///
    /// A missing key is a caller bug and fails hard.
    #[instrument(skip(self))]
    pub async fn delete_upload(
        &self,
        bucket: &str,
        key: Option<&str>,
    ) -> StorageResult<BestEffort> {
        let key = key
            .filter(|k| !k.is_empty())
            .ok_or_else(|| StorageError::invalid("No valid key to delete"))?;

        let client = self.client.acquire().await?;
        match client.delete_object(bucket, key).await {
            Ok(()) => Ok(BestEffort::Done),
            Err(err) => {
                warn!(bucket, key, "Error deleting object: {}", err);
                Ok(BestEffort::Failed(err))
            }
        }
    }
}
