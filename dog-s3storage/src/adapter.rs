use std::sync::Arc;

use bytes::Bytes;
use futures_core::Stream;
use tracing::{debug, info, instrument, warn};

use crate::{
    AlwaysClean, BestEffort, ByteRange, ByteStream, CleanupPolicy, DefaultKeyStrategy, KeyStrategy,
    MultipartCoordinator, S3BlobStore, StorageCtx, StorageError, StorageResult, StoredObject,
    UploadMeta, UploadSession, UploadState,
};

/// Filename recorded for copies of objects that never had one
const UNKNOWN_FILENAME: &str = "unknown";

/// Per-field file manager: uploads, reads, copies and deletes the object
/// stored under one file field of a resource
pub struct FileAdapter {
    store: Arc<S3BlobStore>,
    field: String,
    coordinator: MultipartCoordinator,
    cleanup: Arc<dyn CleanupPolicy>,
}

impl FileAdapter {
    /// Create an adapter for `field` with the default key layout and cleanup policy
    pub fn new<F: Into<String>>(store: Arc<S3BlobStore>, field: F) -> Self {
        Self {
            coordinator: MultipartCoordinator::new(store.clone(), Arc::new(DefaultKeyStrategy)),
            store,
            field: field.into(),
            cleanup: Arc::new(AlwaysClean),
        }
    }

    pub fn with_key_strategy<K: KeyStrategy + 'static>(mut self, keys: K) -> Self {
        self.coordinator = MultipartCoordinator::new(self.store.clone(), Arc::new(keys));
        self
    }

    pub fn with_cleanup_policy<C: CleanupPolicy + 'static>(mut self, cleanup: C) -> Self {
        self.cleanup = Arc::new(cleanup);
        self
    }

    pub fn field(&self) -> &str {
        &self.field
    }

    pub fn store(&self) -> &Arc<S3BlobStore> {
        &self.store
    }

    pub fn coordinator(&self) -> &MultipartCoordinator {
        &self.coordinator
    }

    pub async fn start(
        &self,
        ctx: &StorageCtx,
        session: &mut UploadSession,
        meta: UploadMeta,
    ) -> StorageResult<()> {
        self.coordinator.start(ctx, session, meta).await
    }

    pub async fn append<S>(&self, session: &mut UploadSession, chunks: S) -> StorageResult<u64>
    where
        S: Stream<Item = Result<Bytes, std::io::Error>> + Send,
    {
        self.coordinator.append(session, chunks).await
    }

    /// Drop the object this upload replaces when the cleanup policy allows,
    /// then complete the upload. Cleanup failures are logged only.
    #[instrument(skip(self, ctx, session, previous), fields(field = %self.field))]
    pub async fn finish(
        &self,
        ctx: &StorageCtx,
        session: &mut UploadSession,
        previous: Option<&StoredObject>,
    ) -> StorageResult<StoredObject> {
        if session.state.accepts_parts() {
            if let Some(previous) = previous {
                self.clean_previous(ctx, session, previous).await;
            }
        }
        self.coordinator.complete(session).await
    }

    /// Best-effort removal of the object a finished upload supersedes
    async fn clean_previous(
        &self,
        ctx: &StorageCtx,
        session: &UploadSession,
        previous: &StoredObject,
    ) -> BestEffort {
        if !previous.is_uploaded()
            || session.object_key.as_deref() == Some(previous.key.as_str())
            || !self.cleanup.should_clean(previous, &self.field)
        {
            return BestEffort::Skipped;
        }

        let bucket = match self.bucket_for(ctx, previous).await {
            Ok(bucket) => bucket,
            Err(err) => {
                warn!(key = %previous.key, "Cannot resolve bucket of replaced object: {}", err);
                return BestEffort::Failed(err);
            }
        };

        match self.store.delete_upload(&bucket, Some(&previous.key)).await {
            Ok(outcome) => {
                if outcome.is_done() {
                    debug!(key = %previous.key, "Removed replaced object");
                }
                outcome
            }
            Err(err) => {
                warn!(key = %previous.key, "Error removing replaced object: {}", err);
                BestEffort::Failed(err)
            }
        }
    }

    pub async fn abort(&self, session: &mut UploadSession) -> BestEffort {
        self.coordinator.abort(session).await
    }

    /// Whether the referenced object is present in the store
    pub async fn exists(
        &self,
        ctx: &StorageCtx,
        file: Option<&StoredObject>,
    ) -> StorageResult<bool> {
        let file = match file.filter(|f| f.is_uploaded()) {
            Some(file) => file,
            None => return Ok(false),
        };
        let bucket = self.bucket_for(ctx, file).await?;
        self.store.reader().exists(&bucket, &file.key).await
    }

    /// Delete the referenced object; remote failures are logged, not raised
    pub async fn delete(
        &self,
        ctx: &StorageCtx,
        file: Option<&StoredObject>,
    ) -> StorageResult<BestEffort> {
        let file = file
            .filter(|f| f.is_uploaded())
            .ok_or_else(|| StorageError::invalid("No stored object to delete"))?;
        let bucket = self.bucket_for(ctx, file).await?;
        self.store.delete_upload(&bucket, Some(&file.key)).await
    }

    /// Server-side copy of `file` to a fresh key in the same bucket.
    ///
    /// `destination` is the upload session of the receiving field; any open
    /// upload it holds is aborted and it ends up completed.
    #[instrument(skip(self, ctx, file, destination), fields(field = %self.field))]
    pub async fn copy(
        &self,
        ctx: &StorageCtx,
        file: Option<&StoredObject>,
        destination: &mut UploadSession,
    ) -> StorageResult<StoredObject> {
        let file = file
            .filter(|f| f.is_uploaded())
            .ok_or_else(|| StorageError::not_found("source object for copy"))?;

        if destination.has_open_upload() {
            self.coordinator.abort(destination).await;
        }

        let bucket = self.bucket_for(ctx, file).await?;
        let new_key = self.coordinator.keys().object_key(ctx);
        {
            let client = self.store.client().acquire().await?;
            client.copy_object(&bucket, &file.key, &new_key).await?;
        }
        info!(bucket = %bucket, source = %file.key, dest = %new_key, "Copied object");

        destination.bucket_name = bucket.clone();
        destination.clear(UploadState::Completed);

        Ok(StoredObject {
            key: new_key,
            bucket_name: bucket,
            content_type: file.content_type.clone(),
            size_bytes: file.size_bytes,
            filename: if file.filename.is_empty() {
                UNKNOWN_FILENAME.to_string()
            } else {
                file.filename.clone()
            },
        })
    }

    /// Stream the whole object, or `range` of it
    pub async fn iter_data(
        &self,
        ctx: &StorageCtx,
        file: Option<&StoredObject>,
        range: Option<ByteRange>,
    ) -> StorageResult<ByteStream> {
        let file = file
            .filter(|f| f.is_uploaded())
            .ok_or_else(|| StorageError::not_found("stored object"))?;
        let bucket = self.bucket_for(ctx, file).await?;
        self.store.reader().iterate(&bucket, &file.key, range).await
    }

    /// Stream bytes `start..end` of the object
    pub async fn read_range(
        &self,
        ctx: &StorageCtx,
        file: Option<&StoredObject>,
        start: u64,
        end: u64,
    ) -> StorageResult<ByteStream> {
        let range = ByteRange::new(start, end)?;
        self.iter_data(ctx, file, Some(range)).await
    }

    pub fn range_supported(&self) -> bool {
        true
    }

    async fn bucket_for(&self, ctx: &StorageCtx, file: &StoredObject) -> StorageResult<String> {
        if !file.bucket_name.is_empty() {
            return Ok(file.bucket_name.clone());
        }
        warn!(key = %file.key, "Stored object has no bucket, resolving from tenant");
        self.store.bucket_name(ctx).await
    }
}
