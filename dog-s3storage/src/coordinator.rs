use std::sync::Arc;

use bytes::Bytes;
use futures_core::Stream;
use futures_util::StreamExt;
use tracing::{debug, info, instrument, warn};

use crate::{
    BestEffort, KeyStrategy, S3BlobStore, StorageCtx, StorageError, StorageResult, StoredObject,
    UploadMeta, UploadSession, UploadState,
};

const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Drives the multipart lifecycle of an [`UploadSession`].
///
/// The coordinator holds no per-upload state; everything lives in the
/// session the caller passes in, so any coordinator sharing the same store
/// can resume an upload.
#[derive(Clone)]
pub struct MultipartCoordinator {
    store: Arc<S3BlobStore>,
    keys: Arc<dyn KeyStrategy>,
}

impl MultipartCoordinator {
    pub fn new(store: Arc<S3BlobStore>, keys: Arc<dyn KeyStrategy>) -> Self {
        Self { store, keys }
    }

    pub fn store(&self) -> &Arc<S3BlobStore> {
        &self.store
    }

    pub fn keys(&self) -> &Arc<dyn KeyStrategy> {
        &self.keys
    }

    /// Open a new multipart upload, aborting any upload the session still holds
    #[instrument(skip(self, session, meta), fields(tenant_id = %ctx.tenant_id))]
    pub async fn start(
        &self,
        ctx: &StorageCtx,
        session: &mut UploadSession,
        meta: UploadMeta,
    ) -> StorageResult<()> {
        if session.has_open_upload() {
            debug!(upload_id = ?session.upload_id, "Aborting stale upload before restart");
            self.abort(session).await;
        }

        let bucket = self.store.bucket_name(ctx).await?;
        let key = self.keys.object_key(ctx);

        let client = self.store.client();
        let (bucket_ref, key_ref) = (bucket.as_str(), key.as_str());
        let content_type = meta.content_type.as_deref();
        let upload_id = self
            .store
            .retry()
            .run("create_multipart_upload", move || async move {
                client
                    .acquire()
                    .await?
                    .create_multipart_upload(bucket_ref, key_ref, content_type)
                    .await
            })
            .await?;

        info!(bucket = %bucket, key = %key, upload_id = %upload_id, "Started multipart upload");
        session.begin(bucket, key, upload_id, meta);
        Ok(())
    }

    /// Upload every non-empty chunk of `chunks` as the next part, in order.
    ///
    /// Returns the number of bytes written. A failure leaves the parts
    /// uploaded so far recorded in the session.
    #[instrument(skip(self, session, chunks))]
    pub async fn append<S>(&self, session: &mut UploadSession, chunks: S) -> StorageResult<u64>
    where
        S: Stream<Item = Result<Bytes, std::io::Error>> + Send,
    {
        if !session.state.accepts_parts() {
            return Err(StorageError::invalid(format!(
                "Upload session does not accept parts in state {:?}",
                session.state
            )));
        }

        let (bucket, key, upload_id) = {
            let (b, k, u) = session.target()?;
            (b.to_string(), k.to_string(), u.to_string())
        };
        let client = self.store.client();
        let (bucket, key, upload_id) = (bucket.as_str(), key.as_str(), upload_id.as_str());

        let mut chunks = Box::pin(chunks);
        let mut written = 0u64;
        while let Some(chunk) = chunks.next().await {
            let chunk = chunk?;
            if chunk.is_empty() {
                continue;
            }

            let part_number = session.next_part_number;
            let size = chunk.len() as u64;
            let etag = self
                .store
                .retry()
                .run("upload_part", move || {
                    let body = chunk.clone();
                    async move {
                        client
                            .acquire()
                            .await?
                            .upload_part(bucket, key, upload_id, part_number, body)
                            .await
                    }
                })
                .await?;

            session.record_part(etag, size);
            written += size;
            debug!(part_number, size, "Uploaded part");
        }
        Ok(written)
    }

    /// Finalize the upload and describe the stored object.
    ///
    /// An upload with no parts gets a single empty part so the provider
    /// accepts the completion. On failure the session stays open for another
    /// `complete` or an `abort`.
    #[instrument(skip(self, session))]
    pub async fn complete(&self, session: &mut UploadSession) -> StorageResult<StoredObject> {
        if !session.state.accepts_parts() {
            return Err(StorageError::invalid(format!(
                "Upload session cannot complete in state {:?}",
                session.state
            )));
        }

        let (bucket, key, upload_id) = {
            let (b, k, u) = session.target()?;
            (b.to_string(), k.to_string(), u.to_string())
        };
        let client = self.store.client();
        let retry = self.store.retry();

        if session.next_part_number == 1 {
            let (b, k, u) = (bucket.as_str(), key.as_str(), upload_id.as_str());
            let etag = retry
                .run("upload_part", move || async move {
                    client.acquire().await?.upload_part(b, k, u, 1, Bytes::new()).await
                })
                .await?;
            session.record_part(etag, 0);
        }

        session.state = UploadState::Completing;
        let parts = session.sorted_parts();
        let (b, k, u, p) = (bucket.as_str(), key.as_str(), upload_id.as_str(), parts.as_slice());
        let completed = retry
            .run("complete_multipart_upload", move || async move {
                client.acquire().await?.complete_multipart_upload(b, k, u, p).await
            })
            .await;

        if let Err(err) = completed {
            session.state = UploadState::Uploading;
            return Err(err);
        }

        let stored = StoredObject {
            key,
            bucket_name: bucket,
            content_type: session
                .meta
                .content_type
                .clone()
                .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string()),
            size_bytes: session.size_bytes,
            filename: session.meta.filename.clone().unwrap_or_default(),
        };
        session.clear(UploadState::Completed);

        info!(
            key = %stored.key,
            size_bytes = stored.size_bytes,
            parts = parts.len(),
            "Completed multipart upload"
        );
        Ok(stored)
    }

    /// Abort the open upload, if any. Never fails; the session always ends aborted.
    #[instrument(skip(self, session))]
    pub async fn abort(&self, session: &mut UploadSession) -> BestEffort {
        let target = session
            .target()
            .map(|(b, k, u)| (b.to_string(), k.to_string(), u.to_string()));

        let outcome = match target {
            Ok((bucket, key, upload_id)) => {
                let client = self.store.client();
                let (b, k, u) = (bucket.as_str(), key.as_str(), upload_id.as_str());
                let aborted = self
                    .store
                    .retry()
                    .run("abort_multipart_upload", move || async move {
                        client.acquire().await?.abort_multipart_upload(b, k, u).await
                    })
                    .await;
                match aborted {
                    Ok(()) => {
                        info!(bucket = %bucket, upload_id = %upload_id, "Aborted multipart upload");
                        BestEffort::Done
                    }
                    Err(err) => {
                        warn!(
                            bucket = %bucket,
                            upload_id = %upload_id,
                            "Error aborting multipart upload: {}",
                            err
                        );
                        BestEffort::Failed(err)
                    }
                }
            }
            Err(_) => BestEffort::Skipped,
        };

        session.clear(UploadState::Aborted);
        outcome
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::backend::memory::{Fault, MemoryBackend, Operation};
    use crate::{DefaultKeyStrategy, S3StorageConfig};

    fn coordinator(backend: &MemoryBackend) -> MultipartCoordinator {
        let config = S3StorageConfig::new("access", "secret", "media")
            .with_part_size(4)
            .with_retry(2, Duration::from_millis(1));
        let store = Arc::new(S3BlobStore::with_backend(backend.clone(), config));
        MultipartCoordinator::new(store, Arc::new(DefaultKeyStrategy))
    }

    #[tokio::test]
    #[tracing_test::traced_test]
    async fn logs_upload_lifecycle() {
        let backend = MemoryBackend::new();
        let coordinator = coordinator(&backend);
        let ctx = StorageCtx::new("acme");
        let mut session = UploadSession::new();

        coordinator.start(&ctx, &mut session, UploadMeta::new()).await.unwrap();
        backend.fail(Operation::UploadPart, Fault::ServerError, 1);
        let body = futures_util::stream::iter(vec![Ok(Bytes::from_static(b"data"))]);
        coordinator.append(&mut session, body).await.unwrap();
        coordinator.complete(&mut session).await.unwrap();

        assert!(logs_contain("Started multipart upload"));
        assert!(logs_contain("Retrying after transient error"));
        assert!(logs_contain("Completed multipart upload"));
    }

    #[tokio::test]
    async fn complete_rejects_settled_session() {
        let backend = MemoryBackend::new();
        let coordinator = coordinator(&backend);
        let mut session = UploadSession::new();

        let result = coordinator.complete(&mut session).await;

        assert!(matches!(result, Err(StorageError::Invalid { .. })));
        assert_eq!(backend.count(Operation::CompleteMultipartUpload), 0);
    }
}
