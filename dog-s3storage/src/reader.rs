use tracing::{debug, instrument};

use crate::chunking::rechunk;
use crate::{ByteRange, ByteStream, ObjectStoreClient, RetryPolicy, StorageResult};

/// Chunked, optionally ranged downloads
#[derive(Clone)]
pub struct StreamReader {
    client: ObjectStoreClient,
    retry: RetryPolicy,
    chunk_size: usize,
}

impl StreamReader {
    pub fn new(client: ObjectStoreClient, retry: RetryPolicy, chunk_size: usize) -> Self {
        Self {
            client,
            retry,
            chunk_size,
        }
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Open the object and stream it in `chunk_size` pieces.
    ///
    /// Only opening the GET is retried. The returned stream is single-pass;
    /// read again by calling `iterate` again.
    #[instrument(skip(self))]
    pub async fn iterate(
        &self,
        bucket: &str,
        key: &str,
        range: Option<ByteRange>,
    ) -> StorageResult<ByteStream> {
        let body = self
            .retry
            .run("get_object", move || async move {
                let client = self.client.acquire().await?;
                client.get_object(bucket, key, range).await
            })
            .await?;

        debug!(bucket, key, content_length = body.content_length, "Streaming object");
        Ok(rechunk(body.stream, self.chunk_size))
    }

    /// Whether the object exists; only not-found maps to `false`
    #[instrument(skip(self))]
    pub async fn exists(&self, bucket: &str, key: &str) -> StorageResult<bool> {
        let client = self.client.acquire().await?;
        match client.head_object(bucket, key).await {
            Ok(_) => Ok(true),
            Err(err) if err.is_not_found() => Ok(false),
            Err(err) => Err(err),
        }
    }
}
