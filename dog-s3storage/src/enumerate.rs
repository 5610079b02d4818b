use std::collections::BTreeSet;
use std::pin::Pin;

use chrono::{DateTime, Utc};
use futures_core::Stream;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, instrument, warn};

use crate::{ObjectStoreClient, StorageError, StorageResult};

/// Page size used when the caller does not pick one
pub const DEFAULT_MAX_KEYS: i32 = 1000;

/// Lazily fetched listing entries
pub type ListingStream = Pin<Box<dyn Stream<Item = StorageResult<ListingItem>> + Send>>;

/// One object in a listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListingItem {
    pub key: String,
    pub size_bytes: u64,
    pub last_modified: Option<DateTime<Utc>>,
}

/// One page of a listing; an absent token means the listing is exhausted
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListingPage {
    pub items: Vec<ListingItem>,
    pub continuation_token: Option<String>,
}

/// Per-key result of a batched delete
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchDeleteOutcome {
    pub succeeded: BTreeSet<String>,
    pub failed: BTreeSet<String>,
}

impl BatchDeleteOutcome {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Paginated listing and bulk deletion inside a bucket
#[derive(Clone)]
pub struct ObjectEnumerator {
    client: ObjectStoreClient,
}

impl ObjectEnumerator {
    pub fn new(client: ObjectStoreClient) -> Self {
        Self { client }
    }

    /// Fetch a single page, passing the provider's token through untouched
    #[instrument(skip(self))]
    pub async fn list_page(
        &self,
        bucket: &str,
        prefix: &str,
        continuation_token: Option<&str>,
        max_keys: i32,
    ) -> StorageResult<ListingPage> {
        let client = self.client.acquire().await?;
        let page = client
            .list_objects(bucket, prefix, continuation_token, max_keys)
            .await
            .map_err(|err| {
                warn!(bucket, prefix, "Listing objects failed: {}", err);
                err
            })?;

        debug!(
            bucket,
            items = page.items.len(),
            more = page.continuation_token.is_some(),
            "Fetched listing page"
        );
        Ok(page)
    }

    /// Walk every object under `prefix`, `max_keys` entries per page.
    ///
    /// Each call starts a fresh listing. The stream ends when the provider
    /// stops returning a continuation token, or right after yielding an error.
    pub fn list_all(&self, bucket: &str, prefix: &str, max_keys: i32) -> ListingStream {
        let enumerator = self.clone();
        let bucket = bucket.to_string();
        let prefix = prefix.to_string();

        let stream = async_stream::stream! {
            let mut token: Option<String> = None;
            loop {
                let page = match enumerator
                    .list_page(&bucket, &prefix, token.as_deref(), max_keys)
                    .await
                {
                    Ok(page) => page,
                    Err(e) => {
                        yield Err(e);
                        return;
                    }
                };

                for item in page.items {
                    yield Ok(item);
                }

                match page.continuation_token {
                    Some(next) => token = Some(next),
                    None => break,
                }
            }
        };
        Box::pin(stream)
    }

    /// Delete a batch of keys in one call.
    ///
    /// Never fails: keys the provider rejected, and every key when the call
    /// itself fails, end up in `failed`.
    #[instrument(skip(self, keys), fields(keys = keys.len()))]
    pub async fn delete_batch(&self, bucket: &str, keys: &[String]) -> BatchDeleteOutcome {
        let mut outcome = BatchDeleteOutcome::default();
        if keys.is_empty() {
            return outcome;
        }

        let response = match self.client.acquire().await {
            Ok(client) => client.delete_objects(bucket, keys).await,
            Err(err) => Err(err),
        };

        match response {
            Ok(output) => {
                outcome.succeeded.extend(output.deleted);
                outcome.failed.extend(output.errors);
                // Keys the provider did not report on are not known to be gone
                for key in keys {
                    if !outcome.succeeded.contains(key) {
                        outcome.failed.insert(key.clone());
                    }
                }
                if !outcome.failed.is_empty() {
                    warn!(
                        bucket,
                        failed = outcome.failed.len(),
                        "Some objects could not be deleted"
                    );
                }
            }
            Err(err) => {
                error!(bucket, "Batch delete failed: {}", err);
                outcome.failed.extend(keys.iter().cloned());
            }
        }
        outcome
    }

    /// Delete a bucket; anything but a success status is an error
    #[instrument(skip(self))]
    pub async fn delete_bucket(&self, bucket: &str) -> StorageResult<()> {
        let client = self.client.acquire().await?;
        let status = client.delete_bucket(bucket).await?;
        if status != 204 {
            return Err(StorageError::DeleteBucket {
                bucket: bucket.to_string(),
                status,
            });
        }
        Ok(())
    }
}
