use bytes::Bytes;
use chrono::Datelike;
use futures_core::Stream;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use uuid::Uuid;

use crate::{StorageError, StorageResult};

/// Stream of bytes for blob content
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, std::io::Error>> + Send>>;

/// Context for storage operations (tenant, bucket override, request info)
#[derive(Debug, Clone)]
pub struct StorageCtx {
    pub tenant_id: String,
    pub bucket_override: Option<String>,
    pub request_id: String,
}

impl StorageCtx {
    pub fn new<S: Into<String>>(tenant_id: S) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            bucket_override: None,
            request_id: Uuid::new_v4().to_string(),
        }
    }

    pub fn with_bucket_override<S: Into<String>>(mut self, bucket: S) -> Self {
        self.bucket_override = Some(bucket.into());
        self
    }

    pub fn with_request_id<S: Into<String>>(mut self, request_id: S) -> Self {
        self.request_id = request_id.into();
        self
    }
}

/// Reference to a completed upload
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredObject {
    pub key: String,
    pub bucket_name: String,
    pub content_type: String,
    pub size_bytes: u64,
    pub filename: String,
}

impl StoredObject {
    /// An empty key means nothing has been uploaded yet
    pub fn is_uploaded(&self) -> bool {
        !self.key.is_empty()
    }
}

/// Half-open byte range `[start, end)` for partial reads
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    /// Exclusive end; `None` reads to the end of the object
    pub end: Option<u64>,
}

impl ByteRange {
    pub fn new(start: u64, end: u64) -> StorageResult<Self> {
        if end <= start {
            return Err(StorageError::invalid(format!(
                "Empty byte range: start {} must be below end {}",
                start, end
            )));
        }
        Ok(Self { start, end: Some(end) })
    }

    pub fn from_start(start: u64) -> Self {
        Self { start, end: None }
    }

    /// Value for the HTTP `Range` header; the wire format uses an inclusive end
    pub fn header_value(&self) -> String {
        match self.end {
            Some(end) => format!("bytes={}-{}", self.start, end - 1),
            None => format!("bytes={}-", self.start),
        }
    }

    /// Number of bytes covered within an object of `total_size`
    pub fn length(&self, total_size: u64) -> u64 {
        let end = self.end.unwrap_or(total_size).min(total_size);
        end.saturating_sub(self.start)
    }
}

/// Outcome of an operation whose failure must never block the caller
#[derive(Debug)]
pub enum BestEffort {
    Done,
    /// Nothing to do, e.g. no stale upload to abort
    Skipped,
    Failed(StorageError),
}

impl BestEffort {
    pub fn is_done(&self) -> bool {
        matches!(self, Self::Done)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

/// Strategy for generating object keys for new uploads
pub trait KeyStrategy: Send + Sync {
    /// Generate a globally unique key owned by the context's tenant
    fn object_key(&self, ctx: &StorageCtx) -> String;
}

/// Default key strategy: tenant/year/month/uuid
#[derive(Debug, Clone, Default)]
pub struct DefaultKeyStrategy;

impl KeyStrategy for DefaultKeyStrategy {
    fn object_key(&self, ctx: &StorageCtx) -> String {
        let now = chrono::Utc::now();
        format!(
            "{}/{:04}/{:02}/{}",
            ctx.tenant_id,
            now.year(),
            now.month(),
            Uuid::new_v4().simple()
        )
    }
}

/// Decides whether the object a field used to reference is deleted on overwrite
pub trait CleanupPolicy: Send + Sync {
    fn should_clean(&self, previous: &StoredObject, field: &str) -> bool;
}

/// Always reclaim the superseded object
#[derive(Debug, Clone, Default)]
pub struct AlwaysClean;

impl CleanupPolicy for AlwaysClean {
    fn should_clean(&self, _previous: &StoredObject, _field: &str) -> bool {
        true
    }
}

/// Keep superseded objects, e.g. when other resources may still reference them
#[derive(Debug, Clone, Default)]
pub struct NeverClean;

impl CleanupPolicy for NeverClean {
    fn should_clean(&self, _previous: &StoredObject, _field: &str) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_header_uses_inclusive_end() {
        let range = ByteRange::new(100, 200).unwrap();
        assert_eq!(range.header_value(), "bytes=100-199");
        assert_eq!(range.length(1_000), 100);
        assert_eq!(range.length(150), 50);

        assert_eq!(ByteRange::from_start(5).header_value(), "bytes=5-");
        assert!(ByteRange::new(10, 10).is_err());
    }

    #[test]
    fn default_keys_live_under_the_tenant_prefix() {
        let ctx = StorageCtx::new("acme");
        let first = DefaultKeyStrategy.object_key(&ctx);
        let second = DefaultKeyStrategy.object_key(&ctx);

        assert!(first.starts_with("acme/"));
        assert_eq!(first.split('/').count(), 4);
        assert_ne!(first, second);
    }
}
