use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, error, info, instrument};

use crate::config::DEFAULT_REGION;
use crate::{ErrorKind, ObjectStoreClient, S3StorageConfig, StorageCtx, StorageError, StorageResult};

/// Derives tenant bucket names from the configured template
#[derive(Debug, Clone)]
pub struct BucketNaming {
    base: String,
    format: String,
    delimiter: String,
}

impl BucketNaming {
    pub fn new<B, F>(base: B, format: F, delimiter: Option<String>) -> Self
    where
        B: Into<String>,
        F: Into<String>,
    {
        let base = base.into();
        // Dotted base names are DNS-style, keep the tenant segment in the same style
        let delimiter = delimiter
            .filter(|d| !d.is_empty())
            .unwrap_or_else(|| if base.contains('.') { ".".into() } else { "-".into() });
        Self {
            base,
            format: format.into(),
            delimiter,
        }
    }

    pub fn from_config(config: &S3StorageConfig) -> Self {
        Self::new(
            config.base_bucket.clone(),
            config.bucket_name_format.clone(),
            config.bucket_delimiter.clone(),
        )
    }

    pub fn delimiter(&self) -> &str {
        &self.delimiter
    }

    /// Bucket name for a tenant; underscores are not valid in bucket names
    pub fn bucket_name(&self, tenant_id: &str) -> String {
        self.format
            .replace("{container}", &tenant_id.to_lowercase())
            .replace("{delimiter}", &self.delimiter)
            .replace("{base}", &self.base)
            .replace('_', "-")
    }
}

/// Process-wide set of buckets known to exist.
///
/// Entries are never evicted: once a bucket has been seen or created it is
/// assumed to stay. A bucket removed behind our back shows up as an error
/// on its next use.
#[derive(Debug, Default)]
pub struct BucketRegistry {
    entries: DashMap<String, String>,
}

impl BucketRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, bucket: &str) -> bool {
        self.entries.contains_key(bucket)
    }

    /// Remember `bucket` as existing for `tenant_id`
    pub fn insert(&self, bucket: &str, tenant_id: &str) {
        self.entries.insert(bucket.to_string(), tenant_id.to_string());
    }

    /// Tenant the bucket was first resolved for
    pub fn tenant_of(&self, bucket: &str) -> Option<String> {
        self.entries.get(bucket).map(|entry| entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Resolves, creates and caches tenant buckets
#[derive(Clone)]
pub struct BucketResolver {
    client: ObjectStoreClient,
    naming: BucketNaming,
    region: Option<String>,
    registry: Arc<BucketRegistry>,
}

impl BucketResolver {
    pub fn new(
        client: ObjectStoreClient,
        naming: BucketNaming,
        region: Option<String>,
        registry: Arc<BucketRegistry>,
    ) -> Self {
        Self {
            client,
            naming,
            region,
            registry,
        }
    }

    pub fn naming(&self) -> &BucketNaming {
        &self.naming
    }

    pub fn registry(&self) -> &Arc<BucketRegistry> {
        &self.registry
    }

    /// Resolve the bucket for the context's tenant
    pub async fn resolve_for(&self, ctx: &StorageCtx) -> StorageResult<String> {
        self.resolve(&ctx.tenant_id, ctx.bucket_override.as_deref()).await
    }

    /// Resolve a tenant's bucket, creating it on first use
    #[instrument(skip(self))]
    pub async fn resolve(
        &self,
        tenant_id: &str,
        override_name: Option<&str>,
    ) -> StorageResult<String> {
        if let Some(bucket) = override_name.filter(|b| !b.is_empty()) {
            if !self.check_accessibility(bucket).await? {
                error!(bucket, tenant_id, "Bucket override is not accessible");
                return Err(StorageError::precondition(format!(
                    "Bucket {} is not accessible",
                    bucket
                )));
            }
            return Ok(bucket.to_string());
        }

        let bucket = self.naming.bucket_name(tenant_id);
        if self.registry.contains(&bucket) {
            return Ok(bucket);
        }

        self.get_or_create(&bucket).await?;
        self.registry.insert(&bucket, tenant_id);
        Ok(bucket)
    }

    /// Lightweight HEAD check; not-found and access-denied both mean inaccessible
    pub async fn check_accessibility(&self, bucket: &str) -> StorageResult<bool> {
        let client = self.client.acquire().await?;
        match client.head_bucket(bucket).await {
            Ok(()) => Ok(true),
            Err(err) if matches!(err.kind(), ErrorKind::NotFound | ErrorKind::Denied) => {
                debug!(bucket, "Bucket is not accessible: {}", err);
                Ok(false)
            }
            Err(err) => Err(err),
        }
    }

    /// Location constraint for bucket creation, omitted in the default region
    pub fn location_constraint(&self) -> Option<&str> {
        self.region.as_deref().filter(|region| *region != DEFAULT_REGION)
    }

    async fn get_or_create(&self, bucket: &str) -> StorageResult<()> {
        let missing = {
            let client = self.client.acquire().await?;
            match client.head_bucket(bucket).await {
                Ok(()) => false,
                Err(err) if err.is_not_found() => true,
                Err(err) => return Err(err),
            }
        };

        if missing {
            let client = self.client.acquire().await?;
            match client.create_bucket(bucket, self.location_constraint()).await {
                Ok(()) => info!(bucket, "Created bucket"),
                // Another task won the race to create it
                Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                    debug!(bucket, "Bucket already created")
                }
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delimiter_follows_base_bucket_style() {
        let dashed = BucketNaming::new("media", "{container}{delimiter}{base}", None);
        assert_eq!(dashed.bucket_name("Acme"), "acme-media");

        let dotted = BucketNaming::new("media.example.com", "{container}{delimiter}{base}", None);
        assert_eq!(dotted.bucket_name("acme"), "acme.media.example.com");
    }

    #[test]
    fn underscores_are_replaced() {
        let naming = BucketNaming::new("my_media", "{container}{delimiter}{base}", None);
        assert_eq!(naming.bucket_name("big_tenant"), "big-tenant-my-media");
    }

    #[test]
    fn explicit_delimiter_and_template_are_honoured() {
        let naming = BucketNaming::new("media", "{base}{delimiter}{container}", Some("--".into()));
        assert_eq!(naming.bucket_name("acme"), "media--acme");
    }

    #[test]
    fn empty_delimiter_falls_back_to_default() {
        let naming =
            BucketNaming::new("media", "{container}{delimiter}{base}", Some(String::new()));
        assert_eq!(naming.delimiter(), "-");
        assert_eq!(naming.bucket_name("acme"), "acme-media");
    }

    #[test]
    fn registry_never_forgets() {
        let registry = BucketRegistry::new();
        assert!(registry.is_empty());
        registry.insert("acme-media", "acme");
        registry.insert("acme-media", "acme");
        assert!(registry.contains("acme-media"));
        assert_eq!(registry.tenant_of("acme-media").as_deref(), Some("acme"));
        assert_eq!(registry.len(), 1);
    }
}
