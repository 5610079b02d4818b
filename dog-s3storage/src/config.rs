use std::env;
use std::time::Duration;

use serde::Deserialize;

use crate::{StorageError, StorageResult};

/// Smallest part the provider accepts for any part but the last one
pub const MIN_PART_SIZE: usize = 5 * 1024 * 1024;

/// Region whose buckets must be created without a location constraint
pub const DEFAULT_REGION: &str = "us-east-1";

pub const DEFAULT_MAX_POOL_CONNECTIONS: usize = 30;

pub const DEFAULT_BUCKET_NAME_FORMAT: &str = "{container}{delimiter}{base}";

/// Configuration for the S3-compatible blob store
#[derive(Debug, Clone, Deserialize)]
pub struct S3StorageConfig {
    #[serde(alias = "aws_client_id")]
    pub access_key_id: String,

    #[serde(alias = "aws_client_secret")]
    pub secret_access_key: String,

    /// Custom endpoint for S3-compatible services (MinIO, RustFS, ...)
    #[serde(default)]
    pub endpoint_url: Option<String>,

    #[serde(default = "default_ssl")]
    pub ssl: bool,

    #[serde(default)]
    pub region_name: Option<String>,

    /// Base bucket name every tenant bucket is derived from
    #[serde(alias = "bucket")]
    pub base_bucket: String,

    /// Template with `{container}`, `{delimiter}` and `{base}` placeholders
    #[serde(default = "default_bucket_name_format")]
    pub bucket_name_format: String,

    /// Overrides the delimiter derived from the base bucket name
    #[serde(default)]
    pub bucket_delimiter: Option<String>,

    /// Upper bound of concurrent requests against the store
    #[serde(default = "default_max_pool_connections")]
    pub max_pool_connections: usize,

    #[serde(default)]
    pub retry: RetrySettings,

    /// Upload part size and download chunk size
    #[serde(default = "default_part_size")]
    pub part_size: usize,
}

/// Retry behaviour for multipart operations
#[derive(Debug, Clone, Deserialize)]
pub struct RetrySettings {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
        }
    }
}

impl RetrySettings {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }
}

fn default_ssl() -> bool {
    true
}

fn default_bucket_name_format() -> String {
    DEFAULT_BUCKET_NAME_FORMAT.to_string()
}

fn default_max_pool_connections() -> usize {
    DEFAULT_MAX_POOL_CONNECTIONS
}

fn default_part_size() -> usize {
    MIN_PART_SIZE
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    100
}

impl S3StorageConfig {
    /// Create a config with defaults for everything but credentials and base bucket
    pub fn new<K, S, B>(access_key_id: K, secret_access_key: S, base_bucket: B) -> Self
    where
        K: Into<String>,
        S: Into<String>,
        B: Into<String>,
    {
        Self {
            access_key_id: access_key_id.into(),
            secret_access_key: secret_access_key.into(),
            endpoint_url: None,
            ssl: default_ssl(),
            region_name: None,
            base_bucket: base_bucket.into(),
            bucket_name_format: default_bucket_name_format(),
            bucket_delimiter: None,
            max_pool_connections: default_max_pool_connections(),
            retry: RetrySettings::default(),
            part_size: default_part_size(),
        }
    }

    /// Load configuration from `S3STORAGE_*` environment variables
    pub fn from_env() -> StorageResult<Self> {
        fn required(key: &str) -> StorageResult<String> {
            env::var(key)
                .map_err(|_| StorageError::config(format!("{} environment variable required", key)))
        }

        fn parsed<T: std::str::FromStr>(key: &str) -> StorageResult<Option<T>> {
            match env::var(key) {
                Ok(raw) => raw
                    .parse()
                    .map(Some)
                    .map_err(|_| {
                        StorageError::config(format!("{} has an invalid value: {}", key, raw))
                    }),
                Err(_) => Ok(None),
            }
        }

        let mut config = Self::new(
            required("S3STORAGE_ACCESS_KEY_ID")?,
            required("S3STORAGE_SECRET_ACCESS_KEY")?,
            required("S3STORAGE_BUCKET")?,
        );

        config.endpoint_url = env::var("S3STORAGE_ENDPOINT_URL").ok();
        config.region_name = env::var("S3STORAGE_REGION").ok();
        config.bucket_delimiter = env::var("S3STORAGE_BUCKET_DELIMITER").ok();
        if let Ok(format) = env::var("S3STORAGE_BUCKET_NAME_FORMAT") {
            config.bucket_name_format = format;
        }
        if let Some(ssl) = parsed("S3STORAGE_SSL")? {
            config.ssl = ssl;
        }
        if let Some(max) = parsed("S3STORAGE_MAX_POOL_CONNECTIONS")? {
            config.max_pool_connections = max;
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject settings the engine cannot work with
    pub fn validate(&self) -> StorageResult<()> {
        if self.base_bucket.trim().is_empty() {
            return Err(StorageError::config("base bucket name must not be empty"));
        }
        if self.max_pool_connections == 0 {
            return Err(StorageError::config("max_pool_connections must be at least 1"));
        }
        if self.retry.max_attempts == 0 {
            return Err(StorageError::config("retry.max_attempts must be at least 1"));
        }
        if self.part_size < MIN_PART_SIZE {
            return Err(StorageError::config(format!(
                "part_size {} is below the provider minimum of {}",
                self.part_size, MIN_PART_SIZE
            )));
        }
        Ok(())
    }

    /// Region to send requests to, falling back to the provider default
    pub fn region(&self) -> &str {
        self.region_name.as_deref().unwrap_or(DEFAULT_REGION)
    }

    /// Endpoint with a scheme matching the `ssl` flag
    pub fn resolved_endpoint(&self) -> Option<String> {
        self.endpoint_url.as_ref().map(|url| {
            if url.contains("://") {
                url.clone()
            } else if self.ssl {
                format!("https://{}", url)
            } else {
                format!("http://{}", url)
            }
        })
    }

    pub fn with_endpoint_url<S: Into<String>>(mut self, url: S) -> Self {
        self.endpoint_url = Some(url.into());
        self
    }

    pub fn with_ssl(mut self, ssl: bool) -> Self {
        self.ssl = ssl;
        self
    }

    pub fn with_region<S: Into<String>>(mut self, region: S) -> Self {
        self.region_name = Some(region.into());
        self
    }

    pub fn with_bucket_name_format<S: Into<String>>(mut self, format: S) -> Self {
        self.bucket_name_format = format.into();
        self
    }

    pub fn with_bucket_delimiter<S: Into<String>>(mut self, delimiter: S) -> Self {
        self.bucket_delimiter = Some(delimiter.into());
        self
    }

    pub fn with_max_pool_connections(mut self, max: usize) -> Self {
        self.max_pool_connections = max;
        self
    }

    pub fn with_retry(mut self, max_attempts: u32, base_delay: Duration) -> Self {
        self.retry = RetrySettings {
            max_attempts,
            base_delay_ms: base_delay.as_millis() as u64,
        };
        self
    }

    /// Set the part size; `validate` enforces the provider minimum
    pub fn with_part_size(mut self, bytes: usize) -> Self {
        self.part_size = bytes;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_legacy_setting_names() {
        let config: S3StorageConfig = serde_json::from_value(serde_json::json!({
            "aws_client_id": "key",
            "aws_client_secret": "secret",
            "bucket": "media",
            "region_name": "eu-west-1",
            "ssl": false,
            "max_pool_connections": 64
        }))
        .unwrap();

        assert_eq!(config.access_key_id, "key");
        assert_eq!(config.base_bucket, "media");
        assert_eq!(config.bucket_name_format, DEFAULT_BUCKET_NAME_FORMAT);
        assert_eq!(config.max_pool_connections, 64);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.part_size, MIN_PART_SIZE);
        assert!(!config.ssl);
        assert_eq!(config.region(), "eu-west-1");
    }

    #[test]
    fn validate_rejects_unusable_settings() {
        let base = S3StorageConfig::new("k", "s", "media");
        assert!(base.validate().is_ok());
        assert!(base.clone().with_max_pool_connections(0).validate().is_err());
        assert!(base.clone().with_part_size(1024).validate().is_err());
        assert!(S3StorageConfig::new("k", "s", " ").validate().is_err());
    }

    #[test]
    fn endpoint_scheme_follows_ssl_flag() {
        let config = S3StorageConfig::new("k", "s", "media").with_endpoint_url("localhost:9000");
        assert_eq!(config.resolved_endpoint().as_deref(), Some("https://localhost:9000"));

        let config = config.with_ssl(false);
        assert_eq!(config.resolved_endpoint().as_deref(), Some("http://localhost:9000"));

        let config = config.with_endpoint_url("https://minio.internal");
        assert_eq!(config.resolved_endpoint().as_deref(), Some("https://minio.internal"));
    }
}
