use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_credential_types::Credentials;
use aws_sdk_s3::config::http::HttpResponse;
use aws_sdk_s3::error::{ProvideErrorMetadata, SdkError};
use aws_sdk_s3::primitives::ByteStream as AwsByteStream;
use aws_sdk_s3::types::{
    BucketLocationConstraint, CompletedMultipartUpload, CompletedPart, CreateBucketConfiguration,
    Delete, ObjectIdentifier,
};
use aws_sdk_s3::Client;
use bytes::Bytes;

use super::{DeleteObjectsOutput, ObjectBackend, ObjectBody, ObjectHead};
use crate::{
    ByteRange, ListingItem, ListingPage, PartRecord, S3StorageConfig, StorageError, StorageResult,
};

/// Object backend speaking the S3 API through the AWS SDK
#[derive(Clone)]
pub struct S3Backend {
    client: Client,
}

impl S3Backend {
    pub async fn connect(config: &S3StorageConfig) -> Self {
        let credentials = Credentials::new(
            config.access_key_id.clone(),
            config.secret_access_key.clone(),
            None,
            None,
            "dog-s3storage",
        );

        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(config.region().to_string()))
            .credentials_provider(credentials);

        let endpoint = config.resolved_endpoint();
        if let Some(url) = &endpoint {
            loader = loader.endpoint_url(url.clone());
        }
        let aws_config = loader.load().await;

        let client = Client::from_conf(
            aws_sdk_s3::config::Builder::from(&aws_config)
                // Custom endpoints (MinIO, RustFS) rarely support virtual-hosted buckets
                .force_path_style(endpoint.is_some())
                .build(),
        );

        Self { client }
    }

    /// Wrap an already configured SDK client
    pub fn from_client(client: Client) -> Self {
        Self { client }
    }

    fn missing_field(field: &str) -> StorageError {
        StorageError::payload(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("response is missing {}", field),
        ))
    }

    fn build_error(err: aws_sdk_s3::error::BuildError) -> StorageError {
        StorageError::invalid(err.to_string())
    }
}

/// Translate an SDK failure into the crate's error taxonomy
fn map_sdk_error<E>(err: SdkError<E, HttpResponse>) -> StorageError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
{
    if let Some(service) = err.as_service_error() {
        let status = err.raw_response().map(|response| response.status().as_u16());
        let code = service
            .code()
            .map(str::to_string)
            .or_else(|| status.map(|s| s.to_string()))
            .unwrap_or_default();
        let message = service.message().unwrap_or_default().to_string();
        return StorageError::service(code, status, message);
    }

    match err {
        SdkError::DispatchFailure(_) | SdkError::TimeoutError(_) => StorageError::transport(err),
        SdkError::ResponseError(_) => StorageError::payload(err),
        _ => StorageError::backend(err),
    }
}

/// `CopySource` header value; key segments must be URL-encoded
fn copy_source(bucket: &str, key: &str) -> String {
    let key = key
        .split('/')
        .map(|segment| urlencoding::encode(segment))
        .collect::<Vec<_>>()
        .join("/");
    format!("{}/{}", bucket, key)
}

#[async_trait]
impl ObjectBackend for S3Backend {
    async fn head_bucket(&self, bucket: &str) -> StorageResult<()> {
        self.client
            .head_bucket()
            .bucket(bucket)
            .send()
            .await
            .map_err(map_sdk_error)?;
        Ok(())
    }

    async fn create_bucket(
        &self,
        bucket: &str,
        location_constraint: Option<&str>,
    ) -> StorageResult<()> {
        let mut request = self.client.create_bucket().bucket(bucket);
        if let Some(region) = location_constraint {
            request = request.create_bucket_configuration(
                CreateBucketConfiguration::builder()
                    .location_constraint(BucketLocationConstraint::from(region))
                    .build(),
            );
        }
        request.send().await.map_err(map_sdk_error)?;
        Ok(())
    }

    async fn delete_bucket(&self, bucket: &str) -> StorageResult<u16> {
        self.client
            .delete_bucket()
            .bucket(bucket)
            .send()
            .await
            .map_err(map_sdk_error)?;
        // The SDK only resolves successfully on the API's 204 No Content
        Ok(204)
    }

    async fn head_object(&self, bucket: &str, key: &str) -> StorageResult<ObjectHead> {
        let output = self
            .client
            .head_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(map_sdk_error)?;

        Ok(ObjectHead {
            size_bytes: output.content_length().unwrap_or(0).max(0) as u64,
            content_type: output.content_type().map(str::to_string),
            etag: output.e_tag().map(str::to_string),
        })
    }

    async fn get_object(
        &self,
        bucket: &str,
        key: &str,
        range: Option<ByteRange>,
    ) -> StorageResult<ObjectBody> {
        let mut request = self.client.get_object().bucket(bucket).key(key);
        if let Some(range) = range {
            request = request.range(range.header_value());
        }

        let output = request.send().await.map_err(map_sdk_error)?;
        let content_length = output.content_length().unwrap_or(0).max(0) as u64;
        let content_type = output.content_type().map(str::to_string);

        let mut body = output.body;
        let stream = async_stream::stream! {
            while let Some(chunk) = body.next().await {
                match chunk {
                    Ok(bytes) => yield Ok(bytes),
                    Err(e) => {
                        yield Err(std::io::Error::new(std::io::ErrorKind::Other, e));
                        return;
                    }
                }
            }
        };

        Ok(ObjectBody {
            stream: Box::pin(stream),
            content_length,
            content_type,
        })
    }

    async fn copy_object(
        &self,
        bucket: &str,
        source_key: &str,
        dest_key: &str,
    ) -> StorageResult<()> {
        self.client
            .copy_object()
            .copy_source(copy_source(bucket, source_key))
            .bucket(bucket)
            .key(dest_key)
            .send()
            .await
            .map_err(map_sdk_error)?;
        Ok(())
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> StorageResult<()> {
        self.client
            .delete_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(map_sdk_error)?;
        Ok(())
    }

    async fn delete_objects(
        &self,
        bucket: &str,
        keys: &[String],
    ) -> StorageResult<DeleteObjectsOutput> {
        let objects = keys
            .iter()
            .map(|key| ObjectIdentifier::builder().key(key).build())
            .collect::<Result<Vec<_>, _>>()
            .map_err(Self::build_error)?;
        let delete = Delete::builder()
            .set_objects(Some(objects))
            .build()
            .map_err(Self::build_error)?;

        let output = self
            .client
            .delete_objects()
            .bucket(bucket)
            .delete(delete)
            .send()
            .await
            .map_err(map_sdk_error)?;

        Ok(DeleteObjectsOutput {
            deleted: output
                .deleted()
                .iter()
                .filter_map(|o| o.key().map(str::to_string))
                .collect(),
            errors: output
                .errors()
                .iter()
                .filter_map(|e| e.key().map(str::to_string))
                .collect(),
        })
    }

    async fn create_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        content_type: Option<&str>,
    ) -> StorageResult<String> {
        let output = self
            .client
            .create_multipart_upload()
            .bucket(bucket)
            .key(key)
            .set_content_type(content_type.map(str::to_string))
            .send()
            .await
            .map_err(map_sdk_error)?;

        output
            .upload_id()
            .map(str::to_string)
            .ok_or_else(|| Self::missing_field("UploadId"))
    }

    async fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: u32,
        body: Bytes,
    ) -> StorageResult<String> {
        let output = self
            .client
            .upload_part()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .part_number(part_number as i32)
            .body(AwsByteStream::from(body))
            .send()
            .await
            .map_err(map_sdk_error)?;

        output
            .e_tag()
            .map(str::to_string)
            .ok_or_else(|| Self::missing_field("ETag"))
    }

    async fn complete_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: &[PartRecord],
    ) -> StorageResult<()> {
        let completed = parts
            .iter()
            .map(|part| {
                CompletedPart::builder()
                    .part_number(part.part_number as i32)
                    .e_tag(&part.etag)
                    .build()
            })
            .collect::<Vec<_>>();

        self.client
            .complete_multipart_upload()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .multipart_upload(
                CompletedMultipartUpload::builder()
                    .set_parts(Some(completed))
                    .build(),
            )
            .send()
            .await
            .map_err(map_sdk_error)?;
        Ok(())
    }

    async fn abort_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
    ) -> StorageResult<()> {
        self.client
            .abort_multipart_upload()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .send()
            .await
            .map_err(map_sdk_error)?;
        Ok(())
    }

    async fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
        continuation_token: Option<&str>,
        max_keys: i32,
    ) -> StorageResult<ListingPage> {
        let output = self
            .client
            .list_objects_v2()
            .bucket(bucket)
            .prefix(prefix)
            .set_continuation_token(continuation_token.map(str::to_string))
            .max_keys(max_keys)
            .send()
            .await
            .map_err(map_sdk_error)?;

        let items = output
            .contents()
            .iter()
            .filter_map(|object| {
                let key = object.key()?.to_string();
                Some(ListingItem {
                    key,
                    size_bytes: object.size().unwrap_or(0).max(0) as u64,
                    last_modified: object.last_modified().and_then(|dt| {
                        chrono::DateTime::from_timestamp(dt.secs(), dt.subsec_nanos())
                    }),
                })
            })
            .collect();

        Ok(ListingPage {
            items,
            continuation_token: output.next_continuation_token().map(str::to_string),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn copy_source_encodes_key_segments() {
        assert_eq!(copy_source("media", "acme/2026/10/abc"), "media/acme/2026/10/abc");
        assert_eq!(
            copy_source("media", "acme/my file+1.txt"),
            "media/acme/my%20file%2B1.txt"
        );
        assert_eq!(copy_source("media", "café/x"), "media/caf%C3%A9/x");
    }
}
