//! In-process object backend.
//!
//! Behaves like a single-region S3 endpoint closely enough to drive the
//! whole engine without a network: buckets, objects, multipart uploads and
//! paginated listings. Every call is recorded and any operation can be made
//! to fail a fixed number of times, which is what the test-suite relies on.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use uuid::Uuid;

use super::{DeleteObjectsOutput, ObjectBackend, ObjectBody, ObjectHead};
use crate::{ByteRange, ListingItem, ListingPage, PartRecord, StorageError, StorageResult};

const BODY_SEGMENT: usize = 4096;
const DEFAULT_MAX_KEYS: usize = 1000;

/// Remote operations, one per API call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    HeadBucket,
    CreateBucket,
    DeleteBucket,
    HeadObject,
    GetObject,
    CopyObject,
    DeleteObject,
    DeleteObjects,
    CreateMultipartUpload,
    UploadPart,
    CompleteMultipartUpload,
    AbortMultipartUpload,
    ListObjects,
}

/// Failure to inject into an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// 500 InternalError
    ServerError,
    /// 503 SlowDown
    Throttled,
    /// Connection dropped before a response arrived
    ConnectionReset,
    /// Response body cut short
    Truncated,
    /// 404 with no error code, as answered to HEAD requests
    NotFound,
    /// 403 AccessDenied
    AccessDenied,
}

impl Fault {
    fn to_error(self) -> StorageError {
        match self {
            Self::ServerError => StorageError::service(
                "InternalError",
                Some(500),
                "We encountered an internal error",
            ),
            Self::Throttled => {
                StorageError::service("SlowDown", Some(503), "Please reduce your request rate")
            }
            Self::ConnectionReset => StorageError::transport(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "connection reset by peer",
            )),
            Self::Truncated => StorageError::payload(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "response payload ended early",
            )),
            Self::NotFound => StorageError::service("", Some(404), ""),
            Self::AccessDenied => StorageError::service("AccessDenied", Some(403), "Access Denied"),
        }
    }
}

/// A recorded remote call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub operation: Operation,
    pub bucket: String,
    pub key: Option<String>,
    pub upload_id: Option<String>,
    pub part_number: Option<u32>,
}

impl Call {
    fn new(operation: Operation, bucket: &str) -> Self {
        Self {
            operation,
            bucket: bucket.to_string(),
            key: None,
            upload_id: None,
            part_number: None,
        }
    }

    fn key(mut self, key: &str) -> Self {
        self.key = Some(key.to_string());
        self
    }

    fn upload(mut self, upload_id: &str) -> Self {
        self.upload_id = Some(upload_id.to_string());
        self
    }

    fn part(mut self, part_number: u32) -> Self {
        self.part_number = Some(part_number);
        self
    }
}

#[derive(Debug, Clone)]
struct StoredBlob {
    data: Bytes,
    content_type: Option<String>,
    etag: String,
    last_modified: DateTime<Utc>,
}

#[derive(Debug)]
struct PendingUpload {
    bucket: String,
    key: String,
    content_type: Option<String>,
    parts: BTreeMap<u32, (String, Bytes)>,
}

#[derive(Debug, Default)]
struct State {
    buckets: BTreeMap<String, BTreeMap<String, StoredBlob>>,
    uploads: HashMap<String, PendingUpload>,
    completed: HashMap<String, Vec<PartRecord>>,
    calls: Vec<Call>,
    faults: HashMap<Operation, (Fault, usize)>,
    failing_keys: HashSet<String>,
    delete_bucket_status: Option<u16>,
}

impl State {
    fn take_fault(&mut self, operation: Operation) -> Option<Fault> {
        let (fault, remaining) = self.faults.get_mut(&operation)?;
        let fault = *fault;
        *remaining -= 1;
        if *remaining == 0 {
            self.faults.remove(&operation);
        }
        Some(fault)
    }

    fn bucket(&self, bucket: &str) -> StorageResult<&BTreeMap<String, StoredBlob>> {
        self.buckets.get(bucket).ok_or_else(|| no_such_bucket(bucket))
    }

    fn bucket_mut(&mut self, bucket: &str) -> StorageResult<&mut BTreeMap<String, StoredBlob>> {
        self.buckets.get_mut(bucket).ok_or_else(|| no_such_bucket(bucket))
    }
}

fn no_such_bucket(bucket: &str) -> StorageError {
    StorageError::service(
        "NoSuchBucket",
        Some(404),
        format!("The specified bucket does not exist: {}", bucket),
    )
}

fn no_such_key(key: &str) -> StorageError {
    StorageError::service(
        "NoSuchKey",
        Some(404),
        format!("The specified key does not exist: {}", key),
    )
}

fn no_such_upload(upload_id: &str) -> StorageError {
    StorageError::service(
        "NoSuchUpload",
        Some(404),
        format!("The specified upload does not exist: {}", upload_id),
    )
}

fn new_etag() -> String {
    format!("\"{}\"", Uuid::new_v4().simple())
}

struct Inner {
    state: Mutex<State>,
    latency: Duration,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

/// Tracks requests currently being served
struct InFlight<'a> {
    counter: &'a AtomicUsize,
}

impl<'a> InFlight<'a> {
    fn enter(counter: &'a AtomicUsize, peak: &AtomicUsize) -> Self {
        let now = counter.fetch_add(1, Ordering::SeqCst) + 1;
        peak.fetch_max(now, Ordering::SeqCst);
        Self { counter }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::SeqCst);
    }
}

/// In-memory object store
#[derive(Clone)]
pub struct MemoryBackend {
    inner: Arc<Inner>,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::with_latency(Duration::ZERO)
    }

    /// Every call sleeps for `latency` while counted as in flight
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State::default()),
                latency,
                in_flight: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            }),
        }
    }

    /// Create a bucket directly, bypassing call recording
    pub fn insert_bucket(&self, bucket: &str) {
        self.inner.state.lock().buckets.entry(bucket.to_string()).or_default();
    }

    /// Store an object directly, creating the bucket if needed
    pub fn insert_object(&self, bucket: &str, key: &str, data: impl Into<Bytes>) {
        let mut state = self.inner.state.lock();
        state.buckets.entry(bucket.to_string()).or_default().insert(
            key.to_string(),
            StoredBlob {
                data: data.into(),
                content_type: None,
                etag: new_etag(),
                last_modified: Utc::now(),
            },
        );
    }

    /// Make the next `times` calls of `operation` fail with `fault`
    pub fn fail(&self, operation: Operation, fault: Fault, times: usize) {
        if times > 0 {
            self.inner.state.lock().faults.insert(operation, (fault, times));
        }
    }

    /// Report these keys as failed in batch deletes
    pub fn fail_keys_on_delete<I, S>(&self, keys: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.inner
            .state
            .lock()
            .failing_keys
            .extend(keys.into_iter().map(Into::into));
    }

    /// Answer bucket deletion with this status instead of 204
    pub fn set_delete_bucket_status(&self, status: u16) {
        self.inner.state.lock().delete_bucket_status = Some(status);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.inner.state.lock().calls.clone()
    }

    pub fn calls_to(&self, operation: Operation) -> Vec<Call> {
        self.inner
            .state
            .lock()
            .calls
            .iter()
            .filter(|c| c.operation == operation)
            .cloned()
            .collect()
    }

    pub fn count(&self, operation: Operation) -> usize {
        self.calls_to(operation).len()
    }

    pub fn has_bucket(&self, bucket: &str) -> bool {
        self.inner.state.lock().buckets.contains_key(bucket)
    }

    pub fn object(&self, bucket: &str, key: &str) -> Option<Bytes> {
        let state = self.inner.state.lock();
        state.buckets.get(bucket)?.get(key).map(|blob| blob.data.clone())
    }

    pub fn object_keys(&self, bucket: &str) -> Vec<String> {
        let state = self.inner.state.lock();
        state
            .buckets
            .get(bucket)
            .map(|objects| objects.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Upload ids of multipart uploads neither completed nor aborted
    pub fn pending_uploads(&self) -> Vec<String> {
        self.inner.state.lock().uploads.keys().cloned().collect()
    }

    /// Parts submitted when `upload_id` was completed
    pub fn completed_parts(&self, upload_id: &str) -> Option<Vec<PartRecord>> {
        self.inner.state.lock().completed.get(upload_id).cloned()
    }

    /// Highest number of calls that were in flight at the same time
    pub fn peak_concurrency(&self) -> usize {
        self.inner.peak.load(Ordering::SeqCst)
    }

    async fn begin(&self, call: Call) -> StorageResult<InFlight<'_>> {
        let fault = {
            let mut state = self.inner.state.lock();
            let operation = call.operation;
            state.calls.push(call);
            state.take_fault(operation)
        };

        let guard = InFlight::enter(&self.inner.in_flight, &self.inner.peak);
        if !self.inner.latency.is_zero() {
            tokio::time::sleep(self.inner.latency).await;
        }

        match fault {
            Some(fault) => Err(fault.to_error()),
            None => Ok(guard),
        }
    }
}

#[async_trait]
impl ObjectBackend for MemoryBackend {
    async fn head_bucket(&self, bucket: &str) -> StorageResult<()> {
        let _guard = self.begin(Call::new(Operation::HeadBucket, bucket)).await?;
        if self.inner.state.lock().buckets.contains_key(bucket) {
            Ok(())
        } else {
            Err(StorageError::service("NotFound", Some(404), ""))
        }
    }

    async fn create_bucket(
        &self,
        bucket: &str,
        _location_constraint: Option<&str>,
    ) -> StorageResult<()> {
        let _guard = self.begin(Call::new(Operation::CreateBucket, bucket)).await?;
        let mut state = self.inner.state.lock();
        if state.buckets.contains_key(bucket) {
            return Err(StorageError::service(
                "BucketAlreadyOwnedByYou",
                Some(409),
                "Your previous request to create the named bucket succeeded",
            ));
        }
        state.buckets.insert(bucket.to_string(), BTreeMap::new());
        Ok(())
    }

    async fn delete_bucket(&self, bucket: &str) -> StorageResult<u16> {
        let _guard = self.begin(Call::new(Operation::DeleteBucket, bucket)).await?;
        let mut state = self.inner.state.lock();
        if let Some(status) = state.delete_bucket_status {
            return Ok(status);
        }
        if !state.bucket(bucket)?.is_empty() {
            return Err(StorageError::service(
                "BucketNotEmpty",
                Some(409),
                "The bucket you tried to delete is not empty",
            ));
        }
        state.buckets.remove(bucket);
        Ok(204)
    }

    async fn head_object(&self, bucket: &str, key: &str) -> StorageResult<ObjectHead> {
        let _guard = self.begin(Call::new(Operation::HeadObject, bucket).key(key)).await?;
        let state = self.inner.state.lock();
        let blob = state
            .bucket(bucket)?
            .get(key)
            .ok_or_else(|| StorageError::service("", Some(404), ""))?;
        Ok(ObjectHead {
            size_bytes: blob.data.len() as u64,
            content_type: blob.content_type.clone(),
            etag: Some(blob.etag.clone()),
        })
    }

    async fn get_object(
        &self,
        bucket: &str,
        key: &str,
        range: Option<ByteRange>,
    ) -> StorageResult<ObjectBody> {
        let _guard = self.begin(Call::new(Operation::GetObject, bucket).key(key)).await?;
        let blob = {
            let state = self.inner.state.lock();
            state.bucket(bucket)?.get(key).cloned().ok_or_else(|| no_such_key(key))?
        };

        let total = blob.data.len() as u64;
        let data = match range {
            Some(range) => {
                if range.start >= total {
                    return Err(StorageError::service(
                        "InvalidRange",
                        Some(416),
                        "The requested range is not satisfiable",
                    ));
                }
                let end = range.end.unwrap_or(total).min(total);
                blob.data.slice(range.start as usize..end as usize)
            }
            None => blob.data.clone(),
        };

        let content_length = data.len() as u64;
        let segments: Vec<Result<Bytes, std::io::Error>> = (0..data.len())
            .step_by(BODY_SEGMENT)
            .map(|offset| Ok(data.slice(offset..(offset + BODY_SEGMENT).min(data.len()))))
            .collect();

        Ok(ObjectBody {
            stream: Box::pin(futures_util::stream::iter(segments)),
            content_length,
            content_type: blob.content_type,
        })
    }

    async fn copy_object(
        &self,
        bucket: &str,
        source_key: &str,
        dest_key: &str,
    ) -> StorageResult<()> {
        let _guard = self.begin(Call::new(Operation::CopyObject, bucket).key(dest_key)).await?;
        let mut state = self.inner.state.lock();
        let objects = state.bucket_mut(bucket)?;
        let mut copy = objects.get(source_key).cloned().ok_or_else(|| no_such_key(source_key))?;
        copy.etag = new_etag();
        copy.last_modified = Utc::now();
        objects.insert(dest_key.to_string(), copy);
        Ok(())
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> StorageResult<()> {
        let _guard = self.begin(Call::new(Operation::DeleteObject, bucket).key(key)).await?;
        let mut state = self.inner.state.lock();
        // S3 answers 204 for missing keys too
        state.bucket_mut(bucket)?.remove(key);
        Ok(())
    }

    async fn delete_objects(
        &self,
        bucket: &str,
        keys: &[String],
    ) -> StorageResult<DeleteObjectsOutput> {
        let _guard = self.begin(Call::new(Operation::DeleteObjects, bucket)).await?;
        let mut state = self.inner.state.lock();
        let failing = state.failing_keys.clone();
        let objects = state.bucket_mut(bucket)?;

        let mut output = DeleteObjectsOutput::default();
        for key in keys {
            if failing.contains(key) {
                output.errors.push(key.clone());
            } else {
                objects.remove(key);
                output.deleted.push(key.clone());
            }
        }
        Ok(output)
    }

    async fn create_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        content_type: Option<&str>,
    ) -> StorageResult<String> {
        let _guard = self
            .begin(Call::new(Operation::CreateMultipartUpload, bucket).key(key))
            .await?;
        let mut state = self.inner.state.lock();
        state.bucket(bucket)?;

        let upload_id = Uuid::new_v4().simple().to_string();
        state.uploads.insert(
            upload_id.clone(),
            PendingUpload {
                bucket: bucket.to_string(),
                key: key.to_string(),
                content_type: content_type.map(str::to_string),
                parts: BTreeMap::new(),
            },
        );
        Ok(upload_id)
    }

    async fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: u32,
        body: Bytes,
    ) -> StorageResult<String> {
        let call = Call::new(Operation::UploadPart, bucket)
            .key(key)
            .upload(upload_id)
            .part(part_number);
        let _guard = self.begin(call).await?;

        let mut state = self.inner.state.lock();
        let upload = state
            .uploads
            .get_mut(upload_id)
            .filter(|u| u.bucket == bucket && u.key == key)
            .ok_or_else(|| no_such_upload(upload_id))?;

        let etag = new_etag();
        upload.parts.insert(part_number, (etag.clone(), body));
        Ok(etag)
    }

    async fn complete_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: &[PartRecord],
    ) -> StorageResult<()> {
        let call = Call::new(Operation::CompleteMultipartUpload, bucket)
            .key(key)
            .upload(upload_id);
        let _guard = self.begin(call).await?;

        let mut state = self.inner.state.lock();
        let upload = state
            .uploads
            .get(upload_id)
            .filter(|u| u.bucket == bucket && u.key == key)
            .ok_or_else(|| no_such_upload(upload_id))?;

        if parts.is_empty() {
            return Err(StorageError::service(
                "MalformedXML",
                Some(400),
                "You must specify at least one part",
            ));
        }
        if parts.windows(2).any(|w| w[0].part_number >= w[1].part_number) {
            return Err(StorageError::service(
                "InvalidPartOrder",
                Some(400),
                "The list of parts was not in ascending order",
            ));
        }

        let mut data = Vec::new();
        for part in parts {
            match upload.parts.get(&part.part_number) {
                Some((etag, body)) if *etag == part.etag => data.extend_from_slice(body),
                _ => {
                    return Err(StorageError::service(
                        "InvalidPart",
                        Some(400),
                        format!(
                            "Part {} could not be found or its ETag did not match",
                            part.part_number
                        ),
                    ))
                }
            }
        }

        let blob = StoredBlob {
            data: Bytes::from(data),
            content_type: upload.content_type.clone(),
            etag: format!("\"{}-{}\"", Uuid::new_v4().simple(), parts.len()),
            last_modified: Utc::now(),
        };
        state.bucket_mut(bucket)?.insert(key.to_string(), blob);
        state.uploads.remove(upload_id);
        state.completed.insert(upload_id.to_string(), parts.to_vec());
        Ok(())
    }

    async fn abort_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
    ) -> StorageResult<()> {
        let call = Call::new(Operation::AbortMultipartUpload, bucket)
            .key(key)
            .upload(upload_id);
        let _guard = self.begin(call).await?;

        let mut state = self.inner.state.lock();
        match state.uploads.get(upload_id) {
            Some(upload) if upload.bucket == bucket && upload.key == key => {
                state.uploads.remove(upload_id);
                Ok(())
            }
            _ => Err(no_such_upload(upload_id)),
        }
    }

    async fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
        continuation_token: Option<&str>,
        max_keys: i32,
    ) -> StorageResult<ListingPage> {
        let _guard = self.begin(Call::new(Operation::ListObjects, bucket)).await?;
        let state = self.inner.state.lock();
        let objects = state.bucket(bucket)?;
        let max_keys = if max_keys > 0 { max_keys as usize } else { DEFAULT_MAX_KEYS };

        let mut matching = objects
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .filter(|(key, _)| continuation_token.map_or(true, |token| key.as_str() > token));

        let items: Vec<ListingItem> = matching
            .by_ref()
            .take(max_keys)
            .map(|(key, blob)| ListingItem {
                key: key.clone(),
                size_bytes: blob.data.len() as u64,
                last_modified: Some(blob.last_modified),
            })
            .collect();

        let continuation_token = match matching.next() {
            Some(_) => items.last().map(|item| item.key.clone()),
            None => None,
        };

        Ok(ListingPage {
            items,
            continuation_token,
        })
    }
}
