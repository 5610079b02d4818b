use serde::{Deserialize, Serialize};

use crate::{StorageError, StorageResult};

/// Lifecycle of a multipart upload
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum UploadState {
    #[default]
    Idle,
    Started,
    Uploading,
    Completing,
    Completed,
    Aborted,
}

impl UploadState {
    /// States in which the session holds a live remote upload id
    pub fn holds_upload(self) -> bool {
        matches!(self, Self::Started | Self::Uploading | Self::Completing)
    }

    pub fn accepts_parts(self) -> bool {
        matches!(self, Self::Started | Self::Uploading)
    }
}

/// An uploaded part and the tag the provider returned for it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartRecord {
    pub part_number: u32,
    pub etag: String,
}

/// Descriptive metadata carried from `start` to the stored object
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadMeta {
    pub content_type: Option<String>,
    pub filename: Option<String>,
}

impl UploadMeta {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_content_type<S: Into<String>>(mut self, content_type: S) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn with_filename<S: Into<String>>(mut self, filename: S) -> Self {
        self.filename = Some(filename.into());
        self
    }
}

/// State of one resumable upload.
///
/// The session is a plain value owned by the caller: it is serialized
/// between calls and handed back on every `append`, so an upload can span
/// process restarts. A session has exactly one writer at a time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadSession {
    pub state: UploadState,
    pub bucket_name: String,
    pub upload_id: Option<String>,
    pub object_key: Option<String>,
    /// Append-only, ascending and gap-free from 1
    pub parts: Vec<PartRecord>,
    pub next_part_number: u32,
    pub size_bytes: u64,
    pub meta: UploadMeta,
}

impl Default for UploadSession {
    fn default() -> Self {
        Self {
            state: UploadState::Idle,
            bucket_name: String::new(),
            upload_id: None,
            object_key: None,
            parts: Vec::new(),
            next_part_number: 1,
            size_bytes: 0,
            meta: UploadMeta::default(),
        }
    }
}

impl UploadSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restore a session persisted with [`UploadSession::to_json`]
    pub fn from_json(raw: &str) -> StorageResult<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn to_json(&self) -> StorageResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// True while a remote multipart upload is open
    pub fn has_open_upload(&self) -> bool {
        self.upload_id.is_some()
    }

    /// Bucket, key and upload id of the open upload
    pub fn target(&self) -> StorageResult<(&str, &str, &str)> {
        match (&self.object_key, &self.upload_id) {
            (Some(key), Some(upload_id)) if !self.bucket_name.is_empty() => {
                Ok((&self.bucket_name, key, upload_id))
            }
            _ => Err(StorageError::invalid("Upload session has no open multipart upload")),
        }
    }

    /// Reset for a freshly created remote upload
    pub(crate) fn begin(
        &mut self,
        bucket_name: String,
        object_key: String,
        upload_id: String,
        meta: UploadMeta,
    ) {
        self.state = UploadState::Started;
        self.bucket_name = bucket_name;
        self.object_key = Some(object_key);
        self.upload_id = Some(upload_id);
        self.parts.clear();
        self.next_part_number = 1;
        self.size_bytes = 0;
        self.meta = meta;
    }

    /// Record a successfully uploaded part
    pub(crate) fn record_part(&mut self, etag: String, size: u64) {
        self.parts.push(PartRecord {
            part_number: self.next_part_number,
            etag,
        });
        self.next_part_number += 1;
        self.size_bytes += size;
        self.state = UploadState::Uploading;
    }

    /// Parts ordered for the completion call
    pub fn sorted_parts(&self) -> Vec<PartRecord> {
        let mut parts = self.parts.clone();
        parts.sort_by_key(|p| p.part_number);
        parts
    }

    /// Drop every multipart field and settle in `state`
    pub(crate) fn clear(&mut self, state: UploadState) {
        self.state = state;
        self.upload_id = None;
        self.object_key = None;
        self.parts.clear();
        self.next_part_number = 1;
        self.size_bytes = 0;
    }

    /// Check the structural invariants of the session
    pub fn check_invariants(&self) -> StorageResult<()> {
        let recorded = self
            .next_part_number
            .checked_sub(1)
            .ok_or_else(|| StorageError::invalid("Next part number must start at 1"))?;
        if self.parts.len() as u32 != recorded {
            return Err(StorageError::invalid(format!(
                "Session records {} parts but next part number is {}",
                self.parts.len(),
                self.next_part_number
            )));
        }
        if let Some((index, _)) = self
            .parts
            .iter()
            .enumerate()
            .find(|(i, p)| p.part_number != *i as u32 + 1)
        {
            return Err(StorageError::invalid(format!(
                "Part numbering has a gap at position {}",
                index
            )));
        }
        if self.state.holds_upload() != self.upload_id.is_some() {
            return Err(StorageError::invalid(format!(
                "Session in state {:?} disagrees with upload id presence",
                self.state
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parts_are_numbered_from_one_without_gaps() {
        let mut session = UploadSession::new();
        session.begin("b".into(), "k".into(), "u".into(), UploadMeta::new());
        session.record_part("\"a\"".into(), 10);
        session.record_part("\"b\"".into(), 5);

        assert_eq!(session.state, UploadState::Uploading);
        assert_eq!(session.next_part_number, 3);
        assert_eq!(session.size_bytes, 15);
        assert_eq!(
            session.parts.iter().map(|p| p.part_number).collect::<Vec<_>>(),
            vec![1, 2]
        );
        assert!(session.check_invariants().is_ok());
    }

    #[test]
    fn clear_resets_multipart_fields() {
        let mut session = UploadSession::new();
        session.begin("b".into(), "k".into(), "u".into(), UploadMeta::new());
        session.record_part("\"a\"".into(), 10);
        session.clear(UploadState::Completed);

        assert!(!session.has_open_upload());
        assert!(session.parts.is_empty());
        assert_eq!(session.next_part_number, 1);
        assert!(session.check_invariants().is_ok());
        assert!(session.target().is_err());
    }

    #[test]
    fn session_survives_serialization() {
        let mut session = UploadSession::new();
        session.begin(
            "tenant-media".into(),
            "tenant/2026/10/abc".into(),
            "upload-1".into(),
            UploadMeta::new().with_filename("a.bin"),
        );
        session.record_part("\"etag-1\"".into(), 5);

        let restored = UploadSession::from_json(&session.to_json().unwrap()).unwrap();
        assert_eq!(restored, session);
    }

    #[test]
    fn detects_inconsistent_state() {
        let mut session = UploadSession::new();
        session.state = UploadState::Uploading;
        assert!(session.check_invariants().is_err());

        let mut session = UploadSession::new();
        session.parts.push(PartRecord {
            part_number: 2,
            etag: "x".into(),
        });
        session.next_part_number = 2;
        assert!(session.check_invariants().is_err());
    }

    #[test]
    fn rejects_zero_next_part_number() {
        let session = UploadSession::from_json(
            r#"{"state":"Idle","bucket_name":"","upload_id":null,"object_key":null,"parts":[],
               "next_part_number":0,"size_bytes":0,"meta":{"content_type":null,"filename":null}}"#,
        )
        .unwrap();

        assert!(matches!(session.check_invariants(), Err(StorageError::Invalid { .. })));
    }
}
