use async_trait::async_trait;
use chrono::Utc;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::services::object_store::{
    ObjectPage, ObjectStore, PartUploadAuth, RemoteObject, StoreError, StoreResult,
};
use crate::utils::mime::DEFAULT_CONTENT_TYPE;

#[derive(Debug, Clone)]
struct StoredEntry {
    file_id: String,
    data: Vec<u8>,
    content_type: String,
    uploaded_at_ms: i64,
}

#[derive(Debug, Default)]
struct Session {
    key: String,
    content_type: String,
    parts: BTreeMap<u32, (Vec<u8>, String)>,
}

/// In-memory store for tests and local development. Keys are ordered, so
/// listing paginates the same way the remote store does.
#[derive(Default)]
pub struct MemoryObjectStore {
    objects: Mutex<BTreeMap<String, StoredEntry>>,
    sessions: Mutex<HashMap<String, Session>>,
    next_id: AtomicU64,
    urls_issued: AtomicU64,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn fresh_id(&self, kind: &str) -> String {
        format!("{kind}-{}", self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    fn store_entry(&self, key: &str, data: Vec<u8>, content_type: &str) -> RemoteObject {
        let entry = StoredEntry {
            file_id: self.fresh_id("obj"),
            content_type: content_type.to_string(),
            uploaded_at_ms: Utc::now().timestamp_millis(),
            data,
        };
        let remote = RemoteObject {
            file_id: entry.file_id.clone(),
            file_name: key.to_string(),
            content_length: entry.data.len() as i64,
            content_type: Some(entry.content_type.clone()),
            upload_timestamp: entry.uploaded_at_ms,
        };
        self.objects.lock().unwrap().insert(key.to_string(), entry);
        remote
    }

    /// Seeds an object directly, for test setup.
    pub fn insert(&self, key: &str, data: &[u8], content_type: &str) {
        self.store_entry(key, data.to_vec(), content_type);
    }

    pub fn contains(&self, key: &str) -> bool {
        self.objects.lock().unwrap().contains_key(key)
    }

    pub fn object_data(&self, key: &str) -> Option<Vec<u8>> {
        self.objects.lock().unwrap().get(key).map(|e| e.data.clone())
    }

    /// How many signed URLs have been issued, for cache reuse assertions.
    pub fn urls_issued(&self) -> u64 {
        self.urls_issued.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn list(
        &self,
        prefix: &str,
        start_file_name: Option<&str>,
        max_count: usize,
    ) -> StoreResult<ObjectPage> {
        let objects = self.objects.lock().unwrap();
        let mut matched = objects
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .filter(|(key, _)| start_file_name.is_none_or(|start| key.as_str() >= start))
            .map(|(key, entry)| RemoteObject {
                file_id: entry.file_id.clone(),
                file_name: key.clone(),
                content_length: entry.data.len() as i64,
                content_type: Some(entry.content_type.clone()),
                upload_timestamp: entry.uploaded_at_ms,
            });

        let files: Vec<RemoteObject> = matched.by_ref().take(max_count).collect();
        let next_file_name = matched.next().map(|obj| obj.file_name);
        Ok(ObjectPage {
            files,
            next_file_name,
        })
    }

    async fn signed_download_url(&self, key: &str, ttl: Duration) -> StoreResult<String> {
        if !self.contains(key) {
            return Err(StoreError::NotFound(key.to_string()));
        }
        let serial = self.urls_issued.fetch_add(1, Ordering::SeqCst);
        Ok(format!(
            "memory:///file/{key}?token={serial}&expires={}",
            ttl.as_secs()
        ))
    }

    async fn upload_small(
        &self,
        key: &str,
        data: Vec<u8>,
        content_type: &str,
    ) -> StoreResult<RemoteObject> {
        Ok(self.store_entry(key, data, content_type))
    }

    async fn start_multipart(&self, key: &str, content_type: &str) -> StoreResult<String> {
        let session_id = self.fresh_id("session");
        self.sessions.lock().unwrap().insert(
            session_id.clone(),
            Session {
                key: key.to_string(),
                content_type: content_type.to_string(),
                parts: BTreeMap::new(),
            },
        );
        Ok(session_id)
    }

    async fn part_upload_auth(&self, session_id: &str) -> StoreResult<PartUploadAuth> {
        if !self.sessions.lock().unwrap().contains_key(session_id) {
            return Err(StoreError::Session(format!(
                "unknown multipart session {session_id}"
            )));
        }
        Ok(PartUploadAuth {
            upload_url: format!("memory:///part/{session_id}"),
            token: session_id.to_string(),
        })
    }

    async fn upload_part(
        &self,
        auth: &PartUploadAuth,
        part_number: u32,
        data: Vec<u8>,
    ) -> StoreResult<String> {
        if part_number == 0 {
            return Err(StoreError::Session("part numbers start at 1".to_string()));
        }
        let digest = hex::encode(Sha256::digest(&data));
        let mut sessions = self.sessions.lock().unwrap();
        let session = sessions.get_mut(&auth.token).ok_or_else(|| {
            StoreError::Session(format!("unknown multipart session {}", auth.token))
        })?;
        session.parts.insert(part_number, (data, digest.clone()));
        Ok(digest)
    }

    async fn finish_multipart(
        &self,
        session_id: &str,
        part_hashes: &[String],
    ) -> StoreResult<RemoteObject> {
        let session = self
            .sessions
            .lock()
            .unwrap()
            .remove(session_id)
            .ok_or_else(|| {
                StoreError::Session(format!("unknown multipart session {session_id}"))
            })?;

        if session.parts.len() != part_hashes.len() {
            return Err(StoreError::Session(format!(
                "expected {} part hashes, got {}",
                session.parts.len(),
                part_hashes.len()
            )));
        }

        let mut data = Vec::new();
        for (index, (part_number, (bytes, digest))) in session.parts.iter().enumerate() {
            if *part_number != (index + 1) as u32 {
                return Err(StoreError::Session(format!(
                    "missing part {} in session {session_id}",
                    index + 1
                )));
            }
            if part_hashes[index] != *digest {
                return Err(StoreError::Session(format!(
                    "hash mismatch for part {part_number}"
                )));
            }
            data.extend_from_slice(bytes);
        }

        Ok(self.store_entry(&session.key, data, &session.content_type))
    }

    async fn delete_version(&self, file_id: &str, file_name: &str) -> StoreResult<()> {
        let mut objects = self.objects.lock().unwrap();
        match objects.get(file_name) {
            Some(entry) if entry.file_id == file_id => {
                objects.remove(file_name);
                Ok(())
            }
            _ => Err(StoreError::NotFound(file_name.to_string())),
        }
    }

    async fn copy_object(
        &self,
        source_file_id: &str,
        new_key: &str,
    ) -> StoreResult<RemoteObject> {
        let source = {
            let objects = self.objects.lock().unwrap();
            objects
                .values()
                .find(|entry| entry.file_id == source_file_id)
                .cloned()
        };
        let source = source
            .ok_or_else(|| StoreError::NotFound(format!("file id {source_file_id}")))?;
        Ok(self.store_entry(new_key, source.data, &source.content_type))
    }
}

impl std::fmt::Debug for MemoryObjectStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryObjectStore")
            .field("objects", &self.objects.lock().unwrap().len())
            .finish()
    }
}
