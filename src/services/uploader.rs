use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::sync::Arc;
use tempfile::NamedTempFile;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::task::JoinSet;

use crate::config::AppConfig;
use crate::services::object_store::{
    ObjectStore, RemoteObject, StoreError, StoreResult,
};
use crate::services::progress::ProgressTracker;

const READ_CHUNK: usize = 64 * 1024;

#[derive(Debug)]
pub struct UploadOutcome {
    pub remote: RemoteObject,
    pub size: u64,
    /// Hex SHA-256 of the full body, regardless of strategy.
    pub content_hash: String,
    pub parts: u32,
}

/// Uploads a body of unknown length, picking the strategy by size: buffered
/// single-shot below the in-memory cap, otherwise a temp-file spill followed
/// by either one upload or a concurrent multipart session.
pub struct UploadOrchestrator {
    store: Arc<dyn ObjectStore>,
    max_in_memory_bytes: u64,
    part_size: u64,
    part_concurrency: usize,
}

impl UploadOrchestrator {
    pub fn new(store: Arc<dyn ObjectStore>, config: &AppConfig) -> Self {
        Self {
            store,
            max_in_memory_bytes: config.max_in_memory_bytes,
            part_size: config.part_size.max(1),
            part_concurrency: config.part_concurrency.max(1),
        }
    }

    pub async fn upload<R>(
        &self,
        key: &str,
        content_type: &str,
        mut reader: R,
        tracker: Option<Arc<ProgressTracker>>,
    ) -> StoreResult<UploadOutcome>
    where
        R: AsyncRead + Unpin + Send,
    {
        let cap = self.max_in_memory_bytes as usize;
        let mut buffer: Vec<u8> = Vec::with_capacity(READ_CHUNK);
        let mut chunk = vec![0u8; READ_CHUNK];
        let mut overflowed = false;

        while buffer.len() <= cap {
            let n = reader.read(&mut chunk).await?;
            if n == 0 {
                break;
            }
            buffer.extend_from_slice(&chunk[..n]);
            if buffer.len() > cap {
                overflowed = true;
                break;
            }
        }

        if !overflowed {
            return self.upload_buffered(key, content_type, buffer, tracker).await;
        }
        self.upload_spilled(key, content_type, buffer, reader, tracker)
            .await
    }

    async fn upload_buffered(
        &self,
        key: &str,
        content_type: &str,
        data: Vec<u8>,
        tracker: Option<Arc<ProgressTracker>>,
    ) -> StoreResult<UploadOutcome> {
        let size = data.len() as u64;
        let content_hash = hex::encode(Sha256::digest(&data));
        let remote = self.store.upload_small(key, data, content_type).await?;

        if let Some(tracker) = &tracker {
            tracker.set_total(size);
            tracker.record(size);
            tracker.complete();
        }
        Ok(UploadOutcome {
            remote,
            size,
            content_hash,
            parts: 1,
        })
    }

    /// The body exceeded the in-memory cap: spill everything to a temp file
    /// while hashing, then upload from disk.
    async fn upload_spilled<R>(
        &self,
        key: &str,
        content_type: &str,
        head: Vec<u8>,
        mut reader: R,
        tracker: Option<Arc<ProgressTracker>>,
    ) -> StoreResult<UploadOutcome>
    where
        R: AsyncRead + Unpin + Send,
    {
        let tmp = NamedTempFile::new()?;
        let mut spill = tokio::fs::File::from_std(tmp.reopen()?);
        let mut hasher = Sha256::new();

        hasher.update(&head);
        spill.write_all(&head).await?;
        let mut total = head.len() as u64;
        drop(head);

        let mut chunk = vec![0u8; READ_CHUNK];
        loop {
            let n = reader.read(&mut chunk).await?;
            if n == 0 {
                break;
            }
            hasher.update(&chunk[..n]);
            spill.write_all(&chunk[..n]).await?;
            total += n as u64;
        }
        spill.flush().await?;
        let content_hash = hex::encode(hasher.finalize());

        if let Some(tracker) = &tracker {
            tracker.set_total(total);
        }
        tracing::debug!(key, total, "upload spilled to temp file");

        if total <= self.part_size {
            let data = tokio::fs::read(tmp.path()).await?;
            let remote = self.store.upload_small(key, data, content_type).await?;
            if let Some(tracker) = &tracker {
                tracker.record(total);
                tracker.complete();
            }
            return Ok(UploadOutcome {
                remote,
                size: total,
                content_hash,
                parts: 1,
            });
        }

        let remote = self
            .upload_multipart(key, content_type, tmp.path(), total, tracker.clone())
            .await?;
        if let Some(tracker) = &tracker {
            tracker.complete();
        }
        let parts = total.div_ceil(self.part_size) as u32;
        Ok(UploadOutcome {
            remote,
            size: total,
            content_hash,
            parts,
        })
    }

    async fn upload_multipart(
        &self,
        key: &str,
        content_type: &str,
        spill_path: &std::path::Path,
        total: u64,
        tracker: Option<Arc<ProgressTracker>>,
    ) -> StoreResult<RemoteObject> {
        let session = self.store.start_multipart(key, content_type).await?;
        let part_count = total.div_ceil(self.part_size) as u32;

        // Pre-fetch a small pool of part-upload grants and hand them out
        // round-robin across the concurrent part tasks.
        let pool_size = self.part_concurrency.min(part_count as usize);
        let mut auth_pool = Vec::with_capacity(pool_size);
        for _ in 0..pool_size {
            auth_pool.push(self.store.part_upload_auth(&session).await?);
        }

        let mut file = tokio::fs::File::open(spill_path).await?;
        let mut tasks: JoinSet<StoreResult<(u32, String)>> = JoinSet::new();
        let mut hashes: BTreeMap<u32, String> = BTreeMap::new();
        let mut remaining = total;
        let mut part_number = 0u32;

        while remaining > 0 {
            part_number += 1;
            let part_len = remaining.min(self.part_size) as usize;
            let mut data = vec![0u8; part_len];
            file.read_exact(&mut data).await?;
            remaining -= part_len as u64;

            while tasks.len() >= self.part_concurrency {
                Self::settle_one(&mut tasks, &mut hashes).await?;
            }

            let store = self.store.clone();
            let auth = auth_pool[(part_number as usize - 1) % auth_pool.len()].clone();
            let tracker = tracker.clone();
            tasks.spawn(async move {
                let len = data.len() as u64;
                let hash = store.upload_part(&auth, part_number, data).await?;
                if let Some(tracker) = &tracker {
                    tracker.record(len);
                }
                Ok((part_number, hash))
            });
        }

        while !tasks.is_empty() {
            Self::settle_one(&mut tasks, &mut hashes).await?;
        }

        // The hash list sent to finish must be dense and ordered; a hole
        // means a part silently failed and the session must not be
        // finalized.
        let mut ordered = Vec::with_capacity(part_count as usize);
        for number in 1..=part_count {
            let hash = hashes.remove(&number).ok_or_else(|| {
                StoreError::Session(format!("missing hash for part {number} of {part_count}"))
            })?;
            ordered.push(hash);
        }

        self.store.finish_multipart(&session, &ordered).await
    }

    async fn settle_one(
        tasks: &mut JoinSet<StoreResult<(u32, String)>>,
        hashes: &mut BTreeMap<u32, String>,
    ) -> StoreResult<()> {
        if let Some(joined) = tasks.join_next().await {
            let (part_number, hash) = joined
                .map_err(|e| StoreError::Session(format!("part upload task failed: {e}")))??;
            hashes.insert(part_number, hash);
        }
        Ok(())
    }
}
