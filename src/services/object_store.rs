use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use percent_encoding::{NON_ALPHANUMERIC, utf8_percent_encode};
use rand::Rng;
use reqwest::header;
use serde::Deserialize;
use serde_json::json;
use sha2::{Digest, Sha256};
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;

/// Errors from the remote blob store, classified so callers can decide what
/// is retryable.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("remote store rate-limited or unavailable: {0}")]
    Transient(String),

    #[error("remote store rejected authorization")]
    AuthExpired,

    #[error("object not found: {0}")]
    NotFound(String),

    #[error("remote store error ({status}) {code}: {message}")]
    Remote {
        status: u16,
        code: String,
        message: String,
    },

    #[error("multipart session state error: {0}")]
    Session(String),

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    pub fn is_auth(&self) -> bool {
        matches!(self, Self::AuthExpired)
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// Maps a remote error response onto the taxonomy. Status codes take
/// precedence; body codes cover stores that report 200-level transport with
/// an error payload.
pub fn classify_remote_error(status: u16, code: &str, message: &str) -> StoreError {
    match status {
        429 | 503 => StoreError::Transient(format!("{status}: {message}")),
        401 | 403 => StoreError::AuthExpired,
        404 => StoreError::NotFound(message.to_string()),
        _ => match code {
            "service_unavailable" | "no_tomes_available" | "too_many_requests" => {
                StoreError::Transient(format!("{code}: {message}"))
            }
            "bad_auth_token" | "expired_auth_token" => StoreError::AuthExpired,
            "not_found" | "file_not_present" => StoreError::NotFound(message.to_string()),
            _ => StoreError::Remote {
                status,
                code: code.to_string(),
                message: message.to_string(),
            },
        },
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteObject {
    pub file_id: String,
    pub file_name: String,
    #[serde(default)]
    pub content_length: i64,
    #[serde(default)]
    pub content_type: Option<String>,
    /// Milliseconds since the epoch, as reported by the store.
    #[serde(default)]
    pub upload_timestamp: i64,
}

impl RemoteObject {
    pub fn uploaded_at(&self) -> Option<DateTime<Utc>> {
        DateTime::<Utc>::from_timestamp_millis(self.upload_timestamp)
    }
}

#[derive(Debug, Clone)]
pub struct ObjectPage {
    pub files: Vec<RemoteObject>,
    pub next_file_name: Option<String>,
}

/// A one-shot authorization for uploading parts of a multipart session.
#[derive(Debug, Clone)]
pub struct PartUploadAuth {
    pub upload_url: String,
    pub token: String,
}

/// Typed operations over the remote blob store. Implemented by the HTTP
/// client and by the in-memory store used in tests and local development.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// One page of objects under `prefix`. Pagination is exhausted when the
    /// page is empty or carries no `next_file_name`.
    async fn list(
        &self,
        prefix: &str,
        start_file_name: Option<&str>,
        max_count: usize,
    ) -> StoreResult<ObjectPage>;

    /// Issues a time-boxed signed download URL for one object key.
    async fn signed_download_url(&self, key: &str, ttl: Duration) -> StoreResult<String>;

    async fn upload_small(
        &self,
        key: &str,
        data: Vec<u8>,
        content_type: &str,
    ) -> StoreResult<RemoteObject>;

    async fn start_multipart(&self, key: &str, content_type: &str) -> StoreResult<String>;

    async fn part_upload_auth(&self, session_id: &str) -> StoreResult<PartUploadAuth>;

    /// Uploads one part, returning its content hash.
    async fn upload_part(
        &self,
        auth: &PartUploadAuth,
        part_number: u32,
        data: Vec<u8>,
    ) -> StoreResult<String>;

    /// Finalizes a session with part hashes in strict ascending part-number
    /// order.
    async fn finish_multipart(
        &self,
        session_id: &str,
        part_hashes: &[String],
    ) -> StoreResult<RemoteObject>;

    async fn delete_version(&self, file_id: &str, file_name: &str) -> StoreResult<()>;

    /// Server-side copy to a new key within the same bucket.
    async fn copy_object(&self, source_file_id: &str, new_key: &str)
    -> StoreResult<RemoteObject>;
}

/// Finds the object whose name matches `key` exactly, or `NotFound`.
pub async fn find_object_by_name(store: &dyn ObjectStore, key: &str) -> StoreResult<RemoteObject> {
    let page = store.list(key, None, 1).await?;
    page.files
        .into_iter()
        .find(|f| f.file_name == key)
        .ok_or_else(|| StoreError::NotFound(key.to_string()))
}

/// Deletes the current version of the object named exactly `key`.
pub async fn delete_object_by_name(
    store: &dyn ObjectStore,
    key: &str,
) -> StoreResult<RemoteObject> {
    let found = find_object_by_name(store, key).await?;
    store.delete_version(&found.file_id, &found.file_name).await?;
    Ok(found)
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_delay: Duration::from_millis(600),
        }
    }
}

/// Retries transient failures with exponential backoff plus jitter. The last
/// error is re-raised once attempts are exhausted; non-transient errors
/// propagate immediately.
pub async fn with_transient_retry<T, Fut>(
    policy: &RetryPolicy,
    mut op: impl FnMut() -> Fut,
) -> StoreResult<T>
where
    Fut: Future<Output = StoreResult<T>>,
{
    let mut attempt = 1u32;
    loop {
        match op().await {
            Err(err) if err.is_transient() && attempt < policy.attempts => {
                let jitter = rand::thread_rng().gen_range(0..200u64);
                let delay =
                    policy.base_delay * 2u32.pow(attempt - 1) + Duration::from_millis(jitter);
                tracing::warn!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "transient remote-store error, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            other => return other,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RemoteStoreConfig {
    /// Account authorization endpoint, e.g. `https://api.example.com`.
    pub endpoint: String,
    pub key_id: String,
    pub application_key: String,
    pub bucket_id: String,
    pub bucket_name: String,
    pub retry: RetryPolicy,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AuthState {
    api_url: String,
    download_url: String,
    authorization_token: String,
}

/// HTTP client for the remote store. The session credential from
/// `authorize_account` is memoized; every operation authorizes lazily and
/// re-authorizes exactly once when the store reports an expired token.
pub struct RemoteStoreClient {
    http: reqwest::Client,
    config: RemoteStoreConfig,
    auth: RwLock<Option<AuthState>>,
}

fn encode_key(key: &str) -> String {
    key.split('/')
        .map(|seg| utf8_percent_encode(seg, NON_ALPHANUMERIC).to_string())
        .collect::<Vec<_>>()
        .join("/")
}

impl RemoteStoreClient {
    pub fn new(config: RemoteStoreConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
            auth: RwLock::new(None),
        }
    }

    async fn authorize(&self) -> StoreResult<AuthState> {
        let url = format!(
            "{}/v2/authorize_account",
            self.config.endpoint.trim_end_matches('/')
        );
        let res = self
            .http
            .get(url)
            .basic_auth(&self.config.key_id, Some(&self.config.application_key))
            .send()
            .await?;
        let state: AuthState = Self::parse(res).await?;
        *self.auth.write().await = Some(state.clone());
        Ok(state)
    }

    async fn auth_state(&self) -> StoreResult<AuthState> {
        if let Some(state) = self.auth.read().await.clone() {
            return Ok(state);
        }
        self.authorize().await
    }

    async fn parse<T: serde::de::DeserializeOwned>(res: reqwest::Response) -> StoreResult<T> {
        let status = res.status();
        if status.is_success() {
            return Ok(res.json::<T>().await?);
        }

        #[derive(Deserialize, Default)]
        struct ErrorBody {
            #[serde(default)]
            code: String,
            #[serde(default)]
            message: String,
        }
        let body: ErrorBody = res.json().await.unwrap_or_default();
        Err(classify_remote_error(status.as_u16(), &body.code, &body.message))
    }

    async fn post_api<T: serde::de::DeserializeOwned>(
        &self,
        operation: &str,
        body: serde_json::Value,
    ) -> StoreResult<T> {
        let auth = self.auth_state().await?;
        let url = format!("{}/v2/{}", auth.api_url.trim_end_matches('/'), operation);
        let res = self
            .http
            .post(url)
            .header(header::AUTHORIZATION, &auth.authorization_token)
            .json(&body)
            .send()
            .await?;
        Self::parse(res).await
    }

    /// Re-authorizes exactly once on an auth-expired error, then retries the
    /// call once more. A second failure propagates.
    async fn with_auth_retry<T, Fut>(&self, mut op: impl FnMut() -> Fut) -> StoreResult<T>
    where
        Fut: Future<Output = StoreResult<T>>,
    {
        match op().await {
            Err(err) if err.is_auth() => {
                tracing::info!("remote-store authorization expired, re-authorizing once");
                self.authorize().await?;
                op().await
            }
            other => other,
        }
    }
}

#[async_trait]
impl ObjectStore for RemoteStoreClient {
    async fn list(
        &self,
        prefix: &str,
        start_file_name: Option<&str>,
        max_count: usize,
    ) -> StoreResult<ObjectPage> {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct ListResponse {
            #[serde(default)]
            files: Vec<RemoteObject>,
            #[serde(default)]
            next_file_name: Option<String>,
        }

        let body = json!({
            "bucketId": self.config.bucket_id,
            "prefix": prefix,
            "startFileName": start_file_name,
            "maxFileCount": max_count.min(1000),
        });
        let res: ListResponse = self
            .with_auth_retry(|| self.post_api("list_objects", body.clone()))
            .await?;
        Ok(ObjectPage {
            files: res.files,
            next_file_name: res.next_file_name,
        })
    }

    async fn signed_download_url(&self, key: &str, ttl: Duration) -> StoreResult<String> {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct DownloadAuth {
            authorization_token: String,
        }

        let body = json!({
            "bucketId": self.config.bucket_id,
            "fileNamePrefix": key,
            "validDurationInSeconds": ttl.as_secs(),
        });
        let grant: DownloadAuth = self
            .with_auth_retry(|| self.post_api("get_download_authorization", body.clone()))
            .await?;
        let auth = self.auth_state().await?;
        Ok(format!(
            "{}/file/{}/{}?Authorization={}",
            auth.download_url.trim_end_matches('/'),
            self.config.bucket_name,
            encode_key(key),
            utf8_percent_encode(&grant.authorization_token, NON_ALPHANUMERIC),
        ))
    }

    async fn upload_small(
        &self,
        key: &str,
        data: Vec<u8>,
        content_type: &str,
    ) -> StoreResult<RemoteObject> {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct UploadGrant {
            upload_url: String,
            authorization_token: String,
        }

        let digest = hex::encode(Sha256::digest(&data));
        let payload = Bytes::from(data);

        with_transient_retry(&self.config.retry, || async {
            // A fresh upload URL per attempt: the store invalidates them on
            // capacity errors.
            let grant: UploadGrant = self
                .with_auth_retry(|| {
                    self.post_api("get_upload_url", json!({"bucketId": self.config.bucket_id}))
                })
                .await?;
            self.with_auth_retry(|| async {
                let res = self
                    .http
                    .post(&grant.upload_url)
                    .header(header::AUTHORIZATION, &grant.authorization_token)
                    .header("X-File-Name", encode_key(key))
                    .header(header::CONTENT_TYPE, content_type)
                    .header("X-Content-Hash", digest.as_str())
                    .body(payload.clone())
                    .send()
                    .await?;
                Self::parse::<RemoteObject>(res).await
            })
            .await
        })
        .await
    }

    async fn start_multipart(&self, key: &str, content_type: &str) -> StoreResult<String> {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct StartLarge {
            file_id: String,
        }

        let body = json!({
            "bucketId": self.config.bucket_id,
            "fileName": key,
            "contentType": content_type,
        });
        let res: StartLarge = self
            .with_auth_retry(|| self.post_api("start_large_file", body.clone()))
            .await?;
        Ok(res.file_id)
    }

    async fn part_upload_auth(&self, session_id: &str) -> StoreResult<PartUploadAuth> {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct PartUrl {
            upload_url: String,
            authorization_token: String,
        }

        let res: PartUrl = self
            .with_auth_retry(|| {
                self.post_api("get_upload_part_url", json!({"fileId": session_id}))
            })
            .await?;
        Ok(PartUploadAuth {
            upload_url: res.upload_url,
            token: res.authorization_token,
        })
    }

    async fn upload_part(
        &self,
        auth: &PartUploadAuth,
        part_number: u32,
        data: Vec<u8>,
    ) -> StoreResult<String> {
        let digest = hex::encode(Sha256::digest(&data));
        let payload = Bytes::from(data);

        with_transient_retry(&self.config.retry, || async {
            let res = self
                .http
                .post(&auth.upload_url)
                .header(header::AUTHORIZATION, &auth.token)
                .header("X-Part-Number", part_number.to_string())
                .header("X-Content-Hash", digest.as_str())
                .body(payload.clone())
                .send()
                .await?;
            Self::parse::<serde_json::Value>(res).await?;
            Ok(digest.clone())
        })
        .await
    }

    async fn finish_multipart(
        &self,
        session_id: &str,
        part_hashes: &[String],
    ) -> StoreResult<RemoteObject> {
        let body = json!({
            "fileId": session_id,
            "partHashes": part_hashes,
        });
        self.with_auth_retry(|| self.post_api("finish_large_file", body.clone()))
            .await
    }

    async fn delete_version(&self, file_id: &str, file_name: &str) -> StoreResult<()> {
        let body = json!({"fileId": file_id, "fileName": file_name});
        let _: serde_json::Value = self
            .with_auth_retry(|| self.post_api("delete_file_version", body.clone()))
            .await?;
        Ok(())
    }

    async fn copy_object(
        &self,
        source_file_id: &str,
        new_key: &str,
    ) -> StoreResult<RemoteObject> {
        let body = json!({
            "sourceFileId": source_file_id,
            "destinationBucketId": self.config.bucket_id,
            "fileName": new_key,
        });
        self.with_auth_retry(|| self.post_api("copy_file", body.clone()))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_classify_by_status() {
        assert!(classify_remote_error(429, "", "slow down").is_transient());
        assert!(classify_remote_error(503, "", "").is_transient());
        assert!(classify_remote_error(401, "", "").is_auth());
        assert!(classify_remote_error(403, "", "").is_auth());
        assert!(classify_remote_error(404, "", "gone").is_not_found());
    }

    #[test]
    fn test_classify_by_body_code() {
        assert!(classify_remote_error(500, "service_unavailable", "").is_transient());
        assert!(classify_remote_error(400, "expired_auth_token", "").is_auth());
        assert!(classify_remote_error(400, "file_not_present", "").is_not_found());
        assert!(matches!(
            classify_remote_error(400, "bad_request", "nope"),
            StoreError::Remote { status: 400, .. }
        ));
    }

    #[test]
    fn test_encode_key_keeps_slashes() {
        let encoded = encode_key("a b/c#d.mp4");
        assert!(encoded.contains('/'));
        assert!(!encoded.contains(' '));
        assert!(!encoded.contains('#'));
    }

    #[tokio::test]
    async fn test_transient_retry_recovers() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy {
            attempts: 3,
            base_delay: Duration::from_millis(1),
        };
        let result = with_transient_retry(&policy, || async {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(StoreError::Transient("busy".into()))
            } else {
                Ok(42u32)
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_transient_retry_exhaustion_reraises() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy {
            attempts: 3,
            base_delay: Duration::from_millis(1),
        };
        let result: StoreResult<()> = with_transient_retry(&policy, || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(StoreError::Transient("busy".into()))
        })
        .await;
        assert!(result.unwrap_err().is_transient());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_transient_is_not_retried() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::default();
        let result: StoreResult<()> = with_transient_retry(&policy, || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(StoreError::NotFound("x".into()))
        })
        .await;
        assert!(result.unwrap_err().is_not_found());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
