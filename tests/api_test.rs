use async_trait::async_trait;
use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode},
};
use blob_bridge::config::AppConfig;
use blob_bridge::services::memory_store::MemoryObjectStore;
use blob_bridge::services::object_store::{
    ObjectPage, ObjectStore, PartUploadAuth, RemoteObject, StoreError, StoreResult,
};
use blob_bridge::{AppState, create_app};
use http_body_util::BodyExt;
use serde_json::Value;
use sqlx::sqlite::SqlitePoolOptions;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

async fn setup_app() -> (Router, Arc<MemoryObjectStore>, AppState) {
    let pool = SqlitePoolOptions::new()
        .connect("sqlite::memory:")
        .await
        .unwrap();

    sqlx::migrate!("./migrations").run(&pool).await.unwrap();

    let store = Arc::new(MemoryObjectStore::new());
    let state = AppState::build(pool, store.clone(), AppConfig::development());
    (create_app(state.clone()), store, state)
}

async fn json_body(response: axum::response::Response) -> Value {
    let body = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&body).unwrap()
}

/// In-memory store with scripted misbehavior, for exercising the handlers'
/// failure paths.
#[derive(Default)]
struct ScriptedStore {
    inner: MemoryObjectStore,
    /// Every delete of this exact key fails.
    fail_delete_for: Option<String>,
    /// Uploads report this (timestamp ms, content type) back, regardless of
    /// what was sent.
    remote_metadata: Option<(i64, String)>,
}

#[async_trait]
impl ObjectStore for ScriptedStore {
    async fn list(
        &self,
        prefix: &str,
        start_file_name: Option<&str>,
        max_count: usize,
    ) -> StoreResult<ObjectPage> {
        self.inner.list(prefix, start_file_name, max_count).await
    }

    async fn signed_download_url(&self, key: &str, ttl: Duration) -> StoreResult<String> {
        self.inner.signed_download_url(key, ttl).await
    }

    async fn upload_small(
        &self,
        key: &str,
        data: Vec<u8>,
        content_type: &str,
    ) -> StoreResult<RemoteObject> {
        let mut remote = self.inner.upload_small(key, data, content_type).await?;
        if let Some((timestamp, content_type)) = &self.remote_metadata {
            remote.upload_timestamp = *timestamp;
            remote.content_type = Some(content_type.clone());
        }
        Ok(remote)
    }

    async fn start_multipart(&self, key: &str, content_type: &str) -> StoreResult<String> {
        self.inner.start_multipart(key, content_type).await
    }

    async fn part_upload_auth(&self, session_id: &str) -> StoreResult<PartUploadAuth> {
        self.inner.part_upload_auth(session_id).await
    }

    async fn upload_part(
        &self,
        auth: &PartUploadAuth,
        part_number: u32,
        data: Vec<u8>,
    ) -> StoreResult<String> {
        self.inner.upload_part(auth, part_number, data).await
    }

    async fn finish_multipart(
        &self,
        session_id: &str,
        part_hashes: &[String],
    ) -> StoreResult<RemoteObject> {
        self.inner.finish_multipart(session_id, part_hashes).await
    }

    async fn delete_version(&self, file_id: &str, file_name: &str) -> StoreResult<()> {
        if self.fail_delete_for.as_deref() == Some(file_name) {
            return Err(StoreError::Remote {
                status: 500,
                code: "internal_error".to_string(),
                message: "simulated delete failure".to_string(),
            });
        }
        self.inner.delete_version(file_id, file_name).await
    }

    async fn copy_object(
        &self,
        source_file_id: &str,
        new_key: &str,
    ) -> StoreResult<RemoteObject> {
        self.inner.copy_object(source_file_id, new_key).await
    }
}

async fn setup_scripted_app(store: ScriptedStore) -> (Router, Arc<ScriptedStore>, AppState) {
    let pool = SqlitePoolOptions::new()
        .connect("sqlite::memory:")
        .await
        .unwrap();

    sqlx::migrate!("./migrations").run(&pool).await.unwrap();

    let store = Arc::new(store);
    let state = AppState::build(pool, store.clone(), AppConfig::development());
    (create_app(state.clone()), store, state)
}

#[tokio::test]
async fn test_health() {
    let (app, _, _) = setup_app().await;

    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await;
    assert_eq!(json["status"], "ok");
}

#[tokio::test]
async fn test_create_folder_and_list() {
    let (app, _, _) = setup_app().await;

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/folder")
                .header("Content-Type", "application/json")
                .body(Body::from(r#"{"prefix": "movies"}"#))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let json = json_body(response).await;
    assert_eq!(json["id"], "movies");
    assert_eq!(json["mimeType"], "application/x-directory");

    let response = app
        .clone()
        .oneshot(Request::builder().uri("/list").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get("cache-control").unwrap(),
        "no-store"
    );
    let json = json_body(response).await;
    assert_eq!(json["items"].as_array().unwrap().len(), 1);
    assert_eq!(json["items"][0]["name"], "movies");
    assert!(json["nextPageToken"].is_null());
}

#[tokio::test]
async fn test_list_unknown_prefix_is_empty() {
    let (app, _, _) = setup_app().await;

    let response = app
        .oneshot(
            Request::builder()
                .uri("/list?prefix=nowhere/at/all")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await;
    assert_eq!(json["items"].as_array().unwrap().len(), 0);
    assert!(json["nextPageToken"].is_null());
}

#[tokio::test]
async fn test_list_pagination() {
    let (app, _, state) = setup_app().await;

    for name in ["a", "b", "c", "d", "e"] {
        state.catalog.ensure_folder_hierarchy(name).await.unwrap();
    }

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/list?pageSize=2")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let json = json_body(response).await;
    assert_eq!(json["items"].as_array().unwrap().len(), 2);
    assert_eq!(json["nextPageToken"], "2");

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/list?pageSize=2&pageToken=4")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let json = json_body(response).await;
    assert_eq!(json["items"].as_array().unwrap().len(), 1);
    assert_eq!(json["items"][0]["name"], "e");

    let response = app
        .oneshot(
            Request::builder()
                .uri("/list?pageToken=junk")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_stream_url_is_clamped_and_uncached() {
    let (app, store, _) = setup_app().await;
    store.insert("movies/clip.mp4", b"data", "video/mp4");

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/stream-url?id=movies/clip.mp4&ttlSeconds=999999999")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get("cache-control").unwrap(),
        "no-store"
    );
    let json = json_body(response).await;
    assert!(json["url"].as_str().unwrap().contains("movies/clip.mp4"));
    // Development config caps TTLs at 6 hours.
    assert_eq!(json["expiresInSeconds"], 6 * 3600);

    // Unknown keys surface the store's not-found.
    let response = app
        .oneshot(
            Request::builder()
                .uri("/stream-url?id=missing.mp4")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let json = json_body(response).await;
    assert_eq!(json["code"], "not_found");
}

#[tokio::test]
async fn test_upload_multipart_and_catalog_row() {
    let (app, store, state) = setup_app().await;

    let boundary = "---------------------------123456789012345678901234567";
    let multipart_body = format!(
        "--{boundary}\r\n\
        Content-Disposition: form-data; name=\"prefix\"\r\n\r\n\
        movies\r\n\
        --{boundary}\r\n\
        Content-Disposition: form-data; name=\"jobId\"\r\n\r\n\
        job-42\r\n\
        --{boundary}\r\n\
        Content-Disposition: form-data; name=\"file\"; filename=\"clip.mp4\"\r\n\
        Content-Type: video/mp4\r\n\r\n\
        fake video bytes\r\n\
        --{boundary}--\r\n",
    );

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/upload-multipart")
                .header(
                    "Content-Type",
                    format!("multipart/form-data; boundary={boundary}"),
                )
                .body(Body::from(multipart_body))
                .unwrap(),
        )
        .await
        .unwrap();

    let status = response.status();
    let json = json_body(response).await;
    assert_eq!(status, StatusCode::OK, "upload failed: {json:?}");
    assert_eq!(json["uploaded"][0]["key"], "movies/clip.mp4");
    assert_eq!(json["failed"].as_array().unwrap().len(), 0);

    assert!(store.contains("movies/clip.mp4"));
    let row = state
        .catalog
        .get_file_by_path("movies/clip.mp4")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.content_type, "video/mp4");
    assert_eq!(row.size, 16);

    // Progress was tracked under the supplied job id.
    let response = app
        .oneshot(
            Request::builder()
                .uri("/upload-progress?jobId=job-42")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await;
    assert_eq!(json["done"], true);
    assert_eq!(json["uploadedBytes"], 16);
}

#[tokio::test]
async fn test_upload_rejects_non_video() {
    let (app, store, _) = setup_app().await;

    let boundary = "---------------------------123456789012345678901234567";
    let multipart_body = format!(
        "--{boundary}\r\n\
        Content-Disposition: form-data; name=\"file\"; filename=\"notes.txt\"\r\n\
        Content-Type: text/plain\r\n\r\n\
        not a video\r\n\
        --{boundary}--\r\n",
    );

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/upload-multipart")
                .header(
                    "Content-Type",
                    format!("multipart/form-data; boundary={boundary}"),
                )
                .body(Body::from(multipart_body))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = json_body(response).await;
    assert_eq!(json["failed"][0]["name"], "notes.txt");
    assert!(!store.contains("notes.txt"));
}

#[tokio::test]
async fn test_delete_falls_back_to_prefix() {
    let (app, store, state) = setup_app().await;

    store.insert("movies/a.mp4", b"a", "video/mp4");
    store.insert("movies/b.mp4", b"b", "video/mp4");
    let folder_id = state.catalog.ensure_folder_hierarchy("movies").await.unwrap();
    state
        .catalog
        .upsert_file(folder_id, "a.mp4", "movies/a.mp4", 1, "video/mp4", None)
        .await
        .unwrap();
    state
        .catalog
        .upsert_file(folder_id, "b.mp4", "movies/b.mp4", 1, "video/mp4", None)
        .await
        .unwrap();

    // "movies" matches no object exactly, so the whole prefix goes.
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri("/file?id=movies")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await;
    assert_eq!(json["mode"], "prefix");
    assert_eq!(json["deletedObjects"], 2);
    assert!(!store.contains("movies/a.mp4"));
    assert!(!store.contains("movies/b.mp4"));
    assert!(
        state
            .catalog
            .get_folder_by_prefix("movies")
            .await
            .unwrap()
            .is_none()
    );

    // Nothing left anywhere: now it is a 404.
    let response = app
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri("/file?id=movies")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_prefix_delete_is_best_effort() {
    let store = ScriptedStore {
        fail_delete_for: Some("movies/b.mp4".to_string()),
        ..ScriptedStore::default()
    };
    store.inner.insert("movies/a.mp4", b"a", "video/mp4");
    store.inner.insert("movies/b.mp4", b"b", "video/mp4");
    store.inner.insert("movies/c.mp4", b"c", "video/mp4");
    let (app, store, _) = setup_scripted_app(store).await;

    let response = app
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri("/file?id=movies")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    // One object refused to go; the sweep still removes the rest and the
    // outcome is reported item by item, not as a failure.
    assert_eq!(response.status(), StatusCode::MULTI_STATUS);
    let json = json_body(response).await;
    assert_eq!(json["ok"], false);
    assert_eq!(json["mode"], "prefix");
    assert_eq!(json["deletedObjects"], 2);
    assert_eq!(json["failedObjects"], 1);

    assert!(!store.inner.contains("movies/a.mp4"));
    assert!(store.inner.contains("movies/b.mp4"));
    assert!(!store.inner.contains("movies/c.mp4"));
}

#[tokio::test]
async fn test_upload_catalog_row_uses_store_metadata() {
    let store = ScriptedStore {
        remote_metadata: Some((1_700_000_000_000, "video/x-matroska".to_string())),
        ..ScriptedStore::default()
    };
    let (app, _, state) = setup_scripted_app(store).await;

    let boundary = "---------------------------123456789012345678901234567";
    let multipart_body = format!(
        "--{boundary}\r\n\
        Content-Disposition: form-data; name=\"file\"; filename=\"clip.mp4\"\r\n\
        Content-Type: video/mp4\r\n\r\n\
        fake video bytes\r\n\
        --{boundary}--\r\n",
    );

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/upload-multipart")
                .header(
                    "Content-Type",
                    format!("multipart/form-data; boundary={boundary}"),
                )
                .body(Body::from(multipart_body))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // The store's answer, not the client's declaration, lands in the
    // catalog.
    let row = state
        .catalog
        .get_file_by_path("clip.mp4")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.content_type, "video/x-matroska");
    assert_eq!(
        row.uploaded_at,
        chrono::DateTime::from_timestamp_millis(1_700_000_000_000)
    );
}

#[tokio::test]
async fn test_rename_copies_then_deletes() {
    let (app, store, state) = setup_app().await;

    store.insert("movies/old.mp4", b"payload", "video/mp4");
    let folder_id = state.catalog.ensure_folder_hierarchy("movies").await.unwrap();
    state
        .catalog
        .upsert_file(folder_id, "old.mp4", "movies/old.mp4", 7, "video/mp4", None)
        .await
        .unwrap();

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/rename")
                .header("Content-Type", "application/json")
                .body(Body::from(
                    r#"{"id": "movies/old.mp4", "newName": "new.mp4"}"#,
                ))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await;
    assert_eq!(json["id"], "movies/new.mp4");

    assert!(!store.contains("movies/old.mp4"));
    assert_eq!(store.object_data("movies/new.mp4").unwrap(), b"payload");
    assert!(
        state
            .catalog
            .get_file_by_path("movies/old.mp4")
            .await
            .unwrap()
            .is_none()
    );
    assert!(
        state
            .catalog
            .get_file_by_path("movies/new.mp4")
            .await
            .unwrap()
            .is_some()
    );
}

#[tokio::test]
async fn test_head_stream_answers_from_catalog() {
    let (app, _, state) = setup_app().await;

    let folder_id = state.catalog.ensure_folder_hierarchy("movies").await.unwrap();
    state
        .catalog
        .upsert_file(folder_id, "clip.mp4", "movies/clip.mp4", 1234, "video/mp4", None)
        .await
        .unwrap();

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("HEAD")
                .uri("/stream/movies/clip.mp4")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers().get("content-type").unwrap(), "video/mp4");
    assert_eq!(response.headers().get("content-length").unwrap(), "1234");
    assert_eq!(response.headers().get("accept-ranges").unwrap(), "bytes");
    assert_eq!(
        response.headers().get("cache-control").unwrap(),
        "no-store"
    );

    let response = app
        .oneshot(
            Request::builder()
                .method("HEAD")
                .uri("/stream/missing.mp4")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_videos_filter() {
    let (app, _, state) = setup_app().await;

    let folder_id = state.catalog.ensure_folder_hierarchy("mixed").await.unwrap();
    state
        .catalog
        .upsert_file(folder_id, "clip.mp4", "mixed/clip.mp4", 1, "video/mp4", None)
        .await
        .unwrap();
    state
        .catalog
        .upsert_file(folder_id, "notes.txt", "mixed/notes.txt", 1, "text/plain", None)
        .await
        .unwrap();

    let response = app
        .oneshot(
            Request::builder()
                .uri("/videos?prefix=mixed")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await;
    let items = json.as_array().unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0]["name"], "clip.mp4");
}
