use axum::{
    Json,
    extract::{Multipart, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use futures::TryStreamExt;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::io::StreamReader;
use utoipa::ToSchema;

use crate::api::error::AppError;
use crate::models::Entry;
use crate::services::object_store::{StoreError, delete_object_by_name, find_object_by_name};
use crate::services::progress::{ProgressSnapshot, ProgressTracker};
use crate::utils::mime::{is_video, resolve_content_type};
use crate::utils::paths::{normalize_key, parent_and_leaf, with_new_leaf};

#[derive(Deserialize)]
pub struct VideosQuery {
    pub prefix: Option<String>,
}

pub async fn list_videos(
    State(state): State<crate::AppState>,
    Query(query): Query<VideosQuery>,
) -> Result<Json<Vec<Entry>>, AppError> {
    let prefix = normalize_key(&query.prefix.unwrap_or_default());

    let parent_id = if prefix.is_empty() {
        None
    } else {
        match state.catalog.get_folder_by_prefix(&prefix).await? {
            Some(folder) => Some(folder.id),
            None => return Ok(Json(Vec::new())),
        }
    };

    let files = state
        .catalog
        .list_files_by_folder(parent_id, 1000, 0)
        .await?;
    let videos = files
        .iter()
        .filter(|f| is_video(&f.file_name, Some(&f.content_type)))
        .map(Entry::file)
        .collect();
    Ok(Json(videos))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamUrlQuery {
    pub id: String,
    pub ttl_seconds: Option<u64>,
    pub ttl_minutes: Option<u64>,
}

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct StreamUrlResponse {
    pub url: String,
    pub expires_in_seconds: u64,
}

#[utoipa::path(
    get,
    path = "/stream-url",
    params(
        ("id" = String, Query, description = "Object key"),
        ("ttlSeconds" = Option<u64>, Query, description = "Requested TTL in seconds, clamped"),
        ("ttlMinutes" = Option<u64>, Query, description = "Requested TTL in minutes, ignored when ttlSeconds is set")
    ),
    responses(
        (status = 200, description = "Signed download URL", body = StreamUrlResponse),
        (status = 404, description = "Object not found")
    )
)]
pub async fn stream_url(
    State(state): State<crate::AppState>,
    Query(query): Query<StreamUrlQuery>,
) -> Result<Json<StreamUrlResponse>, AppError> {
    let key = normalize_key(&query.id);
    if key.is_empty() {
        return Err(AppError::BadRequest("Missing object key".to_string()));
    }

    let requested = query
        .ttl_seconds
        .or_else(|| query.ttl_minutes.map(|m| m * 60));
    let (url, ttl) = state
        .client_urls
        .get(&key, requested.map(Duration::from_secs))
        .await?;
    Ok(Json(StreamUrlResponse {
        url,
        expires_in_seconds: ttl.as_secs(),
    }))
}

#[derive(Deserialize)]
pub struct DeleteQuery {
    pub id: String,
}

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DeleteResponse {
    pub ok: bool,
    pub mode: String,
    pub deleted_objects: u64,
    pub failed_objects: u64,
    pub deleted_rows: u64,
}

#[utoipa::path(
    delete,
    path = "/file",
    params(
        ("id" = String, Query, description = "Object key, or folder prefix when no exact object matches")
    ),
    responses(
        (status = 200, description = "Deleted from the store and catalog", body = DeleteResponse),
        (status = 207, description = "Some objects under the prefix could not be deleted", body = DeleteResponse),
        (status = 404, description = "Nothing matched the key")
    )
)]
pub async fn delete_file(
    State(state): State<crate::AppState>,
    Query(query): Query<DeleteQuery>,
) -> Result<Response, AppError> {
    let key = normalize_key(&query.id);
    if key.is_empty() {
        return Err(AppError::NotFound("Empty key".to_string()));
    }

    // Exact object first; if nothing matches, treat the key as a folder
    // prefix and remove everything under it. Prefix removal is best-effort:
    // a failing object is counted and the sweep keeps going.
    let mut deleted_objects = 0u64;
    let mut failed_objects = 0u64;
    let mut mode = "file";
    match delete_object_by_name(state.store.as_ref(), &key).await {
        Ok(_) => deleted_objects = 1,
        Err(StoreError::NotFound(_)) => {
            mode = "prefix";
            let prefix = format!("{key}/");
            let mut cursor: Option<String> = None;
            loop {
                let page = state.store.list(&prefix, cursor.as_deref(), 1000).await?;
                for object in page.files {
                    match state
                        .store
                        .delete_version(&object.file_id, &object.file_name)
                        .await
                    {
                        Ok(()) => deleted_objects += 1,
                        Err(e) => {
                            tracing::warn!(
                                object = %object.file_name,
                                error = %e,
                                "failed to delete object under prefix, continuing"
                            );
                            failed_objects += 1;
                        }
                    }
                }
                cursor = page.next_file_name;
                if cursor.is_none() {
                    break;
                }
            }
        }
        Err(e) => return Err(e.into()),
    }

    let mut deleted_rows = state.catalog.delete_file_by_path(&key).await?;
    deleted_rows += state.catalog.delete_files_by_prefix(&key).await?;
    deleted_rows += state.catalog.delete_folders_by_prefix(&key).await?;

    state.client_urls.invalidate(&key);
    state.proxy_urls.invalidate(&key);

    if deleted_objects == 0 && failed_objects == 0 && deleted_rows == 0 {
        return Err(AppError::NotFound(format!("Nothing matched {key}")));
    }

    tracing::info!(
        key,
        mode,
        deleted_objects,
        failed_objects,
        deleted_rows,
        "delete finished"
    );
    let status = if failed_objects > 0 {
        StatusCode::MULTI_STATUS
    } else {
        StatusCode::OK
    };
    let body = DeleteResponse {
        ok: failed_objects == 0,
        mode: mode.to_string(),
        deleted_objects,
        failed_objects,
        deleted_rows,
    };
    Ok((status, Json(body)).into_response())
}

#[derive(Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RenameRequest {
    pub id: String,
    pub new_name: String,
}

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RenameResponse {
    pub id: String,
    pub name: String,
}

#[utoipa::path(
    post,
    path = "/rename",
    request_body = RenameRequest,
    responses(
        (status = 200, description = "Renamed", body = RenameResponse),
        (status = 404, description = "Object not found")
    )
)]
pub async fn rename_file(
    State(state): State<crate::AppState>,
    Json(req): Json<RenameRequest>,
) -> Result<Json<RenameResponse>, AppError> {
    let key = normalize_key(&req.id);
    let new_name = req.new_name.trim();
    if key.is_empty() {
        return Err(AppError::BadRequest("Missing object key".to_string()));
    }
    if new_name.is_empty() || new_name.contains('/') {
        return Err(AppError::BadRequest(
            "New name must be non-empty and contain no slashes".to_string(),
        ));
    }

    let new_key = with_new_leaf(&key, new_name);
    if new_key == key {
        return Ok(Json(RenameResponse {
            id: key,
            name: new_name.to_string(),
        }));
    }

    // The store has no rename: copy to the new key, then drop the old
    // version. A failed delete leaves both keys, which the next sync
    // surfaces.
    let source = find_object_by_name(state.store.as_ref(), &key).await?;
    let copied = state.store.copy_object(&source.file_id, &new_key).await?;
    state
        .store
        .delete_version(&source.file_id, &source.file_name)
        .await?;

    let (parent, _) = parent_and_leaf(&new_key);
    let folder_id = state.catalog.ensure_folder_hierarchy(&parent).await?;
    let changed = state
        .catalog
        .rename_file(&key, &new_key, new_name, folder_id)
        .await?;
    if changed == 0 {
        let content_type = resolve_content_type(copied.content_type.as_deref(), &new_key);
        state
            .catalog
            .upsert_file(
                folder_id,
                new_name,
                &new_key,
                copied.content_length,
                &content_type,
                copied.uploaded_at(),
            )
            .await?;
    }

    state.client_urls.invalidate(&key);
    state.proxy_urls.invalidate(&key);

    Ok(Json(RenameResponse {
        id: new_key,
        name: new_name.to_string(),
    }))
}

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UploadedEntry {
    pub name: String,
    pub key: String,
    pub size: u64,
    pub parts: u32,
}

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UploadFailure {
    pub name: String,
    pub error: String,
}

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    pub uploaded: Vec<UploadedEntry>,
    pub failed: Vec<UploadFailure>,
}

#[utoipa::path(
    post,
    path = "/upload-multipart",
    request_body(content = Multipart, description = "prefix and jobId fields before one or more video file fields"),
    responses(
        (status = 200, description = "All files uploaded", body = UploadResponse),
        (status = 207, description = "Some files failed", body = UploadResponse),
        (status = 400, description = "No file uploaded")
    )
)]
pub async fn upload_files(
    State(state): State<crate::AppState>,
    mut multipart: Multipart,
) -> Result<Response, AppError> {
    let mut prefix = String::new();
    let mut tracker: Option<Arc<ProgressTracker>> = None;
    let mut uploaded: Vec<UploadedEntry> = Vec::new();
    let mut failed: Vec<UploadFailure> = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(e.to_string()))?
    {
        let name = field.name().unwrap_or_default().to_string();

        if name == "prefix" {
            prefix = normalize_key(&field.text().await.unwrap_or_default());
        } else if name == "jobId" {
            let job_id = field.text().await.unwrap_or_default();
            if !job_id.is_empty() {
                tracker = Some(state.progress.start(&job_id, 0));
            }
        } else if name == "file" {
            let file_name = field.file_name().unwrap_or("unnamed").to_string();
            let content_type = field.content_type().map(|s| s.to_string());

            if !is_video(&file_name, content_type.as_deref()) {
                failed.push(UploadFailure {
                    name: file_name,
                    error: "Only video files are accepted".to_string(),
                });
                continue;
            }

            let key = if prefix.is_empty() {
                file_name.clone()
            } else {
                format!("{prefix}/{file_name}")
            };
            let content_type = content_type
                .unwrap_or_else(|| resolve_content_type(None, &key));

            let body_with_io_error = field.map_err(std::io::Error::other);
            let reader = StreamReader::new(body_with_io_error);

            match state
                .uploader
                .upload(&key, &content_type, reader, tracker.clone())
                .await
            {
                Ok(outcome) => {
                    let (parent, leaf) = parent_and_leaf(&key);
                    let folder_id = state.catalog.ensure_folder_hierarchy(&parent).await?;
                    // Catalog rows mirror what the store recorded, not what
                    // the client declared.
                    let stored_type =
                        resolve_content_type(outcome.remote.content_type.as_deref(), &key);
                    state
                        .catalog
                        .upsert_file(
                            folder_id,
                            &leaf,
                            &key,
                            outcome.remote.content_length,
                            &stored_type,
                            outcome.remote.uploaded_at(),
                        )
                        .await?;
                    uploaded.push(UploadedEntry {
                        name: file_name,
                        key,
                        size: outcome.size,
                        parts: outcome.parts,
                    });
                }
                Err(e) => {
                    tracing::error!(key, error = %e, "upload failed");
                    failed.push(UploadFailure {
                        name: file_name,
                        error: e.to_string(),
                    });
                }
            }
        }
    }

    if uploaded.is_empty() && failed.is_empty() {
        return Err(AppError::BadRequest("No file provided".to_string()));
    }

    let status = if failed.is_empty() {
        StatusCode::OK
    } else if uploaded.is_empty() {
        StatusCode::BAD_REQUEST
    } else {
        StatusCode::MULTI_STATUS
    };
    Ok((status, Json(UploadResponse { uploaded, failed })).into_response())
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressQuery {
    pub job_id: String,
}

pub async fn upload_progress(
    State(state): State<crate::AppState>,
    Query(query): Query<ProgressQuery>,
) -> Result<Json<ProgressSnapshot>, AppError> {
    state
        .progress
        .snapshot(&query.job_id)
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("No upload job {}", query.job_id)))
}
