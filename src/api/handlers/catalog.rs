use axum::{
    Json,
    extract::{Query, State},
    http::StatusCode,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::api::error::AppError;
use crate::models::Entry;
use crate::services::catalog_sync::CatalogSynchronizer;
use crate::utils::paths::{normalize_key, normalize_prefix};

const DEFAULT_PAGE_SIZE: i64 = 100;
const MAX_PAGE_SIZE: i64 = 1000;
const FOLDER_LIST_LIMIT: i64 = 200;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListQuery {
    pub prefix: Option<String>,
    pub page_token: Option<String>,
    pub page: Option<i64>,
    pub page_size: Option<i64>,
    #[serde(rename = "type")]
    pub type_filter: Option<String>,
}

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ListResponse {
    pub items: Vec<Entry>,
    pub next_page_token: Option<String>,
}

#[utoipa::path(
    get,
    path = "/list",
    params(
        ("prefix" = Option<String>, Query, description = "Folder prefix to list"),
        ("pageToken" = Option<String>, Query, description = "Continuation token"),
        ("page" = Option<i64>, Query, description = "1-based page number, ignored when pageToken is set"),
        ("pageSize" = Option<i64>, Query, description = "Items per page (1-1000)"),
        ("type" = Option<String>, Query, description = "all (default) or file to exclude folders")
    ),
    responses(
        (status = 200, description = "Folders then files under the prefix", body = ListResponse)
    )
)]
pub async fn list_entries(
    State(state): State<crate::AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<ListResponse>, AppError> {
    let prefix = normalize_key(&query.prefix.unwrap_or_default());
    let limit = query
        .page_size
        .unwrap_or(DEFAULT_PAGE_SIZE)
        .clamp(1, MAX_PAGE_SIZE);
    let offset: i64 = match &query.page_token {
        Some(token) => token
            .parse()
            .map_err(|_| AppError::BadRequest("Invalid page token".to_string()))?,
        None => (query.page.unwrap_or(1).max(1) - 1) * limit,
    };
    let files_only = query
        .type_filter
        .as_deref()
        .is_some_and(|t| t.eq_ignore_ascii_case("file"));

    // An unknown prefix is an empty listing, not an error: the catalog may
    // simply not have synced it yet.
    let parent_id = if prefix.is_empty() {
        None
    } else {
        match state.catalog.get_folder_by_prefix(&prefix).await? {
            Some(folder) => Some(folder.id),
            None => {
                return Ok(Json(ListResponse {
                    items: Vec::new(),
                    next_page_token: None,
                }));
            }
        }
    };

    // Folders sort before files; the offset runs through both ranges.
    let folder_total = if files_only {
        0
    } else {
        state.catalog.count_folders_by_parent(parent_id).await?
    };
    let mut items = Vec::new();
    if !files_only && offset < folder_total {
        for folder in state
            .catalog
            .list_folders_by_parent(parent_id, limit, offset)
            .await?
        {
            items.push(Entry::folder(&folder));
        }
    }
    let remaining = limit - items.len() as i64;
    if remaining > 0 {
        let file_offset = (offset - folder_total).max(0);
        for file in state
            .catalog
            .list_files_by_folder(parent_id, remaining, file_offset)
            .await?
        {
            items.push(Entry::file(&file));
        }
    }

    let next_page_token = (items.len() as i64 == limit).then(|| (offset + limit).to_string());
    Ok(Json(ListResponse {
        items,
        next_page_token,
    }))
}

#[derive(Deserialize)]
pub struct FoldersQuery {
    pub prefix: Option<String>,
}

pub async fn list_folders(
    State(state): State<crate::AppState>,
    Query(query): Query<FoldersQuery>,
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

    let folders = state
        .catalog
        .list_folders_by_parent(parent_id, FOLDER_LIST_LIMIT, 0)
        .await?;
    Ok(Json(folders.iter().map(Entry::folder).collect()))
}

#[derive(Deserialize, ToSchema)]
pub struct CreateFolderRequest {
    pub prefix: String,
}

#[utoipa::path(
    post,
    path = "/folder",
    request_body = CreateFolderRequest,
    responses(
        (status = 201, description = "Folder created, including any missing ancestors", body = Entry),
        (status = 400, description = "Missing prefix")
    )
)]
pub async fn create_folder(
    State(state): State<crate::AppState>,
    Json(req): Json<CreateFolderRequest>,
) -> Result<(StatusCode, Json<Entry>), AppError> {
    let prefix = normalize_key(&req.prefix);
    if prefix.is_empty() {
        return Err(AppError::BadRequest("Missing prefix".to_string()));
    }

    state.catalog.ensure_folder_hierarchy(&prefix).await?;
    let folder = state
        .catalog
        .get_folder_by_prefix(&prefix)
        .await?
        .ok_or_else(|| AppError::Internal("Folder missing after upsert".to_string()))?;

    Ok((StatusCode::CREATED, Json(Entry::folder(&folder))))
}

#[derive(Deserialize)]
pub struct SyncQuery {
    pub prefix: Option<String>,
}

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SyncResponse {
    pub scanned: u64,
    pub upserted: u64,
    pub removed: u64,
}

/// Full reconciliation of the catalog against the remote store's listing.
pub async fn sync_catalog(
    State(state): State<crate::AppState>,
    Query(query): Query<SyncQuery>,
) -> Result<Json<SyncResponse>, AppError> {
    let prefix = normalize_prefix(&query.prefix.unwrap_or_default());
    let synchronizer = CatalogSynchronizer::new(state.store.clone(), state.catalog.clone());
    let report = synchronizer.sync(&prefix).await?;

    Ok(Json(SyncResponse {
        scanned: report.scanned,
        upserted: report.upserted,
        removed: report.removed,
    }))
}
