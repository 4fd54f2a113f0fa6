use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct Folder {
    pub id: i64,
    pub name: String,
    pub prefix: String,
    pub parent_id: Option<i64>,
    pub file_count: Option<i64>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct FileRecord {
    pub id: i64,
    pub folder_id: Option<i64>,
    pub file_name: String,
    pub file_path: String,
    pub size: i64,
    pub content_type: String,
    pub uploaded_at: Option<DateTime<Utc>>,
}

pub const FOLDER_MIME_TYPE: &str = "application/x-directory";

/// One row in a browse listing, in the shape the frontend consumes.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Entry {
    pub id: String,
    pub name: String,
    pub mime_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modified_time: Option<DateTime<Utc>>,
}

impl Entry {
    pub fn folder(f: &Folder) -> Self {
        Self {
            id: f.prefix.clone(),
            name: f.name.clone(),
            mime_type: FOLDER_MIME_TYPE.to_string(),
            size: None,
            modified_time: None,
        }
    }

    pub fn file(f: &FileRecord) -> Self {
        Self {
            id: f.file_path.clone(),
            name: f.file_name.clone(),
            mime_type: f.content_type.clone(),
            size: Some(f.size),
            modified_time: f.uploaded_at,
        }
    }
}
