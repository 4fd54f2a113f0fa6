use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use crate::models::{FileRecord, Folder};
use crate::utils::paths::split_segments;

/// SQLite-backed catalog of folders and files mirroring the remote store's
/// key space. Folder prefixes are slash-separated and carry no trailing
/// slash.
#[derive(Clone)]
pub struct CatalogStore {
    pool: SqlitePool,
}

/// Object keys may legitimately contain `%` or `_`; escape them so LIKE
/// patterns match the prefix literally.
fn escape_like(input: &str) -> String {
    input
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

impl CatalogStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Walks a prefix segment by segment, creating any missing folder rows.
    /// Returns the id of the deepest folder, or `None` for the root prefix.
    pub async fn ensure_folder_hierarchy(&self, prefix: &str) -> Result<Option<i64>, sqlx::Error> {
        let mut parent_id: Option<i64> = None;
        let mut path = String::new();
        for segment in split_segments(prefix) {
            if !path.is_empty() {
                path.push('/');
            }
            path.push_str(segment);
            parent_id = Some(self.upsert_folder(segment, &path, parent_id).await?);
        }
        Ok(parent_id)
    }

    pub async fn upsert_folder(
        &self,
        name: &str,
        prefix: &str,
        parent_id: Option<i64>,
    ) -> Result<i64, sqlx::Error> {
        sqlx::query(
            "INSERT INTO folders (name, prefix, parent_id, created_at, updated_at)
             VALUES (?, ?, ?, datetime('now'), datetime('now'))
             ON CONFLICT(prefix) DO UPDATE SET
                 name = excluded.name,
                 parent_id = excluded.parent_id,
                 updated_at = datetime('now')",
        )
        .bind(name)
        .bind(prefix)
        .bind(parent_id)
        .execute(&self.pool)
        .await?;

        let (id,): (i64,) = sqlx::query_as("SELECT id FROM folders WHERE prefix = ?")
            .bind(prefix)
            .fetch_one(&self.pool)
            .await?;
        Ok(id)
    }

    pub async fn get_folder_by_prefix(
        &self,
        prefix: &str,
    ) -> Result<Option<Folder>, sqlx::Error> {
        sqlx::query_as::<_, Folder>("SELECT * FROM folders WHERE prefix = ?")
            .bind(prefix)
            .fetch_optional(&self.pool)
            .await
    }

    /// Direct children only. `parent_id = None` selects top-level folders,
    /// not folders with any parent.
    pub async fn list_folders_by_parent(
        &self,
        parent_id: Option<i64>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Folder>, sqlx::Error> {
        sqlx::query_as::<_, Folder>(
            "SELECT * FROM folders WHERE parent_id IS ?
             ORDER BY name COLLATE NOCASE LIMIT ? OFFSET ?",
        )
        .bind(parent_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
    }

    pub async fn count_folders_by_parent(
        &self,
        parent_id: Option<i64>,
    ) -> Result<i64, sqlx::Error> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM folders WHERE parent_id IS ?")
                .bind(parent_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }

    pub async fn list_files_by_folder(
        &self,
        folder_id: Option<i64>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<FileRecord>, sqlx::Error> {
        sqlx::query_as::<_, FileRecord>(
            "SELECT * FROM files WHERE folder_id IS ?
             ORDER BY file_name COLLATE NOCASE LIMIT ? OFFSET ?",
        )
        .bind(folder_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
    }

    pub async fn get_file_by_path(
        &self,
        file_path: &str,
    ) -> Result<Option<FileRecord>, sqlx::Error> {
        sqlx::query_as::<_, FileRecord>("SELECT * FROM files WHERE file_path = ?")
            .bind(file_path)
            .fetch_optional(&self.pool)
            .await
    }

    pub async fn upsert_file(
        &self,
        folder_id: Option<i64>,
        file_name: &str,
        file_path: &str,
        size: i64,
        content_type: &str,
        uploaded_at: Option<DateTime<Utc>>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO files (folder_id, file_name, file_path, size, content_type, uploaded_at)
             VALUES (?, ?, ?, ?, ?, COALESCE(?, datetime('now')))
             ON CONFLICT(file_path) DO UPDATE SET
                 folder_id = excluded.folder_id,
                 file_name = excluded.file_name,
                 size = excluded.size,
                 content_type = excluded.content_type,
                 uploaded_at = excluded.uploaded_at",
        )
        .bind(folder_id)
        .bind(file_name)
        .bind(file_path)
        .bind(size)
        .bind(content_type)
        .bind(uploaded_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Returns rows affected so callers can tell a miss from a delete.
    pub async fn delete_file_by_path(&self, file_path: &str) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM files WHERE file_path = ?")
            .bind(file_path)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// Deletes every file strictly under `prefix` (as a folder).
    pub async fn delete_files_by_prefix(&self, prefix: &str) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM files WHERE file_path LIKE ? ESCAPE '\\'")
            .bind(format!("{}/%", escape_like(prefix)))
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// Deletes the folder at `prefix` and every descendant folder.
    pub async fn delete_folders_by_prefix(&self, prefix: &str) -> Result<u64, sqlx::Error> {
        let result =
            sqlx::query("DELETE FROM folders WHERE prefix = ? OR prefix LIKE ? ESCAPE '\\'")
                .bind(prefix)
                .bind(format!("{}/%", escape_like(prefix)))
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected())
    }

    pub async fn rename_file(
        &self,
        old_path: &str,
        new_path: &str,
        new_name: &str,
        folder_id: Option<i64>,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE files SET file_path = ?, file_name = ?, folder_id = ? WHERE file_path = ?",
        )
        .bind(new_path)
        .bind(new_name)
        .bind(folder_id)
        .bind(old_path)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Every catalog file path at or under `prefix`. Used by the
    /// synchronizer to find rows with no remote counterpart.
    pub async fn file_paths_with_prefix(&self, prefix: &str) -> Result<Vec<String>, sqlx::Error> {
        let pattern = if prefix.is_empty() {
            "%".to_string()
        } else {
            format!("{}%", escape_like(prefix))
        };
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT file_path FROM files WHERE file_path LIKE ? ESCAPE '\\'")
                .bind(pattern)
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.into_iter().map(|(path,)| path).collect())
    }
}
