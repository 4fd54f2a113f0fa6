use std::collections::HashSet;
use std::sync::Arc;

use crate::services::catalog::CatalogStore;
use crate::services::object_store::ObjectStore;
use crate::utils::mime::resolve_content_type;
use crate::utils::paths::parent_and_leaf;

#[derive(Debug, Default, Clone)]
pub struct SyncReport {
    pub scanned: u64,
    pub upserted: u64,
    pub removed: u64,
}

/// Rebuilds the catalog from the remote store's listing: every remote object
/// under the prefix is upserted (with its folder hierarchy), and catalog
/// rows with no remote counterpart are removed.
pub struct CatalogSynchronizer {
    store: Arc<dyn ObjectStore>,
    catalog: CatalogStore,
}

impl CatalogSynchronizer {
    pub fn new(store: Arc<dyn ObjectStore>, catalog: CatalogStore) -> Self {
        Self { store, catalog }
    }

    pub async fn sync(&self, prefix: &str) -> anyhow::Result<SyncReport> {
        let mut report = SyncReport::default();
        let mut seen: HashSet<String> = HashSet::new();
        let mut start: Option<String> = None;

        loop {
            let page = self.store.list(prefix, start.as_deref(), 1000).await?;
            let empty = page.files.is_empty();

            for object in page.files {
                report.scanned += 1;
                // Folder placeholder keys carry no content.
                if object.file_name.ends_with('/') {
                    continue;
                }

                let (parent, leaf) = parent_and_leaf(&object.file_name);
                let folder_id = self.catalog.ensure_folder_hierarchy(&parent).await?;
                let content_type =
                    resolve_content_type(object.content_type.as_deref(), &object.file_name);
                self.catalog
                    .upsert_file(
                        folder_id,
                        &leaf,
                        &object.file_name,
                        object.content_length,
                        &content_type,
                        object.uploaded_at(),
                    )
                    .await?;
                seen.insert(object.file_name);
                report.upserted += 1;
            }

            match page.next_file_name {
                Some(next) if !empty => start = Some(next),
                _ => break,
            }
        }

        for path in self.catalog.file_paths_with_prefix(prefix).await? {
            if !seen.contains(&path) {
                report.removed += self.catalog.delete_file_by_path(&path).await?;
            }
        }

        tracing::info!(
            prefix,
            scanned = report.scanned,
            upserted = report.upserted,
            removed = report.removed,
            "catalog sync finished"
        );
        Ok(report)
    }
}
