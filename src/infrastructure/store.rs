use std::env;
use std::sync::Arc;
use tracing::info;

use crate::config::AppConfig;
use crate::services::memory_store::MemoryObjectStore;
use crate::services::object_store::{ObjectStore, RemoteStoreClient, RemoteStoreConfig, RetryPolicy};

/// Builds the object-store backend from the environment. `STORE_BACKEND=memory`
/// swaps in the in-memory store for local development.
pub fn setup_store(config: &AppConfig) -> Arc<dyn ObjectStore> {
    let backend = env::var("STORE_BACKEND").unwrap_or_else(|_| "remote".to_string());

    if backend == "memory" {
        info!("☁️  Object store: in-memory (development)");
        return Arc::new(MemoryObjectStore::new());
    }

    let endpoint = env::var("STORE_ENDPOINT").expect("STORE_ENDPOINT must be set");
    let key_id = env::var("STORE_KEY_ID").expect("STORE_KEY_ID must be set");
    let application_key = env::var("STORE_APP_KEY").expect("STORE_APP_KEY must be set");
    let bucket_id = env::var("STORE_BUCKET_ID").expect("STORE_BUCKET_ID must be set");
    let bucket_name = env::var("STORE_BUCKET_NAME").expect("STORE_BUCKET_NAME must be set");

    info!("☁️  Object store: {} (Bucket: {})", endpoint, bucket_name);

    Arc::new(RemoteStoreClient::new(RemoteStoreConfig {
        endpoint,
        key_id,
        application_key,
        bucket_id,
        bucket_name,
        retry: RetryPolicy {
            attempts: config.upload_retries,
            base_delay: std::time::Duration::from_millis(config.upload_retry_base_ms),
        },
    }))
}
