pub mod api;
pub mod config;
pub mod infrastructure;
pub mod models;
pub mod services;
pub mod utils;

use crate::config::AppConfig;
use crate::services::catalog::CatalogStore;
use crate::services::object_store::ObjectStore;
use crate::services::progress::ProgressRegistry;
use crate::services::proxy::StreamingProxy;
use crate::services::signed_url::{Clock, SignedUrlCache, SystemClock};
use crate::services::uploader::UploadOrchestrator;
use axum::{
    Router,
    middleware::from_fn,
    routing::{delete, get, post},
};
use sqlx::SqlitePool;
use std::sync::Arc;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::api::handlers;

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::health::health,
        handlers::catalog::list_entries,
        handlers::catalog::create_folder,
        handlers::files::stream_url,
        handlers::files::delete_file,
        handlers::files::rename_file,
        handlers::files::upload_files,
        handlers::stream::stream_by_path,
    ),
    components(
        schemas(
            handlers::health::HealthResponse,
            handlers::catalog::ListResponse,
            handlers::catalog::CreateFolderRequest,
            handlers::catalog::SyncResponse,
            handlers::files::StreamUrlResponse,
            handlers::files::DeleteResponse,
            handlers::files::RenameRequest,
            handlers::files::RenameResponse,
            handlers::files::UploadResponse,
            handlers::files::UploadedEntry,
            handlers::files::UploadFailure,
            models::Entry,
            models::Folder,
            models::FileRecord,
            services::progress::ProgressSnapshot,
        )
    ),
    tags(
        (name = "catalog", description = "Folder and file listing endpoints"),
        (name = "files", description = "Upload, delete and rename endpoints"),
        (name = "stream", description = "Streaming proxy endpoints")
    )
)]
pub struct ApiDoc;

#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    pub store: Arc<dyn ObjectStore>,
    pub catalog: CatalogStore,
    pub uploader: Arc<UploadOrchestrator>,
    pub client_urls: Arc<SignedUrlCache>,
    pub proxy_urls: Arc<SignedUrlCache>,
    pub proxy: Arc<StreamingProxy>,
    pub progress: Arc<ProgressRegistry>,
    pub config: AppConfig,
}

impl AppState {
    /// Wires the full service graph from a database pool, a store backend
    /// and configuration.
    pub fn build(db: SqlitePool, store: Arc<dyn ObjectStore>, config: AppConfig) -> Self {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock::new());
        let catalog = CatalogStore::new(db.clone());
        let client_urls = Arc::new(SignedUrlCache::for_clients(
            store.clone(),
            clock.clone(),
            &config,
        ));
        let proxy_urls = Arc::new(SignedUrlCache::for_proxy(store.clone(), clock, &config));
        let proxy = Arc::new(StreamingProxy::new(proxy_urls.clone()));
        let uploader = Arc::new(UploadOrchestrator::new(store.clone(), &config));
        let progress = Arc::new(ProgressRegistry::new());

        Self {
            db,
            store,
            catalog,
            uploader,
            client_urls,
            proxy_urls,
            proxy,
            progress,
            config,
        }
    }
}

pub fn create_app(state: AppState) -> Router {
    // Catalog listings and mutations must never be cached downstream; the
    // streaming routes manage their own cache headers.
    let api = Router::new()
        .route("/list", get(handlers::catalog::list_entries))
        .route("/folders", get(handlers::catalog::list_folders))
        .route("/folder", post(handlers::catalog::create_folder))
        .route("/videos", get(handlers::files::list_videos))
        .route("/stream-url", get(handlers::files::stream_url))
        .route("/file", delete(handlers::files::delete_file))
        .route("/rename", post(handlers::files::rename_file))
        .route("/upload-multipart", post(handlers::files::upload_files))
        .route("/upload-progress", get(handlers::files::upload_progress))
        .route("/sync", post(handlers::catalog::sync_catalog))
        .layer(from_fn(api::middleware::no_store::no_store));

    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .merge(api)
        .route("/health", get(handlers::health::health))
        .route("/stream/*key", get(handlers::stream::stream_by_path))
        .route("/stream", get(handlers::stream::stream_by_query))
        .with_state(state)
}
