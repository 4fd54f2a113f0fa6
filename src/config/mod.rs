use std::env;

/// Application configuration for uploads, the signed-URL pools and the HTTP
/// surface.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Listen port (default: 3000)
    pub port: u16,

    /// Maximum request body size in bytes (default: 5 GB; large uploads are
    /// streamed, not buffered)
    pub max_body_bytes: usize,

    /// Uploads at or below this size are buffered in memory and sent
    /// single-shot (default: 50 MB)
    pub max_in_memory_bytes: u64,

    /// Multipart part size in bytes (default: 50 MB)
    pub part_size: u64,

    /// Concurrent part uploads within one multipart session (default: 3)
    pub part_concurrency: usize,

    /// Attempts for transient remote-store failures (default: 3)
    pub upload_retries: u32,

    /// Base backoff delay in milliseconds, doubled per attempt (default: 600)
    pub upload_retry_base_ms: u64,

    /// Default TTL for client-facing signed URLs in seconds (default: 300)
    pub client_url_default_ttl_secs: u64,

    /// Lower clamp for client-facing signed-URL TTLs (default: 300)
    pub client_url_min_ttl_secs: u64,

    /// Upper clamp for client-facing signed-URL TTLs (default: 6 hours)
    pub client_url_max_ttl_secs: u64,

    /// TTL for proxy-internal signed URLs (default: 24 hours)
    pub proxy_url_ttl_secs: u64,

    /// Proxy-internal URLs are re-issued this long before expiry
    /// (default: 1 hour)
    pub proxy_url_refresh_secs: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            port: 3000,
            max_body_bytes: 5 * 1024 * 1024 * 1024,
            max_in_memory_bytes: 50 * 1024 * 1024,
            part_size: 50 * 1024 * 1024,
            part_concurrency: 3,
            upload_retries: 3,
            upload_retry_base_ms: 600,
            client_url_default_ttl_secs: 300,
            client_url_min_ttl_secs: 300,
            client_url_max_ttl_secs: 6 * 3600,
            proxy_url_ttl_secs: 24 * 3600,
            proxy_url_refresh_secs: 3600,
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    env::var(name).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let default = Self::default();

        Self {
            port: env_parse("PORT", default.port),
            max_body_bytes: env_parse("MAX_BODY_BYTES", default.max_body_bytes),
            max_in_memory_bytes: env_parse(
                "UPLOAD_MAX_IN_MEMORY_BYTES",
                default.max_in_memory_bytes,
            ),
            part_size: env_parse("UPLOAD_PART_SIZE", default.part_size),
            part_concurrency: env_parse("UPLOAD_PART_CONCURRENCY", default.part_concurrency)
                .max(1),
            upload_retries: env_parse("UPLOAD_RETRIES", default.upload_retries).max(1),
            upload_retry_base_ms: env_parse("UPLOAD_RETRY_BASE_MS", default.upload_retry_base_ms)
                .max(100),
            client_url_default_ttl_secs: env_parse(
                "SIGNED_URL_TTL",
                default.client_url_default_ttl_secs,
            ),
            client_url_min_ttl_secs: env_parse(
                "SIGNED_URL_MIN_TTL",
                default.client_url_min_ttl_secs,
            ),
            client_url_max_ttl_secs: env_parse(
                "SIGNED_URL_MAX_TTL",
                default.client_url_max_ttl_secs,
            ),
            proxy_url_ttl_secs: env_parse("PROXY_URL_TTL", default.proxy_url_ttl_secs),
            proxy_url_refresh_secs: env_parse(
                "PROXY_URL_REFRESH_WINDOW",
                default.proxy_url_refresh_secs,
            ),
        }
    }

    /// Create config for development (short signed-URL TTLs so expiry is
    /// observable without waiting).
    pub fn development() -> Self {
        Self {
            client_url_default_ttl_secs: 10,
            client_url_min_ttl_secs: 10,
            ..Self::default()
        }
    }

    /// Create config for production (strict TTL lower bound).
    pub fn production() -> Self {
        Self::default()
    }
}
