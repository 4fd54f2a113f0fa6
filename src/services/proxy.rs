use axum::http::{HeaderMap, HeaderValue, header};
use std::sync::Arc;

use crate::services::object_store::{StoreError, StoreResult};
use crate::services::signed_url::SignedUrlCache;
use crate::utils::mime::resolve_content_type;

/// Cache-control applied to full-object responses. Objects are immutable by
/// key, so downstream caches may hold them long-term.
pub const LONG_LIVED_CACHE_CONTROL: &str =
    "public, max-age=86400, s-maxage=31536000, stale-while-revalidate=604800";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CachePolicy {
    /// Range responses are never cached: a cached partial body poisons
    /// later full-object requests.
    NoStore,
    LongLived,
}

/// What to send upstream for one proxied request.
#[derive(Debug, Clone)]
pub struct UpstreamPlan {
    pub range: Option<HeaderValue>,
    pub if_none_match: Option<HeaderValue>,
    pub if_modified_since: Option<HeaderValue>,
    pub cache: CachePolicy,
}

/// A Range request forwards only the Range header; validators are dropped so
/// the upstream never answers 304 to a byte-range ask. Without a Range, the
/// conditional headers pass through.
pub fn plan_upstream(request_headers: &HeaderMap) -> UpstreamPlan {
    if let Some(range) = request_headers.get(header::RANGE) {
        return UpstreamPlan {
            range: Some(range.clone()),
            if_none_match: None,
            if_modified_since: None,
            cache: CachePolicy::NoStore,
        };
    }
    UpstreamPlan {
        range: None,
        if_none_match: request_headers.get(header::IF_NONE_MATCH).cloned(),
        if_modified_since: request_headers.get(header::IF_MODIFIED_SINCE).cloned(),
        cache: CachePolicy::LongLived,
    }
}

/// Builds the downstream response headers from the upstream's, with the
/// content type resolved against the object key and our cache policy
/// applied.
pub fn response_headers(upstream: &HeaderMap, key: &str, plan: &UpstreamPlan) -> HeaderMap {
    let mut headers = HeaderMap::new();

    let upstream_type = upstream
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok());
    if let Ok(value) = HeaderValue::from_str(&resolve_content_type(upstream_type, key)) {
        headers.insert(header::CONTENT_TYPE, value);
    }

    for name in [
        header::CONTENT_LENGTH,
        header::CONTENT_RANGE,
        header::ETAG,
        header::LAST_MODIFIED,
    ] {
        if let Some(value) = upstream.get(&name) {
            headers.insert(name, value.clone());
        }
    }
    headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));

    match plan.cache {
        CachePolicy::NoStore => {
            headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
            headers.insert(header::VARY, HeaderValue::from_static("Range"));
        }
        CachePolicy::LongLived => {
            headers.insert(
                header::CACHE_CONTROL,
                HeaderValue::from_static(LONG_LIVED_CACHE_CONTROL),
            );
        }
    }
    headers
}

/// Client-initiated disconnects surface as stream errors mid-transfer. They
/// are routine for media playback (seeks, tab closes) and are logged at
/// info, not treated as upstream failures.
pub fn is_benign_disconnect(message: &str) -> bool {
    let message = message.to_ascii_lowercase();
    [
        "operation canceled",
        "operation was canceled",
        "aborted",
        "premature",
        "socket hang up",
        "connection reset",
        "broken pipe",
    ]
    .iter()
    .any(|needle| message.contains(needle))
}

/// Fetches objects through short-lived signed URLs, retrying once with a
/// fresh URL when the store rejects a cached one.
pub struct StreamingProxy {
    urls: Arc<SignedUrlCache>,
    http: reqwest::Client,
}

impl StreamingProxy {
    pub fn new(urls: Arc<SignedUrlCache>) -> Self {
        Self {
            urls,
            http: reqwest::Client::new(),
        }
    }

    async fn send(&self, url: &str, plan: &UpstreamPlan) -> StoreResult<reqwest::Response> {
        let mut request = self.http.get(url);
        if let Some(range) = &plan.range {
            request = request.header(header::RANGE, range);
        }
        if let Some(etag) = &plan.if_none_match {
            request = request.header(header::IF_NONE_MATCH, etag);
        }
        if let Some(since) = &plan.if_modified_since {
            request = request.header(header::IF_MODIFIED_SINCE, since);
        }
        Ok(request.send().await?)
    }

    /// Opens the upstream response for `key`. Status passthrough is the
    /// caller's job; this only guarantees the URL was accepted.
    pub async fn fetch(&self, key: &str, plan: &UpstreamPlan) -> StoreResult<reqwest::Response> {
        let (url, _) = self.urls.get(key, None).await?;
        let response = self.send(&url, plan).await?;

        let status = response.status().as_u16();
        if status == 401 || status == 403 {
            tracing::info!(key, status, "signed URL rejected, re-issuing and retrying once");
            self.urls.invalidate(key);
            let (url, _) = self.urls.get(key, None).await?;
            return self.send(&url, plan).await;
        }
        if status == 404 {
            return Err(StoreError::NotFound(key.to_string()));
        }
        Ok(response)
    }
}
