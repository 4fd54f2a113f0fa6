use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{HeaderValue, Method, StatusCode, header},
    response::Response,
};
use futures::TryStreamExt;
use serde::Deserialize;

use crate::api::error::AppError;
use crate::services::object_store::StoreError;
use crate::services::proxy::{is_benign_disconnect, plan_upstream, response_headers};
use crate::utils::mime::resolve_content_type;
use crate::utils::paths::normalize_key;

#[derive(Deserialize)]
pub struct StreamQuery {
    pub id: String,
}

#[utoipa::path(
    get,
    path = "/stream/{key}",
    params(
        ("key" = String, Path, description = "Object key")
    ),
    responses(
        (status = 200, description = "Full object stream"),
        (status = 206, description = "Byte range"),
        (status = 304, description = "Not modified"),
        (status = 404, description = "Object not found")
    )
)]
pub async fn stream_by_path(
    method: Method,
    State(state): State<crate::AppState>,
    Path(key): Path<String>,
    request_headers: header::HeaderMap,
) -> Result<Response, AppError> {
    stream_object(state, method, key, request_headers).await
}

pub async fn stream_by_query(
    method: Method,
    State(state): State<crate::AppState>,
    Query(query): Query<StreamQuery>,
    request_headers: header::HeaderMap,
) -> Result<Response, AppError> {
    stream_object(state, method, query.id, request_headers).await
}

async fn stream_object(
    state: crate::AppState,
    method: Method,
    key: String,
    request_headers: header::HeaderMap,
) -> Result<Response, AppError> {
    let key = normalize_key(&key);
    if key.is_empty() {
        return Err(AppError::BadRequest("Missing object key".to_string()));
    }

    // HEAD is answered from the catalog alone. Players probe with HEAD
    // before every playback session; going upstream for those would burn a
    // signed-URL fetch per probe.
    if method == Method::HEAD {
        let record = state
            .catalog
            .get_file_by_path(&key)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Object not found: {key}")))?;

        let mut response = Response::new(Body::empty());
        let headers = response.headers_mut();
        if let Ok(value) =
            HeaderValue::from_str(&resolve_content_type(Some(&record.content_type), &key))
        {
            headers.insert(header::CONTENT_TYPE, value);
        }
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from(record.size));
        headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
        headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
        return Ok(response);
    }

    let plan = plan_upstream(&request_headers);
    let upstream = state.proxy.fetch(&key, &plan).await?;
    let status = upstream.status();

    if status == StatusCode::NOT_MODIFIED {
        let mut response = Response::new(Body::empty());
        *response.status_mut() = StatusCode::NOT_MODIFIED;
        for name in [header::ETAG, header::LAST_MODIFIED] {
            if let Some(value) = upstream.headers().get(&name) {
                response.headers_mut().insert(name, value.clone());
            }
        }
        return Ok(response);
    }

    // A 200 with no body means the store served a stub; surfacing it as a
    // cacheable empty object would poison downstream caches.
    if status == StatusCode::OK && upstream.content_length() == Some(0) {
        return Err(AppError::Store(StoreError::Transient(
            "empty body from remote store".to_string(),
        )));
    }

    let headers = response_headers(upstream.headers(), &key, &plan);
    let log_key = key.clone();
    let body = Body::from_stream(upstream.bytes_stream().map_err(move |e| {
        let message = e.to_string();
        if is_benign_disconnect(&message) {
            tracing::info!(key = %log_key, "stream closed early: {message}");
        } else {
            tracing::error!(key = %log_key, "stream error: {message}");
        }
        std::io::Error::other(message)
    }));

    let mut response = Response::new(body);
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    Ok(response)
}
