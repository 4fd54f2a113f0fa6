use axum::{Json, extract::State};
use serde::Serialize;
use utoipa::ToSchema;

use crate::api::error::AppError;

#[derive(Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse)
    )
)]
pub async fn health(
    State(state): State<crate::AppState>,
) -> Result<Json<HealthResponse>, AppError> {
    // A failing catalog connection should surface here, not on first use.
    sqlx::query("SELECT 1").execute(&state.db).await?;

    Ok(Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    }))
}
