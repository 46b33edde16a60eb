use axum::{extract::State, http::StatusCode, Json};
use partyhub_content::ContentError;
use partyhub_jobs::{CleanupPreview, GenerationError, GenerationRequest};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::warn;

use super::{api_error, ApiError};
use crate::app::AppState;

/// POST /generate: generate tasks for one category and language.
pub async fn generate(
    State(state): State<Arc<AppState>>,
    Json(request): Json<GenerationRequest>,
) -> Result<Json<Value>, ApiError> {
    let created = state
        .generation
        .generate_on_demand(&request)
        .await
        .map_err(generation_error)?;
    Ok(Json(json!({
        "category_id": request.category_id,
        "language": request.language,
        "created": created,
    })))
}

/// GET /cleanup/preview: rows the next cleanup run would purge.
pub async fn cleanup_preview(
    State(state): State<Arc<AppState>>,
) -> Result<Json<CleanupPreview>, ApiError> {
    let cleanup = Arc::clone(&state.cleanup);
    let preview = tokio::task::spawn_blocking(move || cleanup.preview())
        .await
        .map_err(|e| api_error(StatusCode::INTERNAL_SERVER_ERROR, e))?;
    preview.map(Json).map_err(|e| {
        warn!(error = %e, "cleanup preview failed");
        api_error(StatusCode::INTERNAL_SERVER_ERROR, e)
    })
}

fn generation_error(e: GenerationError) -> ApiError {
    let status = match &e {
        GenerationError::IncompatibleAgeGroup { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        GenerationError::Content(ContentError::CategoryNotFound { .. }) => StatusCode::NOT_FOUND,
        GenerationError::ProviderUnconfigured => StatusCode::SERVICE_UNAVAILABLE,
        GenerationError::Provider(_) | GenerationError::InvalidResponse(_) => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    warn!(status = status.as_u16(), error = %e, "on-demand generation failed");
    api_error(status, e)
}
