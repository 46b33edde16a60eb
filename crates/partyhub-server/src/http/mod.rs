pub mod content;
pub mod health;
pub mod jobs;

use axum::{http::StatusCode, Json};
use serde_json::{json, Value};

/// Error response used by every admin handler.
pub type ApiError = (StatusCode, Json<Value>);

pub(crate) fn api_error(status: StatusCode, message: impl std::fmt::Display) -> ApiError {
    (status, Json(json!({ "error": message.to_string() })))
}
