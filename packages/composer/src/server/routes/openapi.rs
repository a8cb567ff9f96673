//! Served openapi document.

use axum::Json;

use crate::server::error::{ServiceError, ServiceErrorKind};

const OPENAPI_SPEC: &str = include_str!("../openapi.json");

/// GET /openapi
pub async fn get_openapi() -> Result<Json<serde_json::Value>, ServiceError> {
    serde_json::from_str(OPENAPI_SPEC)
        .map(Json)
        .map_err(|e| ServiceError::with_details(ServiceErrorKind::FailedToLoadOpenAPISpec, e.to_string()))
}
