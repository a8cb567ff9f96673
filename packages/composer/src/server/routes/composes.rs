//! Compose endpoints.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Extension, Path};
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;
use uuid::Uuid;

use crate::domains::composes::status::{
    ComposeLogs, ComposeManifests, ComposeMetadata, ComposeStatus,
};
use crate::domains::composes::{self, ComposeRequest};
use crate::server::app::AppState;
use crate::server::error::{ServiceError, ServiceErrorKind};

use super::API_PREFIX;

#[derive(Debug, Serialize)]
pub struct ComposeId {
    pub id: String,
    pub kind: &'static str,
    pub href: String,
}

/// POST /compose
pub async fn create_compose(
    Extension(state): Extension<AppState>,
    body: Result<Json<ComposeRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<ComposeId>), ServiceError> {
    let Json(request) = body.map_err(|rejection| match rejection {
        JsonRejection::MissingJsonContentType(_) => {
            ServiceError::new(ServiceErrorKind::UnsupportedMediaType)
        }
        other => ServiceError::with_details(ServiceErrorKind::BodyDecodingError, other.to_string()),
    })?;

    let compose = request.validate(&state.deps.distros)?;
    let id = composes::start_compose(&state.deps, compose).await?;

    Ok((
        StatusCode::CREATED,
        Json(ComposeId {
            id: id.to_string(),
            kind: "ComposeId",
            href: format!("{}/composes/{}", API_PREFIX, id),
        }),
    ))
}

fn parse_compose_id(id: &str) -> Result<Uuid, ServiceError> {
    Uuid::parse_str(id).map_err(|_| ServiceErrorKind::InvalidComposeId.into())
}

/// GET /composes/{id}
pub async fn get_compose_status(
    Extension(state): Extension<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ComposeStatus>, ServiceError> {
    let id = parse_compose_id(&id)?;
    composes::compose_status(&state.deps, id).await.map(Json)
}

/// GET /composes/{id}/metadata
pub async fn get_compose_metadata(
    Extension(state): Extension<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ComposeMetadata>, ServiceError> {
    let id = parse_compose_id(&id)?;
    composes::compose_metadata(&state.deps, id).await.map(Json)
}

/// GET /composes/{id}/logs
pub async fn get_compose_logs(
    Extension(state): Extension<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ComposeLogs>, ServiceError> {
    let id = parse_compose_id(&id)?;
    composes::compose_logs(&state.deps, id).await.map(Json)
}

/// GET /composes/{id}/manifests
pub async fn get_compose_manifests(
    Extension(state): Extension<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ComposeManifests>, ServiceError> {
    let id = parse_compose_id(&id)?;
    composes::compose_manifests(&state.deps, id).await.map(Json)
}
