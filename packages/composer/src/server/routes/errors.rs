//! Service error catalog endpoints.

use std::collections::HashMap;

use axum::extract::{Path, Query};
use axum::Json;
use serde::Serialize;

use crate::server::error::{ErrorBody, ServiceError, ServiceErrorKind};

const DEFAULT_PAGE_SIZE: usize = 100;

#[derive(Debug, Serialize)]
pub struct ErrorList {
    pub kind: &'static str,
    pub page: usize,
    pub size: usize,
    pub total: usize,
    pub items: Vec<ErrorBody>,
}

fn parse_param(
    params: &HashMap<String, String>,
    name: &str,
    default: usize,
    invalid: ServiceErrorKind,
) -> Result<usize, ServiceError> {
    match params.get(name) {
        None => Ok(default),
        Some(raw) => raw
            .parse()
            .map_err(|_| ServiceError::with_details(invalid, raw.clone())),
    }
}

/// GET /errors?page=&size=
pub async fn list_errors(
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<ErrorList>, ServiceError> {
    let page = parse_param(&params, "page", 0, ServiceErrorKind::InvalidPageParam)?;
    let size = parse_param(&params, "size", DEFAULT_PAGE_SIZE, ServiceErrorKind::InvalidSizeParam)?;
    if size == 0 {
        return Err(ServiceError::with_details(
            ServiceErrorKind::InvalidSizeParam,
            "size must be positive",
        ));
    }

    let items: Vec<ErrorBody> = ServiceErrorKind::ALL
        .iter()
        .skip(page * size)
        .take(size)
        .map(|kind| ErrorBody::from_kind(*kind))
        .collect();

    Ok(Json(ErrorList {
        kind: "ErrorList",
        page,
        size,
        total: ServiceErrorKind::ALL.len(),
        items,
    }))
}

/// GET /errors/{id}
pub async fn get_error(Path(id): Path<String>) -> Result<Json<ErrorBody>, ServiceError> {
    let id: u32 = id
        .parse()
        .map_err(|_| ServiceError::with_details(ServiceErrorKind::InvalidErrorId, id))?;
    let kind = ServiceErrorKind::from_id(id)
        .ok_or_else(|| ServiceError::new(ServiceErrorKind::ErrorNotFound))?;
    Ok(Json(ErrorBody::from_kind(kind)))
}
