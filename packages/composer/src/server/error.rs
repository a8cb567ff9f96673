//! Service error catalog.
//!
//! Every error the HTTP surface can return has a stable numeric id and a
//! `COMPOSER-<id>` code; the full catalog is served at `/errors`. Internal
//! diagnostics travel in [`ServiceError::details`], which is logged and
//! never echoed to the caller.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

use crate::server::routes::API_PREFIX;

/// Catalog of service errors. Ids are stable: new kinds append, existing
/// kinds never renumber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ServiceErrorKind {
    #[error("Invalid compose id")]
    InvalidComposeId,
    #[error("Invalid error id")]
    InvalidErrorId,
    #[error("Invalid 'page' parameter")]
    InvalidPageParam,
    #[error("Invalid 'size' parameter")]
    InvalidSizeParam,
    #[error("Invalid OSTree ref")]
    InvalidOSTreeRef,
    #[error("Repository must have at most one of baseurl, mirrorlist, metalink set")]
    InvalidRepository,
    #[error("Invalid number of image builds")]
    InvalidNumberOfImageBuilds,
    #[error("Unsupported distribution")]
    UnsupportedDistribution,
    #[error("Unsupported architecture for distribution")]
    UnsupportedArchitecture,
    #[error("Unsupported image type for architecture")]
    UnsupportedImageType,
    #[error("Payload repository has no baseurl")]
    NoBaseURLInPayloadRepository,
    #[error("Unsupported media type")]
    UnsupportedMediaType,
    #[error("Malformed request body")]
    BodyDecodingError,
    #[error("Failed to marshal JSON response")]
    JSONMarshallingError,
    #[error("Failed to unmarshal JSON payload")]
    JSONUnMarshallingError,
    #[error("Failed to enqueue job")]
    EnqueueingJob,
    #[error("Failed to initialize blueprint")]
    FailedToInitializeBlueprint,
    #[error("Failed to generate manifest seed")]
    FailedToGenerateManifestSeed,
    #[error("Malformed osbuild job result")]
    MalformedOSBuildJobResult,
    #[error("Only one upload target is allowed per image build")]
    SeveralUploadTargets,
    #[error("Unknown or missing upload target")]
    UnknownUploadTarget,
    #[error("Unexpected number of image builds in compose")]
    UnexpectedNumberOfImageBuilds,
    #[error("Compose id refers to a job of the wrong type")]
    InvalidJobType,
    #[error("Compose not found")]
    ComposeNotFound,
    #[error("Failed to load the openapi spec")]
    FailedToLoadOpenAPISpec,
    #[error("Service error not found in catalog")]
    ServiceErrorNotFound,
    #[error("Error not found")]
    ErrorNotFound,
}

impl ServiceErrorKind {
    pub const ALL: &'static [ServiceErrorKind] = &[
        Self::InvalidComposeId,
        Self::InvalidErrorId,
        Self::InvalidPageParam,
        Self::InvalidSizeParam,
        Self::InvalidOSTreeRef,
        Self::InvalidRepository,
        Self::InvalidNumberOfImageBuilds,
        Self::UnsupportedDistribution,
        Self::UnsupportedArchitecture,
        Self::UnsupportedImageType,
        Self::NoBaseURLInPayloadRepository,
        Self::UnsupportedMediaType,
        Self::BodyDecodingError,
        Self::JSONMarshallingError,
        Self::JSONUnMarshallingError,
        Self::EnqueueingJob,
        Self::FailedToInitializeBlueprint,
        Self::FailedToGenerateManifestSeed,
        Self::MalformedOSBuildJobResult,
        Self::SeveralUploadTargets,
        Self::UnknownUploadTarget,
        Self::UnexpectedNumberOfImageBuilds,
        Self::InvalidJobType,
        Self::ComposeNotFound,
        Self::FailedToLoadOpenAPISpec,
        Self::ServiceErrorNotFound,
        Self::ErrorNotFound,
    ];

    /// Stable numeric id, 1-based in catalog order.
    pub fn id(&self) -> u32 {
        Self::ALL
            .iter()
            .position(|kind| kind == self)
            .map(|idx| idx as u32 + 1)
            .unwrap_or(0)
    }

    pub fn code(&self) -> String {
        format!("COMPOSER-{}", self.id())
    }

    pub fn from_id(id: u32) -> Option<Self> {
        if id == 0 {
            return None;
        }
        Self::ALL.get(id as usize - 1).copied()
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::InvalidComposeId
            | Self::InvalidErrorId
            | Self::InvalidPageParam
            | Self::InvalidSizeParam
            | Self::InvalidOSTreeRef
            | Self::InvalidRepository
            | Self::InvalidNumberOfImageBuilds
            | Self::UnsupportedDistribution
            | Self::UnsupportedArchitecture
            | Self::UnsupportedImageType
            | Self::NoBaseURLInPayloadRepository
            | Self::BodyDecodingError
            | Self::JSONUnMarshallingError
            | Self::SeveralUploadTargets
            | Self::UnknownUploadTarget
            | Self::InvalidJobType => StatusCode::BAD_REQUEST,
            Self::UnsupportedMediaType => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            Self::ComposeNotFound | Self::ErrorNotFound => StatusCode::NOT_FOUND,
            Self::JSONMarshallingError
            | Self::EnqueueingJob
            | Self::FailedToInitializeBlueprint
            | Self::FailedToGenerateManifestSeed
            | Self::MalformedOSBuildJobResult
            | Self::UnexpectedNumberOfImageBuilds
            | Self::FailedToLoadOpenAPISpec
            | Self::ServiceErrorNotFound => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// A catalog error plus an optional internal diagnostic.
#[derive(Debug, Error)]
#[error("{kind}")]
pub struct ServiceError {
    kind: ServiceErrorKind,
    details: Option<String>,
}

impl ServiceError {
    pub fn new(kind: ServiceErrorKind) -> Self {
        Self {
            kind,
            details: None,
        }
    }

    pub fn with_details(kind: ServiceErrorKind, details: impl Into<String>) -> Self {
        Self {
            kind,
            details: Some(details.into()),
        }
    }

    pub fn kind(&self) -> ServiceErrorKind {
        self.kind
    }
}

impl From<ServiceErrorKind> for ServiceError {
    fn from(kind: ServiceErrorKind) -> Self {
        Self::new(kind)
    }
}

/// Wire shape of a catalog error.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    pub kind: &'static str,
    pub id: String,
    pub code: String,
    pub href: String,
    pub reason: String,
}

impl ErrorBody {
    pub fn from_kind(kind: ServiceErrorKind) -> Self {
        let id = kind.id();
        Self {
            kind: "Error",
            id: id.to_string(),
            code: kind.code(),
            href: format!("{}/errors/{}", API_PREFIX, id),
            reason: kind.to_string(),
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.kind.status();
        if let Some(details) = &self.details {
            if status.is_server_error() {
                tracing::error!(code = %self.kind.code(), details = %details, "request failed");
            } else {
                tracing::debug!(code = %self.kind.code(), details = %details, "request rejected");
            }
        }
        (status, Json(ErrorBody::from_kind(self.kind))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_stable_and_dense() {
        assert_eq!(ServiceErrorKind::InvalidComposeId.id(), 1);
        assert_eq!(ServiceErrorKind::ErrorNotFound.id(), ServiceErrorKind::ALL.len() as u32);
        for kind in ServiceErrorKind::ALL {
            assert_eq!(ServiceErrorKind::from_id(kind.id()), Some(*kind));
        }
        assert_eq!(ServiceErrorKind::from_id(0), None);
        assert_eq!(
            ServiceErrorKind::from_id(ServiceErrorKind::ALL.len() as u32 + 1),
            None
        );
    }

    #[test]
    fn input_errors_map_to_client_statuses() {
        assert_eq!(
            ServiceErrorKind::InvalidRepository.status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ServiceErrorKind::ComposeNotFound.status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ServiceErrorKind::UnsupportedMediaType.status(),
            StatusCode::UNSUPPORTED_MEDIA_TYPE
        );
        assert_eq!(
            ServiceErrorKind::EnqueueingJob.status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
