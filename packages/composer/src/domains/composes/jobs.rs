//! Typed payloads for the jobs a compose fans out into.
//!
//! The queue treats args and results as opaque JSON; these are the shapes
//! the compose front-end and the workers agree on. Every result carries a
//! `success` flag so the status projector can classify a finished job
//! without knowing its type.

use serde::{Deserialize, Serialize};

use super::request::{Customizations, ImageType, OstreeOptions, Repository};

pub const DEPSOLVE_JOB_TYPE: &str = "depsolve";
pub const MANIFEST_JOB_TYPE: &str = "manifest";
pub const OSBUILD_JOB_TYPE: &str = "osbuild";
pub const KOJI_INIT_JOB_TYPE: &str = "koji-init";
pub const KOJI_FINALIZE_JOB_TYPE: &str = "koji-finalize";

/// A resolved package: NEVRA plus header checksum and optional signature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackageSpec {
    pub name: String,
    pub epoch: u32,
    pub version: String,
    pub release: String,
    pub arch: String,
    pub sigmd5: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DepsolveJobArgs {
    pub distribution: String,
    pub architecture: String,
    /// Extra packages requested on top of the image type's base set.
    #[serde(default)]
    pub packages: Vec<String>,
    pub repositories: Vec<Repository>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DepsolveErrorKind {
    /// The requested package set cannot be resolved against the given
    /// repositories.
    BadPackageSet,
    Generic,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DepsolveError {
    pub kind: DepsolveErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DepsolveJobResult {
    pub success: bool,
    #[serde(default)]
    pub package_specs: Vec<PackageSpec>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<DepsolveError>,
}

impl DepsolveJobResult {
    pub fn solved(package_specs: Vec<PackageSpec>) -> Self {
        Self {
            success: true,
            package_specs,
            error: None,
        }
    }

    pub fn failed(kind: DepsolveErrorKind, message: impl Into<String>) -> Self {
        Self {
            success: false,
            package_specs: Vec::new(),
            error: Some(DepsolveError {
                kind,
                message: message.into(),
            }),
        }
    }
}

/// Input handed to the external manifest builder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestRequest {
    pub distribution: String,
    pub architecture: String,
    pub image_type: ImageType,
    pub repositories: Vec<Repository>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ostree: Option<OstreeOptions>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customizations: Option<Customizations>,
    pub package_specs: Vec<PackageSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestJobResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manifest: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ManifestJobResult {
    pub fn built(manifest: serde_json::Value) -> Self {
        Self {
            success: true,
            manifest: Some(manifest),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            manifest: None,
            error: Some(error.into()),
        }
    }
}

/// Where a finished image gets pushed. Names that the caller omitted have
/// already been generated by request validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UploadTarget {
    Aws {
        region: String,
        share_with_accounts: Vec<String>,
        snapshot_name: String,
    },
    AwsS3 {
        region: String,
        object_key: String,
    },
    Gcp {
        region: String,
        bucket: String,
        image_name: String,
        share_with_accounts: Vec<String>,
    },
    Azure {
        tenant_id: String,
        subscription_id: String,
        resource_group: String,
        location: String,
        image_name: String,
    },
}

/// Build-system coordinates for an osbuild job running inside a koji
/// compose. The job reads the init result positionally from its deps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KojiTarget {
    pub server: String,
    pub task_id: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OsbuildJobArgs {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<UploadTarget>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub koji: Option<KojiTarget>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadStatus {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OsbuildJobResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Build log and pipeline output, reported verbatim by the worker.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub osbuild_output: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ostree_commit: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upload_status: Option<UploadStatus>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KojiInitJobArgs {
    pub server: String,
    pub name: String,
    pub version: String,
    pub release: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KojiInitJobResult {
    pub success: bool,
    #[serde(default)]
    pub build_id: u64,
    #[serde(default)]
    pub token: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KojiFinalizeJobArgs {
    pub server: String,
    pub task_id: u64,
    pub name: String,
    pub version: String,
    pub release: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KojiFinalizeJobResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upload_target_tags_by_type() {
        let target = UploadTarget::AwsS3 {
            region: "us-east-1".into(),
            object_key: "composer-api-abc".into(),
        };
        let value = serde_json::to_value(&target).unwrap();
        assert_eq!(value["type"], "aws_s3");
        assert_eq!(value["region"], "us-east-1");

        let back: UploadTarget = serde_json::from_value(value).unwrap();
        assert_eq!(back, target);
    }

    #[test]
    fn depsolve_result_helpers() {
        let ok = DepsolveJobResult::solved(Vec::new());
        assert!(ok.success);

        let failed = DepsolveJobResult::failed(DepsolveErrorKind::BadPackageSet, "no such package");
        assert!(!failed.success);
        assert_eq!(failed.error.unwrap().kind, DepsolveErrorKind::BadPackageSet);
    }
}
