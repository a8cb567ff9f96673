//! User-visible projections over raw job status.
//!
//! The queue stores opaque blobs; these functions turn the terminal job of
//! a compose (osbuild, or koji-finalize) plus its dependency chain into the
//! wire shapes served by the HTTP surface.

use serde::Serialize;
use uuid::Uuid;

use crate::kernel::deps::ComposerDeps;
use crate::kernel::queue::{JobState, QueueError};
use crate::server::error::{ServiceError, ServiceErrorKind};
use crate::server::routes::API_PREFIX;

use super::jobs::{
    DepsolveJobResult, KojiInitJobResult, ManifestJobResult, OsbuildJobResult, PackageSpec,
    UploadStatus, KOJI_FINALIZE_JOB_TYPE, OSBUILD_JOB_TYPE,
};

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageStatusValue {
    Pending,
    Building,
    Uploading,
    Registering,
    Success,
    Failure,
}

#[derive(Debug, Clone, Serialize)]
pub struct ImageStatus {
    pub status: ImageStatusValue,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upload_status: Option<UploadStatus>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ComposeStatusValue {
    Pending,
    Success,
    Failure,
}

#[derive(Debug, Clone, Serialize)]
pub struct KojiStatus {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub build_id: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ComposeStatus {
    pub id: String,
    pub kind: &'static str,
    pub href: String,
    pub status: ComposeStatusValue,
    pub image_status: ImageStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_statuses: Option<Vec<ImageStatus>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub koji_status: Option<KojiStatus>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PackageMetadata {
    pub name: String,
    pub epoch: u32,
    pub version: String,
    pub release: String,
    pub arch: String,
    pub sigmd5: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

impl From<PackageSpec> for PackageMetadata {
    fn from(spec: PackageSpec) -> Self {
        Self {
            name: spec.name,
            epoch: spec.epoch,
            version: spec.version,
            release: spec.release,
            arch: spec.arch,
            sigmd5: spec.sigmd5,
            signature: spec.signature,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ComposeMetadata {
    pub id: String,
    pub kind: &'static str,
    pub href: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub packages: Option<Vec<PackageMetadata>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ostree_commit: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct KojiLogs {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub init: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub import: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ComposeLogs {
    pub id: String,
    pub kind: &'static str,
    pub href: String,
    pub image_builds: Vec<serde_json::Value>,
    pub koji: KojiLogs,
}

#[derive(Debug, Clone, Serialize)]
pub struct ComposeManifests {
    pub id: String,
    pub kind: &'static str,
    pub href: String,
    pub manifests: Vec<serde_json::Value>,
}

fn compose_href(id: Uuid, suffix: &str) -> String {
    format!("{}/composes/{}{}", API_PREFIX, id, suffix)
}

fn read_error(err: QueueError) -> ServiceError {
    match err {
        QueueError::NotExist => ServiceErrorKind::ComposeNotFound.into(),
        other => {
            ServiceError::with_details(ServiceErrorKind::MalformedOSBuildJobResult, other.to_string())
        }
    }
}

/// `Some(true)` only for a finished job whose result reports success.
fn job_success(state: &JobState) -> Option<bool> {
    state
        .result
        .as_ref()
        .and_then(|result| result.get("success"))
        .and_then(|success| success.as_bool())
}

fn job_failed(state: &JobState) -> bool {
    state.canceled || (state.finished_at.is_some() && job_success(state) != Some(true))
}

fn image_status_value(state: &JobState) -> ImageStatusValue {
    if state.canceled {
        ImageStatusValue::Failure
    } else if state.finished_at.is_some() {
        if job_success(state) == Some(true) {
            ImageStatusValue::Success
        } else {
            ImageStatusValue::Failure
        }
    } else if state.started_at.is_some() {
        ImageStatusValue::Building
    } else {
        ImageStatusValue::Pending
    }
}

fn image_status(state: &JobState) -> ImageStatus {
    let upload_status = state
        .result
        .clone()
        .and_then(|result| serde_json::from_value::<OsbuildJobResult>(result).ok())
        .and_then(|result| result.upload_status);
    ImageStatus {
        status: image_status_value(state),
        upload_status,
    }
}

/// Compute the user-visible status of a compose.
pub async fn compose_status(deps: &ComposerDeps, id: Uuid) -> Result<ComposeStatus, ServiceError> {
    let state = deps.queue.job_status(id).await.map_err(read_error)?;

    match state.job_type.as_str() {
        OSBUILD_JOB_TYPE => {
            let image = image_status(&state);
            let status = match image.status {
                ImageStatusValue::Success => ComposeStatusValue::Success,
                ImageStatusValue::Failure => ComposeStatusValue::Failure,
                _ => ComposeStatusValue::Pending,
            };
            Ok(ComposeStatus {
                id: id.to_string(),
                kind: "ComposeStatus",
                href: compose_href(id, ""),
                status,
                image_status: image,
                image_statuses: None,
                koji_status: None,
            })
        }
        KOJI_FINALIZE_JOB_TYPE => koji_compose_status(deps, id, state).await,
        _ => Err(ServiceErrorKind::InvalidJobType.into()),
    }
}

async fn koji_compose_status(
    deps: &ComposerDeps,
    id: Uuid,
    finalize: JobState,
) -> Result<ComposeStatus, ServiceError> {
    let (init_id, osbuild_ids) = match finalize.deps.split_first() {
        Some((init, osbuilds)) if !osbuilds.is_empty() => (*init, osbuilds),
        _ => return Err(ServiceErrorKind::UnexpectedNumberOfImageBuilds.into()),
    };

    let init = deps.queue.job_status(init_id).await.map_err(read_error)?;
    let mut image_statuses = Vec::with_capacity(osbuild_ids.len());
    let mut any_failed = job_failed(&finalize) || job_failed(&init);
    let mut any_unfinished = !finalize.is_terminal() || !init.is_terminal();

    for osbuild_id in osbuild_ids {
        let state = deps
            .queue
            .job_status(*osbuild_id)
            .await
            .map_err(read_error)?;
        any_failed = any_failed || job_failed(&state);
        any_unfinished = any_unfinished || !state.is_terminal();
        image_statuses.push(image_status(&state));
    }

    let status = if any_failed {
        ComposeStatusValue::Failure
    } else if any_unfinished {
        ComposeStatusValue::Pending
    } else {
        ComposeStatusValue::Success
    };

    let koji_status = init
        .result
        .clone()
        .and_then(|result| serde_json::from_value::<KojiInitJobResult>(result).ok())
        .filter(|result| result.success)
        .map(|result| KojiStatus {
            build_id: Some(result.build_id),
        });

    Ok(ComposeStatus {
        id: id.to_string(),
        kind: "ComposeStatus",
        href: compose_href(id, ""),
        status,
        image_status: image_statuses[0].clone(),
        image_statuses: Some(image_statuses),
        koji_status,
    })
}

/// Package and commit metadata for a successfully finished compose. The
/// body stays empty while the compose is unfinished, canceled or failed.
pub async fn compose_metadata(
    deps: &ComposerDeps,
    id: Uuid,
) -> Result<ComposeMetadata, ServiceError> {
    let status = compose_status(deps, id).await?;

    let mut metadata = ComposeMetadata {
        id: id.to_string(),
        kind: "ComposeMetadata",
        href: compose_href(id, "/metadata"),
        packages: None,
        ostree_commit: None,
    };
    if status.status != ComposeStatusValue::Success {
        return Ok(metadata);
    }

    let state = deps.queue.job_status(id).await.map_err(read_error)?;
    let osbuild_ids: Vec<Uuid> = match state.job_type.as_str() {
        OSBUILD_JOB_TYPE => vec![id],
        KOJI_FINALIZE_JOB_TYPE => state.deps.get(1..).unwrap_or(&[]).to_vec(),
        _ => return Err(ServiceErrorKind::InvalidJobType.into()),
    };

    let mut packages = Vec::new();
    for osbuild_id in osbuild_ids {
        let osbuild = deps
            .queue
            .job_status(osbuild_id)
            .await
            .map_err(read_error)?;

        if metadata.ostree_commit.is_none() {
            metadata.ostree_commit = osbuild
                .result
                .clone()
                .and_then(|result| serde_json::from_value::<OsbuildJobResult>(result).ok())
                .and_then(|result| result.ostree_commit);
        }

        // osbuild <- manifest <- depsolve, positionally.
        let manifest_id = *osbuild.deps.first().ok_or_else(|| {
            ServiceError::with_details(
                ServiceErrorKind::MalformedOSBuildJobResult,
                "osbuild job has no manifest dependency",
            )
        })?;
        let manifest = deps
            .queue
            .job_status(manifest_id)
            .await
            .map_err(read_error)?;
        let depsolve_id = *manifest.deps.first().ok_or_else(|| {
            ServiceError::with_details(
                ServiceErrorKind::MalformedOSBuildJobResult,
                "manifest job has no depsolve dependency",
            )
        })?;
        let depsolve = deps
            .queue
            .job_status(depsolve_id)
            .await
            .map_err(read_error)?;

        let result: DepsolveJobResult = depsolve
            .result
            .and_then(|result| serde_json::from_value(result).ok())
            .ok_or_else(|| {
                ServiceError::with_details(
                    ServiceErrorKind::MalformedOSBuildJobResult,
                    "depsolve result is missing or malformed",
                )
            })?;
        packages.extend(result.package_specs.into_iter().map(PackageMetadata::from));
    }

    metadata.packages = Some(packages);
    Ok(metadata)
}

/// Worker result blobs for a koji compose, verbatim.
pub async fn compose_logs(deps: &ComposerDeps, id: Uuid) -> Result<ComposeLogs, ServiceError> {
    let state = deps.queue.job_status(id).await.map_err(read_error)?;
    if state.job_type != KOJI_FINALIZE_JOB_TYPE {
        return Err(ServiceErrorKind::InvalidJobType.into());
    }
    let (init_id, osbuild_ids) = match state.deps.split_first() {
        Some(parts) => parts,
        None => return Err(ServiceErrorKind::UnexpectedNumberOfImageBuilds.into()),
    };

    let init = deps.queue.job_status(*init_id).await.map_err(read_error)?;
    let mut image_builds = Vec::with_capacity(osbuild_ids.len());
    for osbuild_id in osbuild_ids {
        let osbuild = deps
            .queue
            .job_status(*osbuild_id)
            .await
            .map_err(read_error)?;
        image_builds.push(osbuild.result.unwrap_or(serde_json::Value::Null));
    }

    Ok(ComposeLogs {
        id: id.to_string(),
        kind: "ComposeLogs",
        href: compose_href(id, "/logs"),
        image_builds,
        koji: KojiLogs {
            init: init.result,
            import: state.result,
        },
    })
}

/// The generated manifests of a koji compose.
pub async fn compose_manifests(
    deps: &ComposerDeps,
    id: Uuid,
) -> Result<ComposeManifests, ServiceError> {
    let state = deps.queue.job_status(id).await.map_err(read_error)?;
    if state.job_type != KOJI_FINALIZE_JOB_TYPE {
        return Err(ServiceErrorKind::InvalidJobType.into());
    }

    let mut manifests = Vec::new();
    for osbuild_id in state.deps.get(1..).unwrap_or(&[]) {
        let osbuild = deps
            .queue
            .job_status(*osbuild_id)
            .await
            .map_err(read_error)?;
        let manifest_id = match osbuild.deps.first() {
            Some(id) => *id,
            None => continue,
        };
        let manifest = deps
            .queue
            .job_status(manifest_id)
            .await
            .map_err(read_error)?;
        let built = manifest
            .result
            .and_then(|result| serde_json::from_value::<ManifestJobResult>(result).ok())
            .and_then(|result| result.manifest);
        if let Some(manifest) = built {
            manifests.push(manifest);
        }
    }

    Ok(ComposeManifests {
        id: id.to_string(),
        kind: "ComposeManifests",
        href: compose_href(id, "/manifests"),
        manifests,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;
    use tempfile::TempDir;

    use crate::domains::composes::jobs::{
        DepsolveErrorKind, KojiInitJobArgs, DEPSOLVE_JOB_TYPE, KOJI_INIT_JOB_TYPE,
        MANIFEST_JOB_TYPE,
    };
    use crate::kernel::queue::{FsJobQueue, JobQueue};
    use crate::kernel::testing::{test_deps, test_package_specs};

    use super::*;

    async fn finish(queue: &Arc<dyn JobQueue>, id: Uuid, result: serde_json::Value) {
        let job = queue.dequeue_by_id(id).await.expect("dequeue by id");
        queue.finish_job(job.token, result).await.expect("finish");
    }

    /// Enqueue a depsolve → manifest → osbuild chain by hand.
    async fn single_chain(queue: &Arc<dyn JobQueue>) -> (Uuid, Uuid, Uuid) {
        let depsolve = queue
            .enqueue(DEPSOLVE_JOB_TYPE, json!({}), &[])
            .await
            .unwrap();
        let manifest = queue
            .enqueue(MANIFEST_JOB_TYPE, json!({}), &[depsolve])
            .await
            .unwrap();
        let osbuild = queue
            .enqueue(OSBUILD_JOB_TYPE, json!({}), &[manifest])
            .await
            .unwrap();
        (depsolve, manifest, osbuild)
    }

    #[tokio::test]
    async fn single_compose_status_progression() {
        let dir = TempDir::new().unwrap();
        let queue: Arc<dyn JobQueue> = Arc::new(FsJobQueue::open(dir.path()).unwrap());
        let deps = test_deps(queue.clone());

        let (depsolve, manifest, osbuild) = single_chain(&queue).await;

        let status = compose_status(&deps, osbuild).await.unwrap();
        assert_eq!(status.status, ComposeStatusValue::Pending);
        assert_eq!(status.image_status.status, ImageStatusValue::Pending);
        assert!(status.image_statuses.is_none());

        finish(
            &queue,
            depsolve,
            serde_json::to_value(DepsolveJobResult::solved(test_package_specs())).unwrap(),
        )
        .await;
        finish(
            &queue,
            manifest,
            serde_json::to_value(ManifestJobResult::built(json!({"version": "2"}))).unwrap(),
        )
        .await;

        // Started but not finished: building.
        let job = queue.dequeue_by_id(osbuild).await.unwrap();
        let status = compose_status(&deps, osbuild).await.unwrap();
        assert_eq!(status.image_status.status, ImageStatusValue::Building);
        assert_eq!(status.status, ComposeStatusValue::Pending);

        queue
            .finish_job(
                job.token,
                json!({"success": true, "upload_status": {"status": "success"}}),
            )
            .await
            .unwrap();

        let status = compose_status(&deps, osbuild).await.unwrap();
        assert_eq!(status.status, ComposeStatusValue::Success);
        assert_eq!(status.image_status.status, ImageStatusValue::Success);
        assert_eq!(status.image_status.upload_status.unwrap().status, "success");
    }

    #[tokio::test]
    async fn canceled_compose_reports_failure() {
        let dir = TempDir::new().unwrap();
        let queue: Arc<dyn JobQueue> = Arc::new(FsJobQueue::open(dir.path()).unwrap());
        let deps = test_deps(queue.clone());

        let (depsolve, _manifest, osbuild) = single_chain(&queue).await;
        queue.cancel_job(depsolve).await.unwrap();

        let status = compose_status(&deps, osbuild).await.unwrap();
        assert_eq!(status.status, ComposeStatusValue::Failure);
        assert_eq!(status.image_status.status, ImageStatusValue::Failure);
    }

    #[tokio::test]
    async fn failed_depsolve_fails_the_compose() {
        let dir = TempDir::new().unwrap();
        let queue: Arc<dyn JobQueue> = Arc::new(FsJobQueue::open(dir.path()).unwrap());
        let deps = test_deps(queue.clone());

        let (depsolve, manifest, osbuild) = single_chain(&queue).await;
        finish(
            &queue,
            depsolve,
            serde_json::to_value(DepsolveJobResult::failed(
                DepsolveErrorKind::BadPackageSet,
                "nope",
            ))
            .unwrap(),
        )
        .await;
        finish(
            &queue,
            manifest,
            serde_json::to_value(ManifestJobResult::failed("bad package set: nope")).unwrap(),
        )
        .await;
        finish(&queue, osbuild, json!({"success": false, "error": "bad package set"})).await;

        let status = compose_status(&deps, osbuild).await.unwrap();
        assert_eq!(status.status, ComposeStatusValue::Failure);
    }

    #[tokio::test]
    async fn status_of_non_compose_job_is_rejected() {
        let dir = TempDir::new().unwrap();
        let queue: Arc<dyn JobQueue> = Arc::new(FsJobQueue::open(dir.path()).unwrap());
        let deps = test_deps(queue.clone());

        let depsolve = queue
            .enqueue(DEPSOLVE_JOB_TYPE, json!({}), &[])
            .await
            .unwrap();
        let err = compose_status(&deps, depsolve).await.unwrap_err();
        assert_eq!(err.kind(), ServiceErrorKind::InvalidJobType);

        let err = compose_status(&deps, Uuid::new_v4()).await.unwrap_err();
        assert_eq!(err.kind(), ServiceErrorKind::ComposeNotFound);
    }

    #[tokio::test]
    async fn koji_compose_aggregates_image_statuses() {
        let dir = TempDir::new().unwrap();
        let queue: Arc<dyn JobQueue> = Arc::new(FsJobQueue::open(dir.path()).unwrap());
        let deps = test_deps(queue.clone());

        let init = queue
            .enqueue(
                KOJI_INIT_JOB_TYPE,
                serde_json::to_value(KojiInitJobArgs {
                    server: "https://koji.example.com".into(),
                    name: "img".into(),
                    version: "1".into(),
                    release: "1".into(),
                })
                .unwrap(),
                &[],
            )
            .await
            .unwrap();
        let (d1, m1, ob1) = single_chain(&queue).await;
        let (_d2, _m2, ob2) = single_chain(&queue).await;
        let finalize = queue
            .enqueue("koji-finalize", json!({}), &[init, ob1, ob2])
            .await
            .unwrap();

        finish(
            &queue,
            init,
            json!({"success": true, "build_id": 42, "token": "tok"}),
        )
        .await;

        let status = compose_status(&deps, finalize).await.unwrap();
        assert_eq!(status.status, ComposeStatusValue::Pending);
        assert_eq!(status.image_statuses.as_ref().unwrap().len(), 2);
        assert_eq!(status.koji_status.unwrap().build_id, Some(42));

        // One image finishing does not finish the compose.
        finish(
            &queue,
            d1,
            serde_json::to_value(DepsolveJobResult::solved(Vec::new())).unwrap(),
        )
        .await;
        finish(
            &queue,
            m1,
            serde_json::to_value(ManifestJobResult::built(json!({}))).unwrap(),
        )
        .await;
        finish(&queue, ob1, json!({"success": true})).await;

        let status = compose_status(&deps, finalize).await.unwrap();
        assert_eq!(status.status, ComposeStatusValue::Pending);
        let images = status.image_statuses.unwrap();
        assert_eq!(images[0].status, ImageStatusValue::Success);
        assert_eq!(images[1].status, ImageStatusValue::Pending);
    }

    #[tokio::test]
    async fn metadata_is_empty_until_success_then_lists_packages() {
        let dir = TempDir::new().unwrap();
        let queue: Arc<dyn JobQueue> = Arc::new(FsJobQueue::open(dir.path()).unwrap());
        let deps = test_deps(queue.clone());

        let (depsolve, manifest, osbuild) = single_chain(&queue).await;

        let metadata = compose_metadata(&deps, osbuild).await.unwrap();
        assert!(metadata.packages.is_none());

        finish(
            &queue,
            depsolve,
            serde_json::to_value(DepsolveJobResult::solved(test_package_specs())).unwrap(),
        )
        .await;
        finish(
            &queue,
            manifest,
            serde_json::to_value(ManifestJobResult::built(json!({}))).unwrap(),
        )
        .await;
        finish(
            &queue,
            osbuild,
            json!({"success": true, "ostree_commit": "abc123"}),
        )
        .await;

        let metadata = compose_metadata(&deps, osbuild).await.unwrap();
        let packages = metadata.packages.unwrap();
        assert_eq!(packages.len(), 2);
        assert_eq!(packages[0].name, "kernel");
        assert_eq!(metadata.ostree_commit.as_deref(), Some("abc123"));
    }

    #[tokio::test]
    async fn logs_and_manifests_are_koji_only() {
        let dir = TempDir::new().unwrap();
        let queue: Arc<dyn JobQueue> = Arc::new(FsJobQueue::open(dir.path()).unwrap());
        let deps = test_deps(queue.clone());

        let (_depsolve, _manifest, osbuild) = single_chain(&queue).await;

        let err = compose_logs(&deps, osbuild).await.unwrap_err();
        assert_eq!(err.kind(), ServiceErrorKind::InvalidJobType);
        let err = compose_manifests(&deps, osbuild).await.unwrap_err();
        assert_eq!(err.kind(), ServiceErrorKind::InvalidJobType);
    }

    #[tokio::test]
    async fn koji_logs_return_result_blobs_verbatim() {
        let dir = TempDir::new().unwrap();
        let queue: Arc<dyn JobQueue> = Arc::new(FsJobQueue::open(dir.path()).unwrap());
        let deps = test_deps(queue.clone());

        let init = queue
            .enqueue(KOJI_INIT_JOB_TYPE, json!({}), &[])
            .await
            .unwrap();
        let (depsolve, manifest, osbuild) = single_chain(&queue).await;
        let finalize = queue
            .enqueue("koji-finalize", json!({}), &[init, osbuild])
            .await
            .unwrap();

        finish(&queue, init, json!({"success": true, "build_id": 9, "token": "t"})).await;
        finish(
            &queue,
            depsolve,
            serde_json::to_value(DepsolveJobResult::solved(Vec::new())).unwrap(),
        )
        .await;
        finish(
            &queue,
            manifest,
            serde_json::to_value(ManifestJobResult::built(json!({"version": "2"}))).unwrap(),
        )
        .await;
        finish(
            &queue,
            osbuild,
            json!({"success": true, "osbuild_output": {"log": "done"}}),
        )
        .await;
        finish(&queue, finalize, json!({"success": true})).await;

        let logs = compose_logs(&deps, finalize).await.unwrap();
        assert_eq!(logs.image_builds.len(), 1);
        assert_eq!(logs.image_builds[0]["osbuild_output"]["log"], "done");
        assert_eq!(logs.koji.init.unwrap()["build_id"], 9);
        assert_eq!(logs.koji.import.unwrap()["success"], true);

        let manifests = compose_manifests(&deps, finalize).await.unwrap();
        assert_eq!(manifests.manifests, vec![json!({"version": "2"})]);
    }
}
