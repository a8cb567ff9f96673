//! Out-of-band manifest generation.
//!
//! Manifest jobs are enqueued with empty args and are not handled by the
//! worker pool: for each one, the assembler spawns a task that waits for
//! the depsolve dep to finish, picks the job up by id, and finishes it with
//! the manifest produced by the external builder.
//!
//! The deadline is a watchdog, not a correctness boundary: if it elapses
//! while the job is still blocked, the task leaves the job alone and the
//! stale-lease sweep eventually reaps the compose.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};
use uuid::Uuid;

use crate::kernel::deps::ComposerDeps;
use crate::kernel::queue::{DequeuedJob, QueueError};

use super::jobs::{DepsolveErrorKind, DepsolveJobResult, ManifestJobResult, ManifestRequest};

/// How long a manifest job may stay blocked or in flight before its task
/// gives up.
pub const MANIFEST_GENERATION_DEADLINE: Duration = Duration::from_secs(5 * 60);

const PENDING_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Spawn the generation task for one manifest job.
pub fn spawn_manifest_task(
    deps: Arc<ComposerDeps>,
    manifest_job: Uuid,
    request: ManifestRequest,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let generation = generate(&deps, manifest_job, request);
        match tokio::time::timeout(MANIFEST_GENERATION_DEADLINE, generation).await {
            Ok(Ok(())) => debug!(job_id = %manifest_job, "manifest job finished"),
            Ok(Err(e)) => {
                warn!(job_id = %manifest_job, error = %e, "manifest generation failed")
            }
            Err(_) => {
                warn!(job_id = %manifest_job, "manifest generation deadline elapsed; leaving the job to the lease sweep")
            }
        }
    })
}

async fn generate(
    deps: &Arc<ComposerDeps>,
    manifest_job: Uuid,
    request: ManifestRequest,
) -> Result<(), QueueError> {
    // Wait for the depsolve dep to finish.
    let job = loop {
        match deps.queue.dequeue_by_id(manifest_job).await {
            Ok(job) => break job,
            Err(QueueError::NotPending) => tokio::time::sleep(PENDING_POLL_INTERVAL).await,
            Err(e) => return Err(e),
        }
    };

    let result = build_manifest(deps, &job, request).await;
    deps.queue
        .finish_job(job.token, serde_json::to_value(&result)?)
        .await
}

/// Read the depsolve result positionally from the manifest job's deps,
/// categorize a failed depsolve, and invoke the external manifest builder.
/// This is the only place outside workers that interprets a job result.
async fn build_manifest(
    deps: &Arc<ComposerDeps>,
    job: &DequeuedJob,
    mut request: ManifestRequest,
) -> ManifestJobResult {
    let depsolve_id = match job.deps.first() {
        Some(id) => *id,
        None => return ManifestJobResult::failed("manifest job has no depsolve dependency"),
    };
    let status = match deps.queue.job_status(depsolve_id).await {
        Ok(status) => status,
        Err(e) => return ManifestJobResult::failed(format!("depsolve status unavailable: {}", e)),
    };
    let value = match status.result {
        Some(value) => value,
        None => return ManifestJobResult::failed("depsolve result missing"),
    };
    let depsolve: DepsolveJobResult = match serde_json::from_value(value) {
        Ok(depsolve) => depsolve,
        Err(e) => return ManifestJobResult::failed(format!("malformed depsolve result: {}", e)),
    };

    if !depsolve.success {
        let message = match depsolve.error {
            Some(error) if error.kind == DepsolveErrorKind::BadPackageSet => {
                format!("bad package set: {}", error.message)
            }
            Some(error) => format!("depsolve failed: {}", error.message),
            None => "depsolve failed".to_string(),
        };
        return ManifestJobResult::failed(message);
    }

    request.package_specs = depsolve.package_specs;
    match deps.manifests.manifest(&request).await {
        Ok(manifest) => ManifestJobResult::built(manifest),
        Err(e) => ManifestJobResult::failed(format!("manifest build failed: {}", e)),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tempfile::TempDir;

    use crate::domains::composes::jobs::{DEPSOLVE_JOB_TYPE, MANIFEST_JOB_TYPE};
    use crate::domains::composes::request::ImageType;
    use crate::kernel::queue::{FsJobQueue, JobQueue};
    use crate::kernel::testing::{test_deps, test_package_specs};

    use super::*;

    fn manifest_request() -> ManifestRequest {
        ManifestRequest {
            distribution: "rhel-9".into(),
            architecture: "x86_64".into(),
            image_type: ImageType::GuestImage,
            repositories: Vec::new(),
            ostree: None,
            customizations: None,
            package_specs: Vec::new(),
        }
    }

    async fn wait_for_result(queue: &Arc<dyn JobQueue>, id: Uuid) -> serde_json::Value {
        tokio::time::timeout(Duration::from_secs(10), async {
            loop {
                let status = queue.job_status(id).await.unwrap();
                if let Some(result) = status.result {
                    break result;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("manifest job finished")
    }

    #[tokio::test]
    async fn manifest_is_built_once_the_depsolve_finishes() {
        let dir = TempDir::new().unwrap();
        let queue: Arc<dyn JobQueue> = Arc::new(FsJobQueue::open(dir.path()).unwrap());
        let deps = test_deps(queue.clone());

        let depsolve = queue
            .enqueue(DEPSOLVE_JOB_TYPE, json!({}), &[])
            .await
            .unwrap();
        let manifest = queue
            .enqueue(MANIFEST_JOB_TYPE, json!({}), &[depsolve])
            .await
            .unwrap();

        spawn_manifest_task(deps, manifest, manifest_request());

        // The task is polling; finish the depsolve underneath it.
        let job = queue.dequeue_by_id(depsolve).await.unwrap();
        let result = DepsolveJobResult::solved(test_package_specs());
        queue
            .finish_job(job.token, serde_json::to_value(&result).unwrap())
            .await
            .unwrap();

        let result = wait_for_result(&queue, manifest).await;
        let result: ManifestJobResult = serde_json::from_value(result).unwrap();
        assert!(result.success);
        assert_eq!(result.manifest.unwrap()["packages"], 2);
    }

    #[tokio::test]
    async fn failed_depsolve_is_categorized() {
        let dir = TempDir::new().unwrap();
        let queue: Arc<dyn JobQueue> = Arc::new(FsJobQueue::open(dir.path()).unwrap());
        let deps = test_deps(queue.clone());

        let depsolve = queue
            .enqueue(DEPSOLVE_JOB_TYPE, json!({}), &[])
            .await
            .unwrap();
        let manifest = queue
            .enqueue(MANIFEST_JOB_TYPE, json!({}), &[depsolve])
            .await
            .unwrap();

        spawn_manifest_task(deps, manifest, manifest_request());

        let job = queue.dequeue_by_id(depsolve).await.unwrap();
        let result =
            DepsolveJobResult::failed(DepsolveErrorKind::BadPackageSet, "no package named vmi");
        queue
            .finish_job(job.token, serde_json::to_value(&result).unwrap())
            .await
            .unwrap();

        let result = wait_for_result(&queue, manifest).await;
        let result: ManifestJobResult = serde_json::from_value(result).unwrap();
        assert!(!result.success);
        assert!(result.error.unwrap().starts_with("bad package set"));
    }

    #[tokio::test]
    async fn malformed_depsolve_result_fails_the_manifest() {
        let dir = TempDir::new().unwrap();
        let queue: Arc<dyn JobQueue> = Arc::new(FsJobQueue::open(dir.path()).unwrap());
        let deps = test_deps(queue.clone());

        let depsolve = queue
            .enqueue(DEPSOLVE_JOB_TYPE, json!({}), &[])
            .await
            .unwrap();
        let manifest = queue
            .enqueue(MANIFEST_JOB_TYPE, json!({}), &[depsolve])
            .await
            .unwrap();

        spawn_manifest_task(deps, manifest, manifest_request());

        let job = queue.dequeue_by_id(depsolve).await.unwrap();
        queue
            .finish_job(job.token, json!({"success": "not-a-bool"}))
            .await
            .unwrap();

        let result = wait_for_result(&queue, manifest).await;
        let result: ManifestJobResult = serde_json::from_value(result).unwrap();
        assert!(!result.success);
        assert!(result.error.unwrap().contains("malformed depsolve result"));
    }
}
