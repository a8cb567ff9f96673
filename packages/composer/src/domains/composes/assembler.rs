//! Compose DAG assembly.
//!
//! Two shapes, both built on the job queue:
//!
//! ```text
//! single image:   depsolve ─► manifest ─► osbuild
//!
//! koji:           init ─┬─► (osbuild₁ ◄─ manifest₁ ◄─ depsolve₁)─┬─► finalize
//!                       └─► (osbuildₙ ◄─ manifestₙ ◄─ depsolveₙ)─┘
//! ```
//!
//! The id of the terminal job (osbuild, or finalize for koji) doubles as
//! the compose id. Manifest jobs are enqueued with empty args and finished
//! out of band by the task spawned in [`super::manifest`].

use std::sync::Arc;

use serde::Serialize;
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use crate::kernel::deps::ComposerDeps;
use crate::kernel::queue::QueueError;
use crate::server::error::{ServiceError, ServiceErrorKind};

use super::jobs::{
    DepsolveJobArgs, KojiFinalizeJobArgs, KojiInitJobArgs, KojiTarget, ManifestRequest,
    OsbuildJobArgs, DEPSOLVE_JOB_TYPE, KOJI_FINALIZE_JOB_TYPE, KOJI_INIT_JOB_TYPE,
    MANIFEST_JOB_TYPE, OSBUILD_JOB_TYPE,
};
use super::manifest::spawn_manifest_task;
use super::request::{Customizations, KojiOptions, ValidatedCompose, ValidatedImageRequest};

fn enqueue_error(err: QueueError) -> ServiceError {
    ServiceError::with_details(ServiceErrorKind::EnqueueingJob, err.to_string())
}

async fn enqueue<T: Serialize>(
    deps: &ComposerDeps,
    job_type: &str,
    args: &T,
    dep_ids: &[Uuid],
) -> Result<Uuid, ServiceError> {
    let args = serde_json::to_value(args)
        .map_err(|_| QueueError::BadArgs)
        .map_err(enqueue_error)?;
    deps.queue
        .enqueue(job_type, args, dep_ids)
        .await
        .map_err(enqueue_error)
}

/// Enqueue the DAG for a validated compose request and return the compose
/// id: the id of the terminal job.
pub async fn start_compose(
    deps: &Arc<ComposerDeps>,
    compose: ValidatedCompose,
) -> Result<Uuid, ServiceError> {
    match compose.koji.clone() {
        Some(koji) => start_koji_compose(deps, compose, koji).await,
        None => start_single_compose(deps, compose).await,
    }
}

async fn start_single_compose(
    deps: &Arc<ComposerDeps>,
    compose: ValidatedCompose,
) -> Result<Uuid, ServiceError> {
    let mut images = compose.images;
    let image = match (images.pop(), images.is_empty()) {
        (Some(image), true) => image,
        _ => return Err(ServiceErrorKind::UnexpectedNumberOfImageBuilds.into()),
    };

    let (depsolve, manifest) = enqueue_image_prefix(
        deps,
        &compose.distribution,
        &image,
        compose.customizations.as_ref(),
    )
    .await?;

    let osbuild_args = OsbuildJobArgs {
        image_name: None,
        target: image.target.clone(),
        koji: None,
    };
    let osbuild = enqueue(deps, OSBUILD_JOB_TYPE, &osbuild_args, &[manifest]).await?;

    info!(
        compose_id = %osbuild,
        distribution = %compose.distribution,
        depsolve_job = %depsolve,
        "compose started"
    );
    Ok(osbuild)
}

async fn start_koji_compose(
    deps: &Arc<ComposerDeps>,
    compose: ValidatedCompose,
    koji: KojiOptions,
) -> Result<Uuid, ServiceError> {
    let init_args = KojiInitJobArgs {
        server: koji.server.clone(),
        name: koji.name.clone(),
        version: koji.version.clone(),
        release: koji.release.clone(),
    };
    let init = enqueue(deps, KOJI_INIT_JOB_TYPE, &init_args, &[]).await?;

    let mut finalize_deps = vec![init];
    for image in &compose.images {
        let (_depsolve, manifest) = enqueue_image_prefix(
            deps,
            &compose.distribution,
            image,
            compose.customizations.as_ref(),
        )
        .await?;

        let osbuild_args = OsbuildJobArgs {
            image_name: Some(format!("{}-{}-{}", koji.name, koji.version, koji.release)),
            target: None,
            koji: Some(KojiTarget {
                server: koji.server.clone(),
                task_id: koji.task_id,
            }),
        };
        let osbuild = enqueue(deps, OSBUILD_JOB_TYPE, &osbuild_args, &[manifest, init]).await?;
        finalize_deps.push(osbuild);
    }

    let finalize_args = KojiFinalizeJobArgs {
        server: koji.server,
        task_id: koji.task_id,
        name: koji.name,
        version: koji.version,
        release: koji.release,
    };
    let finalize = enqueue(deps, KOJI_FINALIZE_JOB_TYPE, &finalize_args, &finalize_deps).await?;

    info!(
        compose_id = %finalize,
        distribution = %compose.distribution,
        images = compose.images.len(),
        "koji compose started"
    );
    Ok(finalize)
}

/// Enqueue the depsolve and manifest jobs for one image and spawn the
/// out-of-band manifest generation task. Returns (depsolve, manifest).
async fn enqueue_image_prefix(
    deps: &Arc<ComposerDeps>,
    distribution: &str,
    image: &ValidatedImageRequest,
    customizations: Option<&Customizations>,
) -> Result<(Uuid, Uuid), ServiceError> {
    let depsolve_args = depsolve_args(distribution, image, customizations);
    let depsolve = enqueue(deps, DEPSOLVE_JOB_TYPE, &depsolve_args, &[]).await?;

    // Completed out of band; the args stay empty.
    let manifest = deps
        .queue
        .enqueue(MANIFEST_JOB_TYPE, json!({}), &[depsolve])
        .await
        .map_err(enqueue_error)?;

    spawn_manifest_task(
        deps.clone(),
        manifest,
        ManifestRequest {
            distribution: distribution.to_string(),
            architecture: image.architecture.clone(),
            image_type: image.image_type,
            repositories: image.repositories.clone(),
            ostree: image.ostree.clone(),
            customizations: customizations.cloned(),
            package_specs: Vec::new(),
        },
    );

    Ok((depsolve, manifest))
}

fn depsolve_args(
    distribution: &str,
    image: &ValidatedImageRequest,
    customizations: Option<&Customizations>,
) -> DepsolveJobArgs {
    let mut repositories = image.repositories.clone();
    let mut packages = Vec::new();
    if let Some(customizations) = customizations {
        packages.extend(customizations.packages.clone().unwrap_or_default());
        repositories.extend(
            customizations
                .payload_repositories
                .clone()
                .unwrap_or_default(),
        );
    }
    DepsolveJobArgs {
        distribution: distribution.to_string(),
        architecture: image.architecture.clone(),
        packages,
        repositories,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tempfile::TempDir;

    use crate::domains::composes::request::{
        ComposeRequest, ImageRequest, ImageType, KojiOptions, Repository,
    };
    use crate::kernel::queue::{FsJobQueue, JobQueue};
    use crate::kernel::testing::test_deps;

    use super::*;

    fn repo() -> Repository {
        Repository {
            rhsm: false,
            baseurl: Some("https://repo.example.com/BaseOS".into()),
            mirrorlist: None,
            metalink: None,
            gpg_key: None,
            check_gpg: None,
            ignore_ssl: None,
        }
    }

    fn image(upload: bool) -> ImageRequest {
        ImageRequest {
            architecture: "x86_64".into(),
            image_type: ImageType::GuestImage,
            repositories: vec![repo()],
            ostree: None,
            upload_options: upload.then(|| json!({"region": "us-east-1"})),
        }
    }

    async fn deps_with_queue(dir: &TempDir) -> Arc<ComposerDeps> {
        let queue: Arc<dyn JobQueue> = Arc::new(FsJobQueue::open(dir.path()).unwrap());
        test_deps(queue)
    }

    #[tokio::test]
    async fn single_image_compose_builds_the_expected_chain() {
        let dir = TempDir::new().unwrap();
        let deps = deps_with_queue(&dir).await;

        let compose = ComposeRequest {
            distribution: "rhel-9".into(),
            image_request: Some(image(true)),
            image_requests: None,
            customizations: None,
            koji: None,
        }
        .validate(&deps.distros)
        .unwrap();

        let compose_id = start_compose(&deps, compose).await.unwrap();

        let osbuild = deps.queue.job(compose_id).await.unwrap();
        assert_eq!(osbuild.job_type, OSBUILD_JOB_TYPE);
        assert_eq!(osbuild.deps.len(), 1);

        let manifest = deps.queue.job(osbuild.deps[0]).await.unwrap();
        assert_eq!(manifest.job_type, MANIFEST_JOB_TYPE);
        assert_eq!(manifest.args, json!({}));
        assert_eq!(manifest.deps.len(), 1);

        let depsolve = deps.queue.job(manifest.deps[0]).await.unwrap();
        assert_eq!(depsolve.job_type, DEPSOLVE_JOB_TYPE);
        assert!(depsolve.deps.is_empty());

        // The osbuild args carry the upload target.
        let args: OsbuildJobArgs = serde_json::from_value(osbuild.args).unwrap();
        assert!(args.target.is_some());
    }

    #[tokio::test]
    async fn koji_compose_builds_the_expected_dag() {
        let dir = TempDir::new().unwrap();
        let deps = deps_with_queue(&dir).await;

        let compose = ComposeRequest {
            distribution: "rhel-8".into(),
            image_request: None,
            image_requests: Some(vec![image(false), image(false)]),
            customizations: None,
            koji: Some(KojiOptions {
                server: "https://koji.example.com".into(),
                task_id: 7,
                name: "rhel-guest".into(),
                version: "8.6".into(),
                release: "1".into(),
            }),
        }
        .validate(&deps.distros)
        .unwrap();

        let compose_id = start_compose(&deps, compose).await.unwrap();

        let finalize = deps.queue.job(compose_id).await.unwrap();
        assert_eq!(finalize.job_type, KOJI_FINALIZE_JOB_TYPE);
        assert_eq!(finalize.deps.len(), 3);

        let init_id = finalize.deps[0];
        let init = deps.queue.job(init_id).await.unwrap();
        assert_eq!(init.job_type, KOJI_INIT_JOB_TYPE);

        for osbuild_id in &finalize.deps[1..] {
            let osbuild = deps.queue.job(*osbuild_id).await.unwrap();
            assert_eq!(osbuild.job_type, OSBUILD_JOB_TYPE);
            assert_eq!(osbuild.deps.len(), 2);
            assert_eq!(osbuild.deps[1], init_id);

            let manifest = deps.queue.job(osbuild.deps[0]).await.unwrap();
            assert_eq!(manifest.job_type, MANIFEST_JOB_TYPE);
            assert_eq!(manifest.deps.len(), 1);

            let depsolve = deps.queue.job(manifest.deps[0]).await.unwrap();
            assert_eq!(depsolve.job_type, DEPSOLVE_JOB_TYPE);

            // No upload targets in a koji compose.
            let args: OsbuildJobArgs = serde_json::from_value(osbuild.args).unwrap();
            assert!(args.target.is_none());
            assert_eq!(args.koji.as_ref().unwrap().task_id, 7);
        }
    }

    #[tokio::test]
    async fn customization_packages_feed_the_depsolve() {
        let dir = TempDir::new().unwrap();
        let deps = deps_with_queue(&dir).await;

        let compose = ComposeRequest {
            distribution: "rhel-9".into(),
            image_request: Some(image(true)),
            image_requests: None,
            customizations: Some(Customizations {
                subscription: None,
                packages: Some(vec!["vim".into(), "tmux".into()]),
                users: None,
                payload_repositories: Some(vec![repo()]),
            }),
            koji: None,
        }
        .validate(&deps.distros)
        .unwrap();

        let compose_id = start_compose(&deps, compose).await.unwrap();
        let osbuild = deps.queue.job(compose_id).await.unwrap();
        let manifest = deps.queue.job(osbuild.deps[0]).await.unwrap();
        let depsolve = deps.queue.job(manifest.deps[0]).await.unwrap();

        let args: DepsolveJobArgs = serde_json::from_value(depsolve.args).unwrap();
        assert_eq!(args.packages, vec!["vim".to_string(), "tmux".to_string()]);
        assert_eq!(args.repositories.len(), 2);
    }
}
