//! Worker handlers for compose jobs.
//!
//! Each handler deserializes its typed args, reads any upstream results
//! positionally from the job's deps, delegates the actual work to the
//! external collaborator behind the kernel trait, and returns the result
//! blob to record. Manifest jobs have no handler here; they are finished
//! out of band (see [`super::manifest`]).

use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use uuid::Uuid;

use crate::kernel::deps::ComposerDeps;
use crate::kernel::queue::DequeuedJob;
use crate::kernel::workers::JobHandlerRegistry;

use super::jobs::{
    DepsolveErrorKind, DepsolveJobArgs, DepsolveJobResult, KojiFinalizeJobArgs,
    KojiFinalizeJobResult, KojiInitJobArgs, KojiInitJobResult, ManifestJobResult, OsbuildJobArgs,
    OsbuildJobResult, DEPSOLVE_JOB_TYPE, KOJI_FINALIZE_JOB_TYPE, KOJI_INIT_JOB_TYPE,
    OSBUILD_JOB_TYPE,
};

/// Register the compose job handlers on a worker registry.
pub fn register_compose_handlers(registry: &mut JobHandlerRegistry) {
    registry.register(DEPSOLVE_JOB_TYPE, depsolve_handler);
    registry.register(OSBUILD_JOB_TYPE, osbuild_handler);
    registry.register(KOJI_INIT_JOB_TYPE, koji_init_handler);
    registry.register(KOJI_FINALIZE_JOB_TYPE, koji_finalize_handler);
}

async fn depsolve_handler(
    job: DequeuedJob,
    deps: Arc<ComposerDeps>,
) -> Result<serde_json::Value> {
    let args: DepsolveJobArgs =
        serde_json::from_value(job.args).context("decoding depsolve args")?;
    let result = match deps.depsolver.depsolve(&args).await {
        Ok(specs) => DepsolveJobResult::solved(specs),
        Err(e) => DepsolveJobResult::failed(classify_depsolve_error(&e), e.to_string()),
    };
    Ok(serde_json::to_value(result)?)
}

/// An unresolvable package set is a caller problem, not a transient one.
fn classify_depsolve_error(error: &anyhow::Error) -> DepsolveErrorKind {
    let message = error.to_string().to_lowercase();
    if message.contains("no package")
        || message.contains("no match")
        || message.contains("cannot resolve")
        || message.contains("conflicting")
    {
        DepsolveErrorKind::BadPackageSet
    } else {
        DepsolveErrorKind::Generic
    }
}

async fn read_result<T: serde::de::DeserializeOwned>(
    deps: &ComposerDeps,
    id: Uuid,
    what: &str,
) -> Result<T> {
    let status = deps.queue.job_status(id).await?;
    let value = status
        .result
        .ok_or_else(|| anyhow!("{} result missing", what))?;
    serde_json::from_value(value).with_context(|| format!("decoding {} result", what))
}

async fn osbuild_handler(job: DequeuedJob, deps: Arc<ComposerDeps>) -> Result<serde_json::Value> {
    let args: OsbuildJobArgs = serde_json::from_value(job.args).context("decoding osbuild args")?;

    // deps[0] is always the manifest job.
    let manifest_id = *job
        .deps
        .first()
        .ok_or_else(|| anyhow!("osbuild job has no manifest dependency"))?;
    let manifest: ManifestJobResult = read_result(&deps, manifest_id, "manifest").await?;

    let result = if manifest.success {
        let manifest = manifest
            .manifest
            .ok_or_else(|| anyhow!("manifest result has no manifest"))?;
        deps.image_builder.build(&args, &manifest).await?
    } else {
        OsbuildJobResult {
            success: false,
            error: Some(
                manifest
                    .error
                    .unwrap_or_else(|| "manifest generation failed".to_string()),
            ),
            osbuild_output: None,
            ostree_commit: None,
            upload_status: None,
        }
    };
    Ok(serde_json::to_value(result)?)
}

async fn koji_init_handler(
    job: DequeuedJob,
    deps: Arc<ComposerDeps>,
) -> Result<serde_json::Value> {
    let args: KojiInitJobArgs =
        serde_json::from_value(job.args).context("decoding koji-init args")?;
    let result = match deps.koji.init_build(&args).await {
        Ok(build) => KojiInitJobResult {
            success: true,
            build_id: build.build_id,
            token: build.token,
            error: None,
        },
        Err(e) => KojiInitJobResult {
            success: false,
            build_id: 0,
            token: String::new(),
            error: Some(e.to_string()),
        },
    };
    Ok(serde_json::to_value(result)?)
}

async fn koji_finalize_handler(
    job: DequeuedJob,
    deps: Arc<ComposerDeps>,
) -> Result<serde_json::Value> {
    let args: KojiFinalizeJobArgs =
        serde_json::from_value(job.args).context("decoding koji-finalize args")?;

    // deps[0] is the init job, the rest are the image builds.
    let init_id = *job
        .deps
        .first()
        .ok_or_else(|| anyhow!("koji-finalize job has no init dependency"))?;
    let init: KojiInitJobResult = read_result(&deps, init_id, "koji-init").await?;

    let mut failure: Option<String> = None;
    if !init.success {
        failure = Some("build initialization failed".to_string());
    }
    for osbuild_id in &job.deps[1..] {
        let osbuild: OsbuildJobResult = read_result(&deps, *osbuild_id, "osbuild").await?;
        if !osbuild.success {
            failure = Some(format!("image build {} failed", osbuild_id));
            break;
        }
    }

    let result = match failure {
        Some(error) => KojiFinalizeJobResult {
            success: false,
            error: Some(error),
        },
        None => match deps.koji.finalize_build(&args, init.build_id).await {
            Ok(()) => KojiFinalizeJobResult {
                success: true,
                error: None,
            },
            Err(e) => KojiFinalizeJobResult {
                success: false,
                error: Some(e.to_string()),
            },
        },
    };
    Ok(serde_json::to_value(result)?)
}
