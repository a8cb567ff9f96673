//! Dependency container for the compose service (traits for testability).
//!
//! There is no process-wide singleton: the queue, the supported-target
//! registry and the external build collaborators are threaded explicitly
//! through [`ComposerDeps`]. Dependency resolution, manifest generation and
//! image building are external systems behind trait seams; this service
//! only orchestrates them.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use crate::domains::composes::jobs::{
    DepsolveJobArgs, KojiFinalizeJobArgs, KojiInitJobArgs, ManifestRequest, OsbuildJobArgs,
    OsbuildJobResult, PackageSpec,
};
use crate::kernel::distros::DistroRegistry;
use crate::kernel::queue::JobQueue;

/// Resolves the package closure for a repository set.
#[async_trait]
pub trait PackageDepsolver: Send + Sync {
    async fn depsolve(&self, request: &DepsolveJobArgs) -> Result<Vec<PackageSpec>>;
}

/// Produces an osbuild manifest from a resolved package set.
#[async_trait]
pub trait ManifestSource: Send + Sync {
    async fn manifest(&self, request: &ManifestRequest) -> Result<serde_json::Value>;
}

/// Executes a manifest and pushes the produced image to its target.
#[async_trait]
pub trait ImageBuilder: Send + Sync {
    async fn build(
        &self,
        args: &OsbuildJobArgs,
        manifest: &serde_json::Value,
    ) -> Result<OsbuildJobResult>;
}

/// A freshly initialized build in the external build system.
#[derive(Debug, Clone)]
pub struct KojiBuild {
    pub build_id: u64,
    pub token: String,
}

/// External build-system coordination for koji-shape composes.
#[async_trait]
pub trait KojiBuildSystem: Send + Sync {
    async fn init_build(&self, args: &KojiInitJobArgs) -> Result<KojiBuild>;

    /// Import the finished image builds into the build started by
    /// `init_build`.
    async fn finalize_build(&self, args: &KojiFinalizeJobArgs, build_id: u64) -> Result<()>;
}

/// Everything the compose front-end and the workers need.
#[derive(Clone)]
pub struct ComposerDeps {
    pub queue: Arc<dyn JobQueue>,
    pub distros: DistroRegistry,
    pub depsolver: Arc<dyn PackageDepsolver>,
    pub manifests: Arc<dyn ManifestSource>,
    pub image_builder: Arc<dyn ImageBuilder>,
    pub koji: Arc<dyn KojiBuildSystem>,
}
