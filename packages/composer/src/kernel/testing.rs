//! Mock collaborators for tests.
//!
//! The mocks stand in for the external depsolver, manifest builder, image
//! builder and koji client so queue and compose flows can run end to end
//! in-process.

use std::sync::Arc;

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde_json::json;

use crate::domains::composes::jobs::{
    DepsolveJobArgs, KojiFinalizeJobArgs, KojiInitJobArgs, ManifestRequest, OsbuildJobArgs,
    OsbuildJobResult, PackageSpec,
};
use crate::kernel::deps::{
    ComposerDeps, ImageBuilder, KojiBuild, KojiBuildSystem, ManifestSource, PackageDepsolver,
};
use crate::kernel::distros::DistroRegistry;
use crate::kernel::queue::JobQueue;

pub fn test_package_specs() -> Vec<PackageSpec> {
    vec![
        PackageSpec {
            name: "kernel".into(),
            epoch: 0,
            version: "5.14.0".into(),
            release: "70.el9".into(),
            arch: "x86_64".into(),
            sigmd5: "deadbeefdeadbeefdeadbeefdeadbeef".into(),
            signature: Some("RSA/SHA256".into()),
        },
        PackageSpec {
            name: "bash".into(),
            epoch: 0,
            version: "5.1.8".into(),
            release: "4.el9".into(),
            arch: "x86_64".into(),
            sigmd5: "cafebabecafebabecafebabecafebabe".into(),
            signature: None,
        },
    ]
}

/// Depsolver returning a fixed package set, or failing every call.
#[derive(Default)]
pub struct MockDepsolver {
    pub fail_with: Option<String>,
}

#[async_trait]
impl PackageDepsolver for MockDepsolver {
    async fn depsolve(&self, _request: &DepsolveJobArgs) -> Result<Vec<PackageSpec>> {
        match &self.fail_with {
            Some(message) => bail!("{}", message),
            None => Ok(test_package_specs()),
        }
    }
}

/// Manifest builder returning a minimal fixed manifest.
#[derive(Default)]
pub struct MockManifestSource {
    pub fail_with: Option<String>,
}

#[async_trait]
impl ManifestSource for MockManifestSource {
    async fn manifest(&self, request: &ManifestRequest) -> Result<serde_json::Value> {
        match &self.fail_with {
            Some(message) => bail!("{}", message),
            None => Ok(json!({
                "version": "2",
                "pipelines": [{"name": "build"}, {"name": "os"}],
                "packages": request.package_specs.len(),
            })),
        }
    }
}

#[derive(Default)]
pub struct MockImageBuilder;

#[async_trait]
impl ImageBuilder for MockImageBuilder {
    async fn build(
        &self,
        args: &OsbuildJobArgs,
        _manifest: &serde_json::Value,
    ) -> Result<OsbuildJobResult> {
        Ok(OsbuildJobResult {
            success: true,
            error: None,
            osbuild_output: Some(json!({"log": "build ok"})),
            ostree_commit: None,
            upload_status: args.target.as_ref().map(|_| {
                crate::domains::composes::jobs::UploadStatus {
                    status: "success".into(),
                    url: Some("https://images.example.com/image".into()),
                }
            }),
        })
    }
}

#[derive(Default)]
pub struct MockKojiBuildSystem;

#[async_trait]
impl KojiBuildSystem for MockKojiBuildSystem {
    async fn init_build(&self, _args: &KojiInitJobArgs) -> Result<KojiBuild> {
        Ok(KojiBuild {
            build_id: 42,
            token: "koji-build-token".into(),
        })
    }

    async fn finalize_build(&self, _args: &KojiFinalizeJobArgs, _build_id: u64) -> Result<()> {
        Ok(())
    }
}

/// A full dependency container over the given queue, with mock
/// collaborators and the default supported-target registry.
pub fn test_deps(queue: Arc<dyn JobQueue>) -> Arc<ComposerDeps> {
    Arc::new(ComposerDeps {
        queue,
        distros: DistroRegistry::with_defaults(),
        depsolver: Arc::new(MockDepsolver::default()),
        manifests: Arc::new(MockManifestSource::default()),
        image_builder: Arc::new(MockImageBuilder),
        koji: Arc::new(MockKojiBuildSystem),
    })
}
