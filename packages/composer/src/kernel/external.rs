//! External-program collaborators.
//!
//! The real depsolver, manifest builder, image builder and koji client are
//! separate programs: each call serializes a JSON request to the program's
//! stdin and parses a JSON response from its stdout. Which program to run
//! comes from [`Config`](crate::config::Config); a collaborator without a
//! configured program rejects every call, which fails the affected job
//! without taking the service down.

use std::path::PathBuf;
use std::process::Stdio;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::domains::composes::jobs::{
    DepsolveJobArgs, KojiFinalizeJobArgs, KojiInitJobArgs, ManifestRequest, OsbuildJobArgs,
    OsbuildJobResult, PackageSpec,
};
use crate::kernel::deps::{ImageBuilder, KojiBuild, KojiBuildSystem, ManifestSource, PackageDepsolver};

/// A JSON-over-stdio helper program.
pub struct ExternalProgram {
    name: &'static str,
    program: Option<PathBuf>,
}

impl ExternalProgram {
    pub fn new(name: &'static str, program: Option<PathBuf>) -> Self {
        Self { name, program }
    }

    async fn call<Req: Serialize, Resp: DeserializeOwned>(&self, request: &Req) -> Result<Resp> {
        let program = match &self.program {
            Some(program) => program,
            None => bail!("no {} command configured", self.name),
        };

        debug!(helper = %self.name, program = %program.display(), "invoking helper");

        let mut child = tokio::process::Command::new(program)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .with_context(|| format!("spawning {} helper", self.name))?;

        let payload = serde_json::to_vec(request)?;
        let mut stdin = child
            .stdin
            .take()
            .with_context(|| format!("{} helper has no stdin", self.name))?;
        stdin.write_all(&payload).await?;
        drop(stdin);

        let output = child
            .wait_with_output()
            .await
            .with_context(|| format!("waiting for {} helper", self.name))?;
        if !output.status.success() {
            bail!("{} helper exited with {}", self.name, output.status);
        }

        serde_json::from_slice(&output.stdout)
            .with_context(|| format!("decoding {} helper response", self.name))
    }
}

pub struct CommandDepsolver(pub ExternalProgram);

#[async_trait]
impl PackageDepsolver for CommandDepsolver {
    async fn depsolve(&self, request: &DepsolveJobArgs) -> Result<Vec<PackageSpec>> {
        self.0.call(request).await
    }
}

pub struct CommandManifestSource(pub ExternalProgram);

#[async_trait]
impl ManifestSource for CommandManifestSource {
    async fn manifest(&self, request: &ManifestRequest) -> Result<serde_json::Value> {
        self.0.call(request).await
    }
}

pub struct CommandImageBuilder(pub ExternalProgram);

#[async_trait]
impl ImageBuilder for CommandImageBuilder {
    async fn build(
        &self,
        args: &OsbuildJobArgs,
        manifest: &serde_json::Value,
    ) -> Result<OsbuildJobResult> {
        self.0
            .call(&json!({"args": args, "manifest": manifest}))
            .await
    }
}

pub struct CommandKojiClient(pub ExternalProgram);

#[derive(serde::Deserialize)]
struct KojiInitResponse {
    build_id: u64,
    token: String,
}

#[async_trait]
impl KojiBuildSystem for CommandKojiClient {
    async fn init_build(&self, args: &KojiInitJobArgs) -> Result<KojiBuild> {
        let response: KojiInitResponse = self.0.call(&json!({"op": "init", "args": args})).await?;
        Ok(KojiBuild {
            build_id: response.build_id,
            token: response.token,
        })
    }

    async fn finalize_build(&self, args: &KojiFinalizeJobArgs, build_id: u64) -> Result<()> {
        let _: serde_json::Value = self
            .0
            .call(&json!({"op": "finalize", "args": args, "build_id": build_id}))
            .await?;
        Ok(())
    }
}
