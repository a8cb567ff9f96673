//! Compose orchestration service.
//!
//! Accepts declarative requests to build OS disk images (with optional
//! multi-target upload and external build-system coordination) and drives
//! them to completion through a DAG of typed jobs dispatched to workers.
//!
//! The layering follows the repo's kernel/domains/server convention:
//! - [`kernel`] - job queue, worker pool, watchdog, dependency container
//! - [`domains`] - compose semantics: validation, DAG assembly, projections
//! - [`server`] - the HTTP surface
//!
//! Dependency resolution, manifest building, image building and the koji
//! build system are external collaborators behind the trait seams in
//! [`kernel::deps`].

pub mod config;
pub mod domains;
pub mod kernel;
pub mod server;

pub use config::Config;
