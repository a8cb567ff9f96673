// Kernel - core infrastructure with dependency injection
//
// The kernel holds the job queue, the supported-target registry and the
// external build collaborators, threaded explicitly through ComposerDeps.
//
// IMPORTANT: Kernel is for INFRASTRUCTURE only, not business logic.
// Compose semantics belong in the domains layer.

pub mod deps;
pub mod distros;
pub mod external;
pub mod queue;
pub mod testing;
pub mod watchdog;
pub mod workers;

pub use deps::{ComposerDeps, ImageBuilder, KojiBuild, KojiBuildSystem, ManifestSource, PackageDepsolver};
pub use distros::DistroRegistry;
pub use queue::{DequeuedJob, FsJobQueue, JobInfo, JobQueue, JobState, QueueError};
pub use watchdog::{run_watchdog, WatchdogConfig};
pub use workers::{JobHandlerRegistry, Worker, WorkerConfig};
