//! Transfer orchestration and the worker pool that drives it.
//!
//! The [`ScanOrchestrator`] runs the download, scan and cleanup stages for
//! one transfer and publishes its single terminal notification. The
//! [`WorkerPool`] admits transfers into a bounded queue and runs them on a
//! fixed number of tasks.

mod orchestrator;
mod queue;
pub(crate) mod retry;

pub use orchestrator::{OrchestratorBuilder, ScanOrchestrator, TransferState};
pub use queue::{PoolStats, SubmitError, WorkerPool};
