//! External collaborators
//!
//! Abstract contracts the engine depends on: the task queue, the
//! container-orchestration backend and the run-cleanup endpoint. Collateral
//! phases talk to these; the transaction phases never do.

pub mod cleanup;
pub mod container;
pub mod nats;

use std::time::Duration;

use async_trait::async_trait;
use cascade_core::dto::run::RunDispatchPayload;
use uuid::Uuid;

/// Task queue used to hand pipeline runs to external workers.
#[async_trait]
pub trait TaskDispatcher: Send + Sync {
    /// Fire-and-forget dispatch; the result handle is intentionally discarded.
    async fn dispatch(&self, task_id: Uuid, payload: &RunDispatchPayload) -> anyhow::Result<()>;

    /// Best-effort revocation of queued tasks, waiting at most `timeout` for
    /// the queue to acknowledge.
    async fn revoke(&self, task_ids: &[Uuid], timeout: Duration) -> anyhow::Result<()>;

    /// Ask the worker executing the task to cooperatively abort. The worker,
    /// not the orchestrator, is responsible for observing the flag and
    /// terminating.
    async fn signal_abort(&self, task_id: Uuid) -> anyhow::Result<()>;
}

/// Run deletion endpoint used by retention pruning.
///
/// Deletion goes through the API rather than the store so that externally
/// owned artifacts (e.g. run working directories) are cleaned up by their
/// owner.
#[async_trait]
pub trait RunCleanup: Send + Sync {
    /// Idempotent: implementations treat "already gone" as success.
    async fn delete_job_run(&self, job_uuid: Uuid, run_uuid: Uuid) -> anyhow::Result<()>;
}
