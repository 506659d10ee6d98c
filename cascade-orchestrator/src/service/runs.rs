//! Pipeline Run Service
//!
//! The single-run abort primitive shared by run-level abort and deletion.
//! Cancellation is cooperative: the store-level ABORTED flag is authoritative,
//! the signal to the external executor is advisory.

use std::time::Duration;

use async_trait::async_trait;
use cascade_core::domain::run::RunStatus;
use uuid::Uuid;

use crate::context::AppContext;
use crate::repository::run_repository;
use crate::service::EngineError;
use crate::twophase::{CollateralEffect, TwoPhaseExecutor};

/// How long the abort path waits for the task queue to acknowledge a
/// revocation before moving on.
pub(crate) const REVOKE_TIMEOUT: Duration = Duration::from_secs(1);

struct AbortRunCollateral {
    run_uuid: Uuid,
}

#[async_trait]
impl CollateralEffect for AbortRunCollateral {
    async fn collateral(&self, ctx: &AppContext) -> Result<(), EngineError> {
        ctx.dispatcher
            .revoke(&[self.run_uuid], REVOKE_TIMEOUT)
            .await
            .map_err(EngineError::collateral)?;

        // It is the responsibility of the worker to terminate by reading
        // its aborted status.
        ctx.dispatcher
            .signal_abort(self.run_uuid)
            .await
            .map_err(EngineError::collateral)?;

        Ok(())
    }
}

/// Abort one pipeline run.
///
/// Returns false when the run does not exist or already reached an end
/// state. Steps that already completed keep their status.
pub async fn abort_pipeline_run(
    tpe: &mut TwoPhaseExecutor,
    run_uuid: Uuid,
) -> Result<bool, EngineError> {
    let updated =
        run_repository::mark_active_runs(tpe.conn(), &[run_uuid], RunStatus::Aborted).await?;
    if updated == 0 {
        return Ok(false);
    }

    run_repository::mark_active_steps(tpe.conn(), &[run_uuid], RunStatus::Aborted).await?;

    tpe.defer(AbortRunCollateral { run_uuid });
    Ok(true)
}
