//! Scheduler poll loop
//!
//! Periodically picks up jobs whose scheduled time has come, advances their
//! schedule and launches them through the job lifecycle. Each due job is its
//! own two-phase unit, so one failing launch does not stop the loop.

use std::time::Duration;

use cascade_core::schedule;
use chrono::{DateTime, Utc};
use tokio::time;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::context::AppContext;
use crate::repository::job_repository;
use crate::service::{EngineError, job_service};
use crate::twophase::TwoPhaseExecutor;

pub struct JobScheduler {
    ctx: AppContext,
    poll_interval: Duration,
}

impl JobScheduler {
    pub fn new(ctx: AppContext, poll_interval: Duration) -> Self {
        Self { ctx, poll_interval }
    }

    /// Starts the polling loop
    pub async fn run(&self) {
        info!(
            "Starting job scheduler (interval: {:?})",
            self.poll_interval
        );

        let mut interval = time::interval(self.poll_interval);

        loop {
            interval.tick().await;

            debug!("Polling for due jobs");

            match self.poll_once().await {
                Ok(launched) => {
                    if launched > 0 {
                        info!("Launched {} job(s) this cycle", launched);
                    }
                }
                Err(err) => {
                    error!("Error during poll cycle: {:?}", err);
                }
            }
        }
    }

    /// Performs a single poll cycle
    async fn poll_once(&self) -> Result<usize, EngineError> {
        let now = Utc::now();
        let due = job_repository::due(&self.ctx.db, now).await?;

        let mut launched = 0;
        for job_uuid in due {
            match self.launch_due_job(job_uuid, now).await {
                Ok(true) => launched += 1,
                Ok(false) => {}
                Err(err) => error!("Failed to launch job {}: {:?}", job_uuid, err),
            }
        }

        Ok(launched)
    }

    /// Advance a due job's schedule and launch it, in one transaction.
    async fn launch_due_job(
        &self,
        job_uuid: Uuid,
        now: DateTime<Utc>,
    ) -> Result<bool, EngineError> {
        let mut tpe = TwoPhaseExecutor::begin(&self.ctx.db).await?;

        let Some(mut job) = job_repository::find_by_id_for_update(tpe.conn(), job_uuid).await?
        else {
            return Ok(false);
        };

        // The job might have been aborted, paused or already picked up by a
        // concurrent tick between the poll query and taking the row lock.
        let Some(next) = job.next_scheduled_time else {
            return Ok(false);
        };
        if next > now {
            return Ok(false);
        }

        job.last_scheduled_time = Some(next);
        job.next_scheduled_time = match &job.schedule {
            Some(expr) => Some(
                schedule::next_occurrence(expr, now)
                    .map_err(|e| EngineError::validation(e.to_string()))?,
            ),
            // A one-off job is not picked up again once launched.
            None => None,
        };
        job_repository::update(tpe.conn(), &job).await?;

        job_service::run_job(&mut tpe, job_uuid).await?;
        tpe.commit(&self.ctx).await?;

        Ok(true)
    }
}
