//! NATS-backed task dispatcher
//!
//! Runs are dispatched by publishing JSON payloads to a subject keyed by the
//! task id; workers subscribe to the exec subject and watch the control
//! subjects for revocations and abort signals.

use std::time::Duration;

use async_trait::async_trait;
use cascade_core::dto::run::RunDispatchPayload;
use uuid::Uuid;

use super::TaskDispatcher;

const EXEC_SUBJECT_PREFIX: &str = "runs.exec";
const REVOKE_SUBJECT: &str = "runs.control.revoke";
const ABORT_SUBJECT_PREFIX: &str = "runs.control.abort";

pub struct NatsDispatcher {
    client: async_nats::Client,
}

impl NatsDispatcher {
    pub async fn connect(url: &str) -> Result<Self, async_nats::ConnectError> {
        let client = async_nats::connect(url).await?;
        Ok(Self { client })
    }
}

#[async_trait]
impl TaskDispatcher for NatsDispatcher {
    async fn dispatch(&self, task_id: Uuid, payload: &RunDispatchPayload) -> anyhow::Result<()> {
        let subject = format!("{EXEC_SUBJECT_PREFIX}.{task_id}");
        let bytes = serde_json::to_vec(payload)?;

        self.client.publish(subject, bytes.into()).await?;

        tracing::debug!("Dispatched run {} to the task queue", task_id);
        Ok(())
    }

    async fn revoke(&self, task_ids: &[Uuid], timeout: Duration) -> anyhow::Result<()> {
        for task_id in task_ids {
            self.client
                .publish(REVOKE_SUBJECT, task_id.to_string().into())
                .await?;
        }

        // Bounded wait: revocation is advisory, a slow queue must not stall
        // the abort path.
        match tokio::time::timeout(timeout, self.client.flush()).await {
            Ok(result) => result?,
            Err(_) => {
                tracing::warn!(
                    "Timed out after {:?} waiting for {} revocation(s) to flush",
                    timeout,
                    task_ids.len()
                );
            }
        }

        Ok(())
    }

    async fn signal_abort(&self, task_id: Uuid) -> anyhow::Result<()> {
        let subject = format!("{ABORT_SUBJECT_PREFIX}.{task_id}");
        self.client.publish(subject, "".into()).await?;
        Ok(())
    }
}
