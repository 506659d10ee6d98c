//! HTTP run-cleanup collaborator
//!
//! Wraps the cascade-client cleanup call used by retention pruning. The
//! client already treats 404 as success, since concurrent deletions of the
//! same run are expected.

use async_trait::async_trait;
use cascade_client::OrchestratorClient;
use uuid::Uuid;

use super::RunCleanup;

pub struct HttpRunCleanup {
    client: OrchestratorClient,
}

impl HttpRunCleanup {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: OrchestratorClient::new(base_url),
        }
    }
}

#[async_trait]
impl RunCleanup for HttpRunCleanup {
    async fn delete_job_run(&self, job_uuid: Uuid, run_uuid: Uuid) -> anyhow::Result<()> {
        self.client
            .cleanup_job_pipeline_run(job_uuid, run_uuid)
            .await?;
        Ok(())
    }
}
