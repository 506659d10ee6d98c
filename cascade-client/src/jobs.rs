//! Job-related API endpoints

use crate::OrchestratorClient;
use crate::error::{ClientError, Result};
use cascade_core::domain::job::Job;
use cascade_core::domain::run::{PipelineRun, PipelineRunStep};
use cascade_core::dto::job::NextScheduledJob;
use cascade_core::dto::run::StatusUpdate;
use uuid::Uuid;

impl OrchestratorClient {
    // =============================================================================
    // Job Queries
    // =============================================================================

    /// Get a job by ID
    pub async fn get_job(&self, job_uuid: Uuid) -> Result<Job> {
        let url = format!("{}/jobs/{}", self.base_url, job_uuid);
        let response = self.client.get(&url).send().await?;

        self.handle_response(response).await
    }

    /// Data about the next job to be scheduled, optionally scoped to a project
    pub async fn next_scheduled_job(&self, project_uuid: Option<Uuid>) -> Result<NextScheduledJob> {
        let url = format!("{}/jobs/next_scheduled_job", self.base_url);
        let mut request = self.client.get(&url);
        if let Some(project_uuid) = project_uuid {
            request = request.query(&[("project_uuid", project_uuid.to_string())]);
        }
        let response = request.send().await?;

        self.handle_response(response).await
    }

    /// List the pipeline runs of a job, newest first
    pub async fn list_job_pipeline_runs(&self, job_uuid: Uuid) -> Result<Vec<PipelineRun>> {
        let url = format!("{}/jobs/{}/pipeline_runs", self.base_url, job_uuid);
        let response = self.client.get(&url).send().await?;

        self.handle_response(response).await
    }

    // =============================================================================
    // Status Reporting (worker-facing)
    // =============================================================================

    /// Report the status of a pipeline run
    pub async fn set_pipeline_run_status(
        &self,
        job_uuid: Uuid,
        run_uuid: Uuid,
        update: StatusUpdate,
    ) -> Result<()> {
        let url = format!("{}/jobs/{}/{}", self.base_url, job_uuid, run_uuid);
        let response = self.client.put(&url).json(&update).send().await?;

        self.handle_empty_response(response).await
    }

    /// Fetch a step of a pipeline run
    pub async fn get_pipeline_run_step(
        &self,
        job_uuid: Uuid,
        run_uuid: Uuid,
        step_uuid: Uuid,
    ) -> Result<PipelineRunStep> {
        let url = format!(
            "{}/jobs/{}/{}/{}",
            self.base_url, job_uuid, run_uuid, step_uuid
        );
        let response = self.client.get(&url).send().await?;

        self.handle_response(response).await
    }

    /// Report the status of a step of a pipeline run
    pub async fn set_pipeline_run_step_status(
        &self,
        job_uuid: Uuid,
        run_uuid: Uuid,
        step_uuid: Uuid,
        update: StatusUpdate,
    ) -> Result<()> {
        let url = format!(
            "{}/jobs/{}/{}/{}",
            self.base_url, job_uuid, run_uuid, step_uuid
        );
        let response = self.client.put(&url).json(&update).send().await?;

        self.handle_empty_response(response).await
    }

    // =============================================================================
    // Cleanup (retention pruning)
    // =============================================================================

    /// Delete a pipeline run and its externally owned artifacts.
    ///
    /// Idempotent: a 404 is treated as success, since concurrent deletions of
    /// the same run are expected.
    pub async fn cleanup_job_pipeline_run(&self, job_uuid: Uuid, run_uuid: Uuid) -> Result<()> {
        let url = format!("{}/jobs/cleanup/{}/{}", self.base_url, job_uuid, run_uuid);
        let response = self.client.delete(&url).send().await?;

        match self.handle_empty_response(response).await {
            Err(ClientError::ApiError { status: 404, .. }) => {
                tracing::debug!("Run {} was already deleted", run_uuid);
                Ok(())
            }
            other => other,
        }
    }

    /// Delete a job and all of its related entities.
    pub async fn cleanup_job(&self, job_uuid: Uuid) -> Result<()> {
        let url = format!("{}/jobs/cleanup/{}", self.base_url, job_uuid);
        let response = self.client.delete(&url).send().await?;

        self.handle_empty_response(response).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_cleanup_run_treats_404_as_success() {
        let server = MockServer::start().await;
        let job_uuid = Uuid::new_v4();
        let run_uuid = Uuid::new_v4();

        // Concurrent deletion of the same run is expected.
        Mock::given(method("DELETE"))
            .and(path(format!("/jobs/cleanup/{job_uuid}/{run_uuid}")))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let client = OrchestratorClient::new(server.uri());
        assert!(
            client
                .cleanup_job_pipeline_run(job_uuid, run_uuid)
                .await
                .is_ok()
        );
    }

    #[tokio::test]
    async fn test_cleanup_run_propagates_server_errors() {
        let server = MockServer::start().await;
        let job_uuid = Uuid::new_v4();
        let run_uuid = Uuid::new_v4();

        Mock::given(method("DELETE"))
            .and(path(format!("/jobs/cleanup/{job_uuid}/{run_uuid}")))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let client = OrchestratorClient::new(server.uri());
        let err = client
            .cleanup_job_pipeline_run(job_uuid, run_uuid)
            .await
            .unwrap_err();
        assert!(err.is_server_error());
    }

    #[tokio::test]
    async fn test_set_pipeline_run_status_hits_endpoint() {
        let server = MockServer::start().await;
        let job_uuid = Uuid::new_v4();
        let run_uuid = Uuid::new_v4();

        Mock::given(method("PUT"))
            .and(path(format!("/jobs/{job_uuid}/{run_uuid}")))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let client = OrchestratorClient::new(server.uri());
        let update = StatusUpdate {
            status: cascade_core::domain::run::RunStatus::Success,
            started_time: None,
            finished_time: None,
        };
        assert!(
            client
                .set_pipeline_run_status(job_uuid, run_uuid, update)
                .await
                .is_ok()
        );
    }
}
