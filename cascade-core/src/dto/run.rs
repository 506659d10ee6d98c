//! Pipeline run DTOs for inter-service communication

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use crate::domain::pipeline::PipelineDefinition;
use crate::domain::run::RunStatus;

/// Status transition reported for a run or step.
///
/// Workers report STARTED with a start timestamp and end states with a finish
/// timestamp; the orchestrator only applies transitions out of non-end states.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusUpdate {
    pub status: RunStatus,
    #[serde(default)]
    pub started_time: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(default)]
    pub finished_time: Option<chrono::DateTime<chrono::Utc>>,
}

impl StatusUpdate {
    pub fn aborted() -> Self {
        Self {
            status: RunStatus::Aborted,
            started_time: None,
            finished_time: None,
        }
    }
}

/// Execution configuration shared by all runs of a launch.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunConfig {
    /// Environment uuid to pinned image reference.
    pub env_image_mappings: HashMap<Uuid, String>,
    pub user_env_variables: HashMap<String, String>,
}

/// Payload dispatched to the task queue for one pipeline run.
///
/// The task id equals the run uuid, assigned before the run row exists.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunDispatchPayload {
    pub job_uuid: Uuid,
    pub project_uuid: Uuid,
    pub pipeline_definition: PipelineDefinition,
    pub run_config: RunConfig,
}
