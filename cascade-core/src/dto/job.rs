//! Job DTOs for inter-service communication

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use crate::domain::pipeline::PipelineDefinition;
use crate::params::RunParameters;

/// Request to draft a new job.
///
/// The uuid is chosen by the creator so that callers can correlate follow-up
/// requests before the draft is visible.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSpec {
    pub uuid: Uuid,
    pub name: String,
    pub project_uuid: Uuid,
    pub pipeline_uuid: Uuid,
    pub pipeline_name: String,
    pub pipeline_definition: PipelineDefinition,
    pub parameters: Vec<RunParameters>,
    #[serde(default)]
    pub env_variables: Option<HashMap<String, String>>,
    #[serde(default)]
    pub strategy_json: Option<serde_json::Value>,
    /// One-shot start time; mutually exclusive with `cron_schedule`.
    #[serde(default)]
    pub scheduled_start: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(default)]
    pub cron_schedule: Option<String>,
    #[serde(default)]
    pub max_retained_pipeline_runs: Option<i32>,
}

/// Field-by-field conditional job update.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobUpdate {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub cron_schedule: Option<String>,
    #[serde(default)]
    pub parameters: Option<Vec<RunParameters>>,
    #[serde(default)]
    pub env_variables: Option<HashMap<String, String>>,
    #[serde(default)]
    pub next_scheduled_time: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(default)]
    pub strategy_json: Option<serde_json::Value>,
    #[serde(default)]
    pub max_retained_pipeline_runs: Option<i32>,
    /// Finalize a draft: validate referenced images and queue or start the job.
    #[serde(default)]
    pub confirm_draft: bool,
}

/// Poll-loop answer: the job to be scheduled next, if any.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NextScheduledJob {
    pub uuid: Option<Uuid>,
    pub next_scheduled_time: Option<chrono::DateTime<chrono::Utc>>,
}
