//! Job domain types

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use crate::domain::pipeline::PipelineDefinition;
use crate::params::RunParameters;

/// A schedulable unit producing one or more pipeline runs per launch.
///
/// Structure shared between the orchestrator (persists) and the API surface.
/// The pipeline definition is a snapshot taken at creation time and is
/// immutable once the draft is confirmed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub uuid: Uuid,
    pub name: String,
    pub project_uuid: Uuid,
    pub pipeline_uuid: Uuid,
    pub pipeline_name: String,
    pub pipeline_definition: PipelineDefinition,
    /// Cron expression; `None` means the job runs once.
    pub schedule: Option<String>,
    /// One parameter document per pipeline run of a launch.
    pub parameters: Vec<RunParameters>,
    pub env_variables: HashMap<String, String>,
    pub strategy_json: serde_json::Value,
    pub status: JobStatus,
    pub created_time: chrono::DateTime<chrono::Utc>,
    /// Non-null only while the job still needs scheduling.
    pub next_scheduled_time: Option<chrono::DateTime<chrono::Utc>>,
    pub last_scheduled_time: Option<chrono::DateTime<chrono::Utc>>,
    /// Number of times the parameter batch has been launched.
    pub total_scheduled_executions: i32,
    /// Monotonic counter across all runs ever created for this job.
    pub total_scheduled_pipeline_runs: i32,
    /// -1 means no limit on retained runs.
    pub max_retained_pipeline_runs: i32,
}

/// Job lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum JobStatus {
    Draft,
    Pending,
    Started,
    Paused,
    Success,
    Failure,
    Aborted,
}

impl JobStatus {
    /// End states are never left once reached.
    pub fn is_end_state(&self) -> bool {
        matches!(self, Self::Success | Self::Failure | Self::Aborted)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "DRAFT",
            Self::Pending => "PENDING",
            Self::Started => "STARTED",
            Self::Paused => "PAUSED",
            Self::Success => "SUCCESS",
            Self::Failure => "FAILURE",
            Self::Aborted => "ABORTED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "DRAFT" => Some(Self::Draft),
            "PENDING" => Some(Self::Pending),
            "STARTED" => Some(Self::Started),
            "PAUSED" => Some(Self::Paused),
            "SUCCESS" => Some(Self::Success),
            "FAILURE" => Some(Self::Failure),
            "ABORTED" => Some(Self::Aborted),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_end_states() {
        assert!(JobStatus::Success.is_end_state());
        assert!(JobStatus::Failure.is_end_state());
        assert!(JobStatus::Aborted.is_end_state());
        assert!(!JobStatus::Draft.is_end_state());
        assert!(!JobStatus::Pending.is_end_state());
        assert!(!JobStatus::Started.is_end_state());
        assert!(!JobStatus::Paused.is_end_state());
    }

    #[test]
    fn test_status_round_trip() {
        for status in [
            JobStatus::Draft,
            JobStatus::Pending,
            JobStatus::Started,
            JobStatus::Paused,
            JobStatus::Success,
            JobStatus::Failure,
            JobStatus::Aborted,
        ] {
            assert_eq!(JobStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(JobStatus::parse("QUEUED"), None);
    }
}
