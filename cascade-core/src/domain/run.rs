//! Pipeline run domain types

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use crate::params::RunParameters;

/// One DAG execution belonging to a job.
///
/// The run uuid doubles as the task-queue correlation id and is chosen by the
/// creator before the row is persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineRun {
    pub uuid: Uuid,
    pub job_uuid: Uuid,
    pub project_uuid: Uuid,
    pub pipeline_uuid: Uuid,
    pub status: RunStatus,
    pub parameters: RunParameters,
    pub env_variables: HashMap<String, String>,
    /// Which scheduling batch this run belongs to.
    pub job_run_index: i32,
    /// Position within that batch.
    pub job_run_pipeline_run_index: i32,
    /// Global sequence across the job's lifetime, never reused.
    pub pipeline_run_index: i32,
    pub started_time: Option<chrono::DateTime<chrono::Utc>>,
    pub finished_time: Option<chrono::DateTime<chrono::Utc>>,
}

/// One DAG node's execution record, keyed by (run_uuid, step_uuid).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineRunStep {
    pub run_uuid: Uuid,
    pub step_uuid: Uuid,
    pub status: RunStatus,
    pub started_time: Option<chrono::DateTime<chrono::Utc>>,
    pub finished_time: Option<chrono::DateTime<chrono::Utc>>,
}

/// Execution status shared by runs and steps
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RunStatus {
    Pending,
    Started,
    Success,
    Failure,
    Aborted,
}

impl RunStatus {
    /// End states are never left once reached.
    pub fn is_end_state(&self) -> bool {
        matches!(self, Self::Success | Self::Failure | Self::Aborted)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Started => "STARTED",
            Self::Success => "SUCCESS",
            Self::Failure => "FAILURE",
            Self::Aborted => "ABORTED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(Self::Pending),
            "STARTED" => Some(Self::Started),
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
        assert!(RunStatus::Success.is_end_state());
        assert!(RunStatus::Failure.is_end_state());
        assert!(RunStatus::Aborted.is_end_state());
        assert!(!RunStatus::Pending.is_end_state());
        assert!(!RunStatus::Started.is_end_state());
    }

    #[test]
    fn test_status_round_trip() {
        for status in [
            RunStatus::Pending,
            RunStatus::Started,
            RunStatus::Success,
            RunStatus::Failure,
            RunStatus::Aborted,
        ] {
            assert_eq!(RunStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(RunStatus::parse("RUNNING"), None);
    }
}
