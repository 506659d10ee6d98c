//! Service Module
//!
//! Business logic layer for the orchestrator.
//! Services orchestrate between repositories and contain domain logic.

pub mod builds;
pub mod images;
pub mod jobs;
pub mod runs;

// Re-export for convenience
pub use builds as build_service;
pub use jobs as job_service;

/// Engine-wide service error type
///
/// Lifecycle operations compose (abort calls into run-status updates, delete
/// calls into abort), so they share one error type instead of one enum per
/// service.
#[derive(Debug)]
pub enum EngineError {
    /// Referenced entity does not exist.
    NotFound(String),
    /// Request rejected before any state changed.
    Validation(String),
    /// A collateral effect failed after commit; the store has been
    /// compensated but the request overall failed.
    Collateral(String),
    DatabaseError(sqlx::Error),
}

impl From<sqlx::Error> for EngineError {
    fn from(err: sqlx::Error) -> Self {
        EngineError::DatabaseError(err)
    }
}

impl EngineError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn collateral(err: impl std::fmt::Display) -> Self {
        Self::Collateral(format!("{err:#}"))
    }
}
