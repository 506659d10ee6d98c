//! Job Repository
//!
//! Handles all database operations related to jobs. Mutating sequences that
//! must not interleave with themselves load the job with `FOR UPDATE`, so
//! concurrent launches serialize on the row lock rather than double-launch.

use cascade_core::domain::job::{Job, JobStatus};
use sqlx::{PgConnection, PgExecutor};
use uuid::Uuid;

const JOB_COLUMNS: &str = "uuid, name, project_uuid, pipeline_uuid, pipeline_name, \
     pipeline_definition, schedule, parameters, env_variables, strategy_json, status, \
     created_time, next_scheduled_time, last_scheduled_time, total_scheduled_executions, \
     total_scheduled_pipeline_runs, max_retained_pipeline_runs";

/// Insert a freshly drafted job.
pub async fn insert(conn: &mut PgConnection, job: &Job) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO jobs (uuid, name, project_uuid, pipeline_uuid, pipeline_name,
                          pipeline_definition, schedule, parameters, env_variables,
                          strategy_json, status, created_time, next_scheduled_time,
                          last_scheduled_time, total_scheduled_executions,
                          total_scheduled_pipeline_runs, max_retained_pipeline_runs)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
        "#,
    )
    .bind(job.uuid)
    .bind(&job.name)
    .bind(job.project_uuid)
    .bind(job.pipeline_uuid)
    .bind(&job.pipeline_name)
    .bind(serde_json::to_value(&job.pipeline_definition).unwrap())
    .bind(&job.schedule)
    .bind(serde_json::to_value(&job.parameters).unwrap())
    .bind(serde_json::to_value(&job.env_variables).unwrap())
    .bind(&job.strategy_json)
    .bind(job.status.as_str())
    .bind(job.created_time)
    .bind(job.next_scheduled_time)
    .bind(job.last_scheduled_time)
    .bind(job.total_scheduled_executions)
    .bind(job.total_scheduled_pipeline_runs)
    .bind(job.max_retained_pipeline_runs)
    .execute(conn)
    .await?;

    Ok(())
}

/// Find a job by ID
pub async fn find_by_id(
    executor: impl PgExecutor<'_>,
    uuid: Uuid,
) -> Result<Option<Job>, sqlx::Error> {
    let row = sqlx::query_as::<_, JobRow>(&format!(
        "SELECT {JOB_COLUMNS} FROM jobs WHERE uuid = $1"
    ))
    .bind(uuid)
    .fetch_optional(executor)
    .await?;

    Ok(row.map(|r| r.into()))
}

/// Find a job by ID, holding an exclusive row lock until commit.
pub async fn find_by_id_for_update(
    conn: &mut PgConnection,
    uuid: Uuid,
) -> Result<Option<Job>, sqlx::Error> {
    let row = sqlx::query_as::<_, JobRow>(&format!(
        "SELECT {JOB_COLUMNS} FROM jobs WHERE uuid = $1 FOR UPDATE"
    ))
    .bind(uuid)
    .fetch_optional(conn)
    .await?;

    Ok(row.map(|r| r.into()))
}

/// Find a cron job in the given status, holding an exclusive row lock.
///
/// The status and has-a-schedule filters are evaluated atomically with the
/// lock acquisition, so concurrent pause/resume calls cannot race.
pub async fn find_cron_for_update(
    conn: &mut PgConnection,
    uuid: Uuid,
    status: JobStatus,
) -> Result<Option<Job>, sqlx::Error> {
    let row = sqlx::query_as::<_, JobRow>(&format!(
        "SELECT {JOB_COLUMNS} FROM jobs \
         WHERE uuid = $1 AND status = $2 AND schedule IS NOT NULL FOR UPDATE"
    ))
    .bind(uuid)
    .bind(status.as_str())
    .fetch_optional(conn)
    .await?;

    Ok(row.map(|r| r.into()))
}

/// List jobs, newest first, optionally scoped to a project.
pub async fn list(
    executor: impl PgExecutor<'_>,
    project_uuid: Option<Uuid>,
) -> Result<Vec<Job>, sqlx::Error> {
    let rows = sqlx::query_as::<_, JobRow>(&format!(
        "SELECT {JOB_COLUMNS} FROM jobs \
         WHERE ($1::uuid IS NULL OR project_uuid = $1) \
         ORDER BY created_time DESC"
    ))
    .bind(project_uuid)
    .fetch_all(executor)
    .await?;

    Ok(rows.into_iter().map(|r| r.into()).collect())
}

/// The job that will be scheduled next, even if the scheduler is lagging
/// behind and its scheduled time is in the past. Drafts and jobs with no
/// scheduled time are never candidates.
pub async fn next_scheduled(
    executor: impl PgExecutor<'_>,
    project_uuid: Option<Uuid>,
) -> Result<Option<(Uuid, chrono::DateTime<chrono::Utc>)>, sqlx::Error> {
    sqlx::query_as::<_, (Uuid, chrono::DateTime<chrono::Utc>)>(
        r#"
        SELECT uuid, next_scheduled_time FROM jobs
        WHERE status != 'DRAFT'
          AND next_scheduled_time IS NOT NULL
          AND ($1::uuid IS NULL OR project_uuid = $1)
        ORDER BY next_scheduled_time ASC
        LIMIT 1
        "#,
    )
    .bind(project_uuid)
    .fetch_optional(executor)
    .await
}

/// Jobs whose scheduled time has come, soonest first.
pub async fn due(
    executor: impl PgExecutor<'_>,
    now: chrono::DateTime<chrono::Utc>,
) -> Result<Vec<Uuid>, sqlx::Error> {
    let rows = sqlx::query_as::<_, (Uuid,)>(
        r#"
        SELECT uuid FROM jobs
        WHERE status != 'DRAFT'
          AND next_scheduled_time IS NOT NULL
          AND next_scheduled_time <= $1
        ORDER BY next_scheduled_time ASC
        "#,
    )
    .bind(now)
    .fetch_all(executor)
    .await?;

    Ok(rows.into_iter().map(|(uuid,)| uuid).collect())
}

/// Write back every mutable field of a job.
///
/// The pipeline definition is a snapshot and never rewritten.
pub async fn update(conn: &mut PgConnection, job: &Job) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE jobs
        SET name = $2, schedule = $3, parameters = $4, env_variables = $5,
            strategy_json = $6, status = $7, next_scheduled_time = $8,
            last_scheduled_time = $9, total_scheduled_executions = $10,
            total_scheduled_pipeline_runs = $11, max_retained_pipeline_runs = $12
        WHERE uuid = $1
        "#,
    )
    .bind(job.uuid)
    .bind(&job.name)
    .bind(&job.schedule)
    .bind(serde_json::to_value(&job.parameters).unwrap())
    .bind(serde_json::to_value(&job.env_variables).unwrap())
    .bind(&job.strategy_json)
    .bind(job.status.as_str())
    .bind(job.next_scheduled_time)
    .bind(job.last_scheduled_time)
    .bind(job.total_scheduled_executions)
    .bind(job.total_scheduled_pipeline_runs)
    .bind(job.max_retained_pipeline_runs)
    .execute(conn)
    .await?;

    Ok(())
}

/// Set the status unconditionally.
pub async fn set_status(
    executor: impl PgExecutor<'_>,
    uuid: Uuid,
    status: JobStatus,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE jobs SET status = $2 WHERE uuid = $1")
        .bind(uuid)
        .bind(status.as_str())
        .execute(executor)
        .await?;

    Ok(())
}

/// Set the status only if the job has not reached an end state yet.
///
/// Needed because aborted runs that are still executing report reaching an
/// end state, which re-triggers the completion check.
pub async fn set_status_if_ongoing(
    executor: impl PgExecutor<'_>,
    uuid: Uuid,
    status: JobStatus,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE jobs SET status = $2
        WHERE uuid = $1 AND status NOT IN ('SUCCESS', 'FAILURE', 'ABORTED')
        "#,
    )
    .bind(uuid)
    .bind(status.as_str())
    .execute(executor)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Delete a job by ID; deletions cascade to its runs and their steps.
pub async fn delete(executor: impl PgExecutor<'_>, uuid: Uuid) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("DELETE FROM jobs WHERE uuid = $1")
        .bind(uuid)
        .execute(executor)
        .await?;

    Ok(result.rows_affected() > 0)
}

pub async fn exists(executor: impl PgExecutor<'_>, uuid: Uuid) -> Result<bool, sqlx::Error> {
    let row = sqlx::query_as::<_, (bool,)>("SELECT EXISTS(SELECT 1 FROM jobs WHERE uuid = $1)")
        .bind(uuid)
        .fetch_one(executor)
        .await?;

    Ok(row.0)
}

/// (max_retained_pipeline_runs, total_scheduled_pipeline_runs) of a job.
pub async fn retention_info(
    executor: impl PgExecutor<'_>,
    uuid: Uuid,
) -> Result<Option<(i32, i32)>, sqlx::Error> {
    sqlx::query_as::<_, (i32, i32)>(
        "SELECT max_retained_pipeline_runs, total_scheduled_pipeline_runs FROM jobs WHERE uuid = $1",
    )
    .bind(uuid)
    .fetch_optional(executor)
    .await
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct JobRow {
    uuid: Uuid,
    name: String,
    project_uuid: Uuid,
    pipeline_uuid: Uuid,
    pipeline_name: String,
    pipeline_definition: serde_json::Value,
    schedule: Option<String>,
    parameters: serde_json::Value,
    env_variables: serde_json::Value,
    strategy_json: serde_json::Value,
    status: String,
    created_time: chrono::DateTime<chrono::Utc>,
    next_scheduled_time: Option<chrono::DateTime<chrono::Utc>>,
    last_scheduled_time: Option<chrono::DateTime<chrono::Utc>>,
    total_scheduled_executions: i32,
    total_scheduled_pipeline_runs: i32,
    max_retained_pipeline_runs: i32,
}

impl From<JobRow> for Job {
    fn from(row: JobRow) -> Self {
        let status = JobStatus::parse(&row.status).unwrap_or(JobStatus::Draft);

        Job {
            uuid: row.uuid,
            name: row.name,
            project_uuid: row.project_uuid,
            pipeline_uuid: row.pipeline_uuid,
            pipeline_name: row.pipeline_name,
            pipeline_definition: serde_json::from_value(row.pipeline_definition)
                .unwrap_or_default(),
            schedule: row.schedule,
            parameters: serde_json::from_value(row.parameters).unwrap_or_default(),
            env_variables: serde_json::from_value(row.env_variables).unwrap_or_default(),
            strategy_json: row.strategy_json,
            status,
            created_time: row.created_time,
            next_scheduled_time: row.next_scheduled_time,
            last_scheduled_time: row.last_scheduled_time,
            total_scheduled_executions: row.total_scheduled_executions,
            total_scheduled_pipeline_runs: row.total_scheduled_pipeline_runs,
            max_retained_pipeline_runs: row.max_retained_pipeline_runs,
        }
    }
}
