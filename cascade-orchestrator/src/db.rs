use sqlx::{PgPool, postgres::PgPoolOptions};
use std::time::Duration;

pub async fn create_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(Duration::from_secs(5))
        .connect(database_url)
        .await
}

pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
    // Create jobs table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS jobs (
            uuid UUID PRIMARY KEY,
            name VARCHAR(255) NOT NULL,
            project_uuid UUID NOT NULL,
            pipeline_uuid UUID NOT NULL,
            pipeline_name VARCHAR(255) NOT NULL,
            pipeline_definition JSONB NOT NULL,
            schedule VARCHAR(100),
            parameters JSONB NOT NULL DEFAULT '[]',
            env_variables JSONB NOT NULL DEFAULT '{}',
            strategy_json JSONB NOT NULL DEFAULT '{}',
            status VARCHAR(50) NOT NULL,
            created_time TIMESTAMPTZ NOT NULL,
            next_scheduled_time TIMESTAMPTZ,
            last_scheduled_time TIMESTAMPTZ,
            total_scheduled_executions INTEGER NOT NULL DEFAULT 0,
            total_scheduled_pipeline_runs INTEGER NOT NULL DEFAULT 0,
            max_retained_pipeline_runs INTEGER NOT NULL DEFAULT -1
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create pipeline runs table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS pipeline_runs (
            uuid UUID PRIMARY KEY,
            job_uuid UUID NOT NULL REFERENCES jobs(uuid) ON DELETE CASCADE,
            project_uuid UUID NOT NULL,
            pipeline_uuid UUID NOT NULL,
            status VARCHAR(50) NOT NULL,
            parameters JSONB NOT NULL DEFAULT '{}',
            env_variables JSONB NOT NULL DEFAULT '{}',
            job_run_index INTEGER NOT NULL,
            job_run_pipeline_run_index INTEGER NOT NULL,
            pipeline_run_index INTEGER NOT NULL,
            started_time TIMESTAMPTZ,
            finished_time TIMESTAMPTZ
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create pipeline run steps table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS pipeline_run_steps (
            run_uuid UUID NOT NULL REFERENCES pipeline_runs(uuid) ON DELETE CASCADE,
            step_uuid UUID NOT NULL,
            status VARCHAR(50) NOT NULL,
            started_time TIMESTAMPTZ,
            finished_time TIMESTAMPTZ,
            PRIMARY KEY (run_uuid, step_uuid)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create environment images table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS environment_images (
            project_uuid UUID NOT NULL,
            environment_uuid UUID NOT NULL,
            tag INTEGER NOT NULL,
            marked_for_removal BOOLEAN NOT NULL DEFAULT FALSE,
            PRIMARY KEY (project_uuid, environment_uuid, tag)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create job image pins table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS job_images_in_use (
            job_uuid UUID NOT NULL REFERENCES jobs(uuid) ON DELETE CASCADE,
            project_uuid UUID NOT NULL,
            environment_uuid UUID NOT NULL,
            environment_image_tag INTEGER NOT NULL,
            PRIMARY KEY (job_uuid, environment_uuid)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create indexes for better query performance
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_jobs_status ON jobs(status)")
        .execute(pool)
        .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_jobs_project_uuid ON jobs(project_uuid)")
        .execute(pool)
        .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_jobs_next_scheduled_time ON jobs(next_scheduled_time)",
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_pipeline_runs_job_uuid ON pipeline_runs(job_uuid)")
        .execute(pool)
        .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_pipeline_runs_job_status ON pipeline_runs(job_uuid, status)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_pipeline_run_steps_run_uuid ON pipeline_run_steps(run_uuid)",
    )
    .execute(pool)
    .await?;

    tracing::info!("Database migrations completed successfully");
    Ok(())
}
