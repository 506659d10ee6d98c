//! Environment Image Repository
//!
//! Handles the environment image catalog and the per-job image pins. The
//! database holds the truth: if an image row exists, the image is assumed to
//! be present in the registry.

use std::collections::HashMap;

use sqlx::{PgConnection, PgExecutor};
use uuid::Uuid;

/// Row-lock the image rows of the given environments for the duration of the
/// surrounding transaction, serializing concurrent pinning against rebuilds.
pub async fn lock_environment_images(
    conn: &mut PgConnection,
    project_uuid: Uuid,
    environment_uuids: &[Uuid],
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        SELECT environment_uuid FROM environment_images
        WHERE project_uuid = $1 AND environment_uuid = ANY($2)
        FOR UPDATE
        "#,
    )
    .bind(project_uuid)
    .bind(environment_uuids)
    .execute(conn)
    .await?;

    Ok(())
}

/// Map each environment uuid to its latest image tag.
pub async fn latest_tags(
    executor: impl PgExecutor<'_>,
    project_uuid: Uuid,
    environment_uuids: &[Uuid],
) -> Result<HashMap<Uuid, i32>, sqlx::Error> {
    let rows = sqlx::query_as::<_, (Uuid, i32)>(
        r#"
        SELECT environment_uuid, MAX(tag) FROM environment_images
        WHERE project_uuid = $1 AND environment_uuid = ANY($2)
        GROUP BY environment_uuid
        "#,
    )
    .bind(project_uuid)
    .bind(environment_uuids)
    .fetch_all(executor)
    .await?;

    Ok(rows.into_iter().collect())
}

/// Record the image pins of a job: every run of the job will use these exact
/// tags regardless of later rebuilds.
pub async fn insert_job_images_in_use(
    conn: &mut PgConnection,
    job_uuid: Uuid,
    project_uuid: Uuid,
    mappings: &HashMap<Uuid, i32>,
) -> Result<(), sqlx::Error> {
    let (environments, tags): (Vec<Uuid>, Vec<i32>) = mappings.iter().map(|(e, t)| (*e, *t)).unzip();

    sqlx::query(
        r#"
        INSERT INTO job_images_in_use (job_uuid, project_uuid, environment_uuid, environment_image_tag)
        SELECT $1, $2, env, tag FROM unnest($3::uuid[], $4::int[]) AS pin(env, tag)
        "#,
    )
    .bind(job_uuid)
    .bind(project_uuid)
    .bind(&environments)
    .bind(&tags)
    .execute(conn)
    .await?;

    Ok(())
}

/// The image pins recorded for a job.
pub async fn job_image_mappings(
    executor: impl PgExecutor<'_>,
    job_uuid: Uuid,
) -> Result<HashMap<Uuid, i32>, sqlx::Error> {
    let rows = sqlx::query_as::<_, (Uuid, i32)>(
        r#"
        SELECT environment_uuid, environment_image_tag FROM job_images_in_use
        WHERE job_uuid = $1
        "#,
    )
    .bind(job_uuid)
    .fetch_all(executor)
    .await?;

    Ok(rows.into_iter().collect())
}

/// The tag the next build of an environment will carry.
pub async fn next_tag(
    executor: impl PgExecutor<'_>,
    project_uuid: Uuid,
    environment_uuid: Uuid,
) -> Result<i32, sqlx::Error> {
    let row = sqlx::query_as::<_, (i32,)>(
        r#"
        SELECT COALESCE(MAX(tag), 0) + 1 FROM environment_images
        WHERE project_uuid = $1 AND environment_uuid = $2
        "#,
    )
    .bind(project_uuid)
    .bind(environment_uuid)
    .fetch_one(executor)
    .await?;

    Ok(row.0)
}

/// Register a freshly built image under the given tag.
pub async fn insert_image(
    executor: impl PgExecutor<'_>,
    project_uuid: Uuid,
    environment_uuid: Uuid,
    tag: i32,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO environment_images (project_uuid, environment_uuid, tag, marked_for_removal)
        VALUES ($1, $2, $3, FALSE)
        "#,
    )
    .bind(project_uuid)
    .bind(environment_uuid)
    .bind(tag)
    .execute(executor)
    .await?;

    Ok(())
}

/// Mark every superseded image of a project for removal.
pub async fn mark_superseded_for_removal(
    executor: impl PgExecutor<'_>,
    project_uuid: Uuid,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE environment_images ei SET marked_for_removal = TRUE
        WHERE ei.project_uuid = $1
          AND ei.tag < (SELECT MAX(tag) FROM environment_images
                        WHERE project_uuid = ei.project_uuid
                          AND environment_uuid = ei.environment_uuid)
        "#,
    )
    .bind(project_uuid)
    .execute(executor)
    .await?;

    Ok(result.rows_affected())
}

/// Delete stale image rows of a project.
///
/// An image row is stale when a newer tag of the same environment exists and
/// no job that is still in DRAFT, PENDING, STARTED or PAUSED pins it.
pub async fn delete_stale(
    executor: impl PgExecutor<'_>,
    project_uuid: Uuid,
    only_marked_for_removal: bool,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        r#"
        DELETE FROM environment_images ei
        WHERE ei.project_uuid = $1
          AND (NOT $2 OR ei.marked_for_removal)
          AND ei.tag < (SELECT MAX(tag) FROM environment_images
                        WHERE project_uuid = ei.project_uuid
                          AND environment_uuid = ei.environment_uuid)
          AND NOT EXISTS (
              SELECT 1 FROM job_images_in_use pin
              JOIN jobs j ON j.uuid = pin.job_uuid
              WHERE pin.project_uuid = ei.project_uuid
                AND pin.environment_uuid = ei.environment_uuid
                AND pin.environment_image_tag = ei.tag
                AND j.status IN ('DRAFT', 'PENDING', 'STARTED', 'PAUSED')
          )
        "#,
    )
    .bind(project_uuid)
    .bind(only_marked_for_removal)
    .execute(executor)
    .await?;

    Ok(result.rows_affected())
}
