//! Environment Image Service
//!
//! Image pinning for jobs and stale-image reconciliation. The environment
//! images used by a job across its entire lifetime, and thus its runs, are
//! the same: the concrete image backing the environment is pinned at job
//! creation so that a later rebuild does not affect the job.

use std::collections::{HashMap, HashSet};

use sqlx::{PgExecutor, PgPool};
use uuid::Uuid;

use crate::repository::image_repository;
use crate::service::EngineError;

/// Image reference workers pull: name derived from project and environment
/// plus the pinned tag.
pub fn image_reference(project_uuid: Uuid, environment_uuid: Uuid, tag: i32) -> String {
    format!("cascade-env-{project_uuid}-{environment_uuid}:{tag}")
}

/// Image name without the tag, used when submitting builds.
pub fn image_name(project_uuid: Uuid, environment_uuid: Uuid) -> String {
    format!("cascade-env-{project_uuid}-{environment_uuid}")
}

/// Pin the latest image of every given environment for a job.
///
/// Runs in its own transaction: the environment image rows are row-locked so
/// pinning serializes against concurrent rebuilds, then the pins are written
/// in bulk.
pub async fn lock_images_for_job(
    db: &PgPool,
    job_uuid: Uuid,
    project_uuid: Uuid,
    environment_uuids: &HashSet<Uuid>,
) -> Result<(), EngineError> {
    let environment_uuids: Vec<Uuid> = environment_uuids.iter().copied().collect();

    let mut tx = db.begin().await?;
    image_repository::lock_environment_images(&mut tx, project_uuid, &environment_uuids).await?;

    let latest = image_repository::latest_tags(&mut *tx, project_uuid, &environment_uuids).await?;

    let missing: Vec<String> = environment_uuids
        .iter()
        .filter(|uuid| !latest.contains_key(uuid))
        .map(|uuid| uuid.to_string())
        .collect();
    if !missing.is_empty() {
        return Err(EngineError::not_found(format!(
            "Pipeline references environments that do not exist in the project. \
             The following environments do not have a built image: [{}].",
            missing.join(", ")
        )));
    }

    image_repository::insert_job_images_in_use(&mut tx, job_uuid, project_uuid, &latest).await?;
    tx.commit().await?;

    tracing::info!(
        "Pinned {} environment image(s) for job {}",
        latest.len(),
        job_uuid
    );
    Ok(())
}

/// Environments among the given ones with no built image.
pub async fn missing_images(
    executor: impl PgExecutor<'_>,
    project_uuid: Uuid,
    environment_uuids: &HashSet<Uuid>,
) -> Result<Vec<Uuid>, sqlx::Error> {
    let environment_uuids: Vec<Uuid> = environment_uuids.iter().copied().collect();
    let latest = image_repository::latest_tags(executor, project_uuid, &environment_uuids).await?;

    Ok(environment_uuids
        .into_iter()
        .filter(|uuid| !latest.contains_key(uuid))
        .collect())
}

/// Delete image rows that are superseded and no longer pinned by any job
/// that could still launch runs.
pub async fn process_stale_images(
    db: &PgPool,
    project_uuid: Uuid,
    only_marked_for_removal: bool,
) -> Result<u64, sqlx::Error> {
    let deleted =
        image_repository::delete_stale(db, project_uuid, only_marked_for_removal).await?;

    if deleted > 0 {
        tracing::info!(
            "Removed {} stale environment image(s) of project {}",
            deleted,
            project_uuid
        );
    }
    Ok(deleted)
}

/// Resolve a job's image pins to concrete image references.
pub fn resolve_image_mappings(
    project_uuid: Uuid,
    pins: HashMap<Uuid, i32>,
) -> HashMap<Uuid, String> {
    pins.into_iter()
        .map(|(environment_uuid, tag)| {
            (
                environment_uuid,
                image_reference(project_uuid, environment_uuid, tag),
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_reference_format() {
        let project = Uuid::nil();
        let environment = Uuid::nil();
        assert_eq!(
            image_reference(project, environment, 3),
            format!("cascade-env-{project}-{environment}:3")
        );
    }

    #[test]
    fn test_resolve_image_mappings() {
        let project = Uuid::new_v4();
        let environment = Uuid::new_v4();
        let pins = HashMap::from([(environment, 7)]);

        let resolved = resolve_image_mappings(project, pins);
        assert_eq!(
            resolved[&environment],
            image_reference(project, environment, 7)
        );
    }
}
