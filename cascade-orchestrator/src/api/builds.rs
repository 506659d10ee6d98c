//! Image Build API Handlers
//!
//! HTTP endpoint triggering an environment image build. The build runs as a
//! single bounded routine: launch the containerized build, follow its logs
//! to a verdict and register the image on success.

use axum::{Json, extract::State};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::error::{ApiError, ApiResult};
use crate::context::AppContext;
use crate::service::build_service::{self, BuildRequest, BuildVerdict};

#[derive(Debug, Deserialize)]
pub struct EnvironmentBuildRequest {
    pub project_uuid: Uuid,
    pub environment_uuid: Uuid,
    pub base_image: String,
    pub build_context_path: String,
    pub dockerfile_path: String,
}

#[derive(Debug, Serialize)]
pub struct EnvironmentBuildResponse {
    pub status: String,
    pub logs: String,
}

/// POST /environment-builds
/// Build a new image for an environment and register it on success.
pub async fn build_environment_image(
    State(ctx): State<AppContext>,
    Json(request): Json<EnvironmentBuildRequest>,
) -> ApiResult<Json<EnvironmentBuildResponse>> {
    tracing::info!(
        "Building image for environment {} of project {}",
        request.environment_uuid,
        request.project_uuid
    );

    let build = BuildRequest {
        project_uuid: request.project_uuid,
        environment_uuid: request.environment_uuid,
        base_image: request.base_image,
        build_context_path: request.build_context_path,
        dockerfile_path: request.dockerfile_path,
    };

    let (verdict, logs) = build_service::run_environment_build(&ctx, &build)
        .await
        .map_err(|e| ApiError::InternalError(format!("{e:#}")))?;

    let status = match verdict {
        BuildVerdict::Success => "SUCCESS",
        BuildVerdict::Failure => "FAILURE",
    };

    Ok(Json(EnvironmentBuildResponse {
        status: status.to_string(),
        logs,
    }))
}
