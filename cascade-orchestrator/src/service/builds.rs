//! Image Build Service
//!
//! Launches a containerized image build through the container backend,
//! follows its log stream and classifies the output into an error/success
//! verdict. The build script brackets the user-visible section of the logs
//! with flag lines and emits an error flag on a non-zero exit; everything
//! else (tooling noise, storage progress) is filtered out.

use std::io::Write;

use futures::StreamExt;
use uuid::Uuid;

use crate::context::AppContext;
use crate::external::container::{BuildPhase, BuildWorkflow, ContainerBackend};
use crate::repository::image_repository;
use crate::service::images;

/// Line bracketing the user-visible section of the build output. The first
/// occurrence opens the section, the second one means build storage started.
pub const BUILD_LOG_FLAG: &str = "_CASCADE_BUILD_LOG_FLAG_";

/// Line suffix signalling that the build script exited non-zero.
pub const BUILD_ERROR_FLAG: &str = "_CASCADE_BUILD_ERROR_FLAG_";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildVerdict {
    Success,
    Failure,
}

/// Parameters of one environment image build.
#[derive(Debug, Clone)]
pub struct BuildRequest {
    pub project_uuid: Uuid,
    pub environment_uuid: Uuid,
    /// Base image of the build; its name doubles as the layer-cache key.
    pub base_image: String,
    pub build_context_path: String,
    pub dockerfile_path: String,
}

/// Build a new image for an environment and register it on success.
///
/// Returns the verdict and the user-visible log text.
pub async fn run_environment_build(
    ctx: &AppContext,
    request: &BuildRequest,
) -> anyhow::Result<(BuildVerdict, String)> {
    let tag =
        image_repository::next_tag(&ctx.db, request.project_uuid, request.environment_uuid).await?;

    let workflow = BuildWorkflow {
        name: format!("image-build-task-{}", Uuid::new_v4()),
        image_name: images::image_name(request.project_uuid, request.environment_uuid),
        image_tag: tag.to_string(),
        build_context_path: request.build_context_path.clone(),
        dockerfile_path: request.dockerfile_path.clone(),
        cache_key: request
            .base_image
            .split(':')
            .next()
            .unwrap_or(&request.base_image)
            .to_string(),
    };

    let mut user_logs = Vec::new();
    let mut complete_logs = Vec::new();

    let result = build_image(
        ctx.builder.as_ref(),
        &workflow,
        &mut user_logs,
        &mut complete_logs,
    )
    .await;

    // The backend workload needs to be torn down no matter the outcome.
    if let Err(err) = ctx.builder.delete_build(&workflow.name).await {
        tracing::warn!("Failed to clean up build {}: {:#}", workflow.name, err);
    }

    let verdict = result?;
    if verdict == BuildVerdict::Success {
        image_repository::insert_image(
            &ctx.db,
            request.project_uuid,
            request.environment_uuid,
            tag,
        )
        .await?;
        tracing::info!(
            "Registered image tag {} for environment {}",
            tag,
            request.environment_uuid
        );

        // The new tag supersedes older ones; images no longer pinned by an
        // active job can go.
        image_repository::mark_superseded_for_removal(&ctx.db, request.project_uuid).await?;
        images::process_stale_images(&ctx.db, request.project_uuid, true).await?;
    }

    Ok((verdict, String::from_utf8_lossy(&user_logs).into_owned()))
}

/// Launch a build workload and follow it to a verdict.
///
/// User-visible lines go to `user_logs`; `complete_logs` receives the raw,
/// unfiltered stream.
pub async fn build_image(
    backend: &dyn ContainerBackend,
    workflow: &BuildWorkflow,
    user_logs: &mut (dyn Write + Send),
    complete_logs: &mut (dyn Write + Send),
) -> anyhow::Result<BuildVerdict> {
    writeln!(user_logs, "Starting worker...")?;

    backend.submit_build(workflow).await?;
    backend
        .wait_for_phase(
            &workflow.name,
            &[
                BuildPhase::Running,
                BuildPhase::Succeeded,
                BuildPhase::Failed,
                BuildPhase::Unknown,
            ],
            Some(100),
        )
        .await?;

    writeln!(user_logs, "Building image...")?;

    let mut stream = backend.log_stream(&workflow.name).await?;
    let mut classifier = BuildLogClassifier::new();
    let mut found_error_flag = false;

    while let Some(line) = stream.next().await {
        writeln!(complete_logs, "{line}")?;

        match classifier.classify(&line) {
            LogAction::Emit(text) => writeln!(user_logs, "{text}")?,
            LogAction::CachedLayer => writeln!(user_logs, "Found cached layer.")?,
            LogAction::Skip => {}
            LogAction::UserSectionDone => break,
            LogAction::BuildFailed => {
                found_error_flag = true;
                break;
            }
        }
    }

    // The loop exits for 3 reasons: the user section ended, the error flag
    // showed up, or the workload stopped producing output.

    let phase = backend.phase(&workflow.name).await?;

    if found_error_flag || phase == BuildPhase::Failed {
        let msg = "There was a problem building the image. The building script had a \
                   non 0 exit code, build failed.";
        writeln!(user_logs, "{msg}")?;
        writeln!(complete_logs, "{msg}")?;
        return Ok(BuildVerdict::Failure);
    }

    writeln!(user_logs, "Storing image...")?;
    backend
        .wait_for_phase(
            &workflow.name,
            &[
                BuildPhase::Succeeded,
                BuildPhase::Failed,
                BuildPhase::Unknown,
            ],
            None,
        )
        .await?;
    writeln!(user_logs, "Done!")?;

    Ok(BuildVerdict::Success)
}

// =============================================================================
// Log Classification
// =============================================================================

#[derive(Debug, PartialEq, Eq)]
enum LogAction {
    /// Part of the user-visible section, runtime prefix stripped.
    Emit(String),
    /// A layer was served from cache.
    CachedLayer,
    /// Tooling noise outside the user-visible section.
    Skip,
    /// Second delimiter flag: build storage started.
    UserSectionDone,
    /// The build script reported a non-zero exit.
    BuildFailed,
}

struct BuildLogClassifier {
    flags_seen: u32,
}

impl BuildLogClassifier {
    fn new() -> Self {
        Self { flags_seen: 0 }
    }

    fn classify(&mut self, line: &str) -> LogAction {
        if line.ends_with(BUILD_ERROR_FLAG) {
            return LogAction::BuildFailed;
        }

        if line.starts_with('#') && line.ends_with("CACHED") {
            return LogAction::CachedLayer;
        }

        if line.ends_with(BUILD_LOG_FLAG) {
            self.flags_seen += 1;
            if self.flags_seen == 2 {
                return LogAction::UserSectionDone;
            }
            // The flag itself is never printed.
            return LogAction::Skip;
        }

        if self.flags_seen == 0 {
            return LogAction::Skip;
        }

        LogAction::Emit(strip_runtime_prefix(line).to_string())
    }
}

/// Strip the "#<step> <seconds> " prefix buildkit adds to command output,
/// e.g. "#8 0.345 hello" becomes "hello". There is no way to turn the
/// prefix off at the source.
fn strip_runtime_prefix(line: &str) -> &str {
    let Some(rest) = line.strip_prefix('#') else {
        return line;
    };
    let rest = rest.trim_start_matches(|c: char| c.is_ascii_digit());
    let Some(rest) = rest.strip_prefix(' ') else {
        return line;
    };
    let rest = rest.trim_start_matches(|c: char| c.is_ascii_digit());
    let Some(rest) = rest.strip_prefix('.') else {
        return line;
    };
    let rest = rest.trim_start_matches(|c: char| c.is_ascii_digit());
    let Some(rest) = rest.strip_prefix(' ') else {
        return line;
    };
    rest
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use futures::stream::BoxStream;

    struct ScriptedBackend {
        lines: Vec<String>,
        final_phase: BuildPhase,
    }

    #[async_trait]
    impl ContainerBackend for ScriptedBackend {
        async fn submit_build(&self, _workflow: &BuildWorkflow) -> anyhow::Result<()> {
            Ok(())
        }

        async fn phase(&self, _name: &str) -> anyhow::Result<BuildPhase> {
            Ok(self.final_phase)
        }

        async fn wait_for_phase(
            &self,
            _name: &str,
            _expected: &[BuildPhase],
            _max_retries: Option<u32>,
        ) -> anyhow::Result<BuildPhase> {
            Ok(self.final_phase)
        }

        async fn log_stream(&self, _name: &str) -> anyhow::Result<BoxStream<'static, String>> {
            Ok(futures::stream::iter(self.lines.clone()).boxed())
        }

        async fn delete_build(&self, _name: &str) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn workflow() -> BuildWorkflow {
        BuildWorkflow {
            name: "build-test".to_string(),
            image_name: "image".to_string(),
            image_tag: "1".to_string(),
            build_context_path: "/ctx".to_string(),
            dockerfile_path: "Dockerfile".to_string(),
            cache_key: "base".to_string(),
        }
    }

    #[tokio::test]
    async fn test_build_image_success() {
        let backend = ScriptedBackend {
            lines: vec![
                "tooling noise".to_string(),
                BUILD_LOG_FLAG.to_string(),
                "#3 0.12 user output".to_string(),
                BUILD_LOG_FLAG.to_string(),
            ],
            final_phase: BuildPhase::Succeeded,
        };

        let mut user = Vec::new();
        let mut complete = Vec::new();
        let verdict = build_image(&backend, &workflow(), &mut user, &mut complete)
            .await
            .unwrap();

        assert_eq!(verdict, BuildVerdict::Success);
        let user = String::from_utf8(user).unwrap();
        assert!(user.contains("user output"));
        assert!(!user.contains("tooling noise"));
        assert!(user.contains("Done!"));
    }

    #[tokio::test]
    async fn test_build_image_failure_on_error_flag() {
        let backend = ScriptedBackend {
            lines: vec![BUILD_LOG_FLAG.to_string(), BUILD_ERROR_FLAG.to_string()],
            final_phase: BuildPhase::Running,
        };

        let mut user = Vec::new();
        let mut complete = Vec::new();
        let verdict = build_image(&backend, &workflow(), &mut user, &mut complete)
            .await
            .unwrap();

        assert_eq!(verdict, BuildVerdict::Failure);
        let user = String::from_utf8(user).unwrap();
        assert!(user.contains("build failed"));
    }

    #[tokio::test]
    async fn test_build_image_failure_on_failed_workload() {
        let backend = ScriptedBackend {
            lines: vec![BUILD_LOG_FLAG.to_string(), "partial".to_string()],
            final_phase: BuildPhase::Failed,
        };

        let mut user = Vec::new();
        let mut complete = Vec::new();
        let verdict = build_image(&backend, &workflow(), &mut user, &mut complete)
            .await
            .unwrap();

        assert_eq!(verdict, BuildVerdict::Failure);
    }

    fn classify_all(lines: &[&str]) -> (Vec<String>, bool, bool) {
        let mut classifier = BuildLogClassifier::new();
        let mut emitted = Vec::new();
        let mut failed = false;
        let mut done = false;

        for line in lines {
            match classifier.classify(line) {
                LogAction::Emit(text) => emitted.push(text),
                LogAction::CachedLayer => emitted.push("Found cached layer.".to_string()),
                LogAction::Skip => {}
                LogAction::UserSectionDone => {
                    done = true;
                    break;
                }
                LogAction::BuildFailed => {
                    failed = true;
                    break;
                }
            }
        }
        (emitted, failed, done)
    }

    #[test]
    fn test_lines_before_first_flag_are_skipped() {
        let (emitted, failed, done) = classify_all(&[
            "tooling noise",
            BUILD_LOG_FLAG,
            "hello",
            BUILD_LOG_FLAG,
            "storage noise",
        ]);
        assert_eq!(emitted, vec!["hello"]);
        assert!(!failed);
        assert!(done);
    }

    #[test]
    fn test_error_flag_fails_the_build() {
        let (emitted, failed, done) =
            classify_all(&[BUILD_LOG_FLAG, "partial output", BUILD_ERROR_FLAG]);
        assert_eq!(emitted, vec!["partial output"]);
        assert!(failed);
        assert!(!done);
    }

    #[test]
    fn test_cached_layers_are_summarized() {
        let (emitted, _, _) = classify_all(&[BUILD_LOG_FLAG, "#4 CACHED", "real output"]);
        assert_eq!(emitted, vec!["Found cached layer.", "real output"]);
    }

    #[test]
    fn test_runtime_prefix_is_stripped() {
        assert_eq!(strip_runtime_prefix("#8 0.345 hello"), "hello");
        assert_eq!(strip_runtime_prefix("#12 10.5 a b c"), "a b c");
        // Not a runtime prefix: left untouched.
        assert_eq!(strip_runtime_prefix("plain line"), "plain line");
        assert_eq!(strip_runtime_prefix("#8 no-digits"), "#8 no-digits");
    }
}
