//! Container-orchestration backend
//!
//! Contract used by the image-build orchestrator: submit a containerized
//! build, watch its phase, stream its log output and tear it down. The
//! default implementation shells out to podman; deployments with a cluster
//! scheduler provide their own implementation.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};

/// Phase of a build workload, mirroring pod lifecycle phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildPhase {
    Pending,
    Running,
    Succeeded,
    Failed,
    Unknown,
}

/// One image build to be executed by the backend.
#[derive(Debug, Clone)]
pub struct BuildWorkflow {
    /// Name with which the workload will be run.
    pub name: String,
    /// Name of the resulting image, can include a repository.
    pub image_name: String,
    pub image_tag: String,
    /// Path on the host where the build context is to be found.
    pub build_context_path: String,
    /// Path to the container file, relative to the context.
    pub dockerfile_path: String,
    /// Cache subdirectory key; use the base image as the key so builds from
    /// the same base share layers.
    pub cache_key: String,
}

#[async_trait]
pub trait ContainerBackend: Send + Sync {
    /// Start the build workload. Returns once the workload is submitted, not
    /// once it completes.
    async fn submit_build(&self, workflow: &BuildWorkflow) -> anyhow::Result<()>;

    /// Current phase of the workload.
    async fn phase(&self, name: &str) -> anyhow::Result<BuildPhase>;

    /// Wait until the workload reaches one of the expected phases, polling
    /// once per second. `max_retries` of `None` polls indefinitely.
    async fn wait_for_phase(
        &self,
        name: &str,
        expected: &[BuildPhase],
        max_retries: Option<u32>,
    ) -> anyhow::Result<BuildPhase>;

    /// Stream of log lines produced by the workload.
    async fn log_stream(&self, name: &str) -> anyhow::Result<BoxStream<'static, String>>;

    /// Remove the workload and whatever resources it holds.
    async fn delete_build(&self, name: &str) -> anyhow::Result<()>;
}

/// Backend shelling out to podman on the local host.
pub struct PodmanBackend {
    builds: Mutex<HashMap<String, Child>>,
}

impl PodmanBackend {
    pub fn new() -> Self {
        Self {
            builds: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for PodmanBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ContainerBackend for PodmanBackend {
    async fn submit_build(&self, workflow: &BuildWorkflow) -> anyhow::Result<()> {
        let image = format!("{}:{}", workflow.image_name, workflow.image_tag);

        let child = Command::new("podman")
            .arg("build")
            .arg("--tag")
            .arg(&image)
            .arg("--file")
            .arg(&workflow.dockerfile_path)
            .arg("--layers")
            .arg(&workflow.build_context_path)
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .context("Failed to spawn 'podman build'. Is podman installed?")?;

        tracing::info!("Submitted build {} for image {}", workflow.name, image);

        let mut builds = self.builds.lock().unwrap();
        builds.insert(workflow.name.clone(), child);
        Ok(())
    }

    async fn phase(&self, name: &str) -> anyhow::Result<BuildPhase> {
        let mut builds = self.builds.lock().unwrap();
        let Some(child) = builds.get_mut(name) else {
            return Ok(BuildPhase::Unknown);
        };

        match child.try_wait()? {
            None => Ok(BuildPhase::Running),
            Some(status) if status.success() => Ok(BuildPhase::Succeeded),
            Some(_) => Ok(BuildPhase::Failed),
        }
    }

    async fn wait_for_phase(
        &self,
        name: &str,
        expected: &[BuildPhase],
        max_retries: Option<u32>,
    ) -> anyhow::Result<BuildPhase> {
        let mut retries = max_retries;
        loop {
            let phase = self.phase(name).await?;
            if expected.contains(&phase) {
                return Ok(phase);
            }

            if let Some(remaining) = retries {
                if remaining == 0 {
                    anyhow::bail!("Build {} never reached an expected phase", name);
                }
                retries = Some(remaining - 1);
            }

            tokio::time::sleep(Duration::from_secs(1)).await;
        }
    }

    async fn log_stream(&self, name: &str) -> anyhow::Result<BoxStream<'static, String>> {
        let stdout = {
            let mut builds = self.builds.lock().unwrap();
            builds
                .get_mut(name)
                .with_context(|| format!("Unknown build {}", name))?
                .stdout
                .take()
                .context("Build log stream already consumed")?
        };

        let lines = BufReader::new(stdout).lines();
        let stream = futures::stream::unfold(lines, |mut lines| async move {
            match lines.next_line().await {
                Ok(Some(line)) => Some((line, lines)),
                _ => None,
            }
        });

        Ok(stream.boxed())
    }

    async fn delete_build(&self, name: &str) -> anyhow::Result<()> {
        let child = {
            let mut builds = self.builds.lock().unwrap();
            builds.remove(name)
        };

        if let Some(mut child) = child {
            if child.try_wait()?.is_none() {
                child.kill().await.ok();
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unknown_build_has_unknown_phase() {
        let backend = PodmanBackend::new();
        assert_eq!(backend.phase("nope").await.unwrap(), BuildPhase::Unknown);
    }

    #[tokio::test]
    async fn test_deleting_unknown_build_is_a_noop() {
        let backend = PodmanBackend::new();
        assert!(backend.delete_build("nope").await.is_ok());
    }
}
