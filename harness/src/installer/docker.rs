//! Container image installer

use std::path::PathBuf;

use async_trait::async_trait;
use tracing::info;

use crate::deploy::docker_client::DockerClient;
use crate::deploy::{InstallerMetadata, OperatorManifest};
use crate::downloads::versions::snapshot_version;
use crate::errors::HarnessError;
use crate::installer::base::{systemctl, AgentPackage};
use crate::installer::{Installer, InstallerContext, AGENT_SERVICE};
use crate::utils::architecture;

/// Profile key selecting an image variant such as `-ubi8`
pub const IMAGE_SUFFIX_KEY: &str = "elasticAgentDockerImageSuffix";

/// Image a loaded tarball is known by, and the tags test containers expect
pub fn image_tags(artifact: &str, beat_version: &str, agent_version: &str, arch: &str) -> (String, Vec<String>) {
    let source = format!("docker.elastic.co/beats/{}:{}", artifact, snapshot_version(beat_version));
    let targets = vec![
        format!(
            "docker.elastic.co/observability-ci/{}:{}-{}",
            artifact,
            snapshot_version(agent_version),
            arch
        ),
        format!("docker.elastic.co/observability-ci/{}:{}-{}", artifact, agent_version, arch),
    ];
    (source, targets)
}

pub struct DockerPackage {
    base: AgentPackage,
}

impl DockerPackage {
    pub fn new(ctx: InstallerContext) -> Self {
        let metadata = InstallerMetadata {
            agent_path: "/usr/share/elastic-agent".to_string(),
            arch: architecture().to_string(),
            docker: true,
            file_extension: "tar.gz".to_string(),
            os: "linux".to_string(),
            package_type: "docker".to_string(),
            x_pack: true,
        };
        Self {
            base: AgentPackage::new(ctx, metadata),
        }
    }

    /// `elastic-agent` plus the configured image suffix
    pub fn artifact(&self) -> String {
        let suffix = self
            .base
            .ctx
            .profile_env
            .get(IMAGE_SUFFIX_KEY)
            .map(String::as_str)
            .unwrap_or_default();
        format!("{}{}", AGENT_SERVICE, suffix)
    }
}

#[async_trait]
impl Installer for DockerPackage {
    async fn add_files(&self, files: &[PathBuf]) -> Result<(), HarnessError> {
        self.base.add_files(files).await
    }

    async fn enroll(&self, _token: &str, _extra_flags: &str) -> Result<(), HarnessError> {
        Ok(())
    }

    async fn exec(&self, cmd: &[String]) -> Result<String, HarnessError> {
        self.base.exec(cmd).await
    }

    fn inspect(&self) -> OperatorManifest {
        OperatorManifest {
            commit_file: "/usr/share/elastic-agent/.elastic-agent.active.commit".to_string(),
            work_dir: self.base.metadata.agent_path.clone(),
        }
    }

    async fn install(&self) -> Result<(), HarnessError> {
        Ok(())
    }

    async fn install_certs(&self) -> Result<(), HarnessError> {
        Ok(())
    }

    async fn logs(&self) -> Result<String, HarnessError> {
        self.base.deployment_logs().await
    }

    async fn postinstall(&self) -> Result<(), HarnessError> {
        Ok(())
    }

    /// Load the image tarball and tag it for the current branch
    async fn preinstall(&self) -> Result<(), HarnessError> {
        let artifact = self.artifact();
        let version = self.base.ctx.version();
        let fetched = self.base.fetch(&artifact, &version).await?;

        let client = DockerClient::connect(self.base.ctx.timeout_factor)?;
        client.load(&fetched.path).await?;

        let (source, targets) = image_tags(
            &artifact,
            &self.base.ctx.beat_version,
            &version,
            &self.base.metadata.arch,
        );
        for target in &targets {
            client.tag(&source, target).await?;
        }
        info!("Image {} loaded and tagged as {:?}", source, targets);
        Ok(())
    }

    async fn restart(&self) -> Result<(), HarnessError> {
        self.base.exec(&systemctl("restart", AGENT_SERVICE)).await?;
        Ok(())
    }

    async fn start(&self) -> Result<(), HarnessError> {
        self.base.exec(&systemctl("start", AGENT_SERVICE)).await?;
        Ok(())
    }

    async fn stop(&self) -> Result<(), HarnessError> {
        self.base.exec(&systemctl("stop", AGENT_SERVICE)).await?;
        Ok(())
    }

    async fn uninstall(&self) -> Result<(), HarnessError> {
        self.base.uninstall_with(AGENT_SERVICE).await
    }

    async fn upgrade(&self, version: &str) -> Result<(), HarnessError> {
        self.base.upgrade_with(AGENT_SERVICE, version).await
    }

    fn metadata(&self) -> &InstallerMetadata {
        &self.base.metadata
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::deploy::ServiceRequest;
    use crate::installer::testing::{context, RecordingDeployment};

    #[test]
    fn test_image_tags() {
        let (source, targets) = image_tags("elastic-agent", "8.0.0-SNAPSHOT", "8.0.0-abcdef12-SNAPSHOT", "amd64");
        assert_eq!(source, "docker.elastic.co/beats/elastic-agent:8.0.0-SNAPSHOT");
        assert_eq!(
            targets,
            vec![
                "docker.elastic.co/observability-ci/elastic-agent:8.0.0-SNAPSHOT-amd64",
                "docker.elastic.co/observability-ci/elastic-agent:8.0.0-abcdef12-SNAPSHOT-amd64",
            ]
        );
    }

    #[test]
    fn test_artifact_suffix() {
        let deployment = Arc::new(RecordingDeployment::default());
        let mut ctx = context(deployment, ServiceRequest::new("elastic-agent"));
        ctx.profile_env.insert(IMAGE_SUFFIX_KEY.to_string(), "-ubi8".to_string());
        let pkg = DockerPackage::new(ctx);
        assert_eq!(pkg.artifact(), "elastic-agent-ubi8");
        assert!(pkg.metadata().docker);
    }

    #[tokio::test]
    async fn test_enroll_is_noop() {
        let deployment = Arc::new(RecordingDeployment::default());
        let pkg = DockerPackage::new(context(deployment.clone(), ServiceRequest::new("elastic-agent")));
        pkg.enroll("tok", "").await.unwrap();
        assert!(deployment.commands().is_empty());
    }
}
