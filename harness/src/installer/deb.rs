//! Debian package installer

use std::path::PathBuf;

use async_trait::async_trait;
use tracing::trace;

use crate::deploy::{InstallerMetadata, OperatorManifest};
use crate::errors::HarnessError;
use crate::installer::base::{journal, systemctl, AgentPackage};
use crate::installer::{Installer, InstallerContext, AGENT_SERVICE};
use crate::shell::args;
use crate::utils::architecture;

pub struct DebPackage {
    base: AgentPackage,
}

impl DebPackage {
    pub fn new(ctx: InstallerContext) -> Self {
        let metadata = InstallerMetadata {
            agent_path: "/var/lib/elastic-agent".to_string(),
            arch: architecture().to_string(),
            docker: false,
            file_extension: "deb".to_string(),
            os: "linux".to_string(),
            package_type: "deb".to_string(),
            x_pack: true,
        };
        Self {
            base: AgentPackage::new(ctx, metadata),
        }
    }

    /// Fetch `artifact`, copy it to `/` and install it with apt
    async fn install_artifact(&self, artifact: &str, version: &str) -> Result<(), HarnessError> {
        let fetched = self.base.fetch(artifact, version).await?;
        self.base.add_files(&[fetched.path.clone()]).await?;
        let package = format!("/{}", fetched.name);
        self.base
            .exec(&args(["apt", "install", package.as_str(), "-y"]))
            .await?;
        Ok(())
    }
}

#[async_trait]
impl Installer for DebPackage {
    async fn add_files(&self, files: &[PathBuf]) -> Result<(), HarnessError> {
        self.base.add_files(files).await
    }

    async fn enroll(&self, token: &str, extra_flags: &str) -> Result<(), HarnessError> {
        self.base
            .enroll_with(AGENT_SERVICE, "enroll", token, extra_flags)
            .await
    }

    async fn exec(&self, cmd: &[String]) -> Result<String, HarnessError> {
        self.base.exec(cmd).await
    }

    fn inspect(&self) -> OperatorManifest {
        OperatorManifest {
            commit_file: "/etc/elastic-agent/.elastic-agent.active.commit".to_string(),
            work_dir: self.base.metadata.agent_path.clone(),
        }
    }

    async fn install(&self) -> Result<(), HarnessError> {
        trace!("No additional install commands for DEB");
        Ok(())
    }

    async fn install_certs(&self) -> Result<(), HarnessError> {
        self.base
            .exec_all(&[
                args(["apt-get", "update"]),
                args(["apt", "install", "ca-certificates", "-y"]),
                args(["update-ca-certificates", "-f"]),
            ])
            .await
    }

    async fn logs(&self) -> Result<String, HarnessError> {
        self.base.exec(&journal(AGENT_SERVICE)).await
    }

    async fn postinstall(&self) -> Result<(), HarnessError> {
        for beat in self.base.background_beats() {
            self.base.exec(&systemctl("enable", &beat)).await?;
        }
        self.base.exec(&systemctl("enable", AGENT_SERVICE)).await?;
        self.base.systemctl_all("restart").await
    }

    async fn preinstall(&self) -> Result<(), HarnessError> {
        self.base.create_agent_directories().await?;

        for beat in self.base.background_beats() {
            self.install_artifact(&beat, &self.base.ctx.beat_version).await?;
        }
        self.install_artifact(AGENT_SERVICE, &self.base.ctx.version()).await
    }

    async fn restart(&self) -> Result<(), HarnessError> {
        self.base.systemctl_all("restart").await
    }

    async fn start(&self) -> Result<(), HarnessError> {
        self.base.systemctl_all("start").await
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
