//! Tarball installer
//!
//! The archive is extracted into the working directory and the versioned
//! folder renamed to the bare artifact name, so the binary lives at
//! `<work>/elastic-agent/elastic-agent` whatever the version.

use std::path::PathBuf;

use async_trait::async_trait;
use tracing::trace;

use crate::deploy::{InstallerMetadata, OperatorManifest};
use crate::downloads::versions::snapshot_version;
use crate::errors::HarnessError;
use crate::installer::base::{artifact_arch, journal, systemctl, AgentPackage};
use crate::installer::{Installer, InstallerContext, AGENT_SERVICE};
use crate::shell::args;

const INSTALLED_BINARY: &str = "/opt/Elastic/Agent/elastic-agent";

pub struct TarPackage {
    base: AgentPackage,
}

impl TarPackage {
    pub fn new(ctx: InstallerContext) -> Self {
        let metadata = InstallerMetadata {
            agent_path: "/opt/Elastic/Agent".to_string(),
            arch: artifact_arch(),
            docker: false,
            file_extension: "tar.gz".to_string(),
            os: "linux".to_string(),
            package_type: "tar".to_string(),
            x_pack: true,
        };
        Self {
            base: AgentPackage::new(ctx, metadata),
        }
    }

    fn working_path(&self, name: &str) -> String {
        self.base.ctx.work_dir.join(name).display().to_string()
    }

    /// Binary extracted by preinstall, used to run the install subcommand
    pub fn extracted_binary(&self) -> String {
        self.base
            .ctx
            .work_dir
            .join(AGENT_SERVICE)
            .join(AGENT_SERVICE)
            .display()
            .to_string()
    }

    async fn stage_artifact(&self, artifact: &str, version: &str) -> Result<(), HarnessError> {
        let fetched = self.base.fetch(artifact, version).await?;

        let work_dir = self.base.ctx.work_dir.display().to_string();
        let archive = fetched.path.display().to_string();
        self.base
            .exec(&args(["tar", "-zxf", archive.as_str(), "-C", work_dir.as_str()]))
            .await?;

        let version = self.base.concrete_version(version).await;
        let extracted = self.working_path(&format!(
            "{}-{}-{}-{}",
            artifact,
            snapshot_version(&version),
            self.base.metadata.os,
            self.base.metadata.arch
        ));
        let target = self.working_path(artifact);

        let _ = self.base.exec(&args(["rm", "-fr", target.as_str()])).await;
        let output = self
            .base
            .exec(&args(["mv", "-f", extracted.as_str(), target.as_str()]))
            .await?;
        trace!("Moved {} to {}: {}", extracted, target, output);
        Ok(())
    }
}

#[async_trait]
impl Installer for TarPackage {
    async fn add_files(&self, files: &[PathBuf]) -> Result<(), HarnessError> {
        self.base.add_files(files).await
    }

    async fn enroll(&self, token: &str, extra_flags: &str) -> Result<(), HarnessError> {
        let binary = self.extracted_binary();
        self.base
            .enroll_with(&binary, "install", token, extra_flags)
            .await
    }

    async fn exec(&self, cmd: &[String]) -> Result<String, HarnessError> {
        self.base.exec(cmd).await
    }

    fn inspect(&self) -> OperatorManifest {
        OperatorManifest {
            commit_file: "elastic-agent/.elastic-agent.active.commit".to_string(),
            work_dir: self.base.metadata.agent_path.clone(),
        }
    }

    async fn install(&self) -> Result<(), HarnessError> {
        trace!("No TAR install instructions");
        Ok(())
    }

    async fn install_certs(&self) -> Result<(), HarnessError> {
        Ok(())
    }

    async fn logs(&self) -> Result<String, HarnessError> {
        self.base.exec(&journal(AGENT_SERVICE)).await
    }

    async fn postinstall(&self) -> Result<(), HarnessError> {
        Ok(())
    }

    async fn preinstall(&self) -> Result<(), HarnessError> {
        self.base.create_agent_directories().await?;

        for beat in self.base.background_beats() {
            self.stage_artifact(&beat, &self.base.ctx.beat_version).await?;
        }
        self.stage_artifact(AGENT_SERVICE, &self.base.ctx.version()).await
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
        self.base.uninstall_with(INSTALLED_BINARY).await
    }

    async fn upgrade(&self, version: &str) -> Result<(), HarnessError> {
        self.base.upgrade_with(AGENT_SERVICE, version).await
    }

    fn metadata(&self) -> &InstallerMetadata {
        &self.base.metadata
    }
}
