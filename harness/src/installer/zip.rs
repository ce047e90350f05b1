//! Windows zip installer

use std::path::PathBuf;

use async_trait::async_trait;
use tracing::{debug, trace};

use crate::deploy::{InstallerMetadata, OperatorManifest};
use crate::downloads::versions::snapshot_version;
use crate::errors::HarnessError;
use crate::installer::base::AgentPackage;
use crate::installer::{Installer, InstallerContext, AGENT_SERVICE};
use crate::shell::args;

const STAGING_DIR: &str = r"C:\elastic-agent";
const STAGED_BINARY: &str = r"C:\elastic-agent\elastic-agent.exe";
const INSTALLED_BINARY: &str = r"C:\Program Files\Elastic\Agent\elastic-agent.exe";

pub struct ZipPackage {
    base: AgentPackage,
}

impl ZipPackage {
    pub fn new(ctx: InstallerContext) -> Self {
        let metadata = InstallerMetadata {
            agent_path: r"C:\Program Files\Elastic\Agent".to_string(),
            arch: "x86_64".to_string(),
            docker: false,
            file_extension: "zip".to_string(),
            os: "windows".to_string(),
            package_type: "zip".to_string(),
            x_pack: true,
        };
        Self {
            base: AgentPackage::new(ctx, metadata),
        }
    }

    async fn powershell(&self, cmd: &[&str]) -> Result<String, HarnessError> {
        let mut full = args(["powershell.exe"]);
        full.extend(cmd.iter().map(|c| c.to_string()));
        self.base.exec(&full).await
    }

    /// Remove a leftover staging folder from a previous run
    async fn clear_staging(&self) -> Result<(), HarnessError> {
        let output = self.powershell(&["Test-Path", STAGING_DIR]).await?;
        if output.trim().eq_ignore_ascii_case("false") {
            return Ok(());
        }
        self.powershell(&["Remove-Item", STAGING_DIR, "-Recurse", "-Force"])
            .await?;
        debug!("Previous {} removed", STAGING_DIR);
        Ok(())
    }
}

#[async_trait]
impl Installer for ZipPackage {
    async fn add_files(&self, _files: &[PathBuf]) -> Result<(), HarnessError> {
        Ok(())
    }

    async fn enroll(&self, token: &str, extra_flags: &str) -> Result<(), HarnessError> {
        self.base
            .enroll_with(STAGED_BINARY, "install", token, extra_flags)
            .await
    }

    async fn exec(&self, cmd: &[String]) -> Result<String, HarnessError> {
        self.base.exec(cmd).await
    }

    fn inspect(&self) -> OperatorManifest {
        OperatorManifest {
            commit_file: r"C:\elastic-agent\.elastic-agent.active.commit".to_string(),
            work_dir: self.base.metadata.agent_path.clone(),
        }
    }

    async fn install(&self) -> Result<(), HarnessError> {
        trace!("No ZIP install instructions");
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

    async fn preinstall(&self) -> Result<(), HarnessError> {
        let version = self.base.ctx.version();
        let fetched = self.base.fetch(AGENT_SERVICE, &version).await?;

        self.clear_staging().await?;

        let archive = fetched.path.display().to_string();
        self.powershell(&["Expand-Archive", "-Force", "-Path", archive.as_str(), "-DestinationPath", r"C:\"])
            .await?;

        let version = self.base.concrete_version(&version).await;
        let extracted = format!(
            r"C:\{}-{}-{}-{}",
            AGENT_SERVICE,
            snapshot_version(&version),
            self.base.metadata.os,
            self.base.metadata.arch
        );
        let output = self
            .powershell(&["Move-Item", "-Force", "-Path", extracted.as_str(), "-Destination", STAGING_DIR])
            .await?;
        trace!("Moved {} to {}: {}", extracted, STAGING_DIR, output);
        Ok(())
    }

    async fn restart(&self) -> Result<(), HarnessError> {
        Ok(())
    }

    async fn start(&self) -> Result<(), HarnessError> {
        Ok(())
    }

    async fn stop(&self) -> Result<(), HarnessError> {
        Ok(())
    }

    async fn uninstall(&self) -> Result<(), HarnessError> {
        self.base.uninstall_with(INSTALLED_BINARY).await
    }

    async fn upgrade(&self, version: &str) -> Result<(), HarnessError> {
        self.base.upgrade_with(INSTALLED_BINARY, version).await
    }

    fn metadata(&self) -> &InstallerMetadata {
        &self.base.metadata
    }
}
