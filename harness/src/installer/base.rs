//! Commands shared by every package format

use std::path::PathBuf;

use tracing::{debug, error, info};

use crate::deploy::InstallerMetadata;
use crate::downloads::versions::{is_alias, remove_commit};
use crate::downloads::{ArtifactSpec, FetchedArtifact};
use crate::errors::HarnessError;
use crate::fleet::FleetConfig;
use crate::installer::{InstallerContext, AGENT_SERVICE};
use crate::shell::args;
use crate::utils::architecture;

/// Beats that may run next to the agent
const BACKGROUND_BEATS: [&str; 2] = ["filebeat", "metricbeat"];

/// `x86_64` or `arm64`, as artifacts name them
pub fn artifact_arch() -> String {
    match architecture() {
        "arm64" | "aarch64" => "arm64".to_string(),
        _ => "x86_64".to_string(),
    }
}

pub fn systemctl(verb: &str, unit: &str) -> Vec<String> {
    args(["systemctl", verb, unit])
}

pub fn journal(unit: &str) -> Vec<String> {
    args(["journalctl", "-m", "-u", unit])
}

/// State shared by the concrete installers
#[derive(Debug, Clone)]
pub struct AgentPackage {
    pub ctx: InstallerContext,
    pub metadata: InstallerMetadata,
}

impl AgentPackage {
    pub fn new(ctx: InstallerContext, metadata: InstallerMetadata) -> Self {
        Self { ctx, metadata }
    }

    pub async fn exec(&self, cmd: &[String]) -> Result<String, HarnessError> {
        self.ctx
            .deployment
            .exec_in(&self.ctx.profile, &self.ctx.service, cmd)
            .await
    }

    /// Run each command in order, stopping at the first failure
    pub async fn exec_all(&self, cmds: &[Vec<String>]) -> Result<(), HarnessError> {
        for cmd in cmds {
            self.exec(cmd).await?;
        }
        Ok(())
    }

    pub async fn add_files(&self, files: &[PathBuf]) -> Result<(), HarnessError> {
        self.ctx
            .deployment
            .add_files(&self.ctx.profile, &self.ctx.service, files)
            .await
    }

    pub async fn deployment_logs(&self) -> Result<String, HarnessError> {
        self.ctx
            .deployment
            .logs(&self.ctx.profile, &self.ctx.service)
            .await
    }

    /// Background beats requested on the service
    pub fn background_beats(&self) -> Vec<String> {
        self.ctx
            .service
            .background_processes
            .iter()
            .filter(|p| BACKGROUND_BEATS.iter().any(|b| b.eq_ignore_ascii_case(p)))
            .map(|p| p.to_lowercase())
            .collect()
    }

    /// Artifact coordinates for `artifact` in this package's format
    pub fn spec(&self, artifact: &str, version: &str) -> ArtifactSpec {
        let project = if artifact.starts_with(AGENT_SERVICE) {
            AGENT_SERVICE
        } else {
            "beats"
        };

        ArtifactSpec {
            project: project.to_string(),
            artifact: artifact.to_string(),
            version: version.to_string(),
            os: self.metadata.os.clone(),
            arch: self.metadata.arch.clone(),
            extension: self.metadata.file_extension.clone(),
            docker: self.metadata.docker,
            xpack: self.metadata.x_pack,
        }
    }

    pub async fn fetch(&self, artifact: &str, version: &str) -> Result<FetchedArtifact, HarnessError> {
        let spec = self.spec(artifact, version);
        self.ctx.fetcher.fetch(&spec).await.map_err(|e| {
            error!(
                "Could not download the binary for {} {} ({}): {}",
                artifact, version, self.metadata.package_type, e
            );
            e
        })
    }

    /// Concrete version for `version`, keeping an alias when it cannot be resolved
    pub async fn concrete_version(&self, version: &str) -> String {
        if !is_alias(version) {
            return version.to_string();
        }
        match self.ctx.fetcher.resolve_version(version).await {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!("Failed to get the version of {}, keeping it: {}", version, e);
                version.to_string()
            }
        }
    }

    /// Create the agent path on the target, owned by root
    pub async fn create_agent_directories(&self) -> Result<(), HarnessError> {
        let path = self.metadata.agent_path.as_str();
        self.exec(&args(["mkdir", "-p", path])).await?;
        let output = self.exec(&args(["chown", "-R", "root:root", path])).await?;
        debug!("Agent directories at {} belong to root: {}", path, output);
        Ok(())
    }

    /// `<binary> <subcommand> <fleet flags> [extra]`
    pub async fn enroll_with(
        &self,
        binary: &str,
        subcommand: &str,
        token: &str,
        extra_flags: &str,
    ) -> Result<(), HarnessError> {
        let cfg = FleetConfig::new(token, &self.ctx.fleet_url)?;

        let mut cmd = args([binary, subcommand]);
        cmd.extend(cfg.flags());
        if !extra_flags.trim().is_empty() {
            cmd.push(extra_flags.trim().to_string());
        }

        let output = self.exec(&cmd).await.map_err(|e| {
            HarnessError::InstallError(format!("failed to install the agent with subcommand: {}", e))
        })?;
        debug!("Enrolled: {}", output);
        Ok(())
    }

    pub async fn uninstall_with(&self, binary: &str) -> Result<(), HarnessError> {
        self.exec(&args([binary, "uninstall", "-f"]))
            .await
            .map_err(|e| {
                HarnessError::InstallError(format!("failed to uninstall the agent with subcommand: {}", e))
            })?;
        info!("Agent uninstalled from {}", self.ctx.service);
        Ok(())
    }

    /// Download `version` and point `<binary> upgrade` at it
    pub async fn upgrade_with(&self, binary: &str, version: &str) -> Result<(), HarnessError> {
        let fetched = self.fetch(AGENT_SERVICE, version).await?;
        let target = remove_commit(version);

        let mut cmd = args([binary, "upgrade", target.as_str(), "-v"]);
        cmd.push("--source-uri".to_string());
        cmd.push(format!("file://{}", fetched.path.display()));

        self.exec(&cmd).await.map_err(|e| {
            HarnessError::InstallError(format!("failed to upgrade the agent with subcommand: {}", e))
        })?;
        info!("Agent upgrade to {} requested", target);
        Ok(())
    }

    /// Apply `verb` to the background beats, then to the agent
    pub async fn systemctl_all(&self, verb: &str) -> Result<(), HarnessError> {
        for beat in self.background_beats() {
            self.exec(&systemctl(verb, &beat)).await?;
        }
        self.exec(&systemctl(verb, AGENT_SERVICE)).await?;
        Ok(())
    }
}
