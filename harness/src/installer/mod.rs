//! Agent installers
//!
//! An [`Installer`] sequences the commands that take one package format of the
//! agent from a bare host to an enrolled, running service. Installers never
//! retry; waiting for an observable outcome is left to
//! [`crate::lifecycle`].

pub mod base;
pub mod deb;
pub mod docker;
pub mod fsm;
pub mod rpm;
pub mod session;
pub mod tar;
pub mod zip;

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;

use crate::app::options::HarnessOptions;
use crate::deploy::{Deployment, InstallerMetadata, OperatorManifest, ServiceRequest};
use crate::downloads::ArtifactFetcher;
use crate::errors::HarnessError;

pub use fsm::{InstallerEvent, InstallerFsm, InstallerState};
pub use session::InstallerSession;

/// Name of the service installers can be attached to
pub const AGENT_SERVICE: &str = "elastic-agent";

/// Lifecycle operations of one package format
#[async_trait]
pub trait Installer: Send + Sync {
    async fn add_files(&self, files: &[PathBuf]) -> Result<(), HarnessError>;

    /// Enroll into Fleet with `token`; `extra_flags` is appended verbatim when not empty
    async fn enroll(&self, token: &str, extra_flags: &str) -> Result<(), HarnessError>;

    async fn exec(&self, cmd: &[String]) -> Result<String, HarnessError>;

    fn inspect(&self) -> OperatorManifest;

    async fn install(&self) -> Result<(), HarnessError>;

    async fn install_certs(&self) -> Result<(), HarnessError>;

    async fn logs(&self) -> Result<String, HarnessError>;

    async fn postinstall(&self) -> Result<(), HarnessError>;

    /// Fetch and stage the binaries
    async fn preinstall(&self) -> Result<(), HarnessError>;

    async fn restart(&self) -> Result<(), HarnessError>;

    async fn start(&self) -> Result<(), HarnessError>;

    async fn stop(&self) -> Result<(), HarnessError>;

    async fn uninstall(&self) -> Result<(), HarnessError>;

    async fn upgrade(&self, version: &str) -> Result<(), HarnessError>;

    fn metadata(&self) -> &InstallerMetadata;
}

/// Package formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PackageKind {
    Tar,
    Deb,
    Rpm,
    Zip,
    Docker,
}

impl PackageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PackageKind::Tar => "tar",
            PackageKind::Deb => "deb",
            PackageKind::Rpm => "rpm",
            PackageKind::Zip => "zip",
            PackageKind::Docker => "docker",
        }
    }
}

impl fmt::Display for PackageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PackageKind {
    type Err = HarnessError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "tar" => Ok(PackageKind::Tar),
            "deb" => Ok(PackageKind::Deb),
            "rpm" => Ok(PackageKind::Rpm),
            "zip" => Ok(PackageKind::Zip),
            "docker" => Ok(PackageKind::Docker),
            other => Err(HarnessError::ConfigError(format!("unknown installer type: {}", other))),
        }
    }
}

/// Everything an installer needs to reach its service
#[derive(Clone)]
pub struct InstallerContext {
    pub deployment: Arc<dyn Deployment>,
    pub fetcher: Arc<ArtifactFetcher>,
    pub profile: ServiceRequest,
    pub service: ServiceRequest,
    /// Directory archives are extracted into on the target
    pub work_dir: PathBuf,
    pub fleet_url: String,
    /// Version of the agent when the service request carries none
    pub agent_version: String,
    /// Version of the background beats
    pub beat_version: String,
    pub profile_env: HashMap<String, String>,
    pub timeout_factor: u32,
}

impl fmt::Debug for InstallerContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstallerContext")
            .field("profile", &self.profile)
            .field("service", &self.service)
            .field("work_dir", &self.work_dir)
            .field("agent_version", &self.agent_version)
            .finish()
    }
}

impl InstallerContext {
    pub fn new(
        options: &HarnessOptions,
        deployment: Arc<dyn Deployment>,
        fetcher: Arc<ArtifactFetcher>,
        service: ServiceRequest,
    ) -> Self {
        Self {
            deployment,
            fetcher,
            profile: ServiceRequest::new(options.profile.clone()),
            service,
            work_dir: options.layout.base_dir.clone(),
            fleet_url: options.fleet.fleet_url.clone(),
            agent_version: options.agent_version.clone(),
            beat_version: options.agent_version.clone(),
            profile_env: options.profile_env.clone(),
            timeout_factor: options.timeout_factor,
        }
    }

    /// Version requested for the agent
    pub fn version(&self) -> String {
        self.service
            .version
            .clone()
            .unwrap_or_else(|| self.agent_version.clone())
    }
}

/// Attach an installer of `kind` to the service in `ctx`
pub fn attach(kind: PackageKind, ctx: InstallerContext) -> Result<Box<dyn Installer>, HarnessError> {
    if !ctx.service.name.eq_ignore_ascii_case(AGENT_SERVICE) {
        return Err(HarnessError::ValidationError(format!(
            "no installer available for service {}",
            ctx.service.name
        )));
    }

    tracing::trace!("Attaching {} installer to {}", kind, ctx.service);

    let installer: Box<dyn Installer> = match kind {
        PackageKind::Tar => Box::new(tar::TarPackage::new(ctx)),
        PackageKind::Deb => Box::new(deb::DebPackage::new(ctx)),
        PackageKind::Rpm => Box::new(rpm::RpmPackage::new(ctx)),
        PackageKind::Zip => Box::new(zip::ZipPackage::new(ctx)),
        PackageKind::Docker => Box::new(docker::DockerPackage::new(ctx)),
    };
    Ok(installer)
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_package_kind_from_str() {
        assert_eq!(PackageKind::from_str("TAR").unwrap(), PackageKind::Tar);
        assert_eq!(PackageKind::from_str("docker").unwrap(), PackageKind::Docker);
        assert!(PackageKind::from_str("msi").is_err());
    }

    #[test]
    fn test_attach_only_for_agent() {
        let deployment = Arc::new(testing::RecordingDeployment::default());
        let ctx = testing::context(deployment.clone(), ServiceRequest::new("metricbeat"));
        assert!(matches!(
            attach(PackageKind::Tar, ctx),
            Err(HarnessError::ValidationError(_))
        ));

        let ctx = testing::context(deployment, ServiceRequest::new("elastic-agent"));
        let installer = attach(PackageKind::Deb, ctx).unwrap();
        assert_eq!(installer.metadata().package_type, "deb");
    }

    #[test]
    fn test_context_version_prefers_service() {
        let deployment = Arc::new(testing::RecordingDeployment::default());
        let ctx = testing::context(
            deployment.clone(),
            ServiceRequest::new("elastic-agent").with_version("7.17.0"),
        );
        assert_eq!(ctx.version(), "7.17.0");

        let ctx = testing::context(deployment, ServiceRequest::new("elastic-agent"));
        assert_eq!(ctx.version(), "8.0.0-SNAPSHOT");
    }
}
