//! Deployment backends
//!
//! A [`Deployment`] adds, removes, inspects and executes commands in services
//! regardless of where they run. The backend is picked once at start-up from
//! [`Provider`] and shared behind an `Arc`.

pub mod compose;
pub mod docker;
pub mod docker_client;
pub mod elastic_package;
pub mod kubernetes;
pub mod manual;
pub mod service;

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;

use crate::app::options::HarnessOptions;
use crate::errors::HarnessError;

pub use service::{InstallerMetadata, OperatorManifest, ServiceManifest, ServiceRequest};

/// Readiness check run by [`Deployment::bootstrap`] once the baseline is up
pub type WaitCallback = Box<dyn FnOnce() -> BoxFuture<'static, Result<(), HarnessError>> + Send>;

/// Options for a single command executed in a service
#[derive(Debug, Clone, Default)]
pub struct ExecOptions {
    /// Variables added to the command's environment
    pub env: HashMap<String, String>,
    /// Start the command and return without waiting for it
    pub detach: bool,
    pub user: Option<String>,
}

impl ExecOptions {
    pub fn detached() -> Self {
        Self {
            detach: true,
            ..Default::default()
        }
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }
}

/// Operations every backend supports.
///
/// Methods return [`HarnessError::Unreachable`] when the environment cannot be
/// contacted at all and never retry on their own; waiting for a desired state
/// is left to the caller.
#[async_trait]
pub trait Deployment: Send + Sync {
    /// Bring up `services` within `profile`, merging `env` with what is already applied
    async fn add(
        &self,
        profile: &ServiceRequest,
        services: &[ServiceRequest],
        env: &HashMap<String, String>,
    ) -> Result<(), HarnessError>;

    /// Copy local files into the root of a service's filesystem
    async fn add_files(
        &self,
        profile: &ServiceRequest,
        service: &ServiceRequest,
        files: &[PathBuf],
    ) -> Result<(), HarnessError>;

    /// Start the baseline profile, then run `wait`
    async fn bootstrap(
        &self,
        profile: &ServiceRequest,
        env: &HashMap<String, String>,
        wait: WaitCallback,
    ) -> Result<(), HarnessError>;

    /// Tear the whole profile down and discard its run state
    async fn destroy(&self, profile: &ServiceRequest) -> Result<(), HarnessError>;

    async fn exec_in(
        &self,
        profile: &ServiceRequest,
        service: &ServiceRequest,
        cmd: &[String],
    ) -> Result<String, HarnessError> {
        self.exec_in_with(profile, service, cmd, &ExecOptions::default()).await
    }

    async fn exec_in_with(
        &self,
        profile: &ServiceRequest,
        service: &ServiceRequest,
        cmd: &[String],
        options: &ExecOptions,
    ) -> Result<String, HarnessError>;

    /// Resolve a service to its live identity. Fails when no, or more than one,
    /// live object matches.
    async fn inspect(
        &self,
        profile: &ServiceRequest,
        service: &ServiceRequest,
    ) -> Result<ServiceManifest, HarnessError>;

    async fn logs(&self, profile: &ServiceRequest, service: &ServiceRequest) -> Result<String, HarnessError>;

    async fn pre_bootstrap(&self) -> Result<(), HarnessError> {
        Ok(())
    }

    /// Tear down `services`, leaving the rest of the profile standing
    async fn remove(
        &self,
        profile: &ServiceRequest,
        services: &[ServiceRequest],
        env: &HashMap<String, String>,
    ) -> Result<(), HarnessError>;

    async fn start(&self, profile: &ServiceRequest, service: &ServiceRequest) -> Result<(), HarnessError>;

    async fn stop(&self, profile: &ServiceRequest, service: &ServiceRequest) -> Result<(), HarnessError>;
}

/// Backend kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    Docker,
    Kubernetes,
    ElasticPackage,
    Manual,
    Remote,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Docker => "docker",
            Provider::Kubernetes => "kubernetes",
            Provider::ElasticPackage => "elastic-package",
            Provider::Manual => "manual",
            Provider::Remote => "remote",
        }
    }

    /// Services run in containers managed by the harness
    pub fn is_containerized(&self) -> bool {
        matches!(self, Provider::Docker | Provider::ElasticPackage | Provider::Kubernetes)
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = HarnessError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "docker" => Ok(Provider::Docker),
            "kubernetes" => Ok(Provider::Kubernetes),
            "elastic-package" => Ok(Provider::ElasticPackage),
            "manual" => Ok(Provider::Manual),
            "remote" => Ok(Provider::Remote),
            other => Err(HarnessError::ConfigError(format!("unknown deployment provider: {}", other))),
        }
    }
}

/// Build the backend selected by `options.provider`
pub fn new_deployment(options: &HarnessOptions) -> Result<Arc<dyn Deployment>, HarnessError> {
    let deployment: Arc<dyn Deployment> = match options.provider {
        Provider::Docker => Arc::new(docker::DockerDeployment::new(options)?),
        Provider::Kubernetes => Arc::new(kubernetes::KubernetesDeployment::new(options)),
        Provider::ElasticPackage => Arc::new(elastic_package::ElasticPackageDeployment::new(options)?),
        Provider::Manual | Provider::Remote => Arc::new(manual::ManualDeployment::new(options.provider)),
    };
    Ok(deployment)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_from_str() {
        assert_eq!("docker".parse::<Provider>().unwrap(), Provider::Docker);
        assert_eq!("Elastic-Package".parse::<Provider>().unwrap(), Provider::ElasticPackage);
        assert_eq!(" remote ".parse::<Provider>().unwrap(), Provider::Remote);
        assert!("vagrant".parse::<Provider>().is_err());
    }

    #[test]
    fn test_provider_display_round_trips() {
        for provider in [
            Provider::Docker,
            Provider::Kubernetes,
            Provider::ElasticPackage,
            Provider::Manual,
            Provider::Remote,
        ] {
            assert_eq!(provider.to_string().parse::<Provider>().unwrap(), provider);
        }
    }

    #[test]
    fn test_exec_options_builder() {
        let options = ExecOptions::detached().with_env("FLEET_URL", "http://fleet:8220");
        assert!(options.detach);
        assert_eq!(options.env.get("FLEET_URL").map(String::as_str), Some("http://fleet:8220"));
    }
}
