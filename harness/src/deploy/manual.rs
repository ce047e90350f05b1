//! Manual and remote deployments: the environment already exists

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use sysinfo::System;
use tracing::{debug, trace};

use crate::deploy::{Deployment, ExecOptions, Provider, ServiceManifest, ServiceRequest, WaitCallback};
use crate::errors::HarnessError;
use crate::shell;

/// Commands run on the local host; provisioning calls are no-ops
#[derive(Debug, Clone)]
pub struct ManualDeployment {
    provider: Provider,
}

impl ManualDeployment {
    pub fn new(provider: Provider) -> Self {
        Self { provider }
    }
}

fn platform() -> &'static str {
    match std::env::consts::OS {
        "macos" => "darwin",
        other => other,
    }
}

#[async_trait]
impl Deployment for ManualDeployment {
    async fn add(
        &self,
        _profile: &ServiceRequest,
        services: &[ServiceRequest],
        _env: &HashMap<String, String>,
    ) -> Result<(), HarnessError> {
        trace!("{} deployment: {} service(s) assumed present", self.provider, services.len());
        Ok(())
    }

    async fn add_files(
        &self,
        _profile: &ServiceRequest,
        _service: &ServiceRequest,
        _files: &[PathBuf],
    ) -> Result<(), HarnessError> {
        Ok(())
    }

    async fn bootstrap(
        &self,
        _profile: &ServiceRequest,
        _env: &HashMap<String, String>,
        wait: WaitCallback,
    ) -> Result<(), HarnessError> {
        wait().await
    }

    async fn destroy(&self, _profile: &ServiceRequest) -> Result<(), HarnessError> {
        Ok(())
    }

    async fn exec_in_with(
        &self,
        _profile: &ServiceRequest,
        _service: &ServiceRequest,
        cmd: &[String],
        options: &ExecOptions,
    ) -> Result<String, HarnessError> {
        let (program, args) = cmd
            .split_first()
            .ok_or_else(|| HarnessError::ValidationError("empty command".to_string()))?;

        if options.detach {
            let pid = shell::execute_detached(".", program, &options.env, args)?;
            debug!("Started {} in the background (pid {})", program, pid);
            return Ok(String::new());
        }
        shell::execute_with_env(".", program, &options.env, args).await
    }

    async fn inspect(
        &self,
        _profile: &ServiceRequest,
        service: &ServiceRequest,
    ) -> Result<ServiceManifest, HarnessError> {
        let hostname = System::host_name()
            .ok_or_else(|| HarnessError::Internal("could not determine the local hostname".to_string()))?;

        Ok(ServiceManifest {
            id: String::new(),
            name: service.name.clone(),
            connection: service.name.clone(),
            alias: service.name.clone(),
            hostname: hostname.trim().to_string(),
            platform: platform().to_string(),
        })
    }

    async fn logs(&self, _profile: &ServiceRequest, _service: &ServiceRequest) -> Result<String, HarnessError> {
        Ok(String::new())
    }

    async fn remove(
        &self,
        _profile: &ServiceRequest,
        _services: &[ServiceRequest],
        _env: &HashMap<String, String>,
    ) -> Result<(), HarnessError> {
        Ok(())
    }

    async fn start(&self, _profile: &ServiceRequest, _service: &ServiceRequest) -> Result<(), HarnessError> {
        Ok(())
    }

    async fn stop(&self, _profile: &ServiceRequest, _service: &ServiceRequest) -> Result<(), HarnessError> {
        Ok(())
    }
}
