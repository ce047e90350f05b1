//! Container API deployment on top of an `elastic-package` stack

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use bollard::container::Config;
use bollard::models::HostConfig;
use tracing::{debug, info, trace, warn};

use crate::app::options::HarnessOptions;
use crate::deploy::docker_client::{label_filter, manifest_from_inspect, DockerClient};
use crate::deploy::{Deployment, ExecOptions, ServiceManifest, ServiceRequest, WaitCallback};
use crate::errors::HarnessError;
use crate::shell;

pub const STACK_PREFIX: &str = "elastic-package-stack";
const SUPPORTED_PROFILE: &str = "fleet";
const SUPPORTED_SERVICE: &str = "elastic-agent";
const STACK_SERVICES: &str = "elasticsearch,fleet-server,kibana";

/// Agents started as standalone containers next to a stack managed by the
/// `elastic-package` tool
#[derive(Debug, Clone)]
pub struct ElasticPackageDeployment {
    client: DockerClient,
    stack_version: String,
    agent_version: String,
}

impl ElasticPackageDeployment {
    pub fn new(options: &HarnessOptions) -> Result<Self, HarnessError> {
        Ok(Self {
            client: DockerClient::connect(options.timeout_factor)?,
            stack_version: options.stack_version.clone(),
            agent_version: options.agent_version.clone(),
        })
    }

    fn network() -> String {
        format!("{}_default", STACK_PREFIX)
    }
}

fn check_profile(profile: &ServiceRequest) -> Result<(), HarnessError> {
    if profile.name != SUPPORTED_PROFILE {
        return Err(HarnessError::ConfigError(format!(
            "profile {} not supported in elastic-package provisioner",
            profile.name
        )));
    }
    Ok(())
}

fn service_labels(service: &ServiceRequest) -> Vec<(&'static str, String)> {
    vec![
        ("com.docker.compose.project", STACK_PREFIX.to_string()),
        ("name", service.name.clone()),
        ("e2e.service", service.service_name()),
        ("e2e.scale", service.scale().to_string()),
    ]
}

/// Container name and spec for an agent service.
///
/// `centos` and `debian` flavours run a systemd base image the agent is later
/// installed into; `cloud` runs the agent image with the legacy APM layout;
/// no flavour maps the fleet settings from `env` to the image's variables.
pub fn build_agent_container(
    service: &ServiceRequest,
    env: &HashMap<String, String>,
    default_tag: &str,
) -> (String, Config<String>) {
    let lookup = |key: &str| env.get(key).cloned().unwrap_or_default();

    let suffix = lookup("elasticAgentDockerImageSuffix");
    let namespace = env
        .get("elasticAgentDockerNamespace")
        .cloned()
        .unwrap_or_else(|| "beats".to_string());
    let tag = env
        .get("elasticAgentTag")
        .cloned()
        .unwrap_or_else(|| default_tag.to_string());

    let mut image = format!("docker.elastic.co/{}/elastic-agent{}:{}", namespace, suffix, tag);
    let mut container_env = env.clone();
    let mut entrypoint = None;
    let mut binds = Vec::new();
    let mut privileged = false;

    match service.flavour.as_deref() {
        Some(flavour @ ("centos" | "debian")) => {
            image = format!("docker.elastic.co/observability-ci/{}-systemd:latest", flavour);
            entrypoint = Some(vec!["/sbin/init".to_string()]);
            binds.push("/sys/fs/cgroup:/sys/fs/cgroup".to_string());
            privileged = true;
        }
        Some("cloud") => {
            binds.push("apmVolume:/apm-legacy".to_string());
            for (key, value) in [
                ("FLEET_SERVER_ENABLE", "1"),
                ("FLEET_SERVER_INSECURE_HTTP", "1"),
                ("ELASTIC_AGENT_CLOUD", "1"),
                ("APM_SERVER_PATH", "/apm-legacy/apm-server/"),
                ("STATE_PATH", "/apm-legacy/elastic-agent/"),
                ("DATA_PATH", "/apm-legacy/data/"),
                ("LOGS_PATH", "/apm-legacy/logs/"),
                ("HOME_PATH", "/apm-legacy/"),
            ] {
                container_env.insert(key.to_string(), value.to_string());
            }
        }
        Some(_) => {}
        None => {
            for (key, source) in [
                ("FLEET_SERVER_ENABLE", "fleetServerMode"),
                ("FLEET_SERVER_INSECURE_HTTP", "fleetServerMode"),
                ("FLEET_ENROLL", "fleetEnroll"),
                ("FLEET_ENROLLMENT_TOKEN", "fleetEnrollmentToken"),
                ("FLEET_INSECURE", "fleetInsecure"),
                ("FLEET_URL", "fleetUrl"),
            ] {
                container_env.insert(key.to_string(), lookup(source));
            }
        }
    }

    let mut env_list: Vec<String> = container_env.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
    env_list.sort();

    let labels = service_labels(service)
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();

    let config = Config {
        image: Some(image),
        env: Some(env_list),
        entrypoint,
        labels: Some(labels),
        host_config: Some(HostConfig {
            binds: if binds.is_empty() { None } else { Some(binds) },
            privileged: Some(privileged),
            network_mode: Some(ElasticPackageDeployment::network()),
            ..Default::default()
        }),
        ..Default::default()
    };

    (service.container_name(STACK_PREFIX), config)
}

#[async_trait]
impl Deployment for ElasticPackageDeployment {
    async fn add(
        &self,
        profile: &ServiceRequest,
        services: &[ServiceRequest],
        env: &HashMap<String, String>,
    ) -> Result<(), HarnessError> {
        check_profile(profile)?;

        for service in services {
            if service.name != SUPPORTED_SERVICE {
                return Err(HarnessError::ConfigError(format!(
                    "service {} not supported in elastic-package provisioner. Profile: {}",
                    service.name, profile.name
                )));
            }

            if self.inspect(profile, service).await.is_ok() {
                debug!("Service {} is already running", service);
                continue;
            }

            let (name, config) = build_agent_container(service, env, &self.agent_version);
            self.client.create_and_start(&name, config).await?;
        }
        Ok(())
    }

    async fn add_files(
        &self,
        profile: &ServiceRequest,
        service: &ServiceRequest,
        files: &[PathBuf],
    ) -> Result<(), HarnessError> {
        let manifest = self.inspect(profile, service).await?;
        for file in files {
            self.client.copy_file(&manifest.name, file, "/", false).await?;
        }
        Ok(())
    }

    async fn bootstrap(
        &self,
        profile: &ServiceRequest,
        env: &HashMap<String, String>,
        wait: WaitCallback,
    ) -> Result<(), HarnessError> {
        check_profile(profile)?;

        let stack_profile = env
            .get("kibanaProfile")
            .cloned()
            .unwrap_or_else(|| "default".to_string());
        let args = shell::args([
            "stack",
            "up",
            "--daemon",
            "--verbose",
            "--version",
            self.stack_version.as_str(),
            "--services",
            STACK_SERVICES,
            "-p",
            stack_profile.as_str(),
        ]);
        shell::execute_with_env(".", "elastic-package", env, &args).await?;
        info!("elastic-package stack {} is up", self.stack_version);
        wait().await
    }

    async fn destroy(&self, profile: &ServiceRequest) -> Result<(), HarnessError> {
        check_profile(profile)?;
        shell::execute(".", "elastic-package", &shell::args(["stack", "down", "--verbose"])).await?;
        Ok(())
    }

    async fn exec_in_with(
        &self,
        profile: &ServiceRequest,
        service: &ServiceRequest,
        cmd: &[String],
        options: &ExecOptions,
    ) -> Result<String, HarnessError> {
        check_profile(profile)?;
        let manifest = self.inspect(profile, service).await?;
        let mut options = options.clone();
        options.user.get_or_insert_with(|| "root".to_string());
        self.client.exec(&manifest.name, cmd, &options).await
    }

    async fn inspect(
        &self,
        _profile: &ServiceRequest,
        service: &ServiceRequest,
    ) -> Result<ServiceManifest, HarnessError> {
        let inspect = self.client.find_one(label_filter(&service_labels(service))).await?;
        let manifest = manifest_from_inspect(&inspect, &Self::network(), &service.name, &service.name);
        trace!("Service manifest found: {:?}", manifest);
        Ok(manifest)
    }

    async fn logs(&self, profile: &ServiceRequest, service: &ServiceRequest) -> Result<String, HarnessError> {
        let manifest = self.inspect(profile, service).await?;
        self.client.logs(&manifest.name).await
    }

    async fn remove(
        &self,
        profile: &ServiceRequest,
        services: &[ServiceRequest],
        _env: &HashMap<String, String>,
    ) -> Result<(), HarnessError> {
        check_profile(profile)?;
        for service in services {
            let manifest = match self.inspect(profile, service).await {
                Ok(manifest) => manifest,
                Err(e) => {
                    warn!("Service {} could not be deleted: {}", service, e);
                    continue;
                }
            };
            self.client.remove(&manifest.name).await?;
        }
        Ok(())
    }

    async fn start(&self, profile: &ServiceRequest, service: &ServiceRequest) -> Result<(), HarnessError> {
        let manifest = self.inspect(profile, service).await?;
        self.client.start(&manifest.name).await
    }

    async fn stop(&self, profile: &ServiceRequest, service: &ServiceRequest) -> Result<(), HarnessError> {
        let manifest = self.inspect(profile, service).await?;
        self.client.stop(&manifest.name).await
    }
}
