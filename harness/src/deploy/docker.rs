//! Compose engine deployment

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use tracing::{info, trace, warn};

use crate::app::options::HarnessOptions;
use crate::deploy::compose::ComposeRunner;
use crate::deploy::docker_client::{label_filter, manifest_from_inspect, DockerClient};
use crate::deploy::{Deployment, ExecOptions, ServiceManifest, ServiceRequest, WaitCallback};
use crate::errors::HarnessError;
use crate::shell;

const REMOTE_CONTEXT: &str = "e2e-remote";

/// Services described by compose files under the operational directory
#[derive(Debug, Clone)]
pub struct DockerDeployment {
    compose: ComposeRunner,
    client: DockerClient,
    docker_host: Option<String>,
}

impl DockerDeployment {
    pub fn new(options: &HarnessOptions) -> Result<Self, HarnessError> {
        let client = DockerClient::connect(options.timeout_factor)?;
        Ok(Self::with_client(options, client))
    }

    pub fn with_client(options: &HarnessOptions, client: DockerClient) -> Self {
        Self {
            compose: ComposeRunner::new(options.layout.clone()),
            client,
            docker_host: options.docker_host.clone(),
        }
    }

    pub fn client(&self) -> &DockerClient {
        &self.client
    }

    async fn container_name(&self, profile: &ServiceRequest, service: &ServiceRequest) -> Result<String, HarnessError> {
        Ok(self.inspect(profile, service).await?.name)
    }
}

#[async_trait]
impl Deployment for DockerDeployment {
    async fn add(
        &self,
        profile: &ServiceRequest,
        services: &[ServiceRequest],
        env: &HashMap<String, String>,
    ) -> Result<(), HarnessError> {
        trace!("Adding services {:?} to profile {}", services, profile.name);
        self.compose.up(profile, services, env).await
    }

    async fn add_files(
        &self,
        profile: &ServiceRequest,
        service: &ServiceRequest,
        files: &[PathBuf],
    ) -> Result<(), HarnessError> {
        let container = self.container_name(profile, service).await?;
        for file in files {
            self.client.copy_file(&container, file, "/", false).await?;
        }
        Ok(())
    }

    async fn bootstrap(
        &self,
        profile: &ServiceRequest,
        env: &HashMap<String, String>,
        wait: WaitCallback,
    ) -> Result<(), HarnessError> {
        self.client.ping().await?;
        self.compose.up(profile, &[], env).await?;
        info!("Profile {} is up, waiting for it to be ready", profile.name);
        wait().await
    }

    async fn destroy(&self, profile: &ServiceRequest) -> Result<(), HarnessError> {
        self.compose.down(profile).await?;
        info!("Profile {} destroyed", profile.name);
        Ok(())
    }

    async fn exec_in_with(
        &self,
        profile: &ServiceRequest,
        service: &ServiceRequest,
        cmd: &[String],
        options: &ExecOptions,
    ) -> Result<String, HarnessError> {
        let container = self.container_name(profile, service).await?;
        self.client.exec(&container, cmd, &as_root(options)).await
    }

    async fn inspect(
        &self,
        profile: &ServiceRequest,
        service: &ServiceRequest,
    ) -> Result<ServiceManifest, HarnessError> {
        let inspect = self.client.find_one(compose_filters(profile, service)).await?;

        let network = format!("{}_default", profile.name);
        let name = inspect.name.as_deref().unwrap_or_default().trim_start_matches('/');
        let manifest = manifest_from_inspect(&inspect, &network, &format!("docker://{}", name), &service.name);
        trace!("Service manifest found: {:?}", manifest);
        Ok(manifest)
    }

    async fn logs(&self, profile: &ServiceRequest, service: &ServiceRequest) -> Result<String, HarnessError> {
        let container = self.container_name(profile, service).await?;
        self.client.logs(&container).await
    }

    async fn pre_bootstrap(&self) -> Result<(), HarnessError> {
        match &self.docker_host {
            Some(host) => {
                if let Err(e) = shell::execute(".", "docker", &shell::args(["context", "rm", REMOTE_CONTEXT])).await {
                    warn!("Could not find remote context to remove: {}", e);
                }
                trace!("Connecting to remote docker at {}", host);
                let docker_arg = format!("host={}", host);
                shell::execute(
                    ".",
                    "docker",
                    &shell::args(["context", "create", REMOTE_CONTEXT, "--docker", docker_arg.as_str()]),
                )
                .await?;
                shell::execute(".", "docker", &shell::args(["context", "use", REMOTE_CONTEXT])).await?;
            }
            None => {
                trace!("Using docker default context");
                shell::execute(".", "docker", &shell::args(["context", "use", "default"])).await?;
            }
        }
        Ok(())
    }

    async fn remove(
        &self,
        profile: &ServiceRequest,
        services: &[ServiceRequest],
        env: &HashMap<String, String>,
    ) -> Result<(), HarnessError> {
        self.compose.remove(profile, services, env).await
    }

    async fn start(&self, profile: &ServiceRequest, service: &ServiceRequest) -> Result<(), HarnessError> {
        let container = self.container_name(profile, service).await?;
        self.client.start(&container).await
    }

    async fn stop(&self, profile: &ServiceRequest, service: &ServiceRequest) -> Result<(), HarnessError> {
        let container = self.container_name(profile, service).await?;
        self.client.stop(&container).await
    }
}

/// Labels compose puts on the container of one service replica
fn compose_filters(profile: &ServiceRequest, service: &ServiceRequest) -> HashMap<String, Vec<String>> {
    label_filter(&[
        ("com.docker.compose.project", profile.name.clone()),
        ("com.docker.compose.service", service.name.clone()),
        ("com.docker.compose.container-number", service.scale().to_string()),
    ])
}

/// Commands run as root unless the caller picked a user
fn as_root(options: &ExecOptions) -> ExecOptions {
    let mut options = options.clone();
    options.user.get_or_insert_with(|| "root".to_string());
    options
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path_regex, query_param_contains};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const CONTAINER_ID: &str = "abc123";

    fn agent() -> ServiceRequest {
        ServiceRequest::container("elastic-agent").with_flavour("debian").with_scale(2)
    }

    async fn daemon_with_agent() -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path_regex(r"/containers/json$"))
            .and(query_param_contains("filters", "com.docker.compose.project=fleet"))
            .and(query_param_contains("filters", "com.docker.compose.service=elastic-agent"))
            .and(query_param_contains("filters", "com.docker.compose.container-number=2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([{ "Id": CONTAINER_ID }])))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path_regex(format!(r"/containers/{}/json$", CONTAINER_ID)))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "Id": CONTAINER_ID,
                "Name": "/fleet_elastic-agent-debian_2",
                "Config": { "Hostname": "abc123def" },
                "NetworkSettings": {
                    "Networks": { "fleet_default": { "Aliases": ["elastic-agent", CONTAINER_ID] } }
                }
            })))
            .mount(&server)
            .await;
        server
    }

    fn deployment_for(server: &MockServer) -> DockerDeployment {
        let client = DockerClient::connect_with_http(&server.uri(), 1).unwrap();
        DockerDeployment::with_client(&HarnessOptions::default(), client)
    }

    #[test]
    fn test_compose_filters_select_one_replica() {
        let filters = compose_filters(&ServiceRequest::new("fleet"), &agent());
        let mut labels = filters["label"].clone();
        labels.sort();
        assert_eq!(
            labels,
            vec![
                "com.docker.compose.container-number=2",
                "com.docker.compose.project=fleet",
                "com.docker.compose.service=elastic-agent",
            ]
        );
    }

    #[test]
    fn test_exec_defaults_to_root() {
        assert_eq!(as_root(&ExecOptions::default()).user.as_deref(), Some("root"));

        let options = ExecOptions {
            user: Some("elastic-agent".to_string()),
            ..Default::default()
        };
        assert_eq!(as_root(&options).user.as_deref(), Some("elastic-agent"));
    }

    #[tokio::test]
    async fn test_inspect_maps_hostname_and_alias() {
        let server = daemon_with_agent().await;
        let deployment = deployment_for(&server);

        let manifest = deployment.inspect(&ServiceRequest::new("fleet"), &agent()).await.unwrap();

        assert_eq!(manifest.id, CONTAINER_ID);
        assert_eq!(manifest.name, "fleet_elastic-agent-debian_2");
        assert_eq!(manifest.hostname, "abc123def");
        assert_eq!(manifest.alias, "elastic-agent");
        assert_eq!(manifest.connection, "docker://fleet_elastic-agent-debian_2");
    }

    #[tokio::test]
    async fn test_inspect_without_match_is_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path_regex(r"/containers/json$"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .mount(&server)
            .await;

        let err = deployment_for(&server)
            .inspect(&ServiceRequest::new("fleet"), &agent())
            .await
            .unwrap_err();
        assert!(matches!(err, HarnessError::NotFound(_)), "{err}");
    }

    #[tokio::test]
    async fn test_detached_exec_runs_as_root_in_resolved_container() {
        let server = daemon_with_agent().await;
        Mock::given(method("POST"))
            .and(path_regex(r"/containers/fleet_elastic-agent-debian_2/exec$"))
            .and(body_partial_json(json!({ "User": "root", "Cmd": ["elastic-agent", "run"] })))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "Id": "exec-1" })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path_regex(r"/exec/exec-1/start$"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let out = deployment_for(&server)
            .exec_in_with(
                &ServiceRequest::new("fleet"),
                &agent(),
                &shell::args(["elastic-agent", "run"]),
                &ExecOptions::detached(),
            )
            .await
            .unwrap();
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn test_stop_targets_the_inspected_container() {
        let server = daemon_with_agent().await;
        Mock::given(method("POST"))
            .and(path_regex(r"/containers/fleet_elastic-agent-debian_2/stop$"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        deployment_for(&server)
            .stop(&ServiceRequest::new("fleet"), &agent())
            .await
            .unwrap();
    }
}
