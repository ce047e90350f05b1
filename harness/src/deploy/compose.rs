//! Compose command runner

use std::collections::HashMap;
use std::path::PathBuf;

use tracing::{debug, info, warn};

use crate::deploy::ServiceRequest;
use crate::errors::HarnessError;
use crate::shell;
use crate::storage::layout::{ComposeKind, StorageLayout};
use crate::storage::run_state::RunState;

/// Runs compose commands over a profile file and any number of service files,
/// keeping the profile's run state in step with what was applied
#[derive(Debug, Clone)]
pub struct ComposeRunner {
    layout: StorageLayout,
}

impl ComposeRunner {
    pub fn new(layout: StorageLayout) -> Self {
        Self { layout }
    }

    /// Run identifier of a profile: `<profile>-profile`
    pub fn run_id(profile: &ServiceRequest) -> String {
        format!("{}-profile", profile.name)
    }

    /// The profile's compose file followed by one file per service
    pub fn compose_files(&self, profile: &ServiceRequest, services: &[ServiceRequest]) -> Vec<PathBuf> {
        let mut files = vec![self
            .layout
            .compose_file(ComposeKind::Profile, &profile.compose_path())
            .path()
            .to_path_buf()];
        files.extend(services.iter().map(|service| {
            self.layout
                .compose_file(ComposeKind::Service, &service.compose_path())
                .path()
                .to_path_buf()
        }));
        files
    }

    /// Environment last applied to the profile with `env` laid over it
    pub async fn merged_env(
        &self,
        profile: &ServiceRequest,
        env: &HashMap<String, String>,
    ) -> HashMap<String, String> {
        let mut persisted = RunState::recover(self.layout.state_dir().path(), &Self::run_id(profile))
            .await
            .env;
        persisted.extend(env.iter().map(|(k, v)| (k.clone(), v.clone())));
        persisted
    }

    /// Run `command` against the profile and services. On success the run
    /// state records the files and environment used.
    pub async fn execute(
        &self,
        profile: &ServiceRequest,
        services: &[ServiceRequest],
        command: &[String],
        env: &HashMap<String, String>,
    ) -> Result<String, HarnessError> {
        let files = self.compose_files(profile, services);
        for file in &files {
            if !tokio::fs::try_exists(file).await.unwrap_or(false) {
                return Err(HarnessError::NotFound(format!(
                    "compose file {} does not exist",
                    file.display()
                )));
            }
        }

        let mut args = vec!["-p".to_string(), profile.name.clone()];
        for file in &files {
            args.push("-f".to_string());
            args.push(file.display().to_string());
        }
        args.extend(command.iter().cloned());

        let output = run_compose(&args, env).await?;
        debug!("Compose {:?} executed for profile {}", command, profile.name);

        RunState::update(self.layout.state_dir().path(), &Self::run_id(profile), &files, env).await?;
        Ok(output)
    }

    /// `up -d`, scaling services with more than one replica
    pub async fn up(
        &self,
        profile: &ServiceRequest,
        services: &[ServiceRequest],
        env: &HashMap<String, String>,
    ) -> Result<(), HarnessError> {
        let env = self.merged_env(profile, env).await;
        self.execute(profile, services, &up_command(services), &env).await?;
        info!("Compose profile {} is up with {} service(s)", profile.name, services.len());
        Ok(())
    }

    /// `rm -fvs <service>` for each service. The run state keeps only the profile afterwards.
    pub async fn remove(
        &self,
        profile: &ServiceRequest,
        services: &[ServiceRequest],
        env: &HashMap<String, String>,
    ) -> Result<(), HarnessError> {
        let env = self.merged_env(profile, env).await;
        for service in services {
            let command = shell::args(["rm", "-fvs", service.name.as_str()]);
            self.execute(profile, services, &command, &env).await?;
            debug!("Service {} removed from compose", service);
        }

        let remaining = self.compose_files(profile, &[]);
        RunState::update(self.layout.state_dir().path(), &Self::run_id(profile), &remaining, &env).await?;
        Ok(())
    }

    /// `down --remove-orphans`, then discard the run state
    pub async fn down(&self, profile: &ServiceRequest) -> Result<(), HarnessError> {
        let env = self.merged_env(profile, &HashMap::new()).await;
        self.execute(profile, &[], &shell::args(["down", "--remove-orphans"]), &env)
            .await?;
        RunState::destroy(self.layout.state_dir().path(), &Self::run_id(profile)).await;
        Ok(())
    }
}

pub fn up_command(services: &[ServiceRequest]) -> Vec<String> {
    let mut command = shell::args(["up", "-d"]);
    let scales: Vec<String> = services
        .iter()
        .filter(|s| s.scale() > 1)
        .map(|s| format!("{}={}", s.name, s.scale()))
        .collect();
    for scale in scales {
        command.push("--scale".to_string());
        command.push(scale);
    }
    command
}

/// `docker compose`, falling back to the standalone `docker-compose` binary
async fn run_compose(args: &[String], env: &HashMap<String, String>) -> Result<String, HarnessError> {
    let mut plugin_args = vec!["compose".to_string()];
    plugin_args.extend(args.iter().cloned());

    match shell::execute_with_env(".", "docker", env, &plugin_args).await {
        Err(HarnessError::CommandFailed { code: None, .. }) => {
            return Err(HarnessError::Unreachable("the docker CLI is not available".to_string()));
        }
        Err(HarnessError::CommandFailed { stderr, .. }) if stderr.contains("is not a docker command") => {
            warn!("docker compose plugin not available, trying docker-compose");
        }
        result => return result,
    }

    shell::execute_with_env(".", "docker-compose", env, args).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compose_files() {
        let runner = ComposeRunner::new(StorageLayout::new("/op"));
        let profile = ServiceRequest::new("fleet");
        let services = vec![ServiceRequest::new("elastic-agent").with_flavour("centos")];

        let files = runner.compose_files(&profile, &services);
        assert_eq!(
            files,
            vec![
                PathBuf::from("/op/compose/profiles/fleet/docker-compose.yml"),
                PathBuf::from("/op/compose/services/elastic-agent/centos/docker-compose.yml"),
            ]
        );
        assert_eq!(ComposeRunner::run_id(&profile), "fleet-profile");
    }

    #[test]
    fn test_up_command_scales_replicas() {
        let services = vec![
            ServiceRequest::new("elastic-agent").with_scale(3),
            ServiceRequest::new("kibana"),
        ];
        assert_eq!(up_command(&services), vec!["up", "-d", "--scale", "elastic-agent=3"]);
        assert_eq!(up_command(&[]), vec!["up", "-d"]);
    }

    #[tokio::test]
    async fn test_merged_env_overlays_persisted_state() {
        let dir = tempfile::tempdir().unwrap();
        let runner = ComposeRunner::new(StorageLayout::new(dir.path()));
        let profile = ServiceRequest::new("fleet");

        let files = runner.compose_files(&profile, &[]);
        let persisted = HashMap::from([
            ("stackVersion".to_string(), "8.0.0".to_string()),
            ("kibanaVersion".to_string(), "8.0.0".to_string()),
        ]);
        RunState::update(dir.path(), "fleet-profile", &files, &persisted).await.unwrap();

        let overlay = HashMap::from([("stackVersion".to_string(), "8.1.0".to_string())]);
        let env = runner.merged_env(&profile, &overlay).await;
        assert_eq!(env["stackVersion"], "8.1.0");
        assert_eq!(env["kibanaVersion"], "8.0.0");
    }

    #[tokio::test]
    async fn test_missing_compose_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let runner = ComposeRunner::new(StorageLayout::new(dir.path()));
        let err = runner
            .up(&ServiceRequest::new("fleet"), &[], &HashMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, HarnessError::NotFound(_)));
    }
}
