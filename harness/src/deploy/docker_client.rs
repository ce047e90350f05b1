//! Container API client
//!
//! Thin wrapper over bollard used by the container-based backends and the
//! docker installer: exec with captured output, binary-safe file copies,
//! image load/tag, and exact-match container lookups.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use bollard::container::{
    Config, CreateContainerOptions, InspectContainerOptions, ListContainersOptions, LogOutput, LogsOptions,
    RemoveContainerOptions, StartContainerOptions, StopContainerOptions, UploadToContainerOptions,
};
use bollard::exec::{CreateExecOptions, StartExecOptions, StartExecResults};
use bollard::image::{CreateImageOptions, ImportImageOptions, TagImageOptions};
use bollard::models::{ContainerInspectResponse, ContainerSummary};
use bollard::Docker;
use bytes::Bytes;
use futures::StreamExt;
use tracing::{debug, info, trace};

use crate::backoff::{self, ExponentialBackoff};
use crate::deploy::{ExecOptions, ServiceManifest};
use crate::errors::HarnessError;

#[derive(Clone)]
pub struct DockerClient {
    docker: Docker,
    timeout_factor: u32,
}

impl std::fmt::Debug for DockerClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DockerClient")
            .field("timeout_factor", &self.timeout_factor)
            .finish()
    }
}

impl DockerClient {
    /// Connect using `DOCKER_HOST` or the platform's default socket
    pub fn connect(timeout_factor: u32) -> Result<Self, HarnessError> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| HarnessError::Unreachable(format!("could not connect to the docker daemon: {}", e)))?;
        Ok(Self { docker, timeout_factor })
    }

    /// Connect to a daemon exposing the API over plain HTTP, e.g. `tcp://host:2375`
    pub fn connect_with_http(addr: &str, timeout_factor: u32) -> Result<Self, HarnessError> {
        let docker = Docker::connect_with_http(addr, 120, bollard::API_DEFAULT_VERSION)
            .map_err(|e| HarnessError::Unreachable(format!("could not connect to the docker daemon at {}: {}", addr, e)))?;
        Ok(Self { docker, timeout_factor })
    }

    pub async fn ping(&self) -> Result<(), HarnessError> {
        self.docker
            .ping()
            .await
            .map_err(|e| HarnessError::Unreachable(format!("docker daemon did not answer: {}", e)))?;
        Ok(())
    }

    pub async fn list(&self, filters: HashMap<String, Vec<String>>) -> Result<Vec<ContainerSummary>, HarnessError> {
        let options = ListContainersOptions {
            all: true,
            filters,
            ..Default::default()
        };
        Ok(self.docker.list_containers(Some(options)).await?)
    }

    /// Inspect the single container matching `filters`
    pub async fn find_one(
        &self,
        filters: HashMap<String, Vec<String>>,
    ) -> Result<ContainerInspectResponse, HarnessError> {
        let description = describe_filters(&filters);
        let containers = self.list(filters).await?;

        let id = match containers.as_slice() {
            [] => {
                return Err(HarnessError::NotFound(format!(
                    "there are no containers matching {}",
                    description
                )))
            }
            [container] => container.id.clone().unwrap_or_default(),
            many => {
                return Err(HarnessError::DeployError(format!(
                    "{} containers match {}, expected exactly one",
                    many.len(),
                    description
                )))
            }
        };

        self.inspect(&id).await
    }

    /// Inspect the container with exactly this name
    pub async fn find_by_name(&self, name: &str) -> Result<ContainerInspectResponse, HarnessError> {
        self.find_one(name_filter(name)).await
    }

    pub async fn inspect(&self, container: &str) -> Result<ContainerInspectResponse, HarnessError> {
        Ok(self
            .docker
            .inspect_container(container, None::<InspectContainerOptions>)
            .await?)
    }

    /// Run `cmd` in a container. Attached runs return trimmed stdout and fail
    /// on a non-zero exit code; detached runs return an empty string.
    pub async fn exec(&self, container: &str, cmd: &[String], options: &ExecOptions) -> Result<String, HarnessError> {
        let command_line = cmd.join(" ");
        debug!("Executing in {}: {}", container, command_line);

        let env: Vec<String> = options.env.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
        let config = CreateExecOptions {
            cmd: Some(cmd.to_vec()),
            env: if env.is_empty() { None } else { Some(env) },
            user: options.user.clone(),
            attach_stdout: Some(!options.detach),
            attach_stderr: Some(!options.detach),
            ..Default::default()
        };
        let exec = self.docker.create_exec(container, config).await?;

        let start = StartExecOptions {
            detach: options.detach,
            ..Default::default()
        };
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        match self.docker.start_exec(&exec.id, Some(start)).await? {
            StartExecResults::Attached { mut output, .. } => {
                while let Some(message) = output.next().await {
                    match message? {
                        LogOutput::StdErr { message } => stderr.extend_from_slice(&message),
                        LogOutput::StdOut { message } | LogOutput::Console { message } => {
                            stdout.extend_from_slice(&message)
                        }
                        LogOutput::StdIn { .. } => {}
                    }
                }
            }
            StartExecResults::Detached => {
                trace!("Detached command started in {}: {}", container, command_line);
                return Ok(String::new());
            }
        }

        let stdout = String::from_utf8_lossy(&stdout).trim().to_string();
        let stderr = String::from_utf8_lossy(&stderr).trim().to_string();

        let inspect = self.docker.inspect_exec(&exec.id).await?;
        match inspect.exit_code {
            Some(0) | None => {
                trace!("Command '{}' output: {}", command_line, stdout);
                Ok(stdout)
            }
            Some(code) => Err(HarnessError::CommandFailed {
                command: command_line,
                code: Some(code),
                stderr: if stderr.is_empty() { stdout } else { stderr },
            }),
        }
    }

    /// Copy a local file into `parent_dir` inside the container. Archives can be
    /// uploaded as-is to be unpacked by the daemon; everything else is wrapped
    /// in a single-entry tar first.
    pub async fn copy_file(
        &self,
        container: &str,
        src: &Path,
        parent_dir: &str,
        extract_archive: bool,
    ) -> Result<(), HarnessError> {
        if parent_dir != "/" {
            let probe = vec!["test".to_string(), "-d".to_string(), parent_dir.to_string()];
            if let Err(e) = self.exec(container, &probe, &ExecOptions::default()).await {
                return Err(HarnessError::NotFound(format!(
                    "destination directory {} does not exist in {}: {}",
                    parent_dir, container, e
                )));
            }
        }

        let data = tokio::fs::read(src).await?;
        let body = if extract_archive {
            data
        } else {
            let name = src
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .ok_or_else(|| HarnessError::ValidationError(format!("{} has no file name", src.display())))?;
            single_file_tar(&name, &data)?
        };

        let options = UploadToContainerOptions {
            path: parent_dir.to_string(),
            ..Default::default()
        };
        self.docker
            .upload_to_container(container, Some(options), Bytes::from(body))
            .await?;
        debug!("Copied {} to {}:{}", src.display(), container, parent_dir);
        Ok(())
    }

    pub async fn pull(&self, image: &str) -> Result<(), HarnessError> {
        info!("Pulling image: {}", image);
        let options = CreateImageOptions {
            from_image: image.to_string(),
            ..Default::default()
        };
        let mut stream = self.docker.create_image(Some(options), None, None);
        while let Some(progress) = stream.next().await {
            progress?;
        }
        Ok(())
    }

    /// Load an image tarball (optionally gzipped) into the daemon
    pub async fn load(&self, path: &Path) -> Result<(), HarnessError> {
        info!("Loading image: {}", path.display());
        let data = tokio::fs::read(path).await?;
        let mut stream = self
            .docker
            .import_image(ImportImageOptions { quiet: true }, Bytes::from(data), None);
        while let Some(progress) = stream.next().await {
            let progress = progress?;
            if let Some(error) = progress.error {
                return Err(HarnessError::DeployError(format!(
                    "could not load image {}: {}",
                    path.display(),
                    error
                )));
            }
        }
        Ok(())
    }

    /// Tag `src` as `target`, retrying while the freshly loaded image settles
    pub async fn tag(&self, src: &str, target: &str) -> Result<(), HarnessError> {
        let (repo, tag) = split_image_reference(target);
        let policy = ExponentialBackoff::scaled(self.timeout_factor, Duration::from_secs(5));

        backoff::retry(&policy, "image tag", |_| {
            let docker = &self.docker;
            let options = TagImageOptions {
                repo: repo.clone(),
                tag: tag.clone(),
            };
            async move {
                docker
                    .tag_image(src, Some(options))
                    .await
                    .map_err(|e| HarnessError::NotReady(format!("could not tag {}: {}", src, e)))
            }
        })
        .await?;

        debug!("Image {} tagged as {}", src, target);
        Ok(())
    }

    pub async fn create_and_start(&self, name: &str, config: Config<String>) -> Result<String, HarnessError> {
        let options = CreateContainerOptions {
            name: name.to_string(),
            platform: None,
        };
        let created = self.docker.create_container(Some(options), config).await?;
        self.docker
            .start_container(&created.id, None::<StartContainerOptions<String>>)
            .await?;
        info!("Started container {} ({})", name, created.id);
        Ok(created.id)
    }

    /// Force-remove a container and its anonymous volumes
    pub async fn remove(&self, container: &str) -> Result<(), HarnessError> {
        let options = RemoveContainerOptions {
            force: true,
            v: true,
            ..Default::default()
        };
        self.docker.remove_container(container, Some(options)).await?;
        debug!("Container removed: {}", container);
        Ok(())
    }

    pub async fn start(&self, container: &str) -> Result<(), HarnessError> {
        self.docker
            .start_container(container, None::<StartContainerOptions<String>>)
            .await?;
        Ok(())
    }

    pub async fn stop(&self, container: &str) -> Result<(), HarnessError> {
        self.docker
            .stop_container(container, None::<StopContainerOptions>)
            .await?;
        Ok(())
    }

    pub async fn logs(&self, container: &str) -> Result<String, HarnessError> {
        let options = LogsOptions::<String> {
            stdout: true,
            stderr: true,
            ..Default::default()
        };
        let mut stream = self.docker.logs(container, Some(options));
        let mut logs = Vec::new();
        while let Some(line) = stream.next().await {
            logs.extend_from_slice(&line?.into_bytes());
        }
        Ok(String::from_utf8_lossy(&logs).into_owned())
    }
}

/// Exact name match (the API filter is a regular expression over `/<name>`)
pub fn name_filter(name: &str) -> HashMap<String, Vec<String>> {
    HashMap::from([("name".to_string(), vec![format!("^/{}$", name)])])
}

/// Match every `key=value` label
pub fn label_filter(labels: &[(&str, String)]) -> HashMap<String, Vec<String>> {
    let labels = labels.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
    HashMap::from([("label".to_string(), labels)])
}

fn describe_filters(filters: &HashMap<String, Vec<String>>) -> String {
    let mut parts: Vec<String> = filters
        .iter()
        .flat_map(|(k, values)| values.iter().map(move |v| format!("{}:{}", k, v)))
        .collect();
    parts.sort();
    parts.join(",")
}

/// Build a manifest from an inspect response. The alias is the first alias on
/// `network`, or `fallback_alias` when the container is not attached to it.
pub fn manifest_from_inspect(
    inspect: &ContainerInspectResponse,
    network: &str,
    connection: &str,
    fallback_alias: &str,
) -> ServiceManifest {
    let alias = inspect
        .network_settings
        .as_ref()
        .and_then(|settings| settings.networks.as_ref())
        .and_then(|networks| networks.get(network))
        .and_then(|endpoint| endpoint.aliases.as_ref())
        .and_then(|aliases| aliases.first().cloned())
        .unwrap_or_else(|| fallback_alias.to_string());

    ServiceManifest {
        id: inspect.id.clone().unwrap_or_default(),
        name: inspect
            .name
            .as_deref()
            .unwrap_or_default()
            .trim_start_matches('/')
            .to_string(),
        connection: connection.to_string(),
        alias,
        hostname: inspect
            .config
            .as_ref()
            .and_then(|config| config.hostname.clone())
            .unwrap_or_default(),
        platform: inspect.platform.clone().unwrap_or_else(|| "linux".to_string()),
    }
}

/// `registry:5000/ns/image:tag` → (`registry:5000/ns/image`, `tag`)
pub fn split_image_reference(reference: &str) -> (String, String) {
    match reference.rsplit_once(':') {
        Some((repo, tag)) if !tag.contains('/') => (repo.to_string(), tag.to_string()),
        _ => (reference.to_string(), "latest".to_string()),
    }
}

/// Wrap one file in a tar archive, executable by everyone
pub fn single_file_tar(name: &str, data: &[u8]) -> Result<Vec<u8>, HarnessError> {
    let mut header = tar::Header::new_gnu();
    header.set_size(data.len() as u64);
    header.set_mode(0o777);
    header.set_cksum();

    let mut builder = tar::Builder::new(Vec::new());
    builder.append_data(&mut header, name, data)?;
    Ok(builder.into_inner()?)
}
