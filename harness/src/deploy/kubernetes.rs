//! Orchestrator cluster deployment (kubectl + kind)

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::app::options::HarnessOptions;
use crate::deploy::{Deployment, ExecOptions, ServiceManifest, ServiceRequest, WaitCallback};
use crate::errors::HarnessError;
use crate::shell;
use crate::utils::generate_uuid;

const NAMESPACE: &str = "default";

/// A kind cluster started by the harness, when no cluster was reachable
#[derive(Debug, Clone, Default)]
struct KindCluster {
    name: Option<String>,
    kubeconfig: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
struct DeploymentObject {
    metadata: ObjectMetadata,
}

#[derive(Debug, Deserialize)]
struct ObjectMetadata {
    name: String,
    #[serde(default)]
    uid: String,
}

/// Services applied from kustomize overlays under `<op dir>/kubernetes`
#[derive(Debug)]
pub struct KubernetesDeployment {
    config_dir: PathBuf,
    kubernetes_version: Option<String>,
    cluster: RwLock<KindCluster>,
}

impl KubernetesDeployment {
    pub fn new(options: &HarnessOptions) -> Self {
        Self {
            config_dir: options.layout.kubernetes_dir().path().to_path_buf(),
            kubernetes_version: options.kubernetes_version.clone(),
            cluster: RwLock::new(KindCluster::default()),
        }
    }

    fn overlay(&self, service: &ServiceRequest) -> String {
        self.config_dir
            .join("overlays")
            .join(service.service_name())
            .display()
            .to_string()
    }

    fn base(&self) -> String {
        self.config_dir.join("base").display().to_string()
    }

    /// Run kubectl against the current cluster in the default namespace
    async fn kubectl(&self, args: &[String]) -> Result<String, HarnessError> {
        let mut full = Vec::new();
        if let Some(kubeconfig) = &self.cluster.read().await.kubeconfig {
            full.push("--kubeconfig".to_string());
            full.push(kubeconfig.display().to_string());
        }
        full.push("--namespace".to_string());
        full.push(NAMESPACE.to_string());
        full.extend(args.iter().cloned());
        shell::execute(".", "kubectl", &full).await
    }

    async fn is_available(&self) -> bool {
        match self.kubectl(&shell::args(["api-versions"])).await {
            Ok(out) => !out.trim().is_empty(),
            Err(_) => false,
        }
    }

    /// Reuse a reachable cluster or create one with kind
    async fn initialize(&self) -> Result<(), HarnessError> {
        if self.is_available().await {
            debug!("Using the existing kubernetes cluster");
            return Ok(());
        }

        info!("Kubernetes cluster not available, will start one using kind");
        let kind_version = shell::execute(".", "kind", &shell::args(["version"]))
            .await
            .map_err(|e| HarnessError::Unreachable(format!("kind is not available: {}", e)))?;
        info!("Using {}", kind_version);

        let name = format!("kind-{}", generate_uuid());
        let kubeconfig = self.config_dir.join(&name).join("kubeconfig");
        if let Some(parent) = kubeconfig.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut args = shell::args(["create", "cluster", "--name", name.as_str()]);
        args.push("--config".to_string());
        args.push(self.config_dir.join("kind.yaml").display().to_string());
        args.push("--kubeconfig".to_string());
        args.push(kubeconfig.display().to_string());
        if let Some(version) = &self.kubernetes_version {
            info!("Installing Kubernetes v{}", version);
            args.push("--image".to_string());
            args.push(format!("kindest/node:v{}", version));
        }
        shell::execute(".", "kind", &args).await?;

        let mut cluster = self.cluster.write().await;
        cluster.name = Some(name);
        cluster.kubeconfig = Some(kubeconfig);
        info!("Kubeconfig in {:?}", cluster.kubeconfig);
        Ok(())
    }

    async fn first_pod(&self, service: &ServiceRequest) -> Result<String, HarnessError> {
        let selector = format!("app={}", service.service_name());
        let pod = self
            .kubectl(&shell::args([
                "get",
                "pods",
                "-l",
                selector.as_str(),
                "-o",
                "jsonpath={.items[0].metadata.name}",
            ]))
            .await?;
        if pod.is_empty() {
            return Err(HarnessError::NotFound(format!("no pods for {}", service)));
        }
        Ok(pod)
    }
}

/// `kubectl exec` arguments; detached commands are pushed to the background by a shell
pub fn exec_args(service: &ServiceRequest, cmd: &[String], options: &ExecOptions) -> Vec<String> {
    let mut args = vec![
        "exec".to_string(),
        format!("deployment/{}", service.service_name()),
        "--".to_string(),
    ];

    let mut command: Vec<String> = Vec::new();
    if !options.env.is_empty() {
        command.push("env".to_string());
        let mut vars: Vec<String> = options.env.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
        vars.sort();
        command.extend(vars);
    }
    command.extend(cmd.iter().cloned());

    if options.detach {
        args.push("sh".to_string());
        args.push("-c".to_string());
        args.push(format!("nohup {} > /dev/null 2>&1 &", command.join(" ")));
    } else {
        args.extend(command);
    }
    args
}

#[async_trait]
impl Deployment for KubernetesDeployment {
    async fn add(
        &self,
        _profile: &ServiceRequest,
        services: &[ServiceRequest],
        _env: &HashMap<String, String>,
    ) -> Result<(), HarnessError> {
        for service in services {
            let overlay = self.overlay(service);
            self.kubectl(&shell::args(["apply", "-k", overlay.as_str()])).await?;
            debug!("Service {} applied", service);
        }
        Ok(())
    }

    async fn add_files(
        &self,
        _profile: &ServiceRequest,
        service: &ServiceRequest,
        files: &[PathBuf],
    ) -> Result<(), HarnessError> {
        let pod = self.first_pod(service).await?;
        for file in files {
            let name = file
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let src = file.display().to_string();
            let dst = format!("{}:/{}", pod, name);
            self.kubectl(&shell::args(["cp", src.as_str(), dst.as_str()])).await?;
        }
        Ok(())
    }

    async fn bootstrap(
        &self,
        _profile: &ServiceRequest,
        _env: &HashMap<String, String>,
        wait: WaitCallback,
    ) -> Result<(), HarnessError> {
        self.initialize().await?;
        let base = self.base();
        self.kubectl(&shell::args(["apply", "-k", base.as_str()])).await?;
        wait().await
    }

    async fn destroy(&self, _profile: &ServiceRequest) -> Result<(), HarnessError> {
        let mut cluster = self.cluster.write().await;
        match cluster.name.take() {
            Some(name) => {
                if let Err(e) = shell::execute(".", "kind", &shell::args(["delete", "cluster", "--name", name.as_str()])).await {
                    warn!("Failed to delete kind cluster {}: {}", name, e);
                } else {
                    info!("kind cluster {} was deleted", name);
                }
                cluster.kubeconfig = None;
            }
            None => {
                drop(cluster);
                let base = self.base();
                self.kubectl(&shell::args(["delete", "-k", base.as_str()])).await?;
            }
        }
        Ok(())
    }

    async fn exec_in_with(
        &self,
        _profile: &ServiceRequest,
        service: &ServiceRequest,
        cmd: &[String],
        options: &ExecOptions,
    ) -> Result<String, HarnessError> {
        self.kubectl(&exec_args(service, cmd, options)).await
    }

    async fn inspect(
        &self,
        _profile: &ServiceRequest,
        service: &ServiceRequest,
    ) -> Result<ServiceManifest, HarnessError> {
        let target = format!("deployment/{}", service.service_name());
        let out = self.kubectl(&shell::args(["get", target.as_str(), "-o", "json"])).await?;
        let object: DeploymentObject = serde_json::from_str(&out)?;

        Ok(ServiceManifest {
            id: object.metadata.uid,
            name: object.metadata.name.trim_start_matches('/').to_string(),
            connection: target,
            alias: service.name.clone(),
            hostname: service.name.clone(),
            platform: "linux".to_string(),
        })
    }

    async fn logs(&self, _profile: &ServiceRequest, service: &ServiceRequest) -> Result<String, HarnessError> {
        let target = format!("deployment/{}", service.service_name());
        self.kubectl(&shell::args(["logs", target.as_str()])).await
    }

    async fn remove(
        &self,
        _profile: &ServiceRequest,
        services: &[ServiceRequest],
        _env: &HashMap<String, String>,
    ) -> Result<(), HarnessError> {
        for service in services {
            let overlay = self.overlay(service);
            self.kubectl(&shell::args(["delete", "-k", overlay.as_str()])).await?;
        }
        Ok(())
    }

    async fn start(&self, _profile: &ServiceRequest, service: &ServiceRequest) -> Result<(), HarnessError> {
        let target = format!("deployment/{}", service.service_name());
        self.kubectl(&shell::args(["scale", target.as_str(), "--replicas=1"])).await?;
        Ok(())
    }

    async fn stop(&self, _profile: &ServiceRequest, service: &ServiceRequest) -> Result<(), HarnessError> {
        let target = format!("deployment/{}", service.service_name());
        self.kubectl(&shell::args(["scale", target.as_str(), "--replicas=0"])).await?;
        Ok(())
    }
}
