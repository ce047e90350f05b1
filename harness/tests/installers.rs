//! Installer command sequences against a scripted host

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use e2e_harness::app::options::ArtifactOptions;
use e2e_harness::deploy::{Deployment, ExecOptions, ServiceManifest, ServiceRequest, WaitCallback};
use e2e_harness::downloads::{ArtifactFetcher, DownloadCache};
use e2e_harness::errors::HarnessError;
use e2e_harness::filesys::dir::Dir;
use e2e_harness::installer::{attach, Installer, InstallerContext, InstallerSession, InstallerState, PackageKind};

/// Host where the agent binary only exists once a package was installed
#[derive(Default)]
struct ScriptedHost {
    commands: Mutex<Vec<String>>,
    installed: Mutex<bool>,
}

impl ScriptedHost {
    fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }

    fn install_package(&self) {
        *self.installed.lock().unwrap() = true;
    }
}

#[async_trait]
impl Deployment for ScriptedHost {
    async fn add(&self, _: &ServiceRequest, _: &[ServiceRequest], _: &HashMap<String, String>) -> Result<(), HarnessError> {
        Ok(())
    }

    async fn add_files(&self, _: &ServiceRequest, _: &ServiceRequest, _: &[PathBuf]) -> Result<(), HarnessError> {
        Ok(())
    }

    async fn bootstrap(&self, _: &ServiceRequest, _: &HashMap<String, String>, wait: WaitCallback) -> Result<(), HarnessError> {
        wait().await
    }

    async fn destroy(&self, _: &ServiceRequest) -> Result<(), HarnessError> {
        Ok(())
    }

    async fn exec_in_with(
        &self,
        _: &ServiceRequest,
        _: &ServiceRequest,
        cmd: &[String],
        _: &ExecOptions,
    ) -> Result<String, HarnessError> {
        let line = cmd.join(" ");
        self.commands.lock().unwrap().push(line.clone());

        match cmd.first().map(String::as_str) {
            Some("elastic-agent") if !*self.installed.lock().unwrap() => Err(HarnessError::CommandFailed {
                command: line,
                code: Some(127),
                stderr: "elastic-agent: command not found".to_string(),
            }),
            Some("yum") if cmd.get(1).map(String::as_str) == Some("check-update") => Err(HarnessError::CommandFailed {
                command: line,
                code: Some(100),
                stderr: String::new(),
            }),
            _ => Ok(String::new()),
        }
    }

    async fn inspect(&self, _: &ServiceRequest, service: &ServiceRequest) -> Result<ServiceManifest, HarnessError> {
        Ok(ServiceManifest {
            name: service.service_name(),
            hostname: "scripted-host".to_string(),
            ..Default::default()
        })
    }

    async fn logs(&self, _: &ServiceRequest, _: &ServiceRequest) -> Result<String, HarnessError> {
        Ok(String::new())
    }

    async fn remove(&self, _: &ServiceRequest, _: &[ServiceRequest], _: &HashMap<String, String>) -> Result<(), HarnessError> {
        Ok(())
    }

    async fn start(&self, _: &ServiceRequest, _: &ServiceRequest) -> Result<(), HarnessError> {
        Ok(())
    }

    async fn stop(&self, _: &ServiceRequest, _: &ServiceRequest) -> Result<(), HarnessError> {
        Ok(())
    }
}

fn session(kind: PackageKind, host: Arc<ScriptedHost>) -> InstallerSession {
    let fetcher = ArtifactFetcher::new(
        ArtifactOptions::default(),
        1,
        Dir::new(std::env::temp_dir()),
        Arc::new(DownloadCache::new()),
    )
    .unwrap();

    let ctx = InstallerContext {
        deployment: host,
        fetcher: Arc::new(fetcher),
        profile: ServiceRequest::new("fleet"),
        service: ServiceRequest::container("elastic-agent").with_flavour("centos"),
        work_dir: PathBuf::from("/root/.op"),
        fleet_url: "https://fleet-server:8220".to_string(),
        agent_version: "8.0.0-SNAPSHOT".to_string(),
        beat_version: "8.0.0-SNAPSHOT".to_string(),
        profile_env: HashMap::new(),
        timeout_factor: 1,
    };

    InstallerSession::new(attach(kind, ctx).unwrap())
}

#[tokio::test]
async fn test_enroll_before_install_fails() {
    let host = Arc::new(ScriptedHost::default());
    let installer = session(PackageKind::Rpm, host.clone());

    let err = tokio_test::assert_err!(installer.enroll("token", "").await);

    assert!(matches!(err, HarnessError::InstallError(_)));
    assert!(err.to_string().contains("command not found"));
    assert!(!err.is_revoked_enrollment());
    assert_eq!(installer.state().await, InstallerState::Uninstalled);
}

#[tokio::test]
async fn test_rpm_certs_enroll_and_start() {
    let host = Arc::new(ScriptedHost::default());
    host.install_package();
    let installer = session(PackageKind::Rpm, host.clone());

    tokio_test::assert_ok!(installer.install_certs().await);
    tokio_test::assert_ok!(installer.enroll("token", "").await);
    tokio_test::assert_ok!(installer.postinstall().await);

    assert_eq!(
        host.commands(),
        vec![
            "yum check-update",
            "yum install ca-certificates -y",
            "update-ca-trust force-enable",
            "update-ca-trust extract",
            "elastic-agent enroll --force --insecure --enrollment-token=token --url https://fleet-server:8220",
            "systemctl enable elastic-agent",
            "systemctl restart elastic-agent",
        ]
    );
    assert_eq!(installer.state().await, InstallerState::Running);
}

#[tokio::test]
async fn test_deb_stop_uninstall() {
    let host = Arc::new(ScriptedHost::default());
    host.install_package();
    let installer = session(PackageKind::Deb, host.clone());

    installer.enroll("token", "").await.unwrap();
    installer.postinstall().await.unwrap();
    installer.stop().await.unwrap();
    installer.uninstall().await.unwrap();

    let commands = host.commands();
    assert_eq!(commands[commands.len() - 2], "systemctl stop elastic-agent");
    assert_eq!(commands[commands.len() - 1], "elastic-agent uninstall -f");
    assert_eq!(installer.state().await, InstallerState::Uninstalled);
    assert_eq!(installer.history().await.len(), 4);
}

#[tokio::test]
async fn test_tar_enrolls_with_extracted_binary() {
    let host = Arc::new(ScriptedHost::default());
    let installer = session(PackageKind::Tar, host.clone());

    installer.enroll("token", "--tag=e2e").await.unwrap();

    assert_eq!(
        host.commands(),
        vec!["/root/.op/elastic-agent/elastic-agent install --force --insecure --enrollment-token=token --url https://fleet-server:8220 --tag=e2e"]
    );
}
