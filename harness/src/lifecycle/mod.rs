//! Agent lifecycle scenarios
//!
//! Drives an installer and the Fleet control plane together, then waits on
//! the outcome each step should have: a process count on the host, an agent
//! status or version in Fleet.

pub mod agent_status;
pub mod process;

use std::sync::Arc;
use std::time::Duration;

use fleet_models::{EnrollmentApiKey, Policy};
use tracing::{info, warn};

use crate::app::options::HarnessOptions;
use crate::backoff::scaled_timeout;
use crate::deploy::{Deployment, ServiceRequest};
use crate::downloads::ArtifactFetcher;
use crate::errors::HarnessError;
use crate::fleet::FleetClient;
use crate::installer::{attach, Installer, InstallerContext, InstallerSession, PackageKind, AGENT_SERVICE};

pub use agent_status::{
    check_agent_status, wait_for_agent_status, wait_for_agent_version, wait_for_container_hostname,
    wait_for_data_streams,
};
pub use process::{wait_for_process, ProcessState};

/// Wait budget for process and hostname checks before scaling
const PROCESS_TIMEOUT: Duration = Duration::from_secs(120);

/// One agent under test: where it runs, how it is installed, and where it enrolls
pub struct AgentScenario {
    deployment: Arc<dyn Deployment>,
    installer: InstallerSession,
    fleet: Arc<FleetClient>,
    profile: ServiceRequest,
    service: ServiceRequest,
    agent_version: String,
    timeout_factor: u32,
    enrollment_key: Option<EnrollmentApiKey>,
}

impl AgentScenario {
    pub fn new(
        options: &HarnessOptions,
        deployment: Arc<dyn Deployment>,
        fetcher: Arc<ArtifactFetcher>,
        fleet: Arc<FleetClient>,
        kind: PackageKind,
        service: ServiceRequest,
    ) -> Result<Self, HarnessError> {
        let ctx = InstallerContext::new(options, deployment.clone(), fetcher, service.clone());
        let profile = ctx.profile.clone();
        let installer = InstallerSession::new(attach(kind, ctx)?);

        Ok(Self {
            deployment,
            installer,
            fleet,
            profile,
            service,
            agent_version: options.agent_version.clone(),
            timeout_factor: options.timeout_factor,
            enrollment_key: None,
        })
    }

    pub fn installer(&self) -> &InstallerSession {
        &self.installer
    }

    pub fn enrollment_key(&self) -> Option<&EnrollmentApiKey> {
        self.enrollment_key.as_ref()
    }

    fn budget(&self) -> Duration {
        scaled_timeout(self.timeout_factor, PROCESS_TIMEOUT)
    }

    /// Hostname the agent reports to Fleet
    pub async fn hostname(&self) -> Result<String, HarnessError> {
        let manifest =
            wait_for_container_hostname(self.deployment.as_ref(), &self.profile, &self.service, self.budget()).await?;
        Ok(manifest.hostname)
    }

    /// Stage, install and enroll the agent into `policy`, then start it
    pub async fn install_and_enroll(&mut self, policy: &Policy) -> Result<(), HarnessError> {
        self.installer.preinstall().await?;
        self.installer.install().await?;
        self.installer.install_certs().await?;

        let key = self.fleet.create_enrollment_key(policy).await?;
        self.installer.enroll(&key.api_key, "").await?;
        self.enrollment_key = Some(key);

        self.installer.postinstall().await?;
        info!(
            "Agent installed with the {} installer and enrolled in policy {}",
            self.installer.metadata().package_type,
            policy.id
        );
        Ok(())
    }

    /// Enroll again with the last enrollment key
    pub async fn re_enroll(&self) -> Result<(), HarnessError> {
        let key = self
            .enrollment_key
            .as_ref()
            .ok_or_else(|| HarnessError::ValidationError("the agent was never enrolled".to_string()))?;
        self.installer.enroll(&key.api_key, "").await
    }

    /// Revoke the enrollment key the agent was enrolled with
    pub async fn revoke_enrollment_key(&self) -> Result<(), HarnessError> {
        let key = self
            .enrollment_key
            .as_ref()
            .ok_or_else(|| HarnessError::ValidationError("no enrollment key to revoke".to_string()))?;
        self.fleet.delete_enrollment_key(&key.id).await
    }

    pub async fn expect_status(&self, desired: &str) -> Result<(), HarnessError> {
        let hostname = self.hostname().await?;
        wait_for_agent_status(&self.fleet, &hostname, desired, self.timeout_factor).await
    }

    pub async fn expect_process(
        &self,
        process: &str,
        desired: ProcessState,
        occurrences: usize,
    ) -> Result<(), HarnessError> {
        wait_for_process(
            self.deployment.as_ref(),
            &self.profile,
            &self.service,
            process,
            desired,
            occurrences,
            self.budget(),
        )
        .await
    }

    /// The agent process runs exactly once
    pub async fn expect_agent_running(&self) -> Result<(), HarnessError> {
        self.expect_process(AGENT_SERVICE, ProcessState::Started, 1).await
    }

    pub async fn unenroll_and_expect(&self, desired: &str) -> Result<(), HarnessError> {
        let hostname = self.hostname().await?;
        self.fleet.unenroll(&hostname).await?;
        wait_for_agent_status(&self.fleet, &hostname, desired, self.timeout_factor).await
    }

    /// Ask Fleet to upgrade the agent and wait for the new version.
    /// `latest` stands for the snapshot of the configured agent version.
    pub async fn upgrade_and_expect(&self, version: &str) -> Result<(), HarnessError> {
        let expected = agent_status::expected_agent_version(version, &self.agent_version);
        let hostname = self.hostname().await?;
        self.fleet.upgrade(&hostname, &expected).await?;
        wait_for_agent_version(&self.fleet, &hostname, &expected, self.budget()).await
    }

    pub async fn restart_and_expect_running(&self) -> Result<(), HarnessError> {
        self.installer.restart().await?;
        self.expect_agent_running().await
    }

    pub async fn uninstall_and_expect_gone(&self) -> Result<(), HarnessError> {
        self.installer.uninstall().await?;
        self.expect_process(AGENT_SERVICE, ProcessState::Stopped, 0).await
    }

    /// Uninstall, logging instead of failing
    pub async fn uninstall_best_effort(&self) {
        if let Err(e) = self.installer.uninstall().await {
            warn!("Could not uninstall the agent from {}: {}", self.service, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::options::FleetOptions;
    use crate::installer::testing::RecordingDeployment;
    use crate::installer::InstallerState;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn scenario(server: &MockServer, deployment: Arc<RecordingDeployment>) -> AgentScenario {
        let mut options = HarnessOptions::default();
        options.fleet = FleetOptions {
            kibana_url: server.uri(),
            ..FleetOptions::default()
        };
        let fleet = Arc::new(FleetClient::new(&options.fleet, 1).unwrap());
        let fetcher = crate::installer::testing::context(deployment.clone(), ServiceRequest::new(AGENT_SERVICE)).fetcher;

        AgentScenario::new(
            &options,
            deployment,
            fetcher,
            fleet,
            PackageKind::Docker,
            ServiceRequest::container(AGENT_SERVICE),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_re_enroll_requires_enrollment() {
        let server = MockServer::start().await;
        let scenario = scenario(&server, Arc::new(RecordingDeployment::default()));
        let err = scenario.re_enroll().await.unwrap_err();
        assert!(matches!(err, HarnessError::ValidationError(_)));
    }

    #[tokio::test]
    async fn test_unenroll_then_absent_is_offline() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/fleet/agents"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "items": [{"id": "a1", "status": "online", "local_metadata": {"host": {"name": "agent-host"}}}]
            })))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/fleet/agents/a1/unenroll"))
            .and(body_json(serde_json::json!({"revoke": true})))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/fleet/agents"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "items": [] })))
            .mount(&server)
            .await;

        let scenario = scenario(&server, Arc::new(RecordingDeployment::default()));
        scenario.unenroll_and_expect("offline").await.unwrap();
    }

    #[tokio::test]
    async fn test_uninstall_best_effort_swallows_errors() {
        let server = MockServer::start().await;
        let deployment = Arc::new(RecordingDeployment::default());
        deployment.fail("elastic-agent");
        let scenario = scenario(&server, deployment.clone());

        scenario.uninstall_best_effort().await;
        assert_eq!(deployment.commands(), vec!["elastic-agent uninstall -f"]);
        assert_eq!(scenario.installer().state().await, InstallerState::Uninstalled);
    }
}
