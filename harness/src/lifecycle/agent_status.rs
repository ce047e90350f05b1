//! Waits on what Fleet reports about an agent

use std::time::Duration;

use fleet_models::DataStream;
use tracing::{debug, info};

use crate::backoff::{self, ExponentialBackoff};
use crate::deploy::{Deployment, ServiceManifest, ServiceRequest};
use crate::downloads::versions::snapshot_version;
use crate::errors::HarnessError;
use crate::fleet::FleetClient;

/// Statuses an agent missing from Fleet satisfies
const ABSENT_STATUSES: [&str; 2] = ["offline", "inactive"];

pub fn implies_absence(status: &str) -> bool {
    ABSENT_STATUSES.iter().any(|s| s.eq_ignore_ascii_case(status))
}

/// One observation of the agent status for `hostname`
pub async fn check_agent_status(fleet: &FleetClient, hostname: &str, desired: &str) -> Result<(), HarnessError> {
    let agent = match fleet.agent_by_hostname(hostname).await {
        Ok(agent) => agent,
        Err(HarnessError::NotFound(_)) if implies_absence(desired) => {
            info!("The agent of {} is not listed in Fleet, as expected for '{}'", hostname, desired);
            return Ok(());
        }
        Err(HarnessError::NotFound(_)) => {
            return Err(HarnessError::NotReady(format!(
                "the agent of {} is not listed in Fleet yet, expected '{}'",
                hostname, desired
            )));
        }
        Err(e) => return Err(e),
    };

    let status = fleet.get_agent(&agent.id).await?.status;
    if status.eq_ignore_ascii_case(desired) {
        info!("The agent of {} is in the '{}' status", hostname, status);
        return Ok(());
    }

    debug!("Agent {} is '{}', waiting for '{}'", agent.id, status, desired);
    Err(HarnessError::NotReady(format!(
        "the Agent is not in the {} status yet (currently {})",
        desired, status
    )))
}

/// Poll [`check_agent_status`] for `2 minutes × timeout_factor`
pub async fn wait_for_agent_status(
    fleet: &FleetClient,
    hostname: &str,
    desired: &str,
    timeout_factor: u32,
) -> Result<(), HarnessError> {
    let policy = ExponentialBackoff::scaled(timeout_factor, Duration::from_secs(120));
    let operation = format!("agent status {}", desired);

    backoff::retry_with_context(&policy, &operation, |_| async move {
        check_agent_status(fleet, hostname, desired).await
    })
    .await
}

/// Version the agent must report for `expected`. `latest` stands for the
/// snapshot of `agent_version`.
pub fn expected_agent_version(expected: &str, agent_version: &str) -> String {
    if expected.eq_ignore_ascii_case("latest") {
        snapshot_version(agent_version)
    } else {
        expected.to_string()
    }
}

/// Wait until the agent of `hostname` reports `version`
pub async fn wait_for_agent_version(
    fleet: &FleetClient,
    hostname: &str,
    version: &str,
    budget: Duration,
) -> Result<(), HarnessError> {
    let policy = ExponentialBackoff::new(budget);

    backoff::retry_with_context(&policy, "agent version", |_| async move {
        let retrieved = fleet.agent_version(hostname).await?;
        if retrieved != version {
            return Err(HarnessError::NotReady(format!(
                "version mismatch required '{}' retrieved '{}'",
                version, retrieved
            )));
        }
        Ok(())
    })
    .await?;

    info!("The agent of {} runs version {}", hostname, version);
    Ok(())
}

/// Wait for the data stream count: exactly zero when `minimum` is 0, at
/// least `minimum` otherwise
pub async fn wait_for_data_streams(
    fleet: &FleetClient,
    minimum: usize,
    budget: Duration,
) -> Result<Vec<DataStream>, HarnessError> {
    let policy = ExponentialBackoff::new(budget);

    let streams = backoff::retry_with_context(&policy, "data streams", |_| async move {
        let streams = fleet.list_data_streams().await?;
        let satisfied = if minimum == 0 {
            streams.is_empty()
        } else {
            streams.len() >= minimum
        };

        if !satisfied {
            return Err(HarnessError::NotReady(format!(
                "{} data streams listed, expecting {}",
                streams.len(),
                if minimum == 0 { "none".to_string() } else { format!("at least {}", minimum) }
            )));
        }
        Ok(streams)
    })
    .await?;

    info!("{} data streams listed", streams.len());
    Ok(streams)
}

/// Inspect the service until its container reports a hostname
pub async fn wait_for_container_hostname(
    deployment: &dyn Deployment,
    profile: &ServiceRequest,
    service: &ServiceRequest,
    budget: Duration,
) -> Result<ServiceManifest, HarnessError> {
    let policy = ExponentialBackoff::new(budget);

    backoff::retry_with_context(&policy, "container hostname", |_| async move {
        let manifest = deployment.inspect(profile, service).await?;
        if manifest.hostname.trim().is_empty() {
            return Err(HarnessError::NotReady(format!("{} has no hostname yet", service)));
        }
        Ok(manifest)
    })
    .await
}
