//! Process presence checks

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use sysinfo::{ProcessStatus, ProcessesToUpdate, System};
use tracing::{debug, info, trace, warn};

use crate::backoff::{self, ExponentialBackoff};
use crate::deploy::{Deployment, ServiceRequest};
use crate::errors::HarnessError;
use crate::shell::args;

/// Desired state of a process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Started,
    Stopped,
}

impl fmt::Display for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessState::Started => f.write_str("started"),
            ProcessState::Stopped => f.write_str("stopped"),
        }
    }
}

impl FromStr for ProcessState {
    type Err = HarnessError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "started" | "running" => Ok(ProcessState::Started),
            "stopped" | "uninstalled" => Ok(ProcessState::Stopped),
            other => Err(HarnessError::ValidationError(format!("unknown process state: {}", other))),
        }
    }
}

/// Split `pgrep -d ,` output into pids
pub fn parse_pids(output: &str) -> Vec<String> {
    output
        .split(',')
        .map(str::trim)
        .filter(|pid| !pid.is_empty())
        .map(str::to_string)
        .collect()
}

/// `ps` state codes of a live process, see `man ps`
fn is_alive(state: &str) -> bool {
    matches!(state.trim(), "S" | "R" | "D")
}

/// Executable name as the host reports it
pub fn host_process_name(process: &str) -> String {
    if cfg!(windows) && !process.ends_with(".exe") {
        format!("{}.exe", process)
    } else {
        process.to_string()
    }
}

/// Number of live processes named `name` on the local host
pub fn host_process_count(name: &str) -> usize {
    let name = host_process_name(name);
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::All, true);

    system
        .processes()
        .values()
        .filter(|p| p.name().to_string_lossy().eq_ignore_ascii_case(&name))
        .filter(|p| !matches!(p.status(), ProcessStatus::Zombie | ProcessStatus::Dead | ProcessStatus::Stop))
        .count()
}

/// Number of processes named `process` inside the service's container.
/// When `desired` is started only live processes count.
async fn container_process_count(
    deployment: &dyn Deployment,
    profile: &ServiceRequest,
    service: &ServiceRequest,
    process: &str,
    desired: ProcessState,
) -> Result<usize, HarnessError> {
    let output = deployment
        .exec_in(profile, service, &args(["pgrep", "-d", ",", process]))
        .await?;
    let pids = parse_pids(&output);
    trace!("Pids for {} found: {:?}", process, pids);

    let mut count = 0;
    for pid in &pids {
        let state = deployment
            .exec_in(
                profile,
                service,
                &args(["ps", "-q", pid.as_str(), "-o", "state", "--no-headers"]),
            )
            .await?;

        if desired == ProcessState::Stopped || is_alive(&state) {
            count += 1;
        }
    }
    Ok(count)
}

/// One observation: does `process` run `occurrences` times in the desired state?
pub async fn check_process(
    deployment: &dyn Deployment,
    profile: &ServiceRequest,
    service: &ServiceRequest,
    process: &str,
    desired: ProcessState,
    occurrences: usize,
) -> Result<(), HarnessError> {
    let count = if service.is_container {
        match container_process_count(deployment, profile, service, process, desired).await {
            Ok(count) => count,
            // pgrep exits non-zero when nothing matches
            Err(e) if desired == ProcessState::Stopped && occurrences == 0 => {
                debug!("Process {} is not present, as expected: {}", process, e);
                0
            }
            Err(e) => return Err(e),
        }
    } else {
        host_process_count(process)
    };

    if count == occurrences {
        info!(
            "Process {} is {} with {} occurrence(s) on {}",
            process, desired, occurrences, service
        );
        return Ok(());
    }

    Err(HarnessError::NotReady(format!(
        "{} process is not {} with the desired number of occurrences ({}) yet, found {}",
        process, desired, occurrences, count
    )))
}

/// Poll [`check_process`] within `budget`
pub async fn wait_for_process(
    deployment: &dyn Deployment,
    profile: &ServiceRequest,
    service: &ServiceRequest,
    process: &str,
    desired: ProcessState,
    occurrences: usize,
    budget: Duration,
) -> Result<(), HarnessError> {
    let policy = ExponentialBackoff::new(budget);
    let operation = format!("process {} {}", process, desired);

    backoff::retry_with_context(&policy, &operation, |_| async move {
        check_process(deployment, profile, service, process, desired, occurrences).await
    })
    .await
    .map_err(|e| {
        match desired {
            ProcessState::Started => warn!("The process {} was not found but should be present", process),
            ProcessState::Stopped => warn!("The process {} was found but shouldn't be present", process),
        }
        e
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::installer::testing::RecordingDeployment;

    fn container() -> ServiceRequest {
        ServiceRequest::container("elastic-agent")
    }

    #[test]
    fn test_parse_pids() {
        assert_eq!(parse_pids("483,519\n"), vec!["483", "519"]);
        assert!(parse_pids("").is_empty());
        assert!(parse_pids("\n").is_empty());
    }

    #[test]
    fn test_process_state_from_str() {
        assert_eq!(ProcessState::from_str("Started").unwrap(), ProcessState::Started);
        assert_eq!(ProcessState::from_str("stopped").unwrap(), ProcessState::Stopped);
        assert!(ProcessState::from_str("paused").is_err());
    }

    #[tokio::test]
    async fn test_started_counts_live_pids() {
        let deployment = Arc::new(RecordingDeployment::default());
        deployment.outputs.lock().unwrap().insert("pgrep".into(), "10,11".into());
        deployment.outputs.lock().unwrap().insert("ps".into(), "S".into());

        check_process(
            deployment.as_ref(),
            &ServiceRequest::new("fleet"),
            &container(),
            "elastic-agent",
            ProcessState::Started,
            2,
        )
        .await
        .unwrap();

        assert_eq!(
            deployment.commands(),
            vec![
                "pgrep -d , elastic-agent",
                "ps -q 10 -o state --no-headers",
                "ps -q 11 -o state --no-headers"
            ]
        );
    }

    #[tokio::test]
    async fn test_absent_process_tolerates_pgrep_failure() {
        let deployment = Arc::new(RecordingDeployment::default());
        deployment.fail("pgrep");

        check_process(
            deployment.as_ref(),
            &ServiceRequest::new("fleet"),
            &container(),
            "elastic-agent",
            ProcessState::Stopped,
            0,
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_present_process_reports_pgrep_failure() {
        let deployment = Arc::new(RecordingDeployment::default());
        deployment.fail("pgrep");

        let err = check_process(
            deployment.as_ref(),
            &ServiceRequest::new("fleet"),
            &container(),
            "elastic-agent",
            ProcessState::Started,
            1,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, HarnessError::CommandFailed { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_times_out_with_last_observation() {
        let deployment = Arc::new(RecordingDeployment::default());
        deployment.outputs.lock().unwrap().insert("pgrep".into(), "10".into());
        deployment.outputs.lock().unwrap().insert("ps".into(), "Z".into());

        let err = wait_for_process(
            deployment.as_ref(),
            &ServiceRequest::new("fleet"),
            &container(),
            "elastic-agent",
            ProcessState::Started,
            1,
            Duration::from_secs(5),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, HarnessError::Timeout { .. }));
        assert!(err.to_string().contains("found 0"));
    }

    #[test]
    fn test_unknown_host_process_is_absent() {
        assert_eq!(host_process_count("surely-not-a-running-process-name"), 0);
    }
}
