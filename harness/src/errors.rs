//! Error types for the e2e harness

use std::time::Duration;

use thiserror::Error;

/// Main error type for the e2e harness
#[derive(Error, Debug)]
pub enum HarnessError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Docker error: {0}")]
    DockerError(#[from] bollard::errors::Error),

    /// The target environment cannot be contacted at all. Never retried.
    #[error("Environment unreachable: {0}")]
    Unreachable(String),

    /// The target exists but has not reached the desired state yet
    #[error("Not ready: {0}")]
    NotReady(String),

    #[error("Command '{command}' failed (exit code {code:?}): {stderr}")]
    CommandFailed {
        command: String,
        code: Option<i64>,
        stderr: String,
    },

    #[error("Deployment error: {0}")]
    DeployError(String),

    #[error("Install error: {0}")]
    InstallError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Artifact {artifact} not found, attempted: [{}]", attempts.join("; "))]
    ArtifactNotFound {
        artifact: String,
        attempts: Vec<String>,
    },

    #[error("{operation} not ready after {retries} retries / {:.1}s elapsed: {last}", elapsed.as_secs_f64())]
    Timeout {
        operation: String,
        retries: u32,
        elapsed: Duration,
        last: Box<HarnessError>,
    },

    #[error("Control plane returned {status}: {body}")]
    ControlPlane { status: u16, body: String },

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl HarnessError {
    /// Errors that must abort a retry loop immediately
    pub fn is_permanent(&self) -> bool {
        match self {
            HarnessError::Unreachable(_)
            | HarnessError::ConfigError(_)
            | HarnessError::ValidationError(_) => true,
            HarnessError::Timeout { last, .. } => last.is_permanent(),
            _ => false,
        }
    }

    /// Whether the error reports an enrollment attempt with a revoked token
    pub fn is_revoked_enrollment(&self) -> bool {
        let message = self.to_string().to_lowercase();
        message.contains("enrollment_token_revoked")
            || message.contains("enrollment api key is revoked")
            || (message.contains("revoked") && message.contains("enroll"))
    }

    /// Unwraps a retry timeout down to the last observed error
    pub fn last_observation(&self) -> &HarnessError {
        match self {
            HarnessError::Timeout { last, .. } => last.last_observation(),
            other => other,
        }
    }
}

impl From<anyhow::Error> for HarnessError {
    fn from(err: anyhow::Error) -> Self {
        HarnessError::Internal(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permanent_errors() {
        assert!(HarnessError::Unreachable("docker".into()).is_permanent());
        assert!(HarnessError::ConfigError("bad".into()).is_permanent());
        assert!(!HarnessError::NotReady("pending".into()).is_permanent());
    }

    #[test]
    fn test_timeout_keeps_last_observation() {
        let err = HarnessError::Timeout {
            operation: "agent status".into(),
            retries: 4,
            elapsed: Duration::from_millis(2500),
            last: Box::new(HarnessError::NotReady(
                "expected status online, observed status enrolling".into(),
            )),
        };

        let message = err.to_string();
        assert!(message.contains("after 4 retries / 2.5s elapsed"));
        assert!(message.contains("observed status enrolling"));
        assert!(matches!(err.last_observation(), HarnessError::NotReady(_)));
    }

    #[test]
    fn test_revoked_enrollment_detected_from_command_output() {
        let err = HarnessError::InstallError(
            "failed to install the agent with subcommand: Command 'elastic-agent enroll' failed (exit code Some(1)): fail to enroll: enrollment_token_revoked".into(),
        );
        assert!(err.is_revoked_enrollment());

        let other = HarnessError::InstallError("failed to install the agent with subcommand: no such file".into());
        assert!(!other.is_revoked_enrollment());
    }

    #[test]
    fn test_artifact_not_found_lists_attempts() {
        let err = HarnessError::ArtifactNotFound {
            artifact: "elastic-agent".into(),
            attempts: vec!["bucket: missing".into(), "api: missing".into()],
        };
        assert_eq!(
            err.to_string(),
            "Artifact elastic-agent not found, attempted: [bucket: missing; api: missing]"
        );
    }
}
