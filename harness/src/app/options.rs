//! Harness configuration options
//!
//! One [`HarnessOptions`] value is built at process start and handed to every
//! deployment, installer and control-plane client.

use std::collections::HashMap;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;

use crate::backoff::scaled_timeout;
use crate::deploy::Provider;
use crate::downloads::buckets::BEATS_CI_ARTIFACTS_BUCKET;
use crate::downloads::releases::ReleaseEndpoints;
use crate::errors::HarnessError;
use crate::logs::{LogLevel, LogOptions};
use crate::storage::layout::StorageLayout;
use crate::storage::settings::Settings;

/// Main harness options
#[derive(Debug, Clone)]
pub struct HarnessOptions {
    /// Deployment backend
    pub provider: Provider,

    /// Multiplier applied to every wait budget
    pub timeout_factor: u32,

    /// Operational directory
    pub layout: StorageLayout,

    /// Profile bootstrapped by the deployment
    pub profile: String,

    /// Environment applied to the profile on every compose call
    pub profile_env: HashMap<String, String>,

    pub stack_version: String,

    pub agent_version: String,

    pub artifacts: ArtifactOptions,

    pub fleet: FleetOptions,

    /// Remote docker daemon, e.g. `ssh://user@host`
    pub docker_host: Option<String>,

    /// Node image version for the kind cluster
    pub kubernetes_version: Option<String>,

    pub log: LogOptions,
}

impl Default for HarnessOptions {
    fn default() -> Self {
        let settings = Settings::default();
        Self {
            provider: Provider::Docker,
            timeout_factor: settings.timeout_factor,
            layout: StorageLayout::default(),
            profile: settings.profile,
            profile_env: HashMap::new(),
            stack_version: settings.stack_version,
            agent_version: settings.agent_version,
            artifacts: ArtifactOptions::default(),
            fleet: FleetOptions::default(),
            docker_host: None,
            kubernetes_version: None,
            log: LogOptions::default(),
        }
    }
}

impl HarnessOptions {
    /// Options from the process environment on top of the default settings
    pub fn from_env() -> Result<Self, HarnessError> {
        Self::from_settings(&Settings::default(), |key| std::env::var(key).ok())
    }

    /// Options from `settings`, overridden by whatever `lookup` returns for the
    /// classic environment variables
    pub fn from_settings<F>(settings: &Settings, lookup: F) -> Result<Self, HarnessError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let flag = |key: &str| {
            var(key)
                .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes"))
                .unwrap_or(false)
        };

        let provider = var("PROVIDER").unwrap_or_else(|| settings.provider.clone());
        let provider = Provider::from_str(&provider)?;

        let timeout_factor = match var("TIMEOUT_FACTOR") {
            Some(v) => v.parse::<u32>().map_err(|_| {
                HarnessError::ConfigError(format!("TIMEOUT_FACTOR must be a positive integer, got {}", v))
            })?,
            None => settings.timeout_factor,
        };

        let layout = match var("OP_DIR") {
            Some(dir) => StorageLayout::new(dir),
            None => StorageLayout::default(),
        };

        let log_level = match var("LOG_LEVEL") {
            Some(level) => LogLevel::from_str(&level).map_err(HarnessError::ConfigError)?,
            None => settings.log_level.clone(),
        };

        let mut artifacts = ArtifactOptions {
            commit_sha: var("GITHUB_CHECK_SHA1"),
            beats_local_path: var("BEATS_LOCAL_PATH").map(PathBuf::from),
            ..Default::default()
        };
        if let Some(repo) = var("GITHUB_CHECK_REPO") {
            artifacts.repository = repo;
        } else if flag("BEATS_USE_CI_SNAPSHOTS") {
            artifacts.repository = "beats".to_string();
        } else if flag("ELASTIC_AGENT_USE_CI_SNAPSHOTS") {
            artifacts.repository = "elastic-agent".to_string();
        }

        let fleet = FleetOptions {
            kibana_url: var("KIBANA_URL").unwrap_or_else(|| settings.fleet.kibana_url.clone()),
            kibana_username: var("KIBANA_USERNAME").unwrap_or_else(|| settings.fleet.kibana_username.clone()),
            kibana_password: SecretString::from(var("KIBANA_PASSWORD").unwrap_or_else(|| "changeme".to_string())),
            fleet_url: var("FLEET_URL").unwrap_or_else(|| settings.fleet.fleet_url.clone()),
        };

        let stack_version = var("STACK_VERSION").unwrap_or_else(|| settings.stack_version.clone());
        let agent_version = var("BEAT_VERSION").unwrap_or_else(|| settings.agent_version.clone());

        let mut profile_env = HashMap::new();
        profile_env.insert("stackVersion".to_string(), stack_version.clone());
        profile_env.insert("kibanaVersion".to_string(), stack_version.clone());
        profile_env.insert("elasticAgentVersion".to_string(), agent_version.clone());

        let log_dir = layout.logs_dir().path().to_path_buf();

        Ok(Self {
            provider,
            timeout_factor,
            layout,
            profile: var("PROFILE").unwrap_or_else(|| settings.profile.clone()),
            profile_env,
            stack_version,
            agent_version,
            artifacts,
            fleet,
            docker_host: var("DOCKER_HOST"),
            kubernetes_version: var("KUBERNETES_VERSION"),
            log: LogOptions {
                log_level,
                log_dir: Some(log_dir),
                ..Default::default()
            },
        })
    }

    /// `base × timeout_factor`
    pub fn timeout(&self, base: Duration) -> Duration {
        scaled_timeout(self.timeout_factor, base)
    }
}

/// Where binaries are looked up
#[derive(Debug, Clone)]
pub struct ArtifactOptions {
    /// Commit the CI built snapshots for
    pub commit_sha: Option<String>,

    /// Repository the commit belongs to
    pub repository: String,

    /// Local beats checkout with build output
    pub beats_local_path: Option<PathBuf>,

    pub bucket: String,

    /// Storage JSON API root
    pub gcs_base_url: String,

    pub endpoints: ReleaseEndpoints,
}

impl Default for ArtifactOptions {
    fn default() -> Self {
        Self {
            commit_sha: None,
            repository: "elastic-agent".to_string(),
            beats_local_path: None,
            bucket: BEATS_CI_ARTIFACTS_BUCKET.to_string(),
            gcs_base_url: "https://storage.googleapis.com".to_string(),
            endpoints: ReleaseEndpoints::default(),
        }
    }
}

/// Control plane connection
#[derive(Debug, Clone)]
pub struct FleetOptions {
    pub kibana_url: String,
    pub kibana_username: String,
    pub kibana_password: SecretString,
    /// URL agents enroll against
    pub fleet_url: String,
}

impl Default for FleetOptions {
    fn default() -> Self {
        let settings = Settings::default();
        Self {
            kibana_url: settings.fleet.kibana_url,
            kibana_username: settings.fleet.kibana_username,
            kibana_password: SecretString::from("changeme".to_string()),
            fleet_url: settings.fleet.fleet_url,
        }
    }
}
