//! Enrollment flags for the agent binary

use url::Url;

use crate::errors::HarnessError;

pub const DEFAULT_FLEET_URL: &str = "http://fleet-server:8220";

/// Connection settings an agent enrolls with
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FleetConfig {
    pub enrollment_token: String,
    pub scheme: String,
    pub host: String,
    pub port: u16,
}

impl FleetConfig {
    /// Config for `token` against `fleet_url`; the port defaults per scheme
    pub fn new(token: &str, fleet_url: &str) -> Result<Self, HarnessError> {
        let url = Url::parse(fleet_url)
            .map_err(|e| HarnessError::ConfigError(format!("could not parse fleet url {}: {}", fleet_url, e)))?;

        let host = url
            .host_str()
            .ok_or_else(|| HarnessError::ConfigError(format!("fleet url {} has no host", fleet_url)))?
            .to_string();
        let port = url
            .port_or_known_default()
            .ok_or_else(|| HarnessError::ConfigError(format!("could not determine fleet port from {}", fleet_url)))?;

        Ok(Self {
            enrollment_token: token.to_string(),
            scheme: url.scheme().to_string(),
            host,
            port,
        })
    }

    pub fn fleet_server_url(&self) -> String {
        format!("{}://{}:{}", self.scheme, self.host, self.port)
    }

    /// Flags passed to `elastic-agent install|enroll`
    pub fn flags(&self) -> Vec<String> {
        vec![
            "--force".to_string(),
            "--insecure".to_string(),
            format!("--enrollment-token={}", self.enrollment_token),
            "--url".to_string(),
            self.fleet_server_url(),
        ]
    }
}
