//! Settings file management

use serde::{Deserialize, Serialize};

use crate::logs::LogLevel;

/// Harness settings, read from `<op dir>/settings.json` when present.
/// Environment variables take precedence over every field.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Settings {
    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,

    /// Deployment provider (`docker`, `kubernetes`, `elastic-package`, `manual`, `remote`)
    #[serde(default = "default_provider")]
    pub provider: String,

    /// Multiplier applied to every wait budget
    #[serde(default = "default_timeout_factor")]
    pub timeout_factor: u32,

    /// Profile bootstrapped by the deployment
    #[serde(default = "default_profile")]
    pub profile: String,

    /// Version of the stack (Elasticsearch, Kibana, Fleet Server)
    #[serde(default = "default_stack_version")]
    pub stack_version: String,

    /// Version of the agent under test
    #[serde(default = "default_stack_version")]
    pub agent_version: String,

    /// Control plane endpoints
    #[serde(default)]
    pub fleet: FleetSettings,
}

fn default_provider() -> String {
    "docker".to_string()
}

fn default_timeout_factor() -> u32 {
    3
}

fn default_profile() -> String {
    "fleet".to_string()
}

fn default_stack_version() -> String {
    "8.0.0-SNAPSHOT".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            provider: default_provider(),
            timeout_factor: default_timeout_factor(),
            profile: default_profile(),
            stack_version: default_stack_version(),
            agent_version: default_stack_version(),
            fleet: FleetSettings::default(),
        }
    }
}

/// Control plane settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FleetSettings {
    #[serde(default = "default_kibana_url")]
    pub kibana_url: String,

    #[serde(default = "default_kibana_username")]
    pub kibana_username: String,

    #[serde(default = "default_fleet_url")]
    pub fleet_url: String,
}

fn default_kibana_url() -> String {
    "http://localhost:5601".to_string()
}

fn default_kibana_username() -> String {
    "elastic".to_string()
}

fn default_fleet_url() -> String {
    "http://fleet-server:8220".to_string()
}

impl Default for FleetSettings {
    fn default() -> Self {
        Self {
            kibana_url: default_kibana_url(),
            kibana_username: default_kibana_username(),
            fleet_url: default_fleet_url(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_settings_use_defaults() {
        let settings: Settings =
            serde_json::from_str(r#"{"provider": "remote", "fleet": {"kibana_url": "http://kibana:5601"}}"#)
                .unwrap();
        assert_eq!(settings.provider, "remote");
        assert_eq!(settings.timeout_factor, 3);
        assert_eq!(settings.profile, "fleet");
        assert_eq!(settings.fleet.kibana_url, "http://kibana:5601");
        assert_eq!(settings.fleet.fleet_url, "http://fleet-server:8220");
    }

    #[test]
    fn test_empty_settings_equal_default() {
        let settings: Settings = serde_json::from_str("{}").unwrap();
        assert_eq!(settings, Settings::default());
    }
}
