//! Service addressing

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};

/// A logical unit to deploy, independent of the backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceRequest {
    pub name: String,
    /// Variant of the service, e.g. the OS image (`debian`, `centos`)
    pub flavour: Option<String>,
    /// Replica index, never below 1
    #[serde(default = "default_scale", deserialize_with = "clamped_scale")]
    scale: u32,
    pub version: Option<String>,
    /// The service is backed by a container rather than a host
    pub is_container: bool,
    /// Processes the installer stages before the service itself
    pub background_processes: Vec<String>,
}

impl ServiceRequest {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            flavour: None,
            scale: 1,
            version: None,
            is_container: false,
            background_processes: Vec::new(),
        }
    }

    /// A request for a container-backed service
    pub fn container(name: impl Into<String>) -> Self {
        Self::new(name).as_container()
    }

    pub fn with_flavour(mut self, flavour: impl Into<String>) -> Self {
        let flavour = flavour.into();
        self.flavour = if flavour.is_empty() { None } else { Some(flavour) };
        self
    }

    /// Set the replica index. Values below 1 are clamped to 1.
    pub fn with_scale(mut self, scale: i64) -> Self {
        self.scale = scale.clamp(1, u32::MAX as i64) as u32;
        self
    }

    pub fn scale(&self) -> u32 {
        self.scale
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn with_background_process(mut self, process: impl Into<String>) -> Self {
        self.background_processes.push(process.into());
        self
    }

    pub fn as_container(mut self) -> Self {
        self.is_container = true;
        self
    }

    /// `name`, or `name-flavour` when a flavour is set
    pub fn service_name(&self) -> String {
        match &self.flavour {
            Some(flavour) => format!("{}-{}", self.name, flavour),
            None => self.name.clone(),
        }
    }

    /// Relative location of the service definition: `name` or `name/flavour`
    pub fn compose_path(&self) -> String {
        match &self.flavour {
            Some(flavour) => format!("{}/{}", self.name, flavour),
            None => self.name.clone(),
        }
    }

    /// Deterministic container name for this replica within `profile`
    pub fn container_name(&self, profile: &str) -> String {
        format!("{}_{}_{}", profile, self.service_name(), self.scale)
    }

    /// Two requests address the same deployable when name and flavour match
    pub fn same_deployable(&self, other: &ServiceRequest) -> bool {
        self.name == other.name && self.flavour == other.flavour
    }
}

fn default_scale() -> u32 {
    1
}

fn clamped_scale<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    let scale = i64::deserialize(deserializer)?;
    Ok(scale.clamp(1, u32::MAX as i64) as u32)
}

impl fmt::Display for ServiceRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.service_name(), self.scale)
    }
}

/// Live identity of a deployed service, always re-derived from the backend
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ServiceManifest {
    pub id: String,
    pub name: String,
    /// How to reach the service (`docker://<name>`, deployment name, ...)
    pub connection: String,
    /// Network alias
    pub alias: String,
    pub hostname: String,
    /// `linux`, `macos`, `windows`
    pub platform: String,
}

/// Paths an installer reports about its installation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OperatorManifest {
    /// File fingerprinting the installed build
    pub commit_file: String,
    pub work_dir: String,
}

/// Static description of an installer package
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstallerMetadata {
    pub agent_path: String,
    pub arch: String,
    pub docker: bool,
    pub file_extension: String,
    pub os: String,
    pub package_type: String,
    pub x_pack: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_without_flavour() {
        let request = ServiceRequest::new("elastic-agent");
        assert_eq!(request.service_name(), "elastic-agent");
        assert_eq!(request.compose_path(), "elastic-agent");
        assert_eq!(request.container_name("fleet"), "fleet_elastic-agent_1");
    }

    #[test]
    fn test_names_with_flavour() {
        let request = ServiceRequest::new("elastic-agent").with_flavour("centos").with_scale(2);
        assert_eq!(request.service_name(), "elastic-agent-centos");
        assert_eq!(request.compose_path(), "elastic-agent/centos");
        assert_eq!(request.container_name("fleet"), "fleet_elastic-agent-centos_2");
        assert_eq!(request.to_string(), "elastic-agent-centos#2");
    }

    #[test]
    fn test_empty_flavour_is_none() {
        assert_eq!(ServiceRequest::new("agent").with_flavour("").flavour, None);
    }

    #[test]
    fn test_same_deployable_ignores_scale() {
        let a = ServiceRequest::new("agent").with_flavour("debian").with_scale(1);
        let b = ServiceRequest::new("agent").with_flavour("debian").with_scale(3);
        let c = ServiceRequest::new("agent").with_flavour("centos");
        assert!(a.same_deployable(&b));
        assert!(!a.same_deployable(&c));
    }

    #[test]
    fn test_deserialized_scale_is_clamped() {
        let zero: ServiceRequest = serde_json::from_str(
            r#"{"name": "elastic-agent", "flavour": null, "scale": 0, "version": null,
                "is_container": true, "background_processes": []}"#,
        )
        .unwrap();
        assert_eq!(zero.scale(), 1);
        assert_eq!(zero.container_name("fleet"), "fleet_elastic-agent_1");

        let negative: ServiceRequest = serde_json::from_str(
            r#"{"name": "elastic-agent", "flavour": "debian", "scale": -3, "version": null,
                "is_container": true, "background_processes": []}"#,
        )
        .unwrap();
        assert_eq!(negative.scale(), 1);
    }
}
