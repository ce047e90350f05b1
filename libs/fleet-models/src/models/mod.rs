//! API models

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Single-object response envelope (`{"item": ...}`)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemResponse<T> {
    pub item: T,
}

/// Paginated list envelope (`{"items": [...], "total": N}`)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemsResponse<T> {
    #[serde(default = "Vec::new")]
    pub items: Vec<T>,
    #[serde(default)]
    pub total: Option<u64>,
}

/// Legacy list envelope used by the enrollment keys endpoint (`{"list": [...]}`)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListResponse<T> {
    #[serde(default = "Vec::new")]
    pub list: Vec<T>,
}

/// Agent host metadata
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentHost {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub hostname: String,
}

/// Agent operating system metadata
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentOs {
    #[serde(default)]
    pub family: String,
    #[serde(default)]
    pub full: String,
    #[serde(default)]
    pub platform: String,
}

/// Agent binary metadata
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentBuild {
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub snapshot: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ElasticMetadata {
    #[serde(default)]
    pub agent: AgentBuild,
}

/// Metadata reported by the agent itself at enrollment
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LocalMetadata {
    #[serde(default)]
    pub host: AgentHost,
    #[serde(default)]
    pub os: AgentOs,
    #[serde(default)]
    pub elastic: ElasticMetadata,
}

/// An agent enrolled in Fleet
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Agent {
    pub id: String,
    #[serde(default)]
    pub policy_id: String,
    #[serde(default)]
    pub policy_revision: Option<i64>,
    #[serde(default)]
    pub local_metadata: LocalMetadata,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub active: Option<bool>,
    #[serde(default)]
    pub enrolled_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_checkin: Option<DateTime<Utc>>,
}

impl Agent {
    /// Whether this agent reports the given host name (either `name` or `hostname`)
    pub fn matches_host(&self, hostname: &str) -> bool {
        self.local_metadata.host.name == hostname || self.local_metadata.host.hostname == hostname
    }

    pub fn version(&self) -> &str {
        &self.local_metadata.elastic.agent.version
    }

    /// Reported version, `-SNAPSHOT` suffixed for snapshot builds
    pub fn full_version(&self) -> String {
        let build = &self.local_metadata.elastic.agent;
        if build.snapshot {
            format!("{}-SNAPSHOT", build.version)
        } else {
            build.version.clone()
        }
    }
}

/// Enrollment API key bound to a policy
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EnrollmentApiKey {
    #[serde(default)]
    pub active: bool,
    pub api_key: String,
    #[serde(default)]
    pub api_key_id: String,
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub policy_id: String,
}

/// Request body to create an enrollment key
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateEnrollmentApiKeyRequest {
    pub policy_id: String,
}

/// Agent policy
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Policy {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub is_default: bool,
    #[serde(default)]
    pub is_managed: bool,
    #[serde(default)]
    pub is_default_fleet_server: bool,
    /// Number of agents assigned to the policy
    #[serde(default, rename = "agents")]
    pub agents_count: u64,
    #[serde(default)]
    pub status: String,
}

/// Request body to create a policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatePolicyRequest {
    pub name: String,
    pub description: String,
    pub namespace: String,
    pub monitoring_enabled: Vec<String>,
}

/// Variable attached to an input or stream
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Var {
    pub value: serde_json::Value,
    #[serde(rename = "type", default)]
    pub kind: String,
}

pub type Vars = HashMap<String, Var>;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StreamDataStream {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub dataset: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stream {
    pub data_stream: StreamDataStream,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub id: String,
    #[serde(default, skip_serializing_if = "Vars::is_empty")]
    pub vars: Vars,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Input {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub streams: Vec<Stream>,
    #[serde(default, skip_serializing_if = "Vars::is_empty")]
    pub vars: Vars,
}

/// Integration package reference
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IntegrationPackage {
    pub name: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub version: String,
}

/// An integration attached to a policy
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PackagePolicy {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub namespace: String,
    pub policy_id: String,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub output_id: String,
    #[serde(default)]
    pub inputs: Vec<Input>,
    #[serde(default)]
    pub package: IntegrationPackage,
}

/// Data stream summary from the Fleet data streams endpoint
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DataStream {
    #[serde(default)]
    pub index: String,
    #[serde(default)]
    pub dataset: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub package: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DataStreamsResponse {
    #[serde(default)]
    pub data_streams: Vec<DataStream>,
}

/// Request bodies for agent actions
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnenrollRequest {
    pub revoke: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpgradeRequest {
    pub version: String,
}
