//! Fleet control-plane HTTP client

use std::time::Duration;

use fleet_models::{
    Agent, CreateEnrollmentApiKeyRequest, CreatePolicyRequest, DataStream, DataStreamsResponse,
    EnrollmentApiKey, ItemResponse, ItemsResponse, ListResponse, PackagePolicy, Policy,
    UnenrollRequest, UpgradeRequest,
};
use reqwest::{header, Client, Method, RequestBuilder, Response};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, trace};

use crate::app::options::FleetOptions;
use crate::backoff::{self, ExponentialBackoff};
use crate::downloads::versions::remove_commit;
use crate::errors::HarnessError;
use crate::utils::generate_uuid;

/// Prefix of every Fleet resource
pub const FLEET_API: &str = "/api/fleet";

#[derive(Debug, Deserialize)]
struct FleetSetupStatus {
    #[serde(rename = "isReady", default)]
    is_ready: bool,
}

#[derive(Debug, Serialize)]
struct DeletePackagePoliciesRequest<'a> {
    #[serde(rename = "packagePolicyIds")]
    package_policy_ids: Vec<&'a str>,
}

#[derive(Debug, Serialize)]
struct SetupRequest {
    #[serde(rename = "forceRecreate")]
    force_recreate: bool,
}

/// Client for the Kibana Fleet API
pub struct FleetClient {
    client: Client,
    base_url: String,
    username: String,
    password: SecretString,
    timeout_factor: u32,
}

impl std::fmt::Debug for FleetClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FleetClient")
            .field("base_url", &self.base_url)
            .field("username", &self.username)
            .finish()
    }
}

impl FleetClient {
    pub fn new(options: &FleetOptions, timeout_factor: u32) -> Result<Self, HarnessError> {
        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;

        Ok(Self {
            client,
            base_url: options.kibana_url.trim_end_matches('/').to_string(),
            username: options.kibana_username.clone(),
            password: options.kibana_password.clone(),
            timeout_factor,
        })
    }

    /// Kibana root URL
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        self.client
            .request(method, url)
            .basic_auth(&self.username, Some(self.password.expose_secret()))
            .header(header::CONTENT_TYPE, "application/json")
            .header("kbn-xsrf", format!("e2e-tests-{}", generate_uuid()))
    }

    async fn send(&self, method: Method, path: &str, request: RequestBuilder) -> Result<Response, HarnessError> {
        let url = format!("{}{}", self.base_url, path);
        debug!("{} {}", method, url);

        let response = request.send().await.map_err(|e| {
            if e.is_connect() {
                HarnessError::Unreachable(format!("could not connect to {}: {}", url, e))
            } else {
                HarnessError::HttpError(e)
            }
        })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!("{} {} failed: {} - {}", method, url, status, body);
            return Err(HarnessError::ControlPlane {
                status: status.as_u16(),
                body,
            });
        }

        Ok(response)
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, HarnessError> {
        let url = format!("{}{}", self.base_url, path);
        let response = self.send(Method::GET, path, self.request(Method::GET, &url)).await?;
        Ok(response.json().await?)
    }

    async fn post<T: DeserializeOwned, B: Serialize>(&self, path: &str, body: &B) -> Result<T, HarnessError> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .send(Method::POST, path, self.request(Method::POST, &url).json(body))
            .await?;
        Ok(response.json().await?)
    }

    async fn put<T: DeserializeOwned, B: Serialize>(&self, path: &str, body: &B) -> Result<T, HarnessError> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .send(Method::PUT, path, self.request(Method::PUT, &url).json(body))
            .await?;
        Ok(response.json().await?)
    }

    async fn delete(&self, path: &str) -> Result<(), HarnessError> {
        let url = format!("{}{}", self.base_url, path);
        self.send(Method::DELETE, path, self.request(Method::DELETE, &url))
            .await?;
        Ok(())
    }

    // Agents

    pub async fn list_agents(&self) -> Result<Vec<Agent>, HarnessError> {
        let resp: ItemsResponse<Agent> = self.get(&format!("{}/agents", FLEET_API)).await?;
        Ok(resp.items)
    }

    pub async fn get_agent(&self, agent_id: &str) -> Result<Agent, HarnessError> {
        let resp: ItemResponse<Agent> = self.get(&format!("{}/agents/{}", FLEET_API, agent_id)).await?;
        Ok(resp.item)
    }

    /// First agent listed for `hostname`; `NotFound` when none is
    pub async fn agent_by_hostname(&self, hostname: &str) -> Result<Agent, HarnessError> {
        let agents = self.list_agents().await?;
        let agent = agents
            .into_iter()
            .find(|agent| agent.matches_host(hostname))
            .ok_or_else(|| HarnessError::NotFound(format!("no agent listed for host {}", hostname)))?;

        trace!("Agent {} found for host {}", agent.id, hostname);
        Ok(agent)
    }

    pub async fn agent_id(&self, hostname: &str) -> Result<String, HarnessError> {
        Ok(self.agent_by_hostname(hostname).await?.id)
    }

    /// Current status of the agent enrolled from `hostname`
    pub async fn agent_status(&self, hostname: &str) -> Result<String, HarnessError> {
        let id = self.agent_id(hostname).await?;
        let agent = self.get_agent(&id).await?;
        Ok(agent.status)
    }

    pub async fn agent_version(&self, hostname: &str) -> Result<String, HarnessError> {
        let id = self.agent_id(hostname).await?;
        let agent = self.get_agent(&id).await?;
        Ok(agent.full_version())
    }

    /// Unenroll and revoke the agent of `hostname`
    pub async fn unenroll(&self, hostname: &str) -> Result<(), HarnessError> {
        let id = self.agent_id(hostname).await?;
        let _: serde_json::Value = self
            .post(
                &format!("{}/agents/{}/unenroll", FLEET_API, id),
                &UnenrollRequest { revoke: true },
            )
            .await?;
        info!("Agent {} of host {} unenrolled", id, hostname);
        Ok(())
    }

    /// Ask the agent of `hostname` to upgrade; commit suffixes are dropped
    pub async fn upgrade(&self, hostname: &str, version: &str) -> Result<(), HarnessError> {
        let id = self.agent_id(hostname).await?;
        let request = UpgradeRequest {
            version: remove_commit(version),
        };
        let _: serde_json::Value = self
            .post(&format!("{}/agents/{}/upgrade", FLEET_API, id), &request)
            .await?;
        info!("Agent {} of host {} upgrading to {}", id, hostname, request.version);
        Ok(())
    }

    // Enrollment keys

    pub async fn create_enrollment_key(&self, policy: &Policy) -> Result<EnrollmentApiKey, HarnessError> {
        let request = CreateEnrollmentApiKeyRequest {
            policy_id: policy.id.clone(),
        };
        let resp: ItemResponse<EnrollmentApiKey> = self
            .post(&format!("{}/enrollment-api-keys", FLEET_API), &request)
            .await?;
        debug!("Enrollment key {} created for policy {}", resp.item.id, policy.id);
        Ok(resp.item)
    }

    pub async fn delete_enrollment_key(&self, key_id: &str) -> Result<(), HarnessError> {
        self.delete(&format!("{}/enrollment-api-keys/{}", FLEET_API, key_id))
            .await
    }

    pub async fn list_enrollment_keys(&self) -> Result<Vec<EnrollmentApiKey>, HarnessError> {
        let resp: ListResponse<EnrollmentApiKey> = self
            .get(&format!("{}/enrollment-api-keys", FLEET_API))
            .await?;
        Ok(resp.list)
    }

    // Policies

    pub async fn list_policies(&self) -> Result<Vec<Policy>, HarnessError> {
        let resp: ItemsResponse<Policy> = self.get(&format!("{}/agent_policies", FLEET_API)).await?;
        Ok(resp.items)
    }

    pub async fn get_policy(&self, policy_id: &str) -> Result<Policy, HarnessError> {
        let resp: ItemResponse<Policy> = self
            .get(&format!("{}/agent_policies/{}", FLEET_API, policy_id))
            .await?;
        Ok(resp.item)
    }

    /// The default agent policy, or the default fleet-server policy
    pub async fn default_policy(&self, fleet_server: bool) -> Result<Policy, HarnessError> {
        let policies = self.list_policies().await?;
        policies
            .into_iter()
            .find(|p| if fleet_server { p.is_default_fleet_server } else { p.is_default })
            .ok_or_else(|| HarnessError::NotFound("could not obtain default policy".to_string()))
    }

    /// A fresh policy in the `default` namespace with monitoring enabled
    pub async fn create_policy(&self) -> Result<Policy, HarnessError> {
        let suffix = generate_uuid();
        let request = CreatePolicyRequest {
            name: format!("test-policy-{}", suffix),
            description: format!("Test policy {}", suffix),
            namespace: "default".to_string(),
            monitoring_enabled: vec!["logs".to_string(), "metrics".to_string()],
        };
        let resp: ItemResponse<Policy> = self
            .post(&format!("{}/agent_policies", FLEET_API), &request)
            .await?;
        info!("Policy {} created", resp.item.id);
        Ok(resp.item)
    }

    pub async fn list_package_policies(&self) -> Result<Vec<PackagePolicy>, HarnessError> {
        let resp: ItemsResponse<PackagePolicy> = self
            .get(&format!("{}/package_policies", FLEET_API))
            .await?;
        Ok(resp.items)
    }

    pub async fn get_package_policy(&self, id: &str) -> Result<PackagePolicy, HarnessError> {
        let resp: ItemResponse<PackagePolicy> = self
            .get(&format!("{}/package_policies/{}", FLEET_API, id))
            .await?;
        Ok(resp.item)
    }

    /// Attach an integration to a policy
    pub async fn add_package_policy(&self, package_policy: &PackagePolicy) -> Result<PackagePolicy, HarnessError> {
        let resp: ItemResponse<PackagePolicy> = self
            .post(&format!("{}/package_policies", FLEET_API), package_policy)
            .await?;
        Ok(resp.item)
    }

    pub async fn update_package_policy(&self, package_policy: &PackagePolicy) -> Result<PackagePolicy, HarnessError> {
        if package_policy.id.is_empty() {
            return Err(HarnessError::ValidationError(
                "package policy without id cannot be updated".to_string(),
            ));
        }

        // the id is part of the path and rejected in the body
        let mut body = package_policy.clone();
        body.id.clear();

        let resp: ItemResponse<PackagePolicy> = self
            .put(&format!("{}/package_policies/{}", FLEET_API, package_policy.id), &body)
            .await?;
        Ok(resp.item)
    }

    pub async fn delete_package_policy(&self, id: &str) -> Result<(), HarnessError> {
        let request = DeletePackagePoliciesRequest {
            package_policy_ids: vec![id],
        };
        let _: serde_json::Value = self
            .post(&format!("{}/package_policies/delete", FLEET_API), &request)
            .await?;
        Ok(())
    }

    // Data streams

    pub async fn list_data_streams(&self) -> Result<Vec<DataStream>, HarnessError> {
        let resp: DataStreamsResponse = self.get(&format!("{}/data_streams", FLEET_API)).await?;
        Ok(resp.data_streams)
    }

    // Setup and readiness

    /// Recreate Fleet's default setup
    pub async fn setup(&self) -> Result<(), HarnessError> {
        let _: serde_json::Value = self
            .post(&format!("{}/setup", FLEET_API), &SetupRequest { force_recreate: true })
            .await?;
        info!("Fleet setup recreated");
        Ok(())
    }

    /// Poll Kibana's status endpoint until it answers, within `2 minutes × factor`
    pub async fn wait_for_ready(&self) -> Result<(), HarnessError> {
        let policy = ExponentialBackoff::scaled(self.timeout_factor, Duration::from_secs(120));
        backoff::retry_with_context(&policy, "kibana status", |_| async move {
            let _: serde_json::Value = self.get("/api/status").await.map_err(not_ready)?;
            Ok(())
        })
        .await?;

        info!("The Kibana instance is healthy");
        Ok(())
    }

    /// Poll Fleet's setup endpoint until it reports ready
    pub async fn wait_for_fleet(&self) -> Result<(), HarnessError> {
        let policy = ExponentialBackoff::scaled(self.timeout_factor, Duration::from_secs(120));
        backoff::retry_with_context(&policy, "fleet setup", |_| async move {
            let status: FleetSetupStatus = self
                .get(&format!("{}/agents/setup", FLEET_API))
                .await
                .map_err(not_ready)?;
            if !status.is_ready {
                return Err(HarnessError::NotReady("Fleet is not ready".to_string()));
            }
            Ok(())
        })
        .await?;

        info!("Fleet setup complete");
        Ok(())
    }
}

/// A control plane that is still starting is worth polling again
fn not_ready(err: HarnessError) -> HarnessError {
    match err {
        HarnessError::Unreachable(msg) => HarnessError::NotReady(msg),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> FleetClient {
        let options = FleetOptions {
            kibana_url: server.uri(),
            ..FleetOptions::default()
        };
        FleetClient::new(&options, 1).unwrap()
    }

    fn agents_body() -> serde_json::Value {
        serde_json::json!({
            "items": [
                {"id": "a1", "status": "online", "local_metadata": {"host": {"name": "host-a"}}},
                {"id": "a2", "status": "offline", "local_metadata": {"host": {"name": "host-b"}}}
            ],
            "total": 2
        })
    }

    #[tokio::test]
    async fn test_agent_status_by_hostname() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/fleet/agents"))
            .and(header_exists("kbn-xsrf"))
            .and(header_exists("authorization"))
            .respond_with(ResponseTemplate::new(200).set_body_json(agents_body()))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/fleet/agents/a2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "item": {"id": "a2", "status": "offline",
                         "local_metadata": {"elastic": {"agent": {"version": "8.0.0"}}}}
            })))
            .mount(&server)
            .await;

        let client = client_for(&server);
        assert_eq!(client.agent_status("host-b").await.unwrap(), "offline");
        assert_eq!(client.agent_version("host-b").await.unwrap(), "8.0.0");
    }

    #[tokio::test]
    async fn test_missing_agent_is_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/fleet/agents"))
            .respond_with(ResponseTemplate::new(200).set_body_json(agents_body()))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let err = client.agent_status("host-z").await.unwrap_err();
        assert!(matches!(err, HarnessError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_unenroll_revokes() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/fleet/agents"))
            .respond_with(ResponseTemplate::new(200).set_body_json(agents_body()))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/fleet/agents/a1/unenroll"))
            .and(body_json(serde_json::json!({"revoke": true})))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server);
        client.unenroll("host-a").await.unwrap();
    }

    #[tokio::test]
    async fn test_upgrade_strips_commit() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/fleet/agents"))
            .respond_with(ResponseTemplate::new(200).set_body_json(agents_body()))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/fleet/agents/a1/upgrade"))
            .and(body_json(serde_json::json!({"version": "8.0.0-SNAPSHOT"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server);
        client.upgrade("host-a", "8.0.0-abcdef12-SNAPSHOT").await.unwrap();
    }

    #[tokio::test]
    async fn test_non_success_is_control_plane_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/fleet/enrollment-api-keys"))
            .respond_with(ResponseTemplate::new(400).set_body_string("policy not found"))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let policy = Policy {
            id: "missing".into(),
            name: "missing".into(),
            ..Default::default()
        };
        let err = client.create_enrollment_key(&policy).await.unwrap_err();
        match err {
            HarnessError::ControlPlane { status, body } => {
                assert_eq!(status, 400);
                assert_eq!(body, "policy not found");
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_default_policy_selection() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/fleet/agent_policies"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "items": [
                    {"id": "fs", "name": "Fleet Server Policy", "is_default_fleet_server": true},
                    {"id": "def", "name": "Default", "is_default": true}
                ]
            })))
            .mount(&server)
            .await;

        let client = client_for(&server);
        assert_eq!(client.default_policy(false).await.unwrap().id, "def");
        assert_eq!(client.default_policy(true).await.unwrap().id, "fs");
    }

    #[tokio::test]
    async fn test_enrollment_keys_use_list_envelope() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/fleet/enrollment-api-keys"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "list": [{"id": "k1", "api_key": "secret", "policy_id": "def", "active": true}]
            })))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let keys = client.list_enrollment_keys().await.unwrap();
        assert_eq!(keys.len(), 1);
        assert_eq!(keys[0].api_key, "secret");
    }

    #[tokio::test]
    async fn test_connection_refused_is_unreachable() {
        let options = FleetOptions {
            kibana_url: "http://127.0.0.1:1".to_string(),
            ..FleetOptions::default()
        };
        let client = FleetClient::new(&options, 1).unwrap();
        let err = client.list_agents().await.unwrap_err();
        assert!(matches!(err, HarnessError::Unreachable(_)));
    }
}
