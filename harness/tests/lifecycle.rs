//! Fleet-facing waits and service bookkeeping

use std::collections::HashMap;
use std::path::PathBuf;

use e2e_harness::app::options::FleetOptions;
use e2e_harness::deploy::ServiceRequest;
use e2e_harness::errors::HarnessError;
use e2e_harness::fleet::FleetClient;
use e2e_harness::lifecycle::{wait_for_agent_status, wait_for_agent_version};
use e2e_harness::storage::run_state::RunState;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn fleet_for(server: &MockServer) -> FleetClient {
    let options = FleetOptions {
        kibana_url: server.uri(),
        ..FleetOptions::default()
    };
    FleetClient::new(&options, 1).unwrap()
}

#[tokio::test]
async fn test_offline_without_agent_succeeds() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/fleet/agents"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "items": [], "total": 0 })))
        .expect(1)
        .mount(&server)
        .await;

    let fleet = fleet_for(&server);
    wait_for_agent_status(&fleet, "gone-host", "offline", 1).await.unwrap();
}

#[tokio::test]
async fn test_unreachable_control_plane_is_not_retried() {
    let options = FleetOptions {
        kibana_url: "http://127.0.0.1:1".to_string(),
        ..FleetOptions::default()
    };
    let fleet = FleetClient::new(&options, 1).unwrap();

    let err = wait_for_agent_status(&fleet, "any-host", "online", 1).await.unwrap_err();
    assert!(matches!(err, HarnessError::Unreachable(_)), "{err}");
}

#[tokio::test]
async fn test_agent_version_includes_snapshot_suffix() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/fleet/agents"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "items": [{"id": "a1", "status": "online", "local_metadata": {"host": {"name": "agent-host"}}}]
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/fleet/agents/a1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "item": {"id": "a1", "status": "online",
                     "local_metadata": {"elastic": {"agent": {"version": "8.0.0", "snapshot": true}}}}
        })))
        .mount(&server)
        .await;

    let fleet = fleet_for(&server);
    wait_for_agent_version(&fleet, "agent-host", "8.0.0-SNAPSHOT", std::time::Duration::from_secs(5))
        .await
        .unwrap();
}

#[test]
fn test_scale_is_clamped_and_named() {
    let agent = ServiceRequest::new("elastic-agent").with_flavour("debian").with_scale(0);
    assert_eq!(agent.scale(), 1);
    assert_eq!(agent.service_name(), "elastic-agent-debian");
    assert_eq!(agent.compose_path(), "elastic-agent/debian");
    assert_eq!(agent.container_name("fleet"), "fleet_elastic-agent-debian_1");

    let third = agent.clone().with_scale(3);
    assert_eq!(third.to_string(), "elastic-agent-debian#3");
    assert!(third.same_deployable(&agent));
}

#[tokio::test]
async fn test_run_state_survives_a_new_process() {
    let workdir = tempfile::tempdir().unwrap();
    let compose_files = vec![
        PathBuf::from("/op/compose/profiles/fleet/docker-compose.yml"),
        PathBuf::from("/op/compose/services/elastic-agent/docker-compose.yml"),
    ];
    let mut env = HashMap::new();
    env.insert("stackVersion".to_string(), "8.0.0-SNAPSHOT".to_string());

    let written = RunState::update(workdir.path(), "fleet-profile", &compose_files, &env)
        .await
        .unwrap();
    let recovered = RunState::recover(workdir.path(), "fleet-profile").await;

    assert_eq!(recovered, written);
    assert_eq!(recovered.profile.map(|p| p.name).as_deref(), Some("fleet"));
    assert_eq!(recovered.services.len(), 1);
    assert_eq!(recovered.env.get("stackVersion").map(String::as_str), Some("8.0.0-SNAPSHOT"));

    RunState::destroy(workdir.path(), "fleet-profile").await;
    assert_eq!(RunState::recover(workdir.path(), "fleet-profile").await, RunState::default());
}
