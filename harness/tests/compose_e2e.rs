//! Full scenario against a local docker compose stack.
//!
//! Needs a docker daemon and network access to the artifact services:
//! `cargo test --test compose_e2e -- --ignored`

use std::sync::Arc;

use e2e_harness::app::options::HarnessOptions;
use e2e_harness::app::run::{bootstrap, destroy};
use e2e_harness::deploy::{new_deployment, ServiceRequest};
use e2e_harness::downloads::{ArtifactFetcher, DownloadCache};
use e2e_harness::fleet::FleetClient;
use e2e_harness::installer::PackageKind;
use e2e_harness::lifecycle::AgentScenario;
use e2e_harness::shell::args;

#[tokio::test]
#[ignore]
async fn test_deb_agent_enrolls_and_unenrolls() {
    let options = HarnessOptions::from_env().unwrap();
    bootstrap(&options).await.unwrap();

    let deployment = new_deployment(&options).unwrap();
    let fleet = Arc::new(FleetClient::new(&options.fleet, options.timeout_factor).unwrap());
    let fetcher = Arc::new(
        ArtifactFetcher::new(
            options.artifacts.clone(),
            options.timeout_factor,
            options.layout.downloads_dir(),
            Arc::new(DownloadCache::new()),
        )
        .unwrap(),
    );

    let profile = ServiceRequest::new(options.profile.clone());
    let agent = ServiceRequest::container("elastic-agent").with_flavour("debian");
    deployment
        .add(&profile, std::slice::from_ref(&agent), &options.profile_env)
        .await
        .unwrap();

    let manifest = deployment.inspect(&profile, &agent).await.unwrap();
    assert!(!manifest.hostname.is_empty());
    let hostname = deployment
        .exec_in(&profile, &agent, &args(["cat", "/etc/hostname"]))
        .await
        .unwrap();
    assert_eq!(hostname, manifest.hostname);

    let mut scenario = AgentScenario::new(
        &options,
        deployment.clone(),
        fetcher,
        fleet.clone(),
        PackageKind::Deb,
        agent.clone(),
    )
    .unwrap();

    let policy = fleet.default_policy(false).await.unwrap();
    scenario.install_and_enroll(&policy).await.unwrap();
    scenario.expect_agent_running().await.unwrap();
    scenario.expect_status("online").await.unwrap();
    scenario.unenroll_and_expect("offline").await.unwrap();
    scenario.uninstall_best_effort().await;

    deployment
        .remove(&profile, std::slice::from_ref(&agent), &options.profile_env)
        .await
        .unwrap();
    destroy(&options).await.unwrap();
}
