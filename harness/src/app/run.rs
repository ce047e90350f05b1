//! Bootstrap and teardown of the test environment

use std::sync::Arc;

use futures::FutureExt;
use tracing::{error, info};

use crate::app::options::HarnessOptions;
use crate::deploy::{new_deployment, ServiceRequest, WaitCallback};
use crate::errors::HarnessError;
use crate::fleet::FleetClient;

/// Callback waiting for Kibana, then Fleet, to answer
pub fn control_plane_ready(fleet: Arc<FleetClient>) -> WaitCallback {
    Box::new(move || {
        async move {
            fleet.wait_for_ready().await?;
            fleet.wait_for_fleet().await
        }
        .boxed()
    })
}

/// Start the profile and wait for its control plane
pub async fn bootstrap(options: &HarnessOptions) -> Result<(), HarnessError> {
    options.layout.setup().await?;

    let deployment = new_deployment(options)?;
    let fleet = Arc::new(FleetClient::new(&options.fleet, options.timeout_factor)?);
    let profile = ServiceRequest::new(options.profile.clone());

    info!(
        "Bootstrapping the {} profile with the {} provider (stack {}, agent {})",
        options.profile, options.provider, options.stack_version, options.agent_version
    );

    deployment.pre_bootstrap().await.map_err(|e| {
        error!("Pre-bootstrap failed: {}", e);
        e
    })?;
    deployment
        .bootstrap(&profile, &options.profile_env, control_plane_ready(fleet))
        .await?;

    info!("The {} profile is ready", options.profile);
    Ok(())
}

/// Tear the profile down
pub async fn destroy(options: &HarnessOptions) -> Result<(), HarnessError> {
    let deployment = new_deployment(options)?;
    let profile = ServiceRequest::new(options.profile.clone());
    deployment.destroy(&profile).await?;
    info!("The {} profile was destroyed", options.profile);
    Ok(())
}
