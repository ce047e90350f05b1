//! Persisted state of a running deployment
//!
//! A run is keyed by an identifier such as `fleet-profile` and stored as
//! `<workdir>/<id>.run` in YAML. It records the environment last applied to
//! the deployment and the compose files involved, so a later invocation can
//! re-enter the running deployment and merge new settings on top.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{error, trace, warn};

use crate::errors::HarnessError;
use crate::filesys::file::File;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateService {
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunState {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub profile: Option<StateService>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub services: Vec<StateService>,
}

fn state_file(workdir: &Path, id: &str) -> File {
    File::new(workdir.join(format!("{}.run", id)))
}

/// Name of the directory holding a compose file
fn parent_name(path: &Path) -> String {
    path.parent()
        .and_then(|p| p.file_name())
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

impl RunState {
    /// Load the state for `id`. A missing or unreadable file yields an empty state.
    pub async fn recover(workdir: &Path, id: &str) -> RunState {
        let file = state_file(workdir, id);
        if !file.exists().await {
            return RunState::default();
        }

        match file.read_yaml::<RunState>().await {
            Ok(state) => state,
            Err(e) => {
                error!("Could not read state {}: {}", file.path().display(), e);
                RunState::default()
            }
        }
    }

    /// Overwrite the state for `id` with the environment just applied
    pub async fn update(
        workdir: &Path,
        id: &str,
        compose_files: &[PathBuf],
        env: &HashMap<String, String>,
    ) -> Result<RunState, HarnessError> {
        let profile = match compose_files.first() {
            Some(first) if id.ends_with("-profile") => Some(StateService {
                name: parent_name(first),
            }),
            _ => None,
        };

        let state = RunState {
            id: id.to_string(),
            profile,
            env: env.clone(),
            services: compose_files
                .iter()
                .skip(1)
                .map(|f| StateService {
                    name: parent_name(f),
                })
                .collect(),
        };

        let file = state_file(workdir, id);
        file.write_yaml(&state).await?;
        trace!("State updated: {}", file.path().display());
        Ok(state)
    }

    /// Remove the state for `id`
    pub async fn destroy(workdir: &Path, id: &str) {
        let file = state_file(workdir, id);
        if let Err(e) = file.delete().await {
            warn!("Could not destroy state {}: {}", file.path().display(), e);
            return;
        }
        trace!("State destroyed: {}", file.path().display());
    }
}
