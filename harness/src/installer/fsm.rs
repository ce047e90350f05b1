//! Installer lifecycle state machine

use serde::{Deserialize, Serialize};

/// Where an installation stands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstallerState {
    /// Nothing staged on the host
    Uninstalled,

    /// Binaries downloaded and staged
    Fetched,

    /// Placed at the final path
    Installed,

    /// Registered with Fleet
    Enrolled,

    Running,

    Stopped,
}

/// Installer operation that completed successfully
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallerEvent {
    Preinstall,
    Install,
    Enroll,
    Postinstall,
    Start,
    Stop,
    Restart,
    Uninstall,
}

impl InstallerEvent {
    /// State the installation is in once the operation succeeded
    pub fn target(&self) -> InstallerState {
        match self {
            InstallerEvent::Preinstall => InstallerState::Fetched,
            InstallerEvent::Install => InstallerState::Installed,
            InstallerEvent::Enroll => InstallerState::Enrolled,
            InstallerEvent::Postinstall | InstallerEvent::Start | InstallerEvent::Restart => {
                InstallerState::Running
            }
            InstallerEvent::Stop => InstallerState::Stopped,
            InstallerEvent::Uninstall => InstallerState::Uninstalled,
        }
    }
}

/// Installer FSM
#[derive(Debug, Clone)]
pub struct InstallerFsm {
    state: InstallerState,
    history: Vec<(InstallerState, InstallerEvent, InstallerState)>,
}

impl InstallerFsm {
    /// Create a new FSM in uninstalled state
    pub fn new() -> Self {
        Self {
            state: InstallerState::Uninstalled,
            history: Vec::new(),
        }
    }

    pub fn state(&self) -> InstallerState {
        self.state
    }

    /// Transitions taken so far, as `(from, event, to)`
    pub fn history(&self) -> &[(InstallerState, InstallerEvent, InstallerState)] {
        &self.history
    }

    /// Process an event and transition state
    pub fn process(&mut self, event: InstallerEvent) -> Result<(), String> {
        let new_state = match (self.state, event) {
            (InstallerState::Uninstalled, InstallerEvent::Preinstall) => InstallerState::Fetched,
            // re-staging replaces the previous download
            (InstallerState::Fetched, InstallerEvent::Preinstall) => InstallerState::Fetched,

            (InstallerState::Fetched, InstallerEvent::Install) => InstallerState::Installed,

            // archive installs enroll with the staged binary's install subcommand
            (InstallerState::Fetched | InstallerState::Installed, InstallerEvent::Enroll) => {
                InstallerState::Enrolled
            }
            // re-enrolling is forced
            (InstallerState::Enrolled | InstallerState::Running | InstallerState::Stopped, InstallerEvent::Enroll) => {
                InstallerState::Enrolled
            }

            (InstallerState::Enrolled, InstallerEvent::Postinstall) => InstallerState::Running,

            (InstallerState::Enrolled | InstallerState::Running | InstallerState::Stopped, InstallerEvent::Start)
            | (InstallerState::Enrolled | InstallerState::Running | InstallerState::Stopped, InstallerEvent::Restart) => {
                InstallerState::Running
            }
            (InstallerState::Running | InstallerState::Stopped, InstallerEvent::Stop) => InstallerState::Stopped,

            // uninstalling is idempotent
            (_, InstallerEvent::Uninstall) => InstallerState::Uninstalled,

            // Invalid transitions
            (state, event) => {
                return Err(format!("Invalid transition: {:?} -> {:?}", state, event));
            }
        };

        self.history.push((self.state, event, new_state));
        self.state = new_state;
        Ok(())
    }

    /// Move to the event's target without checking the transition
    pub fn force(&mut self, event: InstallerEvent) {
        let target = event.target();
        self.history.push((self.state, event, target));
        self.state = target;
    }
}

impl Default for InstallerFsm {
    fn default() -> Self {
        Self::new()
    }
}
