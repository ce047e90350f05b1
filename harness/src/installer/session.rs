//! Installer wrapper tracking the lifecycle state
//!
//! Calls are forwarded whatever the current state; an out-of-order call is
//! only logged. The backend reports the actual failure, if any.

use std::path::PathBuf;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::deploy::{InstallerMetadata, OperatorManifest};
use crate::errors::HarnessError;
use crate::installer::fsm::{InstallerEvent, InstallerFsm, InstallerState};
use crate::installer::Installer;

pub struct InstallerSession {
    inner: Box<dyn Installer>,
    fsm: Mutex<InstallerFsm>,
}

impl InstallerSession {
    pub fn new(inner: Box<dyn Installer>) -> Self {
        Self {
            inner,
            fsm: Mutex::new(InstallerFsm::new()),
        }
    }

    pub async fn state(&self) -> InstallerState {
        self.fsm.lock().await.state()
    }

    pub async fn history(&self) -> Vec<(InstallerState, InstallerEvent, InstallerState)> {
        self.fsm.lock().await.history().to_vec()
    }

    async fn check(&self, event: InstallerEvent) {
        let fsm = self.fsm.lock().await;
        let mut probe = fsm.clone();
        if let Err(e) = probe.process(event) {
            warn!(
                "{} called out of order ({}), forwarding to the {} installer anyway",
                event_name(event),
                e,
                self.inner.metadata().package_type
            );
        }
    }

    async fn record(&self, event: InstallerEvent) {
        let mut fsm = self.fsm.lock().await;
        if fsm.process(event).is_err() {
            fsm.force(event);
        }
        debug!("Installer is now {:?}", fsm.state());
    }

    async fn tracked<F>(&self, event: InstallerEvent, op: F) -> Result<(), HarnessError>
    where
        F: std::future::Future<Output = Result<(), HarnessError>> + Send,
    {
        self.check(event).await;
        op.await?;
        self.record(event).await;
        Ok(())
    }
}

fn event_name(event: InstallerEvent) -> &'static str {
    match event {
        InstallerEvent::Preinstall => "preinstall",
        InstallerEvent::Install => "install",
        InstallerEvent::Enroll => "enroll",
        InstallerEvent::Postinstall => "postinstall",
        InstallerEvent::Start => "start",
        InstallerEvent::Stop => "stop",
        InstallerEvent::Restart => "restart",
        InstallerEvent::Uninstall => "uninstall",
    }
}

#[async_trait]
impl Installer for InstallerSession {
    async fn add_files(&self, files: &[PathBuf]) -> Result<(), HarnessError> {
        self.inner.add_files(files).await
    }

    async fn enroll(&self, token: &str, extra_flags: &str) -> Result<(), HarnessError> {
        self.tracked(InstallerEvent::Enroll, self.inner.enroll(token, extra_flags))
            .await
    }

    async fn exec(&self, cmd: &[String]) -> Result<String, HarnessError> {
        self.inner.exec(cmd).await
    }

    fn inspect(&self) -> OperatorManifest {
        self.inner.inspect()
    }

    async fn install(&self) -> Result<(), HarnessError> {
        self.tracked(InstallerEvent::Install, self.inner.install()).await
    }

    async fn install_certs(&self) -> Result<(), HarnessError> {
        self.inner.install_certs().await
    }

    async fn logs(&self) -> Result<String, HarnessError> {
        self.inner.logs().await
    }

    async fn postinstall(&self) -> Result<(), HarnessError> {
        self.tracked(InstallerEvent::Postinstall, self.inner.postinstall())
            .await
    }

    async fn preinstall(&self) -> Result<(), HarnessError> {
        self.tracked(InstallerEvent::Preinstall, self.inner.preinstall())
            .await
    }

    async fn restart(&self) -> Result<(), HarnessError> {
        self.tracked(InstallerEvent::Restart, self.inner.restart()).await
    }

    async fn start(&self) -> Result<(), HarnessError> {
        self.tracked(InstallerEvent::Start, self.inner.start()).await
    }

    async fn stop(&self) -> Result<(), HarnessError> {
        self.tracked(InstallerEvent::Stop, self.inner.stop()).await
    }

    async fn uninstall(&self) -> Result<(), HarnessError> {
        self.tracked(InstallerEvent::Uninstall, self.inner.uninstall())
            .await
    }

    async fn upgrade(&self, version: &str) -> Result<(), HarnessError> {
        self.inner.upgrade(version).await
    }

    fn metadata(&self) -> &InstallerMetadata {
        self.inner.metadata()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::deploy::ServiceRequest;
    use crate::installer::deb::DebPackage;
    use crate::installer::testing::{context, RecordingDeployment};

    fn session(deployment: Arc<RecordingDeployment>) -> InstallerSession {
        InstallerSession::new(Box::new(DebPackage::new(context(
            deployment,
            ServiceRequest::new("elastic-agent"),
        ))))
    }

    #[tokio::test]
    async fn test_out_of_order_call_is_forwarded() {
        let deployment = Arc::new(RecordingDeployment::default());
        let session = session(deployment.clone());

        session.enroll("tok", "").await.unwrap();

        assert_eq!(deployment.commands().len(), 1);
        assert_eq!(session.state().await, InstallerState::Enrolled);
    }

    #[tokio::test]
    async fn test_failed_call_keeps_state() {
        let deployment = Arc::new(RecordingDeployment::default());
        deployment.fail("elastic-agent");
        let session = session(deployment);

        assert!(session.enroll("tok", "").await.is_err());
        assert_eq!(session.state().await, InstallerState::Uninstalled);
        assert!(session.history().await.is_empty());
    }

    #[tokio::test]
    async fn test_stop_start_transitions() {
        let deployment = Arc::new(RecordingDeployment::default());
        let session = session(deployment);

        session.enroll("tok", "").await.unwrap();
        session.postinstall().await.unwrap();
        session.stop().await.unwrap();
        assert_eq!(session.state().await, InstallerState::Stopped);
        session.start().await.unwrap();
        assert_eq!(session.state().await, InstallerState::Running);
    }
}
