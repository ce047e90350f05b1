//! Shallow clones of the projects whose sources a scenario needs

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tracing::{info, warn};

use crate::errors::HarnessError;
use crate::shell::{self, args};

pub const GIT_PROTOCOL: &str = "git@";
const DEFAULT_BRANCH: &str = "master";

/// A repository to clone into `<base_workspace>/<name>`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GitProject {
    pub base_workspace: PathBuf,
    pub branch: String,
    pub domain: String,
    pub name: String,
    pub protocol: String,
    pub user: String,
}

impl GitProject {
    pub fn new() -> Self {
        Self {
            branch: DEFAULT_BRANCH.to_string(),
            ..Default::default()
        }
    }

    pub fn with_base_workspace(mut self, base_workspace: impl Into<PathBuf>) -> Self {
        self.base_workspace = base_workspace.into();
        self
    }

    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = domain.into();
        self
    }

    pub fn with_git_protocol(mut self) -> Self {
        self.protocol = GIT_PROTOCOL.to_string();
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// `user` or `user:branch`; anything else is ignored
    pub fn with_remote(mut self, remote: &str) -> Self {
        let coordinates: Vec<&str> = remote.split(':').collect();
        match coordinates.as_slice() {
            [user] => {
                self.user = user.to_string();
                self.branch = DEFAULT_BRANCH.to_string();
            }
            [user, branch] => {
                self.user = user.to_string();
                self.branch = branch.to_string();
            }
            _ => warn!("Ignoring malformed remote {}", remote),
        }
        self
    }

    pub fn url(&self) -> String {
        if self.protocol == GIT_PROTOCOL {
            format!("{}{}:{}/{}", self.protocol, self.domain, self.user, self.name)
        } else {
            format!("https://{}/{}/{}", self.domain, self.user, self.name)
        }
    }

    pub fn workspace(&self) -> PathBuf {
        self.base_workspace.join(&self.name)
    }
}

/// Depth-1 clone of the project's branch
pub async fn clone(project: &GitProject) -> Result<PathBuf, HarnessError> {
    let dir = project.workspace();
    if tokio::fs::try_exists(&dir).await? {
        return Err(HarnessError::ValidationError(format!(
            "{} already exists, not cloning {}",
            dir.display(),
            project.url()
        )));
    }
    tokio::fs::create_dir_all(&project.base_workspace).await?;

    let url = project.url();
    info!("Cloning {} into {}, this could take long depending on its size", url, dir.display());

    let target = dir.to_string_lossy().to_string();
    shell::execute(
        &project.base_workspace,
        "git",
        &args([
            "clone",
            "--depth",
            "1",
            "--single-branch",
            "--branch",
            project.branch.as_str(),
            "--origin",
            "origin",
            url.as_str(),
            target.as_str(),
        ]),
    )
    .await?;
    Ok(dir)
}

/// Fetch the project's branch into an existing clone and check it out
pub async fn fetch(project: &GitProject) -> Result<(), HarnessError> {
    let dir = project.workspace();
    let branch = project.branch.as_str();
    shell::execute(&dir, "git", &args(["fetch", "--depth", "1", "--force", "origin", branch])).await?;
    shell::execute(&dir, "git", &args(["checkout", "--force", "-B", branch, "FETCH_HEAD"])).await?;
    info!("{} checked out at origin/{}", dir.display(), branch);
    Ok(())
}

/// Clone every project with at most `workers` clones in flight. Returns on the
/// first error; clones already running are left to finish on their own.
pub async fn clone_all(projects: Vec<GitProject>, workers: usize) -> Result<Vec<PathBuf>, HarnessError> {
    let total = projects.len();
    if total == 0 {
        return Ok(Vec::new());
    }

    let (work_tx, work_rx) = mpsc::channel::<GitProject>(total);
    for project in projects {
        // buffered for every project
        let _ = work_tx.send(project).await;
    }
    drop(work_tx);

    let work_rx = Arc::new(Mutex::new(work_rx));
    let (result_tx, mut result_rx) = mpsc::channel::<(String, PathBuf)>(total);
    let (error_tx, mut error_rx) = mpsc::channel::<(String, HarnessError)>(1);

    for _ in 0..workers.clamp(1, total) {
        let work_rx = Arc::clone(&work_rx);
        let result_tx = result_tx.clone();
        let error_tx = error_tx.clone();
        tokio::spawn(async move {
            loop {
                let next = work_rx.lock().await.recv().await;
                let Some(project) = next else { break };
                match clone(&project).await {
                    Ok(dir) => {
                        let _ = result_tx.send((project.url(), dir)).await;
                    }
                    Err(e) => {
                        // first error wins
                        let _ = error_tx.try_send((project.url(), e));
                        return;
                    }
                }
            }
        });
    }
    drop(result_tx);
    drop(error_tx);

    let mut cloned = Vec::with_capacity(total);
    while cloned.len() < total {
        tokio::select! {
            Some((url, dir)) = result_rx.recv() => {
                info!("Git clone of {} succeeded", url);
                cloned.push(dir);
            }
            Some((url, e)) = error_rx.recv() => {
                warn!("Git clone of {} errored: {}", url, e);
                return Err(e);
            }
            else => break,
        }
    }

    if cloned.len() < total {
        return Err(HarnessError::Internal(format!(
            "{} of {} clones reported back",
            cloned.len(),
            total
        )));
    }
    Ok(cloned)
}

/// Whether `dir` looks like a git checkout
pub fn is_repository(dir: &Path) -> bool {
    dir.join(".git").exists()
}
