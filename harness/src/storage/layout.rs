//! Operational directory layout

use std::path::PathBuf;

use crate::errors::HarnessError;
use crate::filesys::dir::Dir;
use crate::filesys::file::File;

pub const COMPOSE_FILE: &str = "docker-compose.yml";

/// Kind of compose definition under `compose/`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComposeKind {
    Profile,
    Service,
}

impl ComposeKind {
    fn dir_name(self) -> &'static str {
        match self {
            ComposeKind::Profile => "profiles",
            ComposeKind::Service => "services",
        }
    }
}

/// Layout of the operational directory (`~/.op` by default)
#[derive(Debug, Clone)]
pub struct StorageLayout {
    pub base_dir: PathBuf,
}

impl StorageLayout {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn settings_file(&self) -> File {
        File::new(self.base_dir.join("settings.json"))
    }

    pub fn compose_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("compose"))
    }

    /// `compose/{profiles|services}/<name[/flavour]>/docker-compose.yml`
    pub fn compose_file(&self, kind: ComposeKind, path_name: &str) -> File {
        let mut path = self.base_dir.join("compose").join(kind.dir_name());
        for part in path_name.split('/').filter(|p| !p.is_empty()) {
            path.push(part);
        }
        File::new(path.join(COMPOSE_FILE))
    }

    pub fn kubernetes_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("kubernetes"))
    }

    pub fn downloads_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("downloads"))
    }

    /// Directory holding `<run id>.run` state files
    pub fn state_dir(&self) -> Dir {
        Dir::new(self.base_dir.clone())
    }

    pub fn logs_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("logs"))
    }

    pub async fn setup(&self) -> Result<(), HarnessError> {
        self.compose_dir().subdir("profiles").create().await?;
        self.compose_dir().subdir("services").create().await?;
        self.downloads_dir().create().await?;
        self.logs_dir().create().await?;
        Ok(())
    }
}

impl Default for StorageLayout {
    fn default() -> Self {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        Self::new(home.join(".op"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compose_file_paths() {
        let layout = StorageLayout::new("/tmp/op");

        assert_eq!(
            layout.compose_file(ComposeKind::Profile, "fleet").path(),
            PathBuf::from("/tmp/op/compose/profiles/fleet/docker-compose.yml")
        );
        assert_eq!(
            layout.compose_file(ComposeKind::Service, "elastic-agent/debian").path(),
            PathBuf::from("/tmp/op/compose/services/elastic-agent/debian/docker-compose.yml")
        );
    }
}
