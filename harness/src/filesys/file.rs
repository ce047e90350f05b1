//! File operations

use std::path::{Path, PathBuf};

use serde::{de::DeserializeOwned, Serialize};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::trace;

use crate::errors::HarnessError;

/// A file wrapper with path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct File {
    path: PathBuf,
}

impl File {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// File name without directories, empty when the path has none
    pub fn name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    pub async fn exists(&self) -> bool {
        fs::metadata(&self.path)
            .await
            .map(|m| m.is_file())
            .unwrap_or(false)
    }

    pub async fn read_string(&self) -> Result<String, HarnessError> {
        Ok(fs::read_to_string(&self.path).await?)
    }

    pub async fn read_bytes(&self) -> Result<Vec<u8>, HarnessError> {
        Ok(fs::read(&self.path).await?)
    }

    pub async fn read_json<T: DeserializeOwned>(&self) -> Result<T, HarnessError> {
        let contents = self.read_string().await?;
        Ok(serde_json::from_str(&contents)?)
    }

    pub async fn read_yaml<T: DeserializeOwned>(&self) -> Result<T, HarnessError> {
        let contents = self.read_string().await?;
        Ok(serde_yaml::from_str(&contents)?)
    }

    /// Write bytes through a sibling temp file, creating parent directories
    pub async fn write_bytes(&self, contents: &[u8]) -> Result<(), HarnessError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let temp_path = self.path.with_extension("tmp");
        let mut file = fs::File::create(&temp_path).await?;
        file.write_all(contents).await?;
        file.sync_all().await?;
        drop(file);

        fs::rename(&temp_path, &self.path).await?;
        Ok(())
    }

    pub async fn write_string(&self, contents: &str) -> Result<(), HarnessError> {
        self.write_bytes(contents.as_bytes()).await
    }

    pub async fn write_json<T: Serialize>(&self, value: &T) -> Result<(), HarnessError> {
        let contents = serde_json::to_string_pretty(value)?;
        self.write_string(&contents).await
    }

    pub async fn write_yaml<T: Serialize>(&self, value: &T) -> Result<(), HarnessError> {
        let contents = serde_yaml::to_string(value)?;
        self.write_string(&contents).await
    }

    /// Delete the file, succeeding when it is already gone
    pub async fn delete(&self) -> Result<(), HarnessError> {
        match fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Copy this file to `dst`. The destination's parent directory must exist.
    pub async fn copy_to(&self, dst: impl AsRef<Path>) -> Result<File, HarnessError> {
        let dst = dst.as_ref();
        if let Some(parent) = dst.parent().filter(|p| !p.as_os_str().is_empty()) {
            let is_dir = fs::metadata(parent).await.map(|m| m.is_dir()).unwrap_or(false);
            if !is_dir {
                return Err(HarnessError::NotFound(format!(
                    "destination directory {} does not exist",
                    parent.display()
                )));
            }
        }

        fs::copy(&self.path, dst).await?;
        trace!("Copied {} to {}", self.path.display(), dst.display());
        Ok(File::new(dst))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[tokio::test]
    async fn test_yaml_write_creates_parents() {
        let tmp = tempfile::tempdir().unwrap();
        let file = File::new(tmp.path().join("nested/dir/state.yml"));

        let mut value = BTreeMap::new();
        value.insert("stackVersion".to_string(), "8.0.0".to_string());
        file.write_yaml(&value).await.unwrap();

        let back: BTreeMap<String, String> = file.read_yaml().await.unwrap();
        assert_eq!(back, value);
        assert!(!tmp.path().join("nested/dir/state.tmp").exists());
    }

    #[tokio::test]
    async fn test_copy_requires_existing_parent() {
        let tmp = tempfile::tempdir().unwrap();
        let src = File::new(tmp.path().join("src.bin"));
        src.write_bytes(&[0, 159, 146, 150]).await.unwrap();

        let err = src.copy_to(tmp.path().join("missing/dst.bin")).await.unwrap_err();
        assert!(matches!(err, HarnessError::NotFound(_)));

        let copied = src.copy_to(tmp.path().join("dst.bin")).await.unwrap();
        assert_eq!(copied.read_bytes().await.unwrap(), vec![0, 159, 146, 150]);
    }

    #[tokio::test]
    async fn test_delete_missing_file_is_ok() {
        let tmp = tempfile::tempdir().unwrap();
        File::new(tmp.path().join("nope")).delete().await.unwrap();
    }
}
