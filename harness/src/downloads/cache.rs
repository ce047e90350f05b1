//! Process-wide download caches

use std::path::PathBuf;

use dashmap::DashMap;

/// Downloaded binaries keyed by URL, and resolved version aliases keyed by
/// the lookup URL. Safe to share between concurrently running scenarios.
#[derive(Debug, Default)]
pub struct DownloadCache {
    binaries: DashMap<String, PathBuf>,
    versions: DashMap<String, String>,
}

impl DownloadCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn binary(&self, url: &str) -> Option<PathBuf> {
        self.binaries.get(url).map(|entry| entry.value().clone())
    }

    pub fn put_binary(&self, url: &str, path: PathBuf) {
        self.binaries.insert(url.to_string(), path);
    }

    pub fn version(&self, key: &str) -> Option<String> {
        self.versions.get(key).map(|entry| entry.value().clone())
    }

    pub fn put_version(&self, key: &str, version: &str) {
        self.versions.insert(key.to_string(), version.to_string());
    }
}
