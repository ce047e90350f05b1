//! Public artifact services: the artifacts API, the downloads site and
//! the snapshot manifests

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::{debug, info};

use crate::backoff::{self, ExponentialBackoff};
use crate::downloads::cache::DownloadCache;
use crate::downloads::versions::{
    base_version, extract_commit, hashed_version, remove_commit, snapshot_has_commit,
};
use crate::downloads::{get_optional_json, transport_error, ResolvedArtifact};
use crate::errors::HarnessError;

const NO_KPI: (&str, &str) = ("x-elastic-no-kpi", "true");

#[derive(Debug, Deserialize)]
struct PackageLinks {
    url: String,
    #[serde(default)]
    sha_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    packages: HashMap<String, PackageLinks>,
}

#[derive(Debug, Deserialize)]
struct VersionBuild {
    version: String,
}

#[derive(Debug, Deserialize)]
struct VersionDetails {
    #[serde(default)]
    builds: Vec<VersionBuild>,
}

#[derive(Debug, Deserialize)]
struct VersionResponse {
    version: VersionDetails,
}

#[derive(Debug, Deserialize)]
struct LatestSnapshot {
    #[serde(default)]
    build_id: String,
}

#[derive(Debug, Deserialize)]
struct ManifestProject {
    #[serde(default)]
    packages: HashMap<String, PackageLinks>,
}

#[derive(Debug, Deserialize)]
struct SnapshotManifest {
    #[serde(default)]
    projects: HashMap<String, ManifestProject>,
}

/// Base URLs of the public artifact services
#[derive(Debug, Clone)]
pub struct ReleaseEndpoints {
    pub artifacts_api_url: String,
    pub releases_url: String,
    pub snapshots_url: String,
}

impl Default for ReleaseEndpoints {
    fn default() -> Self {
        Self {
            artifacts_api_url: "https://artifacts-api.elastic.co".to_string(),
            releases_url: "https://artifacts.elastic.co".to_string(),
            snapshots_url: "https://artifacts-snapshot.elastic.co".to_string(),
        }
    }
}

/// Client for the public artifact services
#[derive(Debug, Clone)]
pub struct ReleasesClient {
    client: Client,
    endpoints: ReleaseEndpoints,
    cache: Arc<DownloadCache>,
}

impl ReleasesClient {
    pub fn new(client: Client, endpoints: ReleaseEndpoints, cache: Arc<DownloadCache>) -> Self {
        Self {
            client,
            endpoints,
            cache,
        }
    }

    async fn fetch<T: serde::de::DeserializeOwned>(
        &self,
        operation: &str,
        url: &str,
        query: &[(&str, &str)],
        budget: Duration,
    ) -> Result<Option<T>, HarnessError> {
        let policy = ExponentialBackoff::new(budget);
        backoff::retry(&policy, operation, |_| get_optional_json::<T>(&self.client, url, query)).await
    }

    /// Resolve a version alias to the latest concrete build. Versions that
    /// already carry a commit are returned unchanged.
    pub async fn resolve_version(&self, version: &str, budget: Duration) -> Result<String, HarnessError> {
        let url = format!(
            "{}/v1/versions/{}/",
            self.endpoints.artifacts_api_url.trim_end_matches('/'),
            version
        );

        if let Some(cached) = self.cache.version(&url) {
            debug!("Retrieving version {} from local cache: {}", version, cached);
            return Ok(cached);
        }

        if snapshot_has_commit(version) {
            self.cache.put_version(&url, version);
            return Ok(version.to_string());
        }

        let response: VersionResponse = self
            .fetch("artifacts API version lookup", &url, &[NO_KPI], budget)
            .await?
            .ok_or_else(|| HarnessError::NotFound(format!("version {} is not known to the artifacts API", version)))?;

        let latest = response
            .version
            .builds
            .into_iter()
            .next()
            .map(|b| b.version)
            .ok_or_else(|| HarnessError::NotFound(format!("no builds found for version {}", version)))?;

        debug!("Latest version for alias {}: {}", version, latest);
        self.cache.put_version(&url, &latest);
        Ok(latest)
    }

    /// Latest snapshot build (`X.Y.Z-<commit>-SNAPSHOT`) for a version
    pub async fn latest_snapshot_version(&self, version: &str, budget: Duration) -> Result<String, HarnessError> {
        let url = format!(
            "{}/beats/latest/{}.json",
            self.endpoints.snapshots_url.trim_end_matches('/'),
            version
        );

        if let Some(cached) = self.cache.version(&url) {
            return Ok(cached);
        }

        if snapshot_has_commit(version) {
            self.cache.put_version(&url, version);
            return Ok(version.to_string());
        }

        let policy = ExponentialBackoff::new(budget);
        let body = backoff::retry(&policy, "snapshot version lookup", |_| {
            let client = &self.client;
            let url = url.as_str();
            async move {
                let response = client
                    .get(url)
                    .send()
                    .await
                    .map_err(|e| transport_error(url, e))?;
                if !response.status().is_success() {
                    return Err(HarnessError::NotReady(format!(
                        "GET {} returned {}",
                        url,
                        response.status()
                    )));
                }
                response.text().await.map_err(|e| transport_error(url, e))
            }
        })
        .await?;

        let latest = parse_latest_snapshot(&body)?;
        debug!("Latest snapshot for {}: {}", version, latest);
        self.cache.put_version(&url, &latest);
        Ok(latest)
    }

    /// Search the artifacts API for a package by file name
    pub async fn search(
        &self,
        file_name: &str,
        artifact: &str,
        version: &str,
        budget: Duration,
    ) -> Result<ResolvedArtifact, HarnessError> {
        let resolved = self.resolve_version(version, budget).await?;
        let mut file_name = file_name.replace(version, &resolved);

        let has_commit = snapshot_has_commit(&resolved);
        // the search API accepts commits in the version, but not with the snapshot suffix
        let query_version = if has_commit {
            hashed_version(&resolved)
        } else {
            resolved.clone()
        };
        if has_commit {
            file_name = remove_commit(&file_name);
        }

        let url = format!(
            "{}/v1/search/{}/{}",
            self.endpoints.artifacts_api_url.trim_end_matches('/'),
            query_version,
            artifact
        );

        let response: SearchResponse = self
            .fetch("artifacts API search", &url, &[NO_KPI], budget)
            .await?
            .ok_or_else(|| HarnessError::NotFound(format!("{} returned 404", url)))?;

        let package = response.packages.get(&file_name).ok_or_else(|| {
            HarnessError::NotFound(format!("{} not found in the artifacts API", file_name))
        })?;

        Ok(ResolvedArtifact {
            url: package.url.clone(),
            sha_url: package.sha_url.clone(),
        })
    }

    /// Probe the downloads site for a released artifact
    pub async fn release(
        &self,
        project: &str,
        name: &str,
        file_name: &str,
        budget: Duration,
    ) -> Result<ResolvedArtifact, HarnessError> {
        let url = format!(
            "{}/downloads/{}/{}/{}",
            self.endpoints.releases_url.trim_end_matches('/'),
            project,
            name,
            file_name
        );

        let policy = ExponentialBackoff::new(budget);
        let found = backoff::retry(&policy, "downloads site probe", |_| {
            let client = &self.client;
            let url = url.as_str();
            async move {
                let response = client
                    .head(url)
                    .send()
                    .await
                    .map_err(|e| transport_error(url, e))?;
                match response.status() {
                    StatusCode::NOT_FOUND => Ok(false),
                    status if status.is_success() => Ok(true),
                    status => Err(HarnessError::NotReady(format!("HEAD {} returned {}", url, status))),
                }
            }
        })
        .await?;

        if !found {
            return Err(HarnessError::NotFound(format!(
                "download could not be found at the Elastic downloads API: {}",
                url
            )));
        }

        info!("Download was found in the Elastic downloads API: {}", url);
        Ok(ResolvedArtifact {
            sha_url: Some(format!("{}.sha512", url)),
            url,
        })
    }

    /// Look the package up in the manifest of the latest snapshot build
    pub async fn snapshot_manifest(
        &self,
        file_name: &str,
        version: &str,
        budget: Duration,
    ) -> Result<ResolvedArtifact, HarnessError> {
        let resolved = self.latest_snapshot_version(version, budget).await?;
        let commit = extract_commit(&resolved).ok_or_else(|| {
            HarnessError::NotFound(format!("{} does not contain a commit hash, it is not a snapshot", resolved))
        })?;
        let semver = base_version(&resolved);

        let url = format!(
            "{}/beats/{}-{}/manifest-{}-SNAPSHOT.json",
            self.endpoints.snapshots_url.trim_end_matches('/'),
            semver,
            commit,
            semver
        );

        let manifest: SnapshotManifest = self
            .fetch("snapshot manifest", &url, &[], budget)
            .await?
            .ok_or_else(|| HarnessError::NotFound(format!("{} returned 404", url)))?;

        manifest
            .projects
            .values()
            .find_map(|project| project.packages.get(file_name))
            .map(|package| ResolvedArtifact {
                url: package.url.clone(),
                sha_url: package.sha_url.clone(),
            })
            .ok_or_else(|| HarnessError::NotFound(format!("package {} not found", file_name)))
    }
}

/// `{"build_id": "8.8.3-b1d8691a"}` -> `8.8.3-b1d8691a-SNAPSHOT`
pub fn parse_latest_snapshot(body: &str) -> Result<String, HarnessError> {
    let response: LatestSnapshot = serde_json::from_str(body).map_err(|e| {
        HarnessError::ValidationError(format!(
            "could not parse the response body to retrieve the version: {}",
            e
        ))
    })?;

    match response.build_id.split_once('-') {
        Some((version, hash)) if !hash.is_empty() => Ok(format!("{}-{}-SNAPSHOT", version, hash)),
        _ => Err(HarnessError::ValidationError(format!(
            "could not parse the build_id to retrieve the version hash: {}",
            response.build_id
        ))),
    }
}
