//! Artifact fetcher: resolver chain, download and checksum verification

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use tracing::{debug, info, warn};

use crate::app::options::ArtifactOptions;
use crate::backoff::{self, scaled_timeout, ExponentialBackoff};
use crate::downloads::buckets::{BucketClient, BucketLayout};
use crate::downloads::cache::DownloadCache;
use crate::downloads::naming::{build_artifact_name, NamingSource};
use crate::downloads::releases::ReleasesClient;
use crate::downloads::versions::is_snapshot;
use crate::downloads::{transport_error, ResolvedArtifact};
use crate::errors::HarnessError;
use crate::filesys::dir::Dir;
use crate::filesys::file::File;
use crate::utils::verify_sha512;

/// Coordinates of the binary to fetch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactSpec {
    /// Repository publishing the artifact (`elastic-agent`, `beats`)
    pub project: String,
    pub artifact: String,
    pub version: String,
    pub os: String,
    pub arch: String,
    pub extension: String,
    pub docker: bool,
    pub xpack: bool,
}

impl ArtifactSpec {
    pub fn file_name(&self, source: NamingSource) -> String {
        build_artifact_name(
            &self.artifact,
            &self.version,
            &self.os,
            &self.arch,
            &self.extension,
            self.docker,
            source,
        )
    }
}

/// A binary available on the local filesystem
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedArtifact {
    pub name: String,
    pub path: PathBuf,
    pub sha_path: Option<PathBuf>,
}

/// Resolver strategies, tried in order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolverStrategy {
    /// CI bucket objects pinned to the configured commit
    CommitBucket,
    /// Project and beats snapshot layouts in the CI bucket
    ProjectSnapshotBucket,
    /// Legacy per-artifact snapshot layout in the CI bucket
    LegacySnapshotBucket,
    /// Public downloads site (released versions)
    Releases,
    /// Manifest of the latest public snapshot build
    SnapshotManifest,
    /// Artifacts API search
    ArtifactsApi,
}

impl fmt::Display for ResolverStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ResolverStrategy::CommitBucket => "commit bucket",
            ResolverStrategy::ProjectSnapshotBucket => "project snapshot bucket",
            ResolverStrategy::LegacySnapshotBucket => "legacy snapshot bucket",
            ResolverStrategy::Releases => "releases",
            ResolverStrategy::SnapshotManifest => "snapshot manifest",
            ResolverStrategy::ArtifactsApi => "artifacts API",
        };
        f.write_str(name)
    }
}

impl ResolverStrategy {
    fn naming(self) -> NamingSource {
        match self {
            ResolverStrategy::CommitBucket
            | ResolverStrategy::ProjectSnapshotBucket
            | ResolverStrategy::LegacySnapshotBucket => NamingSource::CiOrLocal,
            _ => NamingSource::Public,
        }
    }
}

/// Locates and downloads binaries
#[derive(Debug, Clone)]
pub struct ArtifactFetcher {
    client: Client,
    options: ArtifactOptions,
    timeout_factor: u32,
    downloads: Dir,
    cache: Arc<DownloadCache>,
    buckets: BucketClient,
    releases: ReleasesClient,
}

impl ArtifactFetcher {
    pub fn new(
        options: ArtifactOptions,
        timeout_factor: u32,
        downloads: Dir,
        cache: Arc<DownloadCache>,
    ) -> Result<Self, HarnessError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(300))
            .build()?;

        Ok(Self {
            buckets: BucketClient::new(client.clone(), &options.gcs_base_url),
            releases: ReleasesClient::new(client.clone(), options.endpoints.clone(), cache.clone()),
            client,
            options,
            timeout_factor,
            downloads,
            cache,
        })
    }

    pub fn options(&self) -> &ArtifactOptions {
        &self.options
    }

    fn budget(&self) -> Duration {
        scaled_timeout(self.timeout_factor, Duration::from_secs(60))
    }

    /// Whether CI snapshots built from the configured commit apply to `project`
    pub fn uses_ci_snapshots(&self, project: &str) -> bool {
        self.options.commit_sha.is_some() && self.options.repository.eq_ignore_ascii_case(project)
    }

    /// Resolve a version alias such as `8.0-SNAPSHOT` to a concrete build
    pub async fn resolve_version(&self, version: &str) -> Result<String, HarnessError> {
        self.releases.resolve_version(version, self.budget()).await
    }

    /// The ordered chain of strategies for an artifact
    pub fn default_chain(&self, spec: &ArtifactSpec) -> Vec<ResolverStrategy> {
        let mut chain = Vec::new();
        if self.uses_ci_snapshots(&spec.project) {
            chain.push(ResolverStrategy::CommitBucket);
        }
        if is_snapshot(&spec.version) {
            chain.push(ResolverStrategy::ProjectSnapshotBucket);
            chain.push(ResolverStrategy::LegacySnapshotBucket);
            chain.push(ResolverStrategy::SnapshotManifest);
        } else {
            chain.push(ResolverStrategy::Releases);
        }
        chain.push(ResolverStrategy::ArtifactsApi);
        chain
    }

    /// Try each strategy in order. Returns the file name the winning strategy
    /// knows the artifact by, or every attempt's failure when all fail.
    pub async fn resolve(
        &self,
        spec: &ArtifactSpec,
        chain: &[ResolverStrategy],
    ) -> Result<(String, ResolvedArtifact), HarnessError> {
        let mut attempts = Vec::with_capacity(chain.len());

        for (i, strategy) in chain.iter().enumerate() {
            let file_name = spec.file_name(strategy.naming());
            match self.resolve_with(*strategy, spec, &file_name).await {
                Ok(resolved) => {
                    info!("Resolved {} with the {} resolver: {}", file_name, strategy, resolved.url);
                    return Ok((file_name, resolved));
                }
                Err(e) => {
                    if i + 1 < chain.len() {
                        warn!("{} not found with the {} resolver, trying the next one: {}", file_name, strategy, e);
                    }
                    attempts.push(format!("{}: {}", strategy, e));
                }
            }
        }

        Err(HarnessError::ArtifactNotFound {
            artifact: spec.artifact.clone(),
            attempts,
        })
    }

    async fn resolve_with(
        &self,
        strategy: ResolverStrategy,
        spec: &ArtifactSpec,
        file_name: &str,
    ) -> Result<ResolvedArtifact, HarnessError> {
        let budget = self.budget();
        match strategy {
            ResolverStrategy::CommitBucket => {
                let sha = self.options.commit_sha.as_deref().ok_or_else(|| {
                    HarnessError::ConfigError("no commit configured for CI snapshots".to_string())
                })?;
                self.search_layouts(&self.bucket_layouts(spec, true), file_name, Some(sha)).await
            }
            ResolverStrategy::ProjectSnapshotBucket => {
                self.search_layouts(&self.bucket_layouts(spec, false), file_name, None).await
            }
            ResolverStrategy::LegacySnapshotBucket => {
                let layouts = [BucketLayout::Legacy {
                    artifact: spec.artifact.clone(),
                }];
                self.search_layouts(&layouts, file_name, None).await
            }
            ResolverStrategy::Releases => {
                let namespace = if spec.project.eq_ignore_ascii_case("elastic-agent") {
                    "beats"
                } else {
                    spec.project.as_str()
                };
                self.releases.release(namespace, &spec.artifact, file_name, budget).await
            }
            ResolverStrategy::SnapshotManifest => {
                self.releases.snapshot_manifest(file_name, &spec.version, budget).await
            }
            ResolverStrategy::ArtifactsApi => {
                self.releases.search(file_name, &spec.artifact, &spec.version, budget).await
            }
        }
    }

    fn bucket_layouts(&self, spec: &ArtifactSpec, with_legacy: bool) -> Vec<BucketLayout> {
        let mut layouts = vec![
            BucketLayout::Project {
                project: spec.project.clone(),
            },
            BucketLayout::Beats {
                artifact: spec.artifact.clone(),
            },
        ];
        if with_legacy {
            layouts.push(BucketLayout::Legacy {
                artifact: spec.artifact.clone(),
            });
        }
        layouts
    }

    async fn search_layouts(
        &self,
        layouts: &[BucketLayout],
        file_name: &str,
        commit: Option<&str>,
    ) -> Result<ResolvedArtifact, HarnessError> {
        let budget = self.budget();
        let mut last = HarnessError::NotFound(format!("{} not found in any bucket layout", file_name));

        for layout in layouts {
            let coords = layout.coordinates(&self.options.bucket, file_name, commit);
            match self.buckets.object_url(&coords, budget).await {
                Ok(url) => {
                    let sha_name = format!("{}.sha512", file_name);
                    let sha_coords = layout.coordinates(&self.options.bucket, &sha_name, commit);
                    let sha_url = self.buckets.object_url(&sha_coords, budget).await.ok();
                    return Ok(ResolvedArtifact { url, sha_url });
                }
                Err(e) => {
                    debug!("{:?} did not contain {}: {}", layout, file_name, e);
                    last = e;
                }
            }
        }

        Err(last)
    }

    /// Local build output for beats artifacts when a beats checkout is configured
    fn local_path(&self, spec: &ArtifactSpec) -> Option<PathBuf> {
        let base = self.options.beats_local_path.as_ref()?;
        if !spec.project.eq_ignore_ascii_case("beats") {
            return None;
        }

        let mut distributions = base.clone();
        if spec.xpack {
            distributions.push("x-pack");
        }
        distributions.push(&spec.artifact);
        distributions.push("build");
        distributions.push("distributions");
        Some(distributions.join(spec.file_name(NamingSource::CiOrLocal)))
    }

    /// Resolve, download and verify an artifact
    pub async fn fetch(&self, spec: &ArtifactSpec) -> Result<FetchedArtifact, HarnessError> {
        if let Some(path) = self.local_path(spec) {
            debug!("Using local build for {}: {}", spec.artifact, path.display());
            let file = File::new(&path);
            if !file.exists().await {
                return Err(HarnessError::NotFound(format!(
                    "local build {} does not exist",
                    path.display()
                )));
            }
            return Ok(FetchedArtifact {
                name: file.name(),
                path,
                sha_path: None,
            });
        }

        let chain = self.default_chain(spec);
        let (name, resolved) = self.resolve(spec, &chain).await?;

        let path = self.download(&resolved.url, &name).await?;
        let sha_path = match &resolved.sha_url {
            Some(sha_url) => {
                let sha_path = self.download(sha_url, &format!("{}.sha512", name)).await?;
                self.verify(&path, &sha_path).await?;
                Some(sha_path)
            }
            None => None,
        };

        Ok(FetchedArtifact {
            name,
            path,
            sha_path,
        })
    }

    async fn verify(&self, path: &PathBuf, sha_path: &PathBuf) -> Result<(), HarnessError> {
        let data = File::new(path).read_bytes().await?;
        let sha = File::new(sha_path).read_string().await?;
        if !verify_sha512(&data, &sha) {
            return Err(HarnessError::ValidationError(format!(
                "checksum mismatch for {}",
                path.display()
            )));
        }
        debug!("Checksum verified for {}", path.display());
        Ok(())
    }

    /// Download `url` into the downloads directory as `name`, once per URL
    pub async fn download(&self, url: &str, name: &str) -> Result<PathBuf, HarnessError> {
        if let Some(path) = self.cache.binary(url) {
            debug!("Retrieving {} from local cache: {}", url, path.display());
            return Ok(path);
        }

        let policy = ExponentialBackoff::new(self.budget());
        let bytes = backoff::retry(&policy, "artifact download", |_| {
            let client = &self.client;
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
                response.bytes().await.map_err(|e| transport_error(url, e))
            }
        })
        .await?;

        let file = self.downloads.file(name);
        file.write_bytes(&bytes).await?;
        info!("Downloaded {} to {}", url, file.path().display());

        let path = file.path().to_path_buf();
        self.cache.put_binary(url, path.clone());
        Ok(path)
    }
}
