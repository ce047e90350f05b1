//! Artifact file names

use crate::downloads::versions::snapshot_version;

/// Where the artifact will be taken from, which changes how docker images are named
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NamingSource {
    /// Public snapshots and releases: `<a>-<v>-docker-image-<os>-<arch>.<ext>`
    Public,
    /// CI buckets and local builds: `<a>-<v>-<os>-<arch>.docker.<ext>`
    CiOrLocal,
}

/// Build the file name for an artifact. Commits are removed from the version.
///
/// ```
/// use e2e_harness::downloads::naming::{build_artifact_name, NamingSource};
///
/// let name = build_artifact_name("elastic-agent", "8.0.0-abcdef-SNAPSHOT", "linux", "x86_64", "rpm", false, NamingSource::Public);
/// assert_eq!(name, "elastic-agent-8.0.0-SNAPSHOT-x86_64.rpm");
/// ```
pub fn build_artifact_name(
    artifact: &str,
    version: &str,
    os: &str,
    arch: &str,
    extension: &str,
    docker: bool,
    source: NamingSource,
) -> String {
    let version = snapshot_version(version);
    let extension = extension.to_lowercase();

    if docker && source == NamingSource::Public {
        return format!("{}-{}-docker-image-{}-{}.{}", artifact, version, os, arch, extension);
    }

    let docker_suffix = if docker { ".docker" } else { "" };

    if extension == "deb" || extension == "rpm" {
        return format!("{}-{}-{}{}.{}", artifact, version, arch, docker_suffix, extension);
    }

    format!("{}-{}-{}-{}{}.{}", artifact, version, os, arch, docker_suffix, extension)
}
