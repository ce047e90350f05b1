//! Version string helpers
//!
//! Artifact versions come in four shapes:
//! `8.0.0`, `8.0.0-SNAPSHOT`, `8.0.0-abcdef12` and `8.0.0-abcdef12-SNAPSHOT`.

use std::sync::LazyLock;

use regex::Regex;

static COMMIT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"-\b[0-9a-f]{5,40}\b").expect("valid commit regex")
});

static SNAPSHOT_WITH_COMMIT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(0|[1-9]\d*)\.(0|[1-9]\d*)\.(0|[1-9]\d*)(-\b[0-9a-f]{5,40}\b)(-SNAPSHOT)")
        .expect("valid snapshot regex")
});

static SEMVER_PREFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(0|[1-9]\d*)\.(0|[1-9]\d*)\.(0|[1-9]\d*)").expect("valid semver regex")
});

const SNAPSHOT_SUFFIX: &str = "-SNAPSHOT";

/// All derived forms of a version
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElasticVersion {
    /// 8.0.0
    pub version: String,
    /// 8.0.0-abcdef-SNAPSHOT
    pub full_version: String,
    /// 8.0.0-abcdef
    pub hashed_version: String,
    /// 8.0.0-SNAPSHOT
    pub snapshot_version: String,
}

impl ElasticVersion {
    pub fn parse(version: &str) -> Self {
        let without_commit = remove_commit(version);
        Self {
            version: without_commit.replace(SNAPSHOT_SUFFIX, ""),
            full_version: version.to_string(),
            hashed_version: version.replace(SNAPSHOT_SUFFIX, ""),
            snapshot_version: without_commit,
        }
    }
}

/// `8.0.0-abcdef-SNAPSHOT` -> `8.0.0-SNAPSHOT`
pub fn remove_commit(version: &str) -> String {
    COMMIT.replace_all(version, "").into_owned()
}

/// True for `X.Y.Z-<commit>-SNAPSHOT`
pub fn snapshot_has_commit(version: &str) -> bool {
    SNAPSHOT_WITH_COMMIT.is_match(version)
}

pub fn is_snapshot(version: &str) -> bool {
    version.ends_with(SNAPSHOT_SUFFIX)
}

/// A version that needs resolving to a concrete build (e.g. `8.0-SNAPSHOT`, `latest`)
pub fn is_alias(version: &str) -> bool {
    !SEMVER_PREFIX.is_match(version)
}

pub fn snapshot_version(version: &str) -> String {
    ElasticVersion::parse(version).snapshot_version
}

pub fn hashed_version(version: &str) -> String {
    ElasticVersion::parse(version).hashed_version
}

/// Version without commit or snapshot suffix
pub fn base_version(version: &str) -> String {
    ElasticVersion::parse(version).version
}

/// Commit hash embedded in a snapshot version, if any
pub fn extract_commit(version: &str) -> Option<String> {
    if !snapshot_has_commit(version) {
        return None;
    }
    COMMIT
        .find(version)
        .map(|m| m.as_str().trim_start_matches('-').to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derived_versions() {
        let v = ElasticVersion::parse("8.0.0-abcdef-SNAPSHOT");
        assert_eq!(v.version, "8.0.0");
        assert_eq!(v.full_version, "8.0.0-abcdef-SNAPSHOT");
        assert_eq!(v.hashed_version, "8.0.0-abcdef");
        assert_eq!(v.snapshot_version, "8.0.0-SNAPSHOT");
    }

    #[test]
    fn test_commit_detection() {
        assert!(snapshot_has_commit("8.0.0-a12345-SNAPSHOT"));
        assert!(!snapshot_has_commit("8.0.0-SNAPSHOT"));
        assert!(!snapshot_has_commit("8.0.0-a12345"));
        assert_eq!(extract_commit("8.9.0-d1b14479-SNAPSHOT").as_deref(), Some("d1b14479"));
        assert_eq!(extract_commit("8.9.0-SNAPSHOT"), None);
    }

    #[test]
    fn test_release_versions_untouched() {
        assert_eq!(remove_commit("7.13.0"), "7.13.0");
        assert_eq!(snapshot_version("7.13.0-SNAPSHOT"), "7.13.0-SNAPSHOT");
        assert!(!is_snapshot("7.13.0"));
    }

    #[test]
    fn test_alias() {
        assert!(is_alias("8.0-SNAPSHOT"));
        assert!(is_alias("latest"));
        assert!(!is_alias("8.0.0-SNAPSHOT"));
    }
}
