//! CI snapshot buckets on Google Cloud Storage

use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, info};

use crate::backoff::{self, ExponentialBackoff};
use crate::downloads::get_optional_json;
use crate::errors::HarnessError;

pub const BEATS_CI_ARTIFACTS_BUCKET: &str = "beats-ci-artifacts";

/// Where an object lives inside a bucket
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketCoordinates {
    pub bucket: String,
    pub prefix: String,
    pub object: String,
}

/// Directory layouts used over time to publish CI snapshots
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BucketLayout {
    /// `<project>/snapshots/<file>` or `<project>/commits/<sha>/<file>`
    Project { project: String },
    /// `beats/snapshots/<artifact>/<file>` or `beats/commits/<sha>/<artifact>/<file>`
    Beats { artifact: String },
    /// `snapshots/<artifact>/<file>` or `commits/<sha>/<artifact>/<file>`
    Legacy { artifact: String },
}

/// ubi8 images are published under the plain artifact name
fn strip_variant(artifact: &str) -> String {
    artifact.replace("-ubi8", "")
}

impl BucketLayout {
    pub fn coordinates(&self, bucket: &str, file_name: &str, commit: Option<&str>) -> BucketCoordinates {
        let (prefix, object) = match (self, commit) {
            (BucketLayout::Project { project }, None) => {
                (format!("{}/snapshots", project), file_name.to_string())
            }
            (BucketLayout::Project { project }, Some(sha)) => {
                (format!("{}/commits/{}", project, sha), file_name.to_string())
            }
            (BucketLayout::Beats { artifact }, None) => (
                format!("beats/snapshots/{}", strip_variant(artifact)),
                file_name.to_string(),
            ),
            (BucketLayout::Beats { artifact }, Some(sha)) => (
                format!("beats/commits/{}", sha),
                format!("{}/{}", strip_variant(artifact), file_name),
            ),
            (BucketLayout::Legacy { artifact }, None) => (
                format!("snapshots/{}", strip_variant(artifact)),
                file_name.to_string(),
            ),
            (BucketLayout::Legacy { artifact }, Some(sha)) => (
                format!("commits/{}", sha),
                format!("{}/{}", strip_variant(artifact), file_name),
            ),
        };

        BucketCoordinates {
            bucket: bucket.to_string(),
            prefix,
            object,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ObjectList {
    #[serde(default)]
    items: Vec<ObjectItem>,
    #[serde(rename = "nextPageToken", default)]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ObjectItem {
    id: String,
    #[serde(rename = "mediaLink", default)]
    media_link: String,
}

/// Client for the storage JSON API object listing
#[derive(Debug, Clone)]
pub struct BucketClient {
    client: Client,
    base_url: String,
}

impl BucketClient {
    pub fn new(client: Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Find the media link of `object` under `prefix`, following page tokens.
    /// Each page request is retried within `budget`.
    pub async fn object_url(
        &self,
        coords: &BucketCoordinates,
        budget: Duration,
    ) -> Result<String, HarnessError> {
        let url = format!("{}/storage/v1/b/{}/o", self.base_url, coords.bucket);
        let object_path = format!("{}/{}/{}/", coords.bucket, coords.prefix, coords.object);
        let started = tokio::time::Instant::now();

        let mut page_token: Option<String> = None;
        let mut page = 0u32;

        loop {
            let remaining = budget.saturating_sub(started.elapsed());
            let policy = ExponentialBackoff::new(remaining);
            let list: Option<ObjectList> = backoff::retry(&policy, "bucket listing", |_| {
                let mut query = vec![("prefix", coords.prefix.as_str())];
                if let Some(token) = page_token.as_deref() {
                    query.push(("pageToken", token));
                }
                let client = &self.client;
                let url = url.as_str();
                async move { get_optional_json::<ObjectList>(client, url, &query).await }
            })
            .await?;

            let Some(list) = list else {
                return Err(HarnessError::NotFound(format!(
                    "the {} bucket does not exist",
                    coords.bucket
                )));
            };

            if let Some(item) = list.items.iter().find(|i| i.id.starts_with(&object_path)) {
                info!("Found {} in page {}: {}", coords.object, page, item.media_link);
                return Ok(item.media_link.clone());
            }

            match list.next_page_token {
                Some(token) if !token.is_empty() => {
                    debug!(
                        "{} not in page {} of {}/{}, following next page",
                        coords.object, page, coords.bucket, coords.prefix
                    );
                    page_token = Some(token);
                    page += 1;
                }
                _ => {
                    return Err(HarnessError::NotFound(format!(
                        "reached the end of the pages and the {} object was not found for the {} bucket and {} prefix",
                        coords.object, coords.bucket, coords.prefix
                    )))
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_project_layout() {
        let layout = BucketLayout::Project {
            project: "elastic-agent".into(),
        };
        let c = layout.coordinates(BEATS_CI_ARTIFACTS_BUCKET, "elastic-agent-8.0.0-SNAPSHOT-x86_64.rpm", None);
        assert_eq!(c.prefix, "elastic-agent/snapshots");
        assert_eq!(c.object, "elastic-agent-8.0.0-SNAPSHOT-x86_64.rpm");

        let c = layout.coordinates(BEATS_CI_ARTIFACTS_BUCKET, "f.rpm", Some("0123456789"));
        assert_eq!(c.prefix, "elastic-agent/commits/0123456789");
        assert_eq!(c.object, "f.rpm");
    }

    #[test]
    fn test_beats_layouts_strip_ubi8() {
        let beats = BucketLayout::Beats {
            artifact: "elastic-agent-ubi8".into(),
        };
        let c = beats.coordinates(BEATS_CI_ARTIFACTS_BUCKET, "f.tar.gz", Some("0123456789"));
        assert_eq!(c.prefix, "beats/commits/0123456789");
        assert_eq!(c.object, "elastic-agent/f.tar.gz");

        let legacy = BucketLayout::Legacy {
            artifact: "elastic-agent-ubi8".into(),
        };
        let c = legacy.coordinates(BEATS_CI_ARTIFACTS_BUCKET, "f.tar.gz", None);
        assert_eq!(c.prefix, "snapshots/elastic-agent");
        assert_eq!(c.object, "f.tar.gz");
    }
}
