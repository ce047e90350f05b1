//! Artifact resolution and download
//!
//! Binaries are located through an ordered chain of resolver strategies
//! (CI buckets, public releases, the artifacts API) and downloaded once per
//! URL into the operational directory.

pub mod buckets;
pub mod cache;
pub mod fetch;
pub mod naming;
pub mod releases;
pub mod versions;

use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::errors::HarnessError;

pub use cache::DownloadCache;
pub use fetch::{ArtifactFetcher, ArtifactSpec, FetchedArtifact};
pub use naming::build_artifact_name;

/// Location of a resolved artifact and its checksum file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedArtifact {
    pub url: String,
    pub sha_url: Option<String>,
}

/// Map a transport failure: connection problems are worth retrying, anything
/// else is reported as is
pub(crate) fn transport_error(url: &str, err: reqwest::Error) -> HarnessError {
    if err.is_connect() || err.is_timeout() {
        HarnessError::NotReady(format!("{} is not reachable yet: {}", url, err))
    } else {
        HarnessError::HttpError(err)
    }
}

/// GET a JSON document. 404 maps to `NotFound`, other failures to `NotReady`.
pub(crate) async fn get_json<T: DeserializeOwned>(
    client: &Client,
    url: &str,
    query: &[(&str, &str)],
) -> Result<T, HarnessError> {
    debug!("GET {}", url);

    let response = client
        .get(url)
        .query(query)
        .send()
        .await
        .map_err(|e| transport_error(url, e))?;

    let status = response.status();
    if status == StatusCode::NOT_FOUND {
        return Err(HarnessError::NotFound(format!("GET {} returned 404", url)));
    }
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(HarnessError::NotReady(format!(
            "GET {} returned {}: {}",
            url, status, body
        )));
    }

    let body = response.text().await.map_err(|e| transport_error(url, e))?;
    Ok(serde_json::from_str(&body)?)
}

/// Like [`get_json`], but a 404 is `Ok(None)` so retry loops stop on it
pub(crate) async fn get_optional_json<T: DeserializeOwned>(
    client: &Client,
    url: &str,
    query: &[(&str, &str)],
) -> Result<Option<T>, HarnessError> {
    match get_json(client, url, query).await {
        Ok(value) => Ok(Some(value)),
        Err(HarnessError::NotFound(_)) => Ok(None),
        Err(e) => Err(e),
    }
}
