//! Artifact resolution against mocked artifact services

use std::sync::Arc;
use std::time::Duration;

use e2e_harness::app::options::ArtifactOptions;
use e2e_harness::downloads::buckets::{BucketClient, BucketCoordinates};
use e2e_harness::downloads::fetch::ResolverStrategy;
use e2e_harness::downloads::naming::NamingSource;
use e2e_harness::downloads::releases::ReleaseEndpoints;
use e2e_harness::downloads::{ArtifactFetcher, ArtifactSpec, DownloadCache};
use e2e_harness::errors::HarnessError;
use e2e_harness::filesys::dir::Dir;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn rpm_spec() -> ArtifactSpec {
    ArtifactSpec {
        project: "elastic-agent".to_string(),
        artifact: "elastic-agent".to_string(),
        version: "8.0.0".to_string(),
        os: "linux".to_string(),
        arch: "x86_64".to_string(),
        extension: "rpm".to_string(),
        docker: false,
        xpack: false,
    }
}

fn fetcher_for(server: &MockServer, downloads: &std::path::Path) -> ArtifactFetcher {
    let options = ArtifactOptions {
        gcs_base_url: server.uri(),
        endpoints: ReleaseEndpoints {
            artifacts_api_url: server.uri(),
            releases_url: server.uri(),
            snapshots_url: server.uri(),
        },
        ..ArtifactOptions::default()
    };
    ArtifactFetcher::new(options, 1, Dir::new(downloads), Arc::new(DownloadCache::new())).unwrap()
}

#[tokio::test]
async fn test_bucket_object_found_on_second_page() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/storage/v1/b/artifacts/o"))
        .and(query_param("pageToken", "token-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "items": [{
                "id": "artifacts/snapshots/agent/agent-8.0.0-x86_64.rpm/xyz",
                "mediaLink": "https://storage.example/agent-8.0.0-x86_64.rpm"
            }]
        })))
        .with_priority(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/storage/v1/b/artifacts/o"))
        .and(query_param("prefix", "snapshots/agent"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "items": [{
                "id": "artifacts/snapshots/agent/agent-8.0.0-x86_64.deb/abc",
                "mediaLink": "https://storage.example/agent-8.0.0-x86_64.deb"
            }],
            "nextPageToken": "token-1"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = BucketClient::new(reqwest::Client::new(), &server.uri());
    let coords = BucketCoordinates {
        bucket: "artifacts".to_string(),
        prefix: "snapshots/agent".to_string(),
        object: "agent-8.0.0-x86_64.rpm".to_string(),
    };

    let url = client.object_url(&coords, Duration::from_secs(5)).await.unwrap();
    assert_eq!(url, "https://storage.example/agent-8.0.0-x86_64.rpm");
}

#[tokio::test]
async fn test_bucket_exhausted_pages_is_not_found() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/storage/v1/b/artifacts/o"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "items": [] })))
        .mount(&server)
        .await;

    let client = BucketClient::new(reqwest::Client::new(), &server.uri());
    let coords = BucketCoordinates {
        bucket: "artifacts".to_string(),
        prefix: "snapshots/agent".to_string(),
        object: "agent-8.0.0-x86_64.rpm".to_string(),
    };

    let err = client.object_url(&coords, Duration::from_secs(5)).await.unwrap_err();
    assert!(matches!(err, HarnessError::NotFound(_)));
    assert!(err.to_string().contains("reached the end of the pages"));
}

#[tokio::test]
async fn test_resolver_falls_back_to_artifacts_api() {
    let server = MockServer::start().await;
    let spec = rpm_spec();
    let file_name = spec.file_name(NamingSource::Public);

    Mock::given(method("GET"))
        .and(path("/v1/versions/8.0.0/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "version": {"builds": [{"version": "8.0.0"}]}
        })))
        .mount(&server)
        .await;
    let mut packages = serde_json::Map::new();
    packages.insert(
        file_name.clone(),
        serde_json::json!({
            "url": "https://artifacts.example/elastic-agent-8.0.0-x86_64.rpm",
            "sha_url": "https://artifacts.example/elastic-agent-8.0.0-x86_64.rpm.sha512"
        }),
    );
    Mock::given(method("GET"))
        .and(path("/v1/search/8.0.0/elastic-agent"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "packages": packages })))
        .mount(&server)
        .await;

    let downloads = tempfile::tempdir().unwrap();
    let fetcher = fetcher_for(&server, downloads.path());

    let (name, resolved) = fetcher
        .resolve(&spec, &[ResolverStrategy::Releases, ResolverStrategy::ArtifactsApi])
        .await
        .unwrap();

    assert_eq!(name, file_name);
    assert_eq!(resolved.url, "https://artifacts.example/elastic-agent-8.0.0-x86_64.rpm");
    assert!(resolved.sha_url.is_some());
}

#[tokio::test]
async fn test_resolver_reports_every_attempt() {
    let server = MockServer::start().await;
    let downloads = tempfile::tempdir().unwrap();
    let fetcher = fetcher_for(&server, downloads.path());

    let err = fetcher
        .resolve(&rpm_spec(), &[ResolverStrategy::Releases, ResolverStrategy::ArtifactsApi])
        .await
        .unwrap_err();

    match err {
        HarnessError::ArtifactNotFound { artifact, attempts } => {
            assert_eq!(artifact, "elastic-agent");
            assert_eq!(attempts.len(), 2);
            assert!(attempts[0].starts_with("releases"));
            assert!(attempts[1].starts_with("artifacts API"));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_release_chain_for_released_versions() {
    let fetcher = ArtifactFetcher::new(
        ArtifactOptions::default(),
        1,
        Dir::new(std::env::temp_dir()),
        Arc::new(DownloadCache::new()),
    )
    .unwrap();

    assert_eq!(
        fetcher.default_chain(&rpm_spec()),
        vec![ResolverStrategy::Releases, ResolverStrategy::ArtifactsApi]
    );

    let snapshot = ArtifactSpec {
        version: "8.0.0-SNAPSHOT".to_string(),
        ..rpm_spec()
    };
    assert_eq!(
        fetcher.default_chain(&snapshot),
        vec![
            ResolverStrategy::ProjectSnapshotBucket,
            ResolverStrategy::LegacySnapshotBucket,
            ResolverStrategy::SnapshotManifest,
            ResolverStrategy::ArtifactsApi,
        ]
    );
}
