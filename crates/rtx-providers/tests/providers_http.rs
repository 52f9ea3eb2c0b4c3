//! Loopback HTTP tests for the providers: real requests against a
//! `tiny_http` fixture server, covering success, retry exhaustion,
//! auth-failure propagation, and cache coherence.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use rtx_cache::SourceCache;
use rtx_providers::{
    AdvisoryProvider, GithubAdvisoryProvider, MetadataProvider, NpmMetadataProvider, OsvProvider,
    ProviderError, ProviderSettings,
};
use rtx_retry::{BackoffStrategy, RetryConfig};
use rtx_types::{Dependency, Ecosystem, Severity};

/// Serve `responder` on a loopback port; returns the base URL and a counter
/// of requests seen.
fn spawn_server<F>(responder: F) -> (String, Arc<AtomicU32>)
where
    F: Fn(&str) -> (u16, String) + Send + 'static,
{
    let server = tiny_http::Server::http("127.0.0.1:0").expect("bind loopback");
    let port = match server.server_addr() {
        tiny_http::ListenAddr::IP(addr) => addr.port(),
        tiny_http::ListenAddr::Unix(_) => unreachable!("bound to an IP address"),
    };
    let hits = Arc::new(AtomicU32::new(0));
    let hits_in_thread = Arc::clone(&hits);

    std::thread::spawn(move || {
        for request in server.incoming_requests() {
            hits_in_thread.fetch_add(1, Ordering::SeqCst);
            let (status, body) = responder(request.url());
            let response = tiny_http::Response::from_string(body)
                .with_status_code(status)
                .with_header(
                    tiny_http::Header::from_bytes(&b"Content-Type"[..], &b"application/json"[..])
                        .expect("header"),
                );
            let _ = request.respond(response);
        }
    });

    (format!("http://127.0.0.1:{port}"), hits)
}

fn fast_settings(base_url: &str) -> ProviderSettings {
    ProviderSettings {
        base_url: base_url.to_string(),
        timeout: Duration::from_secs(5),
        retry: RetryConfig {
            strategy: BackoffStrategy::Immediate,
            max_attempts: 2,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            jitter: false,
        },
        batch_size: 100,
        max_in_flight: 4,
        token: None,
        ttl: Duration::from_secs(300),
        negative_ttl: None,
        typosquat_distance: 2,
    }
}

fn npm_dep(name: &str, version: &str) -> Dependency {
    Dependency {
        ecosystem: Ecosystem::Npm,
        name: name.to_string(),
        version: version.to_string(),
        manifest_path: PathBuf::from("package-lock.json"),
        direct: true,
    }
}

#[tokio::test]
async fn osv_batch_enriches_and_caches() {
    let (base, hits) = spawn_server(|url| {
        assert_eq!(url, "/v1/querybatch");
        (
            200,
            serde_json::json!({
                "results": [
                    {
                        "vulns": [
                            {
                                "id": "GHSA-lodash-proto",
                                "summary": "prototype pollution",
                                "database_specific": { "severity": "CRITICAL" },
                                "affected": [
                                    {
                                        "package": { "name": "lodash", "ecosystem": "npm" },
                                        "ranges": [
                                            { "type": "SEMVER", "events": [
                                                { "introduced": "4.0.0" },
                                                { "fixed": "4.17.21" }
                                            ]}
                                        ]
                                    }
                                ]
                            }
                        ]
                    }
                ]
            })
            .to_string(),
        )
    });

    let provider = OsvProvider::new(fast_settings(&base), SourceCache::memory_only("osv", 64));
    let deps = vec![npm_dep("lodash", "4.17.20")];

    let batch = provider.enrich_batch(&deps).await.expect("enrich");
    let outcome = batch.get(&deps[0].key()).expect("entry for dep");
    assert!(outcome.available);
    assert_eq!(outcome.advisories.len(), 1);
    assert_eq!(outcome.advisories[0].id, "GHSA-lodash-proto");
    assert_eq!(outcome.advisories[0].severity, Severity::Critical);
    assert!(outcome.advisories[0].affects("4.17.20"));
    assert_eq!(hits.load(Ordering::SeqCst), 1);

    // Second run within TTL: answered from cache, zero upstream requests.
    let again = provider.enrich_batch(&deps).await.expect("enrich again");
    let outcome = again.get(&deps[0].key()).expect("entry for dep");
    assert!(outcome.available);
    assert_eq!(outcome.advisories.len(), 1);
    assert_eq!(hits.load(Ordering::SeqCst), 1, "no new upstream requests");
}

#[tokio::test]
async fn osv_marks_batch_unavailable_after_retries() {
    let (base, hits) = spawn_server(|_| (500, "{}".to_string()));

    let provider = OsvProvider::new(fast_settings(&base), SourceCache::memory_only("osv", 64));
    let deps = vec![npm_dep("lodash", "4.17.20"), npm_dep("chalk", "5.0.0")];

    let batch = provider.enrich_batch(&deps).await.expect("not fatal");
    for dep in &deps {
        let outcome = batch.get(&dep.key()).expect("entry for dep");
        assert!(!outcome.available, "source failure is marked, not omitted");
        assert!(outcome.advisories.is_empty());
    }
    // One batch request plus one retry.
    assert_eq!(hits.load(Ordering::SeqCst), 2);

    // Failures are not cached: the next call goes upstream again.
    let _ = provider.enrich_batch(&deps).await.expect("not fatal");
    assert_eq!(hits.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn github_auth_failure_surfaces_as_auth_error() {
    let (base, _hits) = spawn_server(|_| (401, r#"{"message":"Bad credentials"}"#.to_string()));

    let provider =
        GithubAdvisoryProvider::new(fast_settings(&base), SourceCache::memory_only("github", 64));
    let deps = vec![npm_dep("lodash", "4.17.20")];

    let err = provider.enrich_batch(&deps).await.expect_err("must fail");
    match err {
        ProviderError::Auth { source_tag: source, .. } => assert_eq!(source, "github"),
        other => panic!("expected auth error, got: {other}"),
    }
}

#[tokio::test]
async fn github_enriches_from_advisory_listing() {
    let (base, hits) = spawn_server(|url| {
        assert!(url.starts_with("/advisories"));
        (
            200,
            serde_json::json!([
                {
                    "ghsa_id": "GHSA-react-fake",
                    "severity": "critical",
                    "summary": "malicious release",
                    "withdrawn_at": null,
                    "vulnerabilities": [
                        {
                            "package": { "ecosystem": "npm", "name": "react" },
                            "vulnerable_version_range": ">= 99.0.0-attack, <= 99.0.0-attack"
                        }
                    ]
                }
            ])
            .to_string(),
        )
    });

    let provider =
        GithubAdvisoryProvider::new(fast_settings(&base), SourceCache::memory_only("github", 64));
    let deps = vec![npm_dep("react", "99.0.0-attack")];

    let batch = provider.enrich_batch(&deps).await.expect("enrich");
    let outcome = batch.get(&deps[0].key()).expect("entry");
    assert!(outcome.available);
    assert_eq!(outcome.advisories.len(), 1);
    assert!(outcome.advisories[0].affects("99.0.0-attack"));
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn npm_metadata_combines_document_and_downloads() {
    let (base, hits) = spawn_server(|url| {
        if url.starts_with("/downloads/") {
            (200, r#"{"downloads": 4321}"#.to_string())
        } else {
            assert_eq!(url, "/lodash");
            (
                200,
                serde_json::json!({
                    "time": {
                        "created": "2012-01-01T00:00:00Z",
                        "modified": "2024-01-01T00:00:00Z",
                        "4.17.20": "2020-08-13T00:00:00Z",
                        "4.17.21": "2021-02-20T00:00:00Z"
                    },
                    "versions": {
                        "4.17.20": {},
                        "4.17.21": {}
                    },
                    "maintainers": [ { "name": "jdalton" } ]
                })
                .to_string(),
            )
        }
    });

    let provider = NpmMetadataProvider::new(fast_settings(&base), SourceCache::memory_only("npm", 64))
        .with_downloads_base(&base);
    let dep = npm_dep("lodash", "4.17.20");

    let meta = provider.fetch(&dep).await.expect("fetch");
    assert_eq!(meta.total_releases, Some(2));
    assert_eq!(meta.maintainer_count, Some(1));
    assert_eq!(meta.downloads, Some(4321));
    assert!(!meta.version_yanked);
    assert_eq!(hits.load(Ordering::SeqCst), 2, "document plus downloads");

    // Cached: a second fetch issues no requests.
    let _ = provider.fetch(&dep).await.expect("fetch again");
    assert_eq!(hits.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn npm_metadata_failure_is_unavailable() {
    let (base, hits) = spawn_server(|_| (500, "{}".to_string()));

    let provider =
        NpmMetadataProvider::new(fast_settings(&base), SourceCache::memory_only("npm", 64))
            .with_downloads_base(&base);
    let err = provider
        .fetch(&npm_dep("lodash", "4.17.20"))
        .await
        .expect_err("source failed");
    match err {
        ProviderError::Unavailable { source_tag: source, .. } => assert_eq!(source, "npm"),
        other => panic!("expected unavailable, got: {other}"),
    }
    // One attempt plus one retry against the registry document.
    assert_eq!(hits.load(Ordering::SeqCst), 2);
}
