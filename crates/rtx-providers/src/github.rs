//! GitHub security advisory provider.
//!
//! Queries `GET /advisories?ecosystem=<eco>&affects=<name>` per dependency,
//! filtering the returned vulnerability ranges against the dependency's
//! version. Anonymous access works but is tightly rate limited; a token
//! (resolved from the configured environment variable) lifts the limit. A
//! 401/403 disables the source for the rest of the run.

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use rtx_cache::{CacheError, CacheKey, SourceCache};
use rtx_retry::{ErrorClass, RetryExecutor};
use rtx_types::{Advisory, Dependency, Ecosystem};

use crate::{
    AdvisoryBatch, AdvisoryProvider, DepAdvisories, ProviderError, ProviderSettings,
    build_client, parse_comparator_range, parse_severity,
};

/// Production endpoint for the GitHub REST API.
pub const GITHUB_DEFAULT_BASE: &str = "https://api.github.com";

/// Marker embedded in fetch errors so auth failures survive the cache's
/// error flattening.
const AUTH_MARKER: &str = "authentication failed";

/// Per-dependency advisory provider backed by the GitHub advisory database.
pub struct GithubAdvisoryProvider {
    settings: ProviderSettings,
    client: reqwest::Client,
    cache: SourceCache,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct GithubAdvisory {
    ghsa_id: String,
    severity: Option<String>,
    summary: Option<String>,
    withdrawn_at: Option<String>,
    #[serde(default)]
    vulnerabilities: Vec<GithubVulnerability>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct GithubVulnerability {
    package: Option<GithubPackage>,
    vulnerable_version_range: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct GithubPackage {
    ecosystem: Option<String>,
    name: Option<String>,
}

/// GitHub's name for one of our ecosystems.
fn github_ecosystem(ecosystem: Ecosystem) -> &'static str {
    match ecosystem {
        Ecosystem::Npm => "npm",
        Ecosystem::Pypi => "pip",
        Ecosystem::Cargo => "rust",
        Ecosystem::Rubygems => "rubygems",
        Ecosystem::Go => "go",
        Ecosystem::Maven => "maven",
        Ecosystem::Nuget => "nuget",
        Ecosystem::Composer => "composer",
    }
}

impl GithubAdvisoryProvider {
    /// Provider with the given settings, routing through `cache`.
    pub fn new(settings: ProviderSettings, cache: SourceCache) -> Self {
        let client = build_client(&settings);
        Self {
            settings,
            client,
            cache,
        }
    }

    /// Advisories are cached per package; version filtering happens after.
    fn cache_key(&self, dep: &Dependency) -> CacheKey {
        CacheKey::unversioned("github", &dep.ecosystem.to_string(), &dep.normalized_name())
    }

    async fn advisories_for(&self, dep: &Dependency) -> Result<Vec<Advisory>, CacheError> {
        let key = self.cache_key(dep);
        let url = format!(
            "{}/advisories?ecosystem={}&affects={}&per_page=100",
            self.settings.base_url,
            github_ecosystem(dep.ecosystem),
            dep.normalized_name()
        );
        let client = self.client.clone();
        let token = self.settings.token.clone();
        let retry = self.settings.retry.clone();

        let payload = self
            .cache
            .get_or_fetch(&key, self.settings.ttl, async move {
                let executor = RetryExecutor::new(retry);
                let raw: Vec<GithubAdvisory> = executor
                    .run(|attempt| {
                        let client = client.clone();
                        let url = url.clone();
                        let token = token.clone();
                        async move {
                            debug!(attempt, %url, "querying github advisories");
                            let mut request = client.get(&url);
                            if let Some(token) = &token {
                                request = request.header("Authorization", format!("Bearer {token}"));
                            }
                            let response = request.send().await.map_err(|e| {
                                (anyhow::anyhow!("request failed: {e}"), ErrorClass::Retryable)
                            })?;
                            let status = response.status();
                            if status.as_u16() == 401 || status.as_u16() == 403 {
                                return Err((
                                    anyhow::anyhow!("{AUTH_MARKER}: status {status}"),
                                    ErrorClass::Permanent,
                                ));
                            }
                            if status.is_server_error() || status.as_u16() == 429 {
                                return Err((
                                    anyhow::anyhow!("status {status}"),
                                    ErrorClass::Retryable,
                                ));
                            }
                            if !status.is_success() {
                                return Err((
                                    anyhow::anyhow!("status {status}"),
                                    ErrorClass::Permanent,
                                ));
                            }
                            response.json::<Vec<GithubAdvisory>>().await.map_err(|e| {
                                (
                                    anyhow::anyhow!("malformed payload: {e}"),
                                    ErrorClass::Permanent,
                                )
                            })
                        }
                    })
                    .await?;
                Ok(rtx_cache::Fetched::payload(serde_json::to_value(raw)?))
            })
            .await?;

        let raw: Vec<GithubAdvisory> = serde_json::from_value(payload).unwrap_or_default();
        Ok(raw
            .into_iter()
            .filter_map(|advisory| advisory_for_dep(advisory, dep))
            .collect())
    }
}

#[async_trait::async_trait]
impl AdvisoryProvider for GithubAdvisoryProvider {
    fn source(&self) -> &'static str {
        "github"
    }

    async fn enrich_batch(&self, deps: &[Dependency]) -> Result<AdvisoryBatch, ProviderError> {
        let outcomes: Vec<(Dependency, Result<Vec<Advisory>, CacheError>)> =
            futures::stream::iter(deps.to_vec())
                .map(|dep| async move {
                    let result = self.advisories_for(&dep).await;
                    (dep, result)
                })
                .buffer_unordered(self.settings.max_in_flight.max(1))
                .collect()
                .await;

        let mut batch = AdvisoryBatch::default();
        for (dep, result) in outcomes {
            match result {
                Ok(advisories) => {
                    batch.insert(dep.key(), DepAdvisories::available(advisories));
                }
                Err(err) => {
                    let message = err.to_string();
                    if message.contains(AUTH_MARKER) {
                        return Err(ProviderError::Auth {
                            source_tag: "github".to_string(),
                            message,
                        });
                    }
                    warn!(source = "github", dep = %dep.key(), %message, "marking unavailable");
                    batch.insert(dep.key(), DepAdvisories::unavailable());
                }
            }
        }
        Ok(batch)
    }
}

/// Keep the advisory when one of its vulnerability entries targets `dep`'s
/// package; the kept advisory carries only the ranges for that package.
fn advisory_for_dep(advisory: GithubAdvisory, dep: &Dependency) -> Option<Advisory> {
    let mut affected = Vec::new();
    for vulnerability in &advisory.vulnerabilities {
        let Some(package) = &vulnerability.package else {
            continue;
        };
        let name_matches = package
            .name
            .as_deref()
            .is_some_and(|n| dep.ecosystem.normalize_name(n) == dep.normalized_name());
        let eco_matches = package
            .ecosystem
            .as_deref()
            .is_none_or(|e| e.eq_ignore_ascii_case(github_ecosystem(dep.ecosystem)));
        if !name_matches || !eco_matches {
            continue;
        }
        if let Some(range) = vulnerability
            .vulnerable_version_range
            .as_deref()
            .and_then(parse_comparator_range)
        {
            affected.push(range);
        }
    }
    if affected.is_empty() {
        return None;
    }

    Some(Advisory {
        id: advisory.ghsa_id,
        source: "github".to_string(),
        severity: advisory
            .severity
            .as_deref()
            .map(parse_severity)
            .unwrap_or(rtx_types::Severity::Low),
        affected,
        withdrawn: advisory.withdrawn_at.is_some(),
        yanked: false,
        summary: advisory.summary.unwrap_or_default(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn dep(eco: Ecosystem, name: &str, version: &str) -> Dependency {
        Dependency {
            ecosystem: eco,
            name: name.to_string(),
            version: version.to_string(),
            manifest_path: PathBuf::from("lock"),
            direct: true,
        }
    }

    #[test]
    fn ecosystem_names_match_github() {
        assert_eq!(github_ecosystem(Ecosystem::Pypi), "pip");
        assert_eq!(github_ecosystem(Ecosystem::Cargo), "rust");
        assert_eq!(github_ecosystem(Ecosystem::Npm), "npm");
    }

    #[test]
    fn advisory_translation_keeps_matching_package_ranges() {
        let advisory: GithubAdvisory = serde_json::from_value(serde_json::json!({
            "ghsa_id": "GHSA-xxxx",
            "severity": "high",
            "summary": "ReDoS",
            "withdrawn_at": null,
            "vulnerabilities": [
                {
                    "package": { "ecosystem": "npm", "name": "lodash" },
                    "vulnerable_version_range": ">= 4.0.0, < 4.17.21"
                },
                {
                    "package": { "ecosystem": "npm", "name": "lodash-es" },
                    "vulnerable_version_range": "< 4.17.21"
                }
            ]
        }))
        .expect("parse");

        let result =
            advisory_for_dep(advisory, &dep(Ecosystem::Npm, "lodash", "4.17.20")).expect("kept");
        assert_eq!(result.id, "GHSA-xxxx");
        assert_eq!(result.severity, rtx_types::Severity::High);
        assert_eq!(result.affected.len(), 1);
        assert!(result.affects("4.17.20"));
    }

    #[test]
    fn advisory_for_other_package_is_dropped() {
        let advisory: GithubAdvisory = serde_json::from_value(serde_json::json!({
            "ghsa_id": "GHSA-yyyy",
            "severity": "critical",
            "vulnerabilities": [
                {
                    "package": { "ecosystem": "npm", "name": "underscore" },
                    "vulnerable_version_range": "< 1.0.0"
                }
            ]
        }))
        .expect("parse");

        assert!(advisory_for_dep(advisory, &dep(Ecosystem::Npm, "lodash", "1.0.0")).is_none());
    }

    #[test]
    fn withdrawn_advisory_is_flagged() {
        let advisory: GithubAdvisory = serde_json::from_value(serde_json::json!({
            "ghsa_id": "GHSA-zzzz",
            "severity": "low",
            "withdrawn_at": "2023-05-01T00:00:00Z",
            "vulnerabilities": [
                {
                    "package": { "ecosystem": "npm", "name": "chalk" },
                    "vulnerable_version_range": "< 5.0.0"
                }
            ]
        }))
        .expect("parse");

        let result =
            advisory_for_dep(advisory, &dep(Ecosystem::Npm, "chalk", "4.0.0")).expect("kept");
        assert!(result.withdrawn);
    }
}
