//! OSV.dev advisory provider.
//!
//! Queries the batch endpoint (`POST /v1/querybatch`) with up to
//! `batch_size` dependencies per request, translates OSV vulnerabilities
//! into [`Advisory`] records, and caches per-dependency results so a rerun
//! within the TTL issues no upstream requests.

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use rtx_cache::{CacheKey, SourceCache};
use rtx_retry::{ErrorClass, RetryExecutor};
use rtx_types::{Advisory, Dependency, Ecosystem, VersionRange};

use crate::{
    AdvisoryBatch, AdvisoryProvider, DepAdvisories, ProviderError, ProviderSettings,
    build_client, parse_severity,
};

/// Production endpoint for OSV.dev.
pub const OSV_DEFAULT_BASE: &str = "https://api.osv.dev";

/// Batch advisory provider backed by OSV.dev.
pub struct OsvProvider {
    settings: ProviderSettings,
    client: reqwest::Client,
    cache: SourceCache,
}

#[derive(Debug, Serialize)]
struct OsvBatchQuery {
    queries: Vec<OsvSingleQuery>,
}

#[derive(Debug, Serialize)]
struct OsvSingleQuery {
    version: String,
    package: OsvPackageQuery,
}

#[derive(Debug, Serialize)]
struct OsvPackageQuery {
    name: String,
    ecosystem: String,
}

#[derive(Debug, Deserialize)]
struct OsvBatchResponse {
    results: Vec<OsvBatchResult>,
}

#[derive(Debug, Deserialize)]
struct OsvBatchResult {
    vulns: Option<Vec<OsvVulnerability>>,
}

#[derive(Debug, Deserialize)]
struct OsvVulnerability {
    id: String,
    summary: Option<String>,
    withdrawn: Option<String>,
    database_specific: Option<OsvDatabaseSpecific>,
    affected: Option<Vec<OsvAffected>>,
}

#[derive(Debug, Deserialize)]
struct OsvDatabaseSpecific {
    severity: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OsvAffected {
    package: Option<OsvAffectedPackage>,
    ranges: Option<Vec<OsvRange>>,
    versions: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct OsvAffectedPackage {
    name: String,
    ecosystem: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OsvRange {
    #[serde(rename = "type")]
    range_type: String,
    events: Vec<OsvEvent>,
}

#[derive(Debug, Default, Deserialize)]
struct OsvEvent {
    introduced: Option<String>,
    fixed: Option<String>,
    last_affected: Option<String>,
}

/// OSV's name for one of our ecosystems.
fn osv_ecosystem(ecosystem: Ecosystem) -> &'static str {
    match ecosystem {
        Ecosystem::Npm => "npm",
        Ecosystem::Pypi => "PyPI",
        Ecosystem::Cargo => "crates.io",
        Ecosystem::Rubygems => "RubyGems",
        Ecosystem::Go => "Go",
        Ecosystem::Maven => "Maven",
        Ecosystem::Nuget => "NuGet",
        Ecosystem::Composer => "Packagist",
    }
}

impl OsvProvider {
    /// Provider with the given settings, routing through `cache`.
    pub fn new(settings: ProviderSettings, cache: SourceCache) -> Self {
        let client = build_client(&settings);
        Self {
            settings,
            client,
            cache,
        }
    }

    fn cache_key(&self, dep: &Dependency) -> CacheKey {
        CacheKey::versioned(
            "osv",
            &dep.ecosystem.to_string(),
            &dep.normalized_name(),
            &dep.version,
        )
    }

    /// Fetch one chunk from the batch endpoint, with retries.
    async fn fetch_chunk(&self, chunk: &[Dependency]) -> Result<Vec<Vec<Advisory>>, String> {
        let queries = OsvBatchQuery {
            queries: chunk
                .iter()
                .map(|dep| OsvSingleQuery {
                    version: dep.version.clone(),
                    package: OsvPackageQuery {
                        name: dep.normalized_name(),
                        ecosystem: osv_ecosystem(dep.ecosystem).to_string(),
                    },
                })
                .collect(),
        };
        let url = format!("{}/v1/querybatch", self.settings.base_url);

        let executor = RetryExecutor::new(self.settings.retry.clone());
        let response: OsvBatchResponse = executor
            .run(|attempt| {
                let client = self.client.clone();
                let url = url.clone();
                let body = &queries;
                async move {
                    debug!(attempt, count = body.queries.len(), "querying osv batch");
                    let response = client.post(&url).json(body).send().await.map_err(|e| {
                        (format!("request failed: {e}"), ErrorClass::Retryable)
                    })?;
                    let status = response.status();
                    if status.is_server_error() || status.as_u16() == 429 {
                        return Err((format!("status {status}"), ErrorClass::Retryable));
                    }
                    if !status.is_success() {
                        return Err((format!("status {status}"), ErrorClass::Permanent));
                    }
                    response
                        .json::<OsvBatchResponse>()
                        .await
                        .map_err(|e| (format!("malformed payload: {e}"), ErrorClass::Permanent))
                }
            })
            .await?;

        if response.results.len() != chunk.len() {
            return Err(format!(
                "result count mismatch: sent {}, got {}",
                chunk.len(),
                response.results.len()
            ));
        }

        Ok(response
            .results
            .into_iter()
            .zip(chunk)
            .map(|(result, dep)| {
                result
                    .vulns
                    .unwrap_or_default()
                    .into_iter()
                    .map(|vuln| advisory_from_vuln(vuln, dep))
                    .collect()
            })
            .collect())
    }
}

#[async_trait::async_trait]
impl AdvisoryProvider for OsvProvider {
    fn source(&self) -> &'static str {
        "osv"
    }

    async fn enrich_batch(&self, deps: &[Dependency]) -> Result<AdvisoryBatch, ProviderError> {
        let mut batch = AdvisoryBatch::default();
        let mut missing: Vec<Dependency> = Vec::new();

        for dep in deps {
            let key = self.cache_key(dep);
            match self.cache.get(&key) {
                Some(payload) => {
                    let advisories: Vec<Advisory> =
                        serde_json::from_value(payload).unwrap_or_default();
                    batch.insert(dep.key(), DepAdvisories::available(advisories));
                }
                None => missing.push(dep.clone()),
            }
        }

        let chunks: Vec<Vec<Dependency>> = missing
            .chunks(self.settings.batch_size.max(1))
            .map(<[Dependency]>::to_vec)
            .collect();

        let outcomes: Vec<(Vec<Dependency>, Result<Vec<Vec<Advisory>>, String>)> =
            futures::stream::iter(chunks)
                .map(|chunk| async move {
                    let result = self.fetch_chunk(&chunk).await;
                    (chunk, result)
                })
                .buffer_unordered(self.settings.max_in_flight.max(1))
                .collect()
                .await;

        for (chunk, result) in outcomes {
            match result {
                Ok(per_dep) => {
                    for (dep, advisories) in chunk.iter().zip(per_dep) {
                        let key = self.cache_key(dep);
                        if let Ok(payload) = serde_json::to_value(&advisories) {
                            self.cache.put(&key, payload, self.settings.ttl);
                        }
                        batch.insert(dep.key(), DepAdvisories::available(advisories));
                    }
                }
                Err(message) => {
                    warn!(source = "osv", %message, "batch failed, marking chunk unavailable");
                    for dep in &chunk {
                        batch.insert(dep.key(), DepAdvisories::unavailable());
                    }
                }
            }
        }

        Ok(batch)
    }
}

/// Translate one OSV vulnerability into an [`Advisory`] for `dep`.
fn advisory_from_vuln(vuln: OsvVulnerability, dep: &Dependency) -> Advisory {
    let mut affected = Vec::new();
    for entry in vuln.affected.unwrap_or_default() {
        if let Some(package) = &entry.package {
            let name_matches = dep.ecosystem.normalize_name(&package.name) == dep.normalized_name();
            let eco_matches = package
                .ecosystem
                .as_deref()
                .is_none_or(|e| e == osv_ecosystem(dep.ecosystem));
            if !name_matches || !eco_matches {
                continue;
            }
        }
        for range in entry.ranges.unwrap_or_default() {
            if range.range_type.eq_ignore_ascii_case("git") {
                continue;
            }
            affected.extend(ranges_from_events(&range.events));
        }
        for version in entry.versions.unwrap_or_default() {
            affected.push(VersionRange {
                introduced: Some(version.clone()),
                fixed: None,
                last_affected: Some(version),
            });
        }
    }
    if affected.is_empty() {
        // The source returned this record for the queried version, so the
        // advisory covers it even when no range survived translation.
        affected.push(VersionRange {
            introduced: Some(dep.version.clone()),
            fixed: None,
            last_affected: Some(dep.version.clone()),
        });
    }

    let severity = vuln
        .database_specific
        .and_then(|d| d.severity)
        .map(|label| parse_severity(&label))
        .unwrap_or(rtx_types::Severity::Low);

    Advisory {
        id: vuln.id,
        source: "osv".to_string(),
        severity,
        affected,
        withdrawn: vuln.withdrawn.is_some(),
        yanked: false,
        summary: vuln.summary.unwrap_or_default(),
    }
}

/// Fold an OSV event list into version ranges.
///
/// Each `introduced` opens a range; `fixed` or `last_affected` closes the
/// most recently opened one.
fn ranges_from_events(events: &[OsvEvent]) -> Vec<VersionRange> {
    let mut ranges: Vec<VersionRange> = Vec::new();
    for event in events {
        if let Some(introduced) = &event.introduced {
            ranges.push(VersionRange {
                // "0" is OSV shorthand for "since forever".
                introduced: (introduced != "0").then(|| introduced.clone()),
                fixed: None,
                last_affected: None,
            });
        }
        if let Some(fixed) = &event.fixed
            && let Some(last) = ranges.last_mut()
        {
            last.fixed = Some(fixed.clone());
        }
        if let Some(last_affected) = &event.last_affected
            && let Some(last) = ranges.last_mut()
        {
            last.last_affected = Some(last_affected.clone());
        }
    }
    ranges
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn dep(name: &str, version: &str) -> Dependency {
        Dependency {
            ecosystem: Ecosystem::Npm,
            name: name.to_string(),
            version: version.to_string(),
            manifest_path: PathBuf::from("package-lock.json"),
            direct: true,
        }
    }

    #[test]
    fn ecosystem_names_match_osv() {
        assert_eq!(osv_ecosystem(Ecosystem::Npm), "npm");
        assert_eq!(osv_ecosystem(Ecosystem::Pypi), "PyPI");
        assert_eq!(osv_ecosystem(Ecosystem::Cargo), "crates.io");
        assert_eq!(osv_ecosystem(Ecosystem::Composer), "Packagist");
    }

    #[test]
    fn events_fold_into_ranges() {
        let events = vec![
            OsvEvent {
                introduced: Some("0".to_string()),
                ..OsvEvent::default()
            },
            OsvEvent {
                fixed: Some("4.17.21".to_string()),
                ..OsvEvent::default()
            },
        ];
        let ranges = ranges_from_events(&events);
        assert_eq!(ranges.len(), 1);
        assert!(ranges[0].introduced.is_none());
        assert_eq!(ranges[0].fixed.as_deref(), Some("4.17.21"));
        assert!(ranges[0].contains("4.17.20"));
        assert!(!ranges[0].contains("4.17.21"));
    }

    #[test]
    fn vuln_translation_filters_other_packages() {
        let vuln: OsvVulnerability = serde_json::from_value(serde_json::json!({
            "id": "GHSA-aaaa",
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
                },
                {
                    "package": { "name": "underscore", "ecosystem": "npm" },
                    "ranges": [
                        { "type": "SEMVER", "events": [ { "introduced": "0" } ] }
                    ]
                }
            ]
        }))
        .expect("parse vuln");

        let advisory = advisory_from_vuln(vuln, &dep("lodash", "4.17.20"));
        assert_eq!(advisory.severity, rtx_types::Severity::Critical);
        assert_eq!(advisory.affected.len(), 1);
        assert!(advisory.affects("4.17.20"));
        assert!(!advisory.affects("4.17.21"));
        assert!(!advisory.withdrawn);
    }

    #[test]
    fn vuln_without_ranges_covers_queried_version() {
        let vuln: OsvVulnerability = serde_json::from_value(serde_json::json!({
            "id": "OSV-noranges",
        }))
        .expect("parse vuln");

        let advisory = advisory_from_vuln(vuln, &dep("leftpad", "1.3.0"));
        assert!(advisory.affects("1.3.0"));
        assert!(!advisory.affects("1.3.1"));
    }

    #[test]
    fn withdrawn_timestamp_marks_withdrawn() {
        let vuln: OsvVulnerability = serde_json::from_value(serde_json::json!({
            "id": "OSV-gone",
            "withdrawn": "2024-01-01T00:00:00Z",
        }))
        .expect("parse vuln");
        let advisory = advisory_from_vuln(vuln, &dep("x", "1.0.0"));
        assert!(advisory.withdrawn);
    }
}
