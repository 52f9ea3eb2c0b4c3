//! npm registry metadata provider.
//!
//! Fetches the package document from the npm registry plus the last-month
//! download count, and derives release cadence, maintainer count, and
//! deprecation facts for one dependency. The combined payload is cached
//! per package; per-version facts are derived from it at read time.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, warn};

use rtx_cache::{CacheKey, Fetched, SourceCache};
use rtx_retry::{ErrorClass, RetryExecutor};
use rtx_types::{Dependency, Ecosystem, ReleaseMetadata};

use crate::{MetadataProvider, PopularCorpus, ProviderError, ProviderSettings, build_client};

/// Production registry endpoint.
pub const NPM_DEFAULT_BASE: &str = "https://registry.npmjs.org";

/// Production downloads endpoint.
pub const NPM_DOWNLOADS_DEFAULT_BASE: &str = "https://api.npmjs.org";

/// Metadata provider for the npm registry.
pub struct NpmMetadataProvider {
    settings: ProviderSettings,
    downloads_base: String,
    client: reqwest::Client,
    cache: SourceCache,
    corpus: PopularCorpus,
}

#[derive(Debug, Default, Deserialize)]
struct NpmDoc {
    #[serde(default)]
    time: BTreeMap<String, String>,
    #[serde(default)]
    versions: BTreeMap<String, NpmVersionDoc>,
    #[serde(default)]
    maintainers: Vec<Value>,
}

#[derive(Debug, Default, Deserialize)]
struct NpmVersionDoc {
    deprecated: Option<Value>,
}

impl NpmMetadataProvider {
    /// Provider with the given settings, routing through `cache`.
    pub fn new(settings: ProviderSettings, cache: SourceCache) -> Self {
        let client = build_client(&settings);
        Self {
            settings,
            downloads_base: NPM_DOWNLOADS_DEFAULT_BASE.to_string(),
            client,
            cache,
            corpus: PopularCorpus::bundled(Ecosystem::Npm),
        }
    }

    /// Override the downloads endpoint (tests point it at a fixture server).
    pub fn with_downloads_base(mut self, base: &str) -> Self {
        self.downloads_base = base.trim_end_matches('/').to_string();
        self
    }

    /// Replace the popular-name corpus used for typosquat candidates.
    pub fn with_corpus(mut self, corpus: PopularCorpus) -> Self {
        self.corpus = corpus;
        self
    }

    async fn fetch_payload(&self, dep: &Dependency) -> anyhow::Result<Value> {
        let name = dep.normalized_name();
        let key = CacheKey::unversioned("npm", "npm", &name);
        let doc_url = format!("{}/{}", self.settings.base_url, name);
        let downloads_url = format!(
            "{}/downloads/point/last-month/{}",
            self.downloads_base, name
        );
        let client = self.client.clone();
        let retry = self.settings.retry.clone();
        let negative_ttl = self.settings.negative_ttl;

        self.cache
            .get_or_fetch(&key, self.settings.ttl, async move {
                let executor = RetryExecutor::new(retry);
                let doc: Option<Value> = executor
                    .run(|attempt| {
                        let client = client.clone();
                        let url = doc_url.clone();
                        async move {
                            debug!(attempt, %url, "fetching npm package document");
                            fetch_json_or_not_found(&client, &url).await
                        }
                    })
                    .await
                    .map_err(anyhow::Error::msg)?;

                let Some(doc) = doc else {
                    // Package does not exist on the registry.
                    return match negative_ttl {
                        Some(ttl) => Ok(Fetched {
                            payload: json!({ "not_found": true }),
                            ttl_override: Some(ttl),
                        }),
                        None => anyhow::bail!("package not found"),
                    };
                };

                // Download counts are best-effort; their absence never fails
                // the metadata fetch.
                let downloads = match client.get(&downloads_url).send().await {
                    Ok(response) if response.status().is_success() => response
                        .json::<Value>()
                        .await
                        .ok()
                        .and_then(|v| v.get("downloads").and_then(Value::as_u64)),
                    _ => None,
                };

                Ok(Fetched::payload(json!({
                    "doc": doc,
                    "downloads": downloads,
                })))
            })
            .await
            .map_err(anyhow::Error::new)
    }
}

/// GET a JSON document, mapping 404 to `None` and 5xx/429 to retryable.
pub(crate) async fn fetch_json_or_not_found(
    client: &reqwest::Client,
    url: &str,
) -> Result<Option<Value>, (String, ErrorClass)> {
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| (format!("request failed: {e}"), ErrorClass::Retryable))?;
    let status = response.status();
    if status.as_u16() == 404 {
        return Ok(None);
    }
    if status.is_server_error() || status.as_u16() == 429 {
        return Err((format!("status {status}"), ErrorClass::Retryable));
    }
    if !status.is_success() {
        return Err((format!("status {status}"), ErrorClass::Permanent));
    }
    response
        .json::<Value>()
        .await
        .map(Some)
        .map_err(|e| (format!("malformed payload: {e}"), ErrorClass::Permanent))
}

#[async_trait::async_trait]
impl MetadataProvider for NpmMetadataProvider {
    fn source(&self) -> &'static str {
        "npm"
    }

    fn ecosystem(&self) -> Ecosystem {
        Ecosystem::Npm
    }

    async fn fetch(&self, dep: &Dependency) -> Result<ReleaseMetadata, ProviderError> {
        let payload = match self.fetch_payload(dep).await {
            Ok(payload) => payload,
            Err(err) => {
                warn!(source = "npm", dep = %dep.key(), err = %format!("{err:#}"), "metadata fetch failed");
                return Err(ProviderError::Unavailable {
                    source_tag: "npm".to_string(),
                    message: format!("{err:#}"),
                });
            }
        };
        Ok(self.metadata_from_payload(&payload, dep))
    }
}

impl NpmMetadataProvider {
    fn metadata_from_payload(&self, payload: &Value, dep: &Dependency) -> ReleaseMetadata {
        if payload.get("not_found").is_some() {
            return ReleaseMetadata::unknown("npm");
        }
        let doc: NpmDoc = payload
            .get("doc")
            .cloned()
            .map(serde_json::from_value)
            .and_then(Result::ok)
            .unwrap_or_default();

        let now = Utc::now();
        let mut latest: Option<DateTime<Utc>> = None;
        let mut recent: u64 = 0;
        for (version, timestamp) in &doc.time {
            // The time map mixes version entries with bookkeeping keys.
            if version == "created" || version == "modified" {
                continue;
            }
            let Ok(ts) = DateTime::parse_from_rfc3339(timestamp) else {
                continue;
            };
            let ts = ts.with_timezone(&Utc);
            if latest.is_none_or(|l| ts > l) {
                latest = Some(ts);
            }
            if now - ts <= ChronoDuration::days(30) {
                recent += 1;
            }
        }

        let deprecated = doc
            .versions
            .get(&dep.version)
            .is_some_and(|v| v.deprecated.is_some());

        ReleaseMetadata {
            source: "npm".to_string(),
            latest_release: latest,
            total_releases: Some(doc.versions.len() as u64),
            releases_30d: Some(recent),
            maintainer_count: Some(doc.maintainers.len() as u64),
            downloads: payload.get("downloads").and_then(Value::as_u64),
            deprecated,
            version_yanked: false,
            close_names: self.corpus.close_names(
                &dep.normalized_name(),
                self.settings.typosquat_distance,
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn provider() -> NpmMetadataProvider {
        let settings = ProviderSettings {
            base_url: NPM_DEFAULT_BASE.to_string(),
            timeout: std::time::Duration::from_secs(5),
            retry: rtx_retry::RetryConfig::for_retries(0),
            batch_size: 1,
            max_in_flight: 1,
            token: None,
            ttl: std::time::Duration::from_secs(60),
            negative_ttl: None,
            typosquat_distance: 2,
        };
        NpmMetadataProvider::new(settings, SourceCache::memory_only("npm", 8))
    }

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
    fn payload_parsing_derives_fields() {
        let recent = (Utc::now() - ChronoDuration::days(3)).to_rfc3339();
        let payload = json!({
            "doc": {
                "time": {
                    "created": "2015-01-01T00:00:00Z",
                    "modified": "2024-01-01T00:00:00Z",
                    "1.0.0": "2015-02-01T00:00:00Z",
                    "1.1.0": recent,
                },
                "versions": {
                    "1.0.0": {},
                    "1.1.0": { "deprecated": "use something else" },
                },
                "maintainers": [ { "name": "alice" }, { "name": "bob" } ]
            },
            "downloads": 1234
        });

        let meta = provider().metadata_from_payload(&payload, &dep("leftpad", "1.1.0"));
        assert_eq!(meta.total_releases, Some(2));
        assert_eq!(meta.releases_30d, Some(1));
        assert_eq!(meta.maintainer_count, Some(2));
        assert_eq!(meta.downloads, Some(1234));
        assert!(meta.deprecated);
        assert!(meta.latest_release.is_some());
    }

    #[test]
    fn not_found_marker_yields_unknown() {
        let meta = provider().metadata_from_payload(&json!({"not_found": true}), &dep("x", "1.0.0"));
        assert!(meta.latest_release.is_none());
        assert!(meta.total_releases.is_none());
        assert_eq!(meta.source, "npm");
    }

    #[test]
    fn close_names_come_from_corpus() {
        let meta = provider().metadata_from_payload(
            &json!({ "doc": { "time": {}, "versions": {}, "maintainers": [] }, "downloads": null }),
            &dep("lodahs", "1.0.0"),
        );
        assert!(meta.close_names.iter().any(|c| c.name == "lodash"));
    }
}
