//! crates.io metadata provider.
//!
//! Fetches `GET /api/v1/crates/<name>` (version list with yank flags and
//! download counts) and the public owners endpoint for the maintainer
//! count. Owners lookups are best-effort: registries behind a mirror often
//! omit them, and an absent count never asserts a signal.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, warn};

use rtx_cache::{CacheKey, Fetched, SourceCache};
use rtx_retry::RetryExecutor;
use rtx_types::{Dependency, Ecosystem, ReleaseMetadata};

use crate::npm::fetch_json_or_not_found;
use crate::{MetadataProvider, PopularCorpus, ProviderError, ProviderSettings, build_client};

/// Production endpoint for crates.io.
pub const CRATES_IO_DEFAULT_BASE: &str = "https://crates.io";

/// Metadata provider for crates.io.
pub struct CratesIoMetadataProvider {
    settings: ProviderSettings,
    client: reqwest::Client,
    cache: SourceCache,
    corpus: PopularCorpus,
}

#[derive(Debug, Default, Deserialize)]
struct CrateResponse {
    #[serde(rename = "crate", default)]
    crate_data: CrateData,
    #[serde(default)]
    versions: Vec<CrateVersion>,
}

#[derive(Debug, Default, Deserialize)]
struct CrateData {
    #[serde(default)]
    downloads: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct CrateVersion {
    #[serde(default)]
    num: String,
    #[serde(default)]
    created_at: Option<String>,
    #[serde(default)]
    yanked: bool,
}

#[derive(Debug, Default, Deserialize)]
struct OwnersResponse {
    #[serde(default)]
    users: Vec<Value>,
}

impl CratesIoMetadataProvider {
    /// Provider with the given settings, routing through `cache`.
    pub fn new(settings: ProviderSettings, cache: SourceCache) -> Self {
        let client = build_client(&settings);
        Self {
            settings,
            client,
            cache,
            corpus: PopularCorpus::bundled(Ecosystem::Cargo),
        }
    }

    /// Replace the popular-name corpus used for typosquat candidates.
    pub fn with_corpus(mut self, corpus: PopularCorpus) -> Self {
        self.corpus = corpus;
        self
    }

    async fn fetch_payload(&self, dep: &Dependency) -> anyhow::Result<Value> {
        let name = dep.normalized_name();
        let key = CacheKey::unversioned("crates-io", "cargo", &name);
        let crate_url = format!("{}/api/v1/crates/{}", self.settings.base_url, name);
        let owners_url = format!("{}/api/v1/crates/{}/owners", self.settings.base_url, name);
        let client = self.client.clone();
        let retry = self.settings.retry.clone();
        let negative_ttl = self.settings.negative_ttl;

        self.cache
            .get_or_fetch(&key, self.settings.ttl, async move {
                let executor = RetryExecutor::new(retry);
                let doc: Option<Value> = executor
                    .run(|attempt| {
                        let client = client.clone();
                        let url = crate_url.clone();
                        async move {
                            debug!(attempt, %url, "fetching crates.io crate document");
                            fetch_json_or_not_found(&client, &url).await
                        }
                    })
                    .await
                    .map_err(anyhow::Error::msg)?;

                let Some(doc) = doc else {
                    return match negative_ttl {
                        Some(ttl) => Ok(Fetched {
                            payload: json!({ "not_found": true }),
                            ttl_override: Some(ttl),
                        }),
                        None => anyhow::bail!("crate not found"),
                    };
                };

                // Owners are best-effort; token scopes and mirrors may hide them.
                let owners = match client.get(&owners_url).send().await {
                    Ok(response) if response.status().is_success() => {
                        response.json::<Value>().await.ok()
                    }
                    _ => None,
                };

                Ok(Fetched::payload(json!({
                    "doc": doc,
                    "owners": owners,
                })))
            })
            .await
            .map_err(anyhow::Error::new)
    }

    fn metadata_from_payload(&self, payload: &Value, dep: &Dependency) -> ReleaseMetadata {
        if payload.get("not_found").is_some() {
            return ReleaseMetadata::unknown("crates-io");
        }
        let doc: CrateResponse = payload
            .get("doc")
            .cloned()
            .map(serde_json::from_value)
            .and_then(Result::ok)
            .unwrap_or_default();
        let owners: Option<OwnersResponse> = payload
            .get("owners")
            .filter(|v| !v.is_null())
            .cloned()
            .map(serde_json::from_value)
            .and_then(Result::ok);

        let now = Utc::now();
        let mut latest: Option<DateTime<Utc>> = None;
        let mut recent: u64 = 0;
        for version in &doc.versions {
            let Some(ts) = version
                .created_at
                .as_deref()
                .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
            else {
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

        let version_yanked = doc
            .versions
            .iter()
            .any(|v| v.num == dep.version && v.yanked);

        ReleaseMetadata {
            source: "crates-io".to_string(),
            latest_release: latest,
            total_releases: Some(doc.versions.len() as u64),
            releases_30d: Some(recent),
            maintainer_count: owners.map(|o| o.users.len() as u64),
            downloads: doc.crate_data.downloads,
            deprecated: false,
            version_yanked,
            close_names: self.corpus.close_names(
                &dep.normalized_name(),
                self.settings.typosquat_distance,
            ),
        }
    }
}

#[async_trait::async_trait]
impl MetadataProvider for CratesIoMetadataProvider {
    fn source(&self) -> &'static str {
        "crates-io"
    }

    fn ecosystem(&self) -> Ecosystem {
        Ecosystem::Cargo
    }

    async fn fetch(&self, dep: &Dependency) -> Result<ReleaseMetadata, ProviderError> {
        let payload = match self.fetch_payload(dep).await {
            Ok(payload) => payload,
            Err(err) => {
                warn!(source = "crates-io", dep = %dep.key(), err = %format!("{err:#}"), "metadata fetch failed");
                return Err(ProviderError::Unavailable {
                    source_tag: "crates-io".to_string(),
                    message: format!("{err:#}"),
                });
            }
        };
        Ok(self.metadata_from_payload(&payload, dep))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn provider() -> CratesIoMetadataProvider {
        let settings = ProviderSettings {
            base_url: CRATES_IO_DEFAULT_BASE.to_string(),
            timeout: std::time::Duration::from_secs(5),
            retry: rtx_retry::RetryConfig::for_retries(0),
            batch_size: 1,
            max_in_flight: 1,
            token: None,
            ttl: std::time::Duration::from_secs(60),
            negative_ttl: None,
            typosquat_distance: 2,
        };
        CratesIoMetadataProvider::new(settings, SourceCache::memory_only("crates-io", 8))
    }

    fn dep(name: &str, version: &str) -> Dependency {
        Dependency {
            ecosystem: Ecosystem::Cargo,
            name: name.to_string(),
            version: version.to_string(),
            manifest_path: PathBuf::from("Cargo.lock"),
            direct: true,
        }
    }

    #[test]
    fn payload_parsing_derives_fields() {
        let payload = json!({
            "doc": {
                "crate": { "downloads": 500_000_000u64 },
                "versions": [
                    { "num": "1.0.200", "created_at": "2024-05-01T00:00:00Z", "yanked": false },
                    { "num": "1.0.199", "created_at": "2024-04-01T00:00:00Z", "yanked": true }
                ]
            },
            "owners": { "users": [ { "login": "dtolnay" } ] }
        });

        let meta = provider().metadata_from_payload(&payload, &dep("serde", "1.0.200"));
        assert_eq!(meta.total_releases, Some(2));
        assert_eq!(meta.maintainer_count, Some(1));
        assert_eq!(meta.downloads, Some(500_000_000));
        assert!(!meta.version_yanked);
        assert!(meta.latest_release.is_some());
    }

    #[test]
    fn yanked_version_is_flagged() {
        let payload = json!({
            "doc": {
                "crate": {},
                "versions": [
                    { "num": "0.2.0", "created_at": "2023-01-01T00:00:00Z", "yanked": true }
                ]
            },
            "owners": null
        });
        let meta = provider().metadata_from_payload(&payload, &dep("oops", "0.2.0"));
        assert!(meta.version_yanked);
        assert!(meta.maintainer_count.is_none());
    }
}
