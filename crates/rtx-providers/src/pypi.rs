//! PyPI metadata provider.
//!
//! Fetches `GET /pypi/<name>/json` and derives release cadence and yank
//! status. PyPI does not expose maintainer or download counts through this
//! endpoint, so those fields stay unknown and never assert a signal.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, warn};

use rtx_cache::{CacheKey, Fetched, SourceCache};
use rtx_retry::RetryExecutor;
use rtx_types::{Dependency, Ecosystem, ReleaseMetadata};

use crate::npm::fetch_json_or_not_found;
use crate::{MetadataProvider, PopularCorpus, ProviderError, ProviderSettings, build_client};

/// Production endpoint for the PyPI JSON API.
pub const PYPI_DEFAULT_BASE: &str = "https://pypi.org";

/// Metadata provider for PyPI.
pub struct PypiMetadataProvider {
    settings: ProviderSettings,
    client: reqwest::Client,
    cache: SourceCache,
    corpus: PopularCorpus,
}

#[derive(Debug, Default, Deserialize)]
struct PypiDoc {
    #[serde(default)]
    releases: BTreeMap<String, Vec<PypiFile>>,
}

#[derive(Debug, Default, Deserialize)]
struct PypiFile {
    #[serde(default)]
    upload_time_iso_8601: Option<String>,
    #[serde(default)]
    yanked: bool,
}

impl PypiMetadataProvider {
    /// Provider with the given settings, routing through `cache`.
    pub fn new(settings: ProviderSettings, cache: SourceCache) -> Self {
        let client = build_client(&settings);
        Self {
            settings,
            client,
            cache,
            corpus: PopularCorpus::bundled(Ecosystem::Pypi),
        }
    }

    /// Replace the popular-name corpus used for typosquat candidates.
    pub fn with_corpus(mut self, corpus: PopularCorpus) -> Self {
        self.corpus = corpus;
        self
    }

    async fn fetch_payload(&self, dep: &Dependency) -> anyhow::Result<Value> {
        let name = dep.normalized_name();
        let key = CacheKey::unversioned("pypi", "pypi", &name);
        let url = format!("{}/pypi/{}/json", self.settings.base_url, name);
        let client = self.client.clone();
        let retry = self.settings.retry.clone();
        let negative_ttl = self.settings.negative_ttl;

        self.cache
            .get_or_fetch(&key, self.settings.ttl, async move {
                let executor = RetryExecutor::new(retry);
                let doc: Option<Value> = executor
                    .run(|attempt| {
                        let client = client.clone();
                        let url = url.clone();
                        async move {
                            debug!(attempt, %url, "fetching pypi project document");
                            fetch_json_or_not_found(&client, &url).await
                        }
                    })
                    .await
                    .map_err(anyhow::Error::msg)?;

                match doc {
                    Some(doc) => Ok(Fetched::payload(json!({ "doc": doc }))),
                    None => match negative_ttl {
                        Some(ttl) => Ok(Fetched {
                            payload: json!({ "not_found": true }),
                            ttl_override: Some(ttl),
                        }),
                        None => anyhow::bail!("project not found"),
                    },
                }
            })
            .await
            .map_err(anyhow::Error::new)
    }

    fn metadata_from_payload(&self, payload: &Value, dep: &Dependency) -> ReleaseMetadata {
        if payload.get("not_found").is_some() {
            return ReleaseMetadata::unknown("pypi");
        }
        let doc: PypiDoc = payload
            .get("doc")
            .cloned()
            .map(serde_json::from_value)
            .and_then(Result::ok)
            .unwrap_or_default();

        let now = Utc::now();
        let mut latest: Option<DateTime<Utc>> = None;
        let mut recent: u64 = 0;
        for files in doc.releases.values() {
            let mut version_time: Option<DateTime<Utc>> = None;
            for file in files {
                let Some(ts) = file
                    .upload_time_iso_8601
                    .as_deref()
                    .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
                else {
                    continue;
                };
                let ts = ts.with_timezone(&Utc);
                if version_time.is_none_or(|v| ts > v) {
                    version_time = Some(ts);
                }
            }
            if let Some(ts) = version_time {
                if latest.is_none_or(|l| ts > l) {
                    latest = Some(ts);
                }
                if now - ts <= ChronoDuration::days(30) {
                    recent += 1;
                }
            }
        }

        let version_yanked = doc
            .releases
            .get(&dep.version)
            .is_some_and(|files| !files.is_empty() && files.iter().all(|f| f.yanked));

        ReleaseMetadata {
            source: "pypi".to_string(),
            latest_release: latest,
            total_releases: Some(doc.releases.len() as u64),
            releases_30d: Some(recent),
            // The JSON API exposes neither maintainers nor download counts.
            maintainer_count: None,
            downloads: None,
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
impl MetadataProvider for PypiMetadataProvider {
    fn source(&self) -> &'static str {
        "pypi"
    }

    fn ecosystem(&self) -> Ecosystem {
        Ecosystem::Pypi
    }

    async fn fetch(&self, dep: &Dependency) -> Result<ReleaseMetadata, ProviderError> {
        let payload = match self.fetch_payload(dep).await {
            Ok(payload) => payload,
            Err(err) => {
                warn!(source = "pypi", dep = %dep.key(), err = %format!("{err:#}"), "metadata fetch failed");
                return Err(ProviderError::Unavailable {
                    source_tag: "pypi".to_string(),
                    message: format!("{err:#}"),
                });
            }
        };
        Ok(self.metadata_from_payload(&payload, dep))
    }
}
