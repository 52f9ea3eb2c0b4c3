//! Advisory and registry metadata providers for rtx.
//!
//! Heterogeneous upstream sources are unified behind two capabilities:
//! [`AdvisoryProvider`] enriches a borrowed batch of dependencies with
//! vulnerability advisories, and [`MetadataProvider`] fetches release and
//! maintainer facts for a single dependency. Both route every upstream
//! request through a per-source [`SourceCache`](rtx_cache::SourceCache) and
//! bound their own in-flight request count.
//!
//! A provider never omits a dependency from its answer: a dependency it
//! could not resolve after retries is explicitly marked unavailable, so the
//! orchestrator can tell "no advisories" from "source failed". The only
//! error a provider surfaces directly is [`ProviderError::Auth`], which
//! disables the source for the remainder of the run.

use std::time::Duration;

use async_trait::async_trait;
use std::collections::BTreeMap;

use rtx_config::RtxConfig;
use rtx_retry::RetryConfig;
use rtx_types::{Advisory, DepKey, Dependency, Ecosystem, ReleaseMetadata, Severity, VersionRange};

mod crates_io;
mod github;
mod npm;
mod osv;
mod pypi;
mod typosquat;

pub use crates_io::{CRATES_IO_DEFAULT_BASE, CratesIoMetadataProvider};
pub use github::{GITHUB_DEFAULT_BASE, GithubAdvisoryProvider};
pub use npm::{NPM_DEFAULT_BASE, NPM_DOWNLOADS_DEFAULT_BASE, NpmMetadataProvider};
pub use osv::{OSV_DEFAULT_BASE, OsvProvider};
pub use pypi::{PYPI_DEFAULT_BASE, PypiMetadataProvider};
pub use typosquat::PopularCorpus;

/// User agent sent with every upstream request.
pub const USER_AGENT: &str = concat!("rtx/", env!("CARGO_PKG_VERSION"));

/// Errors a provider surfaces to the orchestrator.
///
/// Everything else (timeouts, 5xx, malformed payloads) is absorbed into
/// per-dependency unavailability markers.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// Credentials were rejected; the source is disabled for the run.
    #[error("authentication failed for {source_tag}: {message}")]
    Auth {
        /// Source tag of the failing provider.
        source_tag: String,
        /// Upstream detail, safe to log.
        message: String,
    },
    /// The source could not answer for this query after retries.
    ///
    /// The orchestrator substitutes unknown metadata and annotates the
    /// dependency; the run continues.
    #[error("{source_tag} unavailable: {message}")]
    Unavailable {
        /// Source tag of the failing provider.
        source_tag: String,
        /// Upstream detail, safe to log.
        message: String,
    },
}

/// Advisories (or an unavailability marker) for one dependency.
#[derive(Debug, Clone, Default)]
pub struct DepAdvisories {
    /// Advisories from this source, sorted by id.
    pub advisories: Vec<Advisory>,
    /// False when the source could not answer for this dependency.
    pub available: bool,
}

impl DepAdvisories {
    /// A successful answer (possibly empty).
    pub fn available(mut advisories: Vec<Advisory>) -> Self {
        advisories.sort_by(|a, b| a.id.cmp(&b.id));
        advisories.dedup_by(|a, b| a.id == b.id);
        Self {
            advisories,
            available: true,
        }
    }

    /// The source failed for this dependency.
    pub fn unavailable() -> Self {
        Self {
            advisories: Vec::new(),
            available: false,
        }
    }
}

/// Per-dependency outcome of one advisory batch.
#[derive(Debug, Clone, Default)]
pub struct AdvisoryBatch {
    results: BTreeMap<DepKey, DepAdvisories>,
}

impl AdvisoryBatch {
    /// Record the outcome for one dependency.
    pub fn insert(&mut self, key: DepKey, outcome: DepAdvisories) {
        self.results.insert(key, outcome);
    }

    /// Outcome for one dependency, if the provider answered for it.
    pub fn get(&self, key: &DepKey) -> Option<&DepAdvisories> {
        self.results.get(key)
    }

    /// Iterate outcomes in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&DepKey, &DepAdvisories)> {
        self.results.iter()
    }

    /// Consume the batch into its map.
    pub fn into_results(self) -> BTreeMap<DepKey, DepAdvisories> {
        self.results
    }
}

/// A source of vulnerability advisories.
#[async_trait]
pub trait AdvisoryProvider: Send + Sync {
    /// Stable source tag (`osv`, `github`).
    fn source(&self) -> &'static str;

    /// Enrich a borrowed batch of dependencies.
    ///
    /// The returned batch contains an entry for every input dependency.
    /// Results for a fixed input and cache state are identical across calls.
    async fn enrich_batch(&self, deps: &[Dependency]) -> Result<AdvisoryBatch, ProviderError>;
}

/// A per-ecosystem source of release and maintainer metadata.
#[async_trait]
pub trait MetadataProvider: Send + Sync {
    /// Stable source tag (`npm`, `pypi`, `crates-io`).
    fn source(&self) -> &'static str;

    /// The ecosystem this provider can answer for.
    fn ecosystem(&self) -> Ecosystem;

    /// Fetch metadata for one dependency.
    ///
    /// Upstream failure after retries surfaces as
    /// [`ProviderError::Unavailable`]; the orchestrator substitutes
    /// [`ReleaseMetadata::unknown`] so unknown fields never assert a signal.
    async fn fetch(&self, dep: &Dependency) -> Result<ReleaseMetadata, ProviderError>;
}

/// Resolved per-provider settings, assembled from the configuration.
#[derive(Debug, Clone)]
pub struct ProviderSettings {
    /// Primary endpoint base URL.
    pub base_url: String,
    /// Per-request timeout.
    pub timeout: Duration,
    /// Retry policy for timeouts and 5xx responses.
    pub retry: RetryConfig,
    /// Maximum dependencies per upstream batch request.
    pub batch_size: usize,
    /// Maximum concurrent in-flight requests.
    pub max_in_flight: usize,
    /// Auth token resolved from the configured environment variable.
    pub token: Option<String>,
    /// Cache TTL for successful payloads.
    pub ttl: Duration,
    /// Cache TTL for not-found markers; `None` disables negative caching.
    pub negative_ttl: Option<Duration>,
    /// Maximum Levenshtein distance for typosquat candidates.
    pub typosquat_distance: u32,
}

impl ProviderSettings {
    /// Resolve settings for `tag` from the configuration.
    pub fn from_config(config: &RtxConfig, tag: &str, default_base: &str) -> Self {
        let source = config.source(tag);
        let token = source
            .token_env
            .as_deref()
            .and_then(|var| std::env::var(var).ok())
            .filter(|t| !t.is_empty());
        let negative_ttl = (config.cache.negative_ttl_secs > 0)
            .then(|| Duration::from_secs(config.cache.negative_ttl_secs));
        Self {
            base_url: default_base.to_string(),
            timeout: Duration::from_secs(source.timeout_secs.unwrap_or(config.http.timeout_secs)),
            retry: RetryConfig::for_retries(source.retries.unwrap_or(config.http.retries)),
            batch_size: source.batch_size,
            max_in_flight: source.max_in_flight,
            token,
            ttl: Duration::from_secs(source.ttl_secs.unwrap_or(config.cache.ttl_secs)),
            negative_ttl,
            typosquat_distance: config.thresholds.typosquat_max_distance,
        }
    }

    /// Override the endpoint base URL (used by tests and private mirrors).
    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }
}

/// Build the shared HTTP client for one provider.
pub(crate) fn build_client(settings: &ProviderSettings) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(settings.timeout)
        .user_agent(USER_AGENT)
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
}

/// Map an upstream severity label onto our scale.
///
/// `none` means the source examined the report and rated it harmless;
/// unrecognized labels degrade to `low` so a new upstream level is never
/// silently dropped.
pub(crate) fn parse_severity(label: &str) -> Severity {
    match label.to_lowercase().as_str() {
        "critical" => Severity::Critical,
        "high" => Severity::High,
        "medium" | "moderate" => Severity::Medium,
        "low" => Severity::Low,
        "none" => Severity::Safe,
        _ => Severity::Low,
    }
}

/// Parse a comparator-style range (`">= 4.0.0, < 4.17.21"`) into a
/// [`VersionRange`].
///
/// GitHub advisory ranges use `>=`, `<`, `<=`, and `=`; a bare `>` is folded
/// into `>=` since the range grammar carries no exclusive lower bound.
pub(crate) fn parse_comparator_range(spec: &str) -> Option<VersionRange> {
    let mut range = VersionRange::default();
    let mut saw_any = false;
    for part in spec.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        let (op, version) = split_comparator(part)?;
        let version = version.trim().to_string();
        if version.is_empty() {
            return None;
        }
        saw_any = true;
        match op {
            ">=" | ">" => range.introduced = Some(version),
            "<" => range.fixed = Some(version),
            "<=" => range.last_affected = Some(version),
            "=" => {
                range.introduced = Some(version.clone());
                range.last_affected = Some(version);
            }
            _ => return None,
        }
    }
    saw_any.then_some(range)
}

fn split_comparator(part: &str) -> Option<(&str, &str)> {
    for op in [">=", "<=", ">", "<", "="] {
        if let Some(rest) = part.strip_prefix(op) {
            return Some((op, rest));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_labels_map_to_scale() {
        assert_eq!(parse_severity("CRITICAL"), Severity::Critical);
        assert_eq!(parse_severity("High"), Severity::High);
        assert_eq!(parse_severity("moderate"), Severity::Medium);
        assert_eq!(parse_severity("medium"), Severity::Medium);
        assert_eq!(parse_severity("low"), Severity::Low);
        assert_eq!(parse_severity("none"), Severity::Safe);
        assert_eq!(parse_severity("galactic"), Severity::Low);
    }

    #[test]
    fn comparator_range_parses_bounds() {
        let range = parse_comparator_range(">= 4.0.0, < 4.17.21").expect("range");
        assert_eq!(range.introduced.as_deref(), Some("4.0.0"));
        assert_eq!(range.fixed.as_deref(), Some("4.17.21"));
        assert!(range.contains("4.17.20"));
        assert!(!range.contains("4.17.21"));
    }

    #[test]
    fn comparator_range_exact_pin() {
        let range = parse_comparator_range("= 1.2.3").expect("range");
        assert!(range.contains("1.2.3"));
        assert!(!range.contains("1.2.4"));
    }

    #[test]
    fn comparator_range_upper_only() {
        let range = parse_comparator_range("<= 2.0.0").expect("range");
        assert!(range.contains("2.0.0"));
        assert!(!range.contains("2.0.1"));
    }

    #[test]
    fn comparator_range_rejects_garbage() {
        assert!(parse_comparator_range("").is_none());
        assert!(parse_comparator_range("~> 1.0").is_none());
    }

    #[test]
    fn dep_advisories_sort_and_dedup() {
        let mk = |id: &str| Advisory {
            id: id.to_string(),
            source: "osv".to_string(),
            severity: Severity::Low,
            affected: Vec::new(),
            withdrawn: false,
            yanked: false,
            summary: String::new(),
        };
        let outcome = DepAdvisories::available(vec![mk("B"), mk("A"), mk("B")]);
        let ids: Vec<&str> = outcome.advisories.iter().map(|a| a.id.as_str()).collect();
        assert_eq!(ids, vec!["A", "B"]);
        assert!(outcome.available);
    }
}
