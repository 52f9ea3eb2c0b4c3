//! Configuration file handling for rtx.
//!
//! Settings live under the `[rtx]` table of an `rtx.toml` (or `.rtx.toml`)
//! file discovered by walking up from the project root. Individual keys can
//! be overridden by `RTX_*` environment variables, and `RTX_CONFIG` points
//! at an explicit file. Unknown keys under `[rtx]` are ignored with a
//! warning so older binaries tolerate newer config files.
//!
//! # Example
//!
//! ```
//! use rtx_config::RtxConfig;
//!
//! let config = RtxConfig::default();
//! assert_eq!(config.run.global_concurrency, 16);
//! assert_eq!(config.thresholds.abandonment_threshold_days, 540);
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Configuration file names probed in a directory, in order.
pub const CONFIG_FILES: [&str; 2] = ["rtx.toml", ".rtx.toml"];

/// Source tags rtx knows how to drive.
pub const KNOWN_SOURCES: [&str; 5] = ["osv", "github", "npm", "pypi", "crates-io"];

/// Complete rtx configuration, the contents of the `[rtx]` table.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RtxConfig {
    /// Cache sizing and placement.
    #[serde(default)]
    pub cache: CacheConfig,
    /// HTTP defaults applied to sources that do not override them.
    #[serde(default)]
    pub http: HttpConfig,
    /// Run-wide scheduling limits.
    #[serde(default)]
    pub run: RunConfig,
    /// Policy thresholds for the signal deriver.
    #[serde(default)]
    pub thresholds: Thresholds,
    /// Per-source overrides, keyed by source tag.
    #[serde(default)]
    pub sources: BTreeMap<String, SourceConfig>,
    /// Keys we do not recognize; reported once via [`RtxConfig::warn_unknown_keys`].
    #[serde(flatten, skip_serializing_if = "BTreeMap::is_empty")]
    pub unknown: BTreeMap<String, toml::Value>,
}

/// Cache sizing and placement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Cache directory; defaults to `<user cache dir>/rtx`.
    #[serde(default = "default_cache_dir")]
    pub dir: PathBuf,
    /// Maximum in-memory entries retained per source before LRU eviction.
    #[serde(default = "default_max_entries")]
    pub max_entries_per_source: usize,
    /// Default entry time-to-live in seconds.
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
    /// TTL for negative (not-found) results; 0 disables negative caching.
    #[serde(default)]
    pub negative_ttl_secs: u64,
}

fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from(".rtx-cache"))
        .join("rtx")
}

fn default_max_entries() -> usize {
    512
}

fn default_ttl_secs() -> u64 {
    3_600
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dir: default_cache_dir(),
            max_entries_per_source: default_max_entries(),
            ttl_secs: default_ttl_secs(),
            negative_ttl_secs: 0,
        }
    }
}

impl CacheConfig {
    /// Default entry TTL as a [`Duration`].
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

/// HTTP defaults applied to sources without explicit overrides.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Retries after the first attempt for timeouts and 5xx responses.
    #[serde(default = "default_retries")]
    pub retries: u32,
}

fn default_timeout_secs() -> u64 {
    5
}

fn default_retries() -> u32 {
    2
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            retries: default_retries(),
        }
    }
}

/// Run-wide scheduling limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Global ceiling on concurrently executing provider tasks.
    #[serde(default = "default_global_concurrency")]
    pub global_concurrency: usize,
    /// Optional whole-run deadline in seconds; absent means no deadline.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline_secs: Option<u64>,
}

fn default_global_concurrency() -> usize {
    16
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            global_concurrency: default_global_concurrency(),
            deadline_secs: None,
        }
    }
}

impl RunConfig {
    /// The configured deadline as a [`Duration`], when set.
    pub fn deadline(&self) -> Option<Duration> {
        self.deadline_secs.map(Duration::from_secs)
    }
}

/// Policy thresholds consumed by the signal deriver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Thresholds {
    /// Days since the latest release before a package counts as abandoned.
    #[serde(default = "default_abandonment_days")]
    pub abandonment_threshold_days: i64,
    /// Releases in the trailing 30 days that count as high churn.
    #[serde(default = "default_churn_high")]
    pub churn_high_threshold: u64,
    /// Releases in the trailing 30 days that count as medium churn.
    #[serde(default = "default_churn_medium")]
    pub churn_medium_threshold: u64,
    /// Maintainer count at or below which bus factor is zero.
    #[serde(default)]
    pub bus_factor_zero_threshold: u64,
    /// Maintainer count at or below which bus factor is one.
    #[serde(default = "default_bus_factor_one")]
    pub bus_factor_one_threshold: u64,
    /// Total releases below which a package counts as low maturity.
    #[serde(default = "default_low_maturity")]
    pub low_maturity_threshold: u64,
    /// Maximum Levenshtein distance for typosquat candidates.
    #[serde(default = "default_typosquat_distance")]
    pub typosquat_max_distance: u32,
}

fn default_abandonment_days() -> i64 {
    540
}

fn default_churn_high() -> u64 {
    10
}

fn default_churn_medium() -> u64 {
    5
}

fn default_bus_factor_one() -> u64 {
    1
}

fn default_low_maturity() -> u64 {
    3
}

fn default_typosquat_distance() -> u32 {
    2
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            abandonment_threshold_days: default_abandonment_days(),
            churn_high_threshold: default_churn_high(),
            churn_medium_threshold: default_churn_medium(),
            bus_factor_zero_threshold: 0,
            bus_factor_one_threshold: default_bus_factor_one(),
            low_maturity_threshold: default_low_maturity(),
            typosquat_max_distance: default_typosquat_distance(),
        }
    }
}

/// Per-source overrides for batching, concurrency, and auth.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Maximum dependencies per upstream batch request.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Maximum concurrent in-flight requests for this source.
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,
    /// Request timeout in seconds; falls back to `[rtx.http]` when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
    /// Retry count; falls back to `[rtx.http]` when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retries: Option<u32>,
    /// Skip this source entirely.
    #[serde(default)]
    pub disabled: bool,
    /// Environment variable holding the auth token, when the source uses one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_env: Option<String>,
    /// Entry TTL override in seconds; falls back to `[rtx.cache]` when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl_secs: Option<u64>,
}

fn default_batch_size() -> usize {
    100
}

fn default_max_in_flight() -> usize {
    4
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            max_in_flight: default_max_in_flight(),
            timeout_secs: None,
            retries: None,
            disabled: false,
            token_env: None,
            ttl_secs: None,
        }
    }
}

impl RtxConfig {
    /// Effective settings for one source after applying `[rtx.http]` defaults.
    pub fn source(&self, tag: &str) -> SourceConfig {
        let mut cfg = self.sources.get(tag).cloned().unwrap_or_default();
        cfg.timeout_secs = cfg.timeout_secs.or(Some(self.http.timeout_secs));
        cfg.retries = cfg.retries.or(Some(self.http.retries));
        cfg.ttl_secs = cfg.ttl_secs.or(Some(self.cache.ttl_secs));
        cfg
    }

    /// True when the source is disabled by configuration.
    pub fn source_disabled(&self, tag: &str) -> bool {
        self.sources.get(tag).is_some_and(|s| s.disabled)
    }

    /// Log one warning per unrecognized `[rtx]` key, then forget them.
    pub fn warn_unknown_keys(&mut self) {
        for key in std::mem::take(&mut self.unknown).into_keys() {
            warn!(key = %key, "ignoring unknown [rtx] config key");
        }
    }

    /// Validate settings that must hold before any network call.
    pub fn validate(&self) -> Result<()> {
        if self.run.global_concurrency == 0 {
            bail!("run.global_concurrency must be at least 1");
        }
        if self.cache.max_entries_per_source == 0 {
            bail!("cache.max_entries_per_source must be at least 1");
        }
        for (tag, source) in &self.sources {
            if !KNOWN_SOURCES.contains(&tag.as_str()) {
                bail!(
                    "unknown source '{tag}' in [rtx.sources] (known: {})",
                    KNOWN_SOURCES.join(", ")
                );
            }
            if source.batch_size == 0 {
                bail!("sources.{tag}.batch_size must be at least 1");
            }
            if source.max_in_flight == 0 {
                bail!("sources.{tag}.max_in_flight must be at least 1");
            }
        }
        Ok(())
    }

    /// Apply `RTX_*` environment overrides on top of file-loaded values.
    ///
    /// Each override names one key: `RTX_CACHE_DIR`, `RTX_CACHE_TTL_SECS`,
    /// `RTX_HTTP_TIMEOUT_SECS`, `RTX_HTTP_RETRIES`,
    /// `RTX_RUN_GLOBAL_CONCURRENCY`, `RTX_RUN_DEADLINE_SECS`, and
    /// `RTX_THRESHOLDS_<NAME>` for every threshold. Unparseable values are
    /// rejected rather than silently ignored.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Some(dir) = env_var("RTX_CACHE_DIR") {
            self.cache.dir = PathBuf::from(dir);
        }
        set_from_env("RTX_CACHE_MAX_ENTRIES_PER_SOURCE", &mut self.cache.max_entries_per_source)?;
        set_from_env("RTX_CACHE_TTL_SECS", &mut self.cache.ttl_secs)?;
        set_from_env("RTX_CACHE_NEGATIVE_TTL_SECS", &mut self.cache.negative_ttl_secs)?;
        set_from_env("RTX_HTTP_TIMEOUT_SECS", &mut self.http.timeout_secs)?;
        set_from_env("RTX_HTTP_RETRIES", &mut self.http.retries)?;
        set_from_env("RTX_RUN_GLOBAL_CONCURRENCY", &mut self.run.global_concurrency)?;
        if let Some(raw) = env_var("RTX_RUN_DEADLINE_SECS") {
            let secs: u64 = raw
                .parse()
                .with_context(|| format!("invalid RTX_RUN_DEADLINE_SECS: {raw}"))?;
            self.run.deadline_secs = Some(secs);
        }
        set_from_env(
            "RTX_THRESHOLDS_ABANDONMENT_THRESHOLD_DAYS",
            &mut self.thresholds.abandonment_threshold_days,
        )?;
        set_from_env("RTX_THRESHOLDS_CHURN_HIGH_THRESHOLD", &mut self.thresholds.churn_high_threshold)?;
        set_from_env(
            "RTX_THRESHOLDS_CHURN_MEDIUM_THRESHOLD",
            &mut self.thresholds.churn_medium_threshold,
        )?;
        set_from_env(
            "RTX_THRESHOLDS_BUS_FACTOR_ZERO_THRESHOLD",
            &mut self.thresholds.bus_factor_zero_threshold,
        )?;
        set_from_env(
            "RTX_THRESHOLDS_BUS_FACTOR_ONE_THRESHOLD",
            &mut self.thresholds.bus_factor_one_threshold,
        )?;
        set_from_env("RTX_THRESHOLDS_LOW_MATURITY_THRESHOLD", &mut self.thresholds.low_maturity_threshold)?;
        set_from_env(
            "RTX_THRESHOLDS_TYPOSQUAT_MAX_DISTANCE",
            &mut self.thresholds.typosquat_max_distance,
        )?;
        Ok(())
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn set_from_env<T: std::str::FromStr>(name: &str, slot: &mut T) -> Result<()> {
    if let Some(raw) = env_var(name) {
        *slot = raw
            .parse()
            .map_err(|_| anyhow::anyhow!("invalid {name}: {raw}"))?;
    }
    Ok(())
}

/// Top-level file wrapper: everything nests under `[rtx]`.
#[derive(Debug, Default, Serialize, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    rtx: RtxConfig,
}

/// Load configuration for a project root.
///
/// Resolution order: `RTX_CONFIG` if set, otherwise the first of
/// [`CONFIG_FILES`] found walking up from `project_root`. A missing file
/// yields defaults. Environment overrides are applied either way.
pub fn load_config(project_root: &Path) -> Result<RtxConfig> {
    let path = match env_var("RTX_CONFIG") {
        Some(explicit) => Some(PathBuf::from(explicit)),
        None => find_config(project_root),
    };

    let mut config = match path {
        Some(path) => load_config_from_file(&path)?,
        None => RtxConfig::default(),
    };
    config.apply_env_overrides()?;
    config.warn_unknown_keys();
    Ok(config)
}

/// Load configuration from a specific file path.
pub fn load_config_from_file(path: &Path) -> Result<RtxConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file: {}", path.display()))?;
    let file: ConfigFile = toml::from_str(&content)
        .with_context(|| format!("failed to parse config file: {}", path.display()))?;
    Ok(file.rtx)
}

/// Find a configuration file by walking up the directory tree.
pub fn find_config(start_dir: &Path) -> Option<PathBuf> {
    let mut current = start_dir;
    loop {
        for name in CONFIG_FILES {
            let candidate = current.join(name);
            if candidate.exists() {
                return Some(candidate);
            }
        }
        match current.parent() {
            Some(parent) => current = parent,
            None => return None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn defaults_match_documented_values() {
        let config = RtxConfig::default();
        assert_eq!(config.http.timeout_secs, 5);
        assert_eq!(config.http.retries, 2);
        assert_eq!(config.run.global_concurrency, 16);
        assert_eq!(config.cache.max_entries_per_source, 512);
        assert_eq!(config.thresholds.abandonment_threshold_days, 540);
        assert_eq!(config.thresholds.churn_high_threshold, 10);
        assert_eq!(config.thresholds.churn_medium_threshold, 5);
        assert_eq!(config.thresholds.bus_factor_zero_threshold, 0);
        assert_eq!(config.thresholds.bus_factor_one_threshold, 1);
        assert_eq!(config.thresholds.low_maturity_threshold, 3);
        assert_eq!(config.thresholds.typosquat_max_distance, 2);
    }

    #[test]
    fn load_from_toml_under_rtx_table() {
        let td = tempdir().expect("tempdir");
        let path = td.path().join("rtx.toml");
        std::fs::write(
            &path,
            r#"
[rtx.http]
timeout_secs = 9
retries = 5

[rtx.run]
global_concurrency = 4
deadline_secs = 30

[rtx.thresholds]
abandonment_threshold_days = 365

[rtx.sources.osv]
batch_size = 50
max_in_flight = 2

[rtx.sources.github]
disabled = true
token_env = "GH_TOKEN"
"#,
        )
        .expect("write");

        let config = load_config_from_file(&path).expect("load");
        assert_eq!(config.http.timeout_secs, 9);
        assert_eq!(config.run.global_concurrency, 4);
        assert_eq!(config.run.deadline(), Some(Duration::from_secs(30)));
        assert_eq!(config.thresholds.abandonment_threshold_days, 365);
        // Non-overridden thresholds keep their defaults.
        assert_eq!(config.thresholds.churn_high_threshold, 10);
        assert_eq!(config.source("osv").batch_size, 50);
        assert!(config.source_disabled("github"));
        assert_eq!(config.source("github").token_env.as_deref(), Some("GH_TOKEN"));
    }

    #[test]
    fn source_falls_back_to_http_defaults() {
        let config = RtxConfig::default();
        let osv = config.source("osv");
        assert_eq!(osv.timeout_secs, Some(5));
        assert_eq!(osv.retries, Some(2));
        assert_eq!(osv.ttl_secs, Some(3_600));
        assert_eq!(osv.batch_size, 100);
        assert_eq!(osv.max_in_flight, 4);
    }

    #[test]
    fn unknown_keys_are_collected_not_fatal() {
        let td = tempdir().expect("tempdir");
        let path = td.path().join("rtx.toml");
        std::fs::write(
            &path,
            r#"
[rtx]
shiny_future_knob = true

[rtx.http]
timeout_secs = 7
"#,
        )
        .expect("write");

        let mut config = load_config_from_file(&path).expect("load");
        assert!(config.unknown.contains_key("shiny_future_knob"));
        config.warn_unknown_keys();
        assert!(config.unknown.is_empty());
        assert_eq!(config.http.timeout_secs, 7);
    }

    #[test]
    fn validate_rejects_zero_concurrency() {
        let mut config = RtxConfig::default();
        config.run.global_concurrency = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_unknown_source() {
        let mut config = RtxConfig::default();
        config
            .sources
            .insert("warehouse".to_string(), SourceConfig::default());
        let err = config.validate().expect_err("must fail");
        assert!(format!("{err:#}").contains("unknown source"));
    }

    #[test]
    fn validate_accepts_defaults() {
        assert!(RtxConfig::default().validate().is_ok());
    }

    #[test]
    fn env_overrides_win_over_file_values() {
        temp_env::with_vars(
            [
                ("RTX_HTTP_TIMEOUT_SECS", Some("42")),
                ("RTX_RUN_GLOBAL_CONCURRENCY", Some("3")),
                ("RTX_THRESHOLDS_TYPOSQUAT_MAX_DISTANCE", Some("1")),
            ],
            || {
                let mut config = RtxConfig::default();
                config.apply_env_overrides().expect("override");
                assert_eq!(config.http.timeout_secs, 42);
                assert_eq!(config.run.global_concurrency, 3);
                assert_eq!(config.thresholds.typosquat_max_distance, 1);
            },
        );
    }

    #[test]
    fn env_override_rejects_garbage() {
        temp_env::with_var("RTX_HTTP_RETRIES", Some("many"), || {
            let mut config = RtxConfig::default();
            assert!(config.apply_env_overrides().is_err());
        });
    }

    #[test]
    fn find_config_walks_up() {
        let td = tempdir().expect("tempdir");
        let nested = td.path().join("a").join("b");
        std::fs::create_dir_all(&nested).expect("mkdir");
        let config_path = td.path().join(".rtx.toml");
        std::fs::write(&config_path, "[rtx]\n").expect("write");

        let found = find_config(&nested);
        assert_eq!(found, Some(config_path));
    }

    #[test]
    fn missing_config_yields_defaults() {
        let td = tempdir().expect("tempdir");
        temp_env::with_var("RTX_CONFIG", None::<&str>, || {
            let config = load_config(td.path()).expect("load");
            assert_eq!(config.run.global_concurrency, 16);
        });
    }
}
