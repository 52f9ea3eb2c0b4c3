//! # Types
//!
//! Core domain types for rtx: ecosystems, dependencies, advisories,
//! release metadata, trust signals, verdicts, and the report.
//!
//! This module defines the fundamental data structures used throughout rtx:
//! - [`Dependency`] - A single `(ecosystem, name, version)` observation from a manifest
//! - [`Advisory`] - A vulnerability record from an upstream source
//! - [`ReleaseMetadata`] - Registry-side release and maintainer facts
//! - [`TrustSignal`] - Boolean assertions derived for one dependency
//! - [`Verdict`] - The policy engine's output: severity plus ordered reasons
//! - [`Report`] - The ordered collection of verdicts with source outcomes
//!
//! ## Serialization
//!
//! Report-facing types implement `Serialize`/`Deserialize` and form a stable
//! JSON schema identified by [`REPORT_SCHEMA_VERSION`]. The report contains no
//! wall-clock fields, so identical inputs serialize to identical bytes.
//!
//! # Example
//!
//! ```
//! use rtx_types::{Dependency, Ecosystem};
//! use std::path::PathBuf;
//!
//! let dep = Dependency {
//!     ecosystem: Ecosystem::Npm,
//!     name: "Lodash".to_string(),
//!     version: "4.17.20".to_string(),
//!     manifest_path: PathBuf::from("package-lock.json"),
//!     direct: true,
//! };
//! assert_eq!(dep.normalized_name(), "lodash");
//! ```

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Version of the report JSON schema.
pub const REPORT_SCHEMA_VERSION: u32 = 1;

/// The package ecosystem a dependency belongs to.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Ecosystem {
    /// npm (Node.js)
    Npm,
    /// PyPI (Python)
    Pypi,
    /// crates.io (Rust)
    Cargo,
    /// RubyGems (Ruby)
    Rubygems,
    /// Go module proxy
    Go,
    /// Maven Central (JVM)
    Maven,
    /// NuGet (.NET)
    Nuget,
    /// Packagist (PHP)
    Composer,
}

impl Ecosystem {
    /// All supported ecosystems, in serialization order.
    pub const ALL: [Ecosystem; 8] = [
        Ecosystem::Npm,
        Ecosystem::Pypi,
        Ecosystem::Cargo,
        Ecosystem::Rubygems,
        Ecosystem::Go,
        Ecosystem::Maven,
        Ecosystem::Nuget,
        Ecosystem::Composer,
    ];

    /// Normalize a package name the way this ecosystem's registry does.
    ///
    /// Case-insensitive registries lowercase; PyPI additionally folds `_`
    /// and `.` to `-` (PEP 503); crates.io treats `_` and `-` as the same
    /// character. Go and Maven identifiers are case-sensitive and pass
    /// through unchanged.
    pub fn normalize_name(&self, raw: &str) -> String {
        match self {
            Ecosystem::Pypi => raw
                .to_lowercase()
                .chars()
                .map(|c| if c == '_' || c == '.' { '-' } else { c })
                .collect(),
            Ecosystem::Cargo => raw
                .to_lowercase()
                .chars()
                .map(|c| if c == '_' { '-' } else { c })
                .collect(),
            Ecosystem::Npm
            | Ecosystem::Rubygems
            | Ecosystem::Nuget
            | Ecosystem::Composer => raw.to_lowercase(),
            Ecosystem::Go | Ecosystem::Maven => raw.to_string(),
        }
    }
}

impl fmt::Display for Ecosystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Ecosystem::Npm => "npm",
            Ecosystem::Pypi => "pypi",
            Ecosystem::Cargo => "cargo",
            Ecosystem::Rubygems => "rubygems",
            Ecosystem::Go => "go",
            Ecosystem::Maven => "maven",
            Ecosystem::Nuget => "nuget",
            Ecosystem::Composer => "composer",
        };
        write!(f, "{name}")
    }
}

impl FromStr for Ecosystem {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "npm" => Ok(Ecosystem::Npm),
            "pypi" => Ok(Ecosystem::Pypi),
            "cargo" | "crates-io" | "crates.io" => Ok(Ecosystem::Cargo),
            "rubygems" | "gem" => Ok(Ecosystem::Rubygems),
            "go" | "golang" => Ok(Ecosystem::Go),
            "maven" => Ok(Ecosystem::Maven),
            "nuget" => Ok(Ecosystem::Nuget),
            "composer" | "packagist" => Ok(Ecosystem::Composer),
            other => Err(format!("unknown ecosystem: {other}")),
        }
    }
}

/// A single dependency observation from a manifest or lockfile.
///
/// Created by scanners and immutable thereafter. Two observations are the
/// same dependency when their [`DepKey`]s match.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dependency {
    /// Ecosystem the dependency was resolved in.
    pub ecosystem: Ecosystem,
    /// Package name as written in the manifest.
    pub name: String,
    /// Resolved version, treated as an opaque string.
    pub version: String,
    /// Manifest or lockfile the observation came from.
    pub manifest_path: PathBuf,
    /// True when the project depends on this package directly.
    pub direct: bool,
}

impl Dependency {
    /// The registry-normalized form of the package name.
    pub fn normalized_name(&self) -> String {
        self.ecosystem.normalize_name(&self.name)
    }

    /// The deduplication key for this dependency.
    pub fn key(&self) -> DepKey {
        DepKey {
            ecosystem: self.ecosystem,
            name: self.normalized_name(),
            version: self.version.clone(),
        }
    }
}

/// Deduplication key: `(ecosystem, normalized name, version)`.
///
/// Unique across a working set; ordering is the stable working-set order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DepKey {
    /// Ecosystem component of the key.
    pub ecosystem: Ecosystem,
    /// Normalized package name.
    pub name: String,
    /// Opaque version string.
    pub version: String,
}

impl fmt::Display for DepKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}@{}", self.ecosystem, self.name, self.version)
    }
}

/// Severity scale shared by advisories, signals, and verdicts.
///
/// Ordering is `Safe < Low < Medium < High < Critical`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// No concern detected.
    #[default]
    Safe,
    /// Minor concern; informational in most gates.
    Low,
    /// Should be reviewed before upgrading.
    Medium,
    /// Likely unsafe to adopt without action.
    High,
    /// Known-exploitable or actively dangerous.
    Critical,
}

impl Severity {
    /// CI exit-code contribution: `safe|low -> 0`, `medium -> 1`, `high|critical -> 2`.
    pub fn exit_code(self) -> i32 {
        match self {
            Severity::Safe | Severity::Low => 0,
            Severity::Medium => 1,
            Severity::High | Severity::Critical => 2,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Severity::Safe => "safe",
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        };
        write!(f, "{name}")
    }
}

/// A vulnerability record from an upstream advisory source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Advisory {
    /// Stable advisory identifier (e.g. `GHSA-...`, `RUSTSEC-...`).
    pub id: String,
    /// Source tag of the provider that produced the record.
    pub source: String,
    /// Severity assigned by the source.
    pub severity: Severity,
    /// Version ranges the advisory declares as affected.
    pub affected: Vec<VersionRange>,
    /// True when the source has withdrawn the advisory.
    pub withdrawn: bool,
    /// True when the advisory marks the release as yanked/pulled.
    pub yanked: bool,
    /// One-line summary from the source.
    pub summary: String,
}

impl Advisory {
    /// True when any declared range covers `version`.
    pub fn affects(&self, version: &str) -> bool {
        self.affected.iter().any(|r| r.contains(version))
    }
}

/// An affected version range with declared endpoint inclusivity.
///
/// Follows OSV event semantics: `introduced` is inclusive, `fixed` is
/// exclusive, `last_affected` is inclusive. A range with no endpoints
/// matches every version.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VersionRange {
    /// First affected version (inclusive), if declared.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub introduced: Option<String>,
    /// First fixed version (exclusive), if declared.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fixed: Option<String>,
    /// Last affected version (inclusive), if declared.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_affected: Option<String>,
}

impl VersionRange {
    /// True when `version` falls inside the range as declared.
    pub fn contains(&self, version: &str) -> bool {
        if let Some(introduced) = &self.introduced
            && compare_versions(version, introduced) == Ordering::Less
        {
            return false;
        }
        if let Some(fixed) = &self.fixed
            && compare_versions(version, fixed) != Ordering::Less
        {
            return false;
        }
        if let Some(last) = &self.last_affected
            && compare_versions(version, last) == Ordering::Greater
        {
            return false;
        }
        true
    }
}

/// Compare two opaque version strings.
///
/// Versions across ecosystems are not uniformly semver, so this uses a
/// segment-wise comparison: the strings are tokenized into alternating
/// numeric and alphabetic runs, numeric runs compare numerically, and a
/// numeric run sorts after an alphabetic run at the same position. When one
/// stream is a prefix of the other, an extra numeric token extends the
/// version (`4.1 < 4.1.1`) while an extra alphabetic token marks a
/// pre-release (`1.0.0-alpha < 1.0.0`). Deterministic and total.
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    let ta = version_tokens(a);
    let tb = version_tokens(b);
    let mut ia = ta.iter();
    let mut ib = tb.iter();
    loop {
        match (ia.next(), ib.next()) {
            (None, None) => return Ordering::Equal,
            (None, Some(VersionToken::Alpha(_))) => return Ordering::Greater,
            (None, Some(VersionToken::Num(_))) => return Ordering::Less,
            (Some(VersionToken::Alpha(_)), None) => return Ordering::Less,
            (Some(VersionToken::Num(_)), None) => return Ordering::Greater,
            (Some(x), Some(y)) => match (x, y) {
                (VersionToken::Num(x), VersionToken::Num(y)) => {
                    let ord = x.cmp(y);
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                (VersionToken::Alpha(x), VersionToken::Alpha(y)) => {
                    let ord = x.cmp(y);
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                (VersionToken::Num(_), VersionToken::Alpha(_)) => return Ordering::Greater,
                (VersionToken::Alpha(_), VersionToken::Num(_)) => return Ordering::Less,
            },
        }
    }
}

/// A single run of digits or letters inside a version string.
#[derive(Debug, PartialEq, Eq)]
enum VersionToken {
    Num(u64),
    Alpha(String),
}

fn version_tokens(version: &str) -> Vec<VersionToken> {
    fn flush(digits: &mut String, alphas: &mut String, tokens: &mut Vec<VersionToken>) {
        if !digits.is_empty() {
            // Saturate rather than fail on absurdly long numeric runs.
            let value = digits.parse::<u64>().unwrap_or(u64::MAX);
            tokens.push(VersionToken::Num(value));
            digits.clear();
        }
        if !alphas.is_empty() {
            tokens.push(VersionToken::Alpha(alphas.to_lowercase()));
            alphas.clear();
        }
    }

    let mut tokens = Vec::new();
    let mut digits = String::new();
    let mut alphas = String::new();

    for c in version.chars() {
        if c.is_ascii_digit() {
            if !alphas.is_empty() {
                flush(&mut digits, &mut alphas, &mut tokens);
            }
            digits.push(c);
        } else if c.is_ascii_alphabetic() {
            if !digits.is_empty() {
                flush(&mut digits, &mut alphas, &mut tokens);
            }
            alphas.push(c);
        } else {
            // Separators end the current run but emit nothing themselves.
            flush(&mut digits, &mut alphas, &mut tokens);
        }
    }
    flush(&mut digits, &mut alphas, &mut tokens);
    tokens
}

/// A close-name candidate considered for typosquat detection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloseName {
    /// Candidate package name (normalized).
    pub name: String,
    /// Candidate's download/popularity count.
    pub downloads: u64,
    /// Levenshtein distance from the dependency's normalized name.
    pub distance: u32,
}

/// Registry-side release and maintainer facts for one dependency.
///
/// Every field is optional: a provider that cannot answer returns
/// [`ReleaseMetadata::unknown`], and unknown values never assert a signal.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReleaseMetadata {
    /// Source tag of the provider that produced the record.
    pub source: String,
    /// Timestamp of the most recent release, when known.
    pub latest_release: Option<DateTime<Utc>>,
    /// Total number of published releases, when known.
    pub total_releases: Option<u64>,
    /// Releases published in the trailing 30 days, when known.
    pub releases_30d: Option<u64>,
    /// Number of listed maintainers, when known.
    pub maintainer_count: Option<u64>,
    /// Download/popularity count for the package, when known.
    pub downloads: Option<u64>,
    /// True when the registry marks the package deprecated.
    pub deprecated: bool,
    /// True when the registry marks this exact version yanked.
    pub version_yanked: bool,
    /// Popular close-name candidates within the configured edit distance.
    pub close_names: Vec<CloseName>,
}

impl ReleaseMetadata {
    /// Metadata with every field unknown, used when a source fails.
    pub fn unknown(source: &str) -> Self {
        Self {
            source: source.to_string(),
            ..Self::default()
        }
    }
}

/// A boolean trust assertion about one dependency.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Signal {
    /// A non-withdrawn advisory covers this version.
    HasKnownVuln,
    /// The release was yanked or pulled from the registry.
    Yanked,
    /// The name sits within edit distance of a strictly more popular package.
    Typosquat,
    /// No release for longer than the abandonment threshold.
    Abandoned,
    /// No listed maintainers.
    BusFactorZero,
    /// Exactly one listed maintainer.
    BusFactorOne,
    /// Release cadence above the high-churn threshold.
    HighChurn,
    /// Release cadence above the medium-churn threshold.
    MediumChurn,
    /// Fewer total releases than the maturity threshold.
    LowMaturity,
}

impl Signal {
    /// Severity contributed by this signal when it fires.
    ///
    /// `HasKnownVuln` contributes the advisory severity itself, so it takes
    /// the maximum severity observed among matching advisories.
    pub fn severity_contribution(self, vuln_severity: Option<Severity>) -> Severity {
        match self {
            Signal::HasKnownVuln => vuln_severity.unwrap_or(Severity::Low),
            Signal::Yanked | Signal::Typosquat => Severity::High,
            Signal::Abandoned | Signal::BusFactorZero | Signal::HighChurn => Severity::Medium,
            Signal::BusFactorOne | Signal::MediumChurn | Signal::LowMaturity => Severity::Low,
        }
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Signal::HasKnownVuln => "has_known_vuln",
            Signal::Yanked => "yanked",
            Signal::Typosquat => "typosquat",
            Signal::Abandoned => "abandoned",
            Signal::BusFactorZero => "bus_factor_zero",
            Signal::BusFactorOne => "bus_factor_one",
            Signal::HighChurn => "high_churn",
            Signal::MediumChurn => "medium_churn",
            Signal::LowMaturity => "low_maturity",
        };
        write!(f, "{name}")
    }
}

/// Derived per-dependency signal record: flags plus the scalars they came from.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrustSignal {
    /// No release for longer than the abandonment threshold.
    pub abandoned: bool,
    /// Release cadence at or above the high-churn threshold.
    pub high_churn: bool,
    /// Release cadence at or above the medium-churn threshold (and not high).
    pub medium_churn: bool,
    /// No listed maintainers.
    pub bus_factor_zero: bool,
    /// Exactly one listed maintainer.
    pub bus_factor_one: bool,
    /// Fewer total releases than the maturity threshold.
    pub low_maturity: bool,
    /// Within edit distance of a strictly more popular package.
    pub typosquat: bool,
    /// Release yanked per advisory or registry metadata.
    pub yanked: bool,
    /// A non-withdrawn advisory covers this version.
    pub has_known_vuln: bool,
    /// Maximum severity among matching advisories.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vuln_severity: Option<Severity>,
    /// Age of the latest release in days, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latest_release_age_days: Option<i64>,
    /// Releases in the trailing 30 days, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub releases_30d: Option<u64>,
    /// Number of listed maintainers, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub maintainer_count: Option<u64>,
    /// Total published releases, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_releases: Option<u64>,
    /// Advisories matching this dependency's version, sorted by id.
    pub advisories: Vec<Advisory>,
}

impl TrustSignal {
    /// The signals that fired, in declaration order.
    pub fn fired(&self) -> Vec<Signal> {
        let mut fired = Vec::new();
        if self.has_known_vuln {
            fired.push(Signal::HasKnownVuln);
        }
        if self.yanked {
            fired.push(Signal::Yanked);
        }
        if self.typosquat {
            fired.push(Signal::Typosquat);
        }
        if self.abandoned {
            fired.push(Signal::Abandoned);
        }
        if self.bus_factor_zero {
            fired.push(Signal::BusFactorZero);
        }
        if self.bus_factor_one {
            fired.push(Signal::BusFactorOne);
        }
        if self.high_churn {
            fired.push(Signal::HighChurn);
        }
        if self.medium_churn {
            fired.push(Signal::MediumChurn);
        }
        if self.low_maturity {
            fired.push(Signal::LowMaturity);
        }
        fired
    }
}

/// One reason contributing to a verdict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reason {
    /// The signal that fired.
    pub signal: Signal,
    /// Severity contributed by the signal.
    pub severity: Severity,
}

/// The policy engine's output for one dependency.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Verdict {
    /// Maximum severity over all contributing reasons; `safe` when empty.
    pub severity: Severity,
    /// Reasons sorted by severity descending, then signal name ascending.
    pub reasons: Vec<Reason>,
    /// Ids of advisories that contributed, sorted.
    pub advisory_ids: Vec<String>,
}

/// Outcome of one provider over a whole run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceOutcome {
    /// Every query the provider received was answered.
    Ok,
    /// At least one dependency could not be answered.
    Degraded,
    /// Disabled by configuration or by an authentication failure.
    Disabled,
}

impl fmt::Display for SourceOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SourceOutcome::Ok => "ok",
            SourceOutcome::Degraded => "degraded",
            SourceOutcome::Disabled => "disabled",
        };
        write!(f, "{name}")
    }
}

/// Verdict for one dependency inside a report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DependencyReport {
    /// Ecosystem of the dependency.
    pub ecosystem: Ecosystem,
    /// Normalized package name.
    pub name: String,
    /// Resolved version.
    pub version: String,
    /// True when the project depends on this package directly.
    pub direct: bool,
    /// Policy verdict.
    pub verdict: Verdict,
    /// Sources that could not answer for this dependency, sorted.
    pub unavailable_sources: Vec<String>,
}

/// Per-severity verdict counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Summary {
    /// Total dependencies evaluated.
    pub total: usize,
    /// Verdicts at `safe`.
    pub safe: usize,
    /// Verdicts at `low`.
    pub low: usize,
    /// Verdicts at `medium`.
    pub medium: usize,
    /// Verdicts at `high`.
    pub high: usize,
    /// Verdicts at `critical`.
    pub critical: usize,
}

/// The full output of one evaluation run.
///
/// Verdicts are totally ordered (severity descending, then ecosystem, name,
/// version ascending), so serializing a report built from identical inputs
/// yields identical bytes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    /// Stable schema identifier for this JSON shape.
    pub schema_version: u32,
    /// Per-dependency verdicts in report order.
    pub verdicts: Vec<DependencyReport>,
    /// Per-severity counts.
    pub summary: Summary,
    /// Outcome per configured source, keyed by source tag.
    pub sources: BTreeMap<String, SourceOutcome>,
    /// CI exit code derived from the maximum verdict severity.
    pub exit_code: i32,
    /// SHA-256 fingerprint over the sorted verdict lines.
    pub fingerprint: String,
}

impl Report {
    /// Assemble a report from unsorted verdicts and source outcomes.
    ///
    /// Sorts, counts, fingerprints, and derives the exit code.
    pub fn assemble(
        mut verdicts: Vec<DependencyReport>,
        sources: BTreeMap<String, SourceOutcome>,
    ) -> Self {
        verdicts.sort_by(|a, b| {
            b.verdict
                .severity
                .cmp(&a.verdict.severity)
                .then_with(|| a.ecosystem.cmp(&b.ecosystem))
                .then_with(|| a.name.cmp(&b.name))
                .then_with(|| a.version.cmp(&b.version))
        });

        let mut summary = Summary {
            total: verdicts.len(),
            ..Summary::default()
        };
        for v in &verdicts {
            match v.verdict.severity {
                Severity::Safe => summary.safe += 1,
                Severity::Low => summary.low += 1,
                Severity::Medium => summary.medium += 1,
                Severity::High => summary.high += 1,
                Severity::Critical => summary.critical += 1,
            }
        }

        let max_severity = verdicts
            .iter()
            .map(|v| v.verdict.severity)
            .max()
            .unwrap_or(Severity::Safe);

        let fingerprint = compute_fingerprint(&verdicts);

        Self {
            schema_version: REPORT_SCHEMA_VERSION,
            verdicts,
            summary,
            sources,
            exit_code: max_severity.exit_code(),
            fingerprint,
        }
    }

    /// Render the stable JSON form of the report.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

/// SHA-256 over one line per sorted verdict: `eco:name@version severity reasons`.
fn compute_fingerprint(verdicts: &[DependencyReport]) -> String {
    let mut hasher = Sha256::new();
    for v in verdicts {
        hasher.update(v.ecosystem.to_string().as_bytes());
        hasher.update(b":");
        hasher.update(v.name.as_bytes());
        hasher.update(b"@");
        hasher.update(v.version.as_bytes());
        hasher.update(b" ");
        hasher.update(v.verdict.severity.to_string().as_bytes());
        for reason in &v.verdict.reasons {
            hasher.update(b" ");
            hasher.update(reason.signal.to_string().as_bytes());
        }
        hasher.update(b"\n");
    }
    hex::encode(hasher.finalize())
}
