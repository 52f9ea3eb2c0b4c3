//! Signal derivation: pure translation of advisories and metadata into a
//! [`TrustSignal`] record.
//!
//! Every rule treats an unknown input as non-asserting: a scalar the
//! metadata provider could not learn never fires the related signal.

use chrono::{DateTime, Utc};

use rtx_config::Thresholds;
use rtx_types::{Advisory, Dependency, ReleaseMetadata, Severity, TrustSignal};

/// Derive the trust signal for one dependency.
///
/// `now` is sampled once per run by the orchestrator so every dependency in
/// a run sees the same clock.
pub fn derive(
    dep: &Dependency,
    advisories: &[Advisory],
    metadata: &ReleaseMetadata,
    thresholds: &Thresholds,
    now: DateTime<Utc>,
) -> TrustSignal {
    let matching: Vec<Advisory> = advisories
        .iter()
        .filter(|a| !a.withdrawn && a.affects(&dep.version))
        .cloned()
        .collect();

    let has_known_vuln = !matching.is_empty();
    let vuln_severity = matching.iter().map(|a| a.severity).max();

    let yanked = matching.iter().any(|a| a.yanked) || metadata.version_yanked;

    let latest_release_age_days = metadata
        .latest_release
        .map(|latest| (now - latest).num_days());
    let abandoned = latest_release_age_days
        .is_some_and(|age| age >= thresholds.abandonment_threshold_days);

    let high_churn = metadata
        .releases_30d
        .is_some_and(|r| r >= thresholds.churn_high_threshold);
    let medium_churn = !high_churn
        && metadata
            .releases_30d
            .is_some_and(|r| r >= thresholds.churn_medium_threshold);

    let bus_factor_zero = metadata
        .maintainer_count
        .is_some_and(|m| m <= thresholds.bus_factor_zero_threshold);
    let bus_factor_one = !bus_factor_zero
        && metadata
            .maintainer_count
            .is_some_and(|m| m <= thresholds.bus_factor_one_threshold);

    let low_maturity = metadata
        .total_releases
        .is_some_and(|t| t < thresholds.low_maturity_threshold);

    // The candidate list only exists when the metadata fetch succeeded, so a
    // failed source can never assert this signal. A package whose own
    // download count the registry does not expose competes as zero.
    let own_downloads = metadata.downloads.unwrap_or(0);
    let normalized = dep.normalized_name();
    let typosquat = metadata.close_names.iter().any(|candidate| {
        candidate.name != normalized
            && candidate.distance <= thresholds.typosquat_max_distance
            && candidate.downloads > own_downloads
    });

    TrustSignal {
        abandoned,
        high_churn,
        medium_churn,
        bus_factor_zero,
        bus_factor_one,
        low_maturity,
        typosquat,
        yanked,
        has_known_vuln,
        vuln_severity,
        latest_release_age_days,
        releases_30d: metadata.releases_30d,
        maintainer_count: metadata.maintainer_count,
        total_releases: metadata.total_releases,
        advisories: matching,
    }
}
