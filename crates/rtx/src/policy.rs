//! Policy evaluation: fold a [`TrustSignal`] into a [`Verdict`].

use rtx_types::{Reason, Severity, TrustSignal, Verdict};

/// Evaluate the policy for one derived signal record.
///
/// The verdict severity is the maximum contribution over fired signals;
/// reasons are ordered severity-descending, then signal name ascending.
/// No fired signals means `safe`.
pub fn evaluate(signal: &TrustSignal) -> Verdict {
    let mut reasons: Vec<Reason> = signal
        .fired()
        .into_iter()
        .map(|s| Reason {
            signal: s,
            severity: s.severity_contribution(signal.vuln_severity),
        })
        .collect();
    reasons.sort_by(|a, b| {
        b.severity
            .cmp(&a.severity)
            .then_with(|| a.signal.to_string().cmp(&b.signal.to_string()))
    });

    let severity = reasons
        .iter()
        .map(|r| r.severity)
        .max()
        .unwrap_or(Severity::Safe);

    let mut advisory_ids: Vec<String> =
        signal.advisories.iter().map(|a| a.id.clone()).collect();
    advisory_ids.sort();
    advisory_ids.dedup();

    Verdict {
        severity,
        reasons,
        advisory_ids,
    }
}
