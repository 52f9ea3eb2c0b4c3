//! Pre-upgrade comparison: evaluate the current resolution and a proposed
//! version substitution side by side.

use serde::{Deserialize, Serialize};

use rtx_types::{Dependency, DependencyReport, Ecosystem, Report};

use crate::depset::build_working_set;
use crate::orchestrator::Orchestrator;

/// The two reports of a pre-upgrade run plus the reason diff for the target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreUpgradeReport {
    /// Evaluation of the currently resolved working set.
    pub baseline: Report,
    /// Evaluation with the target version substituted in.
    pub proposed: Report,
    /// `max(baseline.exit_code, proposed.exit_code)`.
    pub exit_code: i32,
    /// Reasons present for the target in the proposed run but not the baseline.
    pub added_reasons: Vec<String>,
    /// Reasons present for the target in the baseline but not the proposed run.
    pub removed_reasons: Vec<String>,
}

impl Orchestrator {
    /// Evaluate `current` as the baseline and the same set with `target`'s
    /// version substituted as the proposal.
    ///
    /// The target joins the proposed set even when the baseline does not
    /// contain the package yet (a new dependency being introduced).
    pub async fn run_preupgrade(
        &self,
        current: Vec<Dependency>,
        target: &Dependency,
    ) -> PreUpgradeReport {
        let baseline_set = build_working_set(current);

        let mut proposed_input: Vec<Dependency> = Vec::with_capacity(baseline_set.len() + 1);
        let mut substituted = false;
        for dep in &baseline_set {
            if dep.ecosystem == target.ecosystem
                && dep.normalized_name() == target.normalized_name()
            {
                let mut upgraded = dep.clone();
                upgraded.version = target.version.clone();
                proposed_input.push(upgraded);
                substituted = true;
            } else {
                proposed_input.push(dep.clone());
            }
        }
        if !substituted {
            proposed_input.push(target.clone());
        }
        let proposed_set = build_working_set(proposed_input);

        let baseline = self.run(&baseline_set).await;
        let proposed = self.run(&proposed_set).await;

        let baseline_reasons = target_reasons(&baseline, target.ecosystem, &target.normalized_name());
        let proposed_reasons = target_reasons(&proposed, target.ecosystem, &target.normalized_name());

        let added_reasons = proposed_reasons
            .iter()
            .filter(|r| !baseline_reasons.contains(r))
            .cloned()
            .collect();
        let removed_reasons = baseline_reasons
            .iter()
            .filter(|r| !proposed_reasons.contains(r))
            .cloned()
            .collect();

        PreUpgradeReport {
            exit_code: baseline.exit_code.max(proposed.exit_code),
            baseline,
            proposed,
            added_reasons,
            removed_reasons,
        }
    }
}

/// Reason strings for the named package in a report, any version.
fn target_reasons(report: &Report, ecosystem: Ecosystem, name: &str) -> Vec<String> {
    report
        .verdicts
        .iter()
        .filter(|v| v.ecosystem == ecosystem && v.name == name)
        .flat_map(|v: &DependencyReport| v.verdict.reasons.iter())
        .map(|r| r.signal.to_string())
        .collect()
}
