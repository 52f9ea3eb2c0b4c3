//! Report rendering: plain table for terminals, JSON for machines, and a
//! minimal standalone HTML page.

use std::fmt::Write as _;

use rtx::preupgrade::PreUpgradeReport;
use rtx_types::Report;

/// Render the report as an aligned plain-text table.
pub fn render_table(report: &Report) -> String {
    let mut out = String::new();

    if report.verdicts.is_empty() {
        out.push_str("no dependencies evaluated\n");
    } else {
        let name_width = report
            .verdicts
            .iter()
            .map(|v| format!("{}:{}@{}", v.ecosystem, v.name, v.version).len())
            .max()
            .unwrap_or(0)
            .max("dependency".len());

        let _ = writeln!(out, "{:<10} {:<name_width$} reasons", "severity", "dependency");
        for entry in &report.verdicts {
            let dependency = format!("{}:{}@{}", entry.ecosystem, entry.name, entry.version);
            let mut notes: Vec<String> = entry
                .verdict
                .reasons
                .iter()
                .map(|r| r.signal.to_string())
                .collect();
            if !entry.unavailable_sources.is_empty() {
                notes.push(format!(
                    "[unavailable: {}]",
                    entry.unavailable_sources.join(", ")
                ));
            }
            let notes = if notes.is_empty() {
                "-".to_string()
            } else {
                notes.join(", ")
            };
            let _ = writeln!(
                out,
                "{:<10} {:<name_width$} {}",
                entry.verdict.severity.to_string(),
                dependency,
                notes
            );
        }
    }

    out.push('\n');
    let _ = writeln!(
        out,
        "total: {}  safe: {}  low: {}  medium: {}  high: {}  critical: {}",
        report.summary.total,
        report.summary.safe,
        report.summary.low,
        report.summary.medium,
        report.summary.high,
        report.summary.critical,
    );
    for (source, outcome) in &report.sources {
        let _ = writeln!(out, "source {source}: {outcome}");
    }
    let _ = writeln!(out, "exit code: {}", report.exit_code);
    out
}

/// Render the pre-upgrade comparison as text.
pub fn render_preupgrade_table(outcome: &PreUpgradeReport) -> String {
    let mut out = String::new();
    out.push_str("== baseline ==\n");
    out.push_str(&render_table(&outcome.baseline));
    out.push_str("\n== proposed ==\n");
    out.push_str(&render_table(&outcome.proposed));
    out.push('\n');
    if outcome.added_reasons.is_empty() && outcome.removed_reasons.is_empty() {
        out.push_str("no reason changes for the target\n");
    } else {
        for reason in &outcome.added_reasons {
            let _ = writeln!(out, "+ {reason}");
        }
        for reason in &outcome.removed_reasons {
            let _ = writeln!(out, "- {reason}");
        }
    }
    let _ = writeln!(out, "overall exit code: {}", outcome.exit_code);
    out
}

/// Render the report as a standalone HTML page.
pub fn render_html(report: &Report) -> String {
    let mut rows = String::new();
    for entry in &report.verdicts {
        let reasons = entry
            .verdict
            .reasons
            .iter()
            .map(|r| r.signal.to_string())
            .collect::<Vec<_>>()
            .join(", ");
        let _ = writeln!(
            rows,
            "<tr class=\"sev-{sev}\"><td>{sev}</td><td>{eco}</td><td>{name}</td><td>{version}</td><td>{reasons}</td></tr>",
            sev = entry.verdict.severity,
            eco = entry.ecosystem,
            name = escape_html(&entry.name),
            version = escape_html(&entry.version),
            reasons = escape_html(&reasons),
        );
    }

    let mut sources = String::new();
    for (source, outcome) in &report.sources {
        let _ = writeln!(sources, "<li>{}: {}</li>", escape_html(source), outcome);
    }

    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<title>rtx dependency trust report</title>
<style>
body {{ font-family: sans-serif; margin: 2rem; }}
table {{ border-collapse: collapse; }}
td, th {{ border: 1px solid #ccc; padding: 0.3rem 0.6rem; text-align: left; }}
.sev-critical td:first-child {{ color: #fff; background: #8b0000; }}
.sev-high td:first-child {{ color: #fff; background: #c0392b; }}
.sev-medium td:first-child {{ background: #f39c12; }}
.sev-low td:first-child {{ background: #f7dc6f; }}
</style>
</head>
<body>
<h1>Dependency trust report</h1>
<p>schema v{schema} &middot; exit code {exit} &middot; {total} dependencies</p>
<table>
<tr><th>severity</th><th>ecosystem</th><th>package</th><th>version</th><th>reasons</th></tr>
{rows}</table>
<h2>Sources</h2>
<ul>
{sources}</ul>
</body>
</html>
"#,
        schema = report.schema_version,
        exit = report.exit_code,
        total = report.summary.total,
        rows = rows,
        sources = sources,
    )
}

/// Minimal HTML escaping for untrusted package names and versions.
fn escape_html(raw: &str) -> String {
    raw.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use rtx_types::{
        DependencyReport, Ecosystem, Reason, Severity, Signal, SourceOutcome, Verdict,
    };

    fn sample_report() -> Report {
        Report::assemble(
            vec![DependencyReport {
                ecosystem: Ecosystem::Npm,
                name: "lodash".to_string(),
                version: "4.17.20".to_string(),
                direct: true,
                verdict: Verdict {
                    severity: Severity::Critical,
                    reasons: vec![Reason {
                        signal: Signal::HasKnownVuln,
                        severity: Severity::Critical,
                    }],
                    advisory_ids: vec!["GHSA-x".to_string()],
                },
                unavailable_sources: vec!["github".to_string()],
            }],
            BTreeMap::from([
                ("osv".to_string(), SourceOutcome::Ok),
                ("github".to_string(), SourceOutcome::Degraded),
            ]),
        )
    }

    #[test]
    fn table_lists_verdicts_and_sources() {
        let rendered = render_table(&sample_report());
        assert!(rendered.contains("critical"));
        assert!(rendered.contains("npm:lodash@4.17.20"));
        assert!(rendered.contains("has_known_vuln"));
        assert!(rendered.contains("[unavailable: github]"));
        assert!(rendered.contains("source github: degraded"));
        assert!(rendered.contains("exit code: 2"));
    }

    #[test]
    fn empty_report_renders_placeholder() {
        let report = Report::assemble(Vec::new(), BTreeMap::new());
        let rendered = render_table(&report);
        assert!(rendered.contains("no dependencies evaluated"));
        assert!(rendered.contains("exit code: 0"));
    }

    #[test]
    fn html_escapes_untrusted_names() {
        let mut report = sample_report();
        report.verdicts[0].name = "<script>alert(1)</script>".to_string();
        let rendered = render_html(&report);
        assert!(!rendered.contains("<script>alert"));
        assert!(rendered.contains("&lt;script&gt;"));
    }

    #[test]
    fn html_contains_summary_line() {
        let rendered = render_html(&sample_report());
        assert!(rendered.contains("exit code 2"));
        assert!(rendered.contains("<td>lodash</td>"));
    }
}
