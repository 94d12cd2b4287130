use std::path::Path;

use anyhow::{Context, Result};

use crate::aggregate::{EvaluationReport, ScoringMode};

/// Write the report as pretty JSON.
pub fn write_report_json(path: &Path, report: &EvaluationReport) -> Result<()> {
    let content = serde_json::to_string_pretty(report).context("serialize evaluation report")?;
    std::fs::write(path, content).with_context(|| format!("write {:?}", path))?;
    Ok(())
}

/// Read a report previously written by [`write_report_json`].
pub fn read_report_json(path: &Path) -> Result<EvaluationReport> {
    let content = std::fs::read_to_string(path).with_context(|| format!("read {:?}", path))?;
    serde_json::from_str(&content).with_context(|| format!("parse report {:?}", path))
}

/// Render a markdown summary with one table row per heuristic.
pub fn render_report_md(report: &EvaluationReport) -> String {
    let mut out = String::new();
    out.push_str("# Usability Evaluation\n\n");
    out.push_str(&format!(
        "- run: `{}`\n- artifact: {} `{}`\n- ruleset: `{}`\n- generated: {}\n\n",
        report.run_id,
        report.artifact.kind,
        report.artifact.short(),
        report.ruleset_id,
        report.generated_at.to_rfc3339(),
    ));

    let mode = match report.scoring_mode {
        ScoringMode::WeightedIssueCount => "weighted issue count, lower is better",
        ScoringMode::Normalized => "normalized 0-100, higher is better",
    };
    out.push_str("## Score\n");
    out.push_str(&format!(
        "- overall: **{:.2}** ({})\n- issues: {} of {} heuristics\n",
        report.overall_score,
        mode,
        report.issue_count(),
        report.findings.len(),
    ));
    for (level, count) in &report.severity_counts {
        out.push_str(&format!("- {}: {}\n", level, count));
    }
    out.push('\n');

    out.push_str("## Findings\n\n");
    out.push_str("| Heuristic | Verdict | Severity | Description | Location |\n");
    out.push_str("|---|---|---|---|---|\n");
    for f in &report.findings {
        out.push_str(&format!(
            "| `{}` | {} | {} | {} | {} |\n",
            f.heuristic_id,
            f.verdict,
            f.severity.as_deref().unwrap_or("-"),
            escape_cell(&f.description),
            f.location_hint.as_deref().map(escape_cell).unwrap_or_else(|| "-".to_string()),
        ));
    }
    out
}

/// Write the markdown summary.
pub fn write_report_md(path: &Path, report: &EvaluationReport) -> Result<()> {
    let md = render_report_md(report);
    std::fs::write(path, md).with_context(|| format!("write {:?}", path))?;
    Ok(())
}

fn escape_cell(text: &str) -> String {
    text.replace('|', "\\|").replace('\n', " ")
}
