//! Text summary builder for CLI output.
//!
//! Formats human-readable lines for text mode, one block per group.

use crate::model::BoxPlotReport;

/// Pre-formatted lines for text output.
pub(crate) struct TextSummary {
    pub lines: Vec<String>,
}

/// Build a text summary from a report.
pub(crate) fn build_text_summary(report: &BoxPlotReport) -> TextSummary {
    let mut lines = vec![format!(
        "Backtest {} ({})",
        report.backtest_id, report.source
    )];

    if report.records.is_empty() {
        lines.push("  no records".to_string());
        return TextSummary { lines };
    }

    let mut current_group: Option<&str> = None;
    for r in &report.records {
        if current_group != Some(r.group.as_str()) {
            lines.push(format!("{}:", r.group));
            current_group = Some(r.group.as_str());
        }
        lines.push(format!(
            "  {}: n {} mu {:.3} sd {:.3} value {:.3}",
            r.subgroup, r.stats.n, r.stats.mu, r.stats.sd, r.stats.value
        ));
    }

    TextSummary { lines }
}
