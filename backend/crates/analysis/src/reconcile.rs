//! Baseline selection and comparison checks for revisions.
//!
//! The comparison itself is written by the model from the rendered baseline;
//! this side picks the baseline, renders it and validates what comes back.

use serde::Serialize;
use uuid::Uuid;

use labelcheck_db::sessions::models::Iteration;
use labelcheck_db::sessions::report::{ComplianceReport, SectionStatus};

/// Latest analysis iteration by store sequence. Chat turns never qualify.
pub fn baseline(iterations: &[Iteration]) -> Option<&Iteration> {
    iterations
        .iter()
        .filter(|i| i.iteration_type().is_analysis())
        .max_by_key(|i| i.sequence)
}

/// Full text rendering of a previous report for the model to compare against.
pub fn render_baseline(iteration: &Iteration) -> Option<String> {
    let report = iteration.content.report()?;
    let overall = &report.overall_assessment;
    let mut out = String::new();

    out.push_str(&format!(
        "# PREVIOUS ANALYSIS ({})\n",
        iteration.iteration_type().as_str()
    ));
    out.push_str(&format!("Analyzed at: {}\n", iteration.created_at.to_rfc3339()));
    out.push_str(&format!("Product: {}\n", report.product_name));
    out.push_str(&format!("Product type: {}\n", report.product_type));
    out.push_str(&format!("Overall status: {}\n", overall.primary_compliance_status));
    out.push_str(&format!("Summary: {}\n", overall.summary));

    out.push_str("\n## Sections\n");
    for (name, section) in report.sections() {
        out.push_str(&format!("- {name}: {}\n", section.status.as_str()));
        if section.status != SectionStatus::NotApplicable {
            for issue in &section.issues {
                out.push_str(&format!("  - issue: {issue}\n"));
            }
        }
    }

    if !overall.concerns.is_empty() {
        out.push_str("\n## Concerns\n");
        for concern in &overall.concerns {
            out.push_str(&format!("- {concern}\n"));
        }
    }

    out.push_str("\n## Recommendations\n");
    if report.recommendations.is_empty() {
        out.push_str("(none)\n");
    }
    for (n, rec) in report.recommendations.iter().enumerate() {
        out.push_str(&format!(
            "{}. [{}] {} ({})\n",
            n + 1,
            rec.priority.as_str().to_uppercase(),
            rec.recommendation,
            rec.regulation
        ));
    }
    Some(out)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ComparisonCheck {
    /// Baseline existed and the comparison came back.
    Present,
    /// No baseline and no comparison.
    NotExpected,
    /// Baseline existed but the model left the comparison out.
    Missing,
    /// The model compared against nothing; the block was removed.
    Discarded,
}

/// Validate the comparison block against whether a baseline existed.
pub fn reconcile_comparison(
    report: &mut ComplianceReport,
    baseline_iteration_id: Option<Uuid>,
) -> ComparisonCheck {
    match (baseline_iteration_id, report.comparison.as_mut()) {
        (Some(_), Some(comparison)) => {
            for list in [
                &mut comparison.issues_resolved,
                &mut comparison.issues_remaining,
                &mut comparison.new_issues,
            ] {
                list.retain(|item| !item.trim().is_empty());
            }
            ComparisonCheck::Present
        }
        (Some(baseline), None) => {
            tracing::warn!(%baseline, "model omitted comparison despite a previous analysis");
            ComparisonCheck::Missing
        }
        (None, Some(_)) => {
            tracing::warn!("model returned a comparison without a previous analysis, discarding");
            report.comparison = None;
            ComparisonCheck::Discarded
        }
        (None, None) => ComparisonCheck::NotExpected,
    }
}
