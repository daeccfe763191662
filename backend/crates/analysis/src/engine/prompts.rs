const REPORT_SCHEMA: &str = r#"{
  "product_name": "string",
  "product_type": "conventional food | dietary supplement | meat/poultry | beverage | other",
  "general_labeling": { "status": "<section status>", "details": "string", "issues": ["string"] },
  "ingredient_labeling": { "status": "<section status>", "details": "string", "issues": ["string"] },
  "allergen_labeling": { "status": "<section status>", "details": "string", "issues": ["string"] },
  "nutrition_labeling": { "status": "<section status>", "details": "string", "issues": ["string"] },
  "claims": { "status": "<section status>", "details": "string", "issues": ["string"] },
  "overall_assessment": {
    "primary_compliance_status": "<overall status>",
    "summary": "string",
    "key_findings": ["string"],
    "strengths": ["string"],
    "concerns": ["string"]
  },
  "recommendations": [
    { "priority": "critical | high | medium | low", "recommendation": "string", "regulation": "string" }
  ]
}"#;

const COMPARISON_SCHEMA: &str = r#"  "comparison": {
    "issues_resolved": ["string"],
    "issues_remaining": ["string"],
    "new_issues": ["string"],
    "summary": "string"
  }"#;

const STATUS_RULES: &str = "\
<overall status> is exactly one of: compliant, likely_compliant, potentially_non_compliant, non_compliant.
<section status> is one of those four or not_applicable.
Every recommendation cites the specific regulation it is based on.";

/// Instructions for a full analysis. With a baseline, the model must also
/// return the comparison block.
pub fn analysis_instructions(has_baseline: bool) -> String {
    let mut out = String::from(
        "Review the label and respond with exactly one JSON object and nothing else. \
         Do not wrap it in prose. The object must have this shape:\n",
    );
    if has_baseline {
        // Splice the comparison member in before the closing brace.
        let body = REPORT_SCHEMA.trim_end_matches('}').trim_end();
        out.push_str(body);
        out.push_str(",\n");
        out.push_str(COMPARISON_SCHEMA);
        out.push_str("\n}\n");
    } else {
        out.push_str(REPORT_SCHEMA);
        out.push('\n');
    }
    out.push_str(STATUS_RULES);
    if has_baseline {
        out.push_str(
            "\nCompare against the PREVIOUS ANALYSIS above. List which of its issues are now \
             resolved, which remain, and any new issues this version introduces. Each list may \
             be empty but must be present.",
        );
    }
    out
}

pub const CHAT_INSTRUCTIONS: &str = "\
Answer the user's question about their label in plain prose. Use the previous analysis and the \
reference documents above. Cite regulations where relevant. Keep the answer focused and do not \
produce a new full report unless asked.";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn comparison_is_requested_only_with_baseline() {
        assert!(!analysis_instructions(false).contains("issues_resolved"));

        let with = analysis_instructions(true);
        assert!(with.contains("\"comparison\""));
        assert!(with.contains("PREVIOUS ANALYSIS"));
        assert!(with.contains("\"recommendations\""));
    }
}
