//! Model output to `ComplianceReport`, in three independently failing stages:
//! locate JSON candidates in the text, take the first that parses as an
//! object, then check it against the report schema.

use serde::Deserialize;
use serde_json::{Map, Value};

use labelcheck_common::error::{LabelError, LabelResult};
use labelcheck_db::sessions::report::{
    Comparison, ComplianceReport, ComplianceStatus, OverallAssessment, Priority, Recommendation,
    SectionAssessment, SectionStatus, StatusNormalization,
};

/// Fenced ```json blocks first, then every balanced top-level `{...}` span
/// in order of appearance.
pub fn extract_candidates(raw: &str) -> Vec<&str> {
    let mut candidates = fenced_blocks(raw);
    candidates.extend(balanced_objects(raw));
    candidates
}

fn fenced_blocks(raw: &str) -> Vec<&str> {
    let mut blocks = Vec::new();
    let mut rest = raw;
    while let Some(open) = rest.find("```") {
        let after_ticks = &rest[open + 3..];
        let body_start = after_ticks.find('\n').map(|i| i + 1).unwrap_or(0);
        let lang = after_ticks[..body_start].trim();
        let body = &after_ticks[body_start..];
        let Some(close) = body.find("```") else {
            break;
        };
        let inner = body[..close].trim();
        if (lang.is_empty() || lang.eq_ignore_ascii_case("json")) && inner.starts_with('{') {
            blocks.push(inner);
        }
        rest = &body[close + 3..];
    }
    blocks
}

/// Balanced `{...}` spans in order of appearance. A span that never closes,
/// or closes without being valid JSON, may have swallowed the real object, so
/// the scan resumes at the next `{` after its start.
fn balanced_objects(raw: &str) -> Vec<&str> {
    let mut objects = Vec::new();
    let mut from = 0;

    while let Some(offset) = raw[from..].find('{') {
        let begin = from + offset;
        match span_len(&raw[begin..]) {
            Some(len) => {
                let span = &raw[begin..begin + len];
                objects.push(span);
                from = if serde_json::from_str::<Value>(span).is_ok() {
                    begin + len
                } else {
                    begin + 1
                };
            }
            None => from = begin + 1,
        }
    }
    objects
}

/// Byte length of the object opening at the start of `text`, if it closes.
fn span_len(text: &str) -> Option<usize> {
    let mut depth: usize = 0;
    let mut in_string = false;
    let mut escape = false;

    for (index, ch) in text.char_indices() {
        if in_string {
            if escape {
                escape = false;
            } else if ch == '\\' {
                escape = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }

        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(index + ch.len_utf8());
                }
            }
            _ => {}
        }
    }
    None
}

/// First candidate that parses as a JSON object.
pub fn first_object(raw: &str) -> LabelResult<Map<String, Value>> {
    let candidates = extract_candidates(raw);
    if candidates.is_empty() {
        return Err(LabelError::ResponseParse(
            "no JSON object found in model output".to_string(),
        ));
    }
    for candidate in &candidates {
        if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(candidate) {
            return Ok(map);
        }
    }
    Err(LabelError::ResponseParse(format!(
        "none of {} JSON-like spans in model output is valid JSON",
        candidates.len()
    )))
}

#[derive(Debug, Deserialize)]
struct RawSection {
    status: String,
    #[serde(default)]
    details: String,
    #[serde(default)]
    issues: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RawOverall {
    primary_compliance_status: String,
    #[serde(default)]
    summary: String,
    #[serde(default)]
    key_findings: Vec<String>,
    #[serde(default)]
    strengths: Vec<String>,
    #[serde(default)]
    concerns: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RawRecommendation {
    #[serde(default)]
    priority: String,
    recommendation: String,
    #[serde(default)]
    regulation: String,
}

#[derive(Debug, Deserialize)]
struct RawComparison {
    issues_resolved: Vec<String>,
    issues_remaining: Vec<String>,
    new_issues: Vec<String>,
    summary: String,
}

#[derive(Debug, Deserialize)]
struct RawReport {
    #[serde(default)]
    product_name: Option<String>,
    #[serde(default)]
    product_type: Option<String>,
    general_labeling: RawSection,
    ingredient_labeling: RawSection,
    allergen_labeling: RawSection,
    nutrition_labeling: RawSection,
    claims: RawSection,
    overall_assessment: RawOverall,
    #[serde(default)]
    recommendations: Vec<RawRecommendation>,
    #[serde(default)]
    comparison: Option<RawComparison>,
}

/// `"Non-Compliant "` -> `"non_compliant"`.
fn canonical(value: &str) -> String {
    value
        .trim()
        .to_ascii_lowercase()
        .replace(['-', ' ', '/'], "_")
}

/// Collects replacements of out-of-range enum values.
#[derive(Default)]
struct Normalizer {
    records: Vec<StatusNormalization>,
}

impl Normalizer {
    fn record(&mut self, field: String, received: &str, normalized_to: &str) {
        tracing::warn!(
            field = %field,
            received,
            normalized_to,
            "model returned value outside the allowed set"
        );
        self.records.push(StatusNormalization {
            field,
            received: received.to_string(),
            normalized_to: normalized_to.to_string(),
        });
    }

    fn overall_status(&mut self, raw: &str) -> ComplianceStatus {
        canonical(raw).parse().unwrap_or_else(|_| {
            let fallback = ComplianceStatus::PotentiallyNonCompliant;
            self.record(
                "overall_assessment.primary_compliance_status".to_string(),
                raw,
                fallback.as_str(),
            );
            fallback
        })
    }

    fn section_status(&mut self, section: &str, raw: &str) -> SectionStatus {
        let key = canonical(raw);
        let key = if key == "n_a" || key == "na" { "not_applicable".to_string() } else { key };
        key.parse().unwrap_or_else(|_| {
            let fallback = SectionStatus::PotentiallyNonCompliant;
            self.record(format!("{section}.status"), raw, fallback.as_str());
            fallback
        })
    }

    fn priority(&mut self, index: usize, raw: &str) -> Priority {
        canonical(raw).parse().unwrap_or_else(|_| {
            let fallback = Priority::Medium;
            self.record(
                format!("recommendations[{index}].priority"),
                raw,
                fallback.as_str(),
            );
            fallback
        })
    }

    fn section(&mut self, name: &str, raw: RawSection) -> SectionAssessment {
        SectionAssessment {
            status: self.section_status(name, &raw.status),
            details: raw.details,
            issues: raw.issues,
        }
    }
}

/// Check a parsed object against the report schema and normalize enum values.
pub fn validate_report(object: Map<String, Value>) -> LabelResult<ComplianceReport> {
    let raw: RawReport = serde_path_to_error::deserialize(Value::Object(object)).map_err(|e| {
        LabelError::ResponseParse(format!(
            "model output does not match the report schema at `{}`: {}",
            e.path(),
            e.inner()
        ))
    })?;

    let mut n = Normalizer::default();
    let general_labeling = n.section("general_labeling", raw.general_labeling);
    let ingredient_labeling = n.section("ingredient_labeling", raw.ingredient_labeling);
    let allergen_labeling = n.section("allergen_labeling", raw.allergen_labeling);
    let nutrition_labeling = n.section("nutrition_labeling", raw.nutrition_labeling);
    let claims = n.section("claims", raw.claims);

    let overall = raw.overall_assessment;
    let overall_assessment = OverallAssessment {
        primary_compliance_status: n.overall_status(&overall.primary_compliance_status),
        summary: overall.summary,
        key_findings: overall.key_findings,
        strengths: overall.strengths,
        concerns: overall.concerns,
    };

    let mut recommendations: Vec<Recommendation> = raw
        .recommendations
        .into_iter()
        .enumerate()
        .filter(|(_, r)| !r.recommendation.trim().is_empty())
        .map(|(i, r)| Recommendation {
            priority: n.priority(i, &r.priority),
            recommendation: r.recommendation,
            regulation: r.regulation,
        })
        .collect();
    recommendations.sort_by_key(|r| r.priority);

    Ok(ComplianceReport {
        product_name: non_blank(raw.product_name),
        product_type: non_blank(raw.product_type),
        general_labeling,
        ingredient_labeling,
        allergen_labeling,
        nutrition_labeling,
        claims,
        overall_assessment,
        recommendations,
        comparison: raw.comparison.map(|c| Comparison {
            issues_resolved: c.issues_resolved,
            issues_remaining: c.issues_remaining,
            new_issues: c.new_issues,
            summary: c.summary,
        }),
        normalizations: n.records,
    })
}

fn non_blank(value: Option<String>) -> String {
    value
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| "Not identified".to_string())
}

pub fn parse_report(raw: &str) -> LabelResult<ComplianceReport> {
    validate_report(first_object(raw)?)
}
