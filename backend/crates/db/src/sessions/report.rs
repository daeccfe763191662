use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ComplianceStatus {
    Compliant,
    LikelyCompliant,
    PotentiallyNonCompliant,
    NonCompliant,
}

impl ComplianceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Compliant => "compliant",
            Self::LikelyCompliant => "likely_compliant",
            Self::PotentiallyNonCompliant => "potentially_non_compliant",
            Self::NonCompliant => "non_compliant",
        }
    }
}

impl FromStr for ComplianceStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "compliant" => Ok(Self::Compliant),
            "likely_compliant" => Ok(Self::LikelyCompliant),
            "potentially_non_compliant" => Ok(Self::PotentiallyNonCompliant),
            "non_compliant" => Ok(Self::NonCompliant),
            _ => Err(format!("unknown compliance status: {value}")),
        }
    }
}

impl fmt::Display for ComplianceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-section status. Sections may legitimately not apply to a product
/// (e.g. nutrition labeling on an exempt item).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SectionStatus {
    Compliant,
    LikelyCompliant,
    PotentiallyNonCompliant,
    NonCompliant,
    NotApplicable,
}

impl SectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Compliant => "compliant",
            Self::LikelyCompliant => "likely_compliant",
            Self::PotentiallyNonCompliant => "potentially_non_compliant",
            Self::NonCompliant => "non_compliant",
            Self::NotApplicable => "not_applicable",
        }
    }
}

impl FromStr for SectionStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "not_applicable" => Ok(Self::NotApplicable),
            other => ComplianceStatus::from_str(other).map(Self::from),
        }
    }
}

impl From<ComplianceStatus> for SectionStatus {
    fn from(status: ComplianceStatus) -> Self {
        match status {
            ComplianceStatus::Compliant => Self::Compliant,
            ComplianceStatus::LikelyCompliant => Self::LikelyCompliant,
            ComplianceStatus::PotentiallyNonCompliant => Self::PotentiallyNonCompliant,
            ComplianceStatus::NonCompliant => Self::NonCompliant,
        }
    }
}

/// Recommendation tier. Declaration order is severity order, so sorting
/// ascending puts critical items first.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Critical,
    High,
    Medium,
    Low,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "critical" => Ok(Self::Critical),
            "high" => Ok(Self::High),
            "medium" => Ok(Self::Medium),
            "low" => Ok(Self::Low),
            _ => Err(format!("unknown priority: {value}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SectionAssessment {
    pub status: SectionStatus,
    pub details: String,
    #[serde(default)]
    pub issues: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OverallAssessment {
    pub primary_compliance_status: ComplianceStatus,
    pub summary: String,
    #[serde(default)]
    pub key_findings: Vec<String>,
    #[serde(default)]
    pub strengths: Vec<String>,
    #[serde(default)]
    pub concerns: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Recommendation {
    pub priority: Priority,
    pub recommendation: String,
    pub regulation: String,
}

/// Progress against the previous analysis in the same session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Comparison {
    pub issues_resolved: Vec<String>,
    pub issues_remaining: Vec<String>,
    pub new_issues: Vec<String>,
    pub summary: String,
}

/// Audit record of a model value that was outside the fixed enumeration
/// and got replaced.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatusNormalization {
    pub field: String,
    pub received: String,
    pub normalized_to: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ComplianceReport {
    pub product_name: String,
    pub product_type: String,
    pub general_labeling: SectionAssessment,
    pub ingredient_labeling: SectionAssessment,
    pub allergen_labeling: SectionAssessment,
    pub nutrition_labeling: SectionAssessment,
    pub claims: SectionAssessment,
    pub overall_assessment: OverallAssessment,
    #[serde(default)]
    pub recommendations: Vec<Recommendation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comparison: Option<Comparison>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub normalizations: Vec<StatusNormalization>,
}

impl ComplianceReport {
    /// The five labeling sections with their wire names, in report order.
    pub fn sections(&self) -> [(&'static str, &SectionAssessment); 5] {
        [
            ("general_labeling", &self.general_labeling),
            ("ingredient_labeling", &self.ingredient_labeling),
            ("allergen_labeling", &self.allergen_labeling),
            ("nutrition_labeling", &self.nutrition_labeling),
            ("claims", &self.claims),
        ]
    }
}
