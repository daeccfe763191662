use labelcheck_analysis::reconcile::ComparisonCheck;
use labelcheck_analysis::{AnalysisOutcome, ChatOutcome};
use labelcheck_db::sessions::models::IterationType;
use labelcheck_db::sessions::report::ComplianceReport;
use serde::Serialize;
use uuid::Uuid;

/// The report fields at top level, plus where it was recorded.
#[derive(Debug, Serialize)]
pub struct AnalysisResponse {
    pub session_id: Uuid,
    pub iteration_id: Option<Uuid>,
    pub iteration_type: IterationType,
    pub history_saved: bool,
    pub comparison_check: ComparisonCheck,
    #[serde(flatten)]
    pub report: ComplianceReport,
}

impl From<AnalysisOutcome> for AnalysisResponse {
    fn from(outcome: AnalysisOutcome) -> Self {
        Self {
            session_id: outcome.session_id,
            iteration_id: outcome.iteration_id,
            iteration_type: outcome.iteration_type,
            history_saved: outcome.history_saved,
            comparison_check: outcome.comparison_check,
            report: outcome.report,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub session_id: Uuid,
    pub response: String,
    pub iteration_id: Option<Uuid>,
    pub parent_iteration_id: Option<Uuid>,
    pub history_saved: bool,
}

impl From<ChatOutcome> for ChatResponse {
    fn from(outcome: ChatOutcome) -> Self {
        Self {
            session_id: outcome.session_id,
            response: outcome.response,
            iteration_id: outcome.iteration_id,
            parent_iteration_id: outcome.parent_iteration_id,
            history_saved: outcome.history_saved,
        }
    }
}
