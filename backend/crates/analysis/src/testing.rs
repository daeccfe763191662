//! In-memory collaborators for tests, here and in crates that enable the
//! `test-support` feature.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use labelcheck_common::error::{LabelError, LabelResult, UpstreamError};
use labelcheck_config::AnalysisLimits;
use labelcheck_db::regulatory::models::RegulatoryDocument;
use labelcheck_db::regulatory::repositories::RegulatoryRepository;
use labelcheck_db::sessions::models::{
    ChatInput, ChatResult, FileMetadata, ImageAnalysisInput, Iteration, IterationContent,
    IterationType, NewIteration, RevisionInput, Session, SessionFilter, TextCheckInput, TextSource,
};
use labelcheck_db::sessions::report::{
    Comparison, ComplianceReport, ComplianceStatus, OverallAssessment, Priority, Recommendation,
    SectionAssessment, SectionStatus,
};
use labelcheck_db::sessions::repositories::SessionRepository;
use labelcheck_db::users::models::User;
use labelcheck_db::users::repositories::UserRepository;

use crate::clock::Clock;
use crate::completion::{Completion, CompletionRequest, CompletionService, TokenUsage};
use crate::engine::ComplianceEngine;
use crate::ingest::pdf::{PdfRasterizer, PdfTextExtractor};
use crate::ingest::IngestionNormalizer;
use crate::regulatory::RegulatoryContextCache;
use crate::service::LabelReviewService;
use crate::store::SessionStore;

pub const PNG_BYTES: &[u8] = b"\x89PNG\r\n\x1a\n\x00\x00\x00\rIHDR";

// Sessions

#[derive(Default)]
struct SessionState {
    sessions: Vec<Session>,
    iterations: Vec<Iteration>,
}

#[derive(Default)]
pub struct InMemorySessionRepository {
    state: Mutex<SessionState>,
    fail_writes: AtomicBool,
}

impl InMemorySessionRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent write fail with a database error.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Store an already-built iteration as if it had been written earlier.
    pub fn seed_iteration(&self, iteration: Iteration) {
        self.state.lock().expect("state lock").iterations.push(iteration);
    }

    pub fn iteration_count(&self) -> usize {
        self.state.lock().expect("state lock").iterations.len()
    }

    fn check_writable(&self) -> LabelResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(LabelError::Database("simulated write failure".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl SessionRepository for InMemorySessionRepository {
    async fn create_session(&self, session: Session) -> LabelResult<Session> {
        self.check_writable()?;
        self.state.lock().expect("state lock").sessions.push(session.clone());
        Ok(session)
    }

    async fn get_session(&self, id: Uuid) -> LabelResult<Option<Session>> {
        let state = self.state.lock().expect("state lock");
        Ok(state.sessions.iter().find(|s| s.id == id).cloned())
    }

    async fn list_sessions(&self, filter: SessionFilter) -> LabelResult<Vec<Session>> {
        let state = self.state.lock().expect("state lock");
        let mut sessions: Vec<Session> = state
            .sessions
            .iter()
            .filter(|s| filter.user_id.map_or(true, |u| s.user_id == u))
            .cloned()
            .collect();
        sessions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        let offset = filter.offset.unwrap_or(0).max(0) as usize;
        let limit = filter.limit.unwrap_or(50).max(0) as usize;
        Ok(sessions.into_iter().skip(offset).take(limit).collect())
    }

    async fn list_iterations(&self, session_id: Uuid) -> LabelResult<Vec<Iteration>> {
        let state = self.state.lock().expect("state lock");
        let mut iterations: Vec<Iteration> = state
            .iterations
            .iter()
            .filter(|i| i.session_id == session_id)
            .cloned()
            .collect();
        iterations.sort_by_key(|i| i.sequence);
        Ok(iterations)
    }

    async fn get_iteration(&self, session_id: Uuid, id: Uuid) -> LabelResult<Option<Iteration>> {
        let state = self.state.lock().expect("state lock");
        Ok(state
            .iterations
            .iter()
            .find(|i| i.id == id && i.session_id == session_id)
            .cloned())
    }

    async fn insert_iteration(&self, new: NewIteration) -> LabelResult<Iteration> {
        self.check_writable()?;
        let mut state = self.state.lock().expect("state lock");
        if !state.sessions.iter().any(|s| s.id == new.session_id) {
            return Err(LabelError::Validation(format!("no session {}", new.session_id)));
        }
        let previous = state
            .iterations
            .iter()
            .filter(|i| i.session_id == new.session_id)
            .max_by_key(|i| i.sequence);
        let sequence = previous.map_or(1, |p| p.sequence + 1);
        let created_at = match previous {
            Some(p) if p.created_at > Utc::now() => p.created_at,
            _ => Utc::now(),
        };
        let iteration = Iteration {
            id: new.id,
            session_id: new.session_id,
            sequence,
            content: new.content,
            file_ref: new.file_ref,
            parent_iteration_id: new.parent_iteration_id,
            created_at,
        };
        state.iterations.push(iteration.clone());
        Ok(iteration)
    }

    async fn latest_iteration_of_types(
        &self,
        session_id: Uuid,
        types: &[IterationType],
    ) -> LabelResult<Option<Iteration>> {
        let state = self.state.lock().expect("state lock");
        Ok(state
            .iterations
            .iter()
            .filter(|i| i.session_id == session_id && types.contains(&i.iteration_type()))
            .max_by_key(|i| i.sequence)
            .cloned())
    }
}

// Regulatory documents

#[derive(Default)]
pub struct InMemoryRegulatoryRepository {
    documents: Mutex<Vec<RegulatoryDocument>>,
    failing: AtomicBool,
    calls: AtomicUsize,
}

impl InMemoryRegulatoryRepository {
    pub fn with_documents(documents: Vec<RegulatoryDocument>) -> Self {
        Self {
            documents: Mutex::new(documents),
            ..Default::default()
        }
    }

    pub fn push(&self, document: RegulatoryDocument) {
        self.documents.lock().expect("documents lock").push(document);
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RegulatoryRepository for InMemoryRegulatoryRepository {
    async fn list_active_documents(&self) -> LabelResult<Vec<RegulatoryDocument>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(LabelError::Database("simulated outage".to_string()));
        }
        let documents = self.documents.lock().expect("documents lock");
        Ok(documents.iter().filter(|d| d.is_active).cloned().collect())
    }
}

pub fn regulatory_document(title: &str, category: &str) -> RegulatoryDocument {
    RegulatoryDocument {
        id: Uuid::new_v4(),
        title: title.to_string(),
        content: format!("Requirements of {title}."),
        category: Some(category.to_string()),
        jurisdiction: Some("US".to_string()),
        source_url: None,
        is_active: true,
        updated_at: Utc::now(),
    }
}

// Users

#[derive(Default)]
pub struct InMemoryUserRepository {
    users: Mutex<Vec<User>>,
}

impl InMemoryUserRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, external_id: &str) -> User {
        let user = User {
            id: Uuid::new_v4(),
            external_id: external_id.to_string(),
            email: Some(format!("{external_id}@example.com")),
            created_at: Utc::now(),
        };
        self.users.lock().expect("users lock").push(user.clone());
        user
    }
}

#[async_trait]
impl UserRepository for InMemoryUserRepository {
    async fn lookup_by_external_id(&self, external_id: &str) -> LabelResult<Option<User>> {
        let users = self.users.lock().expect("users lock");
        Ok(users.iter().find(|u| u.external_id == external_id).cloned())
    }
}

// Completion

/// Replays queued responses in order and records every request.
#[derive(Default)]
pub struct ScriptedCompletionService {
    responses: Mutex<VecDeque<Result<String, UpstreamError>>>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedCompletionService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_text(&self, text: &str) {
        self.responses
            .lock()
            .expect("responses lock")
            .push_back(Ok(text.to_string()));
    }

    pub fn push_error(&self, error: UpstreamError) {
        self.responses
            .lock()
            .expect("responses lock")
            .push_back(Err(error));
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().expect("requests lock").clone()
    }
}

#[async_trait]
impl CompletionService for ScriptedCompletionService {
    async fn complete(&self, request: CompletionRequest) -> Result<Completion, UpstreamError> {
        self.requests.lock().expect("requests lock").push(request);
        let next = self.responses.lock().expect("responses lock").pop_front();
        match next {
            Some(Ok(text)) => Ok(Completion {
                text,
                model: "scripted".to_string(),
                usage: TokenUsage::default(),
            }),
            Some(Err(e)) => Err(e),
            None => Err(UpstreamError::Unavailable("no scripted response left".to_string())),
        }
    }
}

// PDF tools

pub struct StaticPdfText(Option<String>);

impl StaticPdfText {
    pub fn returning(text: &str) -> Self {
        Self(Some(text.to_string()))
    }

    pub fn failing() -> Self {
        Self(None)
    }
}

#[async_trait]
impl PdfTextExtractor for StaticPdfText {
    async fn extract_text(&self, _pdf: &[u8]) -> LabelResult<String> {
        self.0
            .clone()
            .ok_or_else(|| LabelError::ExtractionFailed("no text layer".to_string()))
    }
}

pub struct StaticRasterizer {
    png: Option<Vec<u8>>,
    calls: Arc<AtomicUsize>,
}

impl StaticRasterizer {
    pub fn returning(png: Vec<u8>) -> Self {
        Self {
            png: Some(png),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn failing() -> Self {
        Self {
            png: None,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn calls(&self) -> Arc<AtomicUsize> {
        self.calls.clone()
    }
}

#[async_trait]
impl PdfRasterizer for StaticRasterizer {
    async fn rasterize_first_page(&self, _pdf: &[u8]) -> LabelResult<Vec<u8>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.png
            .clone()
            .ok_or_else(|| LabelError::ExtractionFailed("renderer unavailable".to_string()))
    }
}

// Clock

pub struct ManualClock(Mutex<DateTime<Utc>>);

impl ManualClock {
    pub fn new() -> Self {
        Self(Mutex::new(Utc::now()))
    }

    pub fn advance(&self, by: Duration) {
        *self.0.lock().expect("clock lock") += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.0.lock().expect("clock lock")
    }
}

// Fixtures

fn section(status: SectionStatus, details: &str, issues: &[&str]) -> SectionAssessment {
    SectionAssessment {
        status,
        details: details.to_string(),
        issues: issues.iter().map(|s| s.to_string()).collect(),
    }
}

pub fn sample_report() -> ComplianceReport {
    ComplianceReport {
        product_name: "Oat Crunch Bar".to_string(),
        product_type: "conventional food".to_string(),
        general_labeling: section(SectionStatus::Compliant, "Identity and net quantity present.", &[]),
        ingredient_labeling: section(SectionStatus::LikelyCompliant, "Listed by weight.", &[]),
        allergen_labeling: section(
            SectionStatus::NonCompliant,
            "Milk present without a Contains statement.",
            &["Missing allergen declaration for milk"],
        ),
        nutrition_labeling: section(SectionStatus::Compliant, "Facts panel present.", &[]),
        claims: section(SectionStatus::Compliant, "No claims made.", &[]),
        overall_assessment: OverallAssessment {
            primary_compliance_status: ComplianceStatus::NonCompliant,
            summary: "Allergen labeling is deficient.".to_string(),
            key_findings: vec!["Milk not declared".to_string()],
            strengths: vec!["Clear net quantity".to_string()],
            concerns: vec!["Undeclared allergen".to_string()],
        },
        recommendations: vec![Recommendation {
            priority: Priority::Critical,
            recommendation: "Add 'Contains: Milk' statement".to_string(),
            regulation: "21 U.S.C. 343(w) (FALCPA)".to_string(),
        }],
        comparison: Some(Comparison {
            issues_resolved: vec![],
            issues_remaining: vec!["Missing allergen declaration for milk".to_string()],
            new_issues: vec![],
            summary: "No change yet.".to_string(),
        }),
        normalizations: vec![],
    }
}

/// Model-style JSON for `sample_report` with the given overall status and
/// no comparison block.
pub fn sample_report_json(overall_status: &str) -> String {
    serde_json::json!({
        "product_name": "Oat Crunch Bar",
        "product_type": "conventional food",
        "general_labeling": { "status": "compliant", "details": "Identity and net quantity present.", "issues": [] },
        "ingredient_labeling": { "status": "likely_compliant", "details": "Listed by weight.", "issues": [] },
        "allergen_labeling": {
            "status": "non_compliant",
            "details": "Milk present without a Contains statement.",
            "issues": ["Missing allergen declaration for milk"]
        },
        "nutrition_labeling": { "status": "compliant", "details": "Facts panel present.", "issues": [] },
        "claims": { "status": "compliant", "details": "No claims made.", "issues": [] },
        "overall_assessment": {
            "primary_compliance_status": overall_status,
            "summary": "Allergen labeling is deficient.",
            "key_findings": ["Milk not declared"],
            "strengths": ["Clear net quantity"],
            "concerns": ["Undeclared allergen"]
        },
        "recommendations": [
            {
                "priority": "critical",
                "recommendation": "Add 'Contains: Milk' statement",
                "regulation": "21 U.S.C. 343(w) (FALCPA)"
            }
        ]
    })
    .to_string()
}

pub fn chat_content(question: &str, answer: &str) -> IterationContent {
    IterationContent::ChatQuestion {
        input: ChatInput {
            message: question.to_string(),
        },
        result: ChatResult {
            response: answer.to_string(),
        },
    }
}

fn iteration(session_id: Uuid, sequence: i64, content: IterationContent) -> Iteration {
    Iteration {
        id: Uuid::new_v4(),
        session_id,
        sequence,
        content,
        file_ref: None,
        parent_iteration_id: None,
        created_at: Utc::now() + Duration::seconds(sequence),
    }
}

/// Stored chat turn with `question {sequence}` / `answer {sequence}`.
pub fn chat_iteration(session_id: Uuid, sequence: i64) -> Iteration {
    iteration(
        session_id,
        sequence,
        chat_content(&format!("question {sequence}"), &format!("answer {sequence}")),
    )
}

pub fn report_iteration(session_id: Uuid, sequence: i64, kind: IterationType) -> Iteration {
    let file = FileMetadata {
        file_name: Some("label.png".to_string()),
        media_type: "image/png".to_string(),
        size_bytes: 1024,
    };
    let result = sample_report();
    let content = match kind {
        IterationType::ImageAnalysis => IterationContent::ImageAnalysis {
            input: ImageAnalysisInput { file },
            result,
        },
        IterationType::RevisedAnalysis => IterationContent::RevisedAnalysis {
            input: RevisionInput {
                file,
                baseline_iteration_id: None,
            },
            result,
        },
        IterationType::TextCheck | IterationType::ChatQuestion => IterationContent::TextCheck {
            input: TextCheckInput {
                source: TextSource::Typed,
                text_excerpt: Some("Ingredients: oats, milk".to_string()),
                text_chars: 23,
                excerpt_truncated: false,
                file: None,
                baseline_iteration_id: None,
            },
            result,
        },
    };
    iteration(session_id, sequence, content)
}

// Service

pub struct TestHarness {
    pub service: LabelReviewService,
    pub store: SessionStore,
    pub sessions: Arc<InMemorySessionRepository>,
    pub regulatory: Arc<InMemoryRegulatoryRepository>,
    pub completion: Arc<ScriptedCompletionService>,
    pub limits: AnalysisLimits,
}

/// Service over in-memory collaborators. PDFs have no text layer and
/// rasterize to `PNG_BYTES`.
pub fn test_service() -> TestHarness {
    let limits = AnalysisLimits::default();
    let sessions = Arc::new(InMemorySessionRepository::new());
    let regulatory = Arc::new(InMemoryRegulatoryRepository::with_documents(vec![
        regulatory_document("FALCPA", "allergens"),
        regulatory_document("21 CFR 101.9 Nutrition labeling", "nutrition"),
    ]));
    let completion = Arc::new(ScriptedCompletionService::new());
    let store = SessionStore::new(sessions.clone());

    let cache = Arc::new(RegulatoryContextCache::new(
        regulatory.clone(),
        Arc::new(ManualClock::new()),
        limits.regulatory_cache_ttl_secs,
        limits.max_regulatory_context_chars,
    ));
    let normalizer = IngestionNormalizer::new(
        Arc::new(StaticPdfText::returning("")),
        Arc::new(StaticRasterizer::returning(PNG_BYTES.to_vec())),
        limits.clone(),
    );
    let engine = ComplianceEngine::new(completion.clone(), 2048);
    let service = LabelReviewService::new(store.clone(), cache, normalizer, engine, limits.clone());

    TestHarness {
        service,
        store,
        sessions,
        regulatory,
        completion,
        limits,
    }
}
