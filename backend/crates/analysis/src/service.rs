use std::sync::Arc;

use serde::Serialize;
use uuid::Uuid;

use labelcheck_common::error::{LabelError, LabelResult};
use labelcheck_config::AnalysisLimits;
use labelcheck_db::sessions::models::{
    ChatInput, ChatResult, ImageAnalysisInput, Iteration, IterationContent, IterationType,
    RevisionInput, Session, TextCheckInput, TextSource,
};
use labelcheck_db::sessions::report::ComplianceReport;

use crate::assembler::{AssembledPrompt, ContextAssembler, NewInput};
use crate::engine::ComplianceEngine;
use crate::ingest::{Artifact, ContentOrigin, IngestionNormalizer, NormalizedContent, Upload};
use crate::reconcile::{baseline, reconcile_comparison, ComparisonCheck};
use crate::regulatory::RegulatoryContextCache;
use crate::store::{Access, SessionStore, SessionWithIterations};

/// Label content for a text check.
#[derive(Debug, Clone)]
pub enum TextSubmission {
    Text(String),
    Pdf(Upload),
}

#[derive(Debug, Clone, Serialize)]
pub struct AnalysisOutcome {
    pub session_id: Uuid,
    pub session_created: bool,
    /// `None` when the report was produced but could not be saved.
    pub iteration_id: Option<Uuid>,
    pub iteration_type: IterationType,
    pub history_saved: bool,
    /// Whether the report carries the comparison a baseline calls for.
    pub comparison_check: ComparisonCheck,
    pub report: ComplianceReport,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatOutcome {
    pub session_id: Uuid,
    pub response: String,
    pub iteration_id: Option<Uuid>,
    pub parent_iteration_id: Option<Uuid>,
    pub history_saved: bool,
}

/// Entry point for the three label review operations.
///
/// Every operation validates input and checks session ownership before the
/// completion service is called. Once a result exists it is always returned;
/// a failed history write only clears `history_saved`.
pub struct LabelReviewService {
    store: SessionStore,
    regulatory: Arc<RegulatoryContextCache>,
    assembler: ContextAssembler,
    normalizer: IngestionNormalizer,
    engine: ComplianceEngine,
    limits: AnalysisLimits,
}

impl LabelReviewService {
    pub fn new(
        store: SessionStore,
        regulatory: Arc<RegulatoryContextCache>,
        normalizer: IngestionNormalizer,
        engine: ComplianceEngine,
        limits: AnalysisLimits,
    ) -> Self {
        Self {
            store,
            regulatory,
            assembler: ContextAssembler::new(limits.chat_history_turns),
            normalizer,
            engine,
            limits,
        }
    }

    /// Analyze an uploaded label image (or PDF). Starts a new session when
    /// `session_id` is `None`; with an earlier analysis in the session the
    /// result is stored as a revision of it.
    pub async fn analyze_image(
        &self,
        user_id: Uuid,
        session_id: Option<Uuid>,
        upload: Upload,
        file_ref: Option<String>,
    ) -> LabelResult<AnalysisOutcome> {
        let content = self.normalizer.normalize(Artifact::Binary(upload)).await?;
        if content.origin == ContentOrigin::Typed {
            return Err(LabelError::UnsupportedMediaType(
                "text files go to analyze-text".to_string(),
            ));
        }
        let file = content
            .file
            .clone()
            .ok_or_else(|| LabelError::Internal("upload without file metadata".to_string()))?;

        let (loaded, session_created) = match session_id {
            Some(id) => (
                self.store
                    .get_session_with_iterations(id, Access::Owner(user_id))
                    .await?,
                false,
            ),
            None => (
                SessionWithIterations {
                    session: self.store.create_session(user_id).await?,
                    iterations: Vec::new(),
                },
                true,
            ),
        };

        let revision = baseline(&loaded.iterations).is_some();
        let input = match content.origin {
            ContentOrigin::PdfImage => NewInput::PdfPageImage,
            _ => NewInput::LabelImage { revision },
        };
        let prompt = self.prompt(&loaded, prompt_input(&content, input)).await;
        let mut report = self.run_analysis(&content, &prompt).await?;
        let comparison_check = reconcile_comparison(&mut report, prompt.baseline_iteration_id);

        let iteration = match prompt.baseline_iteration_id {
            Some(baseline_iteration_id) => IterationContent::RevisedAnalysis {
                input: RevisionInput {
                    file,
                    baseline_iteration_id: Some(baseline_iteration_id),
                },
                result: report,
            },
            None => IterationContent::ImageAnalysis {
                input: ImageAnalysisInput { file },
                result: report,
            },
        };

        self.record_analysis(
            &loaded.session,
            user_id,
            iteration,
            file_ref,
            prompt.baseline_iteration_id,
            session_created,
            comparison_check,
        )
        .await
    }

    /// Check typed label text or a label PDF against the session's latest
    /// analysis, if any.
    pub async fn analyze_text(
        &self,
        user_id: Uuid,
        session_id: Uuid,
        submission: TextSubmission,
    ) -> LabelResult<AnalysisOutcome> {
        let artifact = match submission {
            TextSubmission::Text(text) => Artifact::Text(text),
            TextSubmission::Pdf(upload) => Artifact::Binary(upload),
        };
        let content = self.normalizer.normalize(artifact).await?;
        if content.origin == ContentOrigin::Image {
            return Err(LabelError::UnsupportedMediaType(
                "images go to analyze-image".to_string(),
            ));
        }

        let loaded = self
            .store
            .get_session_with_iterations(session_id, Access::Owner(user_id))
            .await?;

        let prompt = self
            .prompt(&loaded, prompt_input(&content, NewInput::PdfPageImage))
            .await;
        let mut report = self.run_analysis(&content, &prompt).await?;
        let comparison_check = reconcile_comparison(&mut report, prompt.baseline_iteration_id);

        let source = match content.origin {
            ContentOrigin::PdfText => TextSource::PdfText,
            ContentOrigin::PdfImage => TextSource::PdfImage,
            _ => TextSource::Typed,
        };
        let iteration = IterationContent::TextCheck {
            input: TextCheckInput {
                source,
                text_excerpt: content.stored_excerpt,
                text_chars: content.text_chars,
                excerpt_truncated: content.excerpt_truncated,
                file: content.file,
                baseline_iteration_id: prompt.baseline_iteration_id,
            },
            result: report,
        };

        self.record_analysis(
            &loaded.session,
            user_id,
            iteration,
            None,
            prompt.baseline_iteration_id,
            false,
            comparison_check,
        )
        .await
    }

    /// Answer a follow-up question. Without an explicit parent the answer
    /// hangs off the latest analysis.
    pub async fn chat(
        &self,
        user_id: Uuid,
        session_id: Uuid,
        message: &str,
        parent_iteration_id: Option<Uuid>,
    ) -> LabelResult<ChatOutcome> {
        let message = message.trim();
        if message.is_empty() {
            return Err(LabelError::Validation("message is empty".to_string()));
        }
        let chars = message.chars().count();
        if chars > self.limits.max_chat_chars {
            return Err(LabelError::Validation(format!(
                "message is {chars} characters; the limit is {}",
                self.limits.max_chat_chars
            )));
        }

        let loaded = self
            .store
            .get_session_with_iterations(session_id, Access::Owner(user_id))
            .await?;
        let parent = match parent_iteration_id {
            Some(id) if loaded.iterations.iter().any(|i| i.id == id) => Some(id),
            Some(id) => {
                return Err(LabelError::Validation(format!(
                    "parent iteration {id} is not part of session {session_id}"
                )));
            }
            None => baseline(&loaded.iterations).map(|i| i.id),
        };

        let prompt = self.prompt(&loaded, NewInput::ChatMessage(message)).await;
        let response = self.engine.chat(&prompt).await?;

        let content = IterationContent::ChatQuestion {
            input: ChatInput {
                message: message.to_string(),
            },
            result: ChatResult {
                response: response.clone(),
            },
        };
        let saved = self
            .save(&loaded.session, user_id, content, None, parent)
            .await;

        Ok(ChatOutcome {
            session_id,
            response,
            iteration_id: saved.as_ref().map(|i| i.id),
            parent_iteration_id: parent,
            history_saved: saved.is_some(),
        })
    }

    pub async fn list_sessions(
        &self,
        user_id: Uuid,
        limit: Option<i64>,
        offset: Option<i64>,
    ) -> LabelResult<Vec<Session>> {
        self.store.list_sessions(user_id, limit, offset).await
    }

    pub async fn get_session(
        &self,
        user_id: Uuid,
        session_id: Uuid,
    ) -> LabelResult<SessionWithIterations> {
        self.store
            .get_session_with_iterations(session_id, Access::Owner(user_id))
            .await
    }

    async fn prompt(&self, loaded: &SessionWithIterations, input: NewInput<'_>) -> AssembledPrompt {
        let regulatory = self.regulatory.get().await;
        self.assembler
            .assemble(&loaded.session, &loaded.iterations, &regulatory, input)
    }

    async fn run_analysis(
        &self,
        content: &NormalizedContent,
        prompt: &AssembledPrompt,
    ) -> LabelResult<ComplianceReport> {
        match content.image() {
            Some(image) => self.engine.analyze_image(image, prompt).await,
            None => self.engine.analyze_text(prompt).await,
        }
    }

    async fn record_analysis(
        &self,
        session: &Session,
        user_id: Uuid,
        content: IterationContent,
        file_ref: Option<String>,
        parent: Option<Uuid>,
        session_created: bool,
        comparison_check: ComparisonCheck,
    ) -> LabelResult<AnalysisOutcome> {
        let iteration_type = content.iteration_type();
        let report = content
            .report()
            .cloned()
            .ok_or_else(|| LabelError::Internal("analysis without report".to_string()))?;
        let saved = self.save(session, user_id, content, file_ref, parent).await;

        Ok(AnalysisOutcome {
            session_id: session.id,
            session_created,
            iteration_id: saved.as_ref().map(|i| i.id),
            iteration_type,
            history_saved: saved.is_some(),
            comparison_check,
            report,
        })
    }

    /// Write an iteration, reporting failure in the log instead of the result.
    async fn save(
        &self,
        session: &Session,
        user_id: Uuid,
        content: IterationContent,
        file_ref: Option<String>,
        parent: Option<Uuid>,
    ) -> Option<Iteration> {
        let iteration_type = content.iteration_type();
        match self
            .store
            .add_iteration(session.id, content, file_ref, parent, Access::Owner(user_id))
            .await
        {
            Ok(iteration) => Some(iteration),
            Err(e) => {
                tracing::error!(
                    session_id = %session.id,
                    iteration_type = iteration_type.as_str(),
                    error = %e,
                    "result computed but iteration write failed"
                );
                None
            }
        }
    }
}

/// Text content always goes in as prospective text; image content uses
/// the given framing.
fn prompt_input<'a>(content: &'a NormalizedContent, image_input: NewInput<'a>) -> NewInput<'a> {
    match content.text() {
        Some(text) => NewInput::ProspectiveText(text),
        None => image_input,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{
        sample_report_json, test_service, TestHarness, PNG_BYTES,
    };
    use labelcheck_common::error::UpstreamError;
    use labelcheck_db::sessions::report::SectionStatus;

    fn png_upload() -> Upload {
        Upload {
            file_name: Some("front.png".to_string()),
            declared_media_type: Some("image/png".to_string()),
            bytes: PNG_BYTES.to_vec(),
        }
    }

    #[tokio::test]
    async fn first_image_creates_session_and_stores_image_analysis() {
        let h: TestHarness = test_service();
        h.completion.push_text(&sample_report_json("non_compliant"));
        let user = Uuid::new_v4();

        let outcome = h
            .service
            .analyze_image(user, None, png_upload(), Some("labels/front.png".to_string()))
            .await
            .expect("analysis");

        assert!(outcome.session_created);
        assert!(outcome.history_saved);
        assert_eq!(outcome.iteration_type, IterationType::ImageAnalysis);
        assert!(outcome.report.comparison.is_none());
        assert_eq!(outcome.comparison_check, ComparisonCheck::NotExpected);

        let stored = h.service.get_session(user, outcome.session_id).await.expect("load");
        assert_eq!(stored.iterations.len(), 1);
        assert_eq!(stored.iterations[0].file_ref.as_deref(), Some("labels/front.png"));
    }

    #[tokio::test]
    async fn second_image_is_a_revision_with_comparison() {
        let h = test_service();
        let user = Uuid::new_v4();
        h.completion.push_text(&sample_report_json("non_compliant"));
        let first = h
            .service
            .analyze_image(user, None, png_upload(), None)
            .await
            .expect("first");

        h.completion.push_text(&sample_report_json_with_comparison());
        let second = h
            .service
            .analyze_image(user, Some(first.session_id), png_upload(), None)
            .await
            .expect("second");

        assert!(!second.session_created);
        assert_eq!(second.iteration_type, IterationType::RevisedAnalysis);
        assert_eq!(second.comparison_check, ComparisonCheck::Present);
        let comparison = second.report.comparison.expect("comparison");
        assert_eq!(comparison.issues_resolved.len(), 1);
        assert!(comparison.new_issues.is_empty());

        let requests = h.completion.requests();
        assert!(requests[1].cached_prefix.contains("PREVIOUS ANALYSIS"));
        assert!(requests[1].instructions.contains("issues_resolved"));

        let stored = h.service.get_session(user, first.session_id).await.expect("load");
        assert_eq!(stored.iterations[1].parent_iteration_id, first.iteration_id);
    }

    #[tokio::test]
    async fn revision_without_comparison_is_flagged_missing() {
        let h = test_service();
        let user = Uuid::new_v4();
        h.completion.push_text(&sample_report_json("non_compliant"));
        let first = h
            .service
            .analyze_image(user, None, png_upload(), None)
            .await
            .expect("first");

        h.completion.push_text(&sample_report_json("likely_compliant"));
        let second = h
            .service
            .analyze_text(
                user,
                first.session_id,
                TextSubmission::Text("Ingredients: oats, milk. Contains: Milk.".to_string()),
            )
            .await
            .expect("second");

        assert!(second.report.comparison.is_none());
        assert_eq!(second.comparison_check, ComparisonCheck::Missing);
        assert!(second.history_saved);
    }

    #[tokio::test]
    async fn text_check_on_new_session_flags_allergen() {
        let h = test_service();
        let user = Uuid::new_v4();
        let session = h.store.create_session(user).await.expect("session");
        h.completion.push_text(&sample_report_json("non_compliant"));

        let outcome = h
            .service
            .analyze_text(
                user,
                session.id,
                TextSubmission::Text("Contains milk, no allergen statement".to_string()),
            )
            .await
            .expect("analysis");

        assert_eq!(outcome.iteration_type, IterationType::TextCheck);
        assert_ne!(outcome.report.allergen_labeling.status, SectionStatus::Compliant);
        assert!(outcome
            .report
            .recommendations
            .iter()
            .any(|r| r.regulation.contains("FALCPA")));

        let sent = &h.completion.requests()[0];
        match &sent.content {
            crate::completion::CompletionContent::Text(text) => {
                assert!(text.contains("Contains milk, no allergen statement"));
            }
            other => panic!("expected text content, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn oversized_text_never_reaches_the_model() {
        let h = test_service();
        let user = Uuid::new_v4();
        let session = h.store.create_session(user).await.expect("session");
        let too_long = "a".repeat(h.limits.max_text_chars + 1);

        let err = h
            .service
            .analyze_text(user, session.id, TextSubmission::Text(too_long))
            .await
            .unwrap_err();
        assert!(matches!(err, LabelError::Validation(_)));
        assert!(h.completion.requests().is_empty());
    }

    #[tokio::test]
    async fn foreign_session_is_forbidden_before_model_call() {
        let h = test_service();
        let owner = Uuid::new_v4();
        let session = h.store.create_session(owner).await.expect("session");

        let err = h
            .service
            .chat(Uuid::new_v4(), session.id, "Is this OK?", None)
            .await
            .unwrap_err();
        assert!(matches!(err, LabelError::Authorization(_)));
        assert!(h.completion.requests().is_empty());
        assert_eq!(h.sessions.iteration_count(), 0);
    }

    #[tokio::test]
    async fn chat_defaults_parent_to_latest_analysis() {
        let h = test_service();
        let user = Uuid::new_v4();
        h.completion.push_text(&sample_report_json("non_compliant"));
        let analysis = h
            .service
            .analyze_image(user, None, png_upload(), None)
            .await
            .expect("analysis");

        h.completion.push_text("Add a Contains statement below the ingredients.");
        let chat = h
            .service
            .chat(user, analysis.session_id, "How do I fix the allergen issue?", None)
            .await
            .expect("chat");

        assert_eq!(chat.parent_iteration_id, analysis.iteration_id);
        assert!(chat.history_saved);
        assert_eq!(chat.response, "Add a Contains statement below the ingredients.");
    }

    #[tokio::test]
    async fn chat_rejects_parent_from_other_session() {
        let h = test_service();
        let user = Uuid::new_v4();
        let session = h.store.create_session(user).await.expect("session");

        let err = h
            .service
            .chat(user, session.id, "Hello?", Some(Uuid::new_v4()))
            .await
            .unwrap_err();
        assert!(matches!(err, LabelError::Validation(_)));
    }

    #[tokio::test]
    async fn blank_and_oversized_chat_messages_are_rejected() {
        let h = test_service();
        let user = Uuid::new_v4();
        let session = h.store.create_session(user).await.expect("session");

        let blank = h.service.chat(user, session.id, "   ", None).await.unwrap_err();
        assert!(matches!(blank, LabelError::Validation(_)));

        let long = "q".repeat(h.limits.max_chat_chars + 1);
        let long = h.service.chat(user, session.id, &long, None).await.unwrap_err();
        assert!(matches!(long, LabelError::Validation(_)));
    }

    #[tokio::test]
    async fn failed_history_write_still_returns_report() {
        let h = test_service();
        let user = Uuid::new_v4();
        let session = h.store.create_session(user).await.expect("session");
        h.sessions.fail_writes(true);
        h.completion.push_text(&sample_report_json("likely_compliant"));

        let outcome = h
            .service
            .analyze_text(user, session.id, TextSubmission::Text("Net Wt 12 oz".to_string()))
            .await
            .expect("report despite failed write");

        assert!(!outcome.history_saved);
        assert!(outcome.iteration_id.is_none());
        assert_eq!(outcome.report.product_name, "Oat Crunch Bar");
    }

    #[tokio::test]
    async fn upstream_failure_writes_nothing() {
        let h = test_service();
        let user = Uuid::new_v4();
        let session = h.store.create_session(user).await.expect("session");
        h.completion
            .push_error(UpstreamError::RateLimited { retry_after_secs: Some(30) });

        let err = h
            .service
            .analyze_text(user, session.id, TextSubmission::Text("Net Wt 12 oz".to_string()))
            .await
            .unwrap_err();
        assert_eq!(err.retry_after_secs(), Some(30));
        assert_eq!(h.sessions.iteration_count(), 0);
    }

    #[tokio::test]
    async fn scanned_pdf_is_checked_as_page_image() {
        let h = test_service();
        let user = Uuid::new_v4();
        let session = h.store.create_session(user).await.expect("session");
        h.completion.push_text(&sample_report_json("compliant"));
        let pdf = Upload {
            file_name: Some("label.pdf".to_string()),
            declared_media_type: Some("application/pdf".to_string()),
            bytes: b"%PDF-1.4 scanned".to_vec(),
        };

        let outcome = h
            .service
            .analyze_text(user, session.id, TextSubmission::Pdf(pdf))
            .await
            .expect("analysis");

        let stored = h.service.get_session(user, session.id).await.expect("load");
        match &stored.iterations[0].content {
            IterationContent::TextCheck { input, .. } => {
                assert_eq!(input.source, TextSource::PdfImage);
                assert!(input.text_excerpt.is_none());
            }
            other => panic!("unexpected iteration: {other:?}"),
        }
        assert!(outcome.history_saved);
        assert!(matches!(
            h.completion.requests()[0].content,
            crate::completion::CompletionContent::TextWithImage { .. }
        ));
    }

    #[tokio::test]
    async fn image_on_text_route_is_unsupported() {
        let h = test_service();
        let user = Uuid::new_v4();
        let session = h.store.create_session(user).await.expect("session");

        let err = h
            .service
            .analyze_text(user, session.id, TextSubmission::Pdf(png_upload()))
            .await
            .unwrap_err();
        assert!(matches!(err, LabelError::UnsupportedMediaType(_)));
    }

    fn sample_report_json_with_comparison() -> String {
        let mut value: serde_json::Value =
            serde_json::from_str(&sample_report_json("likely_compliant")).expect("json");
        value["comparison"] = serde_json::json!({
            "issues_resolved": ["Missing allergen declaration for milk"],
            "issues_remaining": [],
            "new_issues": [],
            "summary": "The allergen statement was added."
        });
        value.to_string()
    }
}
