use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use uuid::Uuid;

use labelcheck_db::sessions::models::{Iteration, IterationContent, Session};

use crate::ingest::truncate_chars;
use crate::reconcile::{baseline, render_baseline};
use crate::regulatory::RegulatoryContext;

const PREAMBLE: &str = "# ROLE\n\
You are a regulatory compliance reviewer for food and dietary supplement labels sold in the \
United States. Assess labels against FDA requirements (21 CFR Part 101, FALCPA, the FASTER Act) \
and, for meat and poultry products, USDA FSIS requirements. Ground every finding in the reference \
documents above where they apply and cite the specific regulation. When the label is unreadable \
or information is missing, say so rather than assuming compliance.\n";

/// Longest chat turn carried into the suffix, per side.
const MAX_TURN_CHARS: usize = 2_000;
/// Memoized prefixes kept before the memo is reset.
const PREFIX_MEMO_CAPACITY: usize = 512;

/// The new material a prompt is assembled around.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NewInput<'a> {
    ChatMessage(&'a str),
    /// Label text the user is trying out before printing.
    ProspectiveText(&'a str),
    /// A label image is attached to the request.
    LabelImage { revision: bool },
    /// First page of a PDF without a text layer is attached as an image.
    PdfPageImage,
}

/// Identifies a prefix: it can only change when one of these does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PrefixKey {
    pub regulatory_generation: u64,
    pub baseline_iteration_id: Option<Uuid>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssembledPrompt {
    /// Regulatory text, preamble and latest analysis. Byte-stable for a
    /// given `prefix_key` so the provider can cache it.
    pub cached_prefix: Arc<str>,
    /// Recent chat turns and the new input.
    pub dynamic_suffix: String,
    pub baseline_iteration_id: Option<Uuid>,
    pub prefix_key: PrefixKey,
}

pub struct ContextAssembler {
    history_turns: usize,
    memo: Mutex<HashMap<PrefixKey, Arc<str>>>,
}

impl ContextAssembler {
    pub fn new(history_turns: usize) -> Self {
        Self {
            history_turns,
            memo: Mutex::new(HashMap::new()),
        }
    }

    pub fn assemble(
        &self,
        session: &Session,
        iterations: &[Iteration],
        regulatory: &RegulatoryContext,
        input: NewInput<'_>,
    ) -> AssembledPrompt {
        let latest = baseline(iterations);
        let key = PrefixKey {
            regulatory_generation: regulatory.generation,
            baseline_iteration_id: latest.map(|i| i.id),
        };
        let cached_prefix = self.prefix(key, regulatory, latest);
        let dynamic_suffix = self.suffix(iterations, input);

        tracing::debug!(
            session_id = %session.id,
            prefix_chars = cached_prefix.len(),
            suffix_chars = dynamic_suffix.len(),
            baseline = ?key.baseline_iteration_id,
            "prompt assembled"
        );

        AssembledPrompt {
            cached_prefix,
            dynamic_suffix,
            baseline_iteration_id: key.baseline_iteration_id,
            prefix_key: key,
        }
    }

    fn prefix(
        &self,
        key: PrefixKey,
        regulatory: &RegulatoryContext,
        latest: Option<&Iteration>,
    ) -> Arc<str> {
        let mut memo = self.memo.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(hit) = memo.get(&key) {
            return hit.clone();
        }

        let mut prefix = String::with_capacity(regulatory.text.len() + PREAMBLE.len() + 2_048);
        prefix.push_str(&regulatory.text);
        prefix.push('\n');
        prefix.push_str(PREAMBLE);
        if let Some(rendered) = latest.and_then(render_baseline) {
            prefix.push('\n');
            prefix.push_str(&rendered);
        }

        if memo.len() >= PREFIX_MEMO_CAPACITY {
            memo.clear();
        }
        let prefix: Arc<str> = Arc::from(prefix);
        memo.insert(key, prefix.clone());
        prefix
    }

    fn suffix(&self, iterations: &[Iteration], input: NewInput<'_>) -> String {
        let mut out = String::new();

        let chats: Vec<(&str, &str)> = iterations
            .iter()
            .filter_map(|i| match &i.content {
                IterationContent::ChatQuestion { input, result } => {
                    Some((input.message.as_str(), result.response.as_str()))
                }
                _ => None,
            })
            .collect();
        let recent = &chats[chats.len().saturating_sub(self.history_turns)..];
        if !recent.is_empty() {
            out.push_str("# RECENT CONVERSATION\n");
            for (question, answer) in recent {
                out.push_str(&format!("User: {}\n", clip(question)));
                out.push_str(&format!("Assistant: {}\n\n", clip(answer)));
            }
        }

        match input {
            NewInput::ChatMessage(message) => {
                out.push_str("# USER QUESTION\n");
                out.push_str(message);
                out.push('\n');
            }
            NewInput::ProspectiveText(text) => {
                out.push_str(
                    "# PROSPECTIVE LABEL CONTENT\n\
                     The user is testing the following label text before finalizing it. \
                     Evaluate it as if it were printed on the label.\n\
                     ---\n",
                );
                out.push_str(text);
                out.push_str("\n---\n");
            }
            NewInput::LabelImage { revision: false } => {
                out.push_str("# LABEL IMAGE\nThe attached image is the product label to review.\n");
            }
            NewInput::LabelImage { revision: true } => {
                out.push_str(
                    "# REVISED LABEL IMAGE\n\
                     The attached image is a revised version of the previously analyzed label.\n",
                );
            }
            NewInput::PdfPageImage => {
                out.push_str(
                    "# PROSPECTIVE LABEL CONTENT\n\
                     The attached image is the first page of a label PDF the user is testing. \
                     The PDF had no readable text layer.\n",
                );
            }
        }
        out
    }
}

fn clip(text: &str) -> String {
    match truncate_chars(text, MAX_TURN_CHARS) {
        (kept, true) => format!("{kept}…"),
        (kept, false) => kept.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{chat_iteration, report_iteration};
    use labelcheck_db::sessions::models::IterationType;

    fn regulatory(generation: u64) -> RegulatoryContext {
        RegulatoryContext {
            text: Arc::from("# REGULATORY REFERENCE DOCUMENTS\n\n## FALCPA\n\nMajor allergens.\n"),
            document_count: 1,
            omitted_count: 0,
            generation,
        }
    }

    fn session() -> Session {
        Session::new(Uuid::new_v4())
    }

    #[test]
    fn first_analysis_has_no_baseline_section() {
        let assembler = ContextAssembler::new(5);
        let s = session();
        let prompt = assembler.assemble(&s, &[], &regulatory(1), NewInput::LabelImage { revision: false });

        assert!(prompt.cached_prefix.starts_with("# REGULATORY REFERENCE DOCUMENTS"));
        assert!(prompt.cached_prefix.contains("# ROLE"));
        assert!(!prompt.cached_prefix.contains("PREVIOUS ANALYSIS"));
        assert_eq!(prompt.baseline_iteration_id, None);
        assert!(prompt.dynamic_suffix.contains("product label to review"));
    }

    #[test]
    fn prefix_carries_latest_analysis_and_suffix_recent_chats() {
        let assembler = ContextAssembler::new(2);
        let s = session();
        let analysis = report_iteration(s.id, 1, IterationType::ImageAnalysis);
        let iterations = vec![
            analysis.clone(),
            chat_iteration(s.id, 2),
            chat_iteration(s.id, 3),
            chat_iteration(s.id, 4),
        ];

        let prompt = assembler.assemble(
            &s,
            &iterations,
            &regulatory(1),
            NewInput::ChatMessage("Is the font size OK?"),
        );

        assert!(prompt.cached_prefix.contains("PREVIOUS ANALYSIS"));
        assert_eq!(prompt.baseline_iteration_id, Some(analysis.id));
        assert!(!prompt.dynamic_suffix.contains("question 2"));
        assert!(prompt.dynamic_suffix.contains("User: question 3"));
        assert!(prompt.dynamic_suffix.contains("Assistant: answer 4"));
        assert!(prompt.dynamic_suffix.ends_with("# USER QUESTION\nIs the font size OK?\n"));
    }

    #[test]
    fn prefix_is_reused_until_baseline_changes() {
        let assembler = ContextAssembler::new(5);
        let s = session();
        let analysis = report_iteration(s.id, 1, IterationType::ImageAnalysis);
        let mut iterations = vec![analysis];

        let a = assembler.assemble(&s, &iterations, &regulatory(1), NewInput::ChatMessage("one"));
        iterations.push(chat_iteration(s.id, 2));
        let b = assembler.assemble(&s, &iterations, &regulatory(1), NewInput::ChatMessage("two"));
        assert!(Arc::ptr_eq(&a.cached_prefix, &b.cached_prefix));
        assert_ne!(a.dynamic_suffix, b.dynamic_suffix);

        iterations.push(report_iteration(s.id, 3, IterationType::RevisedAnalysis));
        let c = assembler.assemble(&s, &iterations, &regulatory(1), NewInput::ChatMessage("three"));
        assert_ne!(a.prefix_key, c.prefix_key);

        let d = assembler.assemble(&s, &iterations, &regulatory(2), NewInput::ChatMessage("three"));
        assert_ne!(c.prefix_key, d.prefix_key);
    }

    #[test]
    fn prospective_text_is_framed_in_suffix_only() {
        let assembler = ContextAssembler::new(5);
        let s = session();
        let prompt = assembler.assemble(
            &s,
            &[],
            &regulatory(1),
            NewInput::ProspectiveText("Contains milk, no allergen statement"),
        );
        assert!(!prompt.cached_prefix.contains("Contains milk"));
        assert!(prompt.dynamic_suffix.contains("PROSPECTIVE LABEL CONTENT"));
        assert!(prompt.dynamic_suffix.contains("---\nContains milk, no allergen statement\n---"));
    }

    #[test]
    fn long_chat_turns_are_clipped() {
        let long = "z".repeat(MAX_TURN_CHARS + 10);
        let clipped = clip(&long);
        assert_eq!(clipped.chars().count(), MAX_TURN_CHARS + 1);
        assert!(clipped.ends_with('…'));
    }
}
