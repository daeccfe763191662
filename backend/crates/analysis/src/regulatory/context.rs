use std::sync::Arc;

use labelcheck_db::regulatory::models::RegulatoryDocument;

/// Rendered regulatory reference block plus what went into it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegulatoryContext {
    pub text: Arc<str>,
    pub document_count: usize,
    /// Active documents left out because the character budget ran out.
    pub omitted_count: usize,
    /// Bumped by the cache whenever `text` changes.
    pub generation: u64,
}

impl RegulatoryContext {
    pub fn empty(generation: u64) -> Self {
        Self {
            text: Arc::from(render(&[], 0)),
            document_count: 0,
            omitted_count: 0,
            generation,
        }
    }
}

const NO_DOCUMENTS_NOTE: &str = "No regulatory reference documents are loaded. Apply your knowledge \
of FDA (21 CFR Part 101, FALCPA, FASTER Act) and USDA FSIS labeling requirements and cite \
regulations by section.";

/// Active documents in render order: category, then title, then id.
/// Uncategorized documents sort last.
pub fn active_in_order(documents: &[RegulatoryDocument]) -> Vec<&RegulatoryDocument> {
    let mut active: Vec<&RegulatoryDocument> = documents.iter().filter(|d| d.is_active).collect();
    active.sort_by(|a, b| {
        let cat_a = (a.category.is_none(), a.category.as_deref().unwrap_or(""));
        let cat_b = (b.category.is_none(), b.category.as_deref().unwrap_or(""));
        cat_a
            .cmp(&cat_b)
            .then_with(|| a.title.cmp(&b.title))
            .then_with(|| a.id.cmp(&b.id))
    });
    active
}

fn render_document(doc: &RegulatoryDocument) -> String {
    let mut block = format!("## {}\n", doc.title);
    let mut tags = Vec::new();
    if let Some(category) = &doc.category {
        tags.push(format!("Category: {category}"));
    }
    if let Some(jurisdiction) = &doc.jurisdiction {
        tags.push(format!("Jurisdiction: {jurisdiction}"));
    }
    if let Some(url) = &doc.source_url {
        tags.push(format!("Source: {url}"));
    }
    if !tags.is_empty() {
        block.push_str(&tags.join(" | "));
        block.push('\n');
    }
    block.push('\n');
    block.push_str(doc.content.trim());
    block.push_str("\n\n");
    block
}

fn render(blocks: &[String], omitted: usize) -> String {
    let mut out = String::from("# REGULATORY REFERENCE DOCUMENTS\n\n");
    if blocks.is_empty() {
        out.push_str(NO_DOCUMENTS_NOTE);
        out.push('\n');
    }
    for block in blocks {
        out.push_str(block);
    }
    if omitted > 0 {
        out.push_str(&format!(
            "({omitted} additional reference document(s) omitted for length.)\n"
        ));
    }
    out
}

/// Render active documents into one block of at most roughly `max_chars`
/// characters. Output depends only on the document set, never on input order.
/// Documents are taken in order until one does not fit; that one and all
/// after it are counted as omitted.
pub fn build_context(documents: &[RegulatoryDocument], max_chars: usize) -> (String, usize, usize) {
    let ordered = active_in_order(documents);
    let mut blocks = Vec::with_capacity(ordered.len());
    let mut used = 0usize;
    for doc in &ordered {
        let block = render_document(doc);
        let len = block.chars().count();
        if used + len > max_chars {
            break;
        }
        used += len;
        blocks.push(block);
    }
    let included = blocks.len();
    let omitted = ordered.len() - included;
    (render(&blocks, omitted), included, omitted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn doc(title: &str, category: Option<&str>, active: bool) -> RegulatoryDocument {
        RegulatoryDocument {
            id: Uuid::new_v4(),
            title: title.to_string(),
            content: format!("Text of {title}."),
            category: category.map(str::to_string),
            jurisdiction: Some("US-FDA".to_string()),
            source_url: None,
            is_active: active,
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn order_is_category_then_title() {
        let docs = vec![
            doc("Zeta", Some("nutrition"), true),
            doc("Alpha", None, true),
            doc("Beta", Some("allergens"), true),
            doc("Alpha", Some("nutrition"), true),
        ];
        let titles: Vec<(Option<&str>, &str)> = active_in_order(&docs)
            .iter()
            .map(|d| (d.category.as_deref(), d.title.as_str()))
            .collect();
        assert_eq!(
            titles,
            vec![
                (Some("allergens"), "Beta"),
                (Some("nutrition"), "Alpha"),
                (Some("nutrition"), "Zeta"),
                (None, "Alpha"),
            ]
        );
    }

    #[test]
    fn inactive_documents_are_excluded() {
        let docs = vec![doc("Current", Some("a"), true), doc("Old", Some("a"), false)];
        let (text, included, omitted) = build_context(&docs, 10_000);
        assert!(text.contains("## Current"));
        assert!(!text.contains("## Old"));
        assert_eq!((included, omitted), (1, 0));
    }

    #[test]
    fn output_is_stable_under_input_reordering() {
        let docs = vec![
            doc("21 CFR 101.9", Some("nutrition"), true),
            doc("21 CFR 101.4", Some("ingredients"), true),
            doc("FALCPA", Some("allergens"), true),
        ];
        let mut reversed = docs.clone();
        reversed.reverse();
        assert_eq!(build_context(&docs, 10_000), build_context(&reversed, 10_000));
    }

    #[test]
    fn budget_omits_trailing_documents() {
        let docs = vec![doc("A", Some("a"), true), doc("B", Some("b"), true)];
        let first_len = render_document(&docs[0]).chars().count();

        let (text, included, omitted) = build_context(&docs, first_len);
        assert_eq!((included, omitted), (1, 1));
        assert!(text.contains("## A"));
        assert!(text.contains("1 additional reference document(s) omitted"));
    }

    #[test]
    fn empty_set_renders_fallback_note() {
        let (text, included, _) = build_context(&[], 1_000);
        assert_eq!(included, 0);
        assert!(text.contains("No regulatory reference documents are loaded"));
        assert_eq!(RegulatoryContext::empty(0).text.as_ref(), text);
    }
}
