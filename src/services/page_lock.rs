//! Page locking and context assembly
//!
//! Provides:
//! - Best-page detection from retrieval hits
//! - The page lock itself (one document, one page)
//! - Best-paragraph extraction for free-text context
//! - Prompt context and citation assembly

use std::collections::{HashMap, HashSet};

use serde::Serialize;

use crate::db::models::Document;
use crate::db::CandidatePassage;

/// Passages surviving the lock. When the lock holds they all carry the
/// same (document, page) pair.
#[derive(Debug, Clone)]
pub struct LockedContext {
    pub document_id: i64,
    pub page: i32,
    pub passages: Vec<CandidatePassage>,
    /// Set when no passage carried the locked pair and the top raw
    /// candidates stood in instead
    pub used_fallback: bool,
}

/// One citation per unique (document, page), in retrieval-relevance order
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Citation {
    pub title: String,
    pub filename: String,
    pub category: String,
    pub page_number: i32,
    pub upload_date: String,
    pub extract: String,
}

/// The page the answer will be restricted to: an explicitly requested
/// page wins outright, otherwise the page of the strongest hit.
pub fn detect_best_page(hits: &[CandidatePassage], requested_page: Option<i32>) -> Option<i32> {
    if let Some(page) = requested_page {
        return Some(page);
    }

    let mut best: Option<&CandidatePassage> = None;
    for hit in hits {
        let better = match best {
            // Strict comparison keeps the earliest hit on ties, and
            // hits arrive ranked best-first
            Some(current) => hit.similarity > current.similarity,
            None => true,
        };
        if better {
            best = Some(hit);
        }
    }
    best.map(|hit| hit.page_number)
}

/// Locks retrieval output to a single (document, page) pair.
///
/// The document is pinned to the top hit's document. When no passage
/// carries the locked pair, the top three raw candidates stand in so
/// the request can still be answered; that escape hatch breaks the
/// single-page guarantee and is logged.
pub fn lock_context(hits: &[CandidatePassage], page: i32) -> Option<LockedContext> {
    let first = hits.first()?;
    let document_id = first.document_id;

    let passages: Vec<CandidatePassage> = hits
        .iter()
        .filter(|h| h.page_number == page && h.document_id == document_id)
        .cloned()
        .collect();

    if passages.is_empty() {
        tracing::warn!(
            document_id,
            page,
            "No passage carries the locked page; using top candidates"
        );
        return Some(LockedContext {
            document_id,
            page,
            passages: hits.iter().take(3).cloned().collect(),
            used_fallback: true,
        });
    }

    Some(LockedContext {
        document_id,
        page,
        passages,
        used_fallback: false,
    })
}

/// Picks the paragraph of the page text closest to the question by
/// word overlap. Paragraphs are blank-line separated; fragments of 50
/// characters or less are skipped. Falls back to the first 2000
/// characters when no paragraph qualifies.
pub fn extract_best_paragraph(full_text: &str, question: &str) -> String {
    let paragraphs: Vec<&str> = full_text
        .split("\n\n")
        .map(str::trim)
        .filter(|p| p.chars().count() > 50)
        .collect();
    if paragraphs.is_empty() {
        return full_text.chars().take(2000).collect();
    }

    let query_words: HashSet<String> = question
        .to_lowercase()
        .split_whitespace()
        .map(str::to_string)
        .collect();

    let mut best = paragraphs[0];
    let mut max_score = 0usize;
    for paragraph in &paragraphs {
        let words: HashSet<String> = paragraph
            .to_lowercase()
            .split_whitespace()
            .map(str::to_string)
            .collect();
        let score = query_words.intersection(&words).count();
        if score > max_score {
            max_score = score;
            best = paragraph;
        }
    }
    best.to_string()
}

fn metadata_header(meta: Option<&Document>, page: i32) -> String {
    let title = meta.map(|m| m.title.as_str()).unwrap_or("Unknown");
    format!("DOC: {} | Page: {}", title, page)
}

/// Assembles the prompt context. A structured table block puts the
/// prompt into strict table mode; otherwise the best free-text
/// paragraph is used.
pub fn build_context(
    meta: Option<&Document>,
    page: i32,
    table_block: Option<&str>,
    best_paragraph: &str,
) -> String {
    let header = metadata_header(meta, page);
    match table_block {
        Some(block) => format!("{}\n\n[STRICT TABLE MODE ACTIVE]\n\n{}\n---", header, block),
        None => format!("{}\nContent: {}\n---", header, best_paragraph),
    }
}

/// Builds the citation list from the locked passages. The dedupe key is
/// (document, page); the first passage seen for a pair supplies the
/// extract. Unknown metadata degrades to placeholder fields rather than
/// dropping the citation.
pub fn build_citations(
    passages: &[CandidatePassage],
    meta_by_id: &HashMap<i64, Document>,
) -> Vec<Citation> {
    let mut seen: HashSet<(i64, i32)> = HashSet::new();
    let mut citations = Vec::new();

    for passage in passages {
        if !seen.insert((passage.document_id, passage.page_number)) {
            continue;
        }
        let meta = meta_by_id.get(&passage.document_id);
        citations.push(Citation {
            title: meta
                .map(|m| m.title.clone())
                .unwrap_or_else(|| "Unknown".to_string()),
            filename: meta
                .map(|m| m.filename.clone())
                .unwrap_or_else(|| "Unknown".to_string()),
            category: meta
                .map(|m| m.category.clone())
                .unwrap_or_else(|| "General".to_string()),
            page_number: passage.page_number,
            upload_date: meta
                .map(|m| m.upload_date.date_naive().to_string())
                .unwrap_or_default(),
            extract: passage.content.clone(),
        });
    }
    citations
}
