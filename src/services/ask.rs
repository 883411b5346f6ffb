//! Answer generation pipeline
//!
//! Provides:
//! - Resolution of each question to a terminal state: update digest,
//!   scope refusals, label/parse refusals, or generation
//! - Bounded verification and deterministic repair of table answers
//! - A transport-agnostic event stream consumed by both endpoints

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;

use futures::{Stream, StreamExt};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::db::models::{Document, DocumentTable};
use crate::db::{CandidatePassage, ContextStore, QueryLogEntry};
use crate::errors::AppError;
use crate::llm::{CompletionClient, CompletionRequest};
use crate::metrics::{
    record_ask, record_embedding, record_generation, record_retrieval, record_slab_matches,
};
use crate::services::page_lock::{self, Citation};
use crate::services::slab::{self, MatchedRow, PageTable, ParsedTable, TableData};
use crate::services::{intent, AppState};

/// Verification attempts per question
const MAX_GENERATION_ATTEMPTS: usize = 2;

/// Buffered events between the generation task and the transport
const EVENT_CHANNEL_CAPACITY: usize = 32;

const OFF_SCOPE_TEXT: &str =
    "I can only assist with official RBI regulatory queries. Please provide a relevant query.";
const NO_CONTEXT_TEXT: &str = "Answer not found in provided RBI circulars.";
const PARSE_FAILED_TEXT: &str = "# [Parsing Error]\n\nStructured table parsing failed on this page.";
const NO_UPDATES_TEXT: &str = "No new RBI updates found in the system.";
const UPDATES_ERROR_TEXT: &str = "Error retrieving latest updates. Please try again later.";

/// Visible marker streamed between a failed attempt and its retry
const RECOVERY_MARKER: &str = "\n\n---\n*🔄 Automating data recovery...*\n\n";

/// Canned answer for the non-streaming endpoint when generation fails
pub const GENERATION_FAILED_TEXT: &str = "Generation failed. Please try again.";

const SYSTEM_PROMPT: &str = "\
You are an RBI Regulatory Specialist. Answer ONLY from the provided context.

[STRICT FORMATTING]
1. ## [Topic Name]
2. **Cohesive Summary**: 1-2 sentences.
3. **Structured Details**: List rules accurately. Include column headers.
4. **⚖️ Legal Context**: Quote relevant acts.
";

fn label_not_found_text(page: i32) -> String {
    format!(
        "# [Label Not Found]\n\nRequested internal table label not found on Page {page}. \
         I am restricted to providing information only from the detected page."
    )
}

/// One fragment of an answer in flight
#[derive(Debug, Clone, PartialEq)]
pub enum AskEvent {
    /// Source citations, emitted once before any text
    Citations(Vec<Citation>),
    /// A chunk of answer text
    Text(String),
    /// Generation failed mid-stream; no more text follows
    Error(String),
}

pub type AskEventStream = Pin<Box<dyn Stream<Item = AskEvent> + Send>>;

/// Folded form of the event stream, for the non-streaming endpoint
#[derive(Debug, Serialize)]
pub struct AskAnswer {
    pub answer: String,
    pub citations: Vec<Citation>,
}

/// What the slab matcher decided for the locked page
struct SlabOutcome {
    table_block: Option<String>,
    matched_rows: Vec<MatchedRow>,
    label_missing: bool,
    parse_failed: bool,
}

/// Terminal states of one ask request. Only `Generate` goes on to call
/// the completion service for an answer; every other state is settled
/// before generation starts.
enum AskState {
    UpdateDigest(String),
    OffScope,
    NoContext,
    LabelNotFound { citations: Vec<Citation>, page: i32 },
    ParseFailed { citations: Vec<Citation>, page: i32 },
    Generate(GenerationJob),
}

/// Runs the full ask pipeline for one question and returns its event
/// stream. Fails fast when no completion client was configured.
pub async fn run_ask(state: AppState, question: String) -> Result<AskEventStream, AppError> {
    let completion = state
        .completion
        .clone()
        .ok_or(AppError::CompletionUnavailable)?;
    let started = Instant::now();

    let resolved = resolve_state(&state, completion, &question).await;
    Ok(spawn_state(resolved, state.store.clone(), question, started))
}

/// Resolves a question to its terminal state. Collaborator failures on
/// the way degrade toward the refusal states instead of erroring.
async fn resolve_state(
    state: &AppState,
    completion: Arc<dyn CompletionClient>,
    question: &str,
) -> AskState {
    // The update digest short-circuits retrieval and generation entirely
    if intent::is_update_query(question) {
        return AskState::UpdateDigest(update_digest(state.store.as_ref()).await);
    }

    // Remote intent and the query embedding are independent calls
    let (remote_intent, embedding) = tokio::join!(
        intent::analyze(completion.as_ref(), question),
        async {
            let embed_started = Instant::now();
            let result = state.embedder.embed_query(question).await;
            record_embedding(embed_started.elapsed().as_secs_f64());
            result
        },
    );

    let hits = match embedding {
        Ok(vector) => match state
            .store
            .search_passages(
                &vector,
                state.retrieval.match_threshold,
                state.retrieval.match_count,
            )
            .await
        {
            Ok(hits) => {
                record_retrieval(hits.len());
                hits
            }
            Err(err) => {
                tracing::warn!(error = %err, "Vector search failed");
                Vec::new()
            }
        },
        Err(err) => {
            tracing::warn!(error = %err, "Query embedding failed");
            Vec::new()
        }
    };

    if hits.is_empty() {
        return if intent::is_rbi_query(question) {
            AskState::NoContext
        } else {
            AskState::OffScope
        };
    }

    // Page lock: one document, one page
    let best_page = page_lock::detect_best_page(&hits, remote_intent.requested_page).unwrap_or(1);
    let locked = match page_lock::lock_context(&hits, best_page) {
        Some(locked) => locked,
        // Cannot happen once hits is non-empty
        None => return AskState::NoContext,
    };

    let mut doc_ids: Vec<i64> = locked.passages.iter().map(|p| p.document_id).collect();
    doc_ids.sort_unstable();
    doc_ids.dedup();
    let meta_by_id: HashMap<i64, Document> = match state.store.get_documents(&doc_ids).await {
        Ok(docs) => docs.into_iter().map(|d| (d.id, d)).collect(),
        Err(err) => {
            tracing::warn!(error = %err, "Document metadata fetch failed");
            HashMap::new()
        }
    };

    let page_tables = match state
        .store
        .get_page_tables(locked.document_id, best_page)
        .await
    {
        Ok(tables) => decode_tables(tables),
        Err(err) => {
            tracing::warn!(error = %err, "Table fetch failed");
            Vec::new()
        }
    };
    let slab_outcome = match_page_slabs(question, &page_tables, &locked.passages, best_page);
    record_slab_matches(slab_outcome.matched_rows.len());

    let citations = page_lock::build_citations(&locked.passages, &meta_by_id);
    if slab_outcome.parse_failed {
        return AskState::ParseFailed {
            citations,
            page: best_page,
        };
    }
    if slab_outcome.label_missing {
        return AskState::LabelNotFound {
            citations,
            page: best_page,
        };
    }

    let full_text = joined_passages(&locked.passages, "\n\n");
    let best_paragraph = page_lock::extract_best_paragraph(&full_text, question);
    let context_text = page_lock::build_context(
        meta_by_id.get(&locked.document_id),
        best_page,
        slab_outcome.table_block.as_deref(),
        &best_paragraph,
    );

    AskState::Generate(GenerationJob {
        completion,
        context_text,
        citations,
        table_mode: slab_outcome.table_block.is_some(),
        matched_rows: slab_outcome.matched_rows,
        page: best_page,
    })
}

/// Spawns the state's event producer and hands back the consuming
/// stream. Refusals and generated answers travel the same channel, so
/// the transports cannot tell them apart.
fn spawn_state(
    state: AskState,
    store: Arc<dyn ContextStore>,
    question: String,
    started: Instant,
) -> AskEventStream {
    let (tx, rx) = mpsc::channel::<AskEvent>(EVENT_CHANNEL_CAPACITY);
    tokio::spawn(emit_state(state, store, question, started, tx));

    Box::pin(futures::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|event| (event, rx))
    }))
}

/// Emits one terminal state: query log and metrics first, then the
/// citations and text (citations lead even for refusals). `Generate`
/// hands off to the attempt loop.
async fn emit_state(
    state: AskState,
    store: Arc<dyn ContextStore>,
    question: String,
    started: Instant,
    tx: mpsc::Sender<AskEvent>,
) {
    match state {
        AskState::UpdateDigest(digest) => {
            write_query_log(store.as_ref(), log_entry(&question, "update", None)).await;
            record_ask(started.elapsed().as_secs_f64(), "update");
            emit_terminal(&tx, Vec::new(), digest).await;
        }
        AskState::OffScope => {
            write_query_log(store.as_ref(), log_entry(&question, "off-scope", None)).await;
            record_ask(started.elapsed().as_secs_f64(), "off_scope");
            emit_terminal(&tx, Vec::new(), OFF_SCOPE_TEXT.to_string()).await;
        }
        AskState::NoContext => {
            write_query_log(store.as_ref(), log_entry(&question, "no-context", None)).await;
            record_ask(started.elapsed().as_secs_f64(), "no_context");
            emit_terminal(&tx, Vec::new(), NO_CONTEXT_TEXT.to_string()).await;
        }
        AskState::ParseFailed { citations, page } => {
            write_query_log(store.as_ref(), log_entry(&question, "parse-failed", Some(page))).await;
            record_ask(started.elapsed().as_secs_f64(), "parse_failed");
            emit_terminal(&tx, citations, PARSE_FAILED_TEXT.to_string()).await;
        }
        AskState::LabelNotFound { citations, page } => {
            write_query_log(
                store.as_ref(),
                log_entry(&question, "label-not-found", Some(page)),
            )
            .await;
            record_ask(started.elapsed().as_secs_f64(), "label_not_found");
            emit_terminal(&tx, citations, label_not_found_text(page)).await;
        }
        AskState::Generate(job) => {
            run_generation(job, store.as_ref(), &question, started, tx).await;
        }
    }
}

/// Citations first, then the single text fragment
async fn emit_terminal(tx: &mpsc::Sender<AskEvent>, citations: Vec<Citation>, text: String) {
    if tx.send(AskEvent::Citations(citations)).await.is_err() {
        return;
    }
    let _ = tx.send(AskEvent::Text(text)).await;
}

/// Folds the event stream into a single response. A generation error
/// collapses to the fixed failure answer.
pub async fn collect_answer(mut events: AskEventStream) -> AskAnswer {
    let mut answer = String::new();
    let mut citations = Vec::new();

    while let Some(event) = events.next().await {
        match event {
            AskEvent::Citations(list) => citations = list,
            AskEvent::Text(text) => answer.push_str(&text),
            AskEvent::Error(message) => {
                tracing::error!(error = %message, "Generation failed");
                return AskAnswer {
                    answer: GENERATION_FAILED_TEXT.to_string(),
                    citations: Vec::new(),
                };
            }
        }
    }

    AskAnswer { answer, citations }
}

/// Everything the attempt loop needs, settled at resolve time
struct GenerationJob {
    completion: Arc<dyn CompletionClient>,
    context_text: String,
    citations: Vec<Citation>,
    table_mode: bool,
    matched_rows: Vec<MatchedRow>,
    page: i32,
}

/// Generation loop: stream tokens, verify table answers against the
/// matched rows, retry once, then repair deterministically.
async fn run_generation(
    job: GenerationJob,
    store: &dyn ContextStore,
    question: &str,
    started: Instant,
    tx: mpsc::Sender<AskEvent>,
) {
    let GenerationJob {
        completion,
        context_text,
        citations,
        table_mode,
        matched_rows,
        page,
    } = job;

    if tx.send(AskEvent::Citations(citations)).await.is_err() {
        return;
    }

    let must_verify = table_mode && !matched_rows.is_empty();
    let mut answer = String::new();

    for attempt in 1..=MAX_GENERATION_ATTEMPTS {
        let request = CompletionRequest {
            system: Some(SYSTEM_PROMPT.to_string()),
            user: format!("Context:\n{}\n\nQuestion:\n{}", context_text, question),
            temperature: 0.0,
            max_tokens: Some(1024),
            json_mode: false,
        };

        let generation_started = Instant::now();
        let mut stream = match completion.complete_stream(request).await {
            Ok(stream) => stream,
            Err(err) => {
                tracing::error!(error = %err, attempt, "Completion request failed");
                let _ = tx.send(AskEvent::Error(err.to_string())).await;
                record_ask(started.elapsed().as_secs_f64(), "error");
                return;
            }
        };

        answer.clear();
        while let Some(token) = stream.next().await {
            match token {
                Ok(text) => {
                    answer.push_str(&text);
                    if tx.send(AskEvent::Text(text)).await.is_err() {
                        // Receiver gone; stop generating
                        return;
                    }
                }
                Err(err) => {
                    tracing::error!(error = %err, attempt, "Token stream failed");
                    let _ = tx.send(AskEvent::Error(err.to_string())).await;
                    record_ask(started.elapsed().as_secs_f64(), "error");
                    return;
                }
            }
        }

        let verified = !must_verify || slab::verify_column_integrity(&matched_rows, &answer);
        record_generation(generation_started.elapsed().as_secs_f64(), verified);
        if verified {
            break;
        }

        tracing::warn!(attempt, page, "Answer dropped structured values");
        if attempt < MAX_GENERATION_ATTEMPTS {
            if tx
                .send(AskEvent::Text(RECOVERY_MARKER.to_string()))
                .await
                .is_err()
            {
                return;
            }
        } else {
            // Deterministic repair: only the appended block is streamed,
            // earlier text is already with the client
            let repaired = slab::append_missing_columns(&matched_rows, &answer);
            let delta = repaired[answer.len()..].to_string();
            if !delta.is_empty() {
                let _ = tx.send(AskEvent::Text(delta)).await;
            }
        }
    }

    write_query_log(store, log_entry(question, "success", Some(page))).await;
    record_ask(started.elapsed().as_secs_f64(), "success");
}

/// The canned digest of the most recent scraped updates
async fn update_digest(store: &dyn ContextStore) -> String {
    let updates = match store.latest_updates(5).await {
        Ok(updates) => updates,
        Err(err) => {
            tracing::warn!(error = %err, "Update retrieval failed");
            return UPDATES_ERROR_TEXT.to_string();
        }
    };
    if updates.is_empty() {
        return NO_UPDATES_TEXT.to_string();
    }

    let mut digest = String::from("# [Latest RBI Updates]\n\n");
    for update in &updates {
        digest.push_str(&format!("### {}\n", update.title));
        digest.push_str(&format!("- **Publish Date:** {}\n", update.publish_date));
        digest.push_str(&format!("- **Summary:** {}\n", update.summary));
        digest.push_str(&format!("- **Link:** [View Details]({})\n\n", update.url));
    }
    digest
}

/// Matches the page's structured tables against the question and
/// renders the prompt block. Falls back to text-recovered tables when
/// the stored headers are placeholders.
fn match_page_slabs(
    question: &str,
    page_tables: &[PageTable],
    passages: &[CandidatePassage],
    page: i32,
) -> SlabOutcome {
    let mut outcome = SlabOutcome {
        table_block: None,
        matched_rows: Vec::new(),
        label_missing: false,
        parse_failed: false,
    };
    if page_tables.is_empty() {
        return outcome;
    }

    let numbers = slab::extract_query_numbers(question);
    let labels = slab::extract_query_labels(question);
    outcome.matched_rows = slab::find_matching_rows(page_tables, &numbers, &labels);

    if !labels.is_empty() && outcome.matched_rows.is_empty() {
        outcome.label_missing = true;
        tracing::warn!(?labels, page, "Requested labels not found on the locked page");
        return outcome;
    }

    if !outcome.matched_rows.is_empty() {
        if slab::has_valid_headers(&outcome.matched_rows) {
            outcome.table_block = Some(block_from_matches(&outcome.matched_rows));
            tracing::info!(rows = outcome.matched_rows.len(), "Structured rows matched");
        } else {
            // Stored headers are placeholders; try to recover a table
            // from the raw passage text before refusing
            let joined = joined_passages(passages, "\n");
            match slab::parse_inline_table(&joined).or_else(|| slab::parse_raw_text_table(&joined))
            {
                Some(parsed) => {
                    outcome.table_block = Some(block_from_parsed(&parsed));
                    tracing::info!("Fallback parser recovered table data");
                }
                None => {
                    outcome.parse_failed = true;
                    tracing::debug!(page, "Header mapping failed for matched tables");
                }
            }
        }
    } else {
        // No structured match; the raw text may still carry a table
        let joined = joined_passages(passages, "\n");
        if let Some(parsed) =
            slab::parse_inline_table(&joined).or_else(|| slab::parse_raw_text_table(&joined))
        {
            outcome.table_block = Some(block_from_parsed(&parsed));
        }
    }
    outcome
}

fn block_from_matches(rows: &[MatchedRow]) -> String {
    let mut block = String::from("\n### [EXACT TABLE MATCHES FOUND]\n");
    for matched in rows {
        block.push_str(&format!("- Table Columns: {:?}\n", matched.headers));
        block.push_str(&format!(
            "- Row Content: {}\n",
            Value::Object(matched.row.clone())
        ));
    }
    block
}

fn block_from_parsed(table: &ParsedTable) -> String {
    let mut block = String::from("\n### [EXACT TABLE MATCHES FOUND]\n");
    for row in &table.rows {
        block.push_str(&format!("- Table Columns: {:?}\n", table.headers));
        block.push_str(&format!("- Row Content: {}\n", Value::Object(row.clone())));
    }
    block
}

/// Structured tables for the page, decoded from their JSONB payloads.
/// Undecodable payloads are skipped.
fn decode_tables(tables: Vec<DocumentTable>) -> Vec<PageTable> {
    tables
        .into_iter()
        .filter_map(|table| {
            let table_index = table.table_index;
            match serde_json::from_value::<TableData>(table.table_data) {
                Ok(data) => Some(PageTable { table_index, data }),
                Err(err) => {
                    tracing::warn!(
                        table_index,
                        error = %err,
                        "Skipping undecodable table payload"
                    );
                    None
                }
            }
        })
        .collect()
}

fn joined_passages(passages: &[CandidatePassage], separator: &str) -> String {
    passages
        .iter()
        .map(|p| p.content.as_str())
        .collect::<Vec<_>>()
        .join(separator)
}

fn log_entry(question: &str, response_type: &str, page: Option<i32>) -> QueryLogEntry {
    QueryLogEntry {
        query: question.to_string(),
        response_type: response_type.to_string(),
        page_number: page,
    }
}

async fn write_query_log(store: &dyn ContextStore, entry: QueryLogEntry) {
    if let Err(err) = store.log_query(entry).await {
        tracing::warn!(error = %err, "Query logging failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetrievalConfig;
    use crate::db::models::RbiUpdate;
    use crate::embeddings::MockEmbedder;
    use crate::llm::TokenStream;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeStore {
        passages: Vec<CandidatePassage>,
        documents: Vec<Document>,
        tables: Vec<DocumentTable>,
        updates: Vec<RbiUpdate>,
        fail_updates: bool,
        logged: Mutex<Vec<(String, String, Option<i32>)>>,
    }

    #[async_trait]
    impl ContextStore for FakeStore {
        async fn search_passages(
            &self,
            _embedding: &[f32],
            _threshold: f64,
            _count: i32,
        ) -> Result<Vec<CandidatePassage>, AppError> {
            Ok(self.passages.clone())
        }

        async fn get_documents(&self, ids: &[i64]) -> Result<Vec<Document>, AppError> {
            Ok(self
                .documents
                .iter()
                .filter(|d| ids.contains(&d.id))
                .cloned()
                .collect())
        }

        async fn get_page_tables(
            &self,
            document_id: i64,
            page_number: i32,
        ) -> Result<Vec<DocumentTable>, AppError> {
            Ok(self
                .tables
                .iter()
                .filter(|t| t.document_id == document_id && t.page_number == page_number)
                .cloned()
                .collect())
        }

        async fn latest_updates(&self, _limit: u64) -> Result<Vec<RbiUpdate>, AppError> {
            if self.fail_updates {
                return Err(AppError::DatabaseQueryError(sea_orm::DbErr::Custom(
                    "updates table unavailable".to_string(),
                )));
            }
            Ok(self.updates.clone())
        }

        async fn log_query(&self, entry: QueryLogEntry) -> Result<(), AppError> {
            self.logged.lock().unwrap().push((
                entry.query,
                entry.response_type,
                entry.page_number,
            ));
            Ok(())
        }
    }

    struct ScriptedCompletion {
        intent_reply: String,
        answers: Mutex<VecDeque<Vec<&'static str>>>,
        stream_calls: AtomicUsize,
    }

    impl ScriptedCompletion {
        fn new(answers: Vec<Vec<&'static str>>) -> Self {
            Self {
                intent_reply: r#"{"category": "Banking", "requested_page": null}"#.to_string(),
                answers: Mutex::new(answers.into()),
                stream_calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl CompletionClient for ScriptedCompletion {
        async fn complete(&self, _request: CompletionRequest) -> Result<String, AppError> {
            Ok(self.intent_reply.clone())
        }

        async fn complete_stream(
            &self,
            _request: CompletionRequest,
        ) -> Result<TokenStream, AppError> {
            self.stream_calls.fetch_add(1, Ordering::SeqCst);
            let tokens = self.answers.lock().unwrap().pop_front().unwrap_or_default();
            let items: Vec<Result<String, AppError>> =
                tokens.into_iter().map(|t| Ok(t.to_string())).collect();
            Ok(Box::pin(futures::stream::iter(items)))
        }
    }

    fn passage(document_id: i64, page: i32, similarity: f64, content: &str) -> CandidatePassage {
        CandidatePassage {
            document_id,
            page_number: page,
            chunk_index: 0,
            content: content.to_string(),
            similarity,
        }
    }

    fn document(id: i64, title: &str) -> Document {
        Document {
            id,
            title: title.to_string(),
            filename: format!("{title}.pdf"),
            file_path: format!("https://files.example/{id}.pdf"),
            category: "Housing".to_string(),
            upload_date: chrono::DateTime::parse_from_rfc3339("2026-05-10T08:30:00+00:00")
                .unwrap(),
            total_pages: Some(12),
        }
    }

    fn table(document_id: i64, page: i32, payload: Value) -> DocumentTable {
        DocumentTable {
            id: 1,
            document_id,
            page_number: page,
            table_index: 0,
            table_data: payload,
        }
    }

    fn update(title: &str, summary: &str) -> RbiUpdate {
        RbiUpdate {
            id: 1,
            title: title.to_string(),
            url: "https://rbi.example/press".to_string(),
            pdf_url: None,
            publish_date: chrono::NaiveDate::from_ymd_opt(2026, 8, 1).unwrap(),
            summary: summary.to_string(),
            document_id: None,
        }
    }

    fn test_state(store: Arc<FakeStore>, completion: Arc<ScriptedCompletion>) -> AppState {
        AppState {
            store,
            embedder: Arc::new(MockEmbedder::new(8)),
            completion: Some(completion),
            retrieval: RetrievalConfig {
                match_threshold: 0.20,
                match_count: 8,
            },
        }
    }

    async fn collect_events(mut stream: AskEventStream) -> Vec<AskEvent> {
        let mut events = Vec::new();
        while let Some(event) = stream.next().await {
            events.push(event);
        }
        events
    }

    fn joined_text(events: &[AskEvent]) -> String {
        events
            .iter()
            .filter_map(|event| match event {
                AskEvent::Text(text) => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn missing_completion_client_fails_fast() {
        let state = AppState {
            store: Arc::new(FakeStore::default()),
            embedder: Arc::new(MockEmbedder::new(8)),
            completion: None,
            retrieval: RetrievalConfig {
                match_threshold: 0.20,
                match_count: 8,
            },
        };
        let result = run_ask(state, "any question".to_string()).await;
        assert!(matches!(result, Err(AppError::CompletionUnavailable)));
    }

    #[tokio::test]
    async fn update_questions_get_the_digest_without_generation() {
        let store = Arc::new(FakeStore {
            updates: vec![
                update("Repo Rate Revision", "Rate changed to 6.25%"),
                update("New KYC Norms", "Periodic update rules relaxed"),
            ],
            ..FakeStore::default()
        });
        let completion = Arc::new(ScriptedCompletion::new(vec![]));
        let state = test_state(store, completion.clone());

        let events = collect_events(
            run_ask(state, "Any new RBI update today?".to_string())
                .await
                .unwrap(),
        )
        .await;

        assert_eq!(events[0], AskEvent::Citations(Vec::new()));
        let text = joined_text(&events);
        assert!(text.starts_with("# [Latest RBI Updates]"));
        assert!(text.contains("### Repo Rate Revision"));
        assert!(text.contains("- **Publish Date:** 2026-08-01"));
        assert!(text.contains("[View Details](https://rbi.example/press)"));
        // Neither intent analysis nor generation ran
        assert_eq!(completion.stream_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn empty_update_store_has_a_fixed_message() {
        let state = test_state(
            Arc::new(FakeStore::default()),
            Arc::new(ScriptedCompletion::new(vec![])),
        );
        let events = collect_events(
            run_ask(state, "show me the latest notification".to_string())
                .await
                .unwrap(),
        )
        .await;
        assert_eq!(joined_text(&events), NO_UPDATES_TEXT);
    }

    #[tokio::test]
    async fn update_store_errors_degrade_to_the_error_message() {
        let store = Arc::new(FakeStore {
            fail_updates: true,
            ..FakeStore::default()
        });
        let state = test_state(store, Arc::new(ScriptedCompletion::new(vec![])));
        let events = collect_events(
            run_ask(state, "latest rbi update please".to_string())
                .await
                .unwrap(),
        )
        .await;
        assert_eq!(joined_text(&events), UPDATES_ERROR_TEXT);
    }

    #[tokio::test]
    async fn no_hits_splits_into_off_scope_and_no_context() {
        let state = test_state(
            Arc::new(FakeStore::default()),
            Arc::new(ScriptedCompletion::new(vec![])),
        );
        let events = collect_events(
            run_ask(state, "How do I cook pasta?".to_string())
                .await
                .unwrap(),
        )
        .await;
        assert_eq!(events[0], AskEvent::Citations(Vec::new()));
        assert_eq!(joined_text(&events), OFF_SCOPE_TEXT);

        let state = test_state(
            Arc::new(FakeStore::default()),
            Arc::new(ScriptedCompletion::new(vec![])),
        );
        let events = collect_events(
            run_ask(state, "What is the NBFC exposure rule?".to_string())
                .await
                .unwrap(),
        )
        .await;
        assert_eq!(events[0], AskEvent::Citations(Vec::new()));
        assert_eq!(joined_text(&events), NO_CONTEXT_TEXT);
    }

    #[tokio::test]
    async fn free_text_answers_stream_after_citations() {
        let store = Arc::new(FakeStore {
            passages: vec![
                passage(1, 4, 0.9, "Prudential norms applicable to housing finance."),
                passage(1, 7, 0.5, "Unrelated page content."),
            ],
            documents: vec![document(1, "Master Circular")],
            ..FakeStore::default()
        });
        let completion = Arc::new(ScriptedCompletion::new(vec![vec![
            "Housing finance ",
            "norms apply.",
        ]]));
        let state = test_state(store.clone(), completion.clone());

        let events = collect_events(
            run_ask(state, "What are the housing finance norms?".to_string())
                .await
                .unwrap(),
        )
        .await;

        match &events[0] {
            AskEvent::Citations(citations) => {
                assert_eq!(citations.len(), 1);
                assert_eq!(citations[0].title, "Master Circular");
                assert_eq!(citations[0].page_number, 4);
            }
            other => panic!("expected citations first, got {other:?}"),
        }
        assert_eq!(joined_text(&events), "Housing finance norms apply.");
        assert_eq!(completion.stream_calls.load(Ordering::SeqCst), 1);

        let logged = store.logged.lock().unwrap();
        assert!(logged
            .iter()
            .any(|(_, kind, page)| kind == "success" && *page == Some(4)));
    }

    #[tokio::test]
    async fn verified_table_answers_need_one_attempt() {
        let store = Arc::new(FakeStore {
            passages: vec![passage(1, 4, 0.9, "Loan limit table page.")],
            documents: vec![document(1, "Housing Circular")],
            tables: vec![table(
                1,
                4,
                serde_json::json!({
                    "columns": ["Category", "Loan Limit"],
                    "rows": [{"Category": "Rural", "Loan Limit": "15"}]
                }),
            )],
            ..FakeStore::default()
        });
        let completion = Arc::new(ScriptedCompletion::new(vec![vec![
            "Rural category has a limit of 15 lakh.",
        ]]));
        let state = test_state(store, completion.clone());

        let events = collect_events(
            run_ask(state, "What is the loan limit for rural centres?".to_string())
                .await
                .unwrap(),
        )
        .await;

        assert_eq!(completion.stream_calls.load(Ordering::SeqCst), 1);
        let text = joined_text(&events);
        assert!(text.contains("15 lakh"));
        assert!(!text.contains("Automating data recovery"));
    }

    #[tokio::test]
    async fn failed_verification_retries_then_appends_missing_values() {
        let store = Arc::new(FakeStore {
            passages: vec![passage(1, 4, 0.9, "Loan limit table page.")],
            documents: vec![document(1, "Housing Circular")],
            tables: vec![table(
                1,
                4,
                serde_json::json!({
                    "columns": ["Category", "Loan Limit"],
                    "rows": [{"Category": "Rural", "Loan Limit": "15"}]
                }),
            )],
            ..FakeStore::default()
        });
        // First attempt omits everything, second still omits the amount
        let completion = Arc::new(ScriptedCompletion::new(vec![
            vec!["The limit applies."],
            vec!["Rural limits are defined here."],
        ]));
        let state = test_state(store.clone(), completion.clone());

        let events = collect_events(
            run_ask(state, "What is the loan limit for rural centres?".to_string())
                .await
                .unwrap(),
        )
        .await;

        assert_eq!(completion.stream_calls.load(Ordering::SeqCst), 2);
        let text = joined_text(&events);
        assert!(text.contains("Automating data recovery"));
        assert!(text.contains("**🛡️ Data Recovery: Missing Column Values**"));
        assert!(text.contains("- **Missing Info**: 15"));
        // The second attempt carried "Rural", so only the amount is appended
        assert!(!text.contains("- **Missing Info**: Rural"));

        let logged = store.logged.lock().unwrap();
        assert!(logged.iter().any(|(_, kind, _)| kind == "success"));
    }

    #[tokio::test]
    async fn unmatched_labels_refuse_without_generation() {
        let store = Arc::new(FakeStore {
            passages: vec![passage(1, 4, 0.9, "Table without audit rows.")],
            documents: vec![document(1, "Housing Circular")],
            tables: vec![table(
                1,
                4,
                serde_json::json!({
                    "columns": ["Category", "Loan Limit"],
                    "rows": [{"Category": "Rural", "Loan Limit": "15"}]
                }),
            )],
            ..FakeStore::default()
        });
        let completion = Arc::new(ScriptedCompletion::new(vec![]));
        let state = test_state(store.clone(), completion.clone());

        let events = collect_events(
            run_ask(
                state,
                "Is audit mandatory for urban cooperative banks?".to_string(),
            )
            .await
            .unwrap(),
        )
        .await;

        // Citations still precede the refusal
        assert!(matches!(&events[0], AskEvent::Citations(c) if !c.is_empty()));
        let text = joined_text(&events);
        assert!(text.starts_with("# [Label Not Found]"));
        assert!(text.contains("not found on Page 4"));
        assert_eq!(completion.stream_calls.load(Ordering::SeqCst), 0);

        let logged = store.logged.lock().unwrap();
        assert!(logged
            .iter()
            .any(|(_, kind, page)| kind == "label-not-found" && *page == Some(4)));
    }

    #[test]
    fn slab_phase_recovers_tables_with_placeholder_headers() {
        let tables = vec![PageTable {
            table_index: 0,
            data: serde_json::from_value(serde_json::json!({
                "columns": ["col", "col_2"],
                "rows": [{"col": "Centres with population below ten lakh", "col_2": "28"}]
            }))
            .unwrap(),
        }];
        let passages = vec![passage(
            1,
            4,
            0.9,
            "Centres with population below ten lakh qualify for limits 28 35 respectively.",
        )];

        let outcome = match_page_slabs(
            "What is the loan limit by population category?",
            &tables,
            &passages,
            4,
        );

        assert!(!outcome.parse_failed);
        let block = outcome.table_block.unwrap();
        assert!(block.contains("[EXACT TABLE MATCHES FOUND]"));
        assert!(block.contains("Population Category"));
    }

    #[test]
    fn slab_phase_flags_unparseable_placeholder_tables() {
        let tables = vec![PageTable {
            table_index: 0,
            data: serde_json::from_value(serde_json::json!({
                "columns": ["col", "col_2"],
                "rows": [{"col": "population thresholds", "col_2": "28"}]
            }))
            .unwrap(),
        }];
        let passages = vec![passage(1, 4, 0.9, "Nothing resembling a table here.")];

        let outcome = match_page_slabs(
            "What is the loan limit by population category?",
            &tables,
            &passages,
            4,
        );

        assert!(outcome.parse_failed);
        assert!(outcome.table_block.is_none());
    }

    #[tokio::test]
    async fn collapsed_answers_fold_text_and_citations() {
        let ok: AskEventStream = Box::pin(futures::stream::iter([
            AskEvent::Citations(Vec::new()),
            AskEvent::Text("part one, ".to_string()),
            AskEvent::Text("part two".to_string()),
        ]));
        let folded = collect_answer(ok).await;
        assert_eq!(folded.answer, "part one, part two");

        let failed: AskEventStream = Box::pin(futures::stream::iter([
            AskEvent::Citations(Vec::new()),
            AskEvent::Text("partial".to_string()),
            AskEvent::Error("connection reset".to_string()),
        ]));
        let folded = collect_answer(failed).await;
        assert_eq!(folded.answer, GENERATION_FAILED_TEXT);
        assert!(folded.citations.is_empty());
    }
}
