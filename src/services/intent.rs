//! Query intent extraction
//!
//! Provides:
//! - Local phrase checks for update-digest and domain scoping
//! - One-shot remote intent analysis (category, requested page) over
//!   the completion client, degrading to an empty intent on failure

use serde::Deserialize;
use serde_json::Value;

use crate::llm::{CompletionClient, CompletionRequest};

/// Phrases that route a question to the update digest instead of the
/// retrieval pipeline
const UPDATE_PHRASES: &[&str] = &[
    "latest rbi update",
    "new rbi update",
    "recent circular",
    "today rbi update",
    "latest notification",
    "latest update",
    "new notification",
    "today update",
    "what is new",
];

/// Domain keywords separating regulatory questions from everything else
const RBI_KEYWORDS: &[&str] = &[
    "rbi",
    "bank",
    "nbfc",
    "circular",
    "notification",
    "master direction",
    "loan",
    "limit",
    "kyc",
    "aml",
    "fema",
    "fpi",
    "basel",
    "crr",
    "slr",
    "repo",
    "reverse repo",
    "payment",
    "settlement",
    "audit",
    "compliance",
];

/// Intent fields recovered by the remote analysis call. Everything is
/// optional; the empty intent is the soft-failure value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RemoteIntent {
    pub requested_page: Option<i32>,
}

#[derive(Deserialize)]
struct IntentWire {
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    requested_page: Option<Value>,
}

/// True when the question asks for the latest updates. Checked locally
/// before any collaborator call.
pub fn is_update_query(question: &str) -> bool {
    let lower = question.to_lowercase();
    UPDATE_PHRASES.iter().any(|phrase| lower.contains(phrase))
}

/// Lightweight scope check: does the question mention the regulatory
/// domain at all?
pub fn is_rbi_query(question: &str) -> bool {
    let lower = question.to_lowercase();
    RBI_KEYWORDS.iter().any(|kw| lower.contains(kw))
}

fn intent_prompt(question: &str) -> String {
    format!(
        "Analyze this regulatory query and extract metadata in JSON:\n\
         Query: \"{question}\"\n\
         \n\
         JSON Structure:\n\
         {{\n\
           \"category\": \"NBFC/Banking/Lending/Payments/Other\",\n\
           \"numeric_limits\": [\"list\", \"of\", \"numbers\"],\n\
           \"topics\": [\"list\", \"of\", \"topics\"],\n\
           \"entities\": [\"Trust\", \"NBFC\", \"Bank\", \"Cooperative\", \"Company\"],\n\
           \"logic_patterns\": [\"if\", \"provided\", \"subject to\", \"above\", \"below\", \"threshold\"],\n\
           \"requested_page\": \"number or null\"\n\
         }}\n\
         Return ONLY valid JSON.\n"
    )
}

/// A page reference only counts when it is a positive integer, whether
/// the model returned it as a number or a digit string.
fn coerce_page(value: Option<&Value>) -> Option<i32> {
    let page = match value? {
        Value::Number(n) => n.as_i64()?,
        Value::String(s) if !s.is_empty() && s.chars().all(|c| c.is_ascii_digit()) => {
            s.parse().ok()?
        }
        _ => return None,
    };
    if page <= 0 {
        return None;
    }
    i32::try_from(page).ok()
}

/// Extracts structured intent from the question with one JSON-mode
/// completion call. Any failure degrades to the empty intent; the
/// pipeline never stalls on this.
pub async fn analyze(completion: &dyn CompletionClient, question: &str) -> RemoteIntent {
    let request = CompletionRequest {
        system: None,
        user: intent_prompt(question),
        temperature: 0.1,
        max_tokens: None,
        json_mode: true,
    };

    let content = match completion.complete(request).await {
        Ok(content) => content,
        Err(err) => {
            tracing::warn!(error = %err, "Intent analysis failed");
            return RemoteIntent::default();
        }
    };

    match serde_json::from_str::<IntentWire>(&content) {
        Ok(wire) => {
            let requested_page = coerce_page(wire.requested_page.as_ref());
            tracing::debug!(
                category = wire.category.as_deref().unwrap_or("unknown"),
                ?requested_page,
                "Intent analysis complete"
            );
            RemoteIntent { requested_page }
        }
        Err(err) => {
            tracing::warn!(error = %err, "Intent analysis returned invalid JSON");
            RemoteIntent::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::AppError;
    use crate::llm::TokenStream;
    use async_trait::async_trait;

    struct ScriptedCompletion {
        reply: Result<String, ()>,
    }

    #[async_trait]
    impl CompletionClient for ScriptedCompletion {
        async fn complete(&self, _request: CompletionRequest) -> Result<String, AppError> {
            self.reply
                .clone()
                .map_err(|_| AppError::CompletionError("scripted failure".to_string()))
        }

        async fn complete_stream(
            &self,
            _request: CompletionRequest,
        ) -> Result<TokenStream, AppError> {
            Ok(Box::pin(futures::stream::empty()))
        }
    }

    #[test]
    fn update_phrases_are_detected_case_insensitively() {
        assert!(is_update_query("Show me the LATEST RBI UPDATE please"));
        assert!(is_update_query("any new notification this week?"));
        assert!(is_update_query("what is new in banking regulation"));
        assert!(!is_update_query("what is the loan limit for rural centres"));
    }

    #[test]
    fn domain_keywords_gate_the_scope_check() {
        assert!(is_rbi_query("What does the RBI circular say?"));
        assert!(is_rbi_query("reverse repo operations in 2024"));
        assert!(is_rbi_query("KYC requirements for trusts"));
        assert!(!is_rbi_query("How do I cook pasta?"));
    }

    #[test]
    fn page_coercion_accepts_only_positive_integers() {
        assert_eq!(coerce_page(Some(&serde_json::json!(4))), Some(4));
        assert_eq!(coerce_page(Some(&serde_json::json!("12"))), Some(12));
        assert_eq!(coerce_page(Some(&serde_json::json!(0))), None);
        assert_eq!(coerce_page(Some(&serde_json::json!("0"))), None);
        assert_eq!(coerce_page(Some(&serde_json::json!(-3))), None);
        assert_eq!(coerce_page(Some(&serde_json::json!(3.5))), None);
        assert_eq!(coerce_page(Some(&serde_json::json!("page four"))), None);
        assert_eq!(coerce_page(Some(&serde_json::json!(null))), None);
        assert_eq!(coerce_page(None), None);
    }

    #[tokio::test]
    async fn remote_intent_parses_the_requested_page() {
        let completion = ScriptedCompletion {
            reply: Ok(r#"{"category": "Banking", "requested_page": "7"}"#.to_string()),
        };
        let intent = analyze(&completion, "limits on page 7").await;
        assert_eq!(intent.requested_page, Some(7));
    }

    #[tokio::test]
    async fn remote_failures_degrade_to_the_empty_intent() {
        let failing = ScriptedCompletion { reply: Err(()) };
        assert_eq!(analyze(&failing, "anything").await, RemoteIntent::default());

        let garbled = ScriptedCompletion {
            reply: Ok("not json at all".to_string()),
        };
        assert_eq!(analyze(&garbled, "anything").await, RemoteIntent::default());
    }
}
