//! Ask endpoints (JSON and SSE transports)
//!
//! Both transports run the same pipeline; the JSON endpoint folds the
//! event stream, the SSE endpoint forwards it fragment by fragment.

use std::convert::Infallible;

use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::Json;
use futures::StreamExt;
use serde::Deserialize;
use tracing::instrument;
use validator::Validate;

use crate::errors::AppError;
use crate::services::ask::{self, AskEvent};
use crate::services::AppState;

#[derive(Debug, Deserialize, Validate)]
pub struct AskRequest {
    #[validate(length(min = 1, max = 4000, message = "question must be 1 to 4000 characters"))]
    pub question: String,
}

#[instrument(skip(state, payload), fields(question_len = payload.question.len()))]
pub async fn ask_question(
    State(state): State<AppState>,
    Json(payload): Json<AskRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload
        .validate()
        .map_err(|e| AppError::ValidationError(e.to_string()))?;

    let events = ask::run_ask(state, payload.question).await?;
    Ok(Json(ask::collect_answer(events).await))
}

#[instrument(skip(state, payload), fields(question_len = payload.question.len()))]
pub async fn ask_question_stream(
    State(state): State<AppState>,
    Json(payload): Json<AskRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload
        .validate()
        .map_err(|e| AppError::ValidationError(e.to_string()))?;

    let events = ask::run_ask(state, payload.question).await?;
    let stream = events.map(|event| Ok::<Event, Infallible>(sse_event(event)));

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

/// Renders one pipeline event as an SSE data fragment. Citations come
/// as `{"citations": [...]}`, text as `{"text": ...}`, failures as
/// `{"error": ...}`.
fn sse_event(event: AskEvent) -> Event {
    let payload = match event {
        AskEvent::Citations(citations) => serde_json::json!({ "citations": citations }),
        AskEvent::Text(text) => serde_json::json!({ "text": text }),
        AskEvent::Error(message) => serde_json::json!({ "error": message }),
    };
    match Event::default().json_data(&payload) {
        Ok(event) => event,
        Err(err) => {
            tracing::error!(error = %err, "Failed to encode stream event");
            Event::default().data("{\"error\":\"event encoding failed\"}")
        }
    }
}
