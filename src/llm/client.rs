use std::collections::VecDeque;
use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};

use crate::config::CompletionConfig;
use crate::errors::AppError;

/// Stream of answer tokens as the model produces them
pub type TokenStream = Pin<Box<dyn Stream<Item = Result<String, AppError>> + Send>>;

/// One chat completion call
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub system: Option<String>,
    pub user: String,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
    /// Constrain the model to emit a single JSON object
    pub json_mode: bool,
}

#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// Whole-answer completion
    async fn complete(&self, request: CompletionRequest) -> Result<String, AppError>;

    /// Token-by-token completion
    async fn complete_stream(&self, request: CompletionRequest) -> Result<TokenStream, AppError>;
}

#[derive(Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
    stream: bool,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessageBody,
}

#[derive(Deserialize)]
struct ChatMessageBody {
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
}

#[derive(Deserialize)]
struct StreamFrame {
    choices: Vec<StreamChoice>,
}

/// Parsed form of one server-sent line from the completions stream
#[derive(Debug, PartialEq)]
enum StreamLine {
    Token(String),
    Done,
    Skip,
}

/// Parse one line of the SSE body: `data: {json}` frames carry token
/// deltas, `data: [DONE]` terminates, everything else is ignored.
fn parse_stream_line(line: &str) -> StreamLine {
    let data = match line.trim().strip_prefix("data: ") {
        Some(d) => d,
        None => return StreamLine::Skip,
    };
    if data == "[DONE]" {
        return StreamLine::Done;
    }
    match serde_json::from_str::<StreamFrame>(data) {
        Ok(frame) => frame
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.delta.content)
            .filter(|c| !c.is_empty())
            .map(StreamLine::Token)
            .unwrap_or(StreamLine::Skip),
        Err(_) => StreamLine::Skip,
    }
}

/// Chat completions client for the Groq OpenAI-compatible API
pub struct GroqCompletion {
    client: reqwest::Client,
    config: CompletionConfig,
}

impl GroqCompletion {
    pub fn new(config: CompletionConfig) -> Result<Self, AppError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| {
                AppError::CompletionError(format!("Failed to create HTTP client: {}", e))
            })?;

        Ok(Self { client, config })
    }

    fn build_body(&self, request: &CompletionRequest, stream: bool) -> ChatRequest {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = &request.system {
            messages.push(ChatMessage {
                role: "system",
                content: system.clone(),
            });
        }
        messages.push(ChatMessage {
            role: "user",
            content: request.user.clone(),
        });

        ChatRequest {
            model: self.config.model.clone(),
            messages,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            response_format: request.json_mode.then_some(ResponseFormat {
                kind: "json_object",
            }),
            stream,
        }
    }

    async fn send(&self, body: &ChatRequest) -> Result<reqwest::Response, AppError> {
        let response = self
            .client
            .post(&self.config.api_url)
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .json(body)
            .send()
            .await
            .map_err(|e| AppError::CompletionError(format!("Request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let detail = response.text().await.unwrap_or_default();
            return Err(AppError::CompletionError(format!(
                "API error {}: {}",
                status, detail
            )));
        }

        Ok(response)
    }
}

#[async_trait]
impl CompletionClient for GroqCompletion {
    async fn complete(&self, request: CompletionRequest) -> Result<String, AppError> {
        let body = self.build_body(&request, false);
        let response = self.send(&body).await?;

        let chat: ChatResponse = response
            .json()
            .await
            .map_err(|e| AppError::CompletionError(format!("Parse error: {}", e)))?;

        chat.choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| AppError::CompletionError("Empty response".to_string()))
    }

    async fn complete_stream(&self, request: CompletionRequest) -> Result<TokenStream, AppError> {
        let body = self.build_body(&request, true);
        let response = self.send(&body).await?;

        // Lines are reassembled from raw bytes so multi-byte characters
        // split across network chunks survive intact
        let stream = futures::stream::unfold(
            (
                response.bytes_stream(),
                Vec::<u8>::new(),
                VecDeque::<String>::new(),
                false,
            ),
            |(mut inner, mut buf, mut queue, mut done)| async move {
                loop {
                    if let Some(token) = queue.pop_front() {
                        return Some((Ok(token), (inner, buf, queue, done)));
                    }
                    if done {
                        return None;
                    }

                    match inner.next().await {
                        Some(Ok(bytes)) => {
                            buf.extend_from_slice(&bytes);
                            while let Some(pos) = buf.iter().position(|&b| b == b'\n') {
                                let line_bytes: Vec<u8> = buf.drain(..=pos).collect();
                                let line = String::from_utf8_lossy(&line_bytes);
                                match parse_stream_line(&line) {
                                    StreamLine::Token(token) => queue.push_back(token),
                                    StreamLine::Done => {
                                        done = true;
                                        break;
                                    }
                                    StreamLine::Skip => {}
                                }
                            }
                        }
                        Some(Err(e)) => {
                            done = true;
                            let err = AppError::CompletionError(format!("Stream error: {}", e));
                            return Some((Err(err), (inner, buf, queue, done)));
                        }
                        None => done = true,
                    }
                }
            },
        );

        Ok(Box::pin(stream))
    }
}
