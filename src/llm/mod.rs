//! Completion layer
//!
//! Answer generation and intent analysis both go through the
//! `CompletionClient` trait; the production implementation speaks the
//! OpenAI-compatible chat completions protocol served by Groq.

pub mod client;

pub use client::{CompletionClient, CompletionRequest, GroqCompletion, TokenStream};
