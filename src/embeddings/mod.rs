//! Embedding layer
//!
//! Query embeddings are produced by an external model behind the
//! `Embedder` trait; document embeddings are written by the ingestion
//! pipeline outside this service.

pub mod client;

pub use client::{CloudEmbedder, Embedder, MockEmbedder};
