use crate::config::RetrievalConfig;
use crate::db::ContextStore;
use crate::embeddings::Embedder;
use crate::llm::CompletionClient;
use std::sync::Arc;

pub mod ask;
pub mod intent;
pub mod page_lock;
pub mod slab;

// A container for all collaborators to be injected into routes
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn ContextStore>,
    pub embedder: Arc<dyn Embedder>,
    /// Absent when no completion credentials were configured; every ask
    /// request then fails fast with 503
    pub completion: Option<Arc<dyn CompletionClient>>,
    pub retrieval: RetrievalConfig,
}

impl AppState {
    pub fn new(
        store: Arc<dyn ContextStore>,
        embedder: Arc<dyn Embedder>,
        completion: Option<Arc<dyn CompletionClient>>,
        retrieval: RetrievalConfig,
    ) -> Self {
        Self {
            store,
            embedder,
            completion,
            retrieval,
        }
    }
}
