use serde::Deserialize;
use config::{Config, ConfigError, Environment};

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub embeddings: EmbeddingsConfig,
    pub completion: CompletionConfig,
    pub retrieval: RetrievalConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub rust_log: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingsConfig {
    pub model_api_url: String, // OpenAI-compatible /embeddings endpoint
    pub model_api_key: String,
    pub model_name: String,
    pub embedding_dim: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CompletionConfig {
    pub api_url: String, // OpenAI-compatible /chat/completions endpoint
    pub api_key: String,
    pub model: String,
    pub timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    /// Minimum cosine similarity for a passage to count as a hit
    pub match_threshold: f64,
    /// Number of passages fetched per query
    pub match_count: i32,
}

impl AppConfig {
    pub fn build() -> Result<Self, ConfigError> {
        let builder = Config::builder()
            // Start with defaults
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 3000)?
            .set_default("server.rust_log", "info,regforge_rs=debug")?
            .set_default("database.max_connections", 10)?
            .set_default("database.min_connections", 2)?
            .set_default("database.connect_timeout", 30)?
            .set_default("embeddings.model_api_url", "http://localhost:8080/v1/embeddings")?
            .set_default("embeddings.model_name", "sentence-transformers/all-MiniLM-L6-v2")?
            .set_default("embeddings.embedding_dim", 384)?
            .set_default("completion.api_url", "https://api.groq.com/openai/v1/chat/completions")?
            .set_default("completion.api_key", "")?
            .set_default("completion.model", "llama-3.1-8b-instant")?
            .set_default("completion.timeout_secs", 60)?
            .set_default("retrieval.match_threshold", 0.20)?
            .set_default("retrieval.match_count", 8)?
            // Add in settings from environment variables (with a prefix of APP)
            // E.g. `APP_SERVER__PORT=8080` would set `ServerConfig.port`
            .add_source(
                Environment::default()
                    .prefix("APP")
                    .prefix_separator("_")
                    .separator("__"),
            );

        builder.build()?.try_deserialize()
    }
}
