//! Database layer for RegForge-rs
//!
//! Provides:
//! - `ContextStore`, the read/log surface the ask pipeline depends on
//! - `Repository`, its SeaORM implementation over Postgres + pgvector
//! - Health checks

pub mod models;

use std::time::Duration;

use async_trait::async_trait;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, DbBackend, DbErr,
    EntityTrait, FromQueryResult, QueryFilter, QueryOrder, QuerySelect, Set, Statement,
};

use crate::config::DatabaseConfig;
use crate::errors::AppError;
use models::{document, document_table, query_log, rbi_update, Document, DocumentTable, RbiUpdate};

/// One retrieved chunk with its similarity to the query.
/// Similarity is a relative ranking signal, not a calibrated probability.
#[derive(Debug, Clone, FromQueryResult)]
pub struct CandidatePassage {
    pub document_id: i64,
    pub page_number: i32,
    pub chunk_index: i32,
    pub content: String,
    pub similarity: f64,
}

/// New query log entry; id and timestamp are assigned on insert
#[derive(Debug, Clone)]
pub struct QueryLogEntry {
    pub query: String,
    pub response_type: String,
    pub page_number: Option<i32>,
}

/// Read/log surface the ask pipeline depends on.
///
/// Ingestion, scraping and upload handling live outside this service;
/// their output is only ever read through this trait.
#[async_trait]
pub trait ContextStore: Send + Sync {
    /// Vector search over document chunks, best matches first
    async fn search_passages(
        &self,
        embedding: &[f32],
        threshold: f64,
        count: i32,
    ) -> Result<Vec<CandidatePassage>, AppError>;

    /// Batch metadata fetch for the given document ids
    async fn get_documents(&self, ids: &[i64]) -> Result<Vec<Document>, AppError>;

    /// Structured tables extracted from one page of one document
    async fn get_page_tables(
        &self,
        document_id: i64,
        page_number: i32,
    ) -> Result<Vec<DocumentTable>, AppError>;

    /// Most recent scraped updates, newest first
    async fn latest_updates(&self, limit: u64) -> Result<Vec<RbiUpdate>, AppError>;

    /// Record a terminal pipeline outcome
    async fn log_query(&self, entry: QueryLogEntry) -> Result<(), AppError>;
}

#[derive(Clone)]
pub struct Repository {
    db: DatabaseConnection,
}

impl Repository {
    pub async fn new(config: &DatabaseConfig) -> Result<Self, DbErr> {
        let mut opt = sea_orm::ConnectOptions::new(&config.url);
        opt.max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .connect_timeout(Duration::from_secs(config.connect_timeout))
            .acquire_timeout(Duration::from_secs(config.connect_timeout))
            .idle_timeout(Duration::from_secs(600))
            .sqlx_logging(cfg!(debug_assertions)); // Only log SQL in debug mode

        let db = sea_orm::Database::connect(opt).await?;

        tracing::info!(
            max_connections = config.max_connections,
            min_connections = config.min_connections,
            "Database connection pool initialized"
        );

        Ok(Self { db })
    }

    /// Ping the database to verify connectivity
    /// Used by health checks
    pub async fn ping(&self) -> Result<(), DbErr> {
        let stmt = Statement::from_string(DbBackend::Postgres, "SELECT 1".to_string());
        self.db.execute(stmt).await?;
        Ok(())
    }
}

#[async_trait]
impl ContextStore for Repository {
    async fn search_passages(
        &self,
        embedding: &[f32],
        threshold: f64,
        count: i32,
    ) -> Result<Vec<CandidatePassage>, AppError> {
        // Convert Vec<f32> to pgvector string format "[1.0,2.0,...]"
        let embedding_str = format!(
            "[{}]",
            embedding
                .iter()
                .map(|f| f.to_string())
                .collect::<Vec<_>>()
                .join(",")
        );

        // match_documents is the corpus-side SQL function ranking chunks by
        // cosine similarity and cutting off below the threshold
        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            r#"
            SELECT document_id, page_number, chunk_index, content, similarity
            FROM match_documents($1::vector, $2, $3)
            "#,
            vec![embedding_str.into(), threshold.into(), count.into()],
        );

        let hits = CandidatePassage::find_by_statement(stmt).all(&self.db).await?;
        Ok(hits)
    }

    async fn get_documents(&self, ids: &[i64]) -> Result<Vec<Document>, AppError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let docs = document::Entity::find()
            .filter(document::Column::Id.is_in(ids.iter().copied()))
            .all(&self.db)
            .await?;
        Ok(docs)
    }

    async fn get_page_tables(
        &self,
        document_id: i64,
        page_number: i32,
    ) -> Result<Vec<DocumentTable>, AppError> {
        let tables = document_table::Entity::find()
            .filter(document_table::Column::DocumentId.eq(document_id))
            .filter(document_table::Column::PageNumber.eq(page_number))
            .order_by_asc(document_table::Column::TableIndex)
            .all(&self.db)
            .await?;
        Ok(tables)
    }

    async fn latest_updates(&self, limit: u64) -> Result<Vec<RbiUpdate>, AppError> {
        let updates = rbi_update::Entity::find()
            .order_by_desc(rbi_update::Column::PublishDate)
            .limit(limit)
            .all(&self.db)
            .await?;
        Ok(updates)
    }

    async fn log_query(&self, entry: QueryLogEntry) -> Result<(), AppError> {
        let log = query_log::ActiveModel {
            query: Set(entry.query),
            response_type: Set(entry.response_type),
            page_number: Set(entry.page_number),
            timestamp: Set(chrono::Utc::now().into()),
            ..Default::default()
        };
        log.insert(&self.db).await?;
        Ok(())
    }
}
