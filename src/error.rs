/**
 * Error types for the Document Ingestion and Retrieval Core
 * Provides a single taxonomy shared by the pipeline, orchestrator and retriever
 */

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DircError {
    // Caller input
    #[error("invalid input: {0}")]
    InputError(String),

    // Pipeline, terminal stages
    #[error("extraction failed: {0}")]
    ExtractionError(String),

    #[error("chunking failed: {0}")]
    ChunkingError(String),

    // Collaborator failures
    #[error("embedding provider failed: {0}")]
    EmbeddingError(String),

    #[error("vector store error: {0}")]
    VectorStoreError(String),

    #[error("keyword store error: {0}")]
    KeywordStoreError(String),

    #[error("relational store error: {0}")]
    RelationalStoreError(String),

    // Verification / repair
    #[error("consistency error for document {document_id}: {message}")]
    ConsistencyError { document_id: String, message: String },

    // Cancellation and timeouts
    #[error("operation cancelled")]
    CancelledError,

    #[error("operation timed out after {0:?}")]
    TimeoutError(std::time::Duration),

    // Transport-level plumbing, converted into the taxonomy above at call sites
    #[error("sql error: {0}")]
    Sql(#[from] sqlx::Error),

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl DircError {
    /// True for errors that should trigger an orchestrator rollback.
    pub fn triggers_rollback(&self) -> bool {
        matches!(
            self,
            DircError::EmbeddingError(_)
                | DircError::VectorStoreError(_)
                | DircError::RelationalStoreError(_)
                | DircError::CancelledError
                | DircError::TimeoutError(_)
                | DircError::Sql(_)
        )
    }
}

pub type DircResult<T> = Result<T, DircError>;
