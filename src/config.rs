// Configuration Module
// Bounded configuration for chunking, indexing and retrieval.
//
// The core does not load configuration from the environment itself (that's
// the excluded config-loading collaborator's job), but it mirrors the
// teacher's Default/from_env shape so a caller has an obvious place to hand
// values to.

use serde::{Deserialize, Serialize};

use crate::error::{DircError, DircResult};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChunkingConfig {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub min_chunk_size: usize,
    pub separators: Vec<String>,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 200,
            min_chunk_size: 100,
            separators: vec![
                "\nARTICULO ".to_string(),
                "\nDECRETO ".to_string(),
                "\nRESOLUCION ".to_string(),
                "\n---\n".to_string(),
                "\n\n\n".to_string(),
                "\n\n".to_string(),
                "\n".to_string(),
                ". ".to_string(),
                " ".to_string(),
            ],
        }
    }
}

impl ChunkingConfig {
    /// Validate bounds described in spec.md's chunker configuration.
    pub fn validate(&self) -> DircResult<()> {
        if self.chunk_size == 0 {
            return Err(DircError::InputError("chunk_size must be > 0".to_string()));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(DircError::InputError(format!(
                "chunk_overlap ({}) must be < chunk_size ({})",
                self.chunk_overlap, self.chunk_size
            )));
        }
        if self.min_chunk_size == 0 {
            return Err(DircError::InputError(
                "min_chunk_size must be > 0".to_string(),
            ));
        }
        if self.separators.is_empty() {
            return Err(DircError::InputError(
                "separators must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    pub fn env_overrides(self) -> Self {
        let chunk_size = std::env::var("DIRC_CHUNK_SIZE")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(self.chunk_size);
        let chunk_overlap = std::env::var("DIRC_CHUNK_OVERLAP")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(self.chunk_overlap);
        Self {
            chunk_size,
            chunk_overlap,
            ..self
        }
    }
}

/// Options accepted by `PipelineService::process_document` (spec.md §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineOptions {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub skip_cleaning: bool,
    pub skip_enrichment: bool,
    pub use_triple_indexing: bool,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 200,
            skip_cleaning: false,
            skip_enrichment: false,
            use_triple_indexing: true,
        }
    }
}

impl PipelineOptions {
    pub fn chunking_config(&self) -> ChunkingConfig {
        ChunkingConfig {
            chunk_size: self.chunk_size,
            chunk_overlap: self.chunk_overlap,
            ..ChunkingConfig::default()
        }
    }
}

/// Per-call deadlines, spec.md §5.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TimeoutConfig {
    pub embedding_ms: u64,
    pub vector_store_ms: u64,
    pub bm25_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            embedding_ms: 30_000,
            vector_store_ms: 30_000,
            bm25_ms: 10_000,
        }
    }
}

impl TimeoutConfig {
    pub fn embedding(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.embedding_ms)
    }
    pub fn vector_store(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.vector_store_ms)
    }
    pub fn bm25(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.bm25_ms)
    }
    /// Hybrid search inherits the longer of its two legs.
    pub fn hybrid(&self) -> std::time::Duration {
        self.vector_store().max(self.bm25())
    }
}

/// Reciprocal Rank Fusion + re-ranking knobs for C10.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    pub rrf_k: u32,
    pub rerank_top_n: usize,
    pub highlight_window: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            rrf_k: 60,
            rerank_top_n: 20,
            highlight_window: 150,
        }
    }
}
