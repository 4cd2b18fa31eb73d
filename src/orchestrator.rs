/**
 * Indexing Orchestrator (C8)
 * Coordinates triple indexing across the relational store (C4, which
 * transparently drives the FTS5 shadow table C5) and the vector store (C6).
 * C6 cannot join the C4 transaction, so failures are compensated by deleting
 * whatever was written to C6 and rolling back the C4 transaction.
 */

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::cancellation::CancellationToken;
use crate::chunk_store::{ChunkRow, ChunkStore, NewChunk};
use crate::chunker::ChunkResult;
use crate::config::TimeoutConfig;
use crate::embedding::EmbeddingProvider;
use crate::enricher::{self, ChunkMetadata, EnrichContext};
use crate::error::{DircError, DircResult};
use crate::fulltext::FullTextIndex;
use crate::vector_store::{VectorMetadata, VectorStore};

/// Result of `index_document` (spec.md §4.7).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndexingResult {
    pub success: bool,
    pub chunks_indexed: usize,
    pub error: Option<String>,
    pub rollback_applied: bool,
}

/// Result of `verify` (spec.md §4.7, P-1).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VerifyResult {
    pub document_id: String,
    pub consistent: bool,
    pub sql_chunks: i64,
    pub fts_chunks: i64,
    pub vector_chunks: i64,
    pub message: String,
}

/// Result of `repair`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RepairResult {
    pub success: bool,
    pub chunks_repaired: usize,
    pub verification: VerifyResult,
}

fn vector_id(document_id: &str, chunk_index: i64) -> String {
    format!("{}_chunk_{}", document_id, chunk_index)
}

/// Coordinates C4/C5/C6 writes. Serializes `index_document` calls per
/// `document_id` with a named lock so concurrent calls on the same document
/// cannot interleave `chunk_index` assignment, while distinct documents index
/// in parallel (spec.md §4.7's concurrency note).
pub struct IndexingOrchestrator {
    chunk_store: ChunkStore,
    fulltext: FullTextIndex,
    vector_store: Arc<dyn VectorStore>,
    embedding_provider: Arc<dyn EmbeddingProvider>,
    document_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    timeouts: TimeoutConfig,
}

impl IndexingOrchestrator {
    pub fn new(
        chunk_store: ChunkStore,
        fulltext: FullTextIndex,
        vector_store: Arc<dyn VectorStore>,
        embedding_provider: Arc<dyn EmbeddingProvider>,
    ) -> Self {
        Self::with_timeouts(
            chunk_store,
            fulltext,
            vector_store,
            embedding_provider,
            TimeoutConfig::default(),
        )
    }

    pub fn with_timeouts(
        chunk_store: ChunkStore,
        fulltext: FullTextIndex,
        vector_store: Arc<dyn VectorStore>,
        embedding_provider: Arc<dyn EmbeddingProvider>,
        timeouts: TimeoutConfig,
    ) -> Self {
        Self {
            chunk_store,
            fulltext,
            vector_store,
            embedding_provider,
            document_locks: Mutex::new(HashMap::new()),
            timeouts,
        }
    }

    async fn lock_for(&self, document_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.document_locks.lock().await;
        locks
            .entry(document_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Index a single chunk in all three locations. On any failure, rolls
    /// back the C4 insert and deletes the C6 write if one happened.
    async fn index_chunk_locked(
        &self,
        document_id: &str,
        chunk_result: &ChunkResult,
        ctx: &EnrichContext,
    ) -> Result<ChunkRow, String> {
        let metadata = enricher::enrich(&chunk_result.text, chunk_result.chunk_index, document_id, ctx);

        let mut tx = self
            .chunk_store
            .begin()
            .await
            .map_err(|e| e.to_string())?;

        let new_chunk = NewChunk {
            document_id,
            chunk_index: chunk_result.chunk_index as i64,
            chunk_hash: &metadata.chunk_hash,
            text: &chunk_result.text,
            num_chars: chunk_result.num_chars as i64,
            start_char: chunk_result.start_char as i64,
            end_char: chunk_result.end_char as i64,
            metadata: &metadata,
        };

        let chunk_id = match self.chunk_store.insert_tx(&mut tx, &new_chunk).await {
            Ok(id) => id,
            Err(e) => {
                let _ = tx.rollback().await;
                return Err(e.to_string());
            }
        };
        debug!(chunk_id, document_id, "inserted chunk row, not yet committed");

        let embedding = match tokio::time::timeout(
            self.timeouts.embedding(),
            self.embedding_provider.embed(&chunk_result.text),
        )
        .await
        {
            Ok(Ok(v)) => v,
            Ok(Err(e)) => {
                let _ = tx.rollback().await;
                return Err(e.to_string());
            }
            Err(_) => {
                let _ = tx.rollback().await;
                return Err(DircError::TimeoutError(self.timeouts.embedding()).to_string());
            }
        };

        let vid = vector_id(document_id, chunk_result.chunk_index as i64);
        let vector_metadata = VectorMetadata {
            document_id: document_id.to_string(),
            chunk_index: chunk_result.chunk_index as i64,
            chunk_id,
            section_type: metadata.section_type.as_str().to_string(),
            language: metadata.language.clone(),
            topic: metadata.topic.clone(),
        };

        match tokio::time::timeout(
            self.timeouts.vector_store(),
            self.vector_store.add(&vid, &embedding, vector_metadata),
        )
        .await
        {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                let _ = tx.rollback().await;
                return Err(e.to_string());
            }
            Err(_) => {
                let _ = tx.rollback().await;
                return Err(DircError::TimeoutError(self.timeouts.vector_store()).to_string());
            }
        }

        if let Err(e) = self
            .chunk_store
            .set_indexed_at_tx(
                &mut tx,
                chunk_id,
                self.embedding_provider.model_name(),
                embedding.len() as i64,
            )
            .await
        {
            let _ = self.vector_store.delete(&vid).await;
            let _ = tx.rollback().await;
            return Err(e.to_string());
        }

        if let Err(e) = tx.commit().await {
            let _ = self.vector_store.delete(&vid).await;
            return Err(e.to_string());
        }

        info!(document_id, chunk_index = chunk_result.chunk_index, "triple-indexed chunk");

        self.chunk_store
            .get_by_document_and_index(document_id, chunk_result.chunk_index as i64)
            .await
            .map_err(|e| e.to_string())?
            .ok_or_else(|| "chunk row vanished after commit".to_string())
    }

    /// Roll back every C4 row and every already-written C6 entry for a
    /// document. Shared by the failure and cancellation paths of `index_document`.
    async fn rollback_document(&self, document_id: &str, indexed_vector_ids: &[String]) {
        if let Err(del_err) = self.chunk_store.delete_by_document(document_id).await {
            error!(document_id, error = %del_err, "rollback of C4 rows failed");
        }
        for vid in indexed_vector_ids {
            if let Err(del_err) = self.vector_store.delete(vid).await {
                error!(document_id, vector_id = %vid, error = %del_err, "rollback of C6 entry failed");
            }
        }
    }

    /// Index every chunk of a document in `chunk_index` order. Any failure,
    /// or a trip of `cancellation`, rolls back every chunk already written
    /// for this call (P-2, P-10).
    pub async fn index_document(
        &self,
        document_id: &str,
        chunks: &[ChunkResult],
        ctx: &EnrichContext,
        cancellation: &CancellationToken,
    ) -> IndexingResult {
        let lock = self.lock_for(document_id).await;
        let _guard = lock.lock().await;

        let mut indexed_vector_ids = Vec::new();

        for (i, chunk) in chunks.iter().enumerate() {
            if let Err(e) = cancellation.check() {
                warn!(document_id, chunk = i, "index_document cancelled, rolling back");
                self.rollback_document(document_id, &indexed_vector_ids).await;
                return IndexingResult {
                    success: false,
                    chunks_indexed: 0,
                    error: Some(e.to_string()),
                    rollback_applied: true,
                };
            }

            match self.index_chunk_locked(document_id, chunk, ctx).await {
                Ok(_row) => {
                    indexed_vector_ids.push(vector_id(document_id, chunk.chunk_index as i64));
                }
                Err(e) => {
                    error!(document_id, chunk = i, error = %e, "chunk indexing failed, rolling back");
                    self.rollback_document(document_id, &indexed_vector_ids).await;
                    return IndexingResult {
                        success: false,
                        chunks_indexed: 0,
                        error: Some(format!("failed to index chunk {}: {}", i, e)),
                        rollback_applied: true,
                    };
                }
            }
        }

        IndexingResult {
            success: true,
            chunks_indexed: chunks.len(),
            error: None,
            rollback_applied: false,
        }
    }

    /// Compare cardinalities across C4, C5, C6 for one document (P-1, INV-3).
    pub async fn verify(&self, document_id: &str) -> DircResult<VerifyResult> {
        let sql_chunks = self.chunk_store.count_by_document(document_id).await?;
        let fts_chunks = self.fulltext.count_by_document(document_id).await?;
        let vector_chunks = self.vector_store.count_by_document(document_id).await? as i64;

        let indexes = self.chunk_store.chunk_indexes(document_id).await?;
        let dense = crate::chunk_store::is_dense(&indexes);

        let consistent = sql_chunks == fts_chunks && fts_chunks == vector_chunks && dense;

        Ok(VerifyResult {
            document_id: document_id.to_string(),
            consistent,
            sql_chunks,
            fts_chunks,
            vector_chunks,
            message: if consistent {
                "all indices in sync".to_string()
            } else {
                "indices out of sync".to_string()
            },
        })
    }

    /// Rebuild C6 for a document from C4 (source of truth). FTS5 resyncs
    /// automatically via triggers, so only vectors need rebuilding.
    pub async fn repair(&self, document_id: &str) -> DircResult<RepairResult> {
        let rows = self.chunk_store.get_by_document(document_id).await?;
        if rows.is_empty() {
            return Ok(RepairResult {
                success: false,
                chunks_repaired: 0,
                verification: VerifyResult {
                    document_id: document_id.to_string(),
                    consistent: false,
                    sql_chunks: 0,
                    fts_chunks: 0,
                    vector_chunks: 0,
                    message: "no chunks found in relational store".to_string(),
                },
            });
        }

        self.vector_store.delete_by_document(document_id).await?;

        let mut repaired = 0usize;
        for row in &rows {
            let embed_result =
                tokio::time::timeout(self.timeouts.embedding(), self.embedding_provider.embed(&row.text)).await;
            match embed_result {
                Ok(Ok(embedding)) => {
                    let vid = vector_id(document_id, row.chunk_index);
                    let metadata = VectorMetadata {
                        document_id: document_id.to_string(),
                        chunk_index: row.chunk_index,
                        chunk_id: row.chunk_id,
                        section_type: row.section_type.as_str().to_string(),
                        language: row.language.clone(),
                        topic: row.topic.clone(),
                    };
                    let add_result =
                        tokio::time::timeout(self.timeouts.vector_store(), self.vector_store.add(&vid, &embedding, metadata))
                            .await;
                    if matches!(add_result, Ok(Ok(()))) {
                        repaired += 1;
                    }
                }
                Ok(Err(e)) => warn!(document_id, chunk_id = row.chunk_id, error = %e, "failed to re-embed chunk during repair"),
                Err(_) => warn!(document_id, chunk_id = row.chunk_id, "re-embedding chunk during repair timed out"),
            }
        }

        let verification = self.verify(document_id).await?;
        Ok(RepairResult {
            success: verification.consistent,
            chunks_repaired: repaired,
            verification,
        })
    }
}
