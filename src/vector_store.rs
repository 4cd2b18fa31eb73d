/**
 * Vector Store (C6)
 * Nearest-neighbor store for chunk embeddings. Cannot join the C4 SQL
 * transaction, so the orchestrator compensates with write-then-delete on
 * failure rather than true two-phase commit (spec.md §4.7).
 */

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::error::{DircError, DircResult};
use crate::validation::validate_embedding;

/// Filter-relevant enrichment copied alongside each vector, spec.md §6's
/// "Chunk persistence layout".
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct VectorMetadata {
    pub document_id: String,
    pub chunk_index: i64,
    pub chunk_id: i64,
    pub section_type: String,
    pub language: String,
    pub topic: Option<String>,
}

/// A vector plus its metadata, as stored.
#[derive(Debug, Clone)]
pub struct VectorRecord {
    pub id: String,
    pub embedding: Vec<f32>,
    pub metadata: VectorMetadata,
}

/// One nearest-neighbor hit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VectorHit {
    pub id: String,
    pub metadata: VectorMetadata,
    pub distance: f32,
    pub score: f32,
}

/// Equality filter over the metadata carried alongside each vector.
#[derive(Debug, Clone, Default)]
pub struct VectorFilter {
    pub document_id: Option<String>,
    pub section_type: Option<String>,
    pub language: Option<String>,
    pub topic: Option<String>,
}

impl VectorFilter {
    fn matches(&self, metadata: &VectorMetadata) -> bool {
        if let Some(v) = &self.document_id {
            if &metadata.document_id != v {
                return false;
            }
        }
        if let Some(v) = &self.section_type {
            if &metadata.section_type != v {
                return false;
            }
        }
        if let Some(v) = &self.language {
            if &metadata.language != v {
                return false;
            }
        }
        if let Some(v) = &self.topic {
            if metadata.topic.as_deref() != Some(v.as_str()) {
                return false;
            }
        }
        true
    }
}

/// External capability interface for a vector backend (spec.md's C6). Swappable
/// for a managed ANN service without touching the orchestrator or retriever.
#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn add(&self, id: &str, embedding: &[f32], metadata: VectorMetadata) -> DircResult<()>;
    async fn delete(&self, id: &str) -> DircResult<()>;
    async fn delete_by_document(&self, document_id: &str) -> DircResult<u64>;
    async fn count_by_document(&self, document_id: &str) -> DircResult<u64>;
    async fn query(
        &self,
        embedding: &[f32],
        top_k: usize,
        filter: &VectorFilter,
    ) -> DircResult<Vec<VectorHit>>;
}

/// Reference in-memory implementation. Brute-force cosine similarity over a
/// mutex-guarded vector, adequate for the corpus sizes this crate targets and
/// as the default wired up for tests.
#[derive(Clone, Default)]
pub struct InMemoryVectorStore {
    records: Arc<Mutex<HashMap<String, VectorRecord>>>,
    /// Dimension `D` of the first vector ever added; every later vector is
    /// validated against it so the store can never hold mismatched dimensions.
    dimension: Arc<Mutex<Option<usize>>>,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn add(&self, id: &str, embedding: &[f32], metadata: VectorMetadata) -> DircResult<()> {
        let mut dimension = self.dimension.lock().await;
        let expected = *dimension.get_or_insert(embedding.len());
        validate_embedding(embedding, expected)?;
        drop(dimension);

        let mut records = self.records.lock().await;
        records.insert(
            id.to_string(),
            VectorRecord {
                id: id.to_string(),
                embedding: embedding.to_vec(),
                metadata,
            },
        );
        Ok(())
    }

    async fn delete(&self, id: &str) -> DircResult<()> {
        self.records.lock().await.remove(id);
        Ok(())
    }

    async fn delete_by_document(&self, document_id: &str) -> DircResult<u64> {
        let mut records = self.records.lock().await;
        let before = records.len();
        records.retain(|_, r| r.metadata.document_id != document_id);
        Ok((before - records.len()) as u64)
    }

    async fn count_by_document(&self, document_id: &str) -> DircResult<u64> {
        let records = self.records.lock().await;
        Ok(records
            .values()
            .filter(|r| r.metadata.document_id == document_id)
            .count() as u64)
    }

    async fn query(
        &self,
        embedding: &[f32],
        top_k: usize,
        filter: &VectorFilter,
    ) -> DircResult<Vec<VectorHit>> {
        if top_k == 0 {
            return Err(DircError::InputError("top_k must be > 0".to_string()));
        }
        let records = self.records.lock().await;
        let mut hits: Vec<VectorHit> = records
            .values()
            .filter(|r| filter.matches(&r.metadata))
            .map(|r| {
                let similarity = cosine_similarity(embedding, &r.embedding);
                VectorHit {
                    id: r.id.clone(),
                    metadata: r.metadata.clone(),
                    distance: 1.0 - similarity,
                    score: (similarity + 1.0) / 2.0,
                }
            })
            .collect();

        hits.sort_by(|a, b| a.distance.partial_cmp(&b.distance).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(top_k);
        Ok(hits)
    }
}
