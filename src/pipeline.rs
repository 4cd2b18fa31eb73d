/**
 * Pipeline Service (C9)
 * Orchestrates the end-to-end document processing pipeline: Located ->
 * Extracted -> Cleaned -> Chunked -> Enriched -> Indexed. Each stage is
 * tracked with timing, a small details map, and non-aborting batch
 * processing (one document's failure doesn't stop the batch).
 */

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::cancellation::CancellationToken;
use crate::chunker;
use crate::cleaner;
use crate::config::PipelineOptions;
use crate::enricher::EnrichContext;
use crate::error::DircResult;
use crate::extractor::Extractor;
use crate::orchestrator::IndexingOrchestrator;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    Located,
    Extracting,
    Extracted,
    Cleaning,
    Cleaned,
    Chunking,
    Chunked,
    Enriching,
    Enriched,
    Indexing,
    Indexed,
    Failed,
}

/// Per-stage timing and a small, stage-specific details map (spec.md §4.6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageStats {
    pub stage: PipelineStage,
    pub duration_ms: f64,
    pub success: bool,
    pub details: HashMap<String, serde_json::Value>,
    pub error: Option<String>,
}

impl StageStats {
    fn ok(stage: PipelineStage, duration_ms: f64, details: HashMap<String, serde_json::Value>) -> Self {
        Self {
            stage,
            duration_ms,
            success: true,
            details,
            error: None,
        }
    }

    fn failed(stage: PipelineStage, duration_ms: f64, error: String) -> Self {
        Self {
            stage,
            duration_ms,
            success: false,
            details: HashMap::new(),
            error: Some(error),
        }
    }
}

/// Full pipeline response for one document (spec.md §4.6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineResponse {
    pub document_id: String,
    pub success: bool,
    pub current_stage: PipelineStage,
    pub total_duration_ms: f64,
    pub stages: Vec<StageStats>,
    pub chunks_created: usize,
    pub chunks_indexed: usize,
    pub error: Option<String>,
}

macro_rules! detail {
    ($($k:expr => $v:expr),* $(,)?) => {{
        let mut m: HashMap<String, serde_json::Value> = HashMap::new();
        $(m.insert($k.to_string(), serde_json::json!($v));)*
        m
    }};
}

/// Orchestrates the whole pipeline. Holds the collaborators it delegates to
/// at each stage; owns none of their internal state.
pub struct PipelineService {
    extractor: Arc<dyn Extractor>,
    orchestrator: Arc<IndexingOrchestrator>,
}

impl PipelineService {
    pub fn new(extractor: Arc<dyn Extractor>, orchestrator: Arc<IndexingOrchestrator>) -> Self {
        Self {
            extractor,
            orchestrator,
        }
    }

    /// Run one document through every stage. Never panics: any stage failure
    /// is captured into the response rather than propagated, per spec.md's
    /// "non-aborting batch processing" requirement upstream in `process_batch`.
    pub async fn process_document(
        &self,
        document_id: &str,
        path: &Path,
        options: &PipelineOptions,
        cancellation: &CancellationToken,
    ) -> PipelineResponse {
        let started = Instant::now();
        let mut stages = Vec::new();
        let mut current_stage = PipelineStage::Located;

        macro_rules! fail_here {
            ($stage:expr, $err:expr) => {{
                let err_msg = $err.to_string();
                error!(document_id, stage = ?$stage, error = %err_msg, "pipeline stage failed");
                stages.push(StageStats::failed($stage, 0.0, err_msg.clone()));
                return PipelineResponse {
                    document_id: document_id.to_string(),
                    success: false,
                    current_stage: PipelineStage::Failed,
                    total_duration_ms: started.elapsed().as_secs_f64() * 1000.0,
                    stages,
                    chunks_created: 0,
                    chunks_indexed: 0,
                    error: Some(err_msg),
                };
            }};
        }

        macro_rules! check_cancel {
            ($stage:expr) => {{
                if let Err(e) = cancellation.check() {
                    fail_here!($stage, e);
                }
            }};
        }

        // Stage: Located -> Extracted
        check_cancel!(current_stage);
        current_stage = PipelineStage::Extracting;
        let stage_start = Instant::now();
        let extracted = match self.extractor.extract(path).await {
            Ok(e) => e,
            Err(e) => fail_here!(current_stage, e),
        };
        stages.push(StageStats::ok(
            PipelineStage::Extracted,
            stage_start.elapsed().as_secs_f64() * 1000.0,
            detail!("pages" => extracted.total_pages, "total_chars" => extracted.total_chars),
        ));
        current_stage = PipelineStage::Extracted;

        // Stage: Extracted -> Cleaned
        let cleaned_text = if options.skip_cleaning {
            extracted.full_text.clone()
        } else {
            current_stage = PipelineStage::Cleaning;
            let stage_start = Instant::now();
            let cleaned = cleaner::clean(&extracted.full_text);
            stages.push(StageStats::ok(
                PipelineStage::Cleaned,
                stage_start.elapsed().as_secs_f64() * 1000.0,
                detail!(
                    "chars_before" => extracted.full_text.chars().count(),
                    "chars_after" => cleaned.chars().count(),
                ),
            ));
            current_stage = PipelineStage::Cleaned;
            cleaned
        };

        check_cancel!(current_stage);

        // Stage: Cleaned -> Chunked
        current_stage = PipelineStage::Chunking;
        let stage_start = Instant::now();
        let chunking_config = options.chunking_config();
        let chunks = match chunker::chunk(&cleaned_text, &chunking_config) {
            Ok(c) => c,
            Err(e) => fail_here!(current_stage, e),
        };
        stages.push(StageStats::ok(
            PipelineStage::Chunked,
            stage_start.elapsed().as_secs_f64() * 1000.0,
            detail!(
                "total_chunks" => chunks.len(),
                "chunk_size" => options.chunk_size,
                "chunk_overlap" => options.chunk_overlap,
            ),
        ));
        current_stage = PipelineStage::Chunked;

        // Stage: Chunked -> Enriched. Enrichment itself runs lazily inside
        // indexing (the orchestrator calls `enricher::enrich` per chunk); this
        // stage exists to report on skip_enrichment and keep stage parity with
        // the teacher's staged response shape.
        if !options.skip_enrichment {
            current_stage = PipelineStage::Enriching;
            let stage_start = Instant::now();
            stages.push(StageStats::ok(
                PipelineStage::Enriched,
                stage_start.elapsed().as_secs_f64() * 1000.0,
                detail!("chunks_to_enrich" => chunks.len()),
            ));
            current_stage = PipelineStage::Enriched;
        }

        check_cancel!(current_stage);

        // Stage: Enriched -> Indexed
        current_stage = PipelineStage::Indexing;
        let stage_start = Instant::now();
        let ctx = EnrichContext::default();
        let indexing_result = self
            .orchestrator
            .index_document(document_id, &chunks, &ctx, cancellation)
            .await;

        if !indexing_result.success {
            let err_msg = indexing_result
                .error
                .unwrap_or_else(|| "indexing failed".to_string());
            fail_here!(current_stage, err_msg);
        }

        stages.push(StageStats::ok(
            PipelineStage::Indexed,
            stage_start.elapsed().as_secs_f64() * 1000.0,
            detail!(
                "chunks_indexed" => indexing_result.chunks_indexed,
                "triple_indexed" => options.use_triple_indexing,
            ),
        ));
        current_stage = PipelineStage::Indexed;

        info!(document_id, total_chunks = chunks.len(), "pipeline completed");

        PipelineResponse {
            document_id: document_id.to_string(),
            success: true,
            current_stage,
            total_duration_ms: started.elapsed().as_secs_f64() * 1000.0,
            stages,
            chunks_created: chunks.len(),
            chunks_indexed: indexing_result.chunks_indexed,
            error: None,
        }
    }

    /// Process many documents; one failure does not stop the batch.
    pub async fn process_batch(
        &self,
        documents: &[(String, std::path::PathBuf)],
        options: &PipelineOptions,
        cancellation: &CancellationToken,
    ) -> Vec<PipelineResponse> {
        let mut responses = Vec::with_capacity(documents.len());
        for (document_id, path) in documents {
            let response = self
                .process_document(document_id, path, options, cancellation)
                .await;
            if !response.success {
                warn!(document_id, "batch: document failed, continuing with remaining documents");
            }
            responses.push(response);
        }
        responses
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk_store::ChunkStore;
    use crate::embedding::DeterministicMockEmbeddingProvider;
    use crate::extractor::MockExtractor;
    use crate::fulltext::FullTextIndex;
    use crate::vector_store::{InMemoryVectorStore, VectorStore};
    use std::path::PathBuf;

    async fn service(extractor: Arc<dyn Extractor>) -> PipelineService {
        let chunk_store = ChunkStore::connect("sqlite::memory:").await.unwrap();
        let fulltext = FullTextIndex::new(chunk_store.pool().clone()).await.unwrap();
        let vector_store: Arc<dyn VectorStore> = Arc::new(InMemoryVectorStore::new());
        let provider = Arc::new(DeterministicMockEmbeddingProvider::new(8));
        let orchestrator = Arc::new(IndexingOrchestrator::new(
            chunk_store,
            fulltext,
            vector_store,
            provider,
        ));
        PipelineService::new(extractor, orchestrator)
    }

    #[tokio::test]
    async fn clean_ingest_produces_dense_indexed_chunks() {
        let mut text = String::new();
        for i in 0..3 {
            text.push_str(&format!("\nDECRETO {}\n", i));
            text.push_str(&"contenido del decreto con suficiente longitud ".repeat(20));
        }
        let extractor: Arc<dyn Extractor> = Arc::new(MockExtractor::new(text));
        let service = service(extractor).await;

        let options = PipelineOptions::default();
        let cancellation = CancellationToken::new();
        let response = service
            .process_document("doc-1", &PathBuf::from("irrelevant.pdf"), &options, &cancellation)
            .await;

        assert!(response.success);
        assert_eq!(response.current_stage, PipelineStage::Indexed);
        assert_eq!(response.chunks_created, response.chunks_indexed);
        assert!(response.chunks_created > 0);
    }

    #[tokio::test]
    async fn extraction_failure_yields_failed_stage() {
        let extractor: Arc<dyn Extractor> = Arc::new(MockExtractor::failing());
        let service = service(extractor).await;
        let options = PipelineOptions::default();
        let cancellation = CancellationToken::new();
        let response = service
            .process_document("doc-2", &PathBuf::from("irrelevant.pdf"), &options, &cancellation)
            .await;

        assert!(!response.success);
        assert_eq!(response.current_stage, PipelineStage::Failed);
        assert!(response.error.is_some());
    }

    #[tokio::test]
    async fn cancellation_before_extraction_yields_failed_stage() {
        let extractor: Arc<dyn Extractor> = Arc::new(MockExtractor::new("contenido de prueba"));
        let service = service(extractor).await;
        let options = PipelineOptions::default();
        let cancellation = CancellationToken::new();
        cancellation.cancel();

        let response = service
            .process_document("doc-cancelled", &PathBuf::from("irrelevant.pdf"), &options, &cancellation)
            .await;

        assert!(!response.success);
        assert_eq!(response.current_stage, PipelineStage::Failed);
        assert_eq!(response.chunks_created, 0);
        assert_eq!(response.chunks_indexed, 0);
    }

    #[tokio::test]
    async fn batch_continues_after_one_document_fails() {
        let ok_extractor: Arc<dyn Extractor> = Arc::new(MockExtractor::new(
            "texto corto de prueba pero suficientemente largo para un chunk",
        ));
        let ok_service = service(ok_extractor).await;
        let options = PipelineOptions::default();
        let cancellation = CancellationToken::new();

        let ok_response = ok_service
            .process_document("doc-ok", &PathBuf::from("a.pdf"), &options, &cancellation)
            .await;
        assert!(ok_response.success);

        let failing_extractor: Arc<dyn Extractor> = Arc::new(MockExtractor::failing());
        let fail_service = service(failing_extractor).await;
        let fail_response = fail_service
            .process_document("doc-fail", &PathBuf::from("b.pdf"), &options, &cancellation)
            .await;
        assert!(!fail_response.success);
    }
}
