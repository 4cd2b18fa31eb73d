/**
 * Document Ingestion and Retrieval Core
 * Ingests official-gazette PDFs into a triple index (relational chunk store,
 * BM25 full-text index, vector store) and serves hybrid retrieval over it.
 */

pub mod cancellation;
pub mod chunk_store;
pub mod chunker;
pub mod cleaner;
pub mod config;
pub mod embedding;
pub mod enricher;
pub mod error;
pub mod extractor;
pub mod fulltext;
pub mod orchestrator;
pub mod pipeline;
pub mod rerank;
pub mod retrieval;
pub mod validation;
pub mod vector_store;

use std::path::Path;
use std::sync::Arc;

use cancellation::CancellationToken;
use config::{PipelineOptions, RetrievalConfig};
use embedding::EmbeddingProvider;
use error::DircResult;
use extractor::Extractor;
use orchestrator::{IndexingOrchestrator, IndexingResult, RepairResult, VerifyResult};
use pipeline::{PipelineResponse, PipelineService};
use rerank::ReRanker;
use retrieval::{Filters, SearchResponse, SearchTechnique, RetrievalService};
use vector_store::VectorStore;

/// Top-level handle wiring the ingestion pipeline and the retriever together
/// over one shared triple index, analogous to the teacher's application state.
pub struct DircCore {
    pipeline: PipelineService,
    retrieval: RetrievalService,
    orchestrator: Arc<IndexingOrchestrator>,
}

impl DircCore {
    pub async fn connect(
        database_url: &str,
        extractor: Arc<dyn Extractor>,
        vector_store: Arc<dyn VectorStore>,
        embedding_provider: Arc<dyn EmbeddingProvider>,
        retrieval_config: RetrievalConfig,
    ) -> DircResult<Self> {
        let chunk_store = chunk_store::ChunkStore::connect(database_url).await?;
        let fulltext = fulltext::FullTextIndex::new(chunk_store.pool().clone()).await?;

        let orchestrator = Arc::new(IndexingOrchestrator::new(
            chunk_store.clone(),
            fulltext.clone(),
            vector_store.clone(),
            embedding_provider.clone(),
        ));

        let pipeline = PipelineService::new(extractor, orchestrator.clone());
        let retrieval = RetrievalService::new(
            chunk_store,
            fulltext,
            vector_store,
            embedding_provider,
            retrieval_config,
        );

        Ok(Self {
            pipeline,
            retrieval,
            orchestrator,
        })
    }

    pub async fn ingest(
        &self,
        document_id: &str,
        path: &Path,
        options: &PipelineOptions,
        cancellation: &CancellationToken,
    ) -> PipelineResponse {
        self.pipeline
            .process_document(document_id, path, options, cancellation)
            .await
    }

    pub async fn ingest_batch(
        &self,
        documents: &[(String, std::path::PathBuf)],
        options: &PipelineOptions,
        cancellation: &CancellationToken,
    ) -> Vec<PipelineResponse> {
        self.pipeline.process_batch(documents, options, cancellation).await
    }

    pub async fn search(
        &self,
        query: &str,
        top_k: usize,
        filters: &Filters,
        technique: SearchTechnique,
        reranker: Option<&dyn ReRanker>,
        cancellation: &CancellationToken,
    ) -> DircResult<SearchResponse> {
        self.retrieval
            .search(query, top_k, filters, technique, reranker, cancellation)
            .await
    }

    pub async fn verify(&self, document_id: &str) -> DircResult<VerifyResult> {
        self.orchestrator.verify(document_id).await
    }

    pub async fn repair(&self, document_id: &str) -> DircResult<RepairResult> {
        self.orchestrator.repair(document_id).await
    }

    pub async fn index_document(
        &self,
        document_id: &str,
        chunks: &[chunker::ChunkResult],
        ctx: &enricher::EnrichContext,
        cancellation: &CancellationToken,
    ) -> IndexingResult {
        self.orchestrator
            .index_document(document_id, chunks, ctx, cancellation)
            .await
    }
}
