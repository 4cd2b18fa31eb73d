/**
 * Retrieval Service (C10)
 * Unified search() over semantic (C6), keyword (C5 BM25), and hybrid
 * (Reciprocal Rank Fusion of both legs) techniques, with optional re-ranking
 * and highlight-snippet extraction.
 */

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::cancellation::CancellationToken;
use crate::chunk_store::ChunkStore;
use crate::config::{RetrievalConfig, TimeoutConfig};
use crate::embedding::EmbeddingProvider;
use crate::error::{DircError, DircResult};
use crate::fulltext::{FullTextIndex, KeywordFilters};
use crate::rerank::ReRanker;
use crate::validation::{validate_query, validate_top_k};
use crate::vector_store::{VectorFilter, VectorStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchTechnique {
    Semantic,
    Keyword,
    Hybrid,
}

impl SearchTechnique {
    fn as_str(&self) -> &'static str {
        match self {
            SearchTechnique::Semantic => "semantic",
            SearchTechnique::Keyword => "keyword",
            SearchTechnique::Hybrid => "hybrid",
        }
    }
}

/// Equality filters over chunk metadata, spec.md §6. Keys a technique cannot
/// enforce (no matching column in that leg's store) are silently dropped —
/// a documented contract, not an error (P-8).
#[derive(Debug, Clone, Default)]
pub struct Filters {
    pub year: Option<String>,
    pub month: Option<String>,
    pub section: Option<String>,
    pub jurisdiction_id: Option<String>,
    pub topic: Option<String>,
    pub language: Option<String>,
    pub has_tables: Option<bool>,
    pub has_amounts: Option<bool>,
    pub entities: Option<Vec<String>>,
    pub document_id: Option<String>,
    pub source_id: Option<String>,
}

impl Filters {
    fn to_keyword_filters(&self) -> KeywordFilters {
        KeywordFilters {
            section_type: self.section.clone(),
            language: self.language.clone(),
            topic: self.topic.clone(),
            document_id: self.document_id.clone(),
            has_tables: self.has_tables,
            has_amounts: self.has_amounts,
        }
    }

    fn to_vector_filter(&self) -> VectorFilter {
        VectorFilter {
            document_id: self.document_id.clone(),
            section_type: self.section.clone(),
            language: self.language.clone(),
            topic: self.topic.clone(),
        }
    }
}

/// Transient result shape returned by `search` (spec.md §3, §6).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RankedHit {
    pub chunk_id: i64,
    pub text: String,
    pub score: f64,
    pub file_name: Option<String>,
    pub page_numbers: Option<Vec<usize>>,
    pub metadata: HashMap<String, serde_json::Value>,
    pub highlight: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResponse {
    pub results: Vec<RankedHit>,
    pub query: String,
    pub technique: String,
    pub total_results: usize,
    pub execution_time_ms: f64,
    pub reranked: bool,
    pub degraded_leg: Option<String>,
}

struct LegCandidate {
    chunk_id: i64,
    text: String,
    document_id: String,
    section_type: String,
    topic: Option<String>,
    /// Leg-native relevance score: cosine-derived for the semantic leg
    /// (`clamp(1 - distance/2, 0, 1)`, computed in `vector_store.rs`), BM25
    /// min-max normalized for the keyword leg. Carried through so `semantic()`
    /// and `keyword()` can report the real score instead of a rank placeholder.
    score: f64,
}

pub struct RetrievalService {
    chunk_store: ChunkStore,
    fulltext: FullTextIndex,
    vector_store: Arc<dyn VectorStore>,
    embedding_provider: Arc<dyn EmbeddingProvider>,
    config: RetrievalConfig,
    timeouts: TimeoutConfig,
}

impl RetrievalService {
    pub fn new(
        chunk_store: ChunkStore,
        fulltext: FullTextIndex,
        vector_store: Arc<dyn VectorStore>,
        embedding_provider: Arc<dyn EmbeddingProvider>,
        config: RetrievalConfig,
    ) -> Self {
        Self::with_timeouts(
            chunk_store,
            fulltext,
            vector_store,
            embedding_provider,
            config,
            TimeoutConfig::default(),
        )
    }

    pub fn with_timeouts(
        chunk_store: ChunkStore,
        fulltext: FullTextIndex,
        vector_store: Arc<dyn VectorStore>,
        embedding_provider: Arc<dyn EmbeddingProvider>,
        config: RetrievalConfig,
        timeouts: TimeoutConfig,
    ) -> Self {
        Self {
            chunk_store,
            fulltext,
            vector_store,
            embedding_provider,
            config,
            timeouts,
        }
    }

    async fn semantic_candidates(
        &self,
        query: &str,
        top_k: usize,
        filters: &Filters,
        cancellation: &CancellationToken,
    ) -> DircResult<Vec<LegCandidate>> {
        cancellation.check()?;
        let embedding = match tokio::time::timeout(self.timeouts.embedding(), self.embedding_provider.embed(query)).await {
            Ok(result) => result?,
            Err(_) => return Err(DircError::TimeoutError(self.timeouts.embedding())),
        };

        cancellation.check()?;
        let hits = match tokio::time::timeout(
            self.timeouts.vector_store(),
            self.vector_store.query(&embedding, top_k, &filters.to_vector_filter()),
        )
        .await
        {
            Ok(result) => result?,
            Err(_) => return Err(DircError::TimeoutError(self.timeouts.vector_store())),
        };

        let mut candidates = Vec::with_capacity(hits.len());
        for hit in hits {
            cancellation.check()?;
            match self.chunk_store.get_by_id(hit.metadata.chunk_id).await? {
                Some(row) => candidates.push(LegCandidate {
                    chunk_id: row.chunk_id,
                    text: row.text,
                    document_id: row.document_id,
                    section_type: row.section_type.as_str().to_string(),
                    topic: row.topic,
                    score: hit.score as f64,
                }),
                None => warn!(chunk_id = hit.metadata.chunk_id, "vector hit has no matching relational row"),
            }
        }
        Ok(candidates)
    }

    async fn keyword_candidates(
        &self,
        query: &str,
        top_k: usize,
        filters: &Filters,
        cancellation: &CancellationToken,
    ) -> DircResult<Vec<LegCandidate>> {
        cancellation.check()?;
        let hits = match tokio::time::timeout(
            self.timeouts.bm25(),
            self.fulltext.search_bm25(query, top_k, &filters.to_keyword_filters()),
        )
        .await
        {
            Ok(result) => result?,
            Err(_) => return Err(DircError::TimeoutError(self.timeouts.bm25())),
        };
        Ok(hits
            .into_iter()
            .map(|h| LegCandidate {
                chunk_id: h.chunk_id,
                text: h.text,
                document_id: h.document_id,
                section_type: h.section_type,
                topic: h.topic,
                score: h.bm25_score,
            })
            .collect())
    }

    fn to_ranked_hit(candidate: &LegCandidate, score: f64, query: &str, window: usize) -> RankedHit {
        let mut metadata = HashMap::new();
        metadata.insert("document_id".to_string(), serde_json::json!(candidate.document_id));
        metadata.insert("section_type".to_string(), serde_json::json!(candidate.section_type));
        if let Some(topic) = &candidate.topic {
            metadata.insert("topic".to_string(), serde_json::json!(topic));
        }

        RankedHit {
            chunk_id: candidate.chunk_id,
            text: candidate.text.clone(),
            score,
            file_name: None,
            page_numbers: None,
            metadata,
            highlight: extract_highlight(&candidate.text, query, window),
        }
    }

    /// Pure semantic search: cosine similarity over C6.
    pub async fn semantic(
        &self,
        query: &str,
        top_k: usize,
        filters: &Filters,
        cancellation: &CancellationToken,
    ) -> DircResult<SearchResponse> {
        let started = Instant::now();
        validate_query(query)?;
        validate_top_k(top_k)?;

        let candidates = self.semantic_candidates(query, top_k, filters, cancellation).await?;
        let mut results: Vec<RankedHit> = candidates
            .iter()
            .map(|c| Self::to_ranked_hit(c, c.score, query, self.config.highlight_window))
            .collect();
        results.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));

        Ok(SearchResponse {
            total_results: results.len(),
            results,
            query: query.to_string(),
            technique: SearchTechnique::Semantic.as_str().to_string(),
            execution_time_ms: started.elapsed().as_secs_f64() * 1000.0,
            reranked: false,
            degraded_leg: None,
        })
    }

    /// Pure keyword search: BM25 over the FTS5 shadow index.
    pub async fn keyword(
        &self,
        query: &str,
        top_k: usize,
        filters: &Filters,
        cancellation: &CancellationToken,
    ) -> DircResult<SearchResponse> {
        let started = Instant::now();
        validate_query(query)?;
        validate_top_k(top_k)?;

        let candidates = self.keyword_candidates(query, top_k, filters, cancellation).await?;

        let mut results: Vec<RankedHit> = candidates
            .iter()
            .map(|c| Self::to_ranked_hit(c, c.score, query, self.config.highlight_window))
            .collect();
        results.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));

        Ok(SearchResponse {
            total_results: results.len(),
            results,
            query: query.to_string(),
            technique: SearchTechnique::Keyword.as_str().to_string(),
            execution_time_ms: started.elapsed().as_secs_f64() * 1000.0,
            reranked: false,
            degraded_leg: None,
        })
    }

    /// Hybrid search: fuse semantic and keyword candidate lists with
    /// Reciprocal Rank Fusion (P-7). If one leg fails, the other leg's
    /// results are still returned with `degraded_leg` naming the failure.
    pub async fn hybrid(
        &self,
        query: &str,
        top_k: usize,
        filters: &Filters,
        reranker: Option<&dyn ReRanker>,
        cancellation: &CancellationToken,
    ) -> DircResult<SearchResponse> {
        let started = Instant::now();
        validate_query(query)?;
        validate_top_k(top_k)?;
        cancellation.check()?;

        // Oversample each leg so fusion has enough candidates to rank well
        // before truncating to top_k.
        let pool_size = (top_k * 3).max(self.config.rerank_top_n);

        let (semantic_result, keyword_result) = tokio::join!(
            self.semantic_candidates(query, pool_size, filters, cancellation),
            self.keyword_candidates(query, pool_size, filters, cancellation),
        );

        if matches!(semantic_result, Err(DircError::CancelledError))
            || matches!(keyword_result, Err(DircError::CancelledError))
        {
            return Err(DircError::CancelledError);
        }

        let mut degraded_leg = None;
        let semantic_list = match semantic_result {
            Ok(list) => list,
            Err(e) => {
                warn!(error = %e, "semantic leg failed, degrading to keyword-only");
                degraded_leg = Some("semantic".to_string());
                Vec::new()
            }
        };
        let keyword_list = match keyword_result {
            Ok(list) => list,
            Err(e) => {
                warn!(error = %e, "keyword leg failed, degrading to semantic-only");
                degraded_leg = Some("keyword".to_string());
                Vec::new()
            }
        };

        if semantic_list.is_empty() && keyword_list.is_empty() && degraded_leg.is_some() {
            return Err(DircError::VectorStoreError(
                "both retrieval legs failed".to_string(),
            ));
        }

        let fused = rrf_fuse(&semantic_list, &keyword_list, self.config.rrf_k);

        let mut results: Vec<RankedHit> = fused
            .into_iter()
            .take(top_k)
            .map(|(candidate, score)| Self::to_ranked_hit(&candidate, score, query, self.config.highlight_window))
            .collect();

        let mut reranked = false;
        if let Some(reranker) = reranker {
            let texts: Vec<String> = results.iter().map(|r| r.text.clone()).collect();
            if !texts.is_empty() {
                let scores = reranker.rerank(query, &texts).await?;
                for (hit, score) in results.iter_mut().zip(scores) {
                    hit.score = score as f64;
                }
                results.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
                reranked = true;
            }
        }

        Ok(SearchResponse {
            total_results: results.len(),
            results,
            query: query.to_string(),
            technique: SearchTechnique::Hybrid.as_str().to_string(),
            execution_time_ms: started.elapsed().as_secs_f64() * 1000.0,
            reranked,
            degraded_leg,
        })
    }

    /// Unified entrypoint matching spec.md §6's external contract.
    pub async fn search(
        &self,
        query: &str,
        top_k: usize,
        filters: &Filters,
        technique: SearchTechnique,
        reranker: Option<&dyn ReRanker>,
        cancellation: &CancellationToken,
    ) -> DircResult<SearchResponse> {
        match technique {
            SearchTechnique::Semantic => self.semantic(query, top_k, filters, cancellation).await,
            SearchTechnique::Keyword => self.keyword(query, top_k, filters, cancellation).await,
            SearchTechnique::Hybrid => self.hybrid(query, top_k, filters, reranker, cancellation).await,
        }
    }
}

/// Fuse two ranked candidate lists with Reciprocal Rank Fusion:
/// `score(c) = 1/(rrf_k+rank_semantic(c)) + 1/(rrf_k+rank_keyword(c))`,
/// counting only legs where `c` appears, then normalized by the maximum
/// raw score so the top result is always 1.0 (P-7).
fn rrf_fuse(
    semantic: &[LegCandidate],
    keyword: &[LegCandidate],
    rrf_k: u32,
) -> Vec<(LegCandidate, f64)> {
    let mut raw_scores: HashMap<i64, f64> = HashMap::new();
    let mut by_id: HashMap<i64, &LegCandidate> = HashMap::new();

    for (rank, c) in semantic.iter().enumerate() {
        let contribution = 1.0 / (rrf_k as f64 + (rank + 1) as f64);
        *raw_scores.entry(c.chunk_id).or_insert(0.0) += contribution;
        by_id.entry(c.chunk_id).or_insert(c);
    }
    for (rank, c) in keyword.iter().enumerate() {
        let contribution = 1.0 / (rrf_k as f64 + (rank + 1) as f64);
        *raw_scores.entry(c.chunk_id).or_insert(0.0) += contribution;
        by_id.entry(c.chunk_id).or_insert(c);
    }

    let max_score = raw_scores.values().cloned().fold(0.0_f64, f64::max);
    let mut fused: Vec<(i64, f64)> = raw_scores.into_iter().collect();
    fused.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

    fused
        .into_iter()
        .map(|(id, raw)| {
            let normalized = if max_score > 0.0 { raw / max_score } else { 0.0 };
            let candidate = by_id.get(&id).expect("candidate indexed by its own id");
            (
                LegCandidate {
                    chunk_id: candidate.chunk_id,
                    text: candidate.text.clone(),
                    document_id: candidate.document_id.clone(),
                    section_type: candidate.section_type.clone(),
                    topic: candidate.topic.clone(),
                    score: candidate.score,
                },
                normalized,
            )
        })
        .collect()
}

/// Extract a `highlight_window`-char snippet around the first query-token
/// match, wrapping matches in `<mark>`. Returns `None` if no token matches.
fn extract_highlight(text: &str, query: &str, window: usize) -> Option<String> {
    let query_tokens: Vec<String> = query
        .to_lowercase()
        .split_whitespace()
        .filter(|t| t.len() > 2)
        .map(String::from)
        .collect();
    if query_tokens.is_empty() {
        return None;
    }

    let lower = text.to_lowercase();
    let first_match = query_tokens
        .iter()
        .filter_map(|token| lower.find(token.as_str()).map(|pos| (pos, token.len())))
        .min_by_key(|(pos, _)| *pos)?;

    let (match_start, match_len) = first_match;
    let chars: Vec<char> = text.chars().collect();
    let byte_to_char = |byte_pos: usize| text[..byte_pos].chars().count();
    let match_start_char = byte_to_char(match_start);
    let match_end_char = byte_to_char(match_start + match_len);

    let window_start = match_start_char.saturating_sub(window / 2);
    let window_end = (match_end_char + window / 2).min(chars.len());

    let mut snippet = String::new();
    for (i, token_match) in chars[window_start..window_end].iter().enumerate() {
        let global_idx = window_start + i;
        if global_idx == match_start_char {
            snippet.push_str("<mark>");
        }
        snippet.push(*token_match);
        if global_idx + 1 == match_end_char {
            snippet.push_str("</mark>");
        }
    }
    Some(snippet)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancellation::CancellationToken;
    use crate::chunk_store::{ChunkStore, NewChunk};
    use crate::embedding::DeterministicMockEmbeddingProvider;
    use crate::enricher::{ChunkMetadata, SectionType};
    use crate::rerank::NoopReRanker;
    use crate::vector_store::{InMemoryVectorStore, VectorMetadata};

    fn metadata() -> ChunkMetadata {
        ChunkMetadata {
            chunk_hash: "h".to_string(),
            section_type: SectionType::Tender,
            language: "es".to_string(),
            has_tables: false,
            has_amounts: false,
            entities: None,
            topic: None,
        }
    }

    async fn seeded_service() -> RetrievalService {
        let chunk_store = ChunkStore::connect("sqlite::memory:").await.unwrap();
        let fulltext = FullTextIndex::new(chunk_store.pool().clone()).await.unwrap();
        let vector_store = InMemoryVectorStore::new();
        let provider = DeterministicMockEmbeddingProvider::new(8);

        let texts = [
            "disposicion general",
            "se abre licitación para obras",
            "texto neutro tres",
            "texto neutro cuatro",
            "texto neutro cinco",
            "texto neutro seis",
            "texto neutro siete",
            "llamado a licitación urgente licitación",
        ];
        for (i, text) in texts.iter().enumerate() {
            let mut tx = chunk_store.begin().await.unwrap();
            let chunk_id = chunk_store
                .insert_tx(
                    &mut tx,
                    &NewChunk {
                        document_id: "doc-1",
                        chunk_index: i as i64,
                        chunk_hash: "h",
                        text,
                        num_chars: text.chars().count() as i64,
                        start_char: 0,
                        end_char: text.chars().count() as i64,
                        metadata: &metadata(),
                    },
                )
                .await
                .unwrap();
            tx.commit().await.unwrap();

            use crate::embedding::EmbeddingProvider;
            let embedding = provider.embed(text).await.unwrap();
            vector_store
                .add(
                    &format!("doc-1_chunk_{}", i),
                    &embedding,
                    VectorMetadata {
                        document_id: "doc-1".to_string(),
                        chunk_index: i as i64,
                        chunk_id,
                        section_type: "tender".to_string(),
                        language: "es".to_string(),
                        topic: None,
                    },
                )
                .await
                .unwrap();
        }

        RetrievalService::new(
            chunk_store,
            fulltext,
            Arc::new(vector_store),
            Arc::new(provider),
            RetrievalConfig::default(),
        )
    }

    #[tokio::test]
    async fn keyword_search_finds_exact_matches_only() {
        let service = seeded_service().await;
        let response = service
            .keyword("licitación", 5, &Filters::default(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(response.total_results, 2);
        for hit in &response.results {
            assert!(hit.score >= 0.0 && hit.score <= 1.0);
        }
    }

    #[tokio::test]
    async fn results_are_sorted_by_score_descending() {
        let service = seeded_service().await;
        let response = service
            .keyword("licitación", 5, &Filters::default(), &CancellationToken::new())
            .await
            .unwrap();
        for window in response.results.windows(2) {
            assert!(window[0].score >= window[1].score);
        }
    }

    #[tokio::test]
    async fn semantic_search_reports_the_vector_stores_own_cosine_derived_score() {
        let chunk_store = ChunkStore::connect("sqlite::memory:").await.unwrap();
        let fulltext = FullTextIndex::new(chunk_store.pool().clone()).await.unwrap();
        let vector_store = InMemoryVectorStore::new();
        let provider = DeterministicMockEmbeddingProvider::new(8);

        let texts = ["disposicion general", "se abre licitación para obras"];
        for (i, text) in texts.iter().enumerate() {
            let mut tx = chunk_store.begin().await.unwrap();
            let chunk_id = chunk_store
                .insert_tx(
                    &mut tx,
                    &NewChunk {
                        document_id: "doc-1",
                        chunk_index: i as i64,
                        chunk_hash: "h",
                        text,
                        num_chars: text.chars().count() as i64,
                        start_char: 0,
                        end_char: text.chars().count() as i64,
                        metadata: &metadata(),
                    },
                )
                .await
                .unwrap();
            tx.commit().await.unwrap();

            use crate::embedding::EmbeddingProvider;
            let embedding = provider.embed(text).await.unwrap();
            vector_store
                .add(
                    &format!("doc-1_chunk_{}", i),
                    &embedding,
                    VectorMetadata {
                        document_id: "doc-1".to_string(),
                        chunk_index: i as i64,
                        chunk_id,
                        section_type: "tender".to_string(),
                        language: "es".to_string(),
                        topic: None,
                    },
                )
                .await
                .unwrap();
        }

        let vector_store: Arc<dyn VectorStore> = Arc::new(vector_store);
        let query = "licitación pública";
        let query_embedding = provider.embed(query).await.unwrap();
        let expected_hits = vector_store
            .query(&query_embedding, 2, &VectorFilter::default())
            .await
            .unwrap();

        let service = RetrievalService::new(
            chunk_store,
            fulltext,
            vector_store,
            Arc::new(provider),
            RetrievalConfig::default(),
        );
        let response = service
            .semantic(query, 2, &Filters::default(), &CancellationToken::new())
            .await
            .unwrap();

        for hit in &response.results {
            let expected = expected_hits
                .iter()
                .find(|h| h.metadata.chunk_id == hit.chunk_id)
                .expect("every ranked hit traces back to a vector-store hit");
            assert!((hit.score - expected.score as f64).abs() < 1e-9);
        }
    }

    #[tokio::test]
    async fn hybrid_fusion_scores_are_bounded_and_top_is_one() {
        let service = seeded_service().await;
        let response = service
            .hybrid("licitación", 5, &Filters::default(), None, &CancellationToken::new())
            .await
            .unwrap();
        assert!(!response.results.is_empty());
        assert!((response.results[0].score - 1.0).abs() < 1e-9);
        for hit in &response.results {
            assert!(hit.score >= 0.0 && hit.score <= 1.0);
        }
    }

    #[tokio::test]
    async fn noop_reranker_marks_response_as_reranked_without_reordering_ties() {
        let service = seeded_service().await;
        let reranker = NoopReRanker;
        let response = service
            .hybrid(
                "licitación",
                5,
                &Filters::default(),
                Some(&reranker),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert!(response.reranked);
    }

    #[tokio::test]
    async fn cancelled_token_short_circuits_semantic_search() {
        let service = seeded_service().await;
        let cancellation = CancellationToken::new();
        cancellation.cancel();
        let result = service.semantic("licitación", 5, &Filters::default(), &cancellation).await;
        assert!(matches!(result, Err(DircError::CancelledError)));
    }

    #[tokio::test]
    async fn cancelled_token_surfaces_as_cancelled_error_not_a_degraded_leg() {
        let service = seeded_service().await;
        let cancellation = CancellationToken::new();
        cancellation.cancel();
        let result = service
            .hybrid("licitación", 5, &Filters::default(), None, &cancellation)
            .await;
        assert!(matches!(result, Err(DircError::CancelledError)));
    }

    #[test]
    fn highlight_wraps_matched_token() {
        let snippet = extract_highlight("se abre licitación para obras", "licitación", 40).unwrap();
        assert!(snippet.contains("<mark>licitación</mark>"));
    }

    #[test]
    fn highlight_returns_none_without_match() {
        assert!(extract_highlight("texto sin relacion", "licitación", 40).is_none());
    }
}
