/**
 * Re-Ranker
 * External, optional capability consumed by C10 to re-order the top-N
 * fused candidates by relevance before returning a response. A `noop`
 * strategy is an explicit, selectable no-op rather than merely "rerank=false".
 */

use async_trait::async_trait;

use crate::error::DircResult;

/// Re-ranking capability: score `(query, candidate)` pairs into `[0, 1]`.
#[async_trait]
pub trait ReRanker: Send + Sync {
    fn strategy_name(&self) -> &str;
    async fn rerank(&self, query: &str, texts: &[String]) -> DircResult<Vec<f32>>;
}

/// Explicit identity strategy: returns the input order/scores unchanged. The
/// difference between "no reranker configured" and "`noop` selected" matters
/// for the `reranked` field in the retrieval response.
pub struct NoopReRanker;

#[async_trait]
impl ReRanker for NoopReRanker {
    fn strategy_name(&self) -> &str {
        "noop"
    }

    async fn rerank(&self, _query: &str, texts: &[String]) -> DircResult<Vec<f32>> {
        Ok(vec![1.0; texts.len()])
    }
}

/// Lightweight reference reranker: lexical term-overlap between the query
/// and each candidate, normalized into `[0, 1]`. Stands in for a
/// cross-encoder without requiring a model runtime.
pub struct LexicalOverlapReRanker;

fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

#[async_trait]
impl ReRanker for LexicalOverlapReRanker {
    fn strategy_name(&self) -> &str {
        "lexical-overlap"
    }

    async fn rerank(&self, query: &str, texts: &[String]) -> DircResult<Vec<f32>> {
        let query_tokens: std::collections::HashSet<String> = tokenize(query).into_iter().collect();
        if query_tokens.is_empty() {
            return Ok(vec![0.0; texts.len()]);
        }

        Ok(texts
            .iter()
            .map(|text| {
                let text_tokens: std::collections::HashSet<String> = tokenize(text).into_iter().collect();
                let overlap = query_tokens.intersection(&text_tokens).count();
                overlap as f32 / query_tokens.len() as f32
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn noop_reranker_returns_constant_scores() {
        let reranker = NoopReRanker;
        let scores = reranker
            .rerank("licitación pública", &["a".to_string(), "b".to_string()])
            .await
            .unwrap();
        assert_eq!(scores, vec![1.0, 1.0]);
    }

    #[tokio::test]
    async fn lexical_overlap_scores_exact_match_highest() {
        let reranker = LexicalOverlapReRanker;
        let texts = vec![
            "llamado a licitación pública para obras".to_string(),
            "texto totalmente distinto sin relacion".to_string(),
        ];
        let scores = reranker.rerank("licitación pública", &texts).await.unwrap();
        assert!(scores[0] > scores[1]);
        assert!(scores[0] <= 1.0 && scores[0] >= 0.0);
    }
}
