/**
 * Full-Text Index (C5)
 * FTS5 shadow table kept in lock-step with the chunks table (chunk_store.rs)
 * via SQL triggers, so every write to C4 transparently updates C5 (INV-1).
 */

use serde::{Deserialize, Serialize};
use sqlx::{Row, SqlitePool};

use crate::error::DircResult;

/// One BM25 hit, spec.md §4.4.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct KeywordHit {
    pub chunk_id: i64,
    pub document_id: String,
    pub chunk_index: i64,
    pub text: String,
    pub bm25_score: f64,
    pub section_type: String,
    pub topic: Option<String>,
}

/// Equality/range filters over chunk-metadata columns. Unknown keys are
/// silently ignored by the caller building this map (spec.md §4.4, §6).
#[derive(Debug, Clone, Default)]
pub struct KeywordFilters {
    pub section_type: Option<String>,
    pub language: Option<String>,
    pub topic: Option<String>,
    pub document_id: Option<String>,
    pub has_tables: Option<bool>,
    pub has_amounts: Option<bool>,
}

/// FTS5-backed keyword index. Owns no data of its own; the `chunks_fts`
/// virtual table and its sync triggers are installed against the pool
/// shared with `ChunkStore`.
#[derive(Clone)]
pub struct FullTextIndex {
    pool: SqlitePool,
}

impl FullTextIndex {
    pub async fn new(pool: SqlitePool) -> DircResult<Self> {
        let index = Self { pool };
        index.create_schema().await?;
        Ok(index)
    }

    async fn create_schema(&self) -> DircResult<()> {
        sqlx::query(
            "CREATE VIRTUAL TABLE IF NOT EXISTS chunks_fts USING fts5(
                text,
                content='chunks',
                content_rowid='chunk_id'
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TRIGGER IF NOT EXISTS chunks_fts_insert AFTER INSERT ON chunks BEGIN
                INSERT INTO chunks_fts(rowid, text) VALUES (new.chunk_id, new.text);
            END",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TRIGGER IF NOT EXISTS chunks_fts_delete AFTER DELETE ON chunks BEGIN
                INSERT INTO chunks_fts(chunks_fts, rowid, text) VALUES ('delete', old.chunk_id, old.text);
            END",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TRIGGER IF NOT EXISTS chunks_fts_update AFTER UPDATE ON chunks BEGIN
                INSERT INTO chunks_fts(chunks_fts, rowid, text) VALUES ('delete', old.chunk_id, old.text);
                INSERT INTO chunks_fts(rowid, text) VALUES (new.chunk_id, new.text);
            END",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Count of FTS rows for a document, used by `verify` (P-1). Derived from
    /// the shadow table's own rowid set, not the base table, so a genuine
    /// divergence is observable.
    pub async fn count_by_document(&self, document_id: &str) -> DircResult<i64> {
        let row = sqlx::query(
            "SELECT COUNT(*) as n FROM chunks_fts
             JOIN chunks ON chunks.chunk_id = chunks_fts.rowid
             WHERE chunks.document_id = ?",
        )
        .bind(document_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.try_get("n")?)
    }

    /// BM25 search with optional equality filters (spec.md §4.4). Scores are
    /// min-max normalized into `[0, 1]` across the returned set so they
    /// compose with semantic scores under hybrid fusion.
    pub async fn search_bm25(
        &self,
        query: &str,
        top_k: usize,
        filters: &KeywordFilters,
    ) -> DircResult<Vec<KeywordHit>> {
        let mut sql = String::from(
            "SELECT chunks.chunk_id as chunk_id, chunks.document_id as document_id,
                    chunks.chunk_index as chunk_index, chunks.text as text,
                    chunks.section_type as section_type, chunks.topic as topic,
                    bm25(chunks_fts) as raw_score
             FROM chunks_fts
             JOIN chunks ON chunks.chunk_id = chunks_fts.rowid
             WHERE chunks_fts MATCH ?",
        );
        if filters.section_type.is_some() {
            sql.push_str(" AND chunks.section_type = ?");
        }
        if filters.language.is_some() {
            sql.push_str(" AND chunks.language = ?");
        }
        if filters.topic.is_some() {
            sql.push_str(" AND chunks.topic = ?");
        }
        if filters.document_id.is_some() {
            sql.push_str(" AND chunks.document_id = ?");
        }
        if let Some(v) = filters.has_tables {
            sql.push_str(if v {
                " AND chunks.has_tables = 1"
            } else {
                " AND chunks.has_tables = 0"
            });
        }
        if let Some(v) = filters.has_amounts {
            sql.push_str(if v {
                " AND chunks.has_amounts = 1"
            } else {
                " AND chunks.has_amounts = 0"
            });
        }
        sql.push_str(" ORDER BY raw_score ASC LIMIT ?");

        let mut q = sqlx::query(&sql).bind(query);
        if let Some(v) = &filters.section_type {
            q = q.bind(v);
        }
        if let Some(v) = &filters.language {
            q = q.bind(v);
        }
        if let Some(v) = &filters.topic {
            q = q.bind(v);
        }
        if let Some(v) = &filters.document_id {
            q = q.bind(v);
        }
        q = q.bind(top_k as i64);

        let rows = q.fetch_all(&self.pool).await?;

        // FTS5's bm25() returns lower-is-better, unbounded-below scores.
        // Flip sign and min-max normalize into [0, 1].
        let raw_scores: Vec<f64> = rows
            .iter()
            .map(|r| -r.try_get::<f64, _>("raw_score").unwrap_or(0.0))
            .collect();
        let max = raw_scores.iter().cloned().fold(f64::MIN, f64::max);
        let min = raw_scores.iter().cloned().fold(f64::MAX, f64::min);
        let span = (max - min).max(f64::EPSILON);

        rows.iter()
            .zip(raw_scores)
            .map(|(row, raw)| {
                Ok(KeywordHit {
                    chunk_id: row.try_get("chunk_id")?,
                    document_id: row.try_get("document_id")?,
                    chunk_index: row.try_get("chunk_index")?,
                    text: row.try_get("text")?,
                    bm25_score: if raw_scores_is_singleton(&rows) {
                        1.0
                    } else {
                        (raw - min) / span
                    },
                    section_type: row.try_get("section_type")?,
                    topic: row.try_get("topic")?,
                })
            })
            .collect()
    }
}

fn raw_scores_is_singleton(rows: &[sqlx::sqlite::SqliteRow]) -> bool {
    rows.len() <= 1
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk_store::{ChunkStore, NewChunk};
    use crate::enricher::{ChunkMetadata, SectionType};

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

    async fn seeded() -> (ChunkStore, FullTextIndex) {
        let store = ChunkStore::connect("sqlite::memory:").await.unwrap();
        let fts = FullTextIndex::new(store.pool().clone()).await.unwrap();
        let texts = [
            "disposicion general sin palabra clave",
            "se abre licitación para obras públicas",
            "otro texto irrelevante",
            "tercer texto neutro",
            "cuarto texto neutro",
            "quinto texto neutro",
            "sexto texto neutro",
            "licitación licitación llamado a licitación urgente",
        ];
        for (i, text) in texts.iter().enumerate() {
            let mut tx = store.begin().await.unwrap();
            store
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
        }
        (store, fts)
    }

    #[tokio::test]
    async fn keyword_search_finds_only_matching_chunks() {
        let (_store, fts) = seeded().await;
        let hits = fts
            .search_bm25("licitación", 5, &KeywordFilters::default())
            .await
            .unwrap();
        assert_eq!(hits.len(), 2);
        let indexes: Vec<i64> = hits.iter().map(|h| h.chunk_index).collect();
        assert!(indexes.contains(&1));
        assert!(indexes.contains(&7));
    }

    #[tokio::test]
    async fn chunk_with_more_occurrences_scores_higher() {
        let (_store, fts) = seeded().await;
        let hits = fts
            .search_bm25("licitación", 5, &KeywordFilters::default())
            .await
            .unwrap();
        let chunk2 = hits.iter().find(|h| h.chunk_index == 1).unwrap();
        let chunk7 = hits.iter().find(|h| h.chunk_index == 7).unwrap();
        assert!(chunk7.bm25_score > chunk2.bm25_score);
        for h in &hits {
            assert!(h.bm25_score >= 0.0 && h.bm25_score <= 1.0);
        }
    }

    #[tokio::test]
    async fn fts_count_tracks_base_table_after_delete() {
        let (store, fts) = seeded().await;
        assert_eq!(fts.count_by_document("doc-1").await.unwrap(), 8);
        store.delete_by_document("doc-1").await.unwrap();
        assert_eq!(fts.count_by_document("doc-1").await.unwrap(), 0);
    }
}
