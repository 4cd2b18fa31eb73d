/**
 * Relational Chunk Store (C4)
 * Durable, source-of-truth store of chunk rows keyed by (document_id, chunk_index).
 * Backed by SQLite via sqlx; a FTS5 shadow table (fulltext.rs) is kept in sync
 * by triggers installed on the table this module owns.
 */

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, SqlitePool};

use crate::enricher::{ChunkMetadata, SectionType};
use crate::error::{DircError, DircResult};

/// One durable chunk row (spec.md §3's Chunk entity).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChunkRow {
    pub chunk_id: i64,
    pub document_id: String,
    pub chunk_index: i64,
    pub chunk_hash: String,
    pub text: String,
    pub num_chars: i64,
    pub start_char: i64,
    pub end_char: i64,
    pub section_type: SectionType,
    pub language: String,
    pub has_tables: bool,
    pub has_amounts: bool,
    pub entities: Option<HashMap<String, Vec<String>>>,
    pub topic: Option<String>,
    pub embedding_model: Option<String>,
    pub embedding_dimensions: Option<i64>,
    pub indexed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Fields needed to insert a new chunk row, before indexing bookkeeping is set.
#[derive(Debug, Clone)]
pub struct NewChunk<'a> {
    pub document_id: &'a str,
    pub chunk_index: i64,
    pub chunk_hash: &'a str,
    pub text: &'a str,
    pub num_chars: i64,
    pub start_char: i64,
    pub end_char: i64,
    pub metadata: &'a ChunkMetadata,
}

fn section_type_from_str(s: &str) -> SectionType {
    match s {
        "decree" => SectionType::Decree,
        "resolution" => SectionType::Resolution,
        "tender" => SectionType::Tender,
        "subsidy" => SectionType::Subsidy,
        "appointment" => SectionType::Appointment,
        "budget" => SectionType::Budget,
        _ => SectionType::General,
    }
}

fn row_to_chunk_row(row: &sqlx::sqlite::SqliteRow) -> DircResult<ChunkRow> {
    let entities_json: Option<String> = row.try_get("entities")?;
    let entities = entities_json
        .map(|s| serde_json::from_str(&s))
        .transpose()?;

    Ok(ChunkRow {
        chunk_id: row.try_get("chunk_id")?,
        document_id: row.try_get("document_id")?,
        chunk_index: row.try_get("chunk_index")?,
        chunk_hash: row.try_get("chunk_hash")?,
        text: row.try_get("text")?,
        num_chars: row.try_get("num_chars")?,
        start_char: row.try_get("start_char")?,
        end_char: row.try_get("end_char")?,
        section_type: section_type_from_str(row.try_get::<String, _>("section_type")?.as_str()),
        language: row.try_get("language")?,
        has_tables: row.try_get::<i64, _>("has_tables")? != 0,
        has_amounts: row.try_get::<i64, _>("has_amounts")? != 0,
        entities,
        topic: row.try_get("topic")?,
        embedding_model: row.try_get("embedding_model")?,
        embedding_dimensions: row.try_get("embedding_dimensions")?,
        indexed_at: row.try_get("indexed_at")?,
        created_at: row.try_get("created_at")?,
    })
}

/// Durable chunk store. Owns the `chunks` table and the FTS5 triggers that
/// keep `fulltext.rs`'s shadow index in lock-step (INV-1).
#[derive(Clone)]
pub struct ChunkStore {
    pool: SqlitePool,
}

impl ChunkStore {
    pub async fn connect(database_url: &str) -> DircResult<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect(database_url)
            .await?;
        let store = Self { pool };
        store.create_schema().await?;
        Ok(store)
    }

    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn create_schema(&self) -> DircResult<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS chunks (
                chunk_id INTEGER PRIMARY KEY AUTOINCREMENT,
                document_id TEXT NOT NULL,
                chunk_index INTEGER NOT NULL,
                chunk_hash TEXT NOT NULL,
                text TEXT NOT NULL,
                num_chars INTEGER NOT NULL,
                start_char INTEGER NOT NULL,
                end_char INTEGER NOT NULL,
                section_type TEXT NOT NULL,
                language TEXT NOT NULL,
                has_tables INTEGER NOT NULL DEFAULT 0,
                has_amounts INTEGER NOT NULL DEFAULT 0,
                entities TEXT,
                topic TEXT,
                embedding_model TEXT,
                embedding_dimensions INTEGER,
                indexed_at TEXT,
                created_at TEXT NOT NULL,
                UNIQUE(document_id, chunk_index)
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_chunks_document ON chunks(document_id, chunk_index)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Insert a chunk row within an existing transaction, returning the
    /// generated `chunk_id` without committing (orchestrator protocol, spec.md §4.7).
    pub async fn insert_tx(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
        chunk: &NewChunk<'_>,
    ) -> DircResult<i64> {
        let entities_json = chunk
            .metadata
            .entities
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let now = Utc::now();

        let result = sqlx::query(
            "INSERT INTO chunks (
                document_id, chunk_index, chunk_hash, text, num_chars, start_char, end_char,
                section_type, language, has_tables, has_amounts, entities, topic, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(chunk.document_id)
        .bind(chunk.chunk_index)
        .bind(chunk.chunk_hash)
        .bind(chunk.text)
        .bind(chunk.num_chars)
        .bind(chunk.start_char)
        .bind(chunk.end_char)
        .bind(chunk.metadata.section_type.as_str())
        .bind(&chunk.metadata.language)
        .bind(chunk.metadata.has_tables as i64)
        .bind(chunk.metadata.has_amounts as i64)
        .bind(entities_json)
        .bind(&chunk.metadata.topic)
        .bind(now)
        .execute(&mut **tx)
        .await?;

        Ok(result.last_insert_rowid())
    }

    /// Mark a chunk fully indexed (INV-5): only called after C5 and C6 both succeed.
    pub async fn set_indexed_at_tx(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
        chunk_id: i64,
        embedding_model: &str,
        embedding_dimensions: i64,
    ) -> DircResult<()> {
        sqlx::query(
            "UPDATE chunks SET indexed_at = ?, embedding_model = ?, embedding_dimensions = ? WHERE chunk_id = ?",
        )
        .bind(Utc::now())
        .bind(embedding_model)
        .bind(embedding_dimensions)
        .bind(chunk_id)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    pub async fn begin(&self) -> DircResult<sqlx::Transaction<'_, sqlx::Sqlite>> {
        Ok(self.pool.begin().await?)
    }

    /// Delete a single chunk by id. Cascades to the FTS shadow table via trigger.
    pub async fn delete_by_id(&self, chunk_id: i64) -> DircResult<()> {
        sqlx::query("DELETE FROM chunks WHERE chunk_id = ?")
            .bind(chunk_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Delete every chunk belonging to a document. Cheap: single indexed scan.
    pub async fn delete_by_document(&self, document_id: &str) -> DircResult<u64> {
        let result = sqlx::query("DELETE FROM chunks WHERE document_id = ?")
            .bind(document_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// All chunks for a document, ordered by `chunk_index` ascending.
    pub async fn get_by_document(&self, document_id: &str) -> DircResult<Vec<ChunkRow>> {
        let rows = sqlx::query("SELECT * FROM chunks WHERE document_id = ? ORDER BY chunk_index ASC")
            .bind(document_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_chunk_row).collect()
    }

    /// Point lookup by primary key, used when a leg only knows the `chunk_id`
    /// (e.g. a vector-store hit).
    pub async fn get_by_id(&self, chunk_id: i64) -> DircResult<Option<ChunkRow>> {
        let row = sqlx::query("SELECT * FROM chunks WHERE chunk_id = ?")
            .bind(chunk_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_chunk_row).transpose()
    }

    /// Point lookup by the store's natural key.
    pub async fn get_by_document_and_index(
        &self,
        document_id: &str,
        chunk_index: i64,
    ) -> DircResult<Option<ChunkRow>> {
        let row = sqlx::query("SELECT * FROM chunks WHERE document_id = ? AND chunk_index = ?")
            .bind(document_id)
            .bind(chunk_index)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_chunk_row).transpose()
    }

    /// Count of rows for a document; used by `verify` (P-1).
    pub async fn count_by_document(&self, document_id: &str) -> DircResult<i64> {
        let row = sqlx::query("SELECT COUNT(*) as n FROM chunks WHERE document_id = ?")
            .bind(document_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get("n")?)
    }

    /// Distinct `chunk_index` values for a document, used to check INV-3 density.
    pub async fn chunk_indexes(&self, document_id: &str) -> DircResult<Vec<i64>> {
        let rows = sqlx::query(
            "SELECT chunk_index FROM chunks WHERE document_id = ? ORDER BY chunk_index ASC",
        )
        .bind(document_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(|r| r.try_get("chunk_index").map_err(DircError::from)).collect()
    }
}

/// INV-3: `chunk_index` values for a document form a dense `0..N-1` range.
pub fn is_dense(indexes: &[i64]) -> bool {
    indexes
        .iter()
        .enumerate()
        .all(|(i, &idx)| idx == i as i64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_metadata() -> ChunkMetadata {
        ChunkMetadata {
            chunk_hash: "abc123".to_string(),
            section_type: SectionType::Decree,
            language: "es".to_string(),
            has_tables: false,
            has_amounts: true,
            entities: None,
            topic: None,
        }
    }

    async fn store() -> ChunkStore {
        ChunkStore::connect("sqlite::memory:").await.unwrap()
    }

    #[tokio::test]
    async fn insert_and_read_back_roundtrips() {
        let store = store().await;
        let metadata = sample_metadata();
        let mut tx = store.begin().await.unwrap();
        let chunk_id = store
            .insert_tx(
                &mut tx,
                &NewChunk {
                    document_id: "doc-1",
                    chunk_index: 0,
                    chunk_hash: &metadata.chunk_hash,
                    text: "DECRETO 1 dispone",
                    num_chars: 17,
                    start_char: 0,
                    end_char: 17,
                    metadata: &metadata,
                },
            )
            .await
            .unwrap();
        tx.commit().await.unwrap();

        let row = store
            .get_by_document_and_index("doc-1", 0)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.chunk_id, chunk_id);
        assert_eq!(row.text, "DECRETO 1 dispone");
        assert!(row.indexed_at.is_none());
    }

    #[tokio::test]
    async fn unique_constraint_rejects_duplicate_index() {
        let store = store().await;
        let metadata = sample_metadata();
        let mut tx = store.begin().await.unwrap();
        store
            .insert_tx(
                &mut tx,
                &NewChunk {
                    document_id: "doc-2",
                    chunk_index: 0,
                    chunk_hash: "h1",
                    text: "first",
                    num_chars: 5,
                    start_char: 0,
                    end_char: 5,
                    metadata: &metadata,
                },
            )
            .await
            .unwrap();
        tx.commit().await.unwrap();

        let mut tx2 = store.begin().await.unwrap();
        let result = store
            .insert_tx(
                &mut tx2,
                &NewChunk {
                    document_id: "doc-2",
                    chunk_index: 0,
                    chunk_hash: "h2",
                    text: "second",
                    num_chars: 6,
                    start_char: 0,
                    end_char: 6,
                    metadata: &metadata,
                },
            )
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn delete_by_document_removes_all_rows() {
        let store = store().await;
        let metadata = sample_metadata();
        for i in 0..3 {
            let mut tx = store.begin().await.unwrap();
            store
                .insert_tx(
                    &mut tx,
                    &NewChunk {
                        document_id: "doc-3",
                        chunk_index: i,
                        chunk_hash: "h",
                        text: "x",
                        num_chars: 1,
                        start_char: 0,
                        end_char: 1,
                        metadata: &metadata,
                    },
                )
                .await
                .unwrap();
            tx.commit().await.unwrap();
        }
        assert_eq!(store.count_by_document("doc-3").await.unwrap(), 3);
        store.delete_by_document("doc-3").await.unwrap();
        assert_eq!(store.count_by_document("doc-3").await.unwrap(), 0);
    }

    #[test]
    fn density_check_accepts_dense_and_rejects_gaps() {
        assert!(is_dense(&[0, 1, 2, 3]));
        assert!(!is_dense(&[0, 1, 3]));
        assert!(is_dense(&[]));
    }
}
