//! SQLite-backed [`VectorIndex`].
//!
//! Each entry is one row of `index_entries`, scoped by collection name, with
//! its embedding stored as a little-endian `f32` BLOB. Queries load the
//! collection's vectors and rank them by brute-force cosine distance.

use std::sync::Arc;

use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use crate::embedding::{blob_to_vec, cosine_distance, embed_one, vec_to_blob, Embedder};
use crate::error::HarnessResult;
use crate::models::{IndexHit, Metadata};

use super::{check_parallel, rank_hits, VectorIndex};

/// SQLite implementation of [`VectorIndex`] for one named collection.
///
/// Several collections share the same pool and table.
pub struct SqliteIndex {
    pool: SqlitePool,
    collection: String,
    embedder: Arc<dyn Embedder>,
}

impl SqliteIndex {
    pub fn new(pool: SqlitePool, collection: impl Into<String>, embedder: Arc<dyn Embedder>) -> Self {
        Self {
            pool,
            collection: collection.into(),
            embedder,
        }
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }
}

/// Stored metadata for one row. A corrupt value is logged and read as empty
/// so the rest of the collection stays queryable.
fn parse_metadata(collection: &str, id: &str, raw: &str) -> Metadata {
    match serde_json::from_str(raw) {
        Ok(metadata) => metadata,
        Err(e) => {
            tracing::warn!(collection, id, error = %e, "corrupt index metadata; using empty metadata");
            Metadata::new()
        }
    }
}

#[async_trait]
impl VectorIndex for SqliteIndex {
    async fn upsert(
        &self,
        ids: &[String],
        documents: &[String],
        metadatas: &[Metadata],
    ) -> HarnessResult<()> {
        check_parallel(ids, documents, metadatas)?;
        if ids.is_empty() {
            return Ok(());
        }

        let vectors = self.embedder.embed(documents).await?;
        let now = chrono::Utc::now().timestamp();
        let model = self.embedder.model_name().to_string();

        let mut tx = self.pool.begin().await?;
        for ((id, document), (metadata, vector)) in ids
            .iter()
            .zip(documents)
            .zip(metadatas.iter().zip(vectors.iter()))
        {
            let metadata_json = serde_json::to_string(metadata)?;
            sqlx::query(
                r#"
                INSERT INTO index_entries (collection, id, document, metadata_json,
                                           embedding, model, dims, updated_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(collection, id) DO UPDATE SET
                    document = excluded.document,
                    metadata_json = excluded.metadata_json,
                    embedding = excluded.embedding,
                    model = excluded.model,
                    dims = excluded.dims,
                    updated_at = excluded.updated_at
                "#,
            )
            .bind(&self.collection)
            .bind(id)
            .bind(document)
            .bind(&metadata_json)
            .bind(vec_to_blob(vector))
            .bind(&model)
            .bind(vector.len() as i64)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn query(&self, text: &str, n: usize) -> HarnessResult<Vec<IndexHit>> {
        if n == 0 || self.count().await? == 0 {
            return Ok(Vec::new());
        }
        let query_vec = embed_one(self.embedder.as_ref(), text).await?;

        let rows = sqlx::query(
            "SELECT id, document, metadata_json, embedding FROM index_entries \
             WHERE collection = ? ORDER BY rowid",
        )
        .bind(&self.collection)
        .fetch_all(&self.pool)
        .await?;

        let mut hits = Vec::with_capacity(rows.len());
        for row in &rows {
            let id: String = row.get("id");
            let metadata_json: String = row.get("metadata_json");
            let blob: Vec<u8> = row.get("embedding");
            hits.push(IndexHit {
                metadata: parse_metadata(&self.collection, &id, &metadata_json),
                id,
                document: row.get("document"),
                distance: cosine_distance(&query_vec, &blob_to_vec(&blob)),
            });
        }
        Ok(rank_hits(hits, n))
    }

    async fn get_all_ids(&self) -> HarnessResult<Vec<String>> {
        let ids: Vec<String> =
            sqlx::query_scalar("SELECT id FROM index_entries WHERE collection = ? ORDER BY rowid")
                .bind(&self.collection)
                .fetch_all(&self.pool)
                .await?;
        Ok(ids)
    }

    async fn delete_by_ids(&self, ids: &[String]) -> HarnessResult<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await?;
        for id in ids {
            sqlx::query("DELETE FROM index_entries WHERE collection = ? AND id = ?")
                .bind(&self.collection)
                .bind(id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn count(&self) -> HarnessResult<usize> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM index_entries WHERE collection = ?")
                .bind(&self.collection)
                .fetch_one(&self.pool)
                .await?;
        Ok(count as usize)
    }

    /// Checkpoint the WAL into the main database file.
    async fn flush(&self) -> HarnessResult<()> {
        sqlx::query("PRAGMA wal_checkpoint(TRUNCATE)")
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
