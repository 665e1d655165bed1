//! Vector index abstraction.
//!
//! The [`VectorIndex`] trait is the only view the knowledge store and the
//! spreadsheet loader have of similarity search. Two implementations ship
//! with the crate:
//!
//! | Type | Backing | Use |
//! |------|---------|-----|
//! | [`SqliteIndex`] | `index_entries` table, embeddings as BLOBs | default, durable |
//! | [`InMemoryIndex`] | `HashMap` behind a `RwLock` | tests, ephemeral runs |
//!
//! Both embed text through an [`Embedder`](crate::embedding::Embedder) and
//! rank by cosine distance (`1 - cos`), ascending.

pub mod memory;
pub mod sqlite;

use async_trait::async_trait;

use crate::error::{HarnessError, HarnessResult};
use crate::models::{IndexHit, Metadata};

pub use memory::InMemoryIndex;
pub use sqlite::SqliteIndex;

/// Collection holding learned question/answer pairs, keyed by question id.
pub const KNOWLEDGE_COLLECTION: &str = "learned_qa";
/// Collection holding rows loaded from spreadsheets.
pub const OPERATIONS_COLLECTION: &str = "operations";

/// Nearest-neighbour text index keyed by string ids.
///
/// Upserting an existing id replaces its document, metadata, and vector.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Insert or replace entries. The three slices are parallel.
    async fn upsert(
        &self,
        ids: &[String],
        documents: &[String],
        metadatas: &[Metadata],
    ) -> HarnessResult<()>;

    /// Up to `n` nearest entries to `text`, closest first.
    async fn query(&self, text: &str, n: usize) -> HarnessResult<Vec<IndexHit>>;

    async fn get_all_ids(&self) -> HarnessResult<Vec<String>>;

    /// Remove entries; unknown ids are ignored.
    async fn delete_by_ids(&self, ids: &[String]) -> HarnessResult<()>;

    async fn count(&self) -> HarnessResult<usize>;

    /// Make every committed write visible to a file-level copy of the index.
    async fn flush(&self) -> HarnessResult<()> {
        Ok(())
    }
}

pub(crate) fn check_parallel(
    ids: &[String],
    documents: &[String],
    metadatas: &[Metadata],
) -> HarnessResult<()> {
    if ids.len() != documents.len() || ids.len() != metadatas.len() {
        return Err(HarnessError::Validation(format!(
            "upsert slices differ in length: {} ids, {} documents, {} metadatas",
            ids.len(),
            documents.len(),
            metadatas.len()
        )));
    }
    Ok(())
}

/// Sort hits by ascending distance, keeping insertion order for ties, and
/// keep the first `n`.
pub(crate) fn rank_hits(mut hits: Vec<IndexHit>, n: usize) -> Vec<IndexHit> {
    hits.sort_by(|a, b| {
        a.distance
            .partial_cmp(&b.distance)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    hits.truncate(n);
    hits
}
