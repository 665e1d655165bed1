//! In-memory [`VectorIndex`] for tests and ephemeral runs.
//!
//! Entries live in a `HashMap` behind a `tokio::sync::RwLock`. Queries are
//! brute-force cosine distance over every stored vector.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::embedding::{cosine_distance, embed_one, Embedder};
use crate::error::HarnessResult;
use crate::models::{IndexHit, Metadata};

use super::{check_parallel, rank_hits, VectorIndex};

struct StoredEntry {
    document: String,
    metadata: Metadata,
    vector: Vec<f32>,
    /// Insertion sequence; keeps tie order stable across queries.
    seq: u64,
}

pub struct InMemoryIndex {
    embedder: Arc<dyn Embedder>,
    entries: RwLock<HashMap<String, StoredEntry>>,
    next_seq: std::sync::atomic::AtomicU64,
}

impl InMemoryIndex {
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        Self {
            embedder,
            entries: RwLock::new(HashMap::new()),
            next_seq: std::sync::atomic::AtomicU64::new(0),
        }
    }
}

#[async_trait]
impl VectorIndex for InMemoryIndex {
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

        let mut entries = self.entries.write().await;
        for ((id, document), (metadata, vector)) in ids
            .iter()
            .zip(documents)
            .zip(metadatas.iter().zip(vectors))
        {
            let seq = match entries.get(id) {
                Some(existing) => existing.seq,
                None => self
                    .next_seq
                    .fetch_add(1, std::sync::atomic::Ordering::Relaxed),
            };
            entries.insert(
                id.clone(),
                StoredEntry {
                    document: document.clone(),
                    metadata: metadata.clone(),
                    vector,
                    seq,
                },
            );
        }
        Ok(())
    }

    async fn query(&self, text: &str, n: usize) -> HarnessResult<Vec<IndexHit>> {
        if n == 0 || self.entries.read().await.is_empty() {
            return Ok(Vec::new());
        }
        let query_vec = embed_one(self.embedder.as_ref(), text).await?;

        let entries = self.entries.read().await;
        let mut ordered: Vec<(&String, &StoredEntry)> = entries.iter().collect();
        ordered.sort_by_key(|(_, entry)| entry.seq);

        let hits = ordered
            .into_iter()
            .map(|(id, entry)| IndexHit {
                id: id.clone(),
                document: entry.document.clone(),
                metadata: entry.metadata.clone(),
                distance: cosine_distance(&query_vec, &entry.vector),
            })
            .collect();
        Ok(rank_hits(hits, n))
    }

    async fn get_all_ids(&self) -> HarnessResult<Vec<String>> {
        let entries = self.entries.read().await;
        let mut ordered: Vec<(&String, u64)> =
            entries.iter().map(|(id, e)| (id, e.seq)).collect();
        ordered.sort_by_key(|(_, seq)| *seq);
        Ok(ordered.into_iter().map(|(id, _)| id.clone()).collect())
    }

    async fn delete_by_ids(&self, ids: &[String]) -> HarnessResult<()> {
        let mut entries = self.entries.write().await;
        for id in ids {
            entries.remove(id);
        }
        Ok(())
    }

    async fn count(&self) -> HarnessResult<usize> {
        Ok(self.entries.read().await.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashEmbedder;

    fn index() -> InMemoryIndex {
        InMemoryIndex::new(Arc::new(HashEmbedder::default()))
    }

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn exact_text_is_nearest_with_zero_distance() {
        let index = index();
        index
            .upsert(
                &strings(&["a", "b"]),
                &strings(&["What caused the Q1 outage?", "Quarterly revenue summary"]),
                &[Metadata::new(), Metadata::new()],
            )
            .await
            .unwrap();

        let hits = index.query("What caused the Q1 outage?", 2).await.unwrap();
        assert_eq!(hits[0].id, "a");
        assert!(hits[0].distance < 1e-6);
        assert!(hits[1].distance > hits[0].distance);
    }

    #[tokio::test]
    async fn upsert_replaces_existing_id() {
        let index = index();
        let mut meta = Metadata::new();
        meta.insert("v".into(), 1.into());
        index
            .upsert(&strings(&["a"]), &strings(&["first"]), &[meta.clone()])
            .await
            .unwrap();
        meta.insert("v".into(), 2.into());
        index
            .upsert(&strings(&["a"]), &strings(&["second"]), &[meta])
            .await
            .unwrap();

        assert_eq!(index.count().await.unwrap(), 1);
        let hits = index.query("second", 1).await.unwrap();
        assert_eq!(hits[0].document, "second");
        assert_eq!(hits[0].metadata["v"], 2);
    }

    #[tokio::test]
    async fn delete_and_empty_query() {
        let index = index();
        assert!(index.query("anything", 5).await.unwrap().is_empty());

        index
            .upsert(
                &strings(&["a", "b"]),
                &strings(&["one", "two"]),
                &[Metadata::new(), Metadata::new()],
            )
            .await
            .unwrap();
        index
            .delete_by_ids(&strings(&["a", "missing"]))
            .await
            .unwrap();
        assert_eq!(index.get_all_ids().await.unwrap(), vec!["b"]);
    }

    #[tokio::test]
    async fn mismatched_slices_are_rejected() {
        let err = index()
            .upsert(&strings(&["a"]), &[], &[])
            .await
            .unwrap_err();
        assert!(matches!(err, crate::error::HarnessError::Validation(_)));
    }
}
