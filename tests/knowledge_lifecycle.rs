//! Knowledge store behaviour against an index with scripted distances.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::json;
use tempfile::TempDir;

use knowledge_harness::error::{HarnessError, HarnessResult};
use knowledge_harness::index::VectorIndex;
use knowledge_harness::knowledge::KnowledgeStore;
use knowledge_harness::models::{question_id, IndexHit, IngestPayload, Metadata};
use knowledge_harness::persist::JsonKnowledgeFiles;

/// Returns every stored entry for any query, at the distance scripted for
/// its id (1.0 when unscripted).
#[derive(Default)]
struct ScriptedIndex {
    entries: Mutex<Vec<(String, String, Metadata)>>,
    distances: Mutex<HashMap<String, f64>>,
}

impl ScriptedIndex {
    fn set_distance(&self, question: &str, distance: f64) {
        self.distances
            .lock()
            .unwrap()
            .insert(question_id(question), distance);
    }
}

#[async_trait]
impl VectorIndex for ScriptedIndex {
    async fn upsert(
        &self,
        ids: &[String],
        documents: &[String],
        metadatas: &[Metadata],
    ) -> HarnessResult<()> {
        let mut entries = self.entries.lock().unwrap();
        for ((id, doc), meta) in ids.iter().zip(documents).zip(metadatas) {
            entries.retain(|(existing, _, _)| existing != id);
            entries.push((id.clone(), doc.clone(), meta.clone()));
        }
        Ok(())
    }

    async fn query(&self, _text: &str, n: usize) -> HarnessResult<Vec<IndexHit>> {
        let distances = self.distances.lock().unwrap();
        let mut hits: Vec<IndexHit> = self
            .entries
            .lock()
            .unwrap()
            .iter()
            .map(|(id, doc, meta)| IndexHit {
                id: id.clone(),
                document: doc.clone(),
                metadata: meta.clone(),
                distance: distances.get(id).copied().unwrap_or(1.0),
            })
            .collect();
        hits.sort_by(|a, b| a.distance.partial_cmp(&b.distance).unwrap());
        hits.truncate(n);
        Ok(hits)
    }

    async fn get_all_ids(&self) -> HarnessResult<Vec<String>> {
        Ok(self
            .entries
            .lock()
            .unwrap()
            .iter()
            .map(|(id, _, _)| id.clone())
            .collect())
    }

    async fn delete_by_ids(&self, ids: &[String]) -> HarnessResult<()> {
        self.entries
            .lock()
            .unwrap()
            .retain(|(id, _, _)| !ids.contains(id));
        Ok(())
    }

    async fn count(&self) -> HarnessResult<usize> {
        Ok(self.entries.lock().unwrap().len())
    }
}

const REVENUE_Q: &str = "What was total revenue in Q3 FY2024?";
const REVENUE_A: &str = "Total revenue in Q3 FY2024 was 4.2 million.";
const HEADCOUNT_Q: &str = "How many people are on the support team?";
const HEADCOUNT_A: &str = "The support team has twelve people across two shifts.";

fn store(tmp: &TempDir) -> (KnowledgeStore, Arc<ScriptedIndex>) {
    let index = Arc::new(ScriptedIndex::default());
    let store = KnowledgeStore::open(
        Arc::new(JsonKnowledgeFiles::new(tmp.path())),
        index.clone(),
    )
    .unwrap();
    (store, index)
}

async fn seed(store: &KnowledgeStore) {
    let payload = IngestPayload::List(vec![
        json!({"question": REVENUE_Q, "answer": REVENUE_A}),
        json!({"question": HEADCOUNT_Q, "answer": HEADCOUNT_A}),
    ]);
    store.ingest(payload).await.unwrap();
}

#[tokio::test]
async fn closest_pair_ranks_first_with_annotation() {
    let tmp = TempDir::new().unwrap();
    let (store, index) = store(&tmp);
    seed(&store).await;
    index.set_distance(REVENUE_Q, 0.05);
    index.set_distance(HEADCOUNT_Q, 0.6);

    let matches = store.search("Q3 revenue?", 5, 0.0).await.unwrap();
    assert_eq!(matches.len(), 2);
    assert_eq!(matches[0].question, REVENUE_Q);
    assert!((matches[0].confidence - 0.95).abs() < 1e-9);
    assert!(matches[0].categories.contains(&"financial".to_string()));
    assert!(matches[0].confidence > matches[1].confidence);

    let answer = store.get_answer("Q3 revenue?", 0.8).await.unwrap().unwrap();
    assert_eq!(answer.answer, REVENUE_A);
    assert!(answer.text.starts_with(REVENUE_A));
    assert!(answer.text.ends_with("*[Learned Response - Confidence: 95%]*"));
}

#[tokio::test]
async fn threshold_is_inclusive() {
    let tmp = TempDir::new().unwrap();
    let (store, index) = store(&tmp);
    seed(&store).await;

    index.set_distance(REVENUE_Q, 0.25);
    let accepted = store.get_answer("revenue", 0.75).await.unwrap();
    assert_eq!(accepted.map(|a| a.answer), Some(REVENUE_A.to_string()));

    index.set_distance(REVENUE_Q, 0.25 + f64::EPSILON);
    assert!(store.get_answer("revenue", 0.75).await.unwrap().is_none());
}

#[tokio::test]
async fn usage_counts_every_returned_answer() {
    let tmp = TempDir::new().unwrap();
    let (store, index) = store(&tmp);
    seed(&store).await;
    index.set_distance(HEADCOUNT_Q, 0.1);

    for _ in 0..3 {
        assert!(store.get_answer("team size", 0.8).await.unwrap().is_some());
    }
    // A miss does not count.
    assert!(store.get_answer("team size", 0.95).await.unwrap().is_none());

    let pairs = store.pairs().await;
    let used = pairs.iter().find(|p| p.question == HEADCOUNT_Q).unwrap();
    assert_eq!(used.usage_count, 3);
    assert!(used.last_used_at.is_some());

    // Usage survives a reopen from disk.
    let reopened = KnowledgeStore::open(
        Arc::new(JsonKnowledgeFiles::new(tmp.path())),
        index.clone(),
    )
    .unwrap();
    let stats = reopened.stats(chrono::Utc::now()).await;
    assert_eq!(stats.most_used.len(), 1);
    assert_eq!(stats.most_used[0].usage_count, 3);
}

#[tokio::test]
async fn ingest_is_idempotent_per_question() {
    let tmp = TempDir::new().unwrap();
    let (store, index) = store(&tmp);
    seed(&store).await;
    seed(&store).await;

    assert_eq!(store.len().await, 2);
    assert_eq!(index.count().await.unwrap(), 2);

    let report = store
        .ingest(IngestPayload::Single(json!({
            "question": REVENUE_Q,
            "answer": "Revised: total revenue in Q3 FY2024 was 4.3 million."
        })))
        .await
        .unwrap();
    assert_eq!(report.updated, 1);
    assert_eq!(store.len().await, 2);
    let pair = store
        .pairs()
        .await
        .into_iter()
        .find(|p| p.question == REVENUE_Q)
        .unwrap();
    assert!(pair.answer.starts_with("Revised"));
}

#[tokio::test]
async fn invalid_records_are_skipped() {
    let tmp = TempDir::new().unwrap();
    let (store, _index) = store(&tmp);

    let report = store
        .ingest(IngestPayload::Envelope {
            pairs: vec![
                json!({"question": REVENUE_Q, "answer": REVENUE_A}),
                json!({"question": "Hi?", "answer": "This answer is long enough."}),
                json!({"question": HEADCOUNT_Q, "answer": "short"}),
                json!({"answer": "No question field at all here."}),
                json!("not an object"),
            ],
            session: Some(json!({"user": "analyst"})),
        })
        .await
        .unwrap();
    assert_eq!(report.accepted, 1);
    assert_eq!(report.rejected, 4);

    let pairs = store.pairs().await;
    assert_eq!(pairs.len(), 1);
    assert_eq!(pairs[0].session, Some(json!({"user": "analyst"})));

    let err = store
        .ingest(IngestPayload::Single(
            json!({"question": "Why?", "answer": "Too short"}),
        ))
        .await
        .unwrap_err();
    assert!(matches!(err, HarnessError::Validation(_)));
    assert_eq!(store.len().await, 1);
}
