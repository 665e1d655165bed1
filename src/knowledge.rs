//! Learned question/answer knowledge.
//!
//! [`KnowledgeStore`] owns the authoritative list of [`QaPair`]s. Every
//! accepted pair is written to durable storage first and then mirrored into
//! the [`KNOWLEDGE_COLLECTION`](crate::index::KNOWLEDGE_COLLECTION) index,
//! keyed by its question id. Retrieval goes through the index and converts
//! distance into confidence:
//!
//! ```text
//! confidence = clamp(1 - distance, 0, 1)
//! ```
//!
//! # Payload shapes
//!
//! | Shape | Example |
//! |-------|---------|
//! | single | `{"question": "...", "answer": "..."}` |
//! | list | `[{"question": ..., "answer": ...}, ...]` |
//! | envelope | `{"qa_pairs": [...], "session_info": {...}}` |
//!
//! A record is accepted when `question` and `answer` are non-empty strings
//! whose trimmed lengths are at least 5 and 10 characters. Rejected records
//! are logged and skipped; they never abort the rest of the payload.
//!
//! The durable list is shared with other processes on the same data
//! directory. Writes go through [`KnowledgePersistence::modify`], which
//! reloads the list under the store's lock, and reads refresh the in-memory
//! copy from storage first.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use tokio::sync::{Mutex, MutexGuard};

use crate::classify::{categorize, extract_fiscal_periods};
use crate::error::{HarnessError, HarnessResult};
use crate::export::KnowledgeExport;
use crate::index::VectorIndex;
use crate::models::{
    question_id, IngestPayload, IngestReport, KnowledgeMatch, LearnedAnswer, Metadata, QaCandidate,
    QaPair, SOURCE_USER_PROVIDED,
};
use crate::persist::KnowledgePersistence;
use crate::stats::LearningStats;

pub const MIN_QUESTION_CHARS: usize = 5;
pub const MIN_ANSWER_CHARS: usize = 10;

impl IngestPayload {
    /// Resolve the payload shape of a parsed JSON value.
    pub fn from_value(value: Value) -> HarnessResult<Self> {
        match value {
            Value::Array(items) => Ok(IngestPayload::List(items)),
            Value::Object(mut map) => {
                if let Some(pairs) = map.remove("qa_pairs") {
                    let pairs = match pairs {
                        Value::Array(items) => items,
                        _ => {
                            return Err(HarnessError::Validation(
                                "qa_pairs must be an array".to_string(),
                            ))
                        }
                    };
                    let session = map.remove("session_info").filter(|s| !s.is_null());
                    Ok(IngestPayload::Envelope { pairs, session })
                } else if map.contains_key("question") && map.contains_key("answer") {
                    Ok(IngestPayload::Single(Value::Object(map)))
                } else {
                    Err(HarnessError::Validation(
                        "object has neither qa_pairs nor question/answer".to_string(),
                    ))
                }
            }
            other => Err(HarnessError::Validation(format!(
                "unsupported payload type: {}",
                json_type_name(&other)
            ))),
        }
    }

    /// Parse JSON text and resolve its payload shape.
    pub fn from_json_str(text: &str) -> HarnessResult<Self> {
        let value: Value = serde_json::from_str(text)
            .map_err(|e| HarnessError::Validation(format!("invalid JSON: {}", e)))?;
        Self::from_value(value)
    }

    fn into_parts(self) -> (Vec<Value>, Option<Value>) {
        match self {
            IngestPayload::Single(value) => (vec![value], None),
            IngestPayload::List(items) => (items, None),
            IngestPayload::Envelope { pairs, session } => (pairs, session),
        }
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Check one raw record.
pub fn validate_candidate(raw: &Value) -> HarnessResult<QaCandidate> {
    let obj = raw
        .as_object()
        .ok_or_else(|| HarnessError::Validation("record is not an object".to_string()))?;

    let question = required_text(obj, "question", MIN_QUESTION_CHARS)?;
    let answer = required_text(obj, "answer", MIN_ANSWER_CHARS)?;
    let source = obj
        .get("source")
        .and_then(|s| s.as_str())
        .filter(|s| !s.trim().is_empty())
        .map(str::to_string);

    let mut extra = obj.clone();
    for key in ["question", "answer", "source"] {
        extra.remove(key);
    }

    Ok(QaCandidate {
        question,
        answer,
        source,
        extra,
    })
}

fn required_text(obj: &Metadata, field: &str, min_chars: usize) -> HarnessResult<String> {
    let text = match obj.get(field) {
        Some(Value::String(s)) if !s.is_empty() => s,
        Some(Value::String(_)) | None | Some(Value::Null) => {
            return Err(HarnessError::Validation(format!("{} is missing", field)))
        }
        Some(other) => {
            return Err(HarnessError::Validation(format!(
                "{} must be a string, got {}",
                field,
                json_type_name(other)
            )))
        }
    };
    let chars = text.trim().chars().count();
    if chars < min_chars {
        return Err(HarnessError::Validation(format!(
            "{} has {} characters, need at least {}",
            field, chars, min_chars
        )));
    }
    Ok(text.clone())
}

/// Build a fresh pair from a validated candidate.
pub fn enrich(candidate: QaCandidate, session: Option<Value>, now: DateTime<Utc>) -> QaPair {
    let combined = format!("{} {}", candidate.question, candidate.answer);
    QaPair {
        question_id: question_id(&candidate.question),
        categories: categorize(&candidate.question, &candidate.answer),
        fiscal_periods: extract_fiscal_periods(&combined),
        confidence_score: 1.0,
        usage_count: 0,
        last_used_at: None,
        created_at: now,
        source: candidate
            .source
            .unwrap_or_else(|| SOURCE_USER_PROVIDED.to_string()),
        session,
        extra: candidate.extra,
        question: candidate.question,
        answer: candidate.answer,
    }
}

/// Clamp `1 - distance` into `[0, 1]`.
pub fn confidence_from_distance(distance: f64) -> f64 {
    (1.0 - distance).clamp(0.0, 1.0)
}

/// Append the confidence annotation shown to users.
pub fn annotate_answer(answer: &str, confidence: f64) -> String {
    format!(
        "{}\n\n*[Learned Response - Confidence: {:.0}%]*",
        answer,
        confidence * 100.0
    )
}

fn index_metadata(pair: &QaPair) -> Metadata {
    let value = json!({
        "question_id": pair.question_id,
        "answer": pair.answer,
        "categories": pair.categories.join(","),
        "fiscal_periods": pair.fiscal_periods.join(","),
        "source": pair.source,
        "created_at": pair.created_at.to_rfc3339(),
        "confidence_score": pair.confidence_score,
    });
    match value {
        Value::Object(map) => map,
        _ => Metadata::new(),
    }
}

fn split_list(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(|v| v.as_str())
        .map(|s| {
            s.split(',')
                .filter(|p| !p.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Authoritative list of learned pairs, its durable files, and its index.
pub struct KnowledgeStore {
    pairs: Mutex<Vec<QaPair>>,
    persistence: Arc<dyn KnowledgePersistence>,
    index: Arc<dyn VectorIndex>,
}

impl KnowledgeStore {
    /// Load the durable list. A missing file opens an empty store.
    pub fn open(
        persistence: Arc<dyn KnowledgePersistence>,
        index: Arc<dyn VectorIndex>,
    ) -> HarnessResult<Self> {
        let pairs = persistence.load()?;
        tracing::info!(pairs = pairs.len(), "knowledge store opened");
        Ok(Self {
            pairs: Mutex::new(pairs),
            persistence,
            index,
        })
    }

    /// The cached list after a reload. A failed reload is logged and the
    /// last good copy is served.
    async fn current(&self) -> MutexGuard<'_, Vec<QaPair>> {
        let mut pairs = self.pairs.lock().await;
        match self.persistence.load() {
            Ok(fresh) => *pairs = fresh,
            Err(e) => tracing::warn!(error = %e, "knowledge reload failed; using cached pairs"),
        }
        pairs
    }

    pub async fn len(&self) -> usize {
        self.current().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.current().await.is_empty()
    }

    /// Snapshot of the current list.
    pub async fn pairs(&self) -> Vec<QaPair> {
        self.current().await.clone()
    }

    pub async fn ingest(&self, payload: IngestPayload) -> HarnessResult<IngestReport> {
        self.ingest_at(payload, Utc::now()).await
    }

    /// Validate, enrich, persist, and index every record of `payload`.
    ///
    /// Re-ingesting a known question replaces its answer and tags but keeps
    /// its id, creation time, usage statistics, and confidence score.
    pub async fn ingest_at(
        &self,
        payload: IngestPayload,
        now: DateTime<Utc>,
    ) -> HarnessResult<IngestReport> {
        let (records, session) = payload.into_parts();
        let mut report = IngestReport::default();
        let mut accepted = Vec::new();

        for (position, raw) in records.iter().enumerate() {
            match validate_candidate(raw) {
                Ok(candidate) => accepted.push(enrich(candidate, session.clone(), now)),
                Err(e) => {
                    report.rejected += 1;
                    tracing::warn!(position, error = %e, "invalid Q&A record skipped");
                }
            }
        }

        if accepted.is_empty() {
            return Err(HarnessError::Validation(format!(
                "no valid Q&A records in payload ({} rejected)",
                report.rejected
            )));
        }

        let mut written_ids: Vec<String> = Vec::new();
        for fresh in &accepted {
            report.accepted += 1;
            report.question_ids.push(fresh.question_id.clone());
            if !written_ids.contains(&fresh.question_id) {
                written_ids.push(fresh.question_id.clone());
            }
        }

        let mut pairs = self.pairs.lock().await;
        let mut updated = 0;
        *pairs = self.persistence.modify(now, &mut |current: &mut Vec<QaPair>| {
            updated = 0;
            for fresh in accepted.iter().cloned() {
                match current.iter_mut().find(|p| p.question_id == fresh.question_id) {
                    Some(existing) => {
                        updated += 1;
                        existing.answer = fresh.answer;
                        existing.categories = fresh.categories;
                        existing.fiscal_periods = fresh.fiscal_periods;
                        existing.source = fresh.source;
                        existing.session = fresh.session;
                        existing.extra = fresh.extra;
                    }
                    None => current.push(fresh),
                }
            }
            true
        })?;
        report.updated = updated;

        let written: Vec<&QaPair> = written_ids
            .iter()
            .filter_map(|id| pairs.iter().find(|p| &p.question_id == id))
            .collect();
        self.index_pairs(&written).await?;

        tracing::info!(
            accepted = report.accepted,
            rejected = report.rejected,
            updated = report.updated,
            total = pairs.len(),
            "ingested Q&A records"
        );
        Ok(report)
    }

    async fn index_pairs(&self, pairs: &[&QaPair]) -> HarnessResult<()> {
        let ids: Vec<String> = pairs.iter().map(|p| p.question_id.clone()).collect();
        let documents: Vec<String> = pairs.iter().map(|p| p.question.clone()).collect();
        let metadatas: Vec<Metadata> = pairs.iter().map(|p| index_metadata(p)).collect();
        self.index
            .upsert(&ids, &documents, &metadatas)
            .await
            .map_err(|e| HarnessError::Storage(format!("index upsert failed: {}", e)))
    }

    /// Learned pairs similar to `question`, most confident first.
    pub async fn search(
        &self,
        question: &str,
        limit: usize,
        min_confidence: f64,
    ) -> HarnessResult<Vec<KnowledgeMatch>> {
        if question.trim().is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        let hits = self.index.query(question, limit).await?;
        let pairs = self.current().await;

        let mut matches: Vec<KnowledgeMatch> = hits
            .into_iter()
            .filter_map(|hit| {
                let confidence = confidence_from_distance(hit.distance);
                if confidence < min_confidence {
                    return None;
                }
                let found = match pairs.iter().find(|p| p.question_id == hit.id) {
                    Some(pair) => KnowledgeMatch {
                        question_id: pair.question_id.clone(),
                        question: pair.question.clone(),
                        answer: pair.answer.clone(),
                        confidence,
                        categories: pair.categories.clone(),
                        fiscal_periods: pair.fiscal_periods.clone(),
                        source: pair.source.clone(),
                        created_at: Some(pair.created_at.to_rfc3339()),
                    },
                    None => KnowledgeMatch {
                        question_id: hit.id.clone(),
                        answer: hit
                            .metadata
                            .get("answer")
                            .and_then(|a| a.as_str())
                            .unwrap_or_default()
                            .to_string(),
                        confidence,
                        categories: split_list(hit.metadata.get("categories")),
                        fiscal_periods: split_list(hit.metadata.get("fiscal_periods")),
                        source: hit
                            .metadata
                            .get("source")
                            .and_then(|s| s.as_str())
                            .unwrap_or("unknown")
                            .to_string(),
                        created_at: hit
                            .metadata
                            .get("created_at")
                            .and_then(|c| c.as_str())
                            .map(str::to_string),
                        question: hit.document,
                    },
                };
                Some(found)
            })
            .collect();

        matches.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        Ok(matches)
    }

    /// Best learned answer for `question` when its confidence reaches
    /// `threshold`. Each returned answer bumps its pair's usage count.
    pub async fn get_answer(
        &self,
        question: &str,
        threshold: f64,
    ) -> HarnessResult<Option<LearnedAnswer>> {
        let best = match self.search(question, 1, threshold).await?.into_iter().next() {
            Some(best) if best.confidence >= threshold => best,
            _ => return Ok(None),
        };

        let now = Utc::now();
        let mut pairs = self.pairs.lock().await;
        let mut recorded = false;
        *pairs = self.persistence.modify(now, &mut |current: &mut Vec<QaPair>| {
            recorded = match current.iter_mut().find(|p| p.question_id == best.question_id) {
                Some(pair) => {
                    pair.usage_count += 1;
                    pair.last_used_at = Some(now);
                    true
                }
                None => false,
            };
            recorded
        })?;
        if !recorded {
            tracing::warn!(
                question_id = %best.question_id,
                "indexed answer has no learned pair; usage not recorded"
            );
        }

        tracing::info!(
            confidence = best.confidence,
            question_id = %best.question_id,
            "returning learned answer"
        );
        Ok(Some(LearnedAnswer {
            text: annotate_answer(&best.answer, best.confidence),
            question_id: best.question_id,
            answer: best.answer,
            confidence: best.confidence,
        }))
    }

    pub async fn export_all(&self, now: DateTime<Utc>) -> KnowledgeExport {
        let pairs = self.current().await;
        KnowledgeExport::new(pairs.clone(), now)
    }

    /// Remove every learned pair from memory, the index, and disk.
    pub async fn clear_all(&self) -> HarnessResult<()> {
        let mut pairs = self.pairs.lock().await;
        let ids = self.index.get_all_ids().await?;
        self.index.delete_by_ids(&ids).await?;
        self.persistence.clear()?;
        let cleared = pairs.len();
        pairs.clear();
        tracing::info!(cleared, index_entries = ids.len(), "learned knowledge cleared");
        Ok(())
    }

    pub async fn stats(&self, now: DateTime<Utc>) -> LearningStats {
        let pairs = self.current().await;
        LearningStats::compute(&pairs, now)
    }

    /// Re-index every pair whose id is missing from the index.
    ///
    /// Returns the number of pairs written.
    pub async fn reconcile(&self) -> HarnessResult<usize> {
        let pairs = self.current().await;
        let indexed: HashSet<String> = self.index.get_all_ids().await?.into_iter().collect();
        let missing: Vec<&QaPair> = pairs
            .iter()
            .filter(|p| !indexed.contains(&p.question_id))
            .collect();
        if missing.is_empty() {
            return Ok(0);
        }
        self.index_pairs(&missing).await?;
        tracing::info!(repaired = missing.len(), "re-indexed learned pairs");
        Ok(missing.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashEmbedder;
    use crate::index::InMemoryIndex;
    use crate::persist::JsonKnowledgeFiles;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn store(tmp: &TempDir) -> (KnowledgeStore, Arc<InMemoryIndex>) {
        let index = Arc::new(InMemoryIndex::new(Arc::new(HashEmbedder::default())));
        let store =
            KnowledgeStore::open(Arc::new(JsonKnowledgeFiles::new(tmp.path())), index.clone())
                .unwrap();
        (store, index)
    }

    fn at(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, day, 9, 0, 0).unwrap()
    }

    #[test]
    fn payload_shapes_are_resolved() {
        let single = IngestPayload::from_json_str(
            r#"{"question": "What is HEA?", "answer": "Human error avoidance."}"#,
        )
        .unwrap();
        assert!(matches!(single, IngestPayload::Single(_)));

        let list = IngestPayload::from_json_str("[]").unwrap();
        assert_eq!(list, IngestPayload::List(vec![]));

        let envelope = IngestPayload::from_json_str(
            r#"{"qa_pairs": [], "session_info": {"session_id": "s1"}}"#,
        )
        .unwrap();
        match envelope {
            IngestPayload::Envelope { session, .. } => {
                assert_eq!(session.unwrap()["session_id"], "s1")
            }
            other => panic!("unexpected payload {:?}", other),
        }

        assert!(IngestPayload::from_json_str(r#"{"title": "x"}"#).is_err());
        assert!(IngestPayload::from_json_str("42").is_err());
        assert!(IngestPayload::from_json_str("{broken").is_err());
    }

    #[test]
    fn validation_enforces_trimmed_minimums() {
        let ok = json!({"question": "Why?? ", "answer": "0123456789", "priority": "high"});
        let candidate = validate_candidate(&ok).unwrap();
        assert_eq!(candidate.question, "Why?? ");
        assert_eq!(candidate.extra["priority"], "high");

        for bad in [
            json!({"question": "  Why ", "answer": "0123456789"}),
            json!({"question": "Why now?", "answer": "   short   "}),
            json!({"question": "Why now?", "answer": 12345678901i64}),
            json!({"question": "Why now?"}),
            json!(["not", "an", "object"]),
        ] {
            assert!(matches!(
                validate_candidate(&bad),
                Err(HarnessError::Validation(_))
            ));
        }
    }

    #[test]
    fn enrichment_defaults() {
        let candidate = validate_candidate(&json!({
            "question": "What was the FY2024 budget?",
            "answer": "The FY2024 budget was $2M."
        }))
        .unwrap();
        let pair = enrich(candidate, None, at(1));
        assert_eq!(pair.source, SOURCE_USER_PROVIDED);
        assert_eq!(pair.confidence_score, 1.0);
        assert_eq!(pair.usage_count, 0);
        assert_eq!(pair.fiscal_periods, vec!["FY2024"]);
        assert!(pair.categories.contains(&"financial".to_string()));
        assert_eq!(pair.question_id, question_id("What was the FY2024 budget?"));
    }

    #[test]
    fn confidence_is_clamped() {
        assert_eq!(confidence_from_distance(0.0), 1.0);
        assert_eq!(confidence_from_distance(1.7), 0.0);
        assert_eq!(confidence_from_distance(-0.2), 1.0);
        assert!((confidence_from_distance(0.05) - 0.95).abs() < 1e-12);
    }

    #[test]
    fn answer_annotation_format() {
        assert_eq!(
            annotate_answer("Expired certificate.", 0.95),
            "Expired certificate.\n\n*[Learned Response - Confidence: 95%]*"
        );
    }

    #[tokio::test]
    async fn ingest_persists_and_indexes() {
        let tmp = TempDir::new().unwrap();
        let (store, index) = store(&tmp);

        let report = store
            .ingest_at(
                IngestPayload::List(vec![
                    json!({"question": "What caused the Q1 outage?", "answer": "An expired TLS certificate."}),
                    json!({"question": "Hi", "answer": "too short"}),
                ]),
                at(1),
            )
            .await
            .unwrap();

        assert_eq!(report.accepted, 1);
        assert_eq!(report.rejected, 1);
        assert_eq!(index.count().await.unwrap(), 1);

        let reopened = KnowledgeStore::open(
            Arc::new(JsonKnowledgeFiles::new(tmp.path())),
            index.clone(),
        )
        .unwrap();
        assert_eq!(reopened.len().await, 1);
    }

    #[tokio::test]
    async fn payload_without_valid_records_is_rejected() {
        let tmp = TempDir::new().unwrap();
        let (store, index) = store(&tmp);
        let err = store
            .ingest(IngestPayload::List(vec![json!({"question": "x", "answer": "y"})]))
            .await
            .unwrap_err();
        assert!(matches!(err, HarnessError::Validation(_)));
        assert!(store.is_empty().await);
        assert_eq!(index.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn reingest_preserves_identity_and_usage() {
        let tmp = TempDir::new().unwrap();
        let (store, _index) = store(&tmp);
        let q = "What caused the Q1 outage?";

        store
            .ingest_at(
                IngestPayload::Single(json!({"question": q, "answer": "An expired TLS certificate."})),
                at(1),
            )
            .await
            .unwrap();
        let answer = store.get_answer(q, 0.8).await.unwrap().unwrap();
        assert_eq!(answer.answer, "An expired TLS certificate.");

        let report = store
            .ingest_at(
                IngestPayload::Single(json!({"question": q, "answer": "A certificate that expired on the load balancer."})),
                at(5),
            )
            .await
            .unwrap();
        assert_eq!(report.updated, 1);

        let pairs = store.pairs().await;
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].created_at, at(1));
        assert_eq!(pairs[0].usage_count, 1);
        assert_eq!(
            pairs[0].answer,
            "A certificate that expired on the load balancer."
        );
    }

    #[tokio::test]
    async fn reconcile_restores_missing_index_entries() {
        let tmp = TempDir::new().unwrap();
        let (store, index) = store(&tmp);
        store
            .ingest(IngestPayload::List(vec![
                json!({"question": "What caused the Q1 outage?", "answer": "An expired TLS certificate."}),
                json!({"question": "Who approves the budget?", "answer": "The finance committee approves it."}),
            ]))
            .await
            .unwrap();

        let first = store.pairs().await[0].question_id.clone();
        index.delete_by_ids(&[first]).await.unwrap();

        assert_eq!(store.reconcile().await.unwrap(), 1);
        assert_eq!(index.count().await.unwrap(), 2);
        assert_eq!(store.reconcile().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn clear_all_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        let (store, index) = store(&tmp);
        store
            .ingest(IngestPayload::Single(
                json!({"question": "What caused the Q1 outage?", "answer": "An expired TLS certificate."}),
            ))
            .await
            .unwrap();

        store.clear_all().await.unwrap();
        store.clear_all().await.unwrap();
        assert!(store.is_empty().await);
        assert_eq!(index.count().await.unwrap(), 0);
        assert!(!tmp.path().join("learned_knowledge.json").exists());
        assert!(store
            .search("What caused the Q1 outage?", 5, 0.0)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn unrelated_question_returns_none() {
        let tmp = TempDir::new().unwrap();
        let (store, _index) = store(&tmp);
        store
            .ingest(IngestPayload::Single(
                json!({"question": "What caused the Q1 outage?", "answer": "An expired TLS certificate."}),
            ))
            .await
            .unwrap();
        assert!(store
            .get_answer("Describe the cafeteria menu", 0.8)
            .await
            .unwrap()
            .is_none());
        assert!(store.search("   ", 5, 0.0).await.unwrap().is_empty());
    }
}
