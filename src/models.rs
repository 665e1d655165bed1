//! Core data models.
//!
//! These types flow through the knowledge lifecycle: candidate payloads are
//! validated into [`QaPair`]s, live exchanges are captured as
//! [`InteractionRecord`]s, and the index returns [`IndexHit`]s that the
//! knowledge store turns into [`KnowledgeMatch`]es.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Free-form JSON object attached to index entries and interactions.
pub type Metadata = Map<String, Value>;

/// Provenance tag for pairs supplied directly by a user or import.
pub const SOURCE_USER_PROVIDED: &str = "user_provided";
/// Provenance tag for pairs learned from captured chat exchanges.
pub const SOURCE_CHAT_INTERACTION: &str = "chat_interaction";

/// A learned question/answer unit with usage statistics.
///
/// Deserialization also accepts the older knowledge-file layout
/// (`learned_timestamp`, `last_used`, `fiscal_years`, naive local
/// timestamps). Such records carry no `question_id`; the loader fills it in
/// from the question text.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QaPair {
    pub question: String,
    pub answer: String,
    #[serde(default)]
    pub question_id: String,
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(default, alias = "fiscal_years")]
    pub fiscal_periods: Vec<String>,
    #[serde(default = "full_confidence")]
    pub confidence_score: f64,
    #[serde(default)]
    pub usage_count: u64,
    #[serde(default, alias = "last_used", deserialize_with = "timestamp::deserialize_option")]
    pub last_used_at: Option<DateTime<Utc>>,
    #[serde(alias = "learned_timestamp", deserialize_with = "timestamp::deserialize")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "user_provided")]
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session: Option<Value>,
    /// Caller-supplied fields with no dedicated slot (priority, tags, ...).
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub extra: Metadata,
}

fn full_confidence() -> f64 {
    1.0
}

fn user_provided() -> String {
    SOURCE_USER_PROVIDED.to_string()
}

/// RFC 3339 timestamps, or offset-less ISO 8601 ones read as UTC.
mod timestamp {
    use chrono::{DateTime, NaiveDateTime, Utc};
    use serde::de::Error;
    use serde::{Deserialize, Deserializer};

    pub fn parse(raw: &str) -> Option<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(raw)
            .map(|t| t.with_timezone(&Utc))
            .ok()
            .or_else(|| {
                NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
                    .ok()
                    .map(|naive| naive.and_utc())
            })
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(d)?;
        parse(&raw).ok_or_else(|| D::Error::custom(format!("invalid timestamp '{}'", raw)))
    }

    pub fn deserialize_option<'de, D: Deserializer<'de>>(
        d: D,
    ) -> Result<Option<DateTime<Utc>>, D::Error> {
        match Option::<String>::deserialize(d)? {
            None => Ok(None),
            Some(raw) => parse(&raw)
                .map(Some)
                .ok_or_else(|| D::Error::custom(format!("invalid timestamp '{}'", raw))),
        }
    }
}

/// Stable identifier for a question: SHA-256 of the text as supplied.
pub fn question_id(question: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(question.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// A candidate record that passed validation, before enrichment.
#[derive(Debug, Clone, PartialEq)]
pub struct QaCandidate {
    pub question: String,
    pub answer: String,
    pub source: Option<String>,
    pub extra: Metadata,
}

/// One ingestion payload, resolved once at the boundary.
///
/// Candidates stay as raw JSON so validation can reject records with
/// missing or mistyped fields individually.
#[derive(Debug, Clone, PartialEq)]
pub enum IngestPayload {
    /// `{"question": ..., "answer": ...}`
    Single(Value),
    /// `[{"question": ..., "answer": ...}, ...]`
    List(Vec<Value>),
    /// `{"qa_pairs": [...], "session_info": {...}}`
    Envelope {
        pairs: Vec<Value>,
        session: Option<Value>,
    },
}

/// Result of one `ingest` call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    /// Records that passed validation and were written.
    pub accepted: usize,
    /// Records rejected by validation.
    pub rejected: usize,
    /// Accepted records whose question already existed.
    pub updated: usize,
    /// IDs written, in input order.
    pub question_ids: Vec<String>,
}

/// A nearest-neighbour hit returned by a [`VectorIndex`](crate::index::VectorIndex).
#[derive(Debug, Clone, PartialEq)]
pub struct IndexHit {
    pub id: String,
    pub document: String,
    pub metadata: Metadata,
    /// Smaller is closer; `0.0` is an exact match.
    pub distance: f64,
}

/// A learned pair matched by a search, with its derived confidence.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KnowledgeMatch {
    pub question_id: String,
    pub question: String,
    pub answer: String,
    pub confidence: f64,
    pub categories: Vec<String>,
    pub fiscal_periods: Vec<String>,
    pub source: String,
    pub created_at: Option<String>,
}

/// A learned answer returned by `get_answer`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LearnedAnswer {
    pub question_id: String,
    pub answer: String,
    pub confidence: f64,
    /// The answer followed by its confidence annotation.
    pub text: String,
}

/// One captured live question/answer exchange.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InteractionRecord {
    #[serde(default = "new_record_id")]
    pub id: String,
    #[serde(alias = "user_query")]
    pub query: String,
    #[serde(alias = "bot_response")]
    pub response: String,
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(alias = "timestamp", deserialize_with = "timestamp::deserialize")]
    pub captured_at: DateTime<Utc>,
    #[serde(default)]
    pub processed: bool,
    #[serde(
        default,
        alias = "learned_timestamp",
        deserialize_with = "timestamp::deserialize_option"
    )]
    pub learned_at: Option<DateTime<Utc>>,
}

fn new_record_id() -> String {
    Uuid::new_v4().to_string()
}

impl InteractionRecord {
    pub fn new(query: String, response: String, metadata: Metadata, at: DateTime<Utc>) -> Self {
        Self {
            id: new_record_id(),
            query,
            response,
            metadata,
            captured_at: at,
            processed: false,
            learned_at: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn question_id_is_stable_and_content_derived() {
        let a = question_id("What caused the Q1 outage?");
        let b = question_id("What caused the Q1 outage?");
        let c = question_id("What caused the Q2 outage?");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn interaction_record_reads_legacy_field_names() {
        let raw = serde_json::json!({
            "timestamp": "2024-03-01T10:00:00Z",
            "user_query": "How many incidents in FY2024?",
            "bot_response": "There were 42 incidents recorded in FY2024.",
            "metadata": {"channel": "web"},
            "processed": true,
            "learned_timestamp": "2024-03-01T11:00:00Z"
        });
        let record: InteractionRecord = serde_json::from_value(raw).unwrap();
        assert_eq!(record.query, "How many incidents in FY2024?");
        assert!(record.processed);
        assert!(record.learned_at.is_some());
        assert!(!record.id.is_empty());
        assert_eq!(record.metadata["channel"], "web");
    }

    #[test]
    fn qa_pair_reads_legacy_knowledge_layout() {
        let raw = serde_json::json!({
            "question": "What was Q3 FY2024 revenue?",
            "answer": "Revenue in Q3 FY2024 was 4.2 million.",
            "learned_timestamp": "2024-03-01T10:15:30.123456",
            "question_hash": "0f1e2d3c4b5a69788796a5b4c3d2e1f0",
            "answer_length": 37,
            "question_length": 27,
            "categories": ["financial"],
            "usage_count": 2,
            "last_used": "2024-03-02T08:00:00",
            "confidence_score": 1.0,
            "source": "user_provided",
            "fiscal_years": ["FY2024"]
        });
        let pair: QaPair = serde_json::from_value(raw).unwrap();
        assert!(pair.question_id.is_empty());
        assert_eq!(pair.fiscal_periods, vec!["FY2024"]);
        assert_eq!(pair.usage_count, 2);
        assert_eq!(
            pair.created_at.to_rfc3339(),
            "2024-03-01T10:15:30.123456+00:00"
        );
        assert!(pair.last_used_at.is_some());
        assert!(pair.extra.is_empty());
    }

    #[test]
    fn timestamps_accept_offsets_and_naive_values() {
        let offset = timestamp::parse("2024-03-01T15:30:00+05:30").unwrap();
        let naive = timestamp::parse("2024-03-01T10:00:00").unwrap();
        assert_eq!(offset, naive);
        assert!(timestamp::parse("yesterday").is_none());
    }
}
