//! Export learned knowledge as JSON.
//!
//! The export document carries the full pair list plus a small summary:
//!
//! ```json
//! { "qa_pairs": [...], "metadata": { "export_timestamp": "...", "total_pairs": 2, "categories": {...} } }
//! ```
//!
//! `kh export` writes it to a file or stdout; the weekly backup job writes
//! it into the backup directory.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::app::Harness;
use crate::models::QaPair;
use crate::persist::category_counts;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct KnowledgeExport {
    pub qa_pairs: Vec<QaPair>,
    pub metadata: ExportMetadata,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExportMetadata {
    pub export_timestamp: DateTime<Utc>,
    pub total_pairs: usize,
    pub categories: BTreeMap<String, usize>,
}

impl KnowledgeExport {
    pub fn new(qa_pairs: Vec<QaPair>, now: DateTime<Utc>) -> Self {
        let metadata = ExportMetadata {
            export_timestamp: now,
            total_pairs: qa_pairs.len(),
            categories: category_counts(&qa_pairs),
        };
        Self { qa_pairs, metadata }
    }
}

/// Export learned pairs as JSON.
///
/// If `output` is `Some`, writes to that file path. Otherwise writes
/// to stdout for piping.
pub async fn run_export(harness: &Harness, output: Option<&Path>) -> Result<()> {
    let export = harness.knowledge.export_all(Utc::now()).await;
    let json = serde_json::to_string_pretty(&export)?;

    match output {
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(path, &json)?;
            eprintln!(
                "Exported {} learned pairs to {}",
                export.metadata.total_pairs,
                path.display()
            );
        }
        None => {
            println!("{}", json);
        }
    }

    Ok(())
}
