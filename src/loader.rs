//! Spreadsheet rows into the operations index.
//!
//! Each non-empty row becomes one [`RowDocument`]:
//!
//! - **document** — `"<column>: <value>"` for every non-empty cell, joined by `" | "`
//! - **metadata** — cell values under normalized column names, plus
//!   `source`, `file_name`, `row_index`, and `loaded_at`
//! - **id** — `sheet_<file name with '.' replaced by '_'>_<row index>`
//!
//! Documents are committed in fixed-size batches. When a batch fails, the
//! batches already committed stay in the index and the rest of the file is
//! abandoned; the returned [`LoadReport`] says how far the load got.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::error::HarnessResult;
use crate::index::VectorIndex;
use crate::models::Metadata;
use crate::spreadsheet::{normalize_column, read_table, SourceTable};

/// Provenance tag on every loaded row.
pub const SOURCE_SPREADSHEET: &str = "spreadsheet_import";

#[derive(Debug, Clone, PartialEq)]
pub struct RowDocument {
    pub id: String,
    pub document: String,
    pub metadata: Metadata,
}

/// Outcome of loading one file.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoadReport {
    pub file: PathBuf,
    /// Data rows in the sheet, including empty ones.
    pub rows_read: usize,
    pub committed: usize,
    pub batches_committed: usize,
    /// Error that stopped the load part way through.
    pub failure: Option<String>,
}

impl LoadReport {
    pub fn is_complete(&self) -> bool {
        self.failure.is_none()
    }
}

/// Index id for row `row_index` of `file_name`.
pub fn row_id(file_name: &str, row_index: usize) -> String {
    format!("sheet_{}_{}", file_name.replace('.', "_"), row_index)
}

/// Turn table rows into index documents, skipping rows with no values.
pub fn build_documents(
    file_name: &str,
    table: &SourceTable,
    loaded_at: DateTime<Utc>,
) -> Vec<RowDocument> {
    let loaded_at = loaded_at.to_rfc3339();
    let keys: Vec<String> = table.columns.iter().map(|c| normalize_column(c)).collect();

    table
        .rows
        .iter()
        .enumerate()
        .filter_map(|(row_index, row)| {
            let mut parts = Vec::new();
            let mut metadata = Metadata::new();

            for ((column, key), cell) in table.columns.iter().zip(&keys).zip(row) {
                if let Some(value) = cell {
                    parts.push(format!("{}: {}", column, value));
                    metadata.insert(key.clone(), Value::String(value.clone()));
                }
            }
            if parts.is_empty() {
                return None;
            }

            metadata.insert("source".into(), SOURCE_SPREADSHEET.into());
            metadata.insert("file_name".into(), file_name.into());
            metadata.insert("row_index".into(), row_index.into());
            metadata.insert("loaded_at".into(), loaded_at.clone().into());

            Some(RowDocument {
                id: row_id(file_name, row_index),
                document: parts.join(" | "),
                metadata,
            })
        })
        .collect()
}

pub struct SpreadsheetLoader {
    index: Arc<dyn VectorIndex>,
    batch_size: usize,
}

impl SpreadsheetLoader {
    pub fn new(index: Arc<dyn VectorIndex>, batch_size: usize) -> Self {
        Self {
            index,
            batch_size: batch_size.max(1),
        }
    }

    /// Read `path` and commit its rows in batches.
    ///
    /// An unreadable file is an error and nothing is written. A failing
    /// batch is reported in the returned [`LoadReport`], not as an error.
    pub async fn load_source(&self, path: &Path) -> HarnessResult<LoadReport> {
        let table = read_table(path)?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let documents = build_documents(&file_name, &table, Utc::now());

        tracing::info!(
            file = %path.display(),
            rows = table.rows.len(),
            documents = documents.len(),
            "loading spreadsheet"
        );

        let mut report = LoadReport {
            file: path.to_path_buf(),
            rows_read: table.rows.len(),
            committed: 0,
            batches_committed: 0,
            failure: None,
        };

        for (batch_no, batch) in documents.chunks(self.batch_size).enumerate() {
            let ids: Vec<String> = batch.iter().map(|d| d.id.clone()).collect();
            let texts: Vec<String> = batch.iter().map(|d| d.document.clone()).collect();
            let metadatas: Vec<Metadata> = batch.iter().map(|d| d.metadata.clone()).collect();

            match self.index.upsert(&ids, &texts, &metadatas).await {
                Ok(()) => {
                    report.committed += batch.len();
                    report.batches_committed += 1;
                    tracing::debug!(
                        batch = batch_no + 1,
                        committed = report.committed,
                        "batch committed"
                    );
                }
                Err(e) => {
                    tracing::error!(
                        file = %path.display(),
                        batch = batch_no + 1,
                        committed = report.committed,
                        error = %e,
                        "batch failed; abandoning remaining rows"
                    );
                    report.failure = Some(e.to_string());
                    break;
                }
            }
        }

        tracing::info!(
            file = %path.display(),
            committed = report.committed,
            complete = report.is_complete(),
            "spreadsheet load finished"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashEmbedder;
    use crate::error::HarnessError;
    use crate::index::InMemoryIndex;
    use crate::models::IndexHit;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    fn table() -> SourceTable {
        SourceTable {
            columns: vec!["Incident ID".into(), "Root Cause".into()],
            rows: vec![
                vec![Some("INC-1".into()), Some("Config error".into())],
                vec![None, None],
                vec![Some("INC-3".into()), None],
            ],
        }
    }

    #[test]
    fn documents_skip_empty_rows_and_keep_row_positions() {
        let at = Utc.with_ymd_and_hms(2024, 3, 1, 22, 30, 0).unwrap();
        let docs = build_documents("q1.report.xlsx", &table(), at);

        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].id, "sheet_q1_report_xlsx_0");
        assert_eq!(docs[0].document, "Incident ID: INC-1 | Root Cause: Config error");
        assert_eq!(docs[0].metadata["root_cause"], "Config error");
        assert_eq!(docs[0].metadata["source"], SOURCE_SPREADSHEET);
        assert_eq!(docs[0].metadata["row_index"], 0);
        assert_eq!(docs[1].id, "sheet_q1_report_xlsx_2");
        assert_eq!(docs[1].document, "Incident ID: INC-3");
        assert!(docs[1].metadata.get("root_cause").is_none());
    }

    /// Index that fails every upsert after the first `ok_batches`.
    struct FailingIndex {
        inner: InMemoryIndex,
        ok_batches: usize,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl VectorIndex for FailingIndex {
        async fn upsert(
            &self,
            ids: &[String],
            documents: &[String],
            metadatas: &[Metadata],
        ) -> HarnessResult<()> {
            if self.calls.fetch_add(1, Ordering::SeqCst) >= self.ok_batches {
                return Err(HarnessError::Storage("disk full".into()));
            }
            self.inner.upsert(ids, documents, metadatas).await
        }
        async fn query(&self, text: &str, n: usize) -> HarnessResult<Vec<IndexHit>> {
            self.inner.query(text, n).await
        }
        async fn get_all_ids(&self) -> HarnessResult<Vec<String>> {
            self.inner.get_all_ids().await
        }
        async fn delete_by_ids(&self, ids: &[String]) -> HarnessResult<()> {
            self.inner.delete_by_ids(ids).await
        }
        async fn count(&self) -> HarnessResult<usize> {
            self.inner.count().await
        }
    }

    fn write_rows(dir: &Path, rows: usize) -> PathBuf {
        let mut csv = String::from("Incident ID,Root Cause\n");
        for i in 0..rows {
            csv.push_str(&format!("INC-{},Cause {}\n", i, i));
        }
        let path = dir.join("incidents.csv");
        std::fs::write(&path, csv).unwrap();
        path
    }

    #[tokio::test]
    async fn loads_in_batches() {
        let tmp = TempDir::new().unwrap();
        let path = write_rows(tmp.path(), 250);
        let index = Arc::new(InMemoryIndex::new(Arc::new(HashEmbedder::new(32))));
        let loader = SpreadsheetLoader::new(index.clone(), 100);

        let report = loader.load_source(&path).await.unwrap();
        assert!(report.is_complete());
        assert_eq!(report.committed, 250);
        assert_eq!(report.batches_committed, 3);
        assert_eq!(index.count().await.unwrap(), 250);

        // Reloading the same file replaces rows instead of duplicating them.
        loader.load_source(&path).await.unwrap();
        assert_eq!(index.count().await.unwrap(), 250);
    }

    #[tokio::test]
    async fn failed_batch_keeps_earlier_batches() {
        let tmp = TempDir::new().unwrap();
        let path = write_rows(tmp.path(), 250);
        let index = Arc::new(FailingIndex {
            inner: InMemoryIndex::new(Arc::new(HashEmbedder::new(32))),
            ok_batches: 1,
            calls: AtomicUsize::new(0),
        });
        let loader = SpreadsheetLoader::new(index.clone(), 100);

        let report = loader.load_source(&path).await.unwrap();
        assert!(!report.is_complete());
        assert_eq!(report.committed, 100);
        assert_eq!(report.batches_committed, 1);
        assert_eq!(index.calls.load(Ordering::SeqCst), 2);
        assert_eq!(index.count().await.unwrap(), 100);
    }

    #[tokio::test]
    async fn unreadable_file_writes_nothing() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("broken.xlsx");
        std::fs::write(&path, "garbage").unwrap();
        let index = Arc::new(InMemoryIndex::new(Arc::new(HashEmbedder::new(32))));
        let loader = SpreadsheetLoader::new(index.clone(), 100);

        assert!(matches!(
            loader.load_source(&path).await,
            Err(HarnessError::SourceRead { .. })
        ));
        assert_eq!(index.count().await.unwrap(), 0);
    }
}
