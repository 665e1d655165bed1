//! Append-only log of captured chat exchanges.
//!
//! Every capture is written through to `chat_interactions.json` before it
//! returns. Records start unprocessed; the interaction-learning job flips
//! them to processed once their pair has been ingested.
//!
//! The file is the source of truth. Another process (the CLI next to a
//! running scheduler) may append at any time, so every mutation reloads the
//! file under its advisory lock and every read starts from the file.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, MutexGuard};

use crate::error::{HarnessError, HarnessResult};
use crate::models::{InteractionRecord, Metadata};
use crate::persist::{with_exclusive_lock, write_json_atomic};

pub struct InteractionLog {
    path: PathBuf,
    records: Mutex<Vec<InteractionRecord>>,
}

fn read_log(path: &Path) -> HarnessResult<Vec<InteractionRecord>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let content = std::fs::read_to_string(path)?;
    serde_json::from_str(&content)
        .map_err(|e| HarnessError::Storage(format!("{}: {}", path.display(), e)))
}

impl InteractionLog {
    /// Load the log at `path`; a missing file is an empty log.
    pub fn open(path: &Path) -> HarnessResult<Self> {
        let records = read_log(path)?;
        tracing::debug!(records = records.len(), path = %path.display(), "interaction log opened");
        Ok(Self {
            path: path.to_path_buf(),
            records: Mutex::new(records),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the file, apply `edit`, and write it back when `edit` reports a
    /// change, all under the file lock.
    fn modify<T>(
        &self,
        records: &mut Vec<InteractionRecord>,
        edit: impl FnOnce(&mut Vec<InteractionRecord>) -> (bool, T),
    ) -> HarnessResult<T> {
        let (next, out) = with_exclusive_lock(&self.path, || {
            let mut current = read_log(&self.path)?;
            let (changed, out) = edit(&mut current);
            if changed {
                write_json_atomic(&self.path, &current)?;
            }
            Ok((current, out))
        })?;
        *records = next;
        Ok(out)
    }

    /// The cached records after a reload. A failed reload is logged and the
    /// last good copy is served.
    async fn current(&self) -> MutexGuard<'_, Vec<InteractionRecord>> {
        let mut records = self.records.lock().await;
        match read_log(&self.path) {
            Ok(fresh) => *records = fresh,
            Err(e) => tracing::warn!(error = %e, "interaction log reload failed; using cached records"),
        }
        records
    }

    /// Append one exchange and persist the log.
    pub async fn capture(
        &self,
        query: &str,
        response: &str,
        metadata: Metadata,
        at: DateTime<Utc>,
    ) -> HarnessResult<InteractionRecord> {
        let record = InteractionRecord::new(query.to_string(), response.to_string(), metadata, at);

        let mut records = self.records.lock().await;
        self.modify(&mut records, |current| {
            current.push(record.clone());
            (true, ())
        })?;

        let preview: String = query.chars().take(50).collect();
        tracing::info!(id = %record.id, query = %preview, "captured chat interaction");
        Ok(record)
    }

    /// Unprocessed records in capture order, read fresh from disk.
    pub async fn unprocessed(&self) -> HarnessResult<Vec<InteractionRecord>> {
        let mut records = self.records.lock().await;
        *records = read_log(&self.path)?;
        Ok(records.iter().filter(|r| !r.processed).cloned().collect())
    }

    /// Flag the given records as processed and persist. Returns how many
    /// records changed.
    pub async fn mark_processed(&self, ids: &[String], at: DateTime<Utc>) -> HarnessResult<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        let mut records = self.records.lock().await;
        self.modify(&mut records, |current| {
            let mut changed = 0;
            for record in current.iter_mut() {
                if !record.processed && ids.contains(&record.id) {
                    record.processed = true;
                    record.learned_at = Some(at);
                    changed += 1;
                }
            }
            (changed > 0, changed)
        })
    }

    pub async fn total(&self) -> usize {
        self.current().await.len()
    }

    pub async fn unprocessed_count(&self) -> usize {
        self.current().await.iter().filter(|r| !r.processed).count()
    }
}
