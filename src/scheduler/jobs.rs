//! Bodies of the scheduled jobs.
//!
//! [`JobRunner`] is the production [`JobExecutor`]: it wires the inbox, the
//! spreadsheet loader, the backup manager, the interaction log, and the
//! knowledge store together. Each body returns a report describing what it
//! did; partial problems (one unreadable file, one invalid interaction) are
//! recorded in the report and logged, not raised.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;

use crate::backup::BackupManager;
use crate::error::{HarnessError, HarnessResult};
use crate::index::VectorIndex;
use crate::interactions::InteractionLog;
use crate::knowledge::KnowledgeStore;
use crate::loader::{LoadReport, SpreadsheetLoader};
use crate::models::{IngestPayload, SOURCE_CHAT_INTERACTION};
use crate::spreadsheet::discover_files;

use super::{JobExecutor, JobKind, PipelineSnapshot};

#[derive(Debug, Clone, Serialize)]
pub struct SkippedFile {
    pub file: PathBuf,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct IngestionRunReport {
    pub files_found: usize,
    pub snapshot: Option<PathBuf>,
    pub loads: Vec<LoadReport>,
    /// Files that could not be read; they stay in the inbox.
    pub skipped: Vec<SkippedFile>,
    pub archived: Vec<PathBuf>,
    pub rows_committed: usize,
    pub learning: LearningRunReport,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LearningRunReport {
    pub pending: usize,
    pub learned: usize,
    /// Interactions left unprocessed; they are retried on the next run.
    pub failed: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct WeeklyRunReport {
    pub export: Option<PathBuf>,
    pub removed: Vec<PathBuf>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "job", rename_all = "snake_case")]
pub enum JobOutcome {
    Ingestion(IngestionRunReport),
    Learning(LearningRunReport),
    Weekly(WeeklyRunReport),
}

impl JobOutcome {
    /// One-line description for logs and status output.
    pub fn summary(&self) -> String {
        match self {
            JobOutcome::Ingestion(r) => format!(
                "{} files, {} rows committed, {} archived, {} skipped; learned {} of {} interactions",
                r.files_found,
                r.rows_committed,
                r.archived.len(),
                r.skipped.len(),
                r.learning.learned,
                r.learning.pending
            ),
            JobOutcome::Learning(r) => format!(
                "learned {} of {} interactions ({} failed)",
                r.learned, r.pending, r.failed
            ),
            JobOutcome::Weekly(r) => format!(
                "export {}, {} old backups removed",
                r.export
                    .as_ref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| "skipped".to_string()),
                r.removed.len()
            ),
        }
    }
}

/// Settings the job bodies need from the configuration.
#[derive(Debug, Clone)]
pub struct JobSettings {
    pub inbox_dir: PathBuf,
    pub include_globs: Vec<String>,
    pub archive_partial_loads: bool,
    pub retention_days: u32,
}

pub struct JobRunner {
    settings: JobSettings,
    knowledge: Arc<KnowledgeStore>,
    interactions: Arc<InteractionLog>,
    loader: Arc<SpreadsheetLoader>,
    backup: Arc<BackupManager>,
    operations_index: Arc<dyn VectorIndex>,
}

impl JobRunner {
    pub fn new(
        settings: JobSettings,
        knowledge: Arc<KnowledgeStore>,
        interactions: Arc<InteractionLog>,
        loader: Arc<SpreadsheetLoader>,
        backup: Arc<BackupManager>,
        operations_index: Arc<dyn VectorIndex>,
    ) -> Self {
        Self {
            settings,
            knowledge,
            interactions,
            loader,
            backup,
            operations_index,
        }
    }

    /// Load every inbox file, archive what was loaded, then learn from
    /// pending interactions.
    pub async fn run_ingestion(&self, now: DateTime<Utc>) -> HarnessResult<IngestionRunReport> {
        let files = discover_files(&self.settings.inbox_dir, &self.settings.include_globs)?;
        let mut report = IngestionRunReport {
            files_found: files.len(),
            ..Default::default()
        };

        if files.is_empty() {
            tracing::warn!(inbox = %self.settings.inbox_dir.display(), "no spreadsheet files found");
        } else {
            tracing::info!(files = files.len(), "daily ingestion starting");
            report.snapshot = match self
                .backup
                .snapshot_index(self.operations_index.as_ref(), now)
                .await
            {
                Ok(path) => path,
                Err(e) => {
                    tracing::warn!(error = %e, "index snapshot failed; continuing without it");
                    None
                }
            };
        }

        for file in files {
            let load = match self.loader.load_source(&file).await {
                Ok(load) => load,
                Err(e) => {
                    tracing::error!(file = %file.display(), error = %e, "skipping unreadable file");
                    report.skipped.push(SkippedFile {
                        file,
                        reason: e.to_string(),
                    });
                    continue;
                }
            };
            report.rows_committed += load.committed;

            if load.is_complete() || self.settings.archive_partial_loads {
                match self.backup.archive(&file, now) {
                    Ok(path) => report.archived.push(path),
                    Err(e) => {
                        tracing::error!(file = %file.display(), error = %e, "archiving failed; file stays in the inbox");
                    }
                }
            } else {
                tracing::warn!(file = %file.display(), "partial load left in the inbox");
            }
            report.loads.push(load);
        }

        tracing::info!(
            rows = report.rows_committed,
            archived = report.archived.len(),
            skipped = report.skipped.len(),
            "daily ingestion finished"
        );

        report.learning = self.run_learning(now).await?;
        Ok(report)
    }

    /// Ingest every unprocessed interaction as a learned pair.
    ///
    /// Interactions that fail validation stay unprocessed and are retried
    /// on every run.
    pub async fn run_learning(&self, now: DateTime<Utc>) -> HarnessResult<LearningRunReport> {
        let pending = self.interactions.unprocessed().await?;
        let mut report = LearningRunReport {
            pending: pending.len(),
            ..Default::default()
        };
        if pending.is_empty() {
            return Ok(report);
        }
        tracing::info!(pending = pending.len(), "learning from chat interactions");

        let mut learned = Vec::new();
        for record in &pending {
            let payload = IngestPayload::Single(json!({
                "question": record.query,
                "answer": record.response,
                "source": SOURCE_CHAT_INTERACTION,
                "captured_at": record.captured_at.to_rfc3339(),
                "interaction_id": record.id,
                "metadata": record.metadata,
            }));
            match self.knowledge.ingest_at(payload, now).await {
                Ok(_) => learned.push(record.id.clone()),
                Err(e) => {
                    report.failed += 1;
                    tracing::warn!(id = %record.id, error = %e, "interaction not learned; will retry");
                }
            }
        }

        report.learned = self.interactions.mark_processed(&learned, now).await?;
        tracing::info!(
            learned = report.learned,
            failed = report.failed,
            "interaction learning finished"
        );
        Ok(report)
    }

    /// Export learned knowledge into the backup directory, then prune old
    /// backups. Pruning runs even when the export fails.
    pub async fn run_weekly(&self, now: DateTime<Utc>) -> HarnessResult<WeeklyRunReport> {
        let export = self.knowledge.export_all(now).await;
        let exported = self.backup.write_export(&export, now);
        if let Err(e) = &exported {
            tracing::error!(error = %e, "knowledge export failed");
        }

        let removed = self.backup.cleanup(self.settings.retention_days, now)?;
        tracing::info!(
            removed = removed.len(),
            retention_days = self.settings.retention_days,
            "backup cleanup finished"
        );

        match exported {
            Ok(path) => Ok(WeeklyRunReport {
                export: Some(path),
                removed,
            }),
            Err(e) => Err(HarnessError::Storage(format!(
                "knowledge export failed ({} old backups removed): {}",
                removed.len(),
                e
            ))),
        }
    }
}

#[async_trait]
impl JobExecutor for JobRunner {
    async fn run(&self, kind: JobKind, now: DateTime<Utc>) -> HarnessResult<JobOutcome> {
        match kind {
            JobKind::DailyIngestion => self.run_ingestion(now).await.map(JobOutcome::Ingestion),
            JobKind::InteractionLearning => self.run_learning(now).await.map(JobOutcome::Learning),
            JobKind::WeeklyBackup => self.run_weekly(now).await.map(JobOutcome::Weekly),
        }
    }

    async fn snapshot(&self) -> HarnessResult<PipelineSnapshot> {
        let pending_files =
            discover_files(&self.settings.inbox_dir, &self.settings.include_globs)?.len();
        Ok(PipelineSnapshot {
            pending_files,
            interactions_total: self.interactions.total().await,
            interactions_pending: self.interactions.unprocessed_count().await,
            inbox_dir: self.settings.inbox_dir.clone(),
            backup_dir: self.backup.backup_dir().to_path_buf(),
        })
    }
}
