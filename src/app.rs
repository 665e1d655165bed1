//! Builds every component from a [`Config`].
//!
//! ```text
//! Config ─► SqlitePool ─► SqliteIndex("learned_qa") ─► KnowledgeStore ─┐
//!                      └► SqliteIndex("operations") ─► SpreadsheetLoader ├► JobRunner ─► Scheduler
//!           InteractionLog, BackupManager ────────────────────────────┘
//! ```
//!
//! Opening a harness creates the data directories, runs migrations, and
//! re-indexes any learned pair the index lost.

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use sqlx::SqlitePool;

use crate::backup::BackupManager;
use crate::config::Config;
use crate::db;
use crate::embedding::create_embedder;
use crate::index::{SqliteIndex, VectorIndex, KNOWLEDGE_COLLECTION, OPERATIONS_COLLECTION};
use crate::interactions::InteractionLog;
use crate::knowledge::KnowledgeStore;
use crate::loader::SpreadsheetLoader;
use crate::migrate;
use crate::persist::JsonKnowledgeFiles;
use crate::scheduler::jobs::JobSettings;
use crate::scheduler::{JobRunner, SchedulePlan, Scheduler};

pub struct Harness {
    pub config: Config,
    pub pool: SqlitePool,
    pub knowledge_index: Arc<dyn VectorIndex>,
    pub operations_index: Arc<dyn VectorIndex>,
    pub knowledge: Arc<KnowledgeStore>,
    pub interactions: Arc<InteractionLog>,
    pub loader: Arc<SpreadsheetLoader>,
    pub backup: Arc<BackupManager>,
    pub runner: Arc<JobRunner>,
    pub scheduler: Arc<Scheduler>,
}

impl Harness {
    pub async fn open(config: &Config) -> Result<Self> {
        config.validate()?;
        let paths = &config.paths;

        for dir in [
            paths.knowledge_dir(),
            paths.index_dir(),
            paths.inbox_dir(),
            paths.backup_dir(),
        ] {
            std::fs::create_dir_all(&dir)
                .with_context(|| format!("Failed to create {}", dir.display()))?;
        }

        let pool = db::connect(&paths.index_db()).await?;
        migrate::run_migrations(&pool).await?;

        let embedder = create_embedder(&config.embedding)?;
        let knowledge_index: Arc<dyn VectorIndex> = Arc::new(SqliteIndex::new(
            pool.clone(),
            KNOWLEDGE_COLLECTION,
            embedder.clone(),
        ));
        let operations_index: Arc<dyn VectorIndex> = Arc::new(SqliteIndex::new(
            pool.clone(),
            OPERATIONS_COLLECTION,
            embedder,
        ));

        let knowledge = Arc::new(
            KnowledgeStore::open(
                Arc::new(JsonKnowledgeFiles::new(&paths.knowledge_dir())),
                knowledge_index.clone(),
            )
            .context("Failed to open knowledge store")?,
        );
        let repaired = knowledge.reconcile().await?;
        if repaired > 0 {
            tracing::warn!(repaired, "learned pairs were missing from the index");
        }

        let interactions = Arc::new(
            InteractionLog::open(&paths.interaction_log())
                .context("Failed to open interaction log")?,
        );
        let loader = Arc::new(SpreadsheetLoader::new(
            operations_index.clone(),
            config.ingestion.batch_size,
        ));

        let plan = SchedulePlan::from_config(&config.schedule)?;
        let backup = Arc::new(BackupManager::new(
            paths.index_dir(),
            paths.backup_dir(),
            plan.tz,
        ));

        let runner = Arc::new(JobRunner::new(
            JobSettings {
                inbox_dir: paths.inbox_dir(),
                include_globs: config.ingestion.include_globs.clone(),
                archive_partial_loads: config.ingestion.archive_partial_loads,
                retention_days: config.schedule.retention_days,
            },
            knowledge.clone(),
            interactions.clone(),
            loader.clone(),
            backup.clone(),
            operations_index.clone(),
        ));
        let scheduler = Arc::new(Scheduler::new(runner.clone(), plan, Utc::now()));

        Ok(Self {
            config: config.clone(),
            pool,
            knowledge_index,
            operations_index,
            knowledge,
            interactions,
            loader,
            backup,
            runner,
            scheduler,
        })
    }

    pub async fn close(self) {
        self.pool.close().await;
    }
}
