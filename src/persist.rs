//! Durable files for learned knowledge.
//!
//! [`JsonKnowledgeFiles`] owns two files in the knowledge directory:
//!
//! - `learned_knowledge.json` — the full [`QaPair`] list, pretty-printed.
//! - `learning_metadata.json` — a [`LearningMetadata`] summary rewritten on
//!   every save.
//!
//! Every write goes to a sibling temp file that is then renamed over the
//! target, so readers never observe a half-written list. Read-modify-write
//! cycles run under an advisory lock on a sibling `.lock` file, so a
//! scheduler process and a CLI process writing the same data directory
//! never drop each other's updates.

use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{HarnessError, HarnessResult};
use crate::models::{question_id, QaPair};

pub const KNOWLEDGE_FILE: &str = "learned_knowledge.json";
pub const METADATA_FILE: &str = "learning_metadata.json";

/// Storage for the authoritative pair list.
pub trait KnowledgePersistence: Send + Sync {
    /// Load the stored list; a store that was never written is empty.
    fn load(&self) -> HarnessResult<Vec<QaPair>>;
    /// Replace the stored list.
    fn save(&self, pairs: &[QaPair], now: DateTime<Utc>) -> HarnessResult<()>;
    /// Remove everything; succeeds when nothing is stored.
    fn clear(&self) -> HarnessResult<()>;

    /// Load the current list, apply `edit`, and save it when `edit`
    /// reports a change. Returns the list as it now stands.
    ///
    /// Stores shared between processes override this to hold a lock across
    /// the whole cycle.
    fn modify(
        &self,
        now: DateTime<Utc>,
        edit: &mut dyn FnMut(&mut Vec<QaPair>) -> bool,
    ) -> HarnessResult<Vec<QaPair>> {
        let mut pairs = self.load()?;
        if edit(&mut pairs) {
            self.save(&pairs, now)?;
        }
        Ok(pairs)
    }
}

/// Summary written next to the pair list.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LearningMetadata {
    pub total_pairs: usize,
    pub last_updated: DateTime<Utc>,
    pub categories: BTreeMap<String, usize>,
    pub fiscal_periods: BTreeMap<String, usize>,
}

impl LearningMetadata {
    pub fn summarize(pairs: &[QaPair], now: DateTime<Utc>) -> Self {
        Self {
            total_pairs: pairs.len(),
            last_updated: now,
            categories: category_counts(pairs),
            fiscal_periods: fiscal_period_counts(pairs),
        }
    }
}

/// Pairs per category tag.
pub fn category_counts(pairs: &[QaPair]) -> BTreeMap<String, usize> {
    let mut counts = BTreeMap::new();
    for pair in pairs {
        for category in &pair.categories {
            *counts.entry(category.clone()).or_insert(0) += 1;
        }
    }
    counts
}

/// Pairs per fiscal-period label.
pub fn fiscal_period_counts(pairs: &[QaPair]) -> BTreeMap<String, usize> {
    let mut counts = BTreeMap::new();
    for pair in pairs {
        for period in pair.fiscal_periods.iter().filter(|p| !p.is_empty()) {
            *counts.entry(period.clone()).or_insert(0) += 1;
        }
    }
    counts
}

pub struct JsonKnowledgeFiles {
    knowledge_file: PathBuf,
    metadata_file: PathBuf,
}

impl JsonKnowledgeFiles {
    /// Files inside `dir`; the directory is created on first save.
    pub fn new(dir: &Path) -> Self {
        Self {
            knowledge_file: dir.join(KNOWLEDGE_FILE),
            metadata_file: dir.join(METADATA_FILE),
        }
    }

    pub fn knowledge_file(&self) -> &Path {
        &self.knowledge_file
    }

    pub fn metadata_file(&self) -> &Path {
        &self.metadata_file
    }
}

impl KnowledgePersistence for JsonKnowledgeFiles {
    fn load(&self) -> HarnessResult<Vec<QaPair>> {
        if !self.knowledge_file.exists() {
            return Ok(Vec::new());
        }
        let content = std::fs::read_to_string(&self.knowledge_file).map_err(|e| {
            HarnessError::Storage(format!("{}: {}", self.knowledge_file.display(), e))
        })?;
        let mut pairs: Vec<QaPair> = serde_json::from_str(&content).map_err(|e| {
            HarnessError::Storage(format!("{}: {}", self.knowledge_file.display(), e))
        })?;
        for pair in pairs.iter_mut().filter(|p| p.question_id.is_empty()) {
            pair.question_id = question_id(&pair.question);
        }
        Ok(pairs)
    }

    fn save(&self, pairs: &[QaPair], now: DateTime<Utc>) -> HarnessResult<()> {
        write_json_atomic(&self.knowledge_file, &pairs)?;
        write_json_atomic(
            &self.metadata_file,
            &LearningMetadata::summarize(pairs, now),
        )?;
        Ok(())
    }

    fn clear(&self) -> HarnessResult<()> {
        with_exclusive_lock(&self.knowledge_file, || {
            for path in [&self.knowledge_file, &self.metadata_file] {
                match std::fs::remove_file(path) {
                    Ok(()) => {}
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => return Err(e.into()),
                }
            }
            Ok(())
        })
    }

    fn modify(
        &self,
        now: DateTime<Utc>,
        edit: &mut dyn FnMut(&mut Vec<QaPair>) -> bool,
    ) -> HarnessResult<Vec<QaPair>> {
        with_exclusive_lock(&self.knowledge_file, || {
            let mut pairs = self.load()?;
            if edit(&mut pairs) {
                self.save(&pairs, now)?;
            }
            Ok(pairs)
        })
    }
}

/// Run `f` while holding the exclusive advisory lock for `target`.
///
/// The lock lives on `<target>.lock`, which is created on demand and never
/// removed. Blocks until other holders, in this or another process, let go.
pub fn with_exclusive_lock<T>(
    target: &Path,
    f: impl FnOnce() -> HarnessResult<T>,
) -> HarnessResult<T> {
    let path = sibling(target, ".lock");
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(&path)
        .map_err(|e| HarnessError::Storage(format!("{}: {}", path.display(), e)))?;

    let mut lock = fd_lock::RwLock::new(file);
    let _guard = lock
        .write()
        .map_err(|e| HarnessError::Storage(format!("cannot lock {}: {}", path.display(), e)))?;
    f()
}

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(suffix);
    path.with_file_name(name)
}

/// Serialize `value` as pretty JSON into `path` via a temp file and rename.
pub fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> HarnessResult<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let json = serde_json::to_string_pretty(value)?;
    let tmp = sibling(path, ".tmp");

    std::fs::write(&tmp, json)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}
