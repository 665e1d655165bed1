//! Backups, archives, and retention.
//!
//! Everything the manager writes lands directly under the backup directory
//! with a `YYYYmmdd_HHMMSS` timestamp (in the schedule timezone):
//!
//! | Artifact | Name |
//! |----------|------|
//! | index snapshot | `index_backup_<ts>/` |
//! | archived source file | `<stem>_processed_<ts><.ext>` |
//! | knowledge export | `learned_knowledge_backup_<ts>.json` |
//!
//! Two artifacts with the same name in the same second get `_1`, `_2`, ...
//! suffixes. [`BackupManager::cleanup`] removes files older than the
//! retention window regardless of kind.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;
use walkdir::WalkDir;

use crate::error::{HarnessError, HarnessResult};
use crate::export::KnowledgeExport;
use crate::index::VectorIndex;
use crate::persist::write_json_atomic;

pub struct BackupManager {
    index_dir: PathBuf,
    backup_dir: PathBuf,
    tz: Tz,
}

impl BackupManager {
    pub fn new(index_dir: PathBuf, backup_dir: PathBuf, tz: Tz) -> Self {
        Self {
            index_dir,
            backup_dir,
            tz,
        }
    }

    pub fn backup_dir(&self) -> &Path {
        &self.backup_dir
    }

    fn stamp(&self, now: DateTime<Utc>) -> String {
        now.with_timezone(&self.tz).format("%Y%m%d_%H%M%S").to_string()
    }

    /// Copy the index directory into a timestamped snapshot.
    ///
    /// The index is flushed first so the copy holds every committed write.
    /// Returns `None` when the index directory is missing or empty.
    pub async fn snapshot_index(
        &self,
        index: &dyn VectorIndex,
        now: DateTime<Utc>,
    ) -> HarnessResult<Option<PathBuf>> {
        index.flush().await?;

        if !self.index_dir.is_dir() || std::fs::read_dir(&self.index_dir)?.next().is_none() {
            tracing::debug!(index_dir = %self.index_dir.display(), "nothing to snapshot");
            return Ok(None);
        }

        let target = unique_path(
            &self.backup_dir,
            &format!("index_backup_{}", self.stamp(now)),
            "",
        );
        copy_dir(&self.index_dir, &target)?;
        tracing::info!(snapshot = %target.display(), "index snapshot written");
        Ok(Some(target))
    }

    /// Move `file` into the backup directory as `<stem>_processed_<ts><.ext>`.
    pub fn archive(&self, file: &Path, now: DateTime<Utc>) -> HarnessResult<PathBuf> {
        std::fs::create_dir_all(&self.backup_dir)?;

        let stem = file
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .ok_or_else(|| {
                HarnessError::Storage(format!("cannot archive {}: no file name", file.display()))
            })?;
        let ext = file
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy()))
            .unwrap_or_default();

        let target = unique_path(
            &self.backup_dir,
            &format!("{}_processed_{}", stem, self.stamp(now)),
            &ext,
        );

        if std::fs::rename(file, &target).is_err() {
            // Cross-device moves need a copy.
            std::fs::copy(file, &target)?;
            std::fs::remove_file(file)?;
        }
        tracing::info!(from = %file.display(), to = %target.display(), "archived source file");
        Ok(target)
    }

    /// Write a knowledge export as `learned_knowledge_backup_<ts>.json`.
    pub fn write_export(
        &self,
        export: &KnowledgeExport,
        now: DateTime<Utc>,
    ) -> HarnessResult<PathBuf> {
        std::fs::create_dir_all(&self.backup_dir)?;
        let target = unique_path(
            &self.backup_dir,
            &format!("learned_knowledge_backup_{}", self.stamp(now)),
            ".json",
        );
        write_json_atomic(&target, export)?;
        tracing::info!(
            path = %target.display(),
            pairs = export.metadata.total_pairs,
            "knowledge export written"
        );
        Ok(target)
    }

    /// Delete every file under the backup directory modified strictly
    /// before `now - retention_days`, then any directory that emptied.
    ///
    /// An entry that cannot be inspected or removed is logged and left in
    /// place; the rest of the pass continues. Returns the deleted files.
    pub fn cleanup(&self, retention_days: u32, now: DateTime<Utc>) -> HarnessResult<Vec<PathBuf>> {
        if !self.backup_dir.is_dir() {
            return Ok(Vec::new());
        }
        let cutoff = now - Duration::days(i64::from(retention_days));

        let mut removed = Vec::new();
        let mut touched: HashSet<PathBuf> = HashSet::new();

        for entry in WalkDir::new(&self.backup_dir).min_depth(1).contents_first(true) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::warn!(error = %e, "skipping unreadable backup entry");
                    continue;
                }
            };
            let path = entry.path();

            if entry.file_type().is_dir() {
                if touched.contains(path) && dir_is_empty(path) {
                    match std::fs::remove_dir(path) {
                        Ok(()) => {
                            if let Some(parent) = path.parent() {
                                touched.insert(parent.to_path_buf());
                            }
                            tracing::debug!(dir = %path.display(), "removed empty backup directory");
                        }
                        Err(e) => {
                            tracing::warn!(dir = %path.display(), error = %e, "could not remove backup directory")
                        }
                    }
                }
                continue;
            }

            let modified = entry
                .metadata()
                .map_err(std::io::Error::from)
                .and_then(|m| m.modified());
            let modified: DateTime<Utc> = match modified {
                Ok(modified) => modified.into(),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "no modification time; backup kept");
                    continue;
                }
            };
            if modified < cutoff {
                if let Err(e) = std::fs::remove_file(path) {
                    tracing::warn!(path = %path.display(), error = %e, "could not remove old backup");
                    continue;
                }
                if let Some(parent) = path.parent() {
                    touched.insert(parent.to_path_buf());
                }
                tracing::info!(path = %path.display(), "removed old backup");
                removed.push(path.to_path_buf());
            }
        }

        Ok(removed)
    }
}

fn dir_is_empty(path: &Path) -> bool {
    std::fs::read_dir(path)
        .map(|mut entries| entries.next().is_none())
        .unwrap_or(false)
}

/// `dir/<base><ext>`, or `dir/<base>_<n><ext>` for the first free `n`.
pub fn unique_path(dir: &Path, base: &str, ext: &str) -> PathBuf {
    let candidate = dir.join(format!("{}{}", base, ext));
    if !candidate.exists() {
        return candidate;
    }
    let mut n = 1;
    loop {
        let candidate = dir.join(format!("{}_{}{}", base, n, ext));
        if !candidate.exists() {
            return candidate;
        }
        n += 1;
    }
}

fn copy_dir(from: &Path, to: &Path) -> HarnessResult<()> {
    for entry in WalkDir::new(from) {
        let entry = entry.map_err(|e| HarnessError::Storage(e.to_string()))?;
        let relative = entry.path().strip_prefix(from).unwrap_or(entry.path());
        let target = to.join(relative);
        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&target)?;
        } else {
            std::fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}
