//! TOML configuration.
//!
//! Every section is optional; a missing file section falls back to the
//! defaults below. Paths are used as written (relative paths resolve against
//! the working directory).
//!
//! ```toml
//! [paths]
//! data_dir = "./data"
//!
//! [retrieval]
//! answer_threshold = 0.8
//!
//! [schedule]
//! timezone = "Asia/Kolkata"
//! daily_at = "04:00"
//! weekly_day = "sunday"
//! weekly_at = "02:00"
//! ```

use anyhow::{Context, Result};
use chrono::{NaiveTime, Weekday};
use chrono_tz::Tz;
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub ingestion: IngestionConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
}

/// Filesystem layout. Anything left unset is derived from `data_dir`.
#[derive(Debug, Deserialize, Clone)]
pub struct PathsConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default)]
    pub knowledge_dir: Option<PathBuf>,
    #[serde(default)]
    pub index_dir: Option<PathBuf>,
    #[serde(default)]
    pub inbox_dir: Option<PathBuf>,
    #[serde(default)]
    pub backup_dir: Option<PathBuf>,
    #[serde(default)]
    pub interaction_log: Option<PathBuf>,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            knowledge_dir: None,
            index_dir: None,
            inbox_dir: None,
            backup_dir: None,
            interaction_log: None,
        }
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

impl PathsConfig {
    pub fn knowledge_dir(&self) -> PathBuf {
        self.knowledge_dir
            .clone()
            .unwrap_or_else(|| self.data_dir.join("adaptive_knowledge"))
    }

    pub fn index_dir(&self) -> PathBuf {
        self.index_dir
            .clone()
            .unwrap_or_else(|| self.data_dir.join("index"))
    }

    /// SQLite file backing the vector index. Lives inside [`index_dir`](Self::index_dir)
    /// so a snapshot of that directory captures the whole index.
    pub fn index_db(&self) -> PathBuf {
        self.index_dir().join("index.sqlite")
    }

    pub fn inbox_dir(&self) -> PathBuf {
        self.inbox_dir
            .clone()
            .unwrap_or_else(|| self.data_dir.join("excel_imports"))
    }

    pub fn backup_dir(&self) -> PathBuf {
        self.backup_dir
            .clone()
            .unwrap_or_else(|| self.data_dir.join("backups"))
    }

    pub fn interaction_log(&self) -> PathBuf {
        self.interaction_log
            .clone()
            .unwrap_or_else(|| self.data_dir.join("chat_interactions.json"))
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    /// Minimum confidence for `get_answer` to return a learned answer.
    #[serde(default = "default_answer_threshold")]
    pub answer_threshold: f64,
    /// Minimum confidence for `search` results.
    #[serde(default = "default_search_min_confidence")]
    pub search_min_confidence: f64,
    #[serde(default = "default_search_limit")]
    pub search_limit: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            answer_threshold: default_answer_threshold(),
            search_min_confidence: default_search_min_confidence(),
            search_limit: default_search_limit(),
        }
    }
}

fn default_answer_threshold() -> f64 {
    0.8
}
fn default_search_min_confidence() -> f64 {
    0.7
}
fn default_search_limit() -> usize {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestionConfig {
    /// Rows committed to the index per write.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Glob patterns (matched against file names) selecting inbox files.
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    /// Archive a file whose load stopped part way through.
    #[serde(default = "default_archive_partial_loads")]
    pub archive_partial_loads: bool,
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            include_globs: default_include_globs(),
            archive_partial_loads: default_archive_partial_loads(),
        }
    }
}

fn default_batch_size() -> usize {
    100
}
fn default_include_globs() -> Vec<String> {
    vec![
        "*.xlsx".to_string(),
        "*.xls".to_string(),
        "*.xlsm".to_string(),
        "*.csv".to_string(),
    ]
}
fn default_archive_partial_loads() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub struct ScheduleConfig {
    #[serde(default = "default_timezone")]
    pub timezone: String,
    #[serde(default = "default_daily_at")]
    pub daily_at: String,
    #[serde(default = "default_learning_interval_mins")]
    pub learning_interval_mins: u64,
    #[serde(default = "default_weekly_day")]
    pub weekly_day: String,
    #[serde(default = "default_weekly_at")]
    pub weekly_at: String,
    #[serde(default = "default_tick_secs")]
    pub tick_secs: u64,
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            timezone: default_timezone(),
            daily_at: default_daily_at(),
            learning_interval_mins: default_learning_interval_mins(),
            weekly_day: default_weekly_day(),
            weekly_at: default_weekly_at(),
            tick_secs: default_tick_secs(),
            retention_days: default_retention_days(),
        }
    }
}

fn default_timezone() -> String {
    "Asia/Kolkata".to_string()
}
fn default_daily_at() -> String {
    "04:00".to_string()
}
fn default_learning_interval_mins() -> u64 {
    60
}
fn default_weekly_day() -> String {
    "sunday".to_string()
}
fn default_weekly_at() -> String {
    "02:00".to_string()
}
fn default_tick_secs() -> u64 {
    60
}
fn default_retention_days() -> u32 {
    30
}

impl ScheduleConfig {
    pub fn tz(&self) -> Result<Tz> {
        self.timezone
            .parse::<Tz>()
            .map_err(|e| anyhow::anyhow!("schedule.timezone '{}': {}", self.timezone, e))
    }

    pub fn daily_time(&self) -> Result<NaiveTime> {
        parse_clock(&self.daily_at).context("schedule.daily_at")
    }

    pub fn weekly_time(&self) -> Result<NaiveTime> {
        parse_clock(&self.weekly_at).context("schedule.weekly_at")
    }

    pub fn weekday(&self) -> Result<Weekday> {
        self.weekly_day
            .parse::<Weekday>()
            .map_err(|_| anyhow::anyhow!("schedule.weekly_day '{}' is not a weekday", self.weekly_day))
    }
}

fn parse_clock(value: &str) -> Result<NaiveTime> {
    NaiveTime::parse_from_str(value, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(value, "%H:%M:%S"))
        .with_context(|| format!("expected HH:MM, got '{}'", value))
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    /// `hash` (offline feature hashing) or `openai`.
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_provider() -> String {
    "hash".to_string()
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

impl Config {
    /// Defaults rooted at `data_dir`; used when no config file exists.
    pub fn for_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            paths: PathsConfig {
                data_dir: data_dir.into(),
                ..PathsConfig::default()
            },
            ..Config::default()
        }
    }

    /// Check cross-field constraints that serde defaults cannot express.
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("retrieval.answer_threshold", self.retrieval.answer_threshold),
            (
                "retrieval.search_min_confidence",
                self.retrieval.search_min_confidence,
            ),
        ] {
            if !(0.0..=1.0).contains(&value) {
                anyhow::bail!("{} must be in [0.0, 1.0]", name);
            }
        }

        if self.retrieval.search_limit == 0 {
            anyhow::bail!("retrieval.search_limit must be >= 1");
        }
        if self.ingestion.batch_size == 0 {
            anyhow::bail!("ingestion.batch_size must be > 0");
        }
        if self.ingestion.include_globs.is_empty() {
            anyhow::bail!("ingestion.include_globs must not be empty");
        }
        if self.schedule.tick_secs == 0 {
            anyhow::bail!("schedule.tick_secs must be > 0");
        }
        if self.schedule.learning_interval_mins == 0 {
            anyhow::bail!("schedule.learning_interval_mins must be > 0");
        }

        self.schedule.tz()?;
        self.schedule.daily_time()?;
        self.schedule.weekly_time()?;
        self.schedule.weekday()?;

        match self.embedding.provider.as_str() {
            "hash" => {}
            "openai" => {
                if self.embedding.model.is_none() {
                    anyhow::bail!("embedding.model must be specified when provider is 'openai'");
                }
            }
            other => anyhow::bail!(
                "Unknown embedding provider: '{}'. Must be hash or openai.",
                other
            ),
        }

        Ok(())
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    config.validate()?;

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_yields_defaults() {
        let config: Config = toml::from_str("").unwrap();
        config.validate().unwrap();
        assert_eq!(config.retrieval.answer_threshold, 0.8);
        assert_eq!(config.ingestion.batch_size, 100);
        assert_eq!(config.schedule.retention_days, 30);
        assert_eq!(config.schedule.tz().unwrap(), chrono_tz::Asia::Kolkata);
        assert_eq!(config.schedule.weekday().unwrap(), Weekday::Sun);
        assert_eq!(
            config.paths.inbox_dir(),
            PathBuf::from("./data/excel_imports")
        );
    }

    #[test]
    fn explicit_paths_override_data_dir() {
        let config: Config = toml::from_str(
            r#"
            [paths]
            data_dir = "/srv/kh"
            backup_dir = "/mnt/backups"
            "#,
        )
        .unwrap();
        assert_eq!(config.paths.backup_dir(), PathBuf::from("/mnt/backups"));
        assert_eq!(
            config.paths.index_db(),
            PathBuf::from("/srv/kh/index/index.sqlite")
        );
    }

    #[test]
    fn rejects_bad_schedule_values() {
        let mut config = Config::default();
        config.schedule.daily_at = "25:99".into();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.schedule.timezone = "Mars/Olympus".into();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.schedule.weekly_day = "someday".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_threshold_out_of_range() {
        let mut config = Config::default();
        config.retrieval.answer_threshold = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn openai_requires_model() {
        let mut config = Config::default();
        config.embedding.provider = "openai".into();
        assert!(config.validate().is_err());
        config.embedding.model = Some("text-embedding-3-small".into());
        config.validate().unwrap();
    }
}
