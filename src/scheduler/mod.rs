//! Time-driven maintenance jobs.
//!
//! The [`Scheduler`] owns three jobs, each with a [`Cadence`] evaluated in
//! the configured timezone:
//!
//! | Job | Default cadence | Body |
//! |-----|-----------------|------|
//! | [`JobKind::DailyIngestion`] | daily 04:00 | load inbox spreadsheets, archive them, learn |
//! | [`JobKind::InteractionLearning`] | every 60 minutes | learn from captured interactions |
//! | [`JobKind::WeeklyBackup`] | Sunday 02:00 | export knowledge, prune old backups |
//!
//! [`Scheduler::start`] spawns a cooperative driver that wakes every tick
//! (60 s by default) and runs whatever is due, one job at a time. Manual
//! runs through [`Scheduler::run_now`] take the same run lock, so a manual
//! run and a timer run never overlap. Each body runs in its own task; an
//! error or panic is logged and recorded in the job's status, and the driver
//! keeps going.

pub mod jobs;

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, TimeZone, Utc, Weekday};
use chrono_tz::Tz;
use serde::Serialize;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;

use crate::config::ScheduleConfig;
use crate::error::{HarnessError, HarnessResult};

pub use jobs::{JobOutcome, JobRunner};

/// When a job becomes due.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cadence {
    /// Every day at a local wall-clock time.
    Daily { at: NaiveTime },
    /// A fixed period after the previous run.
    Interval { every: Duration },
    /// Once a week on `day` at a local wall-clock time.
    Weekly { day: Weekday, at: NaiveTime },
}

impl Cadence {
    /// First due instant strictly after `after`.
    pub fn next_after(&self, after: DateTime<Utc>, tz: Tz) -> DateTime<Utc> {
        match *self {
            Cadence::Interval { every } => after + every,
            Cadence::Daily { at } => {
                let today = after.with_timezone(&tz).date_naive();
                let candidate = resolve_local(tz, today, at);
                if candidate > after {
                    candidate
                } else {
                    resolve_local(tz, today + Duration::days(1), at)
                }
            }
            Cadence::Weekly { day, at } => {
                let today = after.with_timezone(&tz).date_naive();
                let ahead = (7 + day.num_days_from_monday() as i64
                    - today.weekday().num_days_from_monday() as i64)
                    % 7;
                let date = today + Duration::days(ahead);
                let candidate = resolve_local(tz, date, at);
                if candidate > after {
                    candidate
                } else {
                    resolve_local(tz, date + Duration::days(7), at)
                }
            }
        }
    }
}

impl fmt::Display for Cadence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cadence::Daily { at } => write!(f, "daily at {}", at.format("%H:%M")),
            Cadence::Interval { every } => write!(f, "every {} min", every.num_minutes()),
            Cadence::Weekly { day, at } => write!(f, "weekly on {} at {}", day, at.format("%H:%M")),
        }
    }
}

/// Local wall-clock time on `date` as UTC. Ambiguous times take the earlier
/// instant; times skipped by a DST jump move forward an hour.
fn resolve_local(tz: Tz, date: NaiveDate, at: NaiveTime) -> DateTime<Utc> {
    let naive = date.and_time(at);
    tz.from_local_datetime(&naive)
        .earliest()
        .or_else(|| tz.from_local_datetime(&(naive + Duration::hours(1))).earliest())
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|| Utc.from_utc_datetime(&naive))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    DailyIngestion,
    InteractionLearning,
    WeeklyBackup,
}

impl JobKind {
    /// Fixed run order when several jobs fall due on the same tick.
    pub const ALL: [JobKind; 3] = [
        JobKind::DailyIngestion,
        JobKind::InteractionLearning,
        JobKind::WeeklyBackup,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::DailyIngestion => "daily_ingestion",
            JobKind::InteractionLearning => "interaction_learning",
            JobKind::WeeklyBackup => "weekly_backup",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobKind {
    type Err = HarnessError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "daily_ingestion" | "ingestion" | "daily" => Ok(JobKind::DailyIngestion),
            "interaction_learning" | "learning" | "learn" => Ok(JobKind::InteractionLearning),
            "weekly_backup" | "backup" | "weekly" => Ok(JobKind::WeeklyBackup),
            other => Err(HarnessError::Config(format!("unknown job '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Idle,
    Running,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone)]
pub struct ScheduledJob {
    pub kind: JobKind,
    pub cadence: Cadence,
    pub next_run: DateTime<Utc>,
    pub last_run: Option<DateTime<Utc>>,
    pub state: JobState,
    pub last_error: Option<String>,
    pub last_summary: Option<String>,
}

/// Resolved schedule settings.
#[derive(Debug, Clone)]
pub struct SchedulePlan {
    pub tz: Tz,
    pub tick: std::time::Duration,
    pub daily: Cadence,
    pub learning: Cadence,
    pub weekly: Cadence,
}

impl SchedulePlan {
    pub fn from_config(config: &ScheduleConfig) -> anyhow::Result<Self> {
        Ok(Self {
            tz: config.tz()?,
            tick: std::time::Duration::from_secs(config.tick_secs.max(1)),
            daily: Cadence::Daily {
                at: config.daily_time()?,
            },
            learning: Cadence::Interval {
                every: Duration::minutes(config.learning_interval_mins.max(1) as i64),
            },
            weekly: Cadence::Weekly {
                day: config.weekday()?,
                at: config.weekly_time()?,
            },
        })
    }

    fn cadence(&self, kind: JobKind) -> Cadence {
        match kind {
            JobKind::DailyIngestion => self.daily,
            JobKind::InteractionLearning => self.learning,
            JobKind::WeeklyBackup => self.weekly,
        }
    }
}

/// Counts and folders reported by [`Scheduler::status`].
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PipelineSnapshot {
    pub pending_files: usize,
    pub interactions_total: usize,
    pub interactions_pending: usize,
    pub inbox_dir: PathBuf,
    pub backup_dir: PathBuf,
}

/// Runs job bodies on behalf of the scheduler.
#[async_trait]
pub trait JobExecutor: Send + Sync {
    async fn run(&self, kind: JobKind, now: DateTime<Utc>) -> HarnessResult<JobOutcome>;
    async fn snapshot(&self) -> HarnessResult<PipelineSnapshot>;
}

#[derive(Debug, Clone, Serialize)]
pub struct JobStatus {
    pub job: JobKind,
    pub cadence: String,
    pub next_run: String,
    pub last_run: Option<String>,
    pub state: JobState,
    pub last_error: Option<String>,
    pub last_summary: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStatus {
    pub current_time: String,
    pub timezone: String,
    pub pipeline: PipelineSnapshot,
    pub jobs: Vec<JobStatus>,
}

pub struct Scheduler {
    plan: SchedulePlan,
    jobs: Mutex<Vec<ScheduledJob>>,
    run_lock: Mutex<()>,
    executor: Arc<dyn JobExecutor>,
}

impl Scheduler {
    /// Build the three jobs with their first due times after `now`.
    pub fn new(executor: Arc<dyn JobExecutor>, plan: SchedulePlan, now: DateTime<Utc>) -> Self {
        let jobs = JobKind::ALL
            .iter()
            .map(|&kind| {
                let cadence = plan.cadence(kind);
                ScheduledJob {
                    kind,
                    cadence,
                    next_run: cadence.next_after(now, plan.tz),
                    last_run: None,
                    state: JobState::Idle,
                    last_error: None,
                    last_summary: None,
                }
            })
            .collect();

        Self {
            plan,
            jobs: Mutex::new(jobs),
            run_lock: Mutex::new(()),
            executor,
        }
    }

    pub fn timezone(&self) -> Tz {
        self.plan.tz
    }

    /// Snapshot of every job.
    pub async fn jobs(&self) -> Vec<ScheduledJob> {
        self.jobs.lock().await.clone()
    }

    /// Run every job due at `now`, in [`JobKind::ALL`] order, and move each
    /// one's next due time past `now`. Returns the jobs that ran.
    pub async fn tick(&self, now: DateTime<Utc>) -> Vec<JobKind> {
        let _guard = self.run_lock.lock().await;

        let due: Vec<JobKind> = self
            .jobs
            .lock()
            .await
            .iter()
            .filter(|job| job.next_run <= now)
            .map(|job| job.kind)
            .collect();

        for &kind in &due {
            let _ = self.execute(kind, now, true).await;
        }
        due
    }

    /// Run one job immediately, outside its cadence. Its next due time is
    /// unchanged.
    pub async fn run_now(&self, kind: JobKind) -> HarnessResult<JobOutcome> {
        let _guard = self.run_lock.lock().await;
        tracing::info!(job = %kind, "manual run triggered");
        self.execute(kind, Utc::now(), false).await
    }

    async fn execute(
        &self,
        kind: JobKind,
        now: DateTime<Utc>,
        reschedule: bool,
    ) -> HarnessResult<JobOutcome> {
        self.update(kind, |job| {
            job.state = JobState::Running;
            job.last_run = Some(now);
        })
        .await;

        let started = std::time::Instant::now();
        tracing::info!(job = %kind, "job started");
        let executor = self.executor.clone();
        let result = match tokio::spawn(async move { executor.run(kind, now).await }).await {
            Ok(result) => result.map_err(|e| e.to_string()),
            Err(join) if join.is_panic() => Err("job panicked".to_string()),
            Err(join) => Err(join.to_string()),
        };
        let elapsed_ms = started.elapsed().as_millis() as u64;

        let tz = self.plan.tz;
        let outcome = match result {
            Ok(outcome) => {
                let summary = outcome.summary();
                tracing::info!(job = %kind, elapsed_ms, summary = %summary, "job succeeded");
                self.update(kind, |job| {
                    job.state = JobState::Succeeded;
                    job.last_error = None;
                    job.last_summary = Some(summary);
                })
                .await;
                Ok(outcome)
            }
            Err(message) => {
                tracing::error!(job = %kind, elapsed_ms, error = %message, "job failed");
                self.update(kind, |job| {
                    job.state = JobState::Failed;
                    job.last_error = Some(message.clone());
                })
                .await;
                Err(HarnessError::Job {
                    job: kind.as_str().to_string(),
                    message,
                })
            }
        };

        if reschedule {
            self.update(kind, |job| {
                job.next_run = job.cadence.next_after(now, tz);
            })
            .await;
        }
        outcome
    }

    async fn update(&self, kind: JobKind, f: impl FnOnce(&mut ScheduledJob)) {
        let mut jobs = self.jobs.lock().await;
        if let Some(job) = jobs.iter_mut().find(|j| j.kind == kind) {
            f(job);
        }
    }

    pub async fn status(&self, now: DateTime<Utc>) -> HarnessResult<SchedulerStatus> {
        let tz = self.plan.tz;
        let local = |ts: DateTime<Utc>| ts.with_timezone(&tz).format("%Y-%m-%d %H:%M:%S").to_string();

        let pipeline = self.executor.snapshot().await?;
        let jobs = self
            .jobs
            .lock()
            .await
            .iter()
            .map(|job| JobStatus {
                job: job.kind,
                cadence: job.cadence.to_string(),
                next_run: local(job.next_run),
                last_run: job.last_run.map(local),
                state: job.state,
                last_error: job.last_error.clone(),
                last_summary: job.last_summary.clone(),
            })
            .collect();

        Ok(SchedulerStatus {
            current_time: format!(
                "{} {}",
                local(now),
                now.with_timezone(&tz).format("%Z")
            ),
            timezone: tz.name().to_string(),
            pipeline,
            jobs,
        })
    }

    /// Spawn the driver task.
    pub fn start(self: Arc<Self>) -> SchedulerHandle {
        let (shutdown, mut stopped) = watch::channel(false);
        let tick = self.plan.tick;

        let task = tokio::spawn(async move {
            tracing::info!(
                tick_secs = tick.as_secs(),
                timezone = %self.plan.tz.name(),
                "scheduler started"
            );
            let mut ticker = tokio::time::interval(tick);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let ran = self.tick(Utc::now()).await;
                        if !ran.is_empty() {
                            tracing::debug!(jobs = ?ran, "tick finished");
                        }
                    }
                    changed = stopped.changed() => {
                        if changed.is_err() || *stopped.borrow() {
                            break;
                        }
                    }
                }
            }
            tracing::info!("scheduler stopped");
        });

        SchedulerHandle { shutdown, task }
    }
}

/// Handle to a running driver.
pub struct SchedulerHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Ask the driver to stop and wait for it. A job already running
    /// finishes first.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            tracing::error!(error = %e, "scheduler task ended abnormally");
        }
    }
}
