//! Implementations of the `kh` subcommands that act on a [`Harness`].
//!
//! Human-readable results go to stdout; progress and diagnostics go through
//! `tracing` to stderr.

use std::io::Read;
use std::path::Path;

use anyhow::{bail, Context, Result};
use chrono::Utc;

use crate::app::Harness;
use crate::models::{IngestPayload, Metadata};
use crate::scheduler::{JobKind, JobOutcome};

/// Ingest a JSON payload from `source` (`-` reads stdin).
pub async fn run_ingest(harness: &Harness, source: &Path) -> Result<()> {
    let text = if source == Path::new("-") {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("Failed to read payload from stdin")?;
        buf
    } else {
        std::fs::read_to_string(source)
            .with_context(|| format!("Failed to read {}", source.display()))?
    };

    let payload = IngestPayload::from_json_str(&text)?;
    let report = harness.knowledge.ingest(payload).await?;

    println!(
        "Ingested {} Q&A pairs ({} updated, {} rejected).",
        report.accepted, report.updated, report.rejected
    );
    Ok(())
}

pub async fn run_search(
    harness: &Harness,
    query: &str,
    limit: Option<usize>,
    min_confidence: Option<f64>,
) -> Result<()> {
    let retrieval = &harness.config.retrieval;
    let matches = harness
        .knowledge
        .search(
            query,
            limit.unwrap_or(retrieval.search_limit),
            min_confidence.unwrap_or(retrieval.search_min_confidence),
        )
        .await?;

    if matches.is_empty() {
        println!("No learned knowledge found.");
        return Ok(());
    }

    for (i, m) in matches.iter().enumerate() {
        println!("{}. [{:.2}] {}", i + 1, m.confidence, m.question);
        println!("    answer:     {}", m.answer);
        println!("    categories: {}", m.categories.join(", "));
        if !m.fiscal_periods.is_empty() {
            println!("    fiscal:     {}", m.fiscal_periods.join(", "));
        }
        println!("    source:     {}", m.source);
        println!();
    }
    Ok(())
}

pub async fn run_answer(harness: &Harness, question: &str, threshold: Option<f64>) -> Result<()> {
    let threshold = threshold.unwrap_or(harness.config.retrieval.answer_threshold);
    match harness.knowledge.get_answer(question, threshold).await? {
        Some(answer) => println!("{}", answer.text),
        None => println!(
            "No learned answer at or above {:.0}% confidence.",
            threshold * 100.0
        ),
    }
    Ok(())
}

pub async fn run_capture(
    harness: &Harness,
    query: &str,
    response: &str,
    meta: Vec<(String, String)>,
) -> Result<()> {
    let metadata: Metadata = meta
        .into_iter()
        .map(|(k, v)| (k, serde_json::Value::String(v)))
        .collect();
    let record = harness
        .interactions
        .capture(query, response, metadata, Utc::now())
        .await?;
    println!("Captured interaction {}", record.id);
    Ok(())
}

/// Load one file, or run the full daily ingestion job when `file` is `None`.
pub async fn run_load(harness: &Harness, file: Option<&Path>, archive: bool) -> Result<()> {
    let Some(file) = file else {
        let outcome = harness.scheduler.run_now(JobKind::DailyIngestion).await?;
        print_outcome(&outcome);
        return Ok(());
    };

    if !file.exists() {
        bail!("File not found: {}", file.display());
    }
    let report = harness.loader.load_source(file).await?;
    println!(
        "Loaded {}: {} rows read, {} committed in {} batches.",
        file.display(),
        report.rows_read,
        report.committed,
        report.batches_committed
    );
    if let Some(failure) = &report.failure {
        println!("Load stopped early: {}", failure);
    }
    if archive && (report.is_complete() || harness.config.ingestion.archive_partial_loads) {
        let archived = harness.backup.archive(file, Utc::now())?;
        println!("Archived to {}", archived.display());
    }
    Ok(())
}

/// Run one scheduled job immediately.
pub async fn run_job(harness: &Harness, kind: JobKind) -> Result<()> {
    let outcome = harness.scheduler.run_now(kind).await?;
    print_outcome(&outcome);
    Ok(())
}

fn print_outcome(outcome: &JobOutcome) {
    println!("{}", outcome.summary());
    if let JobOutcome::Ingestion(report) = outcome {
        for skipped in &report.skipped {
            println!("  skipped {}: {}", skipped.file.display(), skipped.reason);
        }
    }
}

pub async fn run_status(harness: &Harness, json: bool) -> Result<()> {
    let status = harness.scheduler.status(Utc::now()).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    println!("Knowledge Harness Scheduler");
    println!("===========================");
    println!();
    println!("  Now:           {}", status.current_time);
    println!("  Inbox:         {}", status.pipeline.inbox_dir.display());
    println!("  Backups:       {}", status.pipeline.backup_dir.display());
    println!("  Pending files: {}", status.pipeline.pending_files);
    println!(
        "  Interactions:  {} captured, {} unprocessed",
        status.pipeline.interactions_total, status.pipeline.interactions_pending
    );
    println!();
    println!(
        "  {:<22} {:<26} {:<20} {:<10}",
        "JOB", "CADENCE", "NEXT RUN", "STATE"
    );
    println!("  {}", "-".repeat(80));
    for job in &status.jobs {
        let state = format!("{:?}", job.state).to_lowercase();
        println!(
            "  {:<22} {:<26} {:<20} {:<10}",
            job.job.as_str(),
            job.cadence,
            job.next_run,
            state
        );
        if let Some(err) = &job.last_error {
            println!("      last error: {}", err);
        }
    }
    println!();
    Ok(())
}

pub async fn run_clear(harness: &Harness, yes: bool) -> Result<()> {
    if !yes {
        bail!("Refusing to clear learned knowledge without --yes");
    }
    let before = harness.knowledge.len().await;
    harness.knowledge.clear_all().await?;
    println!("Cleared {} learned Q&A pairs.", before);
    Ok(())
}

pub async fn run_repair(harness: &Harness) -> Result<()> {
    let repaired = harness.knowledge.reconcile().await?;
    println!("Re-indexed {} learned Q&A pairs.", repaired);
    Ok(())
}

/// Run the scheduler until Ctrl-C.
pub async fn run_scheduler(harness: &Harness) -> Result<()> {
    let handle = harness.scheduler.clone().start();
    println!(
        "Scheduler running ({}). Press Ctrl-C to stop.",
        harness.scheduler.timezone().name()
    );
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    tracing::info!("shutdown requested");
    handle.stop().await;
    Ok(())
}
