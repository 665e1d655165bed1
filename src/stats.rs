//! Learning statistics and health overview.
//!
//! [`LearningStats`] summarizes the learned pair list: category and
//! fiscal-period counts, recent additions, and the most used answers.
//! `kh stats` prints it together with index and interaction-log counts to
//! give confidence that ingestion and learning are keeping up.

use std::collections::BTreeMap;

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::app::Harness;
use crate::models::QaPair;
use crate::persist::{category_counts, fiscal_period_counts};

/// Pairs created within this window count as recent.
pub const RECENT_WINDOW_DAYS: i64 = 7;
/// Length of the most-used list.
pub const MOST_USED_LIMIT: usize = 5;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct UsageEntry {
    pub question_id: String,
    pub question: String,
    pub usage_count: u64,
    pub last_used_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct LearningStats {
    pub total_pairs: usize,
    pub categories: BTreeMap<String, usize>,
    pub fiscal_periods: BTreeMap<String, usize>,
    /// Pairs created less than seven days before `now`.
    pub recent_pairs: usize,
    /// Up to five pairs with nonzero usage, most used first.
    pub most_used: Vec<UsageEntry>,
    /// Newest creation time; `None` for an empty list.
    pub last_updated: Option<DateTime<Utc>>,
}

impl LearningStats {
    pub fn compute(pairs: &[QaPair], now: DateTime<Utc>) -> Self {
        let window = Duration::days(RECENT_WINDOW_DAYS);

        let mut used: Vec<&QaPair> = pairs.iter().filter(|p| p.usage_count > 0).collect();
        used.sort_by(|a, b| b.usage_count.cmp(&a.usage_count));

        Self {
            total_pairs: pairs.len(),
            categories: category_counts(pairs),
            fiscal_periods: fiscal_period_counts(pairs),
            recent_pairs: pairs
                .iter()
                .filter(|p| now.signed_duration_since(p.created_at) < window)
                .count(),
            most_used: used
                .into_iter()
                .take(MOST_USED_LIMIT)
                .map(|p| UsageEntry {
                    question_id: p.question_id.clone(),
                    question: p.question.clone(),
                    usage_count: p.usage_count,
                    last_used_at: p.last_used_at,
                })
                .collect(),
            last_updated: pairs.iter().map(|p| p.created_at).max(),
        }
    }
}

/// Run the stats command: gather counts and print a summary.
pub async fn run_stats(harness: &Harness) -> Result<()> {
    let now = Utc::now();
    let stats = harness.knowledge.stats(now).await;
    let knowledge_entries = harness.knowledge_index.count().await?;
    let operations_entries = harness.operations_index.count().await?;
    let interactions_total = harness.interactions.total().await;
    let interactions_pending = harness.interactions.unprocessed_count().await;

    let index_db = harness.config.paths.index_db();
    let db_size = std::fs::metadata(&index_db).map(|m| m.len()).unwrap_or(0);

    println!("Knowledge Harness Learning Stats");
    println!("===============================");
    println!();
    println!("  Index:        {}", index_db.display());
    println!("  Size:         {}", format_bytes(db_size));
    println!();
    println!(
        "  Learned:      {} ({} in the last {} days)",
        stats.total_pairs, stats.recent_pairs, RECENT_WINDOW_DAYS
    );
    println!(
        "  Indexed:      {} learned, {} operational rows",
        knowledge_entries, operations_entries
    );
    println!(
        "  Interactions: {} captured, {} pending",
        interactions_total, interactions_pending
    );
    println!(
        "  Last update:  {}",
        stats
            .last_updated
            .map(|ts| format_ts_relative(ts, now))
            .unwrap_or_else(|| "never".to_string())
    );

    if !stats.categories.is_empty() {
        println!();
        println!("  By category:");
        for (category, count) in &stats.categories {
            println!("  {:<24} {:>6}", category, count);
        }
    }

    if !stats.fiscal_periods.is_empty() {
        println!();
        println!("  By fiscal period:");
        for (period, count) in &stats.fiscal_periods {
            println!("  {:<24} {:>6}", period, count);
        }
    }

    if !stats.most_used.is_empty() {
        println!();
        println!("  Most used:");
        println!("  {:>6}   {}", "USES", "QUESTION");
        println!("  {}", "-".repeat(60));
        for entry in &stats.most_used {
            println!("  {:>6}   {}", entry.usage_count, entry.question);
        }
    }

    println!();
    Ok(())
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

/// Format a timestamp relative to `now` (e.g. "3 hours ago").
fn format_ts_relative(ts: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let delta = (now - ts).num_seconds();

    if delta < 0 {
        return ts.format("%Y-%m-%d %H:%M").to_string();
    }

    if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else if delta < 86400 * 30 {
        let days = delta / 86400;
        format!("{} day{} ago", days, if days == 1 { "" } else { "s" })
    } else {
        ts.format("%Y-%m-%d %H:%M").to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::question_id;
    use chrono::TimeZone;

    fn pair(question: &str, usage: u64, created_day: u32) -> QaPair {
        QaPair {
            question: question.to_string(),
            answer: "An answer long enough.".to_string(),
            question_id: question_id(question),
            categories: vec!["general".to_string()],
            fiscal_periods: vec![],
            confidence_score: 1.0,
            usage_count: usage,
            last_used_at: None,
            created_at: Utc.with_ymd_and_hms(2024, 3, created_day, 0, 0, 0).unwrap(),
            source: "user_provided".to_string(),
            session: None,
            extra: Default::default(),
        }
    }

    #[test]
    fn empty_list() {
        let stats = LearningStats::compute(&[], Utc::now());
        assert_eq!(stats.total_pairs, 0);
        assert!(stats.most_used.is_empty());
        assert!(stats.last_updated.is_none());
    }

    #[test]
    fn recent_window_and_most_used() {
        let now = Utc.with_ymd_and_hms(2024, 3, 20, 0, 0, 0).unwrap();
        let pairs: Vec<QaPair> = vec![
            pair("q-old", 0, 1),
            pair("q-edge", 2, 13),
            pair("q-a", 9, 14),
            pair("q-b", 4, 15),
            pair("q-c", 4, 16),
            pair("q-d", 1, 17),
            pair("q-e", 7, 18),
        ];
        let stats = LearningStats::compute(&pairs, now);

        // Exactly seven days old is no longer recent.
        assert_eq!(stats.recent_pairs, 5);
        let order: Vec<&str> = stats.most_used.iter().map(|u| u.question.as_str()).collect();
        assert_eq!(order, vec!["q-a", "q-e", "q-b", "q-c", "q-edge"]);
        assert_eq!(
            stats.last_updated,
            Some(Utc.with_ymd_and_hms(2024, 3, 18, 0, 0, 0).unwrap())
        );
        assert_eq!(stats.categories["general"], 7);
    }

    #[test]
    fn relative_time_formatting() {
        let now = Utc.with_ymd_and_hms(2024, 3, 20, 12, 0, 0).unwrap();
        assert_eq!(format_ts_relative(now, now), "just now");
        assert_eq!(
            format_ts_relative(now - Duration::hours(3), now),
            "3 hours ago"
        );
        assert_eq!(format_bytes(2048), "2.0 KB");
    }
}
