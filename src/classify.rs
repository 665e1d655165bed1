//! Deterministic topic tagging and fiscal-period extraction.
//!
//! Both functions are pure: the same text always produces the same output,
//! independent of call order. The keyword sets are part of the persisted
//! data format, since stored pairs carry the tags they produced.

use regex::Regex;
use std::collections::BTreeSet;
use std::sync::LazyLock;

/// Tag assigned when no keyword set matches.
pub const DEFAULT_CATEGORY: &str = "general";

/// `(tag, keywords)` in output order.
pub const CATEGORY_KEYWORDS: &[(&str, &[&str])] = &[
    (
        "human_error",
        &["human error", "hea", "error avoidance", "mistake"],
    ),
    (
        "operations",
        &["operational", "process", "procedure", "workflow"],
    ),
    (
        "executive",
        &["strategic", "executive", "board", "ceo", "leadership"],
    ),
    (
        "financial",
        &["financial", "cost", "savings", "revenue", "budget"],
    ),
    (
        "dell_specific",
        &[
            "dell",
            "fiscal year",
            "fy20",
            "fy21",
            "fy22",
            "fy23",
            "fy24",
            "fy25",
        ],
    ),
    ("analysis", &["trend", "pattern", "analysis", "insight"]),
];

static FISCAL_PERIOD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)FY\s*(\d{4})|fiscal\s+year\s+(\d{4})").expect("fiscal period pattern")
});

/// Tag a question/answer pair by case-insensitive substring membership.
///
/// Never empty: zero matches yields `["general"]`.
pub fn categorize(question: &str, answer: &str) -> Vec<String> {
    let combined = format!("{} {}", question, answer).to_lowercase();

    let categories: Vec<String> = CATEGORY_KEYWORDS
        .iter()
        .filter(|(_, keywords)| keywords.iter().any(|k| combined.contains(k)))
        .map(|(tag, _)| tag.to_string())
        .collect();

    if categories.is_empty() {
        vec![DEFAULT_CATEGORY.to_string()]
    } else {
        categories
    }
}

/// Extract `FY<year>` labels ("FY 2024", "fy2023", "fiscal year 2022").
///
/// Deduplicated and sorted.
pub fn extract_fiscal_periods(text: &str) -> Vec<String> {
    let periods: BTreeSet<String> = FISCAL_PERIOD
        .captures_iter(text)
        .filter_map(|caps| caps.get(1).or_else(|| caps.get(2)))
        .map(|year| format!("FY{}", year.as_str()))
        .collect();
    periods.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unmatched_text_gets_default_tag() {
        assert_eq!(
            categorize("Where is the cafeteria?", "On the second floor."),
            vec!["general"]
        );
    }

    #[test]
    fn matches_across_question_and_answer() {
        let tags = categorize(
            "How do we reduce human error?",
            "Automate the deployment workflow and track the cost of each mistake.",
        );
        assert_eq!(tags, vec!["human_error", "operations", "financial"]);
    }

    #[test]
    fn matching_is_case_insensitive() {
        let tags = categorize("What did the CEO say?", "The BOARD approved the BUDGET.");
        assert_eq!(tags, vec!["executive", "financial"]);
    }

    #[test]
    fn categorization_is_deterministic() {
        let q = "What was the FY24 trend for Dell process errors?";
        let a = "Process errors fell as the leadership review cadence improved.";
        let first = categorize(q, a);
        let _ = categorize("unrelated", "call in between");
        assert_eq!(first, categorize(q, a));
        assert_eq!(
            first,
            vec!["operations", "executive", "dell_specific", "analysis"]
        );
    }

    #[test]
    fn fiscal_periods_are_normalized_and_deduplicated() {
        let periods = extract_fiscal_periods(
            "Compare FY 2024 with fy2023 and Fiscal Year 2024; FY2022 was flat.",
        );
        assert_eq!(periods, vec!["FY2022", "FY2023", "FY2024"]);
    }

    #[test]
    fn no_fiscal_periods() {
        assert!(extract_fiscal_periods("Q1 outage lasted 40 minutes").is_empty());
    }
}
