// Keyword tables for tournament heuristics
//
// Polarity, confidence-wording, category, and pattern keyword lists live
// here as data so they can be tuned and tested in one place instead of
// being inlined across the scheduler.

use super::types::HypothesisCategory;

/// A line mentioning any of these reads as supporting evidence
pub const SUPPORTING: &[&str] = &[
    "confirm",
    "validate",
    "support",
    "consistent with",
    "aligns with",
    "indicates",
    "found",
    "discovered",
    "identified",
    "observed",
];

/// A line mentioning any of these reads as contradicting evidence
pub const CONTRADICTING: &[&str] = &[
    "contradict",
    "disprove",
    "inconsistent",
    "rules out",
    "unlikely",
    "no evidence",
    "not found",
    "absence of",
];

/// Strong confidence wording (maps to 0.8+)
pub const STRONG_WORDS: &[&str] = &["certainly", "definitely", "conclusively", "clearly"];

/// Moderate confidence wording (maps to 0.5+)
pub const MODERATE_WORDS: &[&str] = &["likely", "probably", "appears"];

/// Weak confidence wording (maps to 0.2+)
pub const WEAK_WORDS: &[&str] = &["possibly", "might", "may", "perhaps", "could be"];

/// Insights mentioning these words are pattern-level and worth
/// cross-pollinating into struggling sessions
pub const CROSS_POLLINATION: &[&str] = &["pattern", "common", "related", "system-wide"];

/// A reproduction attempt succeeded if the response mentions any of these
pub const REPRODUCTION_SUCCESS: &[&str] = &[
    "reproduce",
    "reproduced",
    "reproducible",
    "steps to reproduce",
    "can be triggered",
    "triggers the",
];

/// Category detection keywords, checked in order; first hit wins
pub const CATEGORY_KEYWORDS: &[(HypothesisCategory, &[&str])] = &[
    (
        HypothesisCategory::Performance,
        &[
            "slow", "latency", "performance", "n+1", "throughput", "timeout", "cpu", "memory",
            "exhaust", "load",
        ],
    ),
    (
        HypothesisCategory::Security,
        &["security", "injection", "auth", "leak", "credential", "escalation"],
    ),
    (
        HypothesisCategory::Integration,
        &["integration", "api contract", "boundary", "version mismatch", "serialization", "protocol"],
    ),
    (
        HypothesisCategory::Architecture,
        &["architecture", "coupling", "design", "layering", "circular"],
    ),
    (
        HypothesisCategory::Bug,
        &["bug", "race", "off-by-one", "null", "crash", "deadlock", "logic error"],
    ),
];

/// Map wording strength to a confidence value
pub fn confidence_from_wording(text: &str) -> f64 {
    let lower = text.to_lowercase();
    if STRONG_WORDS.iter().any(|w| lower.contains(w)) {
        0.85
    } else if MODERATE_WORDS.iter().any(|w| lower.contains(w)) {
        0.6
    } else if WEAK_WORDS.iter().any(|w| lower.contains(w)) {
        0.3
    } else {
        0.5
    }
}

/// Detect a hypothesis category from free text; defaults to Bug
pub fn category_from_text(text: &str) -> HypothesisCategory {
    let lower = text.to_lowercase();
    for (category, keywords) in CATEGORY_KEYWORDS {
        if keywords.iter().any(|k| lower.contains(k)) {
            return *category;
        }
    }
    HypothesisCategory::Bug
}

/// Is this insight pattern-level enough to share across sessions?
pub fn is_cross_pollination_worthy(insight: &str) -> bool {
    let lower = insight.to_lowercase();
    CROSS_POLLINATION.iter().any(|k| lower.contains(k))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wording_strength_tiers() {
        assert_eq!(confidence_from_wording("this is definitely the cause"), 0.85);
        assert_eq!(confidence_from_wording("this is likely the cause"), 0.6);
        assert_eq!(confidence_from_wording("this might be the cause"), 0.3);
        assert_eq!(confidence_from_wording("the cause is here"), 0.5);
    }

    #[test]
    fn category_detection() {
        assert_eq!(
            category_from_text("an N+1 query pattern causing slow pages"),
            HypothesisCategory::Performance
        );
        assert_eq!(
            category_from_text("SQL injection in the login form"),
            HypothesisCategory::Security
        );
        assert_eq!(
            category_from_text("a race between the writer threads"),
            HypothesisCategory::Bug
        );
        assert_eq!(category_from_text("nothing specific"), HypothesisCategory::Bug);
    }

    #[test]
    fn cross_pollination_gate() {
        assert!(is_cross_pollination_worthy(
            "this pattern shows up in every handler"
        ));
        assert!(is_cross_pollination_worthy("a system-wide timeout default"));
        assert!(!is_cross_pollination_worthy("the variable x is unused"));
    }
}
