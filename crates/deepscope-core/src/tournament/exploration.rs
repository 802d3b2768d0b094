// Exploration parsing and prompt shaping
//
// Turns free-text remote responses into hypotheses, evidence, insights,
// and reproduction steps. All keyword heuristics come from the tables in
// keywords.rs; this module owns only the line-scanning mechanics and the
// exploration prompt shapes.

use chrono::Utc;
use regex::Regex;
use std::sync::OnceLock;
use uuid::Uuid;

use super::keywords;
use super::types::{Evidence, EvidencePolarity, Hypothesis};
use crate::context::CodeLocation;

fn code_ref_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(\w[\w/.-]*\.\w+):(\d+)").expect("pattern compiles"))
}

fn numbered_item_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?m)^\s*(\d+)[.)]\s+").expect("pattern compiles"))
}

fn priority_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)(?:priority|confidence)\s*[:=]?\s*(0?\.\d+|1\.0|0|1)\b")
            .expect("pattern compiles")
    })
}

fn step_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?m)^\s*(?:\d+[.)]|[-*])\s+(.+)$").expect("pattern compiles"))
}

/// Parse a numbered list of theories out of a generation response.
///
/// Accepts `1.` / `2)` item markers. Each block yields a theory (first
/// line), a test approach (a line starting with "test"/"approach" when
/// present, else the rest of the block), a keyword-detected category, and
/// a priority from an explicit number or confidence wording. Truncated
/// to `max`.
pub fn parse_hypotheses(response: &str, max: usize) -> Vec<Hypothesis> {
    let mut starts: Vec<usize> = numbered_item_pattern()
        .find_iter(response)
        .map(|m| m.start())
        .collect();
    starts.push(response.len());

    let mut hypotheses = Vec::new();
    for (ordinal, window) in starts.windows(2).enumerate() {
        if hypotheses.len() >= max {
            break;
        }
        let block = response[window[0]..window[1]].trim();
        let without_marker = numbered_item_pattern().replace(block, "");
        let mut lines = without_marker.lines();
        let theory = match lines.next() {
            Some(line) if !line.trim().is_empty() => line.trim().to_string(),
            _ => continue,
        };
        let rest: Vec<&str> = lines.map(str::trim).filter(|l| !l.is_empty()).collect();
        let test_approach = rest
            .iter()
            .find(|l| {
                let lower = l.to_lowercase();
                lower.starts_with("test") || lower.starts_with("approach")
            })
            .map(|l| strip_label(l))
            .unwrap_or_else(|| rest.join(" "));
        let test_approach = if test_approach.is_empty() {
            format!("Probe the code paths implied by: {theory}")
        } else {
            test_approach
        };

        let priority = priority_pattern()
            .captures(block)
            .and_then(|c| c.get(1))
            .and_then(|m| m.as_str().parse::<f64>().ok())
            .unwrap_or_else(|| keywords::confidence_from_wording(block))
            .clamp(0.0, 1.0);

        hypotheses.push(Hypothesis {
            id: Uuid::new_v4(),
            ordinal,
            category: keywords::category_from_text(block),
            theory,
            test_approach,
            priority,
        });
    }
    hypotheses
}

fn strip_label(line: &str) -> String {
    line.splitn(2, ':')
        .nth(1)
        .map(|s| s.trim().to_string())
        .unwrap_or_else(|| line.to_string())
}

/// Scan a response line by line and classify evidence.
///
/// A line is supporting or contradicting when it mentions a polarity
/// keyword; a `file.ext:line` reference becomes a code location; the
/// confidence comes from wording strength.
pub fn parse_evidence(response: &str) -> Vec<Evidence> {
    let mut out = Vec::new();
    for line in response.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let lower = trimmed.to_lowercase();
        let polarity = if keywords::CONTRADICTING.iter().any(|k| lower.contains(k)) {
            EvidencePolarity::Contradicting
        } else if keywords::SUPPORTING.iter().any(|k| lower.contains(k)) {
            EvidencePolarity::Supporting
        } else {
            continue;
        };

        let location = code_ref_pattern().captures(trimmed).and_then(|c| {
            let file = c.get(1)?.as_str().to_string();
            let line: u32 = c.get(2)?.as_str().parse().ok()?;
            Some(CodeLocation::new(file, line))
        });

        out.push(Evidence {
            polarity,
            description: trimmed.chars().take(500).collect(),
            location,
            confidence: keywords::confidence_from_wording(trimmed),
            discovered_at: Utc::now(),
        });
    }
    out
}

/// Pull shareable insights out of a response: pattern-level statements
/// plus explicitly labeled insight lines.
pub fn extract_insights(response: &str) -> Vec<String> {
    let mut out = Vec::new();
    for line in response.lines() {
        let trimmed = line.trim().trim_start_matches(['-', '*', ' ']);
        if trimmed.len() < 15 {
            continue;
        }
        let lower = trimmed.to_lowercase();
        let labeled = lower.starts_with("insight:") || lower.starts_with("key insight");
        if labeled || keywords::is_cross_pollination_worthy(trimmed) {
            let cleaned = trimmed
                .trim_start_matches("Insight:")
                .trim_start_matches("insight:")
                .trim()
                .to_string();
            if !out.contains(&cleaned) {
                out.push(cleaned);
            }
        }
    }
    out
}

/// Extract reproduction steps when the response reports success.
///
/// Success is keyword-gated; the steps are the numbered or bulleted
/// lines. Returns `None` when the attempt did not succeed or produced
/// no usable steps.
pub fn parse_reproduction_steps(response: &str) -> Option<Vec<String>> {
    let lower = response.to_lowercase();
    let succeeded = keywords::REPRODUCTION_SUCCESS
        .iter()
        .any(|k| lower.contains(k));
    if !succeeded {
        return None;
    }
    let steps: Vec<String> = step_pattern()
        .captures_iter(response)
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
        .collect();
    if steps.is_empty() {
        None
    } else {
        Some(steps)
    }
}

// ============================================================================
// Prompt shapes
// ============================================================================

/// Initial exploration prompt for one hypothesis.
///
/// From round two onward, includes the theories already eliminated and
/// the cross-round insights gathered so far.
pub fn exploration_question(
    issue: &str,
    hypothesis: &Hypothesis,
    round: u32,
    eliminated_theories: &[String],
    carried_insights: &[String],
) -> String {
    let mut prompt = format!(
        "Test this hypothesis about the issue.\n\
         Issue: {issue}\n\
         Theory: {}\n\
         Test approach: {}\n\
         Category: {}\n\
         Report concrete supporting or contradicting evidence with file:line references.",
        hypothesis.theory, hypothesis.test_approach, hypothesis.category
    );
    if round > 1 {
        if !eliminated_theories.is_empty() {
            prompt.push_str("\nTheories already ruled out:\n");
            for theory in eliminated_theories {
                prompt.push_str(&format!("- {theory}\n"));
            }
        }
        if !carried_insights.is_empty() {
            prompt.push_str("\nInsights from parallel investigations:\n");
            for insight in carried_insights {
                prompt.push_str(&format!("- {insight}\n"));
            }
        }
    }
    prompt
}

/// Follow-up asking for concrete reproduction steps
pub fn reproduction_question(hypothesis: &Hypothesis) -> String {
    format!(
        "The evidence supports this theory: {}. Provide concrete, numbered steps \
         to reproduce the problem, and state explicitly whether it is reproducible.",
        hypothesis.theory
    )
}

/// Prompt asking for N distinct theories about an issue
pub fn generation_question(issue: &str, count: usize) -> String {
    format!(
        "Propose exactly {count} distinct theories about the root cause of this issue.\n\
         Number each theory (1., 2., ...). For each, give: the theory on the first \
         line, a line starting with 'Approach:' describing how to test it, and a \
         line 'Priority: <0..1>' for how promising it is. Make the theories \
         genuinely different: cover performance, bugs, security, architecture, \
         and integration angles where plausible.\nIssue: {issue}"
    )
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tournament::types::HypothesisCategory;

    const GENERATION_RESPONSE: &str = "\
1. The connection pool is exhausted under concurrent load, causing slow requests.
   Approach: inspect pool sizing and wait times in db.rs
   Priority: 0.8
2. A race condition in the cache refresh leaves stale entries.
   Approach: trace the refresh path for unsynchronized writes
   Priority: 0.6
3) Authentication middleware leaks credentials into logs.
   Approach: audit log statements in auth paths
   Priority: 0.3";

    #[test]
    fn parses_numbered_hypotheses() {
        let hypotheses = parse_hypotheses(GENERATION_RESPONSE, 6);
        assert_eq!(hypotheses.len(), 3);
        assert!(hypotheses[0].theory.contains("connection pool"));
        assert_eq!(hypotheses[0].category, HypothesisCategory::Performance);
        assert!((hypotheses[0].priority - 0.8).abs() < 1e-9);
        assert!(hypotheses[1].theory.contains("race condition"));
        assert_eq!(hypotheses[2].category, HypothesisCategory::Security);
        assert!(hypotheses[0].test_approach.contains("pool sizing"));
    }

    #[test]
    fn truncates_to_requested_count() {
        let hypotheses = parse_hypotheses(GENERATION_RESPONSE, 2);
        assert_eq!(hypotheses.len(), 2);
    }

    #[test]
    fn ordinals_follow_generation_order() {
        let hypotheses = parse_hypotheses(GENERATION_RESPONSE, 6);
        let ordinals: Vec<usize> = hypotheses.iter().map(|h| h.ordinal).collect();
        assert_eq!(ordinals, vec![0, 1, 2]);
    }

    #[test]
    fn no_numbered_items_yields_empty() {
        assert!(parse_hypotheses("I cannot think of any theories.", 6).is_empty());
    }

    #[test]
    fn priority_falls_back_to_wording() {
        let response = "1. This is likely a caching problem.\n   Approach: check TTLs";
        let hypotheses = parse_hypotheses(response, 6);
        assert!((hypotheses[0].priority - 0.6).abs() < 1e-9);
    }

    #[test]
    fn evidence_polarity_and_location() {
        let response = "\
Testing confirmed the pool exhaustion at db/pool.rs:42.
The retry theory is unlikely; no evidence of retries in the logs.
The weather is nice today.";
        let evidence = parse_evidence(response);
        assert_eq!(evidence.len(), 2);
        assert_eq!(evidence[0].polarity, EvidencePolarity::Supporting);
        let loc = evidence[0].location.as_ref().unwrap();
        assert_eq!(loc.file, "db/pool.rs");
        assert_eq!(loc.line, 42);
        assert_eq!(evidence[1].polarity, EvidencePolarity::Contradicting);
        assert!(evidence[1].location.is_none());
    }

    #[test]
    fn contradicting_wins_over_supporting_in_same_line() {
        // "no evidence" must not read as supporting via "evidence".
        let evidence = parse_evidence("Found no evidence of leaks.");
        assert_eq!(evidence.len(), 1);
        assert_eq!(evidence[0].polarity, EvidencePolarity::Contradicting);
    }

    #[test]
    fn evidence_confidence_from_wording() {
        let evidence = parse_evidence("This definitely confirms the theory.");
        assert!((evidence[0].confidence - 0.85).abs() < 1e-9);
        let evidence = parse_evidence("This might support the theory.");
        assert!((evidence[0].confidence - 0.3).abs() < 1e-9);
    }

    #[test]
    fn insights_require_pattern_level_wording() {
        let response = "\
Insight: every handler repeats this retry pattern without backoff.
The same timeout default is common across all services.
x is 3.";
        let insights = extract_insights(response);
        assert_eq!(insights.len(), 2);
        assert!(insights[0].contains("retry pattern"));
    }

    #[test]
    fn reproduction_steps_extracted_on_success() {
        let response = "\
Yes, this is reproducible:
1. Start the server with a pool size of 1
2. Fire 50 concurrent requests
3. Observe timeouts after the tenth request";
        let steps = parse_reproduction_steps(response).unwrap();
        assert_eq!(steps.len(), 3);
        assert!(steps[1].contains("50 concurrent"));
    }

    #[test]
    fn reproduction_absent_without_success_wording() {
        assert!(parse_reproduction_steps("1. try this\n2. try that").is_none());
        assert!(parse_reproduction_steps("I could not trigger it.").is_none());
    }

    #[test]
    fn round_two_prompt_carries_history() {
        let hypothesis = parse_hypotheses(GENERATION_RESPONSE, 1).remove(0);
        let prompt = exploration_question(
            "slow orders page",
            &hypothesis,
            2,
            &["the cache theory".to_string()],
            &["connection handling is a common pattern".to_string()],
        );
        assert!(prompt.contains("already ruled out"));
        assert!(prompt.contains("the cache theory"));
        assert!(prompt.contains("parallel investigations"));

        let round_one = exploration_question("slow orders page", &hypothesis, 1, &[], &[]);
        assert!(!round_one.contains("ruled out"));
    }
}
