// Tournament domain types
//
// Hypotheses, evidence, per-exploration results, rounds, and the final
// tournament report, plus the evidence-weighted confidence score and the
// deterministic ranking used for elimination and winner selection.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::context::{CodeLocation, Finding};
use crate::result::{AnalysisStatus, RecommendedAction};

/// Confidences closer than this are considered tied
pub const CONFIDENCE_EPSILON: f64 = 1e-6;

/// Category of a hypothesis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HypothesisCategory {
    Performance,
    Bug,
    Security,
    Architecture,
    Integration,
}

impl std::fmt::Display for HypothesisCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HypothesisCategory::Performance => write!(f, "performance"),
            HypothesisCategory::Bug => write!(f, "bug"),
            HypothesisCategory::Security => write!(f, "security"),
            HypothesisCategory::Architecture => write!(f, "architecture"),
            HypothesisCategory::Integration => write!(f, "integration"),
        }
    }
}

/// A theory about the root cause, carrying its own exploration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Hypothesis {
    pub id: Uuid,
    /// Position in generation order; lowest ordinal wins final ties
    pub ordinal: usize,
    pub theory: String,
    pub test_approach: String,
    pub category: HypothesisCategory,
    /// Prior priority in [0,1] assigned at generation time
    pub priority: f64,
}

/// Polarity of one piece of evidence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvidencePolarity {
    Supporting,
    Contradicting,
    Neutral,
}

/// One piece of evidence gathered during exploration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Evidence {
    pub polarity: EvidencePolarity,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<CodeLocation>,
    /// Strength in [0,1] derived from wording
    pub confidence: f64,
    pub discovered_at: DateTime<Utc>,
}

/// Outcome of exploring one hypothesis in one round
#[derive(Debug, Clone, Serialize)]
pub struct ExplorationResult {
    pub hypothesis: Hypothesis,
    pub session_id: Uuid,
    pub evidence: Vec<Evidence>,
    /// Overall confidence in [0,1] from the evidence score
    pub confidence: f64,
    /// Turn count of the exploration session
    pub depth: u32,
    pub insights: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reproduction_steps: Option<Vec<String>>,
    /// Serendipitous discoveries unrelated to this hypothesis
    pub related_findings: Vec<Finding>,
}

impl ExplorationResult {
    pub fn supporting_count(&self) -> usize {
        self.evidence
            .iter()
            .filter(|e| e.polarity == EvidencePolarity::Supporting)
            .count()
    }
}

/// One synchronous pass of explorations plus its elimination outcome
#[derive(Debug, Clone, Serialize)]
pub struct TournamentRound {
    pub number: u32,
    pub hypothesis_ids: Vec<Uuid>,
    pub results: Vec<ExplorationResult>,
    pub eliminated: Vec<Uuid>,
    /// Pattern-level insights shared forward from this round
    pub cross_insights: Vec<String>,
}

/// Tournament configuration with spec'd defaults and clamp ranges
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TournamentConfig {
    pub max_hypotheses: usize,
    pub max_rounds: u32,
    pub elimination_threshold: f64,
    pub parallelism: usize,
    pub cross_pollination: bool,
}

impl Default for TournamentConfig {
    fn default() -> Self {
        Self {
            max_hypotheses: 6,
            max_rounds: 3,
            elimination_threshold: 0.3,
            parallelism: 4,
            cross_pollination: true,
        }
    }
}

impl TournamentConfig {
    /// Clamp every field into its allowed range
    pub fn clamped(mut self) -> Self {
        self.max_hypotheses = self.max_hypotheses.clamp(2, 20);
        self.max_rounds = self.max_rounds.clamp(1, 5);
        self.elimination_threshold = self.elimination_threshold.clamp(0.0, 1.0);
        self.parallelism = self.parallelism.clamp(1, 10);
        self
    }
}

/// Final tournament report
#[derive(Debug, Clone, Serialize)]
pub struct TournamentResult {
    pub issue: String,
    pub status: AnalysisStatus,
    pub total_hypotheses: usize,
    pub rounds: Vec<TournamentRound>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub winner: Option<ExplorationResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub runner_up: Option<ExplorationResult>,
    /// Aggregated serendipitous findings across all explorations
    pub findings: Vec<Finding>,
    pub primary_actions: Vec<RecommendedAction>,
    pub secondary_actions: Vec<RecommendedAction>,
    pub duration_secs: f64,
    pub parallel_efficiency: f64,
}

// ============================================================================
// Scoring and ranking
// ============================================================================

/// Evidence-weighted confidence in [0,1].
///
/// Signed sum S of per-item confidences (supporting positive,
/// contradicting negative, neutral zero) over total magnitude T,
/// normalized as (T + S) / 2T. No directional evidence at all scores 0.5
/// when the exploration produced insights, 0 otherwise.
pub fn score_evidence(evidence: &[Evidence], has_insights: bool) -> f64 {
    let mut signed = 0.0;
    let mut magnitude = 0.0;
    for item in evidence {
        match item.polarity {
            EvidencePolarity::Supporting => {
                signed += item.confidence;
                magnitude += item.confidence;
            }
            EvidencePolarity::Contradicting => {
                signed -= item.confidence;
                magnitude += item.confidence;
            }
            EvidencePolarity::Neutral => {}
        }
    }
    if magnitude <= f64::EPSILON {
        return if has_insights { 0.5 } else { 0.0 };
    }
    ((magnitude + signed) / (2.0 * magnitude)).clamp(0.0, 1.0)
}

/// Total-order comparison for elimination ranking and winner selection.
///
/// Higher confidence first; ties within [`CONFIDENCE_EPSILON`] prefer
/// more supporting evidence, then the lower generation ordinal.
pub fn compare_results(a: &ExplorationResult, b: &ExplorationResult) -> std::cmp::Ordering {
    use std::cmp::Ordering;
    if (a.confidence - b.confidence).abs() >= CONFIDENCE_EPSILON {
        return b
            .confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(Ordering::Equal);
    }
    match b.supporting_count().cmp(&a.supporting_count()) {
        Ordering::Equal => a.hypothesis.ordinal.cmp(&b.hypothesis.ordinal),
        other => other,
    }
}

// ============================================================================
// Tests
// ============================================================================
