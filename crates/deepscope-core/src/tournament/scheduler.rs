// Hypothesis tournament scheduler
//
// Generates competing theories, explores them in bounded-parallel rounds,
// eliminates the weak, cross-pollinates pattern-level insights from
// confident sessions into struggling ones, and converges on a ranked
// winner with recommendations. One hypothesis failing never fails the
// round: it degrades to a synthetic low-confidence result.

use chrono::Utc;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::exploration::{
    exploration_question, extract_insights, generation_question, parse_evidence,
    parse_hypotheses, parse_reproduction_steps, reproduction_question,
};
use super::keywords;
use super::types::{
    compare_results, score_evidence, Evidence, EvidencePolarity, ExplorationResult, Hypothesis,
    HypothesisCategory, TournamentConfig, TournamentResult, TournamentRound,
};
use crate::adapter::{DialogueAdapter, SummaryFormat};
use crate::context::{AnalysisContext, AnalysisKind, CodeLocation, Finding, FindingKind, Severity};
use crate::error::{AnalysisError, Result};
use crate::orchestrator::ConversationOrchestrator;
use crate::reader::SecureReader;
use crate::result::{AnalysisResult, AnalysisStatus, RecommendedAction, RootCause};
use crate::session_manager::SessionManager;

/// Root causes below this confidence are serendipitous, not primary
const SERENDIPITY_THRESHOLD: f64 = 0.5;

/// Confidence below which a surviving session is considered struggling
const STRUGGLING_THRESHOLD: f64 = 0.5;

/// Insight sources must be at least this confident to pollinate
const POLLINATION_SOURCE_THRESHOLD: f64 = 0.6;

/// Orchestrates hypothesis tournaments over the conversation machinery
pub struct TournamentScheduler {
    manager: Arc<SessionManager>,
    adapter: Arc<DialogueAdapter>,
    orchestrator: Arc<ConversationOrchestrator>,
    reader: Arc<SecureReader>,
}

impl TournamentScheduler {
    pub fn new(
        manager: Arc<SessionManager>,
        adapter: Arc<DialogueAdapter>,
        orchestrator: Arc<ConversationOrchestrator>,
        reader: Arc<SecureReader>,
    ) -> Self {
        Self {
            manager,
            adapter,
            orchestrator,
            reader,
        }
    }

    /// Run a full tournament for the given issue
    pub async fn run(
        &self,
        context: AnalysisContext,
        issue: &str,
        config: TournamentConfig,
    ) -> Result<TournamentResult> {
        let config = config.clamped();
        let started_at = Instant::now();
        let deadline = started_at + Duration::from_secs(context.time_budget_secs.max(1));

        let hypotheses = self
            .generate_hypotheses(&context, issue, config.max_hypotheses)
            .await?;
        let total_hypotheses = hypotheses.len();
        info!(total_hypotheses, issue, "tournament starting");

        let mut rounds: Vec<TournamentRound> = Vec::new();
        let mut survivors = hypotheses;
        let mut eliminated_theories: Vec<String> = Vec::new();
        let mut carried_insights: Vec<String> = Vec::new();
        let mut all_findings: Vec<Finding> = Vec::new();
        let mut last_results: Vec<ExplorationResult> = Vec::new();
        let mut status = AnalysisStatus::Success;

        'rounds: for round_no in 1..=config.max_rounds {
            if survivors.len() <= 1 && round_no > 1 {
                break;
            }
            if Instant::now() >= deadline {
                warn!(round = round_no, "tournament budget expired before round");
                status = AnalysisStatus::Partial;
                break;
            }

            // Warm the reader cache so every session in the round shares
            // one read of the focus files.
            self.reader.read_many(&context.code_scope.files).await?;

            let mut results: Vec<ExplorationResult> = Vec::new();
            let mut expired_mid_round = false;
            for batch in survivors.chunks(config.parallelism) {
                if Instant::now() >= deadline {
                    warn!(round = round_no, "tournament budget expired mid-round");
                    status = AnalysisStatus::Partial;
                    expired_mid_round = true;
                    break;
                }
                let futures = batch.iter().map(|hypothesis| {
                    self.explore(
                        &context,
                        issue,
                        hypothesis,
                        round_no,
                        &eliminated_theories,
                        &carried_insights,
                    )
                });
                let outcomes = futures::future::join_all(futures).await;
                for (hypothesis, outcome) in batch.iter().zip(outcomes) {
                    results.push(match outcome {
                        Ok(result) => result,
                        Err(err) => {
                            warn!(
                                hypothesis = %hypothesis.theory,
                                error = %err,
                                "exploration failed; recording synthetic result"
                            );
                            synthetic_failure(hypothesis.clone(), &err)
                        }
                    });
                }
            }

            results.sort_by(compare_results);
            for result in &results {
                all_findings.extend(result.related_findings.clone());
            }

            // Findings gathered before expiry are preserved in a partial
            // round; nothing after it runs.
            if expired_mid_round {
                rounds.push(TournamentRound {
                    number: round_no,
                    hypothesis_ids: results.iter().map(|r| r.hypothesis.id).collect(),
                    results: results.clone(),
                    eliminated: Vec::new(),
                    cross_insights: Vec::new(),
                });
                last_results = results;
                break 'rounds;
            }

            // Elimination: drop below-threshold results, then keep the
            // top half (ceil of the round's field size).
            let keep_count = results.len().div_ceil(2);
            let kept_ids: Vec<Uuid> = results
                .iter()
                .filter(|r| r.confidence >= config.elimination_threshold)
                .take(keep_count)
                .map(|r| r.hypothesis.id)
                .collect();
            let eliminated_ids: Vec<Uuid> = results
                .iter()
                .filter(|r| !kept_ids.contains(&r.hypothesis.id))
                .map(|r| r.hypothesis.id)
                .collect();
            for result in &results {
                if eliminated_ids.contains(&result.hypothesis.id) {
                    eliminated_theories.push(result.hypothesis.theory.clone());
                }
            }

            // Cross-pollination: pattern-level insights from confident,
            // already-finalized results feed struggling survivors.
            let mut cross_insights: Vec<String> = Vec::new();
            if config.cross_pollination && kept_ids.len() >= 2 {
                cross_insights = significant_insights(&results);
                if !cross_insights.is_empty() {
                    self.pollinate(&results, &kept_ids, &cross_insights).await;
                    for insight in &cross_insights {
                        if !carried_insights.contains(insight) {
                            carried_insights.push(insight.clone());
                        }
                    }
                }
            }

            debug!(
                round = round_no,
                explored = results.len(),
                kept = kept_ids.len(),
                "round complete"
            );
            survivors = results
                .iter()
                .filter(|r| kept_ids.contains(&r.hypothesis.id))
                .map(|r| r.hypothesis.clone())
                .collect();
            rounds.push(TournamentRound {
                number: round_no,
                hypothesis_ids: results.iter().map(|r| r.hypothesis.id).collect(),
                results: results.clone(),
                eliminated: eliminated_ids,
                cross_insights,
            });
            last_results = results;

            if survivors.len() <= 1 {
                break;
            }
        }

        let mut ranked = last_results;
        ranked.sort_by(compare_results);
        let winner = ranked.first().cloned();
        let runner_up = ranked.get(1).cloned();

        let duration_secs = started_at.elapsed().as_secs_f64();
        let rounds_run = rounds.len().max(1);
        // Work performed per wall-second relative to a serial schedule.
        let parallel_efficiency = if duration_secs > 0.0 {
            (total_hypotheses as f64 * (duration_secs / rounds_run as f64)) / duration_secs
        } else {
            0.0
        };

        let (mut primary_actions, secondary_actions) =
            build_recommendations(winner.as_ref(), runner_up.as_ref(), &all_findings);
        if status == AnalysisStatus::Partial {
            primary_actions.insert(
                0,
                RecommendedAction::new(
                    format!(
                        "the tournament stopped early: its {}s budget expired; results \
                         cover {} of {} planned rounds",
                        context.time_budget_secs,
                        rounds.len(),
                        config.max_rounds
                    ),
                    Severity::High,
                ),
            );
        }

        // Exploration sessions have served their purpose.
        for round in &rounds {
            for result in &round.results {
                self.manager.remove(result.session_id).await;
            }
        }

        info!(
            winner = ?winner.as_ref().map(|w| w.hypothesis.theory.as_str()),
            duration_secs,
            "tournament finished"
        );
        Ok(TournamentResult {
            issue: issue.to_string(),
            status,
            total_hypotheses,
            rounds,
            winner,
            runner_up,
            findings: all_findings,
            primary_actions,
            secondary_actions,
            duration_secs,
            parallel_efficiency,
        })
    }

    /// Ask the remote for distinct theories via a scratch session
    async fn generate_hypotheses(
        &self,
        context: &AnalysisContext,
        issue: &str,
        max: usize,
    ) -> Result<Vec<Hypothesis>> {
        let question = generation_question(issue, max);
        let started = self
            .orchestrator
            .start_conversation(
                context.clone(),
                AnalysisKind::HypothesisTest,
                Some(&question),
            )
            .await?;
        let hypotheses = parse_hypotheses(&started.initial_response, max);
        self.manager.remove(started.session_id).await;

        if hypotheses.is_empty() {
            return Err(AnalysisError::parse(
                "hypothesis generation produced no parseable numbered theories",
            ));
        }
        Ok(hypotheses)
    }

    /// Explore one hypothesis in its own session.
    ///
    /// Protocol: initial exploration prompt (with prior eliminations and
    /// carried insights from round two on), evidence extraction, an
    /// optional reproduction probe when the preliminary score clears 0.5,
    /// then an actionable finalize whose low-confidence root causes become
    /// serendipitous findings. The session is left open for pollination.
    async fn explore(
        &self,
        context: &AnalysisContext,
        issue: &str,
        hypothesis: &Hypothesis,
        round: u32,
        eliminated_theories: &[String],
        carried_insights: &[String],
    ) -> Result<ExplorationResult> {
        let mut session_context = context.clone();
        session_context.push_stuck_point(format!("Testing: {}", hypothesis.theory));

        let question = exploration_question(
            issue,
            hypothesis,
            round,
            eliminated_theories,
            carried_insights,
        );
        let started = self
            .orchestrator
            .start_conversation(
                session_context,
                AnalysisKind::HypothesisTest,
                Some(&question),
            )
            .await?;
        let session_id = started.session_id;

        let mut evidence = parse_evidence(&started.initial_response);
        let mut insights = extract_insights(&started.initial_response);
        let mut reproduction_steps = None;

        let preliminary = score_evidence(&evidence, !insights.is_empty());
        if preliminary > 0.5 {
            let question = reproduction_question(hypothesis);
            match self
                .orchestrator
                .continue_conversation(session_id, &question, false)
                .await
            {
                Ok(continued) => {
                    evidence.extend(parse_evidence(&continued.response));
                    for insight in extract_insights(&continued.response) {
                        if !insights.contains(&insight) {
                            insights.push(insight);
                        }
                    }
                    reproduction_steps = parse_reproduction_steps(&continued.response);
                }
                Err(err) => {
                    warn!(session_id = %session_id, error = %err, "reproduction probe failed");
                }
            }
        }

        let related_findings = match self.finalize_exploration(session_id).await {
            Ok(result) => serendipitous_findings(&result.root_causes),
            Err(err) => {
                warn!(session_id = %session_id, error = %err, "exploration finalize failed");
                Vec::new()
            }
        };

        let depth = self
            .manager
            .get(session_id)
            .await
            .map(|s| s.turn_count)
            .unwrap_or_default();
        let confidence = score_evidence(&evidence, !insights.is_empty());

        Ok(ExplorationResult {
            hypothesis: hypothesis.clone(),
            session_id,
            evidence,
            confidence,
            depth,
            insights,
            reproduction_steps,
            related_findings,
        })
    }

    /// Finalize an exploration without closing its session, so a
    /// pollination follow-up can still reach it within the round.
    async fn finalize_exploration(&self, session_id: Uuid) -> Result<AnalysisResult> {
        if !self.manager.acquire_lock(session_id).await {
            return Err(AnalysisError::SessionLocked(session_id));
        }
        let result = async {
            let chat = self.manager.chat(session_id).await?;
            let mut chat = chat.lock().await;
            self.adapter
                .finalize(chat.as_mut(), SummaryFormat::Actionable)
                .await
        }
        .await;
        self.manager.release_lock(session_id).await;
        result
    }

    /// Feed significant insights into each struggling surviving session
    async fn pollinate(
        &self,
        results: &[ExplorationResult],
        kept_ids: &[Uuid],
        insights: &[String],
    ) {
        let digest = insights
            .iter()
            .map(|i| format!("- {i}"))
            .collect::<Vec<_>>()
            .join("\n");
        for result in results {
            if !kept_ids.contains(&result.hypothesis.id)
                || result.confidence >= STRUGGLING_THRESHOLD
            {
                continue;
            }
            let message = format!(
                "Parallel investigations of the same issue surfaced these \
                 pattern-level insights:\n{digest}\nReassess your theory in light of them."
            );
            if let Err(err) = self
                .orchestrator
                .continue_conversation(result.session_id, &message, false)
                .await
            {
                warn!(
                    session_id = %result.session_id,
                    error = %err,
                    "cross-pollination message failed"
                );
            }
        }
    }
}

/// Insights worth sharing: sourced from confident results, pattern-level
/// in wording. Only finalized results within the round are read.
fn significant_insights(results: &[ExplorationResult]) -> Vec<String> {
    let mut out = Vec::new();
    for result in results {
        if result.confidence <= POLLINATION_SOURCE_THRESHOLD {
            continue;
        }
        for insight in &result.insights {
            if keywords::is_cross_pollination_worthy(insight) && !out.contains(insight) {
                out.push(insight.clone());
            }
        }
    }
    out
}

/// A failed exploration degrades to a low-confidence contradicting result
fn synthetic_failure(hypothesis: Hypothesis, err: &AnalysisError) -> ExplorationResult {
    ExplorationResult {
        session_id: Uuid::nil(),
        evidence: vec![Evidence {
            polarity: EvidencePolarity::Contradicting,
            description: format!("exploration failed: {err}"),
            location: None,
            confidence: 0.9,
            discovered_at: Utc::now(),
        }],
        confidence: 0.1,
        depth: 0,
        insights: Vec::new(),
        reproduction_steps: None,
        related_findings: Vec::new(),
        hypothesis,
    }
}

/// Low-confidence root causes from an exploration's synthesis are
/// serendipitous discoveries, not answers to the hypothesis under test.
fn serendipitous_findings(root_causes: &[RootCause]) -> Vec<Finding> {
    root_causes
        .iter()
        .filter(|rc| rc.confidence < SERENDIPITY_THRESHOLD)
        .map(|rc| {
            let text = format!("{} {}", rc.kind, rc.description);
            let kind = match keywords::category_from_text(&text) {
                HypothesisCategory::Performance => FindingKind::Performance,
                HypothesisCategory::Security => FindingKind::Security,
                HypothesisCategory::Architecture | HypothesisCategory::Integration => {
                    FindingKind::Architecture
                }
                HypothesisCategory::Bug => FindingKind::Bug,
            };
            let lower = text.to_lowercase();
            let severity = if lower.contains("critical")
                || lower.contains("data loss")
                || kind == FindingKind::Security
            {
                Severity::High
            } else if rc.confidence >= 0.3 {
                Severity::Medium
            } else {
                Severity::Low
            };
            let location = rc
                .evidence
                .iter()
                .find_map(|e| parse_location(e))
                .unwrap_or_else(|| CodeLocation::new("unresolved", 0));
            Finding {
                kind,
                severity,
                location,
                description: rc.description.clone(),
                evidence: rc.evidence.clone(),
            }
        })
        .collect()
}

fn parse_location(reference: &str) -> Option<CodeLocation> {
    let (file, line) = reference.rsplit_once(':')?;
    let line: u32 = line.parse().ok()?;
    if file.is_empty() {
        return None;
    }
    Some(CodeLocation::new(file, line))
}

/// Recommendations per the tournament outcome
fn build_recommendations(
    winner: Option<&ExplorationResult>,
    runner_up: Option<&ExplorationResult>,
    findings: &[Finding],
) -> (Vec<RecommendedAction>, Vec<RecommendedAction>) {
    let mut primary = Vec::new();
    let mut secondary = Vec::new();

    if let Some(winner) = winner {
        if winner.confidence > 0.7 {
            primary.push(
                RecommendedAction::new(
                    format!("fix the root cause: {}", winner.hypothesis.theory),
                    Severity::Critical,
                )
                .with_rationale(format!(
                    "winning hypothesis at confidence {:.2}",
                    winner.confidence
                )),
            );
            if winner.reproduction_steps.is_some() {
                primary.push(RecommendedAction::new(
                    "verify the fix against the recorded reproduction steps",
                    Severity::High,
                ));
            }
        } else if winner.confidence >= 0.3 {
            primary.push(RecommendedAction::new(
                format!("investigate further: {}", winner.hypothesis.theory),
                Severity::High,
            ));
        }
        if winner.hypothesis.category == HypothesisCategory::Performance {
            primary.push(RecommendedAction::new(
                "set up monitoring for the affected code path before and after the fix",
                Severity::Medium,
            ));
        }
    }

    if let Some(runner_up) = runner_up {
        if runner_up.confidence > 0.5 {
            primary.push(RecommendedAction::new(
                format!("also consider: {}", runner_up.hypothesis.theory),
                Severity::Medium,
            ));
        }
    }

    for finding in findings {
        if finding.severity >= Severity::High {
            secondary.push(
                RecommendedAction::new(
                    format!("unrelated issue discovered: {}", finding.description),
                    finding.severity,
                )
                .with_rationale(format!("found at {}", finding.location)),
            );
        }
    }

    (primary, secondary)
}

// ============================================================================
// Tests
// ============================================================================
