// Single-dialogue orchestrator
//
// Binds one session to one chat and exposes the three public session
// operations plus the one-shot analysis path. Contract highlights: the
// session lock is released on every exit path, budget expiry yields a
// partial result with the session left Active, and a finalized session
// stays Completed so status queries keep working.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::adapter::{DialogueAdapter, SummaryFormat, FINALIZABLE_PROGRESS};
use crate::context::{AnalysisContext, AnalysisKind};
use crate::error::{AnalysisError, Result};
use crate::reader::SecureReader;
use crate::result::AnalysisResult;
use crate::session::{ProgressUpdate, SessionStatus, TurnMetadata, TurnRole};
use crate::session_manager::SessionManager;

/// Response to start_conversation
#[derive(Debug, Clone, Serialize)]
pub struct StartedConversation {
    pub session_id: Uuid,
    pub initial_response: String,
    pub suggested_follow_ups: Vec<String>,
    pub status: SessionStatus,
}

/// Response to continue_conversation
#[derive(Debug, Clone, Serialize)]
pub struct ContinuedConversation {
    pub response: String,
    pub analysis_progress: f64,
    pub can_finalize: bool,
    pub status: SessionStatus,
}

/// Response to get_conversation_status
#[derive(Debug, Clone, Serialize)]
pub struct ConversationStatus {
    pub session_id: Uuid,
    pub status: SessionStatus,
    pub turn_count: u32,
    pub last_activity: DateTime<Utc>,
    pub analysis_progress: f64,
    pub can_finalize: bool,
}

/// Orchestrator for single-dialogue sessions
pub struct ConversationOrchestrator {
    manager: Arc<SessionManager>,
    adapter: Arc<DialogueAdapter>,
    reader: Arc<SecureReader>,
}

impl ConversationOrchestrator {
    pub fn new(
        manager: Arc<SessionManager>,
        adapter: Arc<DialogueAdapter>,
        reader: Arc<SecureReader>,
    ) -> Self {
        Self {
            manager,
            adapter,
            reader,
        }
    }

    pub fn manager(&self) -> &Arc<SessionManager> {
        &self.manager
    }

    /// Open a session, read its focus files, and start the dialogue
    pub async fn start_conversation(
        &self,
        context: AnalysisContext,
        kind: AnalysisKind,
        initial_question: Option<&str>,
    ) -> Result<StartedConversation> {
        let files = context.code_scope.files.clone();
        let session_id = self.manager.create(context.clone()).await;

        let code = self.reader.read_many(&files).await?;
        let outcome = self
            .adapter
            .start(&context, kind, initial_question, &code)
            .await?;

        self.manager.set_chat(session_id, outcome.chat).await?;
        self.manager
            .add_turn(
                session_id,
                TurnRole::Remote,
                outcome.response.clone(),
                Some(TurnMetadata {
                    analysis_kind: Some(kind),
                    follow_ups: outcome.follow_ups.clone(),
                    findings: Vec::new(),
                }),
            )
            .await?;

        info!(session_id = %session_id, kind = %kind, "conversation started");
        Ok(StartedConversation {
            session_id,
            initial_response: outcome.response,
            suggested_follow_ups: outcome.follow_ups,
            status: SessionStatus::Active,
        })
    }

    /// Append a caller turn and exchange it with the remote.
    ///
    /// Losers of the lock race observe SESSION_LOCKED; a terminal session
    /// reports not-found rather than silently accepting input.
    pub async fn continue_conversation(
        &self,
        session_id: Uuid,
        message: &str,
        include_snippets: bool,
    ) -> Result<ContinuedConversation> {
        self.lock_session(session_id).await?;
        let result = self
            .continue_locked(session_id, message, include_snippets)
            .await;
        self.manager.release_lock(session_id).await;
        result
    }

    async fn continue_locked(
        &self,
        session_id: Uuid,
        message: &str,
        include_snippets: bool,
    ) -> Result<ContinuedConversation> {
        let snapshot = self.manager.get(session_id).await?;
        self.manager
            .add_turn(session_id, TurnRole::Caller, message, None)
            .await?;

        let chat = self.manager.chat(session_id).await?;
        let mut chat = chat.lock().await;
        let outcome = self
            .adapter
            .continue_dialogue(chat.as_mut(), &snapshot.context, message, include_snippets)
            .await?;
        drop(chat);

        let follow_ups = crate::adapter::extract_follow_ups(&outcome.response);
        self.manager
            .add_turn(
                session_id,
                TurnRole::Remote,
                outcome.response.clone(),
                Some(TurnMetadata {
                    analysis_kind: None,
                    follow_ups,
                    findings: Vec::new(),
                }),
            )
            .await?;
        self.manager
            .update_progress(
                session_id,
                ProgressUpdate {
                    confidence: Some(outcome.progress),
                    ..Default::default()
                },
            )
            .await?;

        let status = self.manager.get(session_id).await?.status;
        Ok(ContinuedConversation {
            response: outcome.response,
            analysis_progress: outcome.progress,
            can_finalize: outcome.finalizable,
            status,
        })
    }

    /// Close the dialogue into a structured result.
    ///
    /// The session is left Completed, never destroyed, so status queries
    /// remain answerable afterwards.
    pub async fn finalize_conversation(
        &self,
        session_id: Uuid,
        format: SummaryFormat,
    ) -> Result<AnalysisResult> {
        self.lock_session(session_id).await?;
        let result = self.finalize_locked(session_id, format).await;
        self.manager.release_lock(session_id).await;
        result
    }

    async fn finalize_locked(
        &self,
        session_id: Uuid,
        format: SummaryFormat,
    ) -> Result<AnalysisResult> {
        let chat = self.manager.chat(session_id).await?;
        let mut chat = chat.lock().await;
        let mut result = self.adapter.finalize(chat.as_mut(), format).await?;
        drop(chat);

        let session_results = self.manager.extract_results(session_id).await?;
        result.insights.extend(session_results.insights);
        result
            .investigation_next_steps
            .extend(session_results.recommendations);
        result.metadata = session_results.metadata;

        self.manager.mark_completed(session_id).await?;
        info!(session_id = %session_id, "conversation finalized");
        Ok(result)
    }

    /// Status snapshot for get_conversation_status
    pub async fn conversation_status(&self, session_id: Uuid) -> Result<ConversationStatus> {
        let snapshot = self.manager.get(session_id).await?;
        let progress = snapshot.progress.confidence;
        Ok(ConversationStatus {
            session_id,
            status: snapshot.status,
            turn_count: snapshot.turn_count,
            last_activity: snapshot.last_activity,
            analysis_progress: progress,
            can_finalize: progress >= FINALIZABLE_PROGRESS,
        })
    }

    /// One-shot analysis under the context's time budget.
    ///
    /// Starts a dialogue, deepens it up to `depth_level` exchanges along
    /// the suggested follow-ups, and finalizes. Budget expiry produces a
    /// partial result: findings so far are preserved, the session is
    /// re-marked Active, and the shortfall is reported as a next step.
    pub async fn run_analysis(
        &self,
        context: AnalysisContext,
        kind: AnalysisKind,
        depth_level: u8,
        initial_question: Option<&str>,
    ) -> Result<AnalysisResult> {
        let budget = Duration::from_secs(context.time_budget_secs.max(1));
        let attempted = context.attempted_approaches.clone();
        let deadline = std::time::Instant::now() + budget;

        let started = match timeout(budget, self.start_conversation(context, kind, initial_question))
            .await
        {
            Ok(started) => started?,
            Err(_) => {
                warn!(budget_secs = budget.as_secs(), "budget expired before the dialogue opened");
                return Ok(AnalysisResult::partial(
                    format!(
                        "the {}s time budget expired before the remote dialogue opened; \
                         retry with a larger time_budget_seconds",
                        budget.as_secs()
                    ),
                    attempted,
                    Vec::new(),
                ));
            }
        };
        let session_id = started.session_id;
        let mut follow_ups = started.suggested_follow_ups.clone();

        let deepen_and_finalize = async {
            for _ in 1..depth_level.clamp(1, 5) {
                let Some(question) = follow_ups.first().cloned() else {
                    break;
                };
                let continued = self
                    .continue_conversation(session_id, &question, true)
                    .await?;
                if continued.can_finalize {
                    break;
                }
                follow_ups = crate::adapter::extract_follow_ups(&continued.response);
            }
            self.finalize_conversation(session_id, SummaryFormat::Detailed)
                .await
        };

        let remaining = deadline.saturating_duration_since(std::time::Instant::now());
        match timeout(remaining, deepen_and_finalize).await {
            Ok(result) => result,
            Err(_) => {
                warn!(session_id = %session_id, budget_secs = budget.as_secs(), "analysis budget expired");
                self.partial_result(session_id, budget, attempted).await
            }
        }
    }

    /// Build a partial result after budget expiry and restore the session
    async fn partial_result(
        &self,
        session_id: Uuid,
        budget: Duration,
        attempted: Vec<String>,
    ) -> Result<AnalysisResult> {
        // The cancelled operation may still hold the logical lock.
        self.manager.release_lock(session_id).await;

        let session_results = self.manager.extract_results(session_id).await.ok();
        let mut result = AnalysisResult::partial(
            format!(
                "analysis stopped after the {}s time budget expired; rerun with a larger \
                 time_budget_seconds to go deeper",
                budget.as_secs()
            ),
            attempted,
            session_results
                .as_ref()
                .map(|r| r.insights.clone())
                .unwrap_or_default(),
        );
        if let Some(session_results) = session_results {
            result.metadata = session_results.metadata;
        }
        debug!(session_id = %session_id, "returning partial result");
        Ok(result)
    }

    /// Acquire the logical session lock or explain why not
    async fn lock_session(&self, session_id: Uuid) -> Result<()> {
        if self.manager.acquire_lock(session_id).await {
            return Ok(());
        }
        // Distinguish a missing/terminal session from real contention.
        match self.manager.get(session_id).await {
            Ok(snapshot) if snapshot.status.is_terminal() => {
                Err(AnalysisError::SessionNotFound(session_id))
            }
            Ok(_) => Err(AnalysisError::SessionLocked(session_id)),
            Err(err) => Err(err),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::{ScriptedChatClient, ScriptedReply};
    use crate::context::CodeScope;
    use crate::result::AnalysisStatus;
    use chrono::Duration as ChronoDuration;

    const SYNTHESIS: &str = r#"{"rootCauses":[{"type":"race","description":"r","confidence":0.8}],"recommendations":{"immediate":["lock it"]}}"#;

    fn harness(client: ScriptedChatClient) -> (tempfile::TempDir, ConversationOrchestrator) {
        let dir = tempfile::tempdir().unwrap();
        let reader = Arc::new(SecureReader::new(dir.path()).unwrap());
        let manager = Arc::new(SessionManager::with_timeouts(
            ChronoDuration::seconds(3600),
            Duration::from_secs(3600),
        ));
        let adapter = Arc::new(DialogueAdapter::new(Arc::new(client), reader.clone()));
        (dir, ConversationOrchestrator::new(manager, adapter, reader))
    }

    fn ctx() -> AnalysisContext {
        AnalysisContext::new("stuck on flaky test", CodeScope::default())
    }

    #[tokio::test]
    async fn start_continue_finalize_happy_path() {
        let client = ScriptedChatClient::with_responses([
            "Initial look: the pool is small. Could the pool be exhausted under load?",
            "Confirmed: pool exhaustion under concurrent load.",
            &format!("final: {SYNTHESIS}")[..],
        ]);
        let (_dir, orch) = harness(client);

        let started = orch
            .start_conversation(ctx(), AnalysisKind::Performance, None)
            .await
            .unwrap();
        assert_eq!(started.status, SessionStatus::Active);
        assert!(!started.suggested_follow_ups.is_empty());

        let continued = orch
            .continue_conversation(started.session_id, "tell me more", false)
            .await
            .unwrap();
        assert!(continued.response.contains("Confirmed"));
        assert!(continued.analysis_progress > 0.0);

        let result = orch
            .finalize_conversation(started.session_id, SummaryFormat::Detailed)
            .await
            .unwrap();
        assert_eq!(result.status, AnalysisStatus::Success);
        assert_eq!(result.root_causes.len(), 1);
        // Session is completed, not destroyed.
        let status = orch.conversation_status(started.session_id).await.unwrap();
        assert_eq!(status.status, SessionStatus::Completed);
    }

    #[tokio::test]
    async fn continue_after_finalize_is_not_found() {
        let client = ScriptedChatClient::with_responses([
            "initial",
            &format!("done {SYNTHESIS}")[..],
        ]);
        let (_dir, orch) = harness(client);
        let started = orch
            .start_conversation(ctx(), AnalysisKind::ExecutionTrace, None)
            .await
            .unwrap();
        orch.finalize_conversation(started.session_id, SummaryFormat::Concise)
            .await
            .unwrap();

        let err = orch
            .continue_conversation(started.session_id, "more?", false)
            .await
            .unwrap_err();
        assert!(matches!(err, AnalysisError::SessionNotFound(_)));
    }

    #[tokio::test]
    async fn concurrent_continues_one_wins_one_locked() {
        let client = ScriptedChatClient::new();
        client.push(ScriptedReply::Text("initial".into()));
        client.push(ScriptedReply::Delayed {
            millis: 80,
            text: "slow reply".into(),
        });
        client.push(ScriptedReply::Text("should not be needed".into()));
        let (_dir, orch) = harness(client);
        let orch = Arc::new(orch);

        let started = orch
            .start_conversation(ctx(), AnalysisKind::HypothesisTest, None)
            .await
            .unwrap();
        let id = started.session_id;

        let a = {
            let orch = orch.clone();
            tokio::spawn(async move { orch.continue_conversation(id, "a", false).await })
        };
        // Give task a a head start so it owns the lock.
        tokio::time::sleep(Duration::from_millis(20)).await;
        let b = orch.continue_conversation(id, "b", false).await;

        assert!(matches!(b, Err(AnalysisError::SessionLocked(_))));
        assert!(a.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn budget_expiry_returns_partial_and_session_stays_usable() {
        let client = ScriptedChatClient::new();
        client.push(ScriptedReply::Text(
            "initial observations. What about the cache?".into(),
        ));
        client.push(ScriptedReply::Delayed {
            millis: 2_000,
            text: "too late".into(),
        });
        let (_dir, orch) = harness(client);

        let context = ctx()
            .with_budget(1)
            .with_attempted(vec!["grep".into(), "print debugging".into()]);
        let result = orch
            .run_analysis(context, AnalysisKind::Performance, 3, None)
            .await
            .unwrap();

        assert_eq!(result.status, AnalysisStatus::Partial);
        assert!(!result.investigation_next_steps.is_empty());
        assert!(result.investigation_next_steps[0].contains("budget"));
        assert_eq!(
            result.ruled_out_approaches,
            vec!["grep".to_string(), "print debugging".to_string()]
        );

        // Session was re-marked Active, not abandoned.
        let ids = orch.manager().session_ids().await;
        assert_eq!(ids.len(), 1);
        let status = orch.conversation_status(ids[0]).await.unwrap();
        assert_eq!(status.status, SessionStatus::Active);
    }

    #[tokio::test]
    async fn lock_released_when_adapter_fails() {
        let client = ScriptedChatClient::new();
        client.push(ScriptedReply::Text("initial".into()));
        client.push(ScriptedReply::RateLimited);
        client.push(ScriptedReply::Text("recovered".into()));
        let (_dir, orch) = harness(client);

        let started = orch
            .start_conversation(ctx(), AnalysisKind::Performance, None)
            .await
            .unwrap();
        let err = orch
            .continue_conversation(started.session_id, "x", false)
            .await
            .unwrap_err();
        assert!(matches!(err, AnalysisError::RateLimit(_)));

        // Lock must have been released; the next call proceeds.
        let ok = orch
            .continue_conversation(started.session_id, "again", false)
            .await
            .unwrap();
        assert_eq!(ok.response, "recovered");
    }
}
