// Session manager
//
// Sole owner of all sessions. Collaborators hold ids and get transient
// access through the manager; no raw session reference survives a call.
// The per-session logical lock (status Active -> Processing) serializes
// adapter round-trips; the coarse map lock only guards map mutations and
// never spans a remote call. A background sweeper abandons and deletes
// idle sessions.

use chrono::{Duration as ChronoDuration, Utc};
use regex::Regex;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::chat::{share_chat, BoxedChat, SharedChat};
use crate::context::AnalysisContext;
use crate::error::{AnalysisError, Result};
use crate::result::ResultMetadata;
use crate::session::{
    ProgressUpdate, Session, SessionSnapshot, SessionStatus, Turn, TurnMetadata, TurnRole,
    COMPLETION_CONFIDENCE, MAX_TURNS,
};

/// Sessions idle longer than this are abandoned and collected
pub const IDLE_TIMEOUT_SECS: i64 = 30 * 60;

/// How often the sweeper runs
pub const SWEEP_INTERVAL_SECS: u64 = 5 * 60;

fn recommendation_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?im)^\s*(?:\W*\s*)?recommends?:\s*(.+)$").expect("pattern must compile")
    })
}

/// Results snapshot composed from a session's observable state
#[derive(Debug, Clone)]
pub struct SessionResults {
    pub insights: Vec<String>,
    pub recommendations: Vec<String>,
    pub metadata: ResultMetadata,
}

type SessionMap = Arc<RwLock<HashMap<Uuid, Session>>>;

/// Owning manager for all in-memory sessions
pub struct SessionManager {
    sessions: SessionMap,
    idle_timeout: ChronoDuration,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl SessionManager {
    /// Create a manager with production timeouts and start the sweeper.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new() -> Self {
        Self::with_timeouts(
            ChronoDuration::seconds(IDLE_TIMEOUT_SECS),
            Duration::from_secs(SWEEP_INTERVAL_SECS),
        )
    }

    /// Create a manager with explicit timeouts (test hook)
    pub fn with_timeouts(idle_timeout: ChronoDuration, sweep_interval: Duration) -> Self {
        let sessions: SessionMap = Arc::new(RwLock::new(HashMap::new()));
        let sweeper = spawn_sweeper(sessions.clone(), idle_timeout, sweep_interval);
        Self {
            sessions,
            idle_timeout,
            sweeper: Mutex::new(Some(sweeper)),
        }
    }

    fn is_expired(&self, session: &Session) -> bool {
        Utc::now() - session.last_activity > self.idle_timeout
    }

    /// Create a session around the given context; returns its id
    pub async fn create(&self, context: AnalysisContext) -> Uuid {
        let session = Session::new(context);
        let id = session.id;
        self.sessions.write().await.insert(id, session);
        debug!(session_id = %id, "session created");
        id
    }

    /// Snapshot a session.
    ///
    /// A session past its idle timeout is marked abandoned and reported
    /// as not found.
    pub async fn get(&self, id: Uuid) -> Result<SessionSnapshot> {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .get_mut(&id)
            .ok_or(AnalysisError::SessionNotFound(id))?;
        if session.status == SessionStatus::Abandoned {
            return Err(AnalysisError::SessionNotFound(id));
        }
        if !session.status.is_terminal() && self.is_expired(session) {
            warn!(session_id = %id, "session expired; marking abandoned");
            session.status = SessionStatus::Abandoned;
            return Err(AnalysisError::SessionNotFound(id));
        }
        Ok(session.snapshot())
    }

    /// Atomically acquire the session lock.
    ///
    /// Succeeds only for a live Active (or Completing, so finalization
    /// can run) session; flips it to Processing. Returns false otherwise.
    pub async fn acquire_lock(&self, id: Uuid) -> bool {
        let mut sessions = self.sessions.write().await;
        let Some(session) = sessions.get_mut(&id) else {
            return false;
        };
        if self.is_expired(session) {
            session.status = SessionStatus::Abandoned;
            return false;
        }
        match session.status {
            SessionStatus::Active | SessionStatus::Completing => {
                session.status = SessionStatus::Processing;
                session.touch();
                true
            }
            _ => false,
        }
    }

    /// Release the session lock.
    ///
    /// Only a Processing session changes state; the next status is
    /// re-evaluated from the turn cap and confidence so a completing
    /// session stays completing. Never blocks, never errors.
    pub async fn release_lock(&self, id: Uuid) {
        let mut sessions = self.sessions.write().await;
        if let Some(session) = sessions.get_mut(&id) {
            if session.status == SessionStatus::Processing {
                session.status = if session.turn_count() >= MAX_TURNS
                    || session.progress.confidence >= COMPLETION_CONFIDENCE
                {
                    SessionStatus::Completing
                } else {
                    SessionStatus::Active
                };
                session.touch();
            }
        }
    }

    /// Append a turn. Permitted only while the session accepts turns
    /// (Active or Processing) and the turn cap has not been reached.
    pub async fn add_turn(
        &self,
        id: Uuid,
        role: TurnRole,
        content: impl Into<String>,
        metadata: Option<TurnMetadata>,
    ) -> Result<u32> {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .get_mut(&id)
            .ok_or(AnalysisError::SessionNotFound(id))?;
        if self.is_expired(session) {
            session.status = SessionStatus::Abandoned;
            return Err(AnalysisError::SessionTimeout(id));
        }
        if !session.status.accepts_turns() {
            return Err(AnalysisError::SessionNotFound(id));
        }
        if session.turn_count() >= MAX_TURNS {
            return Err(AnalysisError::SessionLocked(id));
        }
        let index = session.push_turn(role, content, metadata);
        if session.turn_count() >= MAX_TURNS && session.status == SessionStatus::Active {
            info!(session_id = %id, "turn cap reached; session completing");
            session.status = SessionStatus::Completing;
        }
        Ok(index)
    }

    /// Merge a progress update; confidence at or above the completion
    /// threshold moves an Active session to Completing.
    pub async fn update_progress(&self, id: Uuid, update: ProgressUpdate) -> Result<()> {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .get_mut(&id)
            .ok_or(AnalysisError::SessionNotFound(id))?;
        if session.status.is_terminal() {
            return Err(AnalysisError::SessionNotFound(id));
        }
        session.progress.merge(update);
        session.touch();
        if session.progress.confidence >= COMPLETION_CONFIDENCE
            && session.status == SessionStatus::Active
        {
            session.status = SessionStatus::Completing;
        }
        Ok(())
    }

    /// True iff any completion condition holds: status Completing, no
    /// pending questions, confidence at threshold, or turn cap reached.
    pub async fn should_complete(&self, id: Uuid) -> Result<bool> {
        let sessions = self.sessions.read().await;
        let session = sessions.get(&id).ok_or(AnalysisError::SessionNotFound(id))?;
        Ok(session.status == SessionStatus::Completing
            || session.progress.pending_questions.is_empty()
            || session.progress.confidence >= COMPLETION_CONFIDENCE
            || session.turn_count() >= MAX_TURNS)
    }

    /// Compose a results snapshot from the session's turn log and progress
    pub async fn extract_results(&self, id: Uuid) -> Result<SessionResults> {
        let sessions = self.sessions.read().await;
        let session = sessions.get(&id).ok_or(AnalysisError::SessionNotFound(id))?;

        let mut insights = Vec::new();
        for turn in &session.turns {
            if let Some(metadata) = &turn.metadata {
                for finding in &metadata.findings {
                    insights.push(render_finding(finding));
                }
            }
        }

        let mut recommendations = Vec::new();
        for turn in remote_turns(&session.turns) {
            for capture in recommendation_pattern().captures_iter(&turn.content) {
                if let Some(m) = capture.get(1) {
                    recommendations.push(m.as_str().trim().to_string());
                }
            }
        }

        let duration = (Utc::now() - session.created_at)
            .to_std()
            .unwrap_or_default()
            .as_secs_f64();
        Ok(SessionResults {
            insights,
            recommendations,
            metadata: ResultMetadata {
                session_id: Some(id),
                turn_count: session.turn_count(),
                duration_secs: duration,
                completed_steps: session.progress.completed_steps.clone(),
            },
        })
    }

    /// Clone the session's shared chat handle.
    ///
    /// Callers must hold the logical session lock before sending on it;
    /// the inner mutex only protects against cancelled operations.
    pub async fn chat(&self, id: Uuid) -> Result<SharedChat> {
        let sessions = self.sessions.read().await;
        let session = sessions.get(&id).ok_or(AnalysisError::SessionNotFound(id))?;
        session
            .chat
            .clone()
            .ok_or_else(|| AnalysisError::unknown(format!("session {id} has no open chat")))
    }

    /// Install a fresh chat handle on a session
    pub async fn set_chat(&self, id: Uuid, chat: BoxedChat) -> Result<()> {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .get_mut(&id)
            .ok_or(AnalysisError::SessionNotFound(id))?;
        session.chat = Some(share_chat(chat));
        Ok(())
    }

    /// Mark a session completed (absorbing)
    pub async fn mark_completed(&self, id: Uuid) -> Result<()> {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .get_mut(&id)
            .ok_or(AnalysisError::SessionNotFound(id))?;
        session.status = SessionStatus::Completed;
        session.touch();
        Ok(())
    }

    /// Mark a session abandoned (absorbing)
    pub async fn abandon(&self, id: Uuid) {
        let mut sessions = self.sessions.write().await;
        if let Some(session) = sessions.get_mut(&id) {
            session.status = SessionStatus::Abandoned;
            session.touch();
        }
    }

    /// Delete a session outright (tournament cleanup)
    pub async fn remove(&self, id: Uuid) {
        self.sessions.write().await.remove(&id);
    }

    /// All live session ids
    pub async fn session_ids(&self) -> Vec<Uuid> {
        self.sessions.read().await.keys().copied().collect()
    }

    /// Number of sessions currently held
    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    /// Stop the sweeper and drop all sessions (test hook / shutdown)
    pub async fn destroy(&self) {
        if let Some(handle) = self.sweeper.lock().expect("sweeper lock poisoned").take() {
            handle.abort();
        }
        self.sessions.write().await.clear();
        info!("session manager destroyed");
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        if let Ok(mut guard) = self.sweeper.lock() {
            if let Some(handle) = guard.take() {
                handle.abort();
            }
        }
    }
}

fn spawn_sweeper(
    sessions: SessionMap,
    idle_timeout: ChronoDuration,
    sweep_interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(sweep_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick fires immediately; skip it.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let now = Utc::now();
            let mut sessions = sessions.write().await;
            let before = sessions.len();
            sessions.retain(|id, session| {
                let expired = now - session.last_activity > idle_timeout;
                if expired {
                    debug!(session_id = %id, "sweeping idle session");
                }
                !expired
            });
            let swept = before - sessions.len();
            if swept > 0 {
                info!(swept, remaining = sessions.len(), "session sweep complete");
            }
        }
    })
}

fn remote_turns(turns: &[Turn]) -> impl Iterator<Item = &Turn> {
    turns.iter().filter(|t| t.role == TurnRole::Remote)
}

fn render_finding(finding: &serde_json::Value) -> String {
    match finding {
        serde_json::Value::String(s) => s.clone(),
        other => other
            .get("description")
            .and_then(|d| d.as_str())
            .map(String::from)
            .unwrap_or_else(|| other.to_string()),
    }
}

// ============================================================================
// Tests
// ============================================================================
