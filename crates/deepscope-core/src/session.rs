// Session domain types
//
// A session is the in-memory context of one multi-turn dialogue with the
// remote service: an append-only turn log, a progress record, and a status
// in a small lattice. All mutation goes through the SessionManager; these
// types enforce the local invariants (dense turn indices, monotone status
// except active<->processing, terminal statuses absorbing).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::chat::SharedChat;
use crate::context::{AnalysisContext, AnalysisKind};

/// Maximum turns before a session is forced toward completion
pub const MAX_TURNS: u32 = 50;

/// Confidence at which a session is considered ready to finalize
pub const COMPLETION_CONFIDENCE: f64 = 0.9;

/// Session status lattice
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Processing,
    Completing,
    Completed,
    Abandoned,
}

impl SessionStatus {
    /// Completed and Abandoned are absorbing
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionStatus::Completed | SessionStatus::Abandoned)
    }

    /// Turns may only be appended in these states
    pub fn accepts_turns(self) -> bool {
        matches!(self, SessionStatus::Active | SessionStatus::Processing)
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionStatus::Active => write!(f, "active"),
            SessionStatus::Processing => write!(f, "processing"),
            SessionStatus::Completing => write!(f, "completing"),
            SessionStatus::Completed => write!(f, "completed"),
            SessionStatus::Abandoned => write!(f, "abandoned"),
        }
    }
}

/// Who produced a turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    /// The upstream assistant
    Caller,
    /// The remote reasoning service
    Remote,
    /// Synthetic turns injected by the gateway
    System,
}

/// Optional structured annotations on a turn
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TurnMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub analysis_kind: Option<AnalysisKind>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub follow_ups: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub findings: Vec<serde_json::Value>,
}

/// One utterance in a session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    /// Dense, strictly increasing from 1 within a session
    pub index: u32,
    pub role: TurnRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<TurnMetadata>,
}

/// Deterministic progress state of a session
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProgressRecord {
    /// Ordered list of completed analysis steps
    pub completed_steps: Vec<String>,
    /// Open questions; behaves as a set (no duplicates)
    pub pending_questions: Vec<String>,
    /// Opaque finding records accumulated along the way
    pub key_findings: Vec<serde_json::Value>,
    /// Confidence in [0,1]
    pub confidence: f64,
}

/// Partial update merged into a [`ProgressRecord`] field by field
#[derive(Debug, Clone, Default)]
pub struct ProgressUpdate {
    pub completed_step: Option<String>,
    pub add_questions: Vec<String>,
    pub resolve_questions: Vec<String>,
    pub key_finding: Option<serde_json::Value>,
    pub confidence: Option<f64>,
}

impl ProgressRecord {
    /// Merge a partial update; confidence is clamped to [0,1].
    pub fn merge(&mut self, update: ProgressUpdate) {
        if let Some(step) = update.completed_step {
            self.completed_steps.push(step);
        }
        for q in update.add_questions {
            if !self.pending_questions.contains(&q) {
                self.pending_questions.push(q);
            }
        }
        for q in update.resolve_questions {
            self.pending_questions.retain(|existing| existing != &q);
        }
        if let Some(finding) = update.key_finding {
            self.key_findings.push(finding);
        }
        if let Some(confidence) = update.confidence {
            self.confidence = confidence.clamp(0.0, 1.0);
        }
    }
}

/// One reasoning session, uniquely owned by the SessionManager
pub struct Session {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub status: SessionStatus,
    pub context: AnalysisContext,
    pub turns: Vec<Turn>,
    pub progress: ProgressRecord,
    /// Handle to the remote chat; present once the dialogue has started.
    pub chat: Option<SharedChat>,
}

impl Session {
    pub fn new(context: AnalysisContext) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            created_at: now,
            last_activity: now,
            status: SessionStatus::Active,
            context,
            turns: Vec::new(),
            progress: ProgressRecord::default(),
            chat: None,
        }
    }

    /// Append a turn with the next dense index and refresh last-activity.
    ///
    /// Callers must have verified status via [`SessionStatus::accepts_turns`].
    pub fn push_turn(
        &mut self,
        role: TurnRole,
        content: impl Into<String>,
        metadata: Option<TurnMetadata>,
    ) -> u32 {
        let index = self.turns.len() as u32 + 1;
        self.turns.push(Turn {
            index,
            role,
            content: content.into(),
            timestamp: Utc::now(),
            metadata,
        });
        self.touch();
        index
    }

    pub fn touch(&mut self) {
        self.last_activity = Utc::now();
    }

    pub fn turn_count(&self) -> u32 {
        self.turns.len() as u32
    }

    /// Read-only view safe to hand outside the manager
    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            id: self.id,
            status: self.status,
            created_at: self.created_at,
            last_activity: self.last_activity,
            turn_count: self.turn_count(),
            progress: self.progress.clone(),
            context: self.context.clone(),
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("status", &self.status)
            .field("turns", &self.turns.len())
            .field("confidence", &self.progress.confidence)
            .field("has_chat", &self.chat.is_some())
            .finish()
    }
}

/// Cloneable read-only view of a session (no chat handle)
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub id: Uuid,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub turn_count: u32,
    pub progress: ProgressRecord,
    #[serde(skip)]
    pub context: AnalysisContext,
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::CodeScope;

    fn session() -> Session {
        Session::new(AnalysisContext::new("stuck", CodeScope::default()))
    }

    #[test]
    fn turn_indices_are_dense_from_one() {
        let mut s = session();
        for i in 1..=5u32 {
            let idx = s.push_turn(TurnRole::Caller, format!("t{i}"), None);
            assert_eq!(idx, i);
        }
        let indices: Vec<u32> = s.turns.iter().map(|t| t.index).collect();
        assert_eq!(indices, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn push_turn_refreshes_last_activity() {
        let mut s = session();
        let before = s.last_activity;
        std::thread::sleep(std::time::Duration::from_millis(2));
        s.push_turn(TurnRole::Remote, "r", None);
        assert!(s.last_activity > before);
    }

    #[test]
    fn terminal_statuses() {
        assert!(SessionStatus::Completed.is_terminal());
        assert!(SessionStatus::Abandoned.is_terminal());
        assert!(!SessionStatus::Completing.is_terminal());
        assert!(!SessionStatus::Active.is_terminal());
    }

    #[test]
    fn progress_merge_deduplicates_questions() {
        let mut p = ProgressRecord::default();
        p.merge(ProgressUpdate {
            add_questions: vec!["q1".into(), "q1".into(), "q2".into()],
            ..Default::default()
        });
        assert_eq!(p.pending_questions, vec!["q1".to_string(), "q2".to_string()]);

        p.merge(ProgressUpdate {
            resolve_questions: vec!["q1".into()],
            ..Default::default()
        });
        assert_eq!(p.pending_questions, vec!["q2".to_string()]);
    }

    #[test]
    fn progress_merge_clamps_confidence() {
        let mut p = ProgressRecord::default();
        p.merge(ProgressUpdate {
            confidence: Some(1.7),
            ..Default::default()
        });
        assert_eq!(p.confidence, 1.0);
    }

    #[test]
    fn timestamps_are_monotone_across_turns() {
        let mut s = session();
        s.push_turn(TurnRole::Caller, "a", None);
        s.push_turn(TurnRole::Remote, "b", None);
        assert!(s.turns[0].timestamp <= s.turns[1].timestamp);
    }
}
