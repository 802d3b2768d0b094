// Structured analysis results
//
// The shapes returned to the request boundary: root causes, recommended
// actions, and the metadata block. The remote's finalization payload
// (camelCase JSON embedded in prose) is mapped onto these types by the
// dialogue adapter.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::context::Severity;

/// Whether an analysis ran to completion or was cut short by its budget
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisStatus {
    Success,
    Partial,
}

/// A root cause identified by the remote service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RootCause {
    /// Free-form cause type, e.g. "N+1", "race-condition"
    #[serde(rename = "type")]
    pub kind: String,
    pub description: String,
    #[serde(default)]
    pub evidence: Vec<String>,
    /// Remote-reported confidence in [0,1]
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fix_strategy: Option<String>,
}

/// A single recommended action with a priority
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecommendedAction {
    pub description: String,
    pub priority: Severity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rationale: Option<String>,
}

impl RecommendedAction {
    pub fn new(description: impl Into<String>, priority: Severity) -> Self {
        Self {
            description: description.into(),
            priority,
            rationale: None,
        }
    }

    pub fn with_rationale(mut self, rationale: impl Into<String>) -> Self {
        self.rationale = Some(rationale.into());
        self
    }
}

/// Metadata block attached to every result
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResultMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<Uuid>,
    pub turn_count: u32,
    pub duration_secs: f64,
    #[serde(default)]
    pub completed_steps: Vec<String>,
}

/// The structured outcome of one analysis dialogue
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub status: AnalysisStatus,
    #[serde(default)]
    pub root_causes: Vec<RootCause>,
    #[serde(default)]
    pub immediate_actions: Vec<RecommendedAction>,
    #[serde(default)]
    pub investigation_next_steps: Vec<String>,
    #[serde(default)]
    pub ruled_out_approaches: Vec<String>,
    #[serde(default)]
    pub insights: Vec<String>,
    pub metadata: ResultMetadata,
}

impl AnalysisResult {
    /// An empty successful result, filled in by the adapter
    pub fn success() -> Self {
        Self {
            status: AnalysisStatus::Success,
            root_causes: Vec::new(),
            immediate_actions: Vec::new(),
            investigation_next_steps: Vec::new(),
            ruled_out_approaches: Vec::new(),
            insights: Vec::new(),
            metadata: ResultMetadata::default(),
        }
    }

    /// A partial result for a budget-expired operation.
    ///
    /// Preserves what was gathered and explains the shortfall; the
    /// attempted approaches become the ruled-out list so the caller does
    /// not re-tread them.
    pub fn partial(
        shortfall: impl Into<String>,
        ruled_out_approaches: Vec<String>,
        insights: Vec<String>,
    ) -> Self {
        Self {
            status: AnalysisStatus::Partial,
            root_causes: Vec::new(),
            immediate_actions: Vec::new(),
            investigation_next_steps: vec![shortfall.into()],
            ruled_out_approaches,
            insights,
            metadata: ResultMetadata::default(),
        }
    }
}

/// Wire shape of the remote's finalization payload.
///
/// The remote emits camelCase JSON embedded in prose; this is the schema
/// the synthesis prompt asks for.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteSynthesis {
    #[serde(default)]
    pub root_causes: Vec<RemoteRootCause>,
    #[serde(default)]
    pub recommendations: RemoteRecommendations,
    #[serde(default)]
    pub key_insights: Vec<String>,
    #[serde(default)]
    pub ruled_out: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteRootCause {
    #[serde(rename = "type")]
    pub kind: String,
    pub description: String,
    #[serde(default)]
    pub evidence: Vec<String>,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
    #[serde(default)]
    pub fix_strategy: Option<String>,
}

fn default_confidence() -> f64 {
    0.5
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteRecommendations {
    #[serde(default)]
    pub immediate: Vec<String>,
    #[serde(default)]
    pub investigate: Vec<String>,
}

impl RemoteSynthesis {
    /// Map the remote payload onto the caller-facing result shape.
    ///
    /// Immediate recommendations surface at high priority; investigation
    /// items stay free-form next steps.
    pub fn into_result(self) -> AnalysisResult {
        let mut result = AnalysisResult::success();
        result.root_causes = self
            .root_causes
            .into_iter()
            .map(|rc| RootCause {
                kind: rc.kind,
                description: rc.description,
                evidence: rc.evidence,
                confidence: rc.confidence.clamp(0.0, 1.0),
                fix_strategy: rc.fix_strategy,
            })
            .collect();
        result.immediate_actions = self
            .recommendations
            .immediate
            .into_iter()
            .map(|d| RecommendedAction::new(d, Severity::High))
            .collect();
        result.investigation_next_steps = self.recommendations.investigate;
        result.insights = self.key_insights;
        result.ruled_out_approaches = self.ruled_out;
        result
    }
}

// ============================================================================
// Tests
// ============================================================================
