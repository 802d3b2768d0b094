// Request context domain types
//
// These types carry what the upstream assistant already knows: what it
// tried, what it found, where it is stuck, and which code is in scope.
// Partial findings arrive as free-form JSON; entries that do not validate
// against the Finding shape are preserved in a quarantine list rather than
// guessed at.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Default per-request time budget in seconds
pub const DEFAULT_BUDGET_SECS: u64 = 60;

/// Time budget for a full tournament in seconds
pub const TOURNAMENT_BUDGET_SECS: u64 = 300;

/// A location in the analyzed codebase
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeLocation {
    /// Path relative to the project root
    pub file: String,
    /// 1-based line number (0 when unknown)
    pub line: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub column: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub function_name: Option<String>,
}

impl CodeLocation {
    pub fn new(file: impl Into<String>, line: u32) -> Self {
        Self {
            file: file.into(),
            line,
            column: None,
            function_name: None,
        }
    }
}

impl std::fmt::Display for CodeLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.file, self.line)
    }
}

/// Kind of a validated finding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FindingKind {
    Bug,
    Performance,
    Architecture,
    Security,
}

/// Severity of a finding, ordered from least to most severe
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

/// A validated finding from a previous or current analysis pass
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Finding {
    #[serde(rename = "type")]
    pub kind: FindingKind,
    pub severity: Severity,
    pub location: CodeLocation,
    pub description: String,
    #[serde(default)]
    pub evidence: Vec<String>,
}

/// Which code the analysis should look at
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CodeScope {
    pub files: Vec<String>,
    #[serde(default)]
    pub entry_points: Vec<CodeLocation>,
    #[serde(default)]
    pub service_names: Vec<String>,
}

impl CodeScope {
    pub fn files(files: Vec<String>) -> Self {
        Self {
            files,
            ..Default::default()
        }
    }
}

/// What kind of deep analysis is being requested
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisKind {
    ExecutionTrace,
    CrossSystem,
    Performance,
    HypothesisTest,
}

impl std::fmt::Display for AnalysisKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AnalysisKind::ExecutionTrace => write!(f, "execution_trace"),
            AnalysisKind::CrossSystem => write!(f, "cross_system"),
            AnalysisKind::Performance => write!(f, "performance"),
            AnalysisKind::HypothesisTest => write!(f, "hypothesis_test"),
        }
    }
}

/// Everything the upstream assistant hands over when escalating
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisContext {
    /// What has already been tried, in order
    pub attempted_approaches: Vec<String>,
    /// Findings that validated against the [`Finding`] shape
    pub partial_findings: Vec<Finding>,
    /// Findings that did not validate; preserved verbatim, never coerced
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub quarantined_findings: Vec<serde_json::Value>,
    /// Short descriptions of where the caller is stuck
    pub stuck_points: Vec<String>,
    /// Code the analysis may read
    pub code_scope: CodeScope,
    /// Remaining time budget in seconds
    pub time_budget_secs: u64,
}

impl AnalysisContext {
    pub fn new(stuck_description: impl Into<String>, code_scope: CodeScope) -> Self {
        Self {
            attempted_approaches: Vec::new(),
            partial_findings: Vec::new(),
            quarantined_findings: Vec::new(),
            stuck_points: vec![stuck_description.into()],
            code_scope,
            time_budget_secs: DEFAULT_BUDGET_SECS,
        }
    }

    /// Build a context from raw inputs, validating each partial finding.
    ///
    /// Entries that fail validation are quarantined with a warning so the
    /// caller's data is never silently dropped or reinterpreted.
    pub fn from_raw(
        attempted_approaches: Vec<String>,
        raw_findings: Vec<serde_json::Value>,
        stuck_description: String,
        code_scope: CodeScope,
        time_budget_secs: u64,
    ) -> Self {
        let mut partial_findings = Vec::new();
        let mut quarantined_findings = Vec::new();
        for raw in raw_findings {
            match serde_json::from_value::<Finding>(raw.clone()) {
                Ok(finding) => partial_findings.push(finding),
                Err(err) => {
                    warn!(error = %err, "quarantining partial finding that failed validation");
                    quarantined_findings.push(raw);
                }
            }
        }
        Self {
            attempted_approaches,
            partial_findings,
            quarantined_findings,
            stuck_points: vec![stuck_description],
            code_scope,
            time_budget_secs,
        }
    }

    pub fn with_budget(mut self, secs: u64) -> Self {
        self.time_budget_secs = secs;
        self
    }

    pub fn with_attempted(mut self, approaches: Vec<String>) -> Self {
        self.attempted_approaches = approaches;
        self
    }

    /// Add a stuck point, used by the tournament to tag exploration sessions
    pub fn push_stuck_point(&mut self, point: impl Into<String>) {
        self.stuck_points.push(point.into());
    }
}

/// Opaque advisory record produced by a heuristic analyzer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Annotation {
    /// Which analyzer produced this record
    pub source: String,
    /// Produced at
    pub at: DateTime<Utc>,
    /// Analyzer-specific payload; the core never inspects it
    pub payload: serde_json::Value,
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn valid_finding_roundtrips() {
        let raw = json!({
            "type": "bug",
            "severity": "high",
            "location": {"file": "src/main.rs", "line": 42},
            "description": "off by one",
            "evidence": ["src/main.rs:42"]
        });
        let finding: Finding = serde_json::from_value(raw).unwrap();
        assert_eq!(finding.kind, FindingKind::Bug);
        assert_eq!(finding.severity, Severity::High);
        assert_eq!(finding.location.line, 42);
    }

    #[test]
    fn invalid_findings_are_quarantined_not_dropped() {
        let ctx = AnalysisContext::from_raw(
            vec!["grep".into()],
            vec![
                json!({"type": "bug", "severity": "low",
                       "location": {"file": "a.rs", "line": 1},
                       "description": "d"}),
                json!({"type": "vibes", "whatever": true}),
                json!("not even an object"),
            ],
            "stuck".into(),
            CodeScope::files(vec!["a.rs".into()]),
            60,
        );
        assert_eq!(ctx.partial_findings.len(), 1);
        assert_eq!(ctx.quarantined_findings.len(), 2);
    }

    #[test]
    fn severity_orders_low_to_critical() {
        assert!(Severity::Low < Severity::Medium);
        assert!(Severity::Medium < Severity::High);
        assert!(Severity::High < Severity::Critical);
    }

    #[test]
    fn stuck_description_becomes_sole_stuck_point() {
        let ctx = AnalysisContext::from_raw(
            vec![],
            vec![],
            "cannot find the cause".into(),
            CodeScope::default(),
            60,
        );
        assert_eq!(ctx.stuck_points, vec!["cannot find the cause".to_string()]);
    }

    #[test]
    fn analysis_kind_serializes_snake_case() {
        let json = serde_json::to_string(&AnalysisKind::ExecutionTrace).unwrap();
        assert_eq!(json, "\"execution_trace\"");
    }
}
