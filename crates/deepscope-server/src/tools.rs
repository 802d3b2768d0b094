// Tool surface
//
// Parameter shapes for every tool, their JSON Schemas, and the
// validation that turns malformed input into {field_path, message}
// violations before any work happens. Parameter names are snake_case on
// the wire.

use schemars::{schema_for, JsonSchema};
use serde::Deserialize;
use serde_json::Value;
use uuid::Uuid;

use deepscope_core::adapter::SummaryFormat;
use deepscope_core::context::{AnalysisContext, AnalysisKind, CodeLocation, CodeScope};
use deepscope_core::tournament::TournamentConfig;

use crate::rpc::FieldError;

/// A tool as advertised by tools/list
#[derive(Debug, Clone, serde::Serialize)]
pub struct ToolDefinition {
    pub name: &'static str,
    pub description: &'static str,
    pub input_schema: Value,
}

/// All tools the gateway serves
pub fn tool_definitions() -> Vec<ToolDefinition> {
    fn schema<T: JsonSchema>() -> Value {
        serde_json::to_value(schema_for!(T)).unwrap_or(Value::Null)
    }
    vec![
        ToolDefinition {
            name: "escalate_analysis",
            description: "Hand a stuck analysis to the reasoning service for a one-shot deep pass",
            input_schema: schema::<EscalateAnalysisParams>(),
        },
        ToolDefinition {
            name: "trace_execution_path",
            description: "Trace execution from an entry point with remote-assisted analysis",
            input_schema: schema::<TraceExecutionPathParams>(),
        },
        ToolDefinition {
            name: "cross_system_impact",
            description: "Analyze the impact of a change across service boundaries",
            input_schema: schema::<CrossSystemImpactParams>(),
        },
        ToolDefinition {
            name: "performance_bottleneck",
            description: "Model performance characteristics of a code path",
            input_schema: schema::<PerformanceBottleneckParams>(),
        },
        ToolDefinition {
            name: "hypothesis_test",
            description: "Evaluate one hypothesis about the code in a single shot",
            input_schema: schema::<HypothesisTestParams>(),
        },
        ToolDefinition {
            name: "start_conversation",
            description: "Open a multi-turn analysis session",
            input_schema: schema::<StartConversationParams>(),
        },
        ToolDefinition {
            name: "continue_conversation",
            description: "Send a follow-up message into an open session",
            input_schema: schema::<ContinueConversationParams>(),
        },
        ToolDefinition {
            name: "finalize_conversation",
            description: "Close a session into a structured analysis result",
            input_schema: schema::<FinalizeConversationParams>(),
        },
        ToolDefinition {
            name: "get_conversation_status",
            description: "Inspect a session's status and progress",
            input_schema: schema::<GetConversationStatusParams>(),
        },
        ToolDefinition {
            name: "run_hypothesis_tournament",
            description: "Run competing root-cause hypotheses through elimination rounds",
            input_schema: schema::<RunHypothesisTournamentParams>(),
        },
    ]
}

// ============================================================================
// Shared parameter shapes
// ============================================================================

/// What the upstream assistant already knows
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct ClaudeContextParam {
    pub attempted_approaches: Vec<String>,
    #[serde(default)]
    pub partial_findings: Vec<Value>,
    pub stuck_description: String,
    pub code_scope: CodeScopeParam,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct CodeScopeParam {
    pub files: Vec<String>,
    #[serde(default)]
    pub entry_points: Option<Vec<CodeLocationParam>>,
    #[serde(default)]
    pub service_names: Option<Vec<String>>,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct CodeLocationParam {
    pub file: String,
    pub line: u32,
    #[serde(default)]
    pub function_name: Option<String>,
}

impl From<CodeLocationParam> for CodeLocation {
    fn from(p: CodeLocationParam) -> Self {
        CodeLocation {
            file: p.file,
            line: p.line,
            column: None,
            function_name: p.function_name,
        }
    }
}

impl From<CodeScopeParam> for CodeScope {
    fn from(p: CodeScopeParam) -> Self {
        CodeScope {
            files: p.files,
            entry_points: p
                .entry_points
                .unwrap_or_default()
                .into_iter()
                .map(Into::into)
                .collect(),
            service_names: p.service_names.unwrap_or_default(),
        }
    }
}

impl ClaudeContextParam {
    /// Build the internal context; the single stuck_description becomes
    /// the sole stuck point, invalid findings are quarantined.
    pub fn into_context(self, budget_secs: u64) -> AnalysisContext {
        AnalysisContext::from_raw(
            self.attempted_approaches,
            self.partial_findings,
            self.stuck_description,
            self.code_scope.into(),
            budget_secs,
        )
    }
}

// ============================================================================
// Per-tool parameters
// ============================================================================

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct EscalateAnalysisParams {
    pub claude_context: ClaudeContextParam,
    pub analysis_type: String,
    #[serde(default = "default_depth")]
    pub depth_level: u8,
    #[serde(default = "default_budget")]
    pub time_budget_seconds: u64,
}

fn default_depth() -> u8 {
    3
}

fn default_budget() -> u64 {
    60
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct TraceExecutionPathParams {
    pub entry_point: CodeLocationParam,
    #[serde(default = "default_max_depth")]
    pub max_depth: u32,
    #[serde(default = "default_true")]
    pub include_data_flow: bool,
}

fn default_max_depth() -> u32 {
    10
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct ChangeScopeParam {
    pub files: Vec<String>,
    #[serde(default)]
    pub service_names: Option<Vec<String>>,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct CrossSystemImpactParams {
    pub change_scope: ChangeScopeParam,
    #[serde(default)]
    pub impact_types: Option<Vec<String>>,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct CodePathParam {
    pub entry_point: CodeLocationParam,
    #[serde(default)]
    pub suspected_issues: Option<Vec<String>>,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct PerformanceBottleneckParams {
    pub code_path: CodePathParam,
    #[serde(default = "default_profile_depth")]
    pub profile_depth: u8,
}

fn default_profile_depth() -> u8 {
    3
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct HypothesisTestParams {
    pub hypothesis: String,
    pub code_scope: CodeScopeParam,
    pub test_approach: String,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct StartConversationParams {
    pub claude_context: ClaudeContextParam,
    pub analysis_type: String,
    #[serde(default)]
    pub initial_question: Option<String>,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct ContinueConversationParams {
    pub session_id: Uuid,
    pub message: String,
    #[serde(default)]
    pub include_code_snippets: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct FinalizeConversationParams {
    pub session_id: Uuid,
    /// One of detailed, concise, actionable
    #[serde(default)]
    pub summary_format: Option<String>,
}

/// Parse the summary_format field; defaults to detailed
pub fn parse_summary_format(s: Option<&str>) -> Result<SummaryFormat, Vec<FieldError>> {
    match s {
        None | Some("detailed") => Ok(SummaryFormat::Detailed),
        Some("concise") => Ok(SummaryFormat::Concise),
        Some("actionable") => Ok(SummaryFormat::Actionable),
        Some(other) => Err(vec![FieldError::new(
            "summary_format",
            format!("unknown format {other:?}; use detailed, concise, or actionable"),
        )]),
    }
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct GetConversationStatusParams {
    pub session_id: Uuid,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct TournamentConfigParam {
    #[serde(default)]
    pub max_hypotheses: Option<usize>,
    #[serde(default)]
    pub max_rounds: Option<u32>,
    #[serde(default)]
    pub parallel_sessions: Option<usize>,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct RunHypothesisTournamentParams {
    pub claude_context: ClaudeContextParam,
    pub issue: String,
    #[serde(default)]
    pub tournament_config: Option<TournamentConfigParam>,
}

impl TournamentConfigParam {
    pub fn into_config(self) -> TournamentConfig {
        let mut config = TournamentConfig::default();
        if let Some(n) = self.max_hypotheses {
            config.max_hypotheses = n;
        }
        if let Some(n) = self.max_rounds {
            config.max_rounds = n;
        }
        if let Some(n) = self.parallel_sessions {
            config.parallelism = n;
        }
        config.clamped()
    }
}

// ============================================================================
// Validation
// ============================================================================

/// Parse the analysis_type field into the internal enum
pub fn parse_analysis_kind(s: &str) -> Option<AnalysisKind> {
    match s {
        "execution_trace" => Some(AnalysisKind::ExecutionTrace),
        "cross_system" => Some(AnalysisKind::CrossSystem),
        "performance" => Some(AnalysisKind::Performance),
        "hypothesis_test" => Some(AnalysisKind::HypothesisTest),
        _ => None,
    }
}

/// Deserialize tool params, mapping serde failures onto a field violation
pub fn parse_params<T: serde::de::DeserializeOwned>(params: Value) -> Result<T, Vec<FieldError>> {
    serde_json::from_value(params)
        .map_err(|e| vec![FieldError::new("params", e.to_string())])
}

/// Range and enum checks that the schema alone cannot express
pub fn validate_escalate(params: &EscalateAnalysisParams) -> Vec<FieldError> {
    let mut violations = Vec::new();
    if parse_analysis_kind(&params.analysis_type).is_none() {
        violations.push(FieldError::new(
            "analysis_type",
            "must be one of execution_trace, cross_system, performance, hypothesis_test",
        ));
    }
    if !(1..=5).contains(&params.depth_level) {
        violations.push(FieldError::new("depth_level", "must be between 1 and 5"));
    }
    if params.time_budget_seconds == 0 {
        violations.push(FieldError::new(
            "time_budget_seconds",
            "must be greater than zero",
        ));
    }
    violations.extend(validate_context(&params.claude_context));
    violations
}

pub fn validate_context(context: &ClaudeContextParam) -> Vec<FieldError> {
    let mut violations = Vec::new();
    if context.stuck_description.trim().is_empty() {
        violations.push(FieldError::new(
            "claude_context.stuck_description",
            "must not be empty",
        ));
    }
    if context.code_scope.files.is_empty() {
        violations.push(FieldError::new(
            "claude_context.code_scope.files",
            "must name at least one file",
        ));
    }
    violations
}

pub fn validate_tournament(params: &RunHypothesisTournamentParams) -> Vec<FieldError> {
    let mut violations = validate_context(&params.claude_context);
    if params.issue.trim().is_empty() {
        violations.push(FieldError::new("issue", "must not be empty"));
    }
    if let Some(config) = &params.tournament_config {
        if let Some(n) = config.max_hypotheses {
            if !(2..=20).contains(&n) {
                violations.push(FieldError::new(
                    "tournament_config.max_hypotheses",
                    "must be between 2 and 20",
                ));
            }
        }
        if let Some(n) = config.max_rounds {
            if !(1..=5).contains(&n) {
                violations.push(FieldError::new(
                    "tournament_config.max_rounds",
                    "must be between 1 and 5",
                ));
            }
        }
        if let Some(n) = config.parallel_sessions {
            if !(1..=10).contains(&n) {
                violations.push(FieldError::new(
                    "tournament_config.parallel_sessions",
                    "must be between 1 and 10",
                ));
            }
        }
    }
    violations
}

pub fn validate_profile_depth(depth: u8) -> Vec<FieldError> {
    if (1..=5).contains(&depth) {
        Vec::new()
    } else {
        vec![FieldError::new("profile_depth", "must be between 1 and 5")]
    }
}

// ============================================================================
// Tests
// ============================================================================
