// Tool dispatch
//
// The request boundary: validates parameters, runs paths through the
// secure reader, invokes the orchestrator or scheduler, and translates
// core errors into transport errors. Nothing below this layer knows about
// JSON-RPC; nothing above it knows about sessions.

use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use deepscope_core::chat::ChatClient;
use deepscope_core::context::{
    AnalysisContext, AnalysisKind, CodeLocation, CodeScope, TOURNAMENT_BUDGET_SECS,
};
use deepscope_core::error::Result;
use deepscope_core::orchestrator::ConversationOrchestrator;
use deepscope_core::reader::SecureReader;
use deepscope_core::session_manager::SessionManager;
use deepscope_core::tournament::TournamentScheduler;
use deepscope_core::DialogueAdapter;

use crate::analyzers::{BoundaryAnalyzer, ExecutionTracer, PerformanceModeler};
use crate::rpc::{FieldError, JsonRpcError, JsonRpcRequest, JsonRpcResponse};
use crate::tools::{
    self, parse_analysis_kind, parse_params, parse_summary_format, tool_definitions,
};

/// Everything the request boundary needs, wired once at startup
pub struct Gateway {
    manager: Arc<SessionManager>,
    orchestrator: Arc<ConversationOrchestrator>,
    scheduler: TournamentScheduler,
    reader: Arc<SecureReader>,
    tracer: ExecutionTracer,
    modeler: PerformanceModeler,
    boundary: BoundaryAnalyzer,
}

impl Gateway {
    /// Wire the gateway over a chat client and an absolute project root
    pub fn new(client: Arc<dyn ChatClient>, project_root: PathBuf) -> Result<Self> {
        Self::with_manager(client, project_root, Arc::new(SessionManager::new()))
    }

    /// Wire the gateway around an existing session manager (test hook)
    pub fn with_manager(
        client: Arc<dyn ChatClient>,
        project_root: PathBuf,
        manager: Arc<SessionManager>,
    ) -> Result<Self> {
        let reader = Arc::new(SecureReader::new(project_root)?);
        let adapter = Arc::new(DialogueAdapter::new(client, reader.clone()));
        let orchestrator = Arc::new(ConversationOrchestrator::new(
            manager.clone(),
            adapter.clone(),
            reader.clone(),
        ));
        let scheduler = TournamentScheduler::new(
            manager.clone(),
            adapter,
            orchestrator.clone(),
            reader.clone(),
        );
        Ok(Self {
            manager,
            orchestrator,
            scheduler,
            tracer: ExecutionTracer::new(reader.clone()),
            modeler: PerformanceModeler::new(reader.clone()),
            boundary: BoundaryAnalyzer::new(reader.clone()),
            reader,
        })
    }

    pub fn manager(&self) -> &Arc<SessionManager> {
        &self.manager
    }

    /// Handle one request; notifications produce no response
    pub async fn dispatch(&self, request: JsonRpcRequest) -> Option<JsonRpcResponse> {
        if request.is_notification() {
            return None;
        }
        let id = request.id.clone().unwrap_or(Value::Null);
        let outcome = match request.method.as_str() {
            "initialize" => Ok(json!({
                "server_info": {
                    "name": "deepscope-server",
                    "version": env!("CARGO_PKG_VERSION"),
                },
                "capabilities": {"tools": {}},
            })),
            "tools/list" => Ok(json!({ "tools": tool_definitions() })),
            "tools/call" => self.handle_tools_call(request.params).await,
            other => Err(JsonRpcError::method_not_found(other)),
        };
        Some(match outcome {
            Ok(result) => JsonRpcResponse::success(id, result),
            Err(error) => JsonRpcResponse::failure(id, error),
        })
    }

    async fn handle_tools_call(&self, params: Value) -> std::result::Result<Value, JsonRpcError> {
        let name = params
            .get("name")
            .and_then(|n| n.as_str())
            .ok_or_else(|| {
                JsonRpcError::invalid_params(vec![FieldError::new("name", "tool name is required")])
            })?
            .to_string();
        let arguments = params.get("arguments").cloned().unwrap_or(json!({}));
        info!(tool = %name, "tool call");
        self.call_tool(&name, arguments).await
    }

    /// Route a validated tool call into the core
    pub async fn call_tool(
        &self,
        name: &str,
        args: Value,
    ) -> std::result::Result<Value, JsonRpcError> {
        match name {
            "escalate_analysis" => self.escalate_analysis(args).await,
            "trace_execution_path" => self.trace_execution_path(args).await,
            "cross_system_impact" => self.cross_system_impact(args).await,
            "performance_bottleneck" => self.performance_bottleneck(args).await,
            "hypothesis_test" => self.hypothesis_test(args).await,
            "start_conversation" => self.start_conversation(args).await,
            "continue_conversation" => self.continue_conversation(args).await,
            "finalize_conversation" => self.finalize_conversation(args).await,
            "get_conversation_status" => self.get_conversation_status(args).await,
            "run_hypothesis_tournament" => self.run_hypothesis_tournament(args).await,
            other => Err(JsonRpcError::method_not_found(other)),
        }
    }

    /// Validate scoped file paths through the secure reader
    fn validate_paths(&self, files: &[String]) -> Vec<FieldError> {
        let mut violations = Vec::new();
        for (i, file) in files.iter().enumerate() {
            if let Err(err) = self.reader.validate_path(file) {
                violations.push(FieldError::new(
                    format!("code_scope.files[{i}]"),
                    err.to_string(),
                ));
            }
        }
        violations
    }

    // ── One-shot analysis tools ────────────────────────────────────

    async fn escalate_analysis(&self, args: Value) -> std::result::Result<Value, JsonRpcError> {
        let params: tools::EscalateAnalysisParams =
            parse_params(args).map_err(JsonRpcError::invalid_params)?;
        let mut violations = tools::validate_escalate(&params);
        violations.extend(self.validate_paths(&params.claude_context.code_scope.files));
        if !violations.is_empty() {
            return Err(JsonRpcError::invalid_params(violations));
        }
        // Already validated above.
        let kind = parse_analysis_kind(&params.analysis_type)
            .unwrap_or(AnalysisKind::HypothesisTest);
        let context = params.claude_context.into_context(params.time_budget_seconds);
        let result = self
            .orchestrator
            .run_analysis(context, kind, params.depth_level, None)
            .await?;
        Ok(serde_json::to_value(result).unwrap_or(Value::Null))
    }

    async fn trace_execution_path(&self, args: Value) -> std::result::Result<Value, JsonRpcError> {
        let params: tools::TraceExecutionPathParams =
            parse_params(args).map_err(JsonRpcError::invalid_params)?;
        let violations = self.validate_paths(std::slice::from_ref(&params.entry_point.file));
        if !violations.is_empty() {
            return Err(JsonRpcError::invalid_params(violations));
        }

        let entry: CodeLocation = params.entry_point.into();
        let advisory = self.tracer.trace(&entry, params.max_depth).await?;

        let question = if params.include_data_flow {
            format!(
                "Trace execution starting at {entry}, following both control flow and the \
                 data each step mutates."
            )
        } else {
            format!("Trace execution starting at {entry}, control flow only.")
        };
        let context = AnalysisContext::new(
            format!("need an execution trace from {entry}"),
            CodeScope::files(vec![entry.file.clone()]),
        );
        let analysis = self
            .orchestrator
            .run_analysis(context, AnalysisKind::ExecutionTrace, 2, Some(&question))
            .await?;
        Ok(json!({
            "analysis": analysis,
            "advisory": advisory,
        }))
    }

    async fn cross_system_impact(&self, args: Value) -> std::result::Result<Value, JsonRpcError> {
        let params: tools::CrossSystemImpactParams =
            parse_params(args).map_err(JsonRpcError::invalid_params)?;
        let violations = self.validate_paths(&params.change_scope.files);
        if !violations.is_empty() {
            return Err(JsonRpcError::invalid_params(violations));
        }

        let services = params.change_scope.service_names.unwrap_or_default();
        let advisory = self
            .boundary
            .analyze(&params.change_scope.files, &services)
            .await?;

        let impact_types = params
            .impact_types
            .unwrap_or_else(|| vec!["breaking".into(), "performance".into(), "behavioral".into()]);
        let question = format!(
            "Assess the {} impact of changing these files on the surrounding services.",
            impact_types.join(", ")
        );
        let context = AnalysisContext::new(
            "need a cross-service impact assessment before landing a change",
            CodeScope {
                files: params.change_scope.files,
                entry_points: Vec::new(),
                service_names: services,
            },
        );
        let analysis = self
            .orchestrator
            .run_analysis(context, AnalysisKind::CrossSystem, 2, Some(&question))
            .await?;
        Ok(json!({
            "analysis": analysis,
            "advisory": advisory,
        }))
    }

    async fn performance_bottleneck(&self, args: Value) -> std::result::Result<Value, JsonRpcError> {
        let params: tools::PerformanceBottleneckParams =
            parse_params(args).map_err(JsonRpcError::invalid_params)?;
        let mut violations = tools::validate_profile_depth(params.profile_depth);
        violations.extend(self.validate_paths(std::slice::from_ref(&params.code_path.entry_point.file)));
        if !violations.is_empty() {
            return Err(JsonRpcError::invalid_params(violations));
        }

        let entry: CodeLocation = params.code_path.entry_point.into();
        let suspected = params.code_path.suspected_issues.unwrap_or_default();
        let advisory = self.modeler.model(&entry, &suspected).await?;

        let question = format!(
            "Model the performance of the path starting at {entry}: complexity, allocation, \
             I/O patterns, and likely bottlenecks under production load."
        );
        let mut context = AnalysisContext::new(
            format!("suspected performance bottleneck near {entry}"),
            CodeScope::files(vec![entry.file.clone()]),
        );
        context.attempted_approaches = suspected;
        let analysis = self
            .orchestrator
            .run_analysis(
                context,
                AnalysisKind::Performance,
                params.profile_depth,
                Some(&question),
            )
            .await?;
        Ok(json!({
            "analysis": analysis,
            "advisory": advisory,
        }))
    }

    async fn hypothesis_test(&self, args: Value) -> std::result::Result<Value, JsonRpcError> {
        let params: tools::HypothesisTestParams =
            parse_params(args).map_err(JsonRpcError::invalid_params)?;
        let violations = self.validate_paths(&params.code_scope.files);
        if !violations.is_empty() {
            return Err(JsonRpcError::invalid_params(violations));
        }

        let question = format!(
            "Hypothesis: {}\nTest approach: {}\nSeek both supporting and contradicting \
             evidence, then state a verdict.",
            params.hypothesis, params.test_approach
        );
        let context = AnalysisContext::new(
            format!("testing hypothesis: {}", params.hypothesis),
            params.code_scope.into(),
        );
        let analysis = self
            .orchestrator
            .run_analysis(context, AnalysisKind::HypothesisTest, 2, Some(&question))
            .await?;
        Ok(serde_json::to_value(analysis).unwrap_or(Value::Null))
    }

    // ── Conversation tools ─────────────────────────────────────────

    async fn start_conversation(&self, args: Value) -> std::result::Result<Value, JsonRpcError> {
        let params: tools::StartConversationParams =
            parse_params(args).map_err(JsonRpcError::invalid_params)?;
        let mut violations = tools::validate_context(&params.claude_context);
        if parse_analysis_kind(&params.analysis_type).is_none() {
            violations.push(FieldError::new(
                "analysis_type",
                "must be one of execution_trace, cross_system, performance, hypothesis_test",
            ));
        }
        violations.extend(self.validate_paths(&params.claude_context.code_scope.files));
        if !violations.is_empty() {
            return Err(JsonRpcError::invalid_params(violations));
        }
        // Already validated above.
        let kind = parse_analysis_kind(&params.analysis_type)
            .unwrap_or(AnalysisKind::HypothesisTest);

        let context = params.claude_context.into_context(60);
        let started = self
            .orchestrator
            .start_conversation(context, kind, params.initial_question.as_deref())
            .await?;
        Ok(json!({
            "session_id": started.session_id,
            "initial_response": started.initial_response,
            "suggested_follow_ups": started.suggested_follow_ups,
            "status": started.status,
        }))
    }

    async fn continue_conversation(&self, args: Value) -> std::result::Result<Value, JsonRpcError> {
        let params: tools::ContinueConversationParams =
            parse_params(args).map_err(JsonRpcError::invalid_params)?;
        let continued = self
            .orchestrator
            .continue_conversation(
                params.session_id,
                &params.message,
                params.include_code_snippets.unwrap_or(true),
            )
            .await?;
        Ok(json!({
            "response": continued.response,
            "analysis_progress": continued.analysis_progress,
            "can_finalize": continued.can_finalize,
            "status": continued.status,
        }))
    }

    async fn finalize_conversation(&self, args: Value) -> std::result::Result<Value, JsonRpcError> {
        let params: tools::FinalizeConversationParams =
            parse_params(args).map_err(JsonRpcError::invalid_params)?;
        let format = parse_summary_format(params.summary_format.as_deref())
            .map_err(JsonRpcError::invalid_params)?;
        let result = self
            .orchestrator
            .finalize_conversation(params.session_id, format)
            .await?;
        Ok(serde_json::to_value(result).unwrap_or(Value::Null))
    }

    async fn get_conversation_status(&self, args: Value) -> std::result::Result<Value, JsonRpcError> {
        let params: tools::GetConversationStatusParams =
            parse_params(args).map_err(JsonRpcError::invalid_params)?;
        let status = self
            .orchestrator
            .conversation_status(params.session_id)
            .await?;
        Ok(serde_json::to_value(status).unwrap_or(Value::Null))
    }

    // ── Tournament ─────────────────────────────────────────────────

    async fn run_hypothesis_tournament(
        &self,
        args: Value,
    ) -> std::result::Result<Value, JsonRpcError> {
        let params: tools::RunHypothesisTournamentParams =
            parse_params(args).map_err(JsonRpcError::invalid_params)?;
        let mut violations = tools::validate_tournament(&params);
        violations.extend(self.validate_paths(&params.claude_context.code_scope.files));
        if !violations.is_empty() {
            return Err(JsonRpcError::invalid_params(violations));
        }

        let config = params
            .tournament_config
            .map(|c| c.into_config())
            .unwrap_or_default();
        let context = params.claude_context.into_context(TOURNAMENT_BUDGET_SECS);
        let issue = params.issue;
        let result = self.scheduler.run(context, &issue, config).await;
        match &result {
            Ok(r) => info!(
                winner = ?r.winner.as_ref().map(|w| w.hypothesis.theory.as_str()),
                "tournament complete"
            ),
            Err(err) => warn!(error = %err, "tournament failed"),
        }
        Ok(serde_json::to_value(result?).unwrap_or(Value::Null))
    }
}
