// End-to-end tests over the gateway: tool dispatch, validation, session
// lifecycle, and the stdio framing, with a scripted chat client standing
// in for the remote service.

use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use deepscope_core::chat::{ScriptedChatClient, ScriptedReply};
use deepscope_core::session_manager::SessionManager;
use deepscope_server::rpc::{JsonRpcRequest, INVALID_PARAMS, METHOD_NOT_FOUND};
use deepscope_server::{serve_io, Gateway};

const SYNTHESIS: &str = r#"here: {"rootCauses":[{"type":"N+1","description":"d","evidence":["f.ts:1"],"confidence":0.9,"fixStrategy":"batch"}], "recommendations":{"immediate":["x"]}} trailing text"#;

fn gateway_with(client: ScriptedChatClient) -> (tempfile::TempDir, Arc<Gateway>) {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("main.rs"), "fn main() { run(); }\n").unwrap();
    let manager = Arc::new(SessionManager::with_timeouts(
        chrono::Duration::seconds(3600),
        Duration::from_secs(3600),
    ));
    let gateway =
        Gateway::with_manager(Arc::new(client), dir.path().to_path_buf(), manager).unwrap();
    (dir, Arc::new(gateway))
}

fn context_json() -> Value {
    json!({
        "attempted_approaches": ["grep", "print debugging"],
        "partial_findings": [],
        "stuck_description": "cannot find the cause of the slowdown",
        "code_scope": {"files": ["main.rs"]}
    })
}

// ── Validation and error surface ───────────────────────────────────

#[tokio::test]
async fn path_traversal_is_rejected_at_the_boundary() {
    let (_dir, gateway) = gateway_with(ScriptedChatClient::new());
    let err = gateway
        .call_tool(
            "escalate_analysis",
            json!({
                "claude_context": {
                    "attempted_approaches": [],
                    "partial_findings": [],
                    "stuck_description": "stuck",
                    "code_scope": {"files": ["../outside"]}
                },
                "analysis_type": "performance"
            }),
        )
        .await
        .unwrap_err();
    assert_eq!(err.code, INVALID_PARAMS);
    let violations = &err.data.unwrap()["violations"];
    assert_eq!(violations[0]["field_path"], "code_scope.files[0]");
    assert!(violations[0]["message"]
        .as_str()
        .unwrap()
        .contains("escapes project root"));
}

#[tokio::test]
async fn unknown_tool_is_method_not_found() {
    let (_dir, gateway) = gateway_with(ScriptedChatClient::new());
    let err = gateway.call_tool("divine_the_bug", json!({})).await.unwrap_err();
    assert_eq!(err.code, METHOD_NOT_FOUND);
}

#[tokio::test]
async fn out_of_range_depth_reports_field_path() {
    let (_dir, gateway) = gateway_with(ScriptedChatClient::new());
    let err = gateway
        .call_tool(
            "escalate_analysis",
            json!({
                "claude_context": context_json(),
                "analysis_type": "performance",
                "depth_level": 11
            }),
        )
        .await
        .unwrap_err();
    assert_eq!(err.code, INVALID_PARAMS);
    let data = err.data.unwrap();
    assert!(data["violations"]
        .as_array()
        .unwrap()
        .iter()
        .any(|v| v["field_path"] == "depth_level"));
}

// ── Conversation lifecycle through the tool surface ────────────────

#[tokio::test]
async fn conversation_lifecycle_start_continue_finalize() {
    let client = ScriptedChatClient::with_responses([
        "First pass done. Could the pool be exhausted under sustained load?",
        "Confirmed the N+1 query shape at main.rs:1.",
        SYNTHESIS,
    ]);
    let (_dir, gateway) = gateway_with(client);

    let started = gateway
        .call_tool(
            "start_conversation",
            json!({
                "claude_context": context_json(),
                "analysis_type": "performance"
            }),
        )
        .await
        .unwrap();
    let session_id = started["session_id"].as_str().unwrap().to_string();
    assert_eq!(started["status"], "active");
    assert!(!started["suggested_follow_ups"].as_array().unwrap().is_empty());

    let continued = gateway
        .call_tool(
            "continue_conversation",
            json!({"session_id": session_id, "message": "dig into the queries", "include_code_snippets": false}),
        )
        .await
        .unwrap();
    assert!(continued["response"].as_str().unwrap().contains("N+1"));
    assert!(continued["analysis_progress"].as_f64().unwrap() > 0.0);

    let status = gateway
        .call_tool("get_conversation_status", json!({"session_id": session_id}))
        .await
        .unwrap();
    assert_eq!(status["turn_count"], 3);

    let finalized = gateway
        .call_tool(
            "finalize_conversation",
            json!({"session_id": session_id, "summary_format": "detailed"}),
        )
        .await
        .unwrap();
    assert_eq!(finalized["status"], "success");
    assert_eq!(finalized["root_causes"][0]["type"], "N+1");
    assert_eq!(finalized["immediate_actions"][0]["description"], "x");
    assert_eq!(finalized["immediate_actions"][0]["priority"], "high");

    // The session stays queryable as completed.
    let status = gateway
        .call_tool("get_conversation_status", json!({"session_id": session_id}))
        .await
        .unwrap();
    assert_eq!(status["status"], "completed");

    // But further turns are refused.
    let err = gateway
        .call_tool(
            "continue_conversation",
            json!({"session_id": session_id, "message": "one more thing"}),
        )
        .await
        .unwrap_err();
    assert_eq!(err.data.unwrap()["error_code"], "SESSION_NOT_FOUND");
}

#[tokio::test]
async fn concurrent_continues_surface_session_locked() {
    let client = ScriptedChatClient::new();
    client.push(ScriptedReply::Text("opening observations".into()));
    client.push(ScriptedReply::Delayed {
        millis: 120,
        text: "slow analysis".into(),
    });
    let (_dir, gateway) = gateway_with(client);

    let started = gateway
        .call_tool(
            "start_conversation",
            json!({"claude_context": context_json(), "analysis_type": "hypothesis_test"}),
        )
        .await
        .unwrap();
    let session_id = started["session_id"].as_str().unwrap().to_string();

    let first = {
        let gateway = gateway.clone();
        let session_id = session_id.clone();
        tokio::spawn(async move {
            gateway
                .call_tool(
                    "continue_conversation",
                    json!({"session_id": session_id, "message": "a", "include_code_snippets": false}),
                )
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(30)).await;
    let second = gateway
        .call_tool(
            "continue_conversation",
            json!({"session_id": session_id, "message": "b", "include_code_snippets": false}),
        )
        .await;

    let err = second.unwrap_err();
    let data = err.data.unwrap();
    assert_eq!(data["error_code"], "SESSION_LOCKED");
    assert_eq!(data["retryable"], true);
    assert!(first.await.unwrap().is_ok());
}

#[tokio::test]
async fn escalate_analysis_budget_expiry_yields_partial() {
    let client = ScriptedChatClient::new();
    client.push(ScriptedReply::Text(
        "initial sweep. What about the indexes?".into(),
    ));
    client.push(ScriptedReply::Delayed {
        millis: 2_000,
        text: "far too slow".into(),
    });
    let (_dir, gateway) = gateway_with(client);

    let result = gateway
        .call_tool(
            "escalate_analysis",
            json!({
                "claude_context": context_json(),
                "analysis_type": "performance",
                "depth_level": 3,
                "time_budget_seconds": 1
            }),
        )
        .await
        .unwrap();
    assert_eq!(result["status"], "partial");
    assert_eq!(
        result["ruled_out_approaches"],
        json!(["grep", "print debugging"])
    );
    let steps = result["investigation_next_steps"].as_array().unwrap();
    assert!(steps.iter().any(|s| s.as_str().unwrap().contains("budget")));
}

#[tokio::test]
async fn trace_execution_path_returns_analysis_and_advisory() {
    let client = ScriptedChatClient::with_responses([
        "Traced the flow through run().",
        r#"{"rootCauses":[],"recommendations":{"immediate":[]}}"#,
    ]);
    let (_dir, gateway) = gateway_with(client);

    let result = gateway
        .call_tool(
            "trace_execution_path",
            json!({"entry_point": {"file": "main.rs", "line": 1}}),
        )
        .await
        .unwrap();
    assert!(result["analysis"].is_object());
    assert_eq!(result["advisory"]["source"], "execution_tracer");
    let calls = result["advisory"]["payload"]["call_sites"].as_array().unwrap();
    assert!(calls.iter().any(|c| c["callee"] == "run"));
}

// ── Wire framing ───────────────────────────────────────────────────

#[tokio::test]
async fn stdio_round_trip_lists_tools() {
    let (_dir, gateway) = gateway_with(ScriptedChatClient::new());

    let (client_io, server_io) = tokio::io::duplex(64 * 1024);
    let (server_read, server_write) = tokio::io::split(server_io);
    let server = tokio::spawn(serve_io(
        gateway,
        BufReader::new(server_read),
        server_write,
    ));

    let (client_read, mut client_write) = tokio::io::split(client_io);
    client_write
        .write_all(b"{\"jsonrpc\":\"2.0\",\"id\":1,\"method\":\"tools/list\"}\n")
        .await
        .unwrap();
    client_write
        .write_all(b"{\"jsonrpc\":\"2.0\",\"id\":2,\"method\":\"no_such_method\"}\n")
        .await
        .unwrap();

    let mut lines = BufReader::new(client_read).lines();
    let mut responses = Vec::new();
    for _ in 0..2 {
        let line = lines.next_line().await.unwrap().unwrap();
        responses.push(serde_json::from_str::<Value>(&line).unwrap());
    }
    drop(client_write);
    server.await.unwrap().unwrap();

    let list = responses.iter().find(|r| r["id"] == 1).unwrap();
    let tools = list["result"]["tools"].as_array().unwrap();
    assert_eq!(tools.len(), 10);
    assert!(tools.iter().any(|t| t["name"] == "escalate_analysis"));

    let unknown = responses.iter().find(|r| r["id"] == 2).unwrap();
    assert_eq!(unknown["error"]["code"], METHOD_NOT_FOUND);
}

#[tokio::test]
async fn notifications_produce_no_response() {
    let (_dir, gateway) = gateway_with(ScriptedChatClient::new());
    let request: JsonRpcRequest = serde_json::from_str(
        r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#,
    )
    .unwrap();
    assert!(gateway.dispatch(request).await.is_none());
}
