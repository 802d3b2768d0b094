// JSON-RPC 2.0 framing
//
// Line-delimited JSON-RPC over stdin/stdout: one object per line, stdout
// carries nothing but responses. Requests without an id are notifications
// and get no response.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use deepscope_core::error::{classify, AnalysisError, ErrorCategory};

pub const PARSE_ERROR: i64 = -32700;
pub const INVALID_REQUEST: i64 = -32600;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;
pub const INTERNAL_ERROR: i64 = -32603;

/// Inbound request envelope
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcRequest {
    #[allow(dead_code)]
    pub jsonrpc: Option<String>,
    pub id: Option<Value>,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

impl JsonRpcRequest {
    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

/// Outbound response envelope
#[derive(Debug, Serialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: &'static str,
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(id: Value, error: JsonRpcError) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: None,
            error: Some(error),
        }
    }
}

/// JSON-RPC error object
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn method_not_found(method: &str) -> Self {
        Self::new(METHOD_NOT_FOUND, format!("unknown method: {method}"))
    }

    /// Parameter validation failure carrying `{field_path, message}` pairs
    pub fn invalid_params(violations: Vec<FieldError>) -> Self {
        Self::new(INVALID_PARAMS, "parameter validation failed").with_data(
            serde_json::json!({ "violations": violations }),
        )
    }
}

/// One schema violation
#[derive(Debug, Clone, Serialize)]
pub struct FieldError {
    pub field_path: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field_path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field_path: field_path.into(),
            message: message.into(),
        }
    }
}

/// Translate a core error into the transport error class.
///
/// The request boundary is the only place this mapping happens: session
/// and filesystem errors are the caller's fault (invalid request class);
/// api and unknown errors are ours (internal class). The classification
/// payload rides along in `data`.
impl From<AnalysisError> for JsonRpcError {
    fn from(err: AnalysisError) -> Self {
        let classified = classify(&err);
        let code = match classified.category {
            ErrorCategory::Session | ErrorCategory::Filesystem => INVALID_PARAMS,
            ErrorCategory::Api | ErrorCategory::Unknown => INTERNAL_ERROR,
        };
        JsonRpcError::new(code, classified.description.clone()).with_data(serde_json::json!({
            "category": classified.category,
            "error_code": classified.code,
            "retryable": classified.retryable,
            "next_steps": classified.next_steps,
        }))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn request_with_id_is_not_notification() {
        let req: JsonRpcRequest = serde_json::from_str(
            r#"{"jsonrpc":"2.0","id":1,"method":"tools/list"}"#,
        )
        .unwrap();
        assert!(!req.is_notification());
        assert_eq!(req.method, "tools/list");
    }

    #[test]
    fn missing_id_is_notification() {
        let req: JsonRpcRequest = serde_json::from_str(
            r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#,
        )
        .unwrap();
        assert!(req.is_notification());
    }

    #[test]
    fn session_errors_map_to_invalid_params_class() {
        let err: JsonRpcError = AnalysisError::SessionLocked(Uuid::nil()).into();
        assert_eq!(err.code, INVALID_PARAMS);
        let data = err.data.unwrap();
        assert_eq!(data["error_code"], "SESSION_LOCKED");
        assert_eq!(data["retryable"], true);
    }

    #[test]
    fn api_errors_map_to_internal_class() {
        let err: JsonRpcError = AnalysisError::ApiParse("bad".into()).into();
        assert_eq!(err.code, INTERNAL_ERROR);
        assert_eq!(err.data.unwrap()["error_code"], "API_PARSE_ERROR");
    }

    #[test]
    fn responses_serialize_one_of_result_or_error() {
        let ok = JsonRpcResponse::success(serde_json::json!(1), serde_json::json!({"x": 1}));
        let text = serde_json::to_string(&ok).unwrap();
        assert!(text.contains("result"));
        assert!(!text.contains("error"));

        let bad = JsonRpcResponse::failure(
            serde_json::json!(2),
            JsonRpcError::method_not_found("nope"),
        );
        let text = serde_json::to_string(&bad).unwrap();
        assert!(text.contains("error"));
        assert!(!text.contains("result"));
    }

    #[test]
    fn invalid_params_carries_field_paths() {
        let err = JsonRpcError::invalid_params(vec![FieldError::new(
            "tournament_config.max_rounds",
            "must be between 1 and 5",
        )]);
        let data = err.data.unwrap();
        assert_eq!(
            data["violations"][0]["field_path"],
            "tournament_config.max_rounds"
        );
    }
}
