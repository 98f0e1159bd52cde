//! Wire types for the Model Context Protocol over JSON-RPC 2.0.
//!
//! Only the subset used between the supervisor and its worker is modelled:
//! `initialize`, `notifications/initialized`, `tools/list`, `tools/call`
//! and `ping`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const JSONRPC_VERSION: &str = "2.0";

/// Protocol revision both sides announce during `initialize`.
pub const MCP_VERSION: &str = "2024-11-05";

fn version() -> String {
    JSONRPC_VERSION.to_owned()
}

/// Correlation id of a request. Parse failures are answered with `Null`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(untagged)]
pub enum RequestId {
    Number(i64),
    String(String),
    Null,
}

impl RequestId {
    pub fn as_u64(&self) -> Option<u64> {
        if let RequestId::Number(n) = self {
            u64::try_from(*n).ok()
        } else {
            None
        }
    }
}

impl From<u64> for RequestId {
    fn from(id: u64) -> Self {
        RequestId::Number(i64::try_from(id).unwrap_or(i64::MAX))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub id: RequestId,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    pub fn new(id: RequestId, method: impl Into<String>, params: Option<Value>) -> Self {
        JsonRpcRequest {
            jsonrpc: version(),
            id,
            method: method.into(),
            params,
        }
    }
}

/// A message that expects no answer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcNotification {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcNotification {
    pub fn new(method: impl Into<String>) -> Self {
        JsonRpcNotification {
            jsonrpc: version(),
            method: method.into(),
            params: None,
        }
    }
}

/// Exactly one of `result` and `error` is set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    pub id: RequestId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    pub fn success(id: RequestId, result: Value) -> Self {
        JsonRpcResponse {
            jsonrpc: version(),
            id,
            result: Some(result),
            error: None,
        }
    }

    /// Serialize `result`; a serialization failure becomes an internal error reply.
    pub fn from_result<T: Serialize>(id: RequestId, result: &T) -> Self {
        match serde_json::to_value(result) {
            Ok(value) => Self::success(id, value),
            Err(e) => Self::error(id, JsonRpcError::internal_error(&e.to_string())),
        }
    }

    pub fn error(id: RequestId, error: JsonRpcError) -> Self {
        JsonRpcResponse {
            jsonrpc: version(),
            id,
            result: None,
            error: Some(error),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcError {
    pub const PARSE_ERROR: i32 = -32700;
    pub const INVALID_REQUEST: i32 = -32600;
    pub const METHOD_NOT_FOUND: i32 = -32601;
    pub const INVALID_PARAMS: i32 = -32602;
    pub const INTERNAL_ERROR: i32 = -32603;

    pub fn new(code: i32, message: impl Into<String>) -> Self {
        JsonRpcError {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn parse_error(detail: &str) -> Self {
        Self::new(Self::PARSE_ERROR, format!("Malformed message: {detail}"))
    }

    pub fn invalid_request(detail: &str) -> Self {
        Self::new(Self::INVALID_REQUEST, format!("Bad request: {detail}"))
    }

    pub fn method_not_found(method: &str) -> Self {
        Self::new(Self::METHOD_NOT_FOUND, format!("No such method: {method}"))
    }

    pub fn invalid_params(detail: &str) -> Self {
        Self::new(Self::INVALID_PARAMS, format!("Bad params: {detail}"))
    }

    pub fn internal_error(detail: &str) -> Self {
        Self::new(Self::INTERNAL_ERROR, format!("Worker error: {detail}"))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    pub protocol_version: String,
    #[serde(default)]
    pub capabilities: Value,
    pub client_info: ClientInfo,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientInfo {
    pub name: String,
    pub version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    pub protocol_version: String,
    pub capabilities: ServerCapabilities,
    pub server_info: ServerInfo,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerCapabilities {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<ToolsCapability>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolsCapability {
    #[serde(default)]
    pub list_changed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerInfo {
    pub name: String,
    pub version: String,
}

/// One entry of the `tools/list` catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsListResult {
    pub tools: Vec<ToolDefinition>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallParams {
    pub name: String,
    #[serde(default)]
    pub arguments: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ToolResultContent {
    Text { text: String },
}

/// Outcome of `tools/call`. Payloads travel as JSON text in a single block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallResult {
    pub content: Vec<ToolResultContent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_error: Option<bool>,
}

impl ToolCallResult {
    fn single(text: String, is_error: Option<bool>) -> Self {
        ToolCallResult {
            content: vec![ToolResultContent::Text { text }],
            is_error,
        }
    }

    pub fn text(text: String) -> Self {
        Self::single(text, None)
    }

    pub fn json(payload: &Value) -> Self {
        let text = serde_json::to_string_pretty(payload).unwrap_or_else(|_| payload.to_string());
        Self::single(text, None)
    }

    /// A result the caller should treat as a failed tool run.
    pub fn error(message: String) -> Self {
        Self::single(message, Some(true))
    }

    pub fn is_error(&self) -> bool {
        self.is_error == Some(true)
    }

    pub fn text_content(&self) -> String {
        let blocks: Vec<&str> = self
            .content
            .iter()
            .map(|ToolResultContent::Text { text }| text.as_str())
            .collect();
        blocks.join("\n")
    }

    /// Parsed JSON payload, or the text itself as a JSON string.
    pub fn payload(&self) -> Value {
        let text = self.text_content();
        match serde_json::from_str(&text) {
            Ok(value) => value,
            Err(_) => Value::String(text),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_carries_version_and_numeric_id() {
        let req = JsonRpcRequest::new(RequestId::from(1), "tools/list", None);
        let wire = serde_json::to_value(&req).unwrap();
        assert_eq!(wire, json!({"jsonrpc": "2.0", "id": 1, "method": "tools/list"}));
    }

    #[test]
    fn response_sets_exactly_one_side() {
        let ok = JsonRpcResponse::success(RequestId::String("a".into()), json!({}));
        assert!(ok.result.is_some() && ok.error.is_none());

        let failed = JsonRpcResponse::error(RequestId::Null, JsonRpcError::method_not_found("x"));
        assert!(failed.result.is_none());
        assert_eq!(failed.error.map(|e| e.code), Some(JsonRpcError::METHOD_NOT_FOUND));
    }

    #[test]
    fn response_without_id_is_rejected() {
        let notification = r#"{"jsonrpc":"2.0","method":"notifications/message"}"#;
        assert!(serde_json::from_str::<JsonRpcResponse>(notification).is_err());

        let response = r#"{"jsonrpc":"2.0","id":7,"result":{}}"#;
        let parsed: JsonRpcResponse = serde_json::from_str(response).unwrap();
        assert_eq!(parsed.id.as_u64(), Some(7));
    }

    #[test]
    fn tool_results_serialize_as_text_blocks() {
        let plain = serde_json::to_value(ToolCallResult::text("hi".into())).unwrap();
        assert_eq!(plain, json!({"content": [{"type": "text", "text": "hi"}]}));

        let failed = ToolCallResult::error("remote down".into());
        assert!(failed.is_error());
        assert_eq!(serde_json::to_value(&failed).unwrap()["isError"], true);
    }

    #[test]
    fn payload_falls_back_to_raw_text() {
        let result = ToolCallResult::json(&json!({"workItemId": 5}));
        assert_eq!(result.payload(), json!({"workItemId": 5}));
        assert!(!result.is_error());

        let result = ToolCallResult::text("plain words".into());
        assert_eq!(result.payload(), json!("plain words"));
    }

    #[test]
    fn error_helpers_use_standard_codes() {
        let cases = [
            (JsonRpcError::parse_error("eof"), JsonRpcError::PARSE_ERROR),
            (JsonRpcError::invalid_request("dup"), JsonRpcError::INVALID_REQUEST),
            (JsonRpcError::invalid_params("name"), JsonRpcError::INVALID_PARAMS),
            (JsonRpcError::internal_error("io"), JsonRpcError::INTERNAL_ERROR),
        ];
        for (error, code) in cases {
            assert_eq!(error.code, code);
            assert!(error.data.is_none());
        }
        let tagged = JsonRpcError::method_not_found("x").with_data(json!({"tool": "x"}));
        assert_eq!(tagged.data, Some(json!({"tool": "x"})));
    }

    #[test]
    fn ids_round_trip_through_u64() {
        assert_eq!(RequestId::from(9u64), RequestId::Number(9));
        assert_eq!(RequestId::Number(-1).as_u64(), None);
        assert_eq!(RequestId::String("9".into()).as_u64(), None);
        assert_eq!(serde_json::to_string(&RequestId::Null).unwrap(), "null");
    }

    #[test]
    fn notification_omits_params() {
        let wire = serde_json::to_value(JsonRpcNotification::new("notifications/initialized"))
            .unwrap();
        assert_eq!(
            wire,
            json!({"jsonrpc": "2.0", "method": "notifications/initialized"})
        );
    }
}
