//! JSON-RPC 2.0 dispatch for the MCP methods this server answers.

use {
    serde_json::Value,
    tracing::{debug, info, warn},
};

use crate::{
    tool::ToolRegistry,
    types::{
        InitializeResult, JsonRpcError, JsonRpcRequest, JsonRpcResponse, PROTOCOL_VERSION,
        ServerCapabilities, ServerInfo, ToolContent, ToolsCallParams, ToolsCallResult,
        ToolsCapability, ToolsListResult,
    },
};

pub struct McpServer {
    info: ServerInfo,
    instructions: Option<String>,
    tools: ToolRegistry,
}

impl McpServer {
    pub fn new(name: impl Into<String>, version: impl Into<String>, tools: ToolRegistry) -> Self {
        Self {
            info: ServerInfo {
                name: name.into(),
                version: Some(version.into()),
            },
            instructions: None,
            tools,
        }
    }

    /// Text returned to clients in the `initialize` result.
    #[must_use]
    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = Some(instructions.into());
        self
    }

    pub fn info(&self) -> &ServerInfo {
        &self.info
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    /// Handle a raw request body. Returns `None` for notifications.
    pub async fn handle_str(&self, body: &str) -> Option<JsonRpcResponse> {
        match serde_json::from_str::<Value>(body) {
            Ok(value) => self.handle_value(value).await,
            Err(e) => {
                debug!(error = %e, "unparseable JSON-RPC body");
                Some(JsonRpcResponse::failure(
                    Value::Null,
                    JsonRpcError::parse_error(e),
                ))
            },
        }
    }

    /// Handle one decoded JSON-RPC message. Returns `None` for notifications.
    pub async fn handle_value(&self, value: Value) -> Option<JsonRpcResponse> {
        let request = match validate_envelope(value) {
            Ok(request) => request,
            Err((id, error)) => return Some(JsonRpcResponse::failure(id, error)),
        };

        let Some(id) = request.id.clone() else {
            debug!(method = %request.method, "notification received");
            return None;
        };

        debug!(method = %request.method, id = %id, "request received");
        Some(match self.dispatch(&request.method, request.params).await {
            Ok(result) => JsonRpcResponse::success(id, result),
            Err(error) => JsonRpcResponse::failure(id, error),
        })
    }

    async fn dispatch(&self, method: &str, params: Option<Value>) -> Result<Value, JsonRpcError> {
        match method {
            "initialize" => to_value(InitializeResult {
                protocol_version: PROTOCOL_VERSION.into(),
                capabilities: ServerCapabilities {
                    tools: Some(ToolsCapability {
                        list_changed: false,
                    }),
                },
                server_info: self.info.clone(),
                instructions: self.instructions.clone(),
            }),
            "ping" => Ok(serde_json::json!({})),
            "tools/list" => to_value(ToolsListResult {
                tools: self.tools.definitions(),
            }),
            "tools/call" => self.call_tool(params).await,
            other => Err(JsonRpcError::method_not_found(other)),
        }
    }

    async fn call_tool(&self, params: Option<Value>) -> Result<Value, JsonRpcError> {
        let params: ToolsCallParams = serde_json::from_value(params.unwrap_or(Value::Null))
            .map_err(JsonRpcError::invalid_params)?;

        let Some(tool) = self.tools.get(&params.name) else {
            return Err(JsonRpcError::invalid_params(format!(
                "unknown tool '{}'",
                params.name
            )));
        };

        info!(tool = %params.name, "tool call");
        let result = match tool.call(params.arguments).await {
            Ok(payload) => {
                let is_error = payload.get("success") == Some(&Value::Bool(false));
                ToolsCallResult {
                    content: vec![ToolContent::Text {
                        text: serde_json::to_string_pretty(&payload)
                            .map_err(|e| JsonRpcError::new(JsonRpcError::INTERNAL_ERROR, e.to_string()))?,
                    }],
                    structured_content: Some(payload),
                    is_error,
                }
            },
            Err(e) => {
                warn!(tool = %params.name, error = %e, "tool call failed");
                ToolsCallResult {
                    content: vec![ToolContent::Text {
                        text: e.to_string(),
                    }],
                    structured_content: None,
                    is_error: true,
                }
            },
        };
        to_value(result)
    }
}

fn to_value(value: impl serde::Serialize) -> Result<Value, JsonRpcError> {
    serde_json::to_value(value)
        .map_err(|e| JsonRpcError::new(JsonRpcError::INTERNAL_ERROR, e.to_string()))
}

/// Check the JSON-RPC 2.0 envelope. On failure returns the id to answer
/// with (null when it cannot be recovered) and the error.
fn validate_envelope(value: Value) -> Result<JsonRpcRequest, (Value, JsonRpcError)> {
    let object = match &value {
        Value::Object(object) => object,
        Value::Array(_) => {
            return Err((
                Value::Null,
                JsonRpcError::invalid_request("batch requests are not supported"),
            ));
        },
        _ => {
            return Err((
                Value::Null,
                JsonRpcError::invalid_request("request must be a JSON object"),
            ));
        },
    };

    let id = match object.get("id") {
        Some(id @ (Value::String(_) | Value::Number(_) | Value::Null)) => id.clone(),
        Some(_) => {
            return Err((
                Value::Null,
                JsonRpcError::invalid_request("id must be a string, number or null"),
            ));
        },
        None => Value::Null,
    };

    if object.get("jsonrpc").and_then(Value::as_str) != Some("2.0") {
        return Err((id, JsonRpcError::invalid_request("jsonrpc must be \"2.0\"")));
    }
    if !object.get("method").is_some_and(Value::is_string) {
        return Err((id, JsonRpcError::invalid_request("method must be a string")));
    }

    serde_json::from_value(value).map_err(|e| (id, JsonRpcError::invalid_request(e)))
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, crate::tool::McpTool, async_trait::async_trait, serde_json::json};

    struct Echo;

    #[async_trait]
    impl McpTool for Echo {
        fn name(&self) -> &str {
            "echo"
        }

        fn description(&self) -> &str {
            "Echo the arguments back"
        }

        fn parameters_schema(&self) -> Value {
            json!({"type": "object", "properties": {"fail": {"type": "boolean"}}})
        }

        async fn call(&self, arguments: Value) -> anyhow::Result<Value> {
            if arguments.get("explode").is_some() {
                anyhow::bail!("tool exploded");
            }
            let ok = arguments.get("fail") != Some(&Value::Bool(true));
            Ok(json!({"success": ok, "arguments": arguments}))
        }
    }

    fn server() -> McpServer {
        let mut tools = ToolRegistry::new();
        tools.register(Box::new(Echo));
        McpServer::new("calbridge", "0.1.0", tools).with_instructions("use the tools")
    }

    async fn call(body: Value) -> Value {
        let resp = server().handle_value(body).await.unwrap();
        serde_json::to_value(resp).unwrap()
    }

    #[tokio::test]
    async fn initialize_reports_protocol_and_tools_capability() {
        let resp = call(json!({"jsonrpc": "2.0", "id": 1, "method": "initialize", "params": {}})).await;
        assert_eq!(resp["id"], 1);
        assert_eq!(resp["result"]["protocolVersion"], PROTOCOL_VERSION);
        assert_eq!(resp["result"]["serverInfo"]["name"], "calbridge");
        assert_eq!(resp["result"]["capabilities"]["tools"]["listChanged"], false);
        assert_eq!(resp["result"]["instructions"], "use the tools");
    }

    #[tokio::test]
    async fn notifications_get_no_response() {
        let resp = server()
            .handle_value(json!({"jsonrpc": "2.0", "method": "notifications/initialized"}))
            .await;
        assert!(resp.is_none());
    }

    #[tokio::test]
    async fn ping_returns_empty_object() {
        let resp = call(json!({"jsonrpc": "2.0", "id": "a", "method": "ping"})).await;
        assert_eq!(resp["id"], "a");
        assert_eq!(resp["result"], json!({}));
    }

    #[tokio::test]
    async fn tools_list_includes_schema() {
        let resp = call(json!({"jsonrpc": "2.0", "id": 2, "method": "tools/list"})).await;
        let tools = resp["result"]["tools"].as_array().unwrap();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0]["name"], "echo");
        assert_eq!(tools[0]["inputSchema"]["type"], "object");
    }

    #[tokio::test]
    async fn tools_call_wraps_payload() {
        let resp = call(json!({
            "jsonrpc": "2.0", "id": 3, "method": "tools/call",
            "params": {"name": "echo", "arguments": {"x": 1}}
        }))
        .await;
        let result = &resp["result"];
        assert_eq!(result["isError"], false);
        assert_eq!(result["structuredContent"]["arguments"]["x"], 1);
        let text = result["content"][0]["text"].as_str().unwrap();
        let parsed: Value = serde_json::from_str(text).unwrap();
        assert_eq!(parsed["success"], true);
    }

    #[tokio::test]
    async fn failed_payload_sets_is_error() {
        let resp = call(json!({
            "jsonrpc": "2.0", "id": 4, "method": "tools/call",
            "params": {"name": "echo", "arguments": {"fail": true}}
        }))
        .await;
        assert_eq!(resp["result"]["isError"], true);
        assert_eq!(resp["result"]["structuredContent"]["success"], false);
    }

    #[tokio::test]
    async fn tool_error_becomes_error_result() {
        let resp = call(json!({
            "jsonrpc": "2.0", "id": 5, "method": "tools/call",
            "params": {"name": "echo", "arguments": {"explode": true}}
        }))
        .await;
        assert_eq!(resp["result"]["isError"], true);
        assert_eq!(resp["result"]["content"][0]["text"], "tool exploded");
    }

    #[tokio::test]
    async fn unknown_tool_is_invalid_params() {
        let resp = call(json!({
            "jsonrpc": "2.0", "id": 6, "method": "tools/call",
            "params": {"name": "nope"}
        }))
        .await;
        assert_eq!(resp["error"]["code"], JsonRpcError::INVALID_PARAMS);
    }

    #[tokio::test]
    async fn unknown_method_is_method_not_found() {
        let resp = call(json!({"jsonrpc": "2.0", "id": 7, "method": "resources/list"})).await;
        assert_eq!(resp["error"]["code"], JsonRpcError::METHOD_NOT_FOUND);
        assert_eq!(resp["id"], 7);
    }

    #[tokio::test]
    async fn envelope_errors_are_invalid_request() {
        for body in [
            json!([{"jsonrpc": "2.0", "id": 1, "method": "ping"}]),
            json!("ping"),
            json!({"jsonrpc": "1.0", "id": 1, "method": "ping"}),
            json!({"jsonrpc": "2.0", "id": 1}),
            json!({"jsonrpc": "2.0", "id": {"nested": true}, "method": "ping"}),
        ] {
            let resp = call(body).await;
            assert_eq!(resp["error"]["code"], JsonRpcError::INVALID_REQUEST);
        }
    }

    #[tokio::test]
    async fn malformed_json_is_parse_error() {
        let resp = server().handle_str("{not json").await.unwrap();
        assert_eq!(resp.error.unwrap().code, JsonRpcError::PARSE_ERROR);
        assert_eq!(resp.id, Value::Null);
    }
}
