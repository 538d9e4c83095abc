use std::sync::Arc;

use serde_json::Value;
use tokio::sync::Mutex;

use k6_stat_core::{ClickhouseClient, Session};

use crate::protocol::{
    InitializeResult, JsonRpcRequest, JsonRpcResponse, ServerCapabilities, ServerInfo,
    ToolCallResult, ToolsCapability, INTERNAL_ERROR, INVALID_PARAMS, METHOD_NOT_FOUND,
};
use crate::tools::{self, ToolState};

pub const PROTOCOL_VERSION: &str = "2024-11-05";

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

pub struct McpServer {
    state: Arc<ToolState>,
}

impl McpServer {
    pub fn new(client: ClickhouseClient) -> Self {
        Self {
            state: Arc::new(ToolState {
                client,
                session: Mutex::new(Session::new()),
            }),
        }
    }

    /// Dispatch an incoming JSON-RPC request and return an optional response.
    ///
    /// Returns `None` for notifications (requests without an `id`).
    pub async fn handle_request(&self, req: JsonRpcRequest) -> Option<JsonRpcResponse> {
        let Some(id) = req.id else {
            tracing::debug!(method = %req.method, "notification received");
            return None;
        };

        let result = match req.method.as_str() {
            "initialize" => self.handle_initialize(req.params),
            "tools/list" => self.handle_tools_list(),
            "tools/call" => self.handle_tools_call(req.params).await,
            other => Err((METHOD_NOT_FOUND, format!("Method not found: {other}"))),
        };

        Some(match result {
            Ok(value) => JsonRpcResponse::success(id, value),
            Err((code, msg)) => JsonRpcResponse::error(id, code, msg),
        })
    }

    // -----------------------------------------------------------------------
    // Method handlers
    // -----------------------------------------------------------------------

    fn handle_initialize(&self, _params: Option<Value>) -> Result<Value, (i32, String)> {
        let result = InitializeResult {
            protocol_version: PROTOCOL_VERSION,
            capabilities: ServerCapabilities {
                tools: ToolsCapability {
                    list_changed: false,
                },
            },
            server_info: ServerInfo {
                name: "k6-stat-mcp",
                version: env!("CARGO_PKG_VERSION"),
            },
        };
        serde_json::to_value(result).map_err(|e| (INTERNAL_ERROR, e.to_string()))
    }

    fn handle_tools_list(&self) -> Result<Value, (i32, String)> {
        let tool_defs = tools::all_tool_definitions();
        Ok(serde_json::json!({ "tools": tool_defs }))
    }

    async fn handle_tools_call(&self, params: Option<Value>) -> Result<Value, (i32, String)> {
        let params =
            params.ok_or_else(|| (INVALID_PARAMS, "Missing params for tools/call".to_string()))?;

        let name = params
            .get("name")
            .and_then(|v| v.as_str())
            .ok_or_else(|| (INVALID_PARAMS, "Missing 'name' in tools/call params".to_string()))?
            .to_string();

        let arguments = params
            .get("arguments")
            .cloned()
            .unwrap_or(Value::Object(Default::default()));

        tracing::info!(tool = %name, "calling tool");

        let tool_result: ToolCallResult =
            tools::dispatch_tool(&name, arguments, &self.state).await;
        if tool_result.is_error() {
            tracing::warn!(tool = %name, "tool returned an error");
        }

        serde_json::to_value(tool_result).map_err(|e| (INTERNAL_ERROR, e.to_string()))
    }
}
