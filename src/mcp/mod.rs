//! MCP tool server
//!
//! Speaks JSON-RPC 2.0 over the `mcp` control-message envelope, exposing
//! local capabilities to the remote model: `initialize`, cursor-paginated
//! `tools/list`, and `tools/call`. Replies are returned to the caller for
//! sending; this module never touches the transport itself.

mod tools;

use serde_json::{json, Value};

pub use tools::{McpTool, Property, PropertyList, PropertyType, ToolHandler};

use crate::{Error, Result};

/// MCP protocol revision implemented here.
const PROTOCOL_VERSION: &str = "2024-11-05";

/// Ceiling on the serialized size of one `tools/list` page.
const MAX_PAYLOAD_SIZE: usize = 8000;

/// JSON-RPC error codes.
const METHOD_NOT_FOUND: i64 = -32601;
const INVALID_PARAMS: i64 = -32602;
const INTERNAL_ERROR: i64 = -32603;

/// Local tool server for the MCP envelope.
#[derive(Default)]
pub struct McpServer {
    tools: Vec<McpTool>,
}

impl McpServer {
    /// Empty server.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool.
    pub fn add_tool(&mut self, tool: McpTool) {
        tracing::debug!(name = %tool.name, "registered mcp tool");
        self.tools.push(tool);
    }

    /// Number of registered tools.
    #[must_use]
    pub fn tool_count(&self) -> usize {
        self.tools.len()
    }

    /// Handle one JSON-RPC message from the `mcp` envelope.
    ///
    /// Returns the reply payload to send back, or `None` for notifications
    /// and malformed requests that cannot be answered.
    #[must_use]
    pub fn handle_message(&self, payload: &Value) -> Option<Value> {
        if payload.get("jsonrpc").and_then(|v| v.as_str()) != Some("2.0") {
            tracing::warn!("mcp message with invalid jsonrpc version");
            return None;
        }

        let method = payload.get("method").and_then(|m| m.as_str())?;

        if method.starts_with("notifications") {
            tracing::debug!(method, "ignoring mcp notification");
            return None;
        }

        let Some(id) = payload.get("id").cloned().filter(|id| !id.is_null()) else {
            tracing::warn!(method, "mcp request missing id");
            return None;
        };
        let params = payload.get("params").cloned().unwrap_or_else(|| json!({}));

        let reply = match method {
            "initialize" => Ok(self.handle_initialize()),
            "tools/list" => Ok(self.handle_tools_list(&params)),
            "tools/call" => self.handle_tool_call(&params),
            other => Err(Error::Mcp(format!("method not implemented: {other}"))),
        };

        Some(match reply {
            Ok(result) => json!({ "jsonrpc": "2.0", "id": id, "result": result }),
            Err(e) => {
                let code = match &e {
                    Error::Mcp(msg) if msg.starts_with("method not implemented") => {
                        METHOD_NOT_FOUND
                    }
                    Error::Mcp(msg) if msg.starts_with("unknown tool") => INVALID_PARAMS,
                    _ => INTERNAL_ERROR,
                };
                json!({
                    "jsonrpc": "2.0",
                    "id": id,
                    "error": { "code": code, "message": e.to_string() },
                })
            }
        })
    }

    fn handle_initialize(&self) -> Value {
        json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": { "tools": {} },
            "serverInfo": {
                "name": env!("CARGO_PKG_NAME"),
                "version": env!("CARGO_PKG_VERSION"),
            },
        })
    }

    /// List tools from `cursor` onward, stopping before the page would
    /// exceed [`MAX_PAYLOAD_SIZE`] serialized bytes.
    fn handle_tools_list(&self, params: &Value) -> Value {
        let cursor = params
            .get("cursor")
            .and_then(|c| c.as_str())
            .unwrap_or_default();

        let mut tools_json = Vec::new();
        let mut total_size = 0;
        let mut found_cursor = cursor.is_empty();
        let mut next_cursor = String::new();

        for tool in &self.tools {
            if !found_cursor {
                if tool.name == cursor {
                    found_cursor = true;
                } else {
                    continue;
                }
            }

            let tool_json = tool.to_json();
            let tool_size = tool_json.to_string().len();

            if total_size + tool_size + 100 > MAX_PAYLOAD_SIZE {
                next_cursor = tool.name.clone();
                break;
            }

            tools_json.push(tool_json);
            total_size += tool_size;
        }

        let mut result = json!({ "tools": tools_json });
        if !next_cursor.is_empty() {
            result["nextCursor"] = json!(next_cursor);
        }
        result
    }

    fn handle_tool_call(&self, params: &Value) -> Result<Value> {
        let name = params
            .get("name")
            .and_then(|n| n.as_str())
            .ok_or_else(|| Error::Mcp("missing tool name".to_string()))?;

        let tool = self
            .tools
            .iter()
            .find(|t| t.name == name)
            .ok_or_else(|| Error::Mcp(format!("unknown tool: {name}")))?;

        let arguments = params.get("arguments").cloned().unwrap_or_else(|| json!({}));

        tracing::debug!(tool = name, "invoking mcp tool");
        tool.call(&arguments)
    }
}
