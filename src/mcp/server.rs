/// MCP server: synchronous line-delimited JSON-RPC loop

use serde_json::{Value, json};
use std::io::{self, BufRead, Write};

use super::protocol::{
    CallToolParams, DEFAULT_PROTOCOL_VERSION, InitializeParams, InitializeResult, JSONRPC_VERSION,
    JsonRpcError, JsonRpcRequest, JsonRpcResponse, ListToolsResult, ServerCapabilities, ServerInfo,
    ToolsCapability,
};
use crate::logging::{self, DataSource};
use crate::tools::ToolRegistry;

pub const SERVER_NAME: &str = "weather-data-mcp-server";

pub struct McpServer {
    registry: ToolRegistry,
    info: ServerInfo,
}

impl McpServer {
    pub fn new(registry: ToolRegistry) -> Self {
        Self {
            registry,
            info: ServerInfo {
                name: SERVER_NAME.to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
        }
    }

    /// Reads requests until EOF, writing one response line per request.
    ///
    /// Blank lines are skipped. Only I/O errors end the loop early.
    pub fn serve<R: BufRead, W: Write>(&self, input: R, mut output: W) -> io::Result<()> {
        logging::info(
            DataSource::Mcp,
            None,
            &format!("{} ready with {} tools", self.info.name, self.registry.len()),
        );
        if self.registry.is_empty() {
            logging::warn(DataSource::Mcp, None, "no tools registered; tools/list will be empty");
        }
        for line in input.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            if let Some(response) = self.handle_line(&line) {
                let encoded = serde_json::to_string(&response).map_err(io::Error::other)?;
                writeln!(output, "{}", encoded)?;
                output.flush()?;
            }
        }
        logging::info(DataSource::Mcp, None, "client disconnected");
        Ok(())
    }

    /// Handles one raw line. `None` for notifications.
    pub fn handle_line(&self, line: &str) -> Option<JsonRpcResponse> {
        let raw: Value = match serde_json::from_str(line) {
            Ok(raw) => raw,
            Err(e) => {
                logging::warn(DataSource::Mcp, None, &format!("unparseable message: {}", e));
                return Some(JsonRpcResponse::error(Value::Null, JsonRpcError::parse_error(e)));
            }
        };
        let id = raw.get("id").cloned().unwrap_or(Value::Null);
        let request: JsonRpcRequest = match serde_json::from_value(raw) {
            Ok(request) => request,
            Err(e) => return Some(JsonRpcResponse::error(id, JsonRpcError::invalid_request(e))),
        };
        if request.jsonrpc != JSONRPC_VERSION {
            return Some(JsonRpcResponse::error(
                id,
                JsonRpcError::invalid_request(format!("unsupported jsonrpc version '{}'", request.jsonrpc)),
            ));
        }
        self.handle_request(request)
    }

    pub fn handle_request(&self, request: JsonRpcRequest) -> Option<JsonRpcResponse> {
        if request.is_notification() {
            logging::debug(DataSource::Mcp, None, &format!("notification {}", request.method));
            return None;
        }
        let id = request.id.clone().unwrap_or(Value::Null);

        let outcome = match request.method.as_str() {
            "initialize" => self.initialize(request.params),
            "ping" => Ok(json!({})),
            "tools/list" => self.list_tools(),
            "tools/call" => self.call_tool(request.params),
            other => Err(JsonRpcError::method_not_found(other)),
        };

        Some(match outcome {
            Ok(result) => JsonRpcResponse::success(id, result),
            Err(error) => JsonRpcResponse::error(id, error),
        })
    }

    fn initialize(&self, params: Option<Value>) -> Result<Value, JsonRpcError> {
        let params: InitializeParams = match params {
            Some(value) => serde_json::from_value(value)
                .map_err(|e| JsonRpcError::invalid_params(format!("invalid initialize params: {}", e)))?,
            None => InitializeParams::default(),
        };
        if let Some(client) = &params.client_info {
            logging::info(
                DataSource::Mcp,
                None,
                &format!("initialize from {} {}", client.name, client.version),
            );
        }
        let result = InitializeResult {
            protocol_version: params
                .protocol_version
                .unwrap_or_else(|| DEFAULT_PROTOCOL_VERSION.to_string()),
            capabilities: ServerCapabilities {
                tools: ToolsCapability { list_changed: false },
                experimental: json!({}),
            },
            server_info: self.info.clone(),
        };
        serde_json::to_value(result).map_err(|e| JsonRpcError::internal_error(e.to_string()))
    }

    fn list_tools(&self) -> Result<Value, JsonRpcError> {
        let result = ListToolsResult { tools: self.registry.list_schemas() };
        serde_json::to_value(result).map_err(|e| JsonRpcError::internal_error(e.to_string()))
    }

    fn call_tool(&self, params: Option<Value>) -> Result<Value, JsonRpcError> {
        let params = params.ok_or_else(|| JsonRpcError::invalid_params("tools/call requires params"))?;
        let params: CallToolParams = serde_json::from_value(params)
            .map_err(|e| JsonRpcError::invalid_params(format!("invalid tools/call params: {}", e)))?;
        let result = self.registry.call(&params.name, params.arguments);
        serde_json::to_value(result).map_err(|e| JsonRpcError::internal_error(e.to_string()))
    }
}
