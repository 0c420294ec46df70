/// Tool registry and JSON Schema helpers

pub mod weather;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::sync::Arc;

use crate::logging::{self, DataSource};
use crate::mcp::protocol::{CallToolResult, ToolSchema};
use crate::model::{ToolStatus, WeatherError, WeatherResult};

pub use weather::register_weather_tools;

/// A callable tool. `execute` returns the report as JSON; errors are shaped
/// into an error payload by the registry.
pub trait Tool: Send + Sync {
    fn schema(&self) -> ToolSchema;

    fn execute(&self, arguments: Value) -> WeatherResult<Value>;
}

/// Tools in registration order, which is also `tools/list` order.
#[derive(Default)]
pub struct ToolRegistry {
    tools: Vec<(String, Arc<dyn Tool>)>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a tool, replacing any earlier tool with the same name.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.schema().name;
        match self.tools.iter_mut().find(|(existing, _)| *existing == name) {
            Some(slot) => slot.1 = tool,
            None => self.tools.push((name, tool)),
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.iter().find(|(n, _)| n == name).map(|(_, t)| Arc::clone(t))
    }

    pub fn names(&self) -> Vec<String> {
        self.tools.iter().map(|(n, _)| n.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn list_schemas(&self) -> Vec<ToolSchema> {
        self.tools.iter().map(|(_, t)| t.schema()).collect()
    }

    /// Runs a tool and renders the outcome as MCP text content.
    ///
    /// Unknown names and tool errors come back as `isError` content rather
    /// than JSON-RPC errors, so the calling agent can read and react to them.
    pub fn call(&self, name: &str, arguments: Value) -> CallToolResult {
        let Some(tool) = self.get(name) else {
            logging::warn(DataSource::Mcp, None, &format!("tool '{}' not found", name));
            let payload = json!({
                "error": format!("Tool '{}' not found", name),
                "available_tools": self.names(),
            });
            return CallToolResult::json(&payload, true);
        };

        let arguments = if arguments.is_null() { json!({}) } else { arguments };
        let station = arguments.get("station_id").and_then(Value::as_str).map(str::to_string);
        logging::info(DataSource::Mcp, station.as_deref(), &format!("calling tool '{}'", name));

        match tool.execute(arguments.clone()) {
            Ok(report) => CallToolResult::json(&report, false),
            Err(WeatherError::NotImplemented { feature, next_steps }) => {
                let payload = json!({
                    "status": ToolStatus::PartialImplementation,
                    "message": format!("{} requires additional setup", feature),
                    "parameters": arguments,
                    "next_steps": next_steps,
                });
                CallToolResult::json(&payload, true)
            }
            Err(err) => {
                logging::log_failure(DataSource::Mcp, station.as_deref(), name, &err);
                let payload = json!({
                    "error": format!("Failed to execute tool '{}'", name),
                    "error_type": err.kind(),
                    "error_message": err.to_string(),
                    "tool_name": name,
                    "arguments": arguments,
                });
                CallToolResult::json(&payload, true)
            }
        }
    }
}

/// Decodes tool arguments into a typed request.
pub fn parse_arguments<T: DeserializeOwned>(tool: &str, arguments: Value) -> WeatherResult<T> {
    serde_json::from_value(arguments)
        .map_err(|e| WeatherError::InvalidArgument(format!("invalid arguments for {}: {}", tool, e)))
}

pub fn to_json<T: Serialize>(report: &T) -> WeatherResult<Value> {
    serde_json::to_value(report)
        .map_err(|e| WeatherError::MalformedResponse(format!("cannot encode report: {}", e)))
}

// Helper functions for creating tool schemas

pub fn json_schema_object(properties: Value, required: Vec<&str>) -> Value {
    json!({
        "type": "object",
        "properties": properties,
        "required": required
    })
}

pub fn json_schema_string(description: &str) -> Value {
    json!({
        "type": "string",
        "description": description
    })
}

pub fn json_schema_number(description: &str) -> Value {
    json!({
        "type": "number",
        "description": description
    })
}

pub fn json_schema_integer(description: &str, default: Option<i64>) -> Value {
    let mut schema = json!({
        "type": "integer",
        "description": description
    });
    if let Some(default) = default {
        schema["default"] = json!(default);
    }
    schema
}

pub fn json_schema_array(items: Value, description: &str) -> Value {
    json!({
        "type": "array",
        "items": items,
        "description": description
    })
}

pub fn json_schema_enum(values: &[&str], default: &str, description: &str) -> Value {
    json!({
        "type": "string",
        "enum": values,
        "default": default,
        "description": description
    })
}
