use keyscout::{ErrorKind, SearchEngine, SearchOutcome, SearchRequest};
use serde_json::{json, Value};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// Failure of a single tool call.
///
/// Messages of every variant except `Internal` are returned to the caller
/// as-is, so they must never carry paths, patterns or other caller data the
/// guards refused.
#[derive(Error, Debug)]
pub enum ToolError {
    #[error("Unknown tool: {0}")]
    UnknownTool(String),
    #[error("{0}")]
    InvalidArguments(String),
    #[error("{message}")]
    Rejected { kind: &'static str, message: String },
    #[error("{0}")]
    Internal(String),
}

/// A tool reachable through `call_tool`
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    /// JSON Schema of the `arguments` object
    fn input_schema(&self) -> Value;
    fn call(&self, arguments: Value) -> Result<Value, ToolError>;
}

/// Registered tools, listed in registration order
#[derive(Default)]
pub struct ToolRegistry {
    tools: Vec<Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a tool, replacing any tool already registered under its name
    pub fn register(&mut self, tool: impl Tool + 'static) {
        self.tools.retain(|t| t.name() != tool.name());
        self.tools.push(Box::new(tool));
    }

    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.tools
            .iter()
            .find(|t| t.name() == name)
            .map(Box::as_ref)
    }

    /// Tool descriptions for `list_tools`
    pub fn definitions(&self) -> Vec<Value> {
        self.tools
            .iter()
            .map(|t| {
                json!({
                    "name": t.name(),
                    "description": t.description(),
                    "inputSchema": t.input_schema(),
                })
            })
            .collect()
    }

    pub fn call(&self, name: &str, arguments: Value) -> Result<Value, ToolError> {
        let tool = self
            .get(name)
            .ok_or_else(|| ToolError::UnknownTool(name.to_string()))?;
        debug!("Calling tool {}", name);
        tool.call(arguments)
    }
}

/// Wraps text in the `content` envelope every tool result uses
pub fn text_content(text: String) -> Value {
    json!({ "content": [{ "type": "text", "text": text }] })
}

/// Keyword search over allowed directories
pub struct KeywordSearchTool {
    engine: Arc<SearchEngine>,
}

impl KeywordSearchTool {
    pub fn new(engine: Arc<SearchEngine>) -> Self {
        Self { engine }
    }
}

impl Tool for KeywordSearchTool {
    fn name(&self) -> &str {
        "keyword_search"
    }

    fn description(&self) -> &str {
        "Count occurrences of a keyword or regular expression in text files under one or more allowed directories"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "keyword": {
                    "type": "string",
                    "description": "Keyword to count, or a regular expression when use_regex is true"
                },
                "root_paths": {
                    "type": "array",
                    "items": { "type": "string" },
                    "minItems": 1,
                    "description": "Directories to search"
                },
                "case_insensitive": { "type": "boolean", "default": false },
                "use_regex": { "type": "boolean", "default": false },
                "include_patterns": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "Only search files matching one of these globs"
                },
                "exclude_patterns": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "Skip files and directories matching any of these globs"
                }
            },
            "required": ["keyword", "root_paths"],
            "additionalProperties": false
        })
    }

    fn call(&self, arguments: Value) -> Result<Value, ToolError> {
        let request: SearchRequest = serde_json::from_value(arguments)
            .map_err(|e| ToolError::InvalidArguments(format!("Invalid arguments: {}", e)))?;

        match self.engine.run(&request) {
            SearchOutcome::Completed(report) => {
                let text = serde_json::to_string(&report)
                    .map_err(|e| ToolError::Internal(format!("failed to encode report: {}", e)))?;
                Ok(text_content(text))
            }
            SearchOutcome::Rejected(e) => {
                let kind = match e.kind() {
                    ErrorKind::InvalidRequest => "invalid_request",
                    _ => "rejected",
                };
                Err(ToolError::Rejected {
                    kind,
                    message: e.to_string(),
                })
            }
            SearchOutcome::Aborted(e) => Err(ToolError::Rejected {
                kind: "aborted",
                message: e.to_string(),
            }),
            SearchOutcome::Failed(e) => Err(ToolError::Internal(e.to_string())),
        }
    }
}
