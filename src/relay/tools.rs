//! Tool registry surface used by the function-call processor (spec §4.5).
//!
//! Grounded on the teacher's `agent/tools.rs` `Tool{name, description,
//! parameters}` JSON-schema shape; generalized behind a trait so a caller
//! can plug in any tool set instead of the teacher's desktop/shell/browser
//! tools, which are out of scope for this bridge.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// An OpenAI Realtime `tools[]` entry, minus the `"type": "function"`
/// wrapper the session-update builder adds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

#[async_trait]
pub trait ToolRegistry: Send + Sync {
    fn definitions(&self) -> Vec<ToolDefinition>;

    fn has_tool(&self, name: &str) -> bool {
        self.definitions().iter().any(|t| t.name == name)
    }

    async fn call(&self, name: &str, arguments: Value) -> anyhow::Result<Value>;
}

/// A minimal demonstration registry for local/dev use: a read-only
/// directory listing and a fixed-string echo, adapted from the shape of
/// the teacher's filesystem tool without its sandbox/approval machinery
/// (out of scope for this bridge's function-call processor).
pub struct BridgeToolRegistry {
    tools: Vec<ToolDefinition>,
}

impl Default for BridgeToolRegistry {
    fn default() -> Self {
        Self {
            tools: vec![
                ToolDefinition {
                    name: "list_directory".to_string(),
                    description: "List the files in a directory on the server host".to_string(),
                    parameters: serde_json::json!({
                        "type": "object",
                        "properties": {
                            "path": { "type": "string", "description": "Directory to list" }
                        },
                        "required": ["path"]
                    }),
                },
                ToolDefinition {
                    name: "echo".to_string(),
                    description: "Echo a message back, useful for testing tool wiring".to_string(),
                    parameters: serde_json::json!({
                        "type": "object",
                        "properties": {
                            "message": { "type": "string" }
                        },
                        "required": ["message"]
                    }),
                },
            ],
        }
    }
}

#[async_trait]
impl ToolRegistry for BridgeToolRegistry {
    fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.clone()
    }

    async fn call(&self, name: &str, arguments: Value) -> anyhow::Result<Value> {
        match name {
            "list_directory" => {
                let path = arguments
                    .get("path")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| anyhow::anyhow!("missing 'path' argument"))?;
                let mut entries = Vec::new();
                let mut read_dir = tokio::fs::read_dir(path).await?;
                while let Some(entry) = read_dir.next_entry().await? {
                    entries.push(entry.file_name().to_string_lossy().to_string());
                }
                Ok(serde_json::json!({ "entries": entries }))
            }
            "echo" => {
                let message = arguments
                    .get("message")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default();
                Ok(serde_json::json!({ "echo": message }))
            }
            other => Err(anyhow::anyhow!("unknown tool: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_registry_advertises_both_demo_tools() {
        let registry = BridgeToolRegistry::default();
        assert!(registry.has_tool("list_directory"));
        assert!(registry.has_tool("echo"));
        assert!(!registry.has_tool("delete_everything"));
    }

    #[tokio::test]
    async fn echo_tool_returns_the_message() {
        let registry = BridgeToolRegistry::default();
        let result = registry
            .call("echo", serde_json::json!({"message": "hi"}))
            .await
            .unwrap();
        assert_eq!(result["echo"], "hi");
    }

    #[tokio::test]
    async fn unknown_tool_errors() {
        let registry = BridgeToolRegistry::default();
        assert!(registry.call("nonexistent", serde_json::json!({})).await.is_err());
    }
}
