use {
    anyhow::Result,
    async_trait::async_trait,
    std::{collections::BTreeMap, sync::Arc},
};

use crate::types::McpToolDef;

/// A tool callable through `tools/call`.
///
/// Implementations report domain failures inside the returned payload
/// (`"success": false`). An `Err` is reserved for failures the tool could
/// not describe itself and is surfaced to the caller as an error result.
#[async_trait]
pub trait McpTool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn parameters_schema(&self) -> serde_json::Value;
    async fn call(&self, arguments: serde_json::Value) -> Result<serde_json::Value>;
}

/// Registry of the tools a server exposes, keyed by name.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn McpTool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a tool. A tool registered under an existing name replaces it.
    pub fn register(&mut self, tool: Box<dyn McpTool>) {
        let name = tool.name().to_string();
        self.tools.insert(name, Arc::from(tool));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn McpTool>> {
        self.tools.get(name).cloned()
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Tool definitions in the shape `tools/list` returns, sorted by name.
    pub fn definitions(&self) -> Vec<McpToolDef> {
        self.tools
            .values()
            .map(|t| McpToolDef {
                name: t.name().to_string(),
                description: Some(t.description().to_string()),
                input_schema: t.parameters_schema(),
            })
            .collect()
    }
}
