//! Tool registry for managing available tools
//!
//! The registry is filled once at startup and then shared as an
//! `Arc<ToolRegistry>`. After that point nothing mutates it, so lookups need
//! no locking.

use crate::error::RegistryError;
use crate::llm::{FunctionDefinition, ToolDefinition};
use crate::tools::Tool;
use std::collections::HashMap;
use std::sync::Arc;

/// Registry mapping tool names to implementations
#[derive(Default, Clone)]
pub struct ToolRegistry {
    // Registration order, used for schema export
    tools: Vec<Arc<dyn Tool>>,
    by_name: HashMap<String, usize>,
}

impl ToolRegistry {
    /// Create a new, empty tool registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool; names must be unique
    pub fn register(&mut self, tool: Arc<dyn Tool>) -> Result<(), RegistryError> {
        let name = tool.name().to_string();
        if self.by_name.contains_key(&name) {
            return Err(RegistryError::DuplicateTool { name });
        }

        tracing::debug!(tool = %name, "Registered tool");
        self.by_name.insert(name, self.tools.len());
        self.tools.push(tool);
        Ok(())
    }

    /// Register a tool, builder style
    pub fn with_tool(mut self, tool: Arc<dyn Tool>) -> Result<Self, RegistryError> {
        self.register(tool)?;
        Ok(self)
    }

    /// Get a tool by name
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.by_name
            .get(name)
            .map(|&index| Arc::clone(&self.tools[index]))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    /// List all tool names in registration order
    pub fn list_tools(&self) -> Vec<&str> {
        self.tools.iter().map(|tool| tool.name()).collect()
    }

    /// Get tool information
    pub fn get_tool_info(&self, name: &str) -> Option<(&str, &str)> {
        self.by_name.get(name).map(|&index| {
            let tool = &self.tools[index];
            (tool.name(), tool.description())
        })
    }

    /// Tool definitions for LLM function calling, in registration order
    pub fn list_schemas(&self) -> Vec<ToolDefinition> {
        self.tools
            .iter()
            .map(|tool| ToolDefinition {
                tool_type: "function".to_string(),
                function: FunctionDefinition {
                    name: tool.name().to_string(),
                    description: tool.description().to_string(),
                    parameters: tool.parameters_schema(),
                },
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Finish startup registration
    pub fn freeze(self) -> Arc<Self> {
        Arc::new(self)
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.list_tools())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ToolError;
    use crate::tools::ToolOutput;
    use async_trait::async_trait;
    use serde_json::json;
    use tokio_util::sync::CancellationToken;

    struct NamedTool(&'static str);

    #[async_trait]
    impl Tool for NamedTool {
        fn name(&self) -> &str {
            self.0
        }

        fn description(&self) -> &str {
            "test tool"
        }

        fn parameters_schema(&self) -> serde_json::Value {
            json!({"type": "object", "properties": {}})
        }

        async fn invoke(
            &self,
            _args: serde_json::Value,
            _cancel: CancellationToken,
        ) -> Result<ToolOutput, ToolError> {
            Ok(ToolOutput::text(self.0))
        }
    }

    #[test]
    fn test_duplicate_registration_fails() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(NamedTool("web_search"))).unwrap();

        let err = registry
            .register(Arc::new(NamedTool("web_search")))
            .unwrap_err();
        assert_eq!(
            err,
            RegistryError::DuplicateTool {
                name: "web_search".to_string()
            }
        );
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_get_unknown_tool_is_none() {
        let registry = ToolRegistry::new()
            .with_tool(Arc::new(NamedTool("web_search")))
            .unwrap();
        assert!(registry.get("web_search").is_some());
        assert!(registry.get("unknown_tool").is_none());
    }

    #[test]
    fn test_schemas_follow_registration_order() {
        let registry = ToolRegistry::new()
            .with_tool(Arc::new(NamedTool("zeta")))
            .and_then(|r| r.with_tool(Arc::new(NamedTool("alpha"))))
            .and_then(|r| r.with_tool(Arc::new(NamedTool("mid"))))
            .unwrap();

        let names: Vec<String> = registry
            .list_schemas()
            .into_iter()
            .map(|schema| schema.function.name)
            .collect();
        assert_eq!(names, vec!["zeta", "alpha", "mid"]);
        assert_eq!(registry.list_tools(), vec!["zeta", "alpha", "mid"]);
    }

    #[test]
    fn test_tool_info() {
        let registry = ToolRegistry::new()
            .with_tool(Arc::new(NamedTool("web_search")))
            .unwrap()
            .freeze();
        let (name, description) = registry.get_tool_info("web_search").unwrap();
        assert_eq!(name, "web_search");
        assert_eq!(description, "test tool");
        assert!(registry.get_tool_info("nope").is_none());
    }
}
