//! Tool handler trait and the ordered tool table.
//!
//! Provides a `ToolHandler` trait for implementing tools and a `ToolTable`
//! mapping tool names to handlers in composition order.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use futures::future::BoxFuture;
use rmcp::model::{CallToolResult, JsonObject, Tool as McpTool};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use super::ToolArea;
use crate::backend::Backend;
use crate::error::ComposeError;
use crate::identity::ServerIdentity;

/// Context passed to tool handlers during execution.
///
/// Everything a handler needs is captured once at dispatch time; a reload
/// that lands mid-call does not change what the handler sees.
#[derive(Clone)]
pub struct ToolContext {
    /// The acting cluster client (session-scoped, call-scoped or default).
    pub client: Arc<dyn Backend>,
    /// Identity snapshot the call was dispatched under.
    pub identity: Arc<ServerIdentity>,
    /// Namespace hint from the credential scope, if any.
    pub namespace: Option<String>,
    pub session_id: Option<String>,
    /// Fires when the caller goes away.
    pub cancel: CancellationToken,
}

/// Trait for handling MCP tool invocations.
///
/// Each tool implements this trait to define its schema and execution logic.
pub trait ToolHandler: Send + Sync {
    /// Returns the tool's name (e.g., "k8s_get_resources").
    fn name(&self) -> &str;

    /// Returns the tool's human-readable title.
    fn title(&self) -> Option<&str> {
        None
    }

    /// Returns the tool's description.
    fn description(&self) -> &str;

    /// Returns the input schema for this tool.
    fn input_schema(&self) -> JsonObject;

    /// Returns the output schema for this tool (optional).
    fn output_schema(&self) -> Option<JsonObject> {
        None
    }

    /// Whether the tool changes cluster state. Hidden in read-only mode.
    fn mutating(&self) -> bool {
        false
    }

    /// Whether the tool reads state local to the server host (such as the
    /// kubeconfig). Hidden from remote transports.
    fn local_only(&self) -> bool {
        false
    }

    /// Executes the tool with the given arguments.
    fn execute<'a>(
        &'a self,
        args: JsonObject,
        ctx: &'a ToolContext,
    ) -> BoxFuture<'a, Result<CallToolResult>>;

    /// Converts this handler to an `McpTool` for use in `list_tools`.
    fn to_mcp_tool(&self) -> McpTool {
        use std::borrow::Cow;

        McpTool {
            name: Cow::Owned(self.name().to_string()),
            title: self.title().map(|s| s.to_string()),
            description: Some(Cow::Owned(self.description().to_string())),
            input_schema: Arc::new(self.input_schema()),
            output_schema: self.output_schema().map(Arc::new),
            annotations: None,
            icons: None,
            meta: None,
        }
    }
}

/// Printable description of one table entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolSummary {
    pub name: String,
    pub area: String,
    pub title: Option<String>,
    pub mutating: bool,
    pub local_only: bool,
}

#[derive(Clone)]
struct ToolEntry {
    area: ToolArea,
    handler: Arc<dyn ToolHandler>,
}

/// Ordered mapping from tool name to handler.
///
/// Built once per identity (or per session override) and never mutated after
/// composition; a change means building a new table.
#[derive(Clone, Default)]
pub struct ToolTable {
    entries: Vec<ToolEntry>,
    index: HashMap<String, usize>,
}

impl std::fmt::Debug for ToolTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolTable").field("tools", &self.names()).finish()
    }
}

impl ToolTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a handler. A name that is already present is rejected.
    pub fn insert(&mut self, area: ToolArea, handler: Arc<dyn ToolHandler>) -> Result<(), ComposeError> {
        let name = handler.name().to_string();
        if let Some(&existing) = self.index.get(&name) {
            return Err(ComposeError::DuplicateTool {
                name,
                first: self.entries[existing].area,
                second: area,
            });
        }
        self.index.insert(name, self.entries.len());
        self.entries.push(ToolEntry { area, handler });
        Ok(())
    }

    /// Get a tool handler by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn ToolHandler>> {
        self.index.get(name).map(|&i| self.entries[i].handler.clone())
    }

    /// The functional area that contributed `name`.
    pub fn area_of(&self, name: &str) -> Option<ToolArea> {
        self.index.get(name).map(|&i| self.entries[i].area)
    }

    /// Check if a tool with the given name is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Tool names in composition order.
    pub fn names(&self) -> Vec<String> {
        self.entries
            .iter()
            .map(|e| e.handler.name().to_string())
            .collect()
    }

    /// All tools as `McpTool` instances for `list_tools`, in composition order.
    pub fn list_tools(&self) -> Vec<McpTool> {
        self.entries
            .iter()
            .map(|e| e.handler.to_mcp_tool())
            .collect()
    }

    pub fn summaries(&self) -> Vec<ToolSummary> {
        self.entries
            .iter()
            .map(|e| ToolSummary {
                name: e.handler.name().to_string(),
                area: e.area.to_string(),
                title: e.handler.title().map(str::to_string),
                mutating: e.handler.mutating(),
                local_only: e.handler.local_only(),
            })
            .collect()
    }

    /// Return the number of registered tools.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Return `true` if no tools are registered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedTool;

    #[test]
    fn test_insert_preserves_order() {
        let mut table = ToolTable::new();
        table.insert(ToolArea::Helm, ScriptedTool::ok("b")).unwrap();
        table.insert(ToolArea::Kubernetes, ScriptedTool::ok("a")).unwrap();
        table.insert(ToolArea::GitOps, ScriptedTool::ok("c")).unwrap();

        assert_eq!(table.names(), vec!["b", "a", "c"]);
        let listed: Vec<String> = table.list_tools().into_iter().map(|t| t.name.to_string()).collect();
        assert_eq!(listed, vec!["b", "a", "c"]);
        assert_eq!(table.area_of("a"), Some(ToolArea::Kubernetes));
    }

    #[test]
    fn test_insert_rejects_duplicates() {
        let mut table = ToolTable::new();
        table.insert(ToolArea::Kubernetes, ScriptedTool::ok("dup")).unwrap();
        let err = table.insert(ToolArea::ServiceMesh, ScriptedTool::ok("dup")).unwrap_err();

        match err {
            ComposeError::DuplicateTool { name, first, second } => {
                assert_eq!(name, "dup");
                assert_eq!(first, ToolArea::Kubernetes);
                assert_eq!(second, ToolArea::ServiceMesh);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_summaries_serialize_with_area() {
        let mut table = ToolTable::new();
        table.insert(ToolArea::Helm, ScriptedTool::ok("x")).unwrap();

        let summaries = table.summaries();
        assert_eq!(summaries[0].area, "helm");
        let value = serde_json::to_value(&summaries).unwrap();
        assert_eq!(value[0]["name"], "x");
        assert_eq!(value[0]["mutating"], false);
    }

    #[test]
    fn test_clone_and_debug_list_names() {
        let mut table = ToolTable::new();
        table.insert(ToolArea::Helm, ScriptedTool::ok("x")).unwrap();
        let copy = table.clone();

        assert_eq!(copy.names(), vec!["x"]);
        assert_eq!(format!("{copy:?}"), r#"ToolTable { tools: ["x"] }"#);
    }

    #[test]
    fn test_lookup() {
        let mut table = ToolTable::new();
        table.insert(ToolArea::Kubernetes, ScriptedTool::ok("x")).unwrap();
        assert!(table.contains("x"));
        assert!(table.get("x").is_some());
        assert!(table.get("y").is_none());
        assert!(!table.is_empty());
    }
}
