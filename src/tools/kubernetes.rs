//! Cluster resource tools.

use std::sync::Arc;

use anyhow::Result;
use futures::future::BoxFuture;
use rmcp::model::{CallToolResult, JsonObject};
use serde_json::json;

use super::common::{error_result, json_result, namespace_arg, object_schema, required_str, str_arg, summarize};
use super::{ToolContext, ToolHandler};
use crate::backend::ResourceRef;

pub fn tools() -> Vec<Arc<dyn ToolHandler>> {
    vec![
        Arc::new(GetResourcesHandler),
        Arc::new(GetResourceHandler),
        Arc::new(DeleteResourceHandler),
        Arc::new(ListContextsHandler),
    ]
}

fn resource_type_property() -> serde_json::Value {
    json!({
        "type": "string",
        "description": "Resource type: kind, plural or short name (e.g. 'pods', 'deploy', 'svc')."
    })
}

fn resolve_resource(tool: &str, args: &JsonObject) -> Result<ResourceRef, CallToolResult> {
    let resource_type = required_str(tool, args, "resource_type")?;
    ResourceRef::lookup(&resource_type)
        .ok_or_else(|| error_result(format!("{tool}: unsupported `resource_type` '{resource_type}'")))
}

/// `k8s_get_resources`: list objects of one type.
pub struct GetResourcesHandler;

impl ToolHandler for GetResourcesHandler {
    fn name(&self) -> &str {
        "k8s_get_resources"
    }

    fn title(&self) -> Option<&str> {
        Some("Kubernetes: List Resources")
    }

    fn description(&self) -> &str {
        "List Kubernetes resources of a given type, optionally filtered by namespace and label selector."
    }

    fn input_schema(&self) -> JsonObject {
        object_schema(
            json!({
                "resource_type": resource_type_property(),
                "namespace": { "type": "string", "description": "Namespace to list in. Omit for all namespaces." },
                "label_selector": { "type": "string", "description": "Label selector such as 'app=web,tier!=db'." }
            }),
            &["resource_type"],
        )
    }

    fn execute<'a>(&'a self, args: JsonObject, ctx: &'a ToolContext) -> BoxFuture<'a, Result<CallToolResult>> {
        Box::pin(async move {
            let resource = match resolve_resource(self.name(), &args) {
                Ok(r) => r,
                Err(result) => return Ok(result),
            };
            let namespace = namespace_arg(&args, ctx);
            let selector = str_arg(&args, "label_selector");

            let items = ctx
                .client
                .list(&resource, namespace.as_deref(), selector.as_deref())
                .await?;

            Ok(json_result(&json!({
                "kind": resource.kind,
                "count": items.len(),
                "items": items.iter().map(summarize).collect::<Vec<_>>(),
            })))
        })
    }
}

/// `k8s_get_resource`: fetch one object in full.
pub struct GetResourceHandler;

impl ToolHandler for GetResourceHandler {
    fn name(&self) -> &str {
        "k8s_get_resource"
    }

    fn title(&self) -> Option<&str> {
        Some("Kubernetes: Get Resource")
    }

    fn description(&self) -> &str {
        "Get a single Kubernetes resource as JSON."
    }

    fn input_schema(&self) -> JsonObject {
        object_schema(
            json!({
                "resource_type": resource_type_property(),
                "name": { "type": "string", "description": "Name of the resource." },
                "namespace": { "type": "string", "description": "Namespace of the resource (namespaced types only)." }
            }),
            &["resource_type", "name"],
        )
    }

    fn execute<'a>(&'a self, args: JsonObject, ctx: &'a ToolContext) -> BoxFuture<'a, Result<CallToolResult>> {
        Box::pin(async move {
            let resource = match resolve_resource(self.name(), &args) {
                Ok(r) => r,
                Err(result) => return Ok(result),
            };
            let name = match required_str(self.name(), &args, "name") {
                Ok(n) => n,
                Err(result) => return Ok(result),
            };
            let namespace = namespace_arg(&args, ctx);

            let object = ctx.client.get(&resource, namespace.as_deref(), &name).await?;
            Ok(json_result(&object))
        })
    }
}

/// `k8s_delete_resource`: delete one object.
pub struct DeleteResourceHandler;

impl ToolHandler for DeleteResourceHandler {
    fn name(&self) -> &str {
        "k8s_delete_resource"
    }

    fn title(&self) -> Option<&str> {
        Some("Kubernetes: Delete Resource")
    }

    fn description(&self) -> &str {
        "Delete a single Kubernetes resource."
    }

    fn mutating(&self) -> bool {
        true
    }

    fn input_schema(&self) -> JsonObject {
        object_schema(
            json!({
                "resource_type": resource_type_property(),
                "name": { "type": "string", "description": "Name of the resource to delete." },
                "namespace": { "type": "string", "description": "Namespace of the resource (namespaced types only)." }
            }),
            &["resource_type", "name"],
        )
    }

    fn execute<'a>(&'a self, args: JsonObject, ctx: &'a ToolContext) -> BoxFuture<'a, Result<CallToolResult>> {
        Box::pin(async move {
            let resource = match resolve_resource(self.name(), &args) {
                Ok(r) => r,
                Err(result) => return Ok(result),
            };
            let name = match required_str(self.name(), &args, "name") {
                Ok(n) => n,
                Err(result) => return Ok(result),
            };
            let namespace = namespace_arg(&args, ctx);

            ctx.client.delete(&resource, namespace.as_deref(), &name).await?;
            Ok(json_result(&json!({
                "status": "deleted",
                "kind": resource.kind,
                "name": name,
                "namespace": namespace,
            })))
        })
    }
}

/// `k8s_list_contexts`: contexts from the server's own kubeconfig.
pub struct ListContextsHandler;

impl ToolHandler for ListContextsHandler {
    fn name(&self) -> &str {
        "k8s_list_contexts"
    }

    fn title(&self) -> Option<&str> {
        Some("Kubernetes: List Contexts")
    }

    fn description(&self) -> &str {
        "List the contexts defined in the server's kubeconfig and the current context."
    }

    fn local_only(&self) -> bool {
        true
    }

    fn input_schema(&self) -> JsonObject {
        object_schema(json!({}), &[])
    }

    fn execute<'a>(&'a self, _args: JsonObject, ctx: &'a ToolContext) -> BoxFuture<'a, Result<CallToolResult>> {
        Box::pin(async move {
            let summary = ctx.identity.contexts();
            Ok(json_result(&json!({
                "contexts": summary.contexts,
                "current_context": summary.current_context,
                "identity_version": ctx.identity.version(),
            })))
        })
    }
}
