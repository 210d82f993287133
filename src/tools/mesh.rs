//! Istio traffic-management tools.

use std::sync::Arc;

use anyhow::Result;
use futures::future::BoxFuture;
use rmcp::model::{CallToolResult, JsonObject};
use serde_json::{Value, json};

use super::common::{json_result, namespace_arg, object_schema, pointer, pointer_str};
use super::{ToolContext, ToolHandler};
use crate::backend::ResourceRef;

const VIRTUAL_SERVICE: ResourceRef = ResourceRef {
    group: "networking.istio.io",
    version: "v1",
    kind: "VirtualService",
    plural: "virtualservices",
    namespaced: true,
};

const DESTINATION_RULE: ResourceRef = ResourceRef {
    group: "networking.istio.io",
    version: "v1",
    kind: "DestinationRule",
    plural: "destinationrules",
    namespaced: true,
};

pub fn tools() -> Vec<Arc<dyn ToolHandler>> {
    vec![
        Arc::new(ListMeshResourcesHandler {
            name: "istio_list_virtual_services",
            title: "Istio: List Virtual Services",
            description: "List Istio VirtualServices with their hosts and gateways.",
            resource: VIRTUAL_SERVICE,
            summarize: virtual_service_summary,
        }),
        Arc::new(ListMeshResourcesHandler {
            name: "istio_list_destination_rules",
            title: "Istio: List Destination Rules",
            description: "List Istio DestinationRules with their host and subsets.",
            resource: DESTINATION_RULE,
            summarize: destination_rule_summary,
        }),
    ]
}

fn string_list(value: &Value, path: &str) -> Vec<String> {
    pointer(value, path)
        .and_then(|v| v.as_array())
        .map(|items| items.iter().filter_map(|i| i.as_str()).map(str::to_string).collect())
        .unwrap_or_default()
}

fn virtual_service_summary(vs: &Value) -> Value {
    json!({
        "name": pointer_str(vs, "metadata.name"),
        "namespace": pointer_str(vs, "metadata.namespace"),
        "hosts": string_list(vs, "spec.hosts"),
        "gateways": string_list(vs, "spec.gateways"),
        "http_routes": pointer(vs, "spec.http").and_then(|h| h.as_array()).map_or(0, |h| h.len()),
    })
}

fn destination_rule_summary(dr: &Value) -> Value {
    let subsets: Vec<Option<String>> = pointer(dr, "spec.subsets")
        .and_then(|s| s.as_array())
        .map(|items| items.iter().map(|s| pointer_str(s, "name")).collect())
        .unwrap_or_default();
    json!({
        "name": pointer_str(dr, "metadata.name"),
        "namespace": pointer_str(dr, "metadata.namespace"),
        "host": pointer_str(dr, "spec.host"),
        "subsets": subsets,
    })
}

/// Lists one Istio resource type with a type-specific summary.
pub struct ListMeshResourcesHandler {
    name: &'static str,
    title: &'static str,
    description: &'static str,
    resource: ResourceRef,
    summarize: fn(&Value) -> Value,
}

impl ToolHandler for ListMeshResourcesHandler {
    fn name(&self) -> &str {
        self.name
    }

    fn title(&self) -> Option<&str> {
        Some(self.title)
    }

    fn description(&self) -> &str {
        self.description
    }

    fn input_schema(&self) -> JsonObject {
        object_schema(
            json!({
                "namespace": { "type": "string", "description": "Namespace to list in. Omit for all namespaces." }
            }),
            &[],
        )
    }

    fn execute<'a>(&'a self, args: JsonObject, ctx: &'a ToolContext) -> BoxFuture<'a, Result<CallToolResult>> {
        Box::pin(async move {
            let namespace = namespace_arg(&args, ctx);
            let items = ctx.client.list(&self.resource, namespace.as_deref(), None).await?;
            let items: Vec<Value> = items.iter().map(self.summarize).collect();
            Ok(json_result(&json!({
                "kind": self.resource.kind,
                "count": items.len(),
                "items": items,
            })))
        })
    }
}
