//! Argo CD application tools.
//!
//! Applications are read straight from the `applications.argoproj.io` custom
//! resources, so no Argo CD API token is needed beyond cluster access.

use std::sync::Arc;

use anyhow::Result;
use futures::future::BoxFuture;
use rmcp::model::{CallToolResult, JsonObject};
use serde_json::{Value, json};

use super::common::{json_result, object_schema, pointer_str, required_str, str_arg};
use super::{ToolContext, ToolHandler};
use crate::backend::ResourceRef;

const APPLICATION: ResourceRef = ResourceRef {
    group: "argoproj.io",
    version: "v1alpha1",
    kind: "Application",
    plural: "applications",
    namespaced: true,
};

pub fn tools(argocd_namespace: &str) -> Vec<Arc<dyn ToolHandler>> {
    vec![
        Arc::new(ListApplicationsHandler::new(argocd_namespace)),
        Arc::new(GetApplicationHandler::new(argocd_namespace)),
    ]
}

fn application_summary(app: &Value) -> Value {
    json!({
        "name": pointer_str(app, "metadata.name"),
        "project": pointer_str(app, "spec.project"),
        "repo": pointer_str(app, "spec.source.repoURL"),
        "path": pointer_str(app, "spec.source.path"),
        "target_revision": pointer_str(app, "spec.source.targetRevision"),
        "destination_namespace": pointer_str(app, "spec.destination.namespace"),
        "sync_status": pointer_str(app, "status.sync.status"),
        "health_status": pointer_str(app, "status.health.status"),
    })
}

/// `argo_list_applications`
pub struct ListApplicationsHandler {
    default_namespace: String,
}

impl ListApplicationsHandler {
    pub fn new(default_namespace: &str) -> Self {
        Self {
            default_namespace: default_namespace.to_string(),
        }
    }
}

impl ToolHandler for ListApplicationsHandler {
    fn name(&self) -> &str {
        "argo_list_applications"
    }

    fn title(&self) -> Option<&str> {
        Some("Argo CD: List Applications")
    }

    fn description(&self) -> &str {
        "List Argo CD applications with their sync and health status."
    }

    fn input_schema(&self) -> JsonObject {
        object_schema(
            json!({
                "namespace": { "type": "string", "description": "Namespace holding the Application resources (defaults to the Argo CD namespace)." },
                "project": { "type": "string", "description": "Only return applications of this Argo CD project." }
            }),
            &[],
        )
    }

    fn execute<'a>(&'a self, args: JsonObject, ctx: &'a ToolContext) -> BoxFuture<'a, Result<CallToolResult>> {
        Box::pin(async move {
            let namespace = str_arg(&args, "namespace").unwrap_or_else(|| self.default_namespace.clone());
            let project = str_arg(&args, "project");

            let apps = ctx.client.list(&APPLICATION, Some(&namespace), None).await?;
            let apps: Vec<Value> = apps
                .iter()
                .filter(|app| match &project {
                    Some(p) => pointer_str(app, "spec.project").as_deref() == Some(p.as_str()),
                    None => true,
                })
                .map(application_summary)
                .collect();

            Ok(json_result(&json!({
                "namespace": namespace,
                "count": apps.len(),
                "applications": apps,
            })))
        })
    }
}

/// `argo_get_application`
pub struct GetApplicationHandler {
    default_namespace: String,
}

impl GetApplicationHandler {
    pub fn new(default_namespace: &str) -> Self {
        Self {
            default_namespace: default_namespace.to_string(),
        }
    }
}

impl ToolHandler for GetApplicationHandler {
    fn name(&self) -> &str {
        "argo_get_application"
    }

    fn title(&self) -> Option<&str> {
        Some("Argo CD: Get Application")
    }

    fn description(&self) -> &str {
        "Get an Argo CD application, including its per-resource sync state."
    }

    fn input_schema(&self) -> JsonObject {
        object_schema(
            json!({
                "name": { "type": "string", "description": "Application name." },
                "namespace": { "type": "string", "description": "Namespace holding the Application resource (defaults to the Argo CD namespace)." }
            }),
            &["name"],
        )
    }

    fn execute<'a>(&'a self, args: JsonObject, ctx: &'a ToolContext) -> BoxFuture<'a, Result<CallToolResult>> {
        Box::pin(async move {
            let name = match required_str(self.name(), &args, "name") {
                Ok(n) => n,
                Err(result) => return Ok(result),
            };
            let namespace = str_arg(&args, "namespace").unwrap_or_else(|| self.default_namespace.clone());

            let app = ctx.client.get(&APPLICATION, Some(&namespace), &name).await?;
            let resources: Vec<Value> = app
                .pointer("/status/resources")
                .and_then(|r| r.as_array())
                .map(|items| {
                    items
                        .iter()
                        .map(|r| {
                            json!({
                                "kind": r.get("kind"),
                                "name": r.get("name"),
                                "namespace": r.get("namespace"),
                                "status": r.get("status"),
                                "health": r.pointer("/health/status"),
                            })
                        })
                        .collect()
                })
                .unwrap_or_default();

            let mut payload = application_summary(&app);
            payload["resources"] = json!(resources);
            Ok(json_result(&payload))
        })
    }
}
