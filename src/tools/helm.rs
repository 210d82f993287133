//! Helm release tools.
//!
//! Helm 3 stores every release revision as a secret labelled `owner=helm`;
//! the release list is derived from those labels without decoding payloads.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Result;
use futures::future::BoxFuture;
use rmcp::model::{CallToolResult, JsonObject};
use serde_json::{Value, json};

use super::common::{json_result, namespace_arg, object_schema, pointer, pointer_str};
use super::{ToolContext, ToolHandler};
use crate::backend::ResourceRef;

const RELEASE_SELECTOR: &str = "owner=helm";

pub fn tools() -> Vec<Arc<dyn ToolHandler>> {
    vec![Arc::new(ListReleasesHandler)]
}

#[derive(Debug, Clone, PartialEq)]
struct Release {
    name: String,
    namespace: Option<String>,
    revision: u64,
    status: Option<String>,
    updated: Option<String>,
}

impl Release {
    fn from_secret(secret: &Value) -> Option<Self> {
        let labels = pointer(secret, "metadata.labels")?;
        let name = labels.get("name")?.as_str()?.to_string();
        let revision = labels.get("version")?.as_str()?.parse().ok()?;
        Some(Self {
            name,
            namespace: pointer_str(secret, "metadata.namespace"),
            revision,
            status: labels.get("status").and_then(|s| s.as_str()).map(str::to_string),
            updated: labels
                .get("modifiedAt")
                .and_then(|s| s.as_str())
                .map(str::to_string)
                .or_else(|| pointer_str(secret, "metadata.creationTimestamp")),
        })
    }
}

/// Keep the newest revision of every `(namespace, name)` pair.
fn latest_releases(secrets: &[Value]) -> Vec<Release> {
    let mut latest: BTreeMap<(Option<String>, String), Release> = BTreeMap::new();
    for release in secrets.iter().filter_map(Release::from_secret) {
        let key = (release.namespace.clone(), release.name.clone());
        match latest.get(&key) {
            Some(existing) if existing.revision >= release.revision => {}
            _ => {
                latest.insert(key, release);
            }
        }
    }
    latest.into_values().collect()
}

/// `helm_list_releases`
pub struct ListReleasesHandler;

impl ToolHandler for ListReleasesHandler {
    fn name(&self) -> &str {
        "helm_list_releases"
    }

    fn title(&self) -> Option<&str> {
        Some("Helm: List Releases")
    }

    fn description(&self) -> &str {
        "List Helm releases with their latest revision and status."
    }

    fn input_schema(&self) -> JsonObject {
        object_schema(
            json!({
                "namespace": { "type": "string", "description": "Namespace to list releases in. Omit for all namespaces." },
                "all": { "type": "boolean", "description": "Include releases whose latest revision is not 'deployed'." }
            }),
            &[],
        )
    }

    fn execute<'a>(&'a self, args: JsonObject, ctx: &'a ToolContext) -> BoxFuture<'a, Result<CallToolResult>> {
        Box::pin(async move {
            let namespace = namespace_arg(&args, ctx);
            let include_all = args.get("all").and_then(|v| v.as_bool()).unwrap_or(false);

            let secrets = ctx
                .client
                .list(&ResourceRef::core("Secret", "secrets", true), namespace.as_deref(), Some(RELEASE_SELECTOR))
                .await?;

            let releases: Vec<Value> = latest_releases(&secrets)
                .into_iter()
                .filter(|r| include_all || r.status.as_deref() == Some("deployed"))
                .map(|r| {
                    json!({
                        "name": r.name,
                        "namespace": r.namespace,
                        "revision": r.revision,
                        "status": r.status,
                        "updated": r.updated,
                    })
                })
                .collect();

            Ok(json_result(&json!({
                "count": releases.len(),
                "releases": releases,
            })))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeBackend, result_json, tool_context};

    fn release_secret(name: &str, ns: &str, version: u64, status: &str) -> Value {
        json!({
            "metadata": {
                "name": format!("sh.helm.release.v1.{name}.v{version}"),
                "namespace": ns,
                "labels": { "owner": "helm", "name": name, "version": version.to_string(), "status": status }
            }
        })
    }

    #[test]
    fn test_latest_revision_wins() {
        let secrets = vec![
            release_secret("web", "shop", 1, "superseded"),
            release_secret("web", "shop", 3, "deployed"),
            release_secret("web", "shop", 2, "superseded"),
            release_secret("web", "staging", 1, "deployed"),
        ];
        let releases = latest_releases(&secrets);
        assert_eq!(releases.len(), 2);
        let shop = releases.iter().find(|r| r.namespace.as_deref() == Some("shop")).unwrap();
        assert_eq!(shop.revision, 3);
    }

    #[test]
    fn test_secret_without_labels_is_skipped() {
        let secrets = vec![json!({ "metadata": { "name": "plain", "namespace": "shop" } })];
        assert!(latest_releases(&secrets).is_empty());
    }

    #[tokio::test]
    async fn test_list_releases_hides_failed_unless_all() {
        let backend = FakeBackend::new("https://default");
        backend.insert("secrets", release_secret("web", "shop", 2, "deployed"));
        backend.insert("secrets", release_secret("worker", "shop", 1, "failed"));
        backend.insert("secrets", json!({ "metadata": { "name": "db-password", "namespace": "shop", "labels": { "app": "db" } } }));
        let ctx = tool_context(backend);

        let deployed = result_json(&ListReleasesHandler.execute(JsonObject::new(), &ctx).await.unwrap());
        assert_eq!(deployed["count"], 1);
        assert_eq!(deployed["releases"][0]["name"], "web");

        let args = json!({ "all": true }).as_object().cloned().unwrap();
        let everything = result_json(&ListReleasesHandler.execute(args, &ctx).await.unwrap());
        assert_eq!(everything["count"], 2);
    }
}
