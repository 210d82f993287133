//! Prometheus query tool.
//!
//! Queries go through the API server's service proxy, so the Prometheus
//! service does not need to be exposed outside the cluster.

use std::sync::Arc;

use anyhow::{Context, Result, bail};
use futures::future::BoxFuture;
use rmcp::model::{CallToolResult, JsonObject};
use serde_json::{Value, json};

use super::common::{json_result, object_schema, required_str, str_arg};
use super::{PrometheusTarget, ToolContext, ToolHandler};

pub fn tools(target: &PrometheusTarget) -> Vec<Arc<dyn ToolHandler>> {
    vec![Arc::new(PrometheusQueryHandler::new(target.clone()))]
}

/// `prometheus_query`: instant PromQL query.
pub struct PrometheusQueryHandler {
    target: PrometheusTarget,
}

impl PrometheusQueryHandler {
    pub fn new(target: PrometheusTarget) -> Self {
        Self { target }
    }

    fn query_path(&self, query: &str, time: Option<&str>) -> String {
        let encoded: String = url::form_urlencoded::byte_serialize(query.as_bytes()).collect();
        let mut path = format!(
            "/api/v1/namespaces/{}/services/{}:{}/proxy/api/v1/query?query={}",
            self.target.namespace, self.target.service, self.target.port, encoded
        );
        if let Some(time) = time {
            let time: String = url::form_urlencoded::byte_serialize(time.as_bytes()).collect();
            path.push_str("&time=");
            path.push_str(&time);
        }
        path
    }
}

fn parse_response(body: &str) -> Result<Value> {
    let response: Value = serde_json::from_str(body).context("Prometheus returned a non-JSON body")?;
    match response.get("status").and_then(|s| s.as_str()) {
        Some("success") => Ok(response.get("data").cloned().unwrap_or(Value::Null)),
        _ => {
            let error = response
                .get("error")
                .and_then(|e| e.as_str())
                .unwrap_or("unknown error");
            bail!("Prometheus query failed: {error}")
        }
    }
}

impl ToolHandler for PrometheusQueryHandler {
    fn name(&self) -> &str {
        "prometheus_query"
    }

    fn title(&self) -> Option<&str> {
        Some("Prometheus: Instant Query")
    }

    fn description(&self) -> &str {
        "Run an instant PromQL query against the in-cluster Prometheus server."
    }

    fn input_schema(&self) -> JsonObject {
        object_schema(
            json!({
                "query": { "type": "string", "description": "PromQL expression." },
                "time": { "type": "string", "description": "Evaluation timestamp (RFC 3339 or unix seconds). Defaults to now." }
            }),
            &["query"],
        )
    }

    fn execute<'a>(&'a self, args: JsonObject, ctx: &'a ToolContext) -> BoxFuture<'a, Result<CallToolResult>> {
        Box::pin(async move {
            let query = match required_str(self.name(), &args, "query") {
                Ok(q) => q,
                Err(result) => return Ok(result),
            };
            let time = str_arg(&args, "time");

            let path = self.query_path(&query, time.as_deref());
            let body = ctx.client.proxy_get(&path).await?;
            let data = parse_response(&body)?;

            Ok(json_result(&json!({
                "query": query,
                "result_type": data.get("resultType"),
                "result": data.get("result"),
            })))
        })
    }
}
