//! Argument parsing and result formatting shared by the tool areas.

use rmcp::model::{CallToolResult, Content, JsonObject};
use serde_json::{Value, json};

use super::ToolContext;

/// Build an object input schema from a `properties` map and required keys.
pub fn object_schema(properties: Value, required: &[&str]) -> JsonObject {
    let mut schema = JsonObject::new();
    schema.insert("type".to_string(), json!("object"));
    schema.insert("properties".to_string(), properties);
    if !required.is_empty() {
        schema.insert("required".to_string(), json!(required));
    }
    schema
}

/// A trimmed, non-empty string argument.
pub fn str_arg(args: &JsonObject, key: &str) -> Option<String> {
    args.get(key)
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// A required string argument, or a failure result naming the parameter.
pub fn required_str(tool: &str, args: &JsonObject, key: &str) -> Result<String, CallToolResult> {
    str_arg(args, key).ok_or_else(|| {
        error_result(format!("{tool} requires a non-empty `{key}` string argument"))
    })
}

/// Namespace from the arguments, falling back to the credential scope hint.
pub fn namespace_arg(args: &JsonObject, ctx: &ToolContext) -> Option<String> {
    str_arg(args, "namespace").or_else(|| ctx.namespace.clone())
}

pub fn json_result(payload: &Value) -> CallToolResult {
    let text = serde_json::to_string_pretty(payload)
        .unwrap_or_else(|_| "internal serialization error".to_string());
    CallToolResult {
        content: vec![Content::text(text)],
        structured_content: None,
        is_error: Some(false),
        meta: None,
    }
}

/// A single-line failure result.
pub fn error_result(message: impl Into<String>) -> CallToolResult {
    let message: String = message.into();
    let line = message.replace(['\r', '\n'], " ");
    CallToolResult {
        content: vec![Content::text(line)],
        structured_content: None,
        is_error: Some(true),
        meta: None,
    }
}

/// Follow a dotted path (`status.sync.status`) into a JSON value.
pub fn pointer<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(value, |current, part| current.get(part))
}

pub fn pointer_str(value: &Value, path: &str) -> Option<String> {
    pointer(value, path).and_then(|v| v.as_str()).map(str::to_string)
}

/// Compact listing entry: name, namespace and age reference.
pub fn summarize(obj: &Value) -> Value {
    let mut out = json!({ "name": pointer_str(obj, "metadata.name") });
    if let Some(ns) = pointer_str(obj, "metadata.namespace") {
        out["namespace"] = json!(ns);
    }
    if let Some(created) = pointer_str(obj, "metadata.creationTimestamp") {
        out["created"] = json!(created);
    }
    out
}
